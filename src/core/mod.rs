//! Concurrency building blocks - worker pool and main-thread dispatch queue
//!
//! Independent of HTTP; the server wires them together.

pub mod dispatch_queue;
pub mod workers;

pub use dispatch_queue::{DispatchQueue, QueueSender};
pub use workers::Workers;
