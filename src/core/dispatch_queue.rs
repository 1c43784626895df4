//! Main-thread dispatch queue.
//!
//! Architecture:
//! - Any number of producers (connection workers) call [`QueueSender::push`];
//!   it never blocks.
//! - One consumer (the host loop) calls [`DispatchQueue::drain`] once per
//!   tick and gets everything that was queued when the drain started, in
//!   enqueue order.
//! - [`DispatchQueue::close`] flips the queue to "stopped": new pushes are
//!   refused and queued items are handed back for discarding.

use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};
use log::{trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Consumer side. Lives on the host thread.
pub struct DispatchQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    closed: Arc<AtomicBool>,
}

/// Producer handle, cloned into each worker job.
pub struct QueueSender<T> {
    tx: Sender<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), closed: Arc::clone(&self.closed) }
    }
}

impl<T> std::fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSender")
            .field("queue_len", &self.tx.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> QueueSender<T> {
    /// Enqueue an item. Hands it back if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(item);
        }
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatchQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, closed: Arc::new(AtomicBool::new(false)) }
    }

    pub fn sender(&self) -> QueueSender<T> {
        QueueSender { tx: self.tx.clone(), closed: Arc::clone(&self.closed) }
    }

    /// Take every item queued at the moment of the call.
    ///
    /// Items pushed while the caller processes the batch wait for the next
    /// drain, so a steady stream of requests cannot keep one tick busy.
    /// Returns nothing once closed.
    pub fn drain(&self) -> Vec<T> {
        if self.is_closed() {
            return Vec::new();
        }
        let batch: Vec<T> = self.rx.try_iter().take(self.rx.len()).collect();
        if !batch.is_empty() {
            trace!("Dispatch queue drained {} item(s)", batch.len());
        }
        batch
    }

    /// Refuse further pushes and return whatever is still queued.
    ///
    /// Safe to call more than once; later calls return stragglers that
    /// slipped in while the first call ran.
    pub fn close(&self) -> Vec<T> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("Dispatch queue closed");
        }
        let leftover: Vec<T> = self.rx.try_iter().collect();
        if !leftover.is_empty() {
            warn!("Discarding {} queued item(s) after stop", leftover.len());
        }
        leftover
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_preserves_fifo() {
        let queue = DispatchQueue::new();
        let tx = queue.sender();
        for i in 0..5 {
            tx.push(i).unwrap();
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        // Queue is empty after drain
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_empty_drain_does_not_block() {
        let queue: DispatchQueue<u32> = DispatchQueue::new();
        assert!(queue.drain().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_multiple_producers_all_delivered() {
        let queue = DispatchQueue::new();
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let tx = queue.sender();
                thread::spawn(move || {
                    for i in 0..100 {
                        tx.push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let batch = queue.drain();
        assert_eq!(batch.len(), 400);
        // Per-producer order is kept
        for p in 0..4 {
            let mine: Vec<_> = batch.iter().filter(|v| **v / 1000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_close_refuses_and_returns_leftovers() {
        let queue = DispatchQueue::new();
        let tx = queue.sender();
        tx.push("a").unwrap();
        tx.push("b").unwrap();

        assert_eq!(queue.close(), vec!["a", "b"]);
        assert!(tx.is_closed());
        assert_eq!(tx.push("c"), Err("c"));
        assert!(queue.drain().is_empty());

        // Second close is harmless
        assert!(queue.close().is_empty());
    }
}
