//! Thread pool for connection handling.
//!
//! The listener hands every accepted connection to [`Workers::execute`],
//! which never blocks: jobs go onto an unbounded channel shared by all
//! worker threads. Workers do file I/O and socket writes; they never run a
//! registered operation.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{trace, warn};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// workers.execute(move || handle_connection(stream));
/// workers.shutdown(Duration::from_millis(500));
/// ```
pub struct Workers {
    tx: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let num_threads = num_threads.max(1);
        let (tx, rx) = unbounded::<Job>();

        let mut handles = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("tickserve-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    // Ends once every Sender is gone and the queue is empty
                    for job in rx.iter() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", num_threads);
        Ok(Self { tx: Some(tx), handles })
    }

    /// Queue a job. Returns immediately.
    ///
    /// After [`Workers::shutdown`] the job is dropped.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.tx {
            Some(tx) => {
                if tx.send(Box::new(f)).is_err() {
                    warn!("Worker pool is gone, dropping job");
                }
            }
            None => warn!("Worker pool is shut down, dropping job"),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting jobs and wait up to `grace` for in-flight ones.
    ///
    /// Threads still busy after the deadline are detached; they finish their
    /// current connection on their own.
    pub fn shutdown(&mut self, grace: Duration) {
        // Closing the channel lets idle workers fall out of their loop
        self.tx.take();

        let num_threads = self.handles.len();
        if num_threads == 0 {
            return;
        }
        trace!("Workers shutting down ({} threads)...", num_threads);

        let deadline = Instant::now() + grace;
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    warn!("Worker shutdown grace period elapsed, abandoning busy workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(500));
    }
}
