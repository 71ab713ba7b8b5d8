use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Context;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded set of named worker threads running pipeline jobs.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("crop-worker-{}", i))
                .spawn(move || worker_loop(rx))
                .with_context(|| format!("spawning crop-worker-{}", i))?;
            workers.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job. Returns `false` if the pool is shutting down.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let rx = rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.recv()
        };
        let Ok(job) = job else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            let name = std::thread::current().name().map(str::to_owned);
            tracing::error!(worker = name.as_deref().unwrap_or("?"), "crop job panicked");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        let current = std::thread::current().id();
        for handle in self.workers.drain(..) {
            // The last reference may be dropped by a job on one of our own threads.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}
