//! Serial executors.
//!
//! A [`Lane`] is one named thread draining a FIFO queue of jobs. Everything
//! submitted to the same lane runs one at a time in submission order, which
//! is the only ordering guarantee the storage layer relies on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;

use evq_common::{Error, Result};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Named serial executor backed by a dedicated thread.
pub struct Lane {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Lane {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.clone();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in receiver {
                    // A panicking job must not take the lane down with it.
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(lane = %thread_name, "job panicked");
                    }
                }
                debug!(lane = %thread_name, "lane drained");
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job` behind everything already submitted.
    pub fn dispatch<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.sender);
        let closed = || Error::LaneClosed {
            name: self.name.clone(),
        };
        sender
            .as_ref()
            .ok_or_else(closed)?
            .send(Box::new(job))
            .map_err(|_| closed())
    }

    /// Run `job` on the lane and wait for its result.
    ///
    /// Must not be called from a job running on the same lane.
    pub fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.dispatch(move || {
            let _ = tx.send(job());
        })?;
        rx.recv().map_err(|_| Error::LaneClosed {
            name: self.name.clone(),
        })
    }

    /// Block until every job submitted so far has run.
    pub fn sync(&self) -> Result<()> {
        self.run(|| ())
    }

    /// Stop accepting jobs, let queued jobs finish and join the thread.
    pub fn shutdown(&self) {
        lock(&self.sender).take();
        if let Some(thread) = lock(&self.thread).take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            let _ = thread.join();
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("open", &lock(&self.sender).is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
