use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Handle to control and join a background worker.
///
/// Dropping the handle also stops the worker (its shutdown channel
/// disconnects), but does not wait for it.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Fixed-interval background worker loop.
///
/// - Runs `task` once per `interval`, starting one interval after spawn
/// - Task failures are logged and the loop keeps going
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct PeriodicWorker;

impl PeriodicWorker {
    pub fn spawn<T, E>(name: &'static str, interval: Duration, mut task: T) -> io::Result<WorkerHandle>
    where
        T: FnMut() -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, interval, shutdown_rx, &mut task))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<T, E>(name: &'static str, interval: Duration, shutdown_rx: mpsc::Receiver<()>, task: &mut T)
where
    T: FnMut() -> Result<(), E>,
    E: core::fmt::Display,
{
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Err(err) = task() {
                    warn!(worker = name, error = %err, "periodic worker task failed");
                }
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "periodic worker stopped");
}
