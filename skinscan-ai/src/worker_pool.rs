//! Bounded pool for CPU-bound analyzer calls
//!
//! Analyzer work runs on tokio's blocking threads. A semaphore caps how many
//! analyzer calls are in flight at once, so a run can never create more
//! concurrent analyzer tasks than the device profile allows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// How a pooled task ended
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// Deadline passed; the blocking thread may still be running
    TimedOut,
    /// Task panicked or could not be scheduled
    Panicked(String),
}

/// Semaphore-bounded set of blocking workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a task
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on a blocking worker under `timeout`
    ///
    /// Waiting for a free worker counts against the timeout. A timed-out
    /// task is abandoned, not interrupted: it keeps its worker until it
    /// returns and its result is discarded.
    pub async fn run_blocking<F, T>(&self, name: &str, timeout: Duration, task: F) -> TaskOutcome<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| format!("worker pool closed: {}", e))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task()
            })
            .await
            .map_err(|e| {
                if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                }
            })
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(message)) => {
                warn!(task = name, error = %message, "Worker task failed");
                TaskOutcome::Panicked(message)
            }
            Err(_) => {
                debug!(task = name, timeout_ms = timeout.as_millis() as u64, "Worker task timed out");
                TaskOutcome::TimedOut
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
