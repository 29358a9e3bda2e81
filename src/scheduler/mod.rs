//! Maintenance scheduler.
//!
//! The engine owns a small tokio runtime for everything that must not block
//! interactive reads: debounced autosave, background compaction, backup
//! creation. The debounce contract is "latest scheduled call wins": each new
//! trigger aborts the previously pending task before its delay elapses, so
//! rapid successive edits collapse into one save.

use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use crate::observability::Logger;

pub struct MaintenanceScheduler {
    runtime: Runtime,
    /// The pending debounced task, if any. Replaced (and the old handle
    /// aborted) on every new trigger.
    pending: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("chunkdb-maintenance")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime,
            pending: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Schedules `job` to run after `delay`, cancelling any previously
    /// pending debounced job.
    pub fn schedule_debounced<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Run the blocking job off the timer thread.
            let inner = tokio::task::spawn_blocking(job);
            if let Err(e) = inner.await {
                if !e.is_cancelled() {
                    Logger::error("debounced_job_panicked", &[("error", &e.to_string())]);
                }
            }
        });

        let mut pending = lock_recovering(&self.pending);
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Offloads a long-running job (compaction, backup) so it never blocks
    /// the caller.
    pub fn spawn_background<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn_blocking(job);
        let mut background = lock_recovering(&self.background);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Flush point: cancels the pending debounced task and waits for
    /// background work to finish.
    pub fn shutdown(self) {
        if let Some(pending) = lock_recovering(&self.pending).take() {
            pending.abort();
        }
        let handles: Vec<JoinHandle<()>> = lock_recovering(&self.background).drain(..).collect();
        self.runtime.block_on(async {
            for handle in handles {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        Logger::error("background_job_panicked", &[("error", &e.to_string())]);
                    }
                }
            }
        });
        self.runtime.shutdown_timeout(Duration::from_secs(5));
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn latest_scheduled_call_wins() {
        let scheduler = MaintenanceScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            scheduler.schedule_debounced(Duration::from_millis(50), move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(
            runs.load(Ordering::SeqCst),
            1,
            "earlier pending calls must be cancelled"
        );
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_waits_for_background_work() {
        let scheduler = MaintenanceScheduler::new().unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        scheduler.spawn_background(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(1, Ordering::SeqCst);
        });
        scheduler.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
