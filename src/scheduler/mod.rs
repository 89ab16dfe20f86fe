use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Context provided to background tasks during execution
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

/// Trait for background tasks that run periodically
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    /// Execute the task
    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Runs periodic background tasks and one-shot delayed work.
///
/// Periodic tasks stop at shutdown. Delayed work is never cancelled: shutdown
/// waits for every pending item to run.
pub struct Scheduler {
    periodic: Mutex<Vec<JoinHandle<()>>>,
    delayed: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            periodic: Mutex::new(Vec::new()),
            delayed: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a periodic background task
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task);
        self.periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        self
    }

    /// Run `f` on the runtime once at least `delay` has elapsed.
    pub fn spawn_after<F>(&self, delay: Duration, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f.await;
        });

        let mut delayed = self.delayed.lock().unwrap_or_else(PoisonError::into_inner);
        delayed.retain(|h| !h.is_finished());
        delayed.push(handle);
    }

    /// Number of delayed items that have not finished yet.
    pub fn pending(&self) -> usize {
        self.delayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };

                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                error = %e,
                                "Task execution failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "Task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Graceful shutdown - stop periodic tasks, then drain delayed work
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let periodic: Vec<_> = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in periodic {
            task.await
                .map_err(|e| Error::InvalidState(format!("Task join error: {}", e)))?;
        }

        // delayed work may schedule more delayed work
        loop {
            let delayed: Vec<_> = self
                .delayed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if delayed.is_empty() {
                break;
            }
            for task in delayed {
                task.await
                    .map_err(|e| Error::InvalidState(format!("Delayed task join error: {}", e)))?;
            }
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestTask {
        name: &'static str,
        interval: Duration,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackgroundTask for TestTask {
        fn name(&self) -> &'static str {
            self.name
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn execute(&self, _ctx: Context) -> Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scheduler_basic() -> Result<()> {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = Arc::new(TestTask {
            name: "test-task",
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        });

        scheduler.register(task);

        // Let it run for a bit
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Should have executed multiple times
        assert!(counter.load(Ordering::SeqCst) > 0);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_graceful_shutdown() -> Result<()> {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = Arc::new(TestTask {
            name: "test-task",
            interval: Duration::from_millis(10),
            counter: counter.clone(),
        });

        scheduler.register(task);

        // Let it run briefly
        tokio::time::sleep(Duration::from_millis(25)).await;

        let count_before_shutdown = counter.load(Ordering::SeqCst);

        // Shutdown should be fast
        let start = std::time::Instant::now();
        scheduler.shutdown().await?;
        let shutdown_time = start.elapsed();

        // Should shutdown quickly
        assert!(shutdown_time < Duration::from_millis(100));

        // Give a moment to ensure no more tasks run
        tokio::time::sleep(Duration::from_millis(25)).await;
        let count_after_shutdown = counter.load(Ordering::SeqCst);

        assert!(count_after_shutdown <= count_before_shutdown + 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_after_respects_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let start = tokio::time::Instant::now();
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let fired = fired.clone();
            scheduler.spawn_after(Duration::from_millis(20), async move {
                fired.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(tokio::time::Instant::now());
            });
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let ran_at = rx.await.unwrap();
        assert!(ran_at - start >= Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_delayed_work() -> Result<()> {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let fired = fired.clone();
            scheduler.spawn_after(Duration::from_millis(15), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.pending(), 5);

        scheduler.shutdown().await?;
        assert_eq!(fired.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.pending(), 0);
        Ok(())
    }
}
