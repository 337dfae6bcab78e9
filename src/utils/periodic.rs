//! Background tasks driven by a fixed interval and stopped through a
//! shutdown channel.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Handle to a running periodic task
///
/// Dropping the handle does not stop the task; call [`PeriodicTask::stop`]
/// to signal shutdown and wait for the loop to exit.
pub struct PeriodicTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` on the multi-threaded runtime every `period`
    ///
    /// When `immediate` is true the first tick fires right away, otherwise
    /// the first run happens one period after spawning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(period: Duration, immediate: bool, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(period, immediate, shutdown_rx, tick));
        Self { shutdown, handle }
    }

    /// Spawn `tick` on the current thread's local task set
    ///
    /// Used for work that holds request-scoped, non-`Send` state across
    /// awaits. Must be called from within the actix runtime.
    pub fn spawn_local<F, Fut>(period: Duration, immediate: bool, tick: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = actix_web::rt::spawn(run_loop(period, immediate, shutdown_rx, tick));
        Self { shutdown, handle }
    }

    /// Signal shutdown and wait for the task to finish
    ///
    /// # Errors
    ///
    /// Returns an error if the task panicked
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        // Receiver gone means the loop already exited
        let _ = self.shutdown.send(true);
        self.handle.await
    }
}

async fn run_loop<F, Fut>(
    period: Duration,
    immediate: bool,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !immediate {
        // The first tick of a tokio interval completes immediately
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => tick().await,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    log::debug!("Periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn(Duration::from_millis(20), true, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        task.stop().await.unwrap();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_delayed_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn(Duration::from_secs(60), false, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
