use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type PeriodicTask = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Handle to a scheduled periodic task or an observer subscription.
/// Cancelling is idempotent; dropping the handle does not cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Timer capability: the `setInterval` of the embedding runtime.
pub trait Scheduler: Send + Sync {
    fn schedule_periodic(&self, interval: Duration, task: PeriodicTask) -> CancelHandle;
}

/// Runs periodic tasks on the ambient tokio runtime. Each tick awaits the
/// task before the next one is considered, so ticks of one subject never
/// overlap.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_periodic(&self, interval: Duration, task: PeriodicTask) -> CancelHandle {
        let handle = CancelHandle::new();
        let token = handle.token();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = token.cancelled() => break,
                }
            }
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = TokioScheduler.schedule_periodic(
            Duration::from_millis(500),
            Box::new(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            }),
        );

        time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.cancel();
        time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(handle.is_cancelled());
    }
}
