//! Debounced background work.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Resolves to `false` when the run failed and should be retried.
type Action = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

struct Inner {
    delay: Duration,
    generation: AtomicU64,
    dirty: AtomicBool,
    action: Action,
}

impl Inner {
    fn schedule(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            if inner.generation.load(Ordering::SeqCst) == generation
                && inner.dirty.swap(false, Ordering::SeqCst)
            {
                inner.run().await;
            }
        });
    }

    async fn run(self: &Arc<Self>) {
        if !(self.action)().await {
            tracing::debug!(delay_ms = self.delay.as_millis() as u64, "Retrying after failure");
            self.schedule();
        }
    }
}

/// Runs an action once things have been quiet for `delay`.
///
/// Each [`schedule`](Debouncer::schedule) restarts the quiet period. A
/// superseded timer simply expires without running, so an action that has
/// already started is never interrupted. A failed run is scheduled again.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                delay,
                generation: AtomicU64::new(0),
                dirty: AtomicBool::new(false),
                action: Arc::new(action),
            }),
        }
    }

    /// Request a run after the quiet period. Needs a tokio runtime.
    pub fn schedule(&self) {
        self.inner.schedule();
    }

    /// Cancel the pending timer and run now.
    pub async fn flush(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.dirty.store(false, Ordering::SeqCst);
        self.inner.run().await;
    }

    /// Drop a pending run without executing it.
    pub fn cancel(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.dirty.store(false, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(delay: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        counting_with_failures(delay, 0)
    }

    /// Fails the first `failures` runs.
    fn counting_with_failures(delay: Duration, failures: usize) -> (Debouncer, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let debouncer = Debouncer::new(delay, move || {
            let counter = counter.clone();
            Box::pin(async move { counter.fetch_add(1, Ordering::SeqCst) >= failures })
        });
        (debouncer, runs)
    }

    #[tokio::test]
    async fn test_bursts_collapse_into_one_run() {
        let (debouncer, runs) = counting(Duration::from_millis(20));
        for _ in 0..5 {
            debouncer.schedule();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test]
    async fn test_flush_runs_now_and_supersedes_timer() {
        let (debouncer, runs) = counting(Duration::from_millis(20));
        debouncer.schedule();
        debouncer.flush().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_run_is_retried() {
        let (debouncer, runs) = counting_with_failures(Duration::from_millis(10), 2);
        debouncer.flush().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_run() {
        let (debouncer, runs) = counting(Duration::from_millis(10));
        debouncer.schedule();
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
