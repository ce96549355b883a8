//! Timers used by entities: the momentary-clear debounce and the group wait.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs a callback once a window has passed since the last restart.
///
/// Restarting aborts the pending timer, so only the most recent trigger
/// fires.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `f` after the window, superseding any pending call.
    ///
    /// Outside a tokio runtime there is no timer to wait on: any pending call
    /// is cancelled and `f` runs immediately.
    pub fn restart<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime for debounce timer, running now");
            self.cancel();
            f();
            return;
        };
        let window = self.window;
        let task = runtime.spawn(async move {
            tokio::time::sleep(window).await;
            f();
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Signal that some linked device reported, awaited with a timeout.
#[derive(Debug)]
pub struct UpdateSignal {
    tx: watch::Sender<u64>,
}

impl Default for UpdateSignal {
    fn default() -> Self {
        Self {
            tx: watch::Sender::new(0),
        }
    }
}

impl UpdateSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Wait for the next notification, at most `limit`.
    ///
    /// Only notifications after this call count. Returns `false` on timeout.
    pub async fn wait(&self, limit: Duration) -> bool {
        // a fresh receiver has the current value marked as seen
        let mut rx = self.tx.subscribe();
        matches!(tokio::time::timeout(limit, rx.changed()).await, Ok(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_debounce_fires_once_after_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(200));

        let counter = fired.clone();
        debouncer.restart(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(199)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(200));

        for _ in 0..3 {
            let counter = fired.clone();
            debouncer.restart(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_without_runtime_runs_now() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let counter = fired.clone();
        debouncer.restart(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let counter = fired.clone();
        debouncer.restart(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_times_out() {
        let signal = UpdateSignal::new();
        let start = tokio::time::Instant::now();
        assert!(!signal.wait(Duration::from_secs(10)).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_ignores_earlier_notifications() {
        let signal = Arc::new(UpdateSignal::new());
        signal.notify();

        let notifier = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            notifier.notify();
        });

        let start = tokio::time::Instant::now();
        assert!(signal.wait(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
