//! Cancellable delayed task: each `schedule` replaces the pending one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

struct Pending {
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

/// Runs only the last task scheduled within `delay` of each other. The delay
/// is measured from the most recent `schedule` call. A task that has already
/// started running is left to finish.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: Mutex::new(None) }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task` after the delay, cancelling a still-waiting task.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            task.await;
        });

        if let Some(previous) = self.lock().replace(Pending { handle, fired }) {
            cancel_waiting(previous);
        }
    }

    /// Cancel the waiting task, if any. Returns whether one was cancelled.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(previous) => cancel_waiting(previous),
            None => false,
        }
    }

    /// Whether a task is scheduled and has not started yet.
    pub fn is_pending(&self) -> bool {
        self.lock()
            .as_ref()
            .map_or(false, |p| !p.fired.load(Ordering::SeqCst) && !p.handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cancel_waiting(pending: Pending) -> bool {
    if pending.fired.load(Ordering::SeqCst) {
        return false;
    }
    pending.handle.abort();
    true
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_only_last_task_runs() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let runs = Arc::clone(&runs);
            debouncer.schedule(async move { runs.lock().unwrap().push(i) });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(debouncer.is_pending());
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(*runs.lock().unwrap(), vec![4]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_measured_from_last_change() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        debouncer.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(400)).await;
        let c = Arc::clone(&count);
        debouncer.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        debouncer.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.cancel());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!debouncer.cancel());
    }
}
