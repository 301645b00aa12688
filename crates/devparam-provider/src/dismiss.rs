use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative cancellation flag shared between a dispatched batch and the
/// provider calls it launched. Dismissal is best-effort: a provider that
/// never looks at its watch still runs to completion, but its answer is
/// dropped by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DismissWatch {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    dismissed: AtomicBool,
    notify: Notify,
}

impl DismissWatch {
    pub fn new() -> Self {
        DismissWatch::default()
    }

    pub fn is_dismissed(&self) -> bool {
        self.inner.dismissed.load(Ordering::Acquire)
    }

    pub fn dismiss(&self) {
        self.inner.dismissed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once the watch is dismissed. Long-running providers can
    /// select on this to abandon work early.
    pub async fn dismissed(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_dismissed() {
                return;
            }
            notified.await;
        }
    }
}
