//! Single-consumer future/promise pair used at the front-end boundary.
//!
//! The notifier runs on whichever thread resolves the promise; when the value
//! is already there, `set_notifier` invokes it synchronously. A dismissed
//! future never delivers — neither notifier nor `get` see a value that
//! arrives after dismissal, and dismissal fans out to the batch's
//! [`DismissWatch`] through the dismiss notifier installed at creation.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tracing::warn;

/// Terminal failure of the resolving task itself (never a status-coded
/// outcome — those travel inside the value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFault {
    pub message: String,
}

impl ServiceFault {
    pub fn new(message: impl Into<String>) -> Self {
        ServiceFault {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

type ValueNotifier<T> = Box<dyn FnOnce(T) + Send>;
type FaultNotifier = Box<dyn FnOnce(ServiceFault) + Send>;
type DismissNotifier = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    value: Option<Result<T, ServiceFault>>,
    notifier: Option<ValueNotifier<T>>,
    exception_notifier: Option<FaultNotifier>,
    dismiss_notifier: Option<DismissNotifier>,
    dismissed: bool,
    delivered: bool,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            state: Mutex::new(Inner {
                value: None,
                notifier: None,
                exception_notifier: None,
                dismiss_notifier: None,
                dismissed: false,
                delivered: false,
                wakers: Vec::new(),
            }),
            ready: Condvar::new(),
        })
    }
}

pub struct ServicePromise<T> {
    shared: Arc<Shared<T>>,
}

pub struct ServiceFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ServicePromise<T> {
    pub fn pair() -> (ServicePromise<T>, ServiceFuture<T>) {
        let shared = Shared::new();
        (
            ServicePromise {
                shared: shared.clone(),
            },
            ServiceFuture { shared },
        )
    }

    pub fn is_dismissed(&self) -> bool {
        self.shared.state.lock().unwrap().dismissed
    }

    pub fn set_value(&self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn set_fault(&self, fault: ServiceFault) {
        self.resolve(Err(fault));
    }

    fn resolve(&self, outcome: Result<T, ServiceFault>) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed || state.delivered || state.value.is_some() {
            // Late answers for a dismissed (or already resolved) future are
            // dropped; cancellation is not an error.
            return;
        }
        match outcome {
            Ok(value) => {
                if let Some(notifier) = state.notifier.take() {
                    state.delivered = true;
                    drop(state);
                    notifier(value);
                    return;
                }
                state.value = Some(Ok(value));
            }
            Err(fault) => {
                if let Some(notifier) = state.exception_notifier.take() {
                    state.delivered = true;
                    drop(state);
                    notifier(fault);
                    return;
                }
                state.value = Some(Err(fault));
            }
        }
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Drop for ServicePromise<T> {
    /// A promise dropped before resolution faults its future, so a consumer
    /// is never left waiting on a resolver that died.
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed || state.delivered || state.value.is_some() {
            return;
        }
        let fault = ServiceFault::new("promise dropped before resolution");
        if let Some(notifier) = state.exception_notifier.take() {
            state.delivered = true;
            drop(state);
            notifier(fault);
            return;
        }
        state.value = Some(Err(fault));
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> ServiceFuture<T> {
    /// Install the single value notifier. Runs synchronously when the value
    /// is already available.
    pub fn set_notifier(&self, notifier: impl FnOnce(T) + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed {
            return;
        }
        if state.notifier.is_some() {
            warn!("value notifier installed twice, keeping the first");
            return;
        }
        match state.value.take() {
            Some(Ok(value)) => {
                state.delivered = true;
                drop(state);
                notifier(value);
            }
            Some(err @ Err(_)) => {
                state.value = Some(err);
                state.notifier = Some(Box::new(notifier));
            }
            None => {
                state.notifier = Some(Box::new(notifier));
            }
        }
    }

    pub fn set_exception_notifier(&self, notifier: impl FnOnce(ServiceFault) + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed {
            return;
        }
        match state.value.take() {
            Some(Err(fault)) => {
                state.delivered = true;
                drop(state);
                notifier(fault);
            }
            Some(ok @ Ok(_)) => {
                state.value = Some(ok);
                state.exception_notifier = Some(Box::new(notifier));
            }
            None => {
                state.exception_notifier = Some(Box::new(notifier));
            }
        }
    }

    /// Installed at chain creation; fires exactly once when the future is
    /// dismissed and carries the cancellation downstream.
    pub fn on_dismiss(&self, notifier: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed {
            drop(state);
            notifier();
            return;
        }
        state.dismiss_notifier = Some(Box::new(notifier));
    }

    /// Give up on the result. The value notifier will never run; any answer
    /// that arrives later is discarded.
    pub fn dismiss(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.dismissed {
            return;
        }
        state.dismissed = true;
        state.value = None;
        state.notifier = None;
        state.exception_notifier = None;
        let dismiss_notifier = state.dismiss_notifier.take();
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);
        if let Some(notifier) = dismiss_notifier {
            notifier();
        }
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_dismissed(&self) -> bool {
        self.shared.state.lock().unwrap().dismissed
    }

    /// Non-blocking probe; consumes the value when present.
    pub fn try_get(&self) -> Option<Result<T, ServiceFault>> {
        let mut state = self.shared.state.lock().unwrap();
        let value = state.value.take();
        if value.is_some() {
            state.delivered = true;
        }
        value
    }

    /// Blocking convenience helper. Returns `None` on timeout or dismissal.
    /// Must not be called from a runtime worker thread.
    pub fn get(&self, timeout: Duration) -> Option<Result<T, ServiceFault>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(value) = state.value.take() {
                state.delivered = true;
                return Some(value);
            }
            if state.dismissed {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, timed_out) = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
            if timed_out.timed_out() && state.value.is_none() {
                return None;
            }
        }
    }

    /// Forward this future's outcome into another promise (chain
    /// composition).
    pub fn forward_to(&self, promise: ServicePromise<T>) {
        let fault_target = ServicePromise {
            shared: promise.shared.clone(),
        };
        self.set_notifier(move |value| promise.set_value(value));
        self.set_exception_notifier(move |fault| fault_target.set_fault(fault));
    }
}

/// An already-resolved future.
pub fn resolved_future<T: Send + 'static>(value: T) -> ServiceFuture<T> {
    let (promise, future) = ServicePromise::pair();
    promise.set_value(value);
    future
}

/// `await` support: resolves with `None` when the future was dismissed.
pub struct ServiceFutureAwait<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future for ServiceFutureAwait<T> {
    type Output = Option<Result<T, ServiceFault>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(value) = state.value.take() {
            state.delivered = true;
            return Poll::Ready(Some(value));
        }
        if state.dismissed {
            return Poll::Ready(None);
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: Send + 'static> IntoFuture for ServiceFuture<T> {
    type Output = Option<Result<T, ServiceFault>>;
    type IntoFuture = ServiceFutureAwait<T>;

    fn into_future(self) -> Self::IntoFuture {
        ServiceFutureAwait {
            shared: self.shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn notifier_runs_on_resolution() {
        let (promise, future) = ServicePromise::<u32>::pair();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.set_notifier(move |v| *sink.lock().unwrap() = Some(v));
        promise.set_value(7);
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn notifier_runs_synchronously_when_already_resolved() {
        let (promise, future) = ServicePromise::<u32>::pair();
        promise.set_value(7);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.set_notifier(move |v| *sink.lock().unwrap() = Some(v));
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn dismissed_future_never_notifies() {
        let (promise, future) = ServicePromise::<u32>::pair();
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        future.set_notifier(move |_| flag.store(true, Ordering::SeqCst));
        future.dismiss();
        promise.set_value(7);
        assert!(!called.load(Ordering::SeqCst));
        assert!(future.try_get().is_none());
    }

    #[test]
    fn dismiss_notifier_propagates() {
        let (_promise, future) = ServicePromise::<u32>::pair();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        future.on_dismiss(move || flag.store(true, Ordering::SeqCst));
        future.dismiss();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn get_times_out_without_value() {
        let (_promise, future) = ServicePromise::<u32>::pair();
        assert!(future.get(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn get_returns_resolved_value() {
        let (promise, future) = ServicePromise::<u32>::pair();
        let writer = std::thread::spawn(move || promise.set_value(9));
        let value = future.get(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(value, 9);
        writer.join().unwrap();
    }

    #[test]
    fn forwarding_chains_promises() {
        let (inner_promise, inner_future) = ServicePromise::<u32>::pair();
        let (outer_promise, outer_future) = ServicePromise::<u32>::pair();
        inner_future.forward_to(outer_promise);
        inner_promise.set_value(3);
        assert_eq!(outer_future.try_get().unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn awaiting_resolves() {
        let (promise, future) = ServicePromise::<u32>::pair();
        tokio::spawn(async move { promise.set_value(11) });
        let value = future.await.unwrap().unwrap();
        assert_eq!(value, 11);
    }

    #[test]
    fn fault_reaches_exception_notifier() {
        let (promise, future) = ServicePromise::<u32>::pair();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        future.set_exception_notifier(move |f| *sink.lock().unwrap() = Some(f.message));
        promise.set_fault(ServiceFault::new("boom"));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("boom"));
    }
}
