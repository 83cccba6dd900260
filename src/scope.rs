//! Host-side task scope and stop signal
//!
//! Capabilities spawn their native async work (timers, bridge calls) through
//! the engine's `TaskScope`. Cancelling the scope aborts that work; the
//! `StopSignal` is what the pump loop and the runtime interrupt hook observe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/* ===================== Stop Signal ===================== */

/// Cancellation flag shared between the engine, its handles and the runtime
/// interrupt hook
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns true only for the first request.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_one();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested
    pub async fn requested(&self) {
        loop {
            if self.is_requested() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Re-arm the signal once an execution has finished
    pub(crate) fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/* ===================== Task Scope ===================== */

/// The engine's own scope for native asynchronous work
pub struct TaskScope {
    handle: Handle,
    owned: Mutex<Option<Runtime>>,
    token: Mutex<CancellationToken>,
    closed: AtomicBool,
}

impl TaskScope {
    /// Build a scope on the given runtime handle, the current runtime, or a
    /// small owned runtime when the caller is not inside one
    pub fn new(handle: Option<Handle>) -> std::io::Result<Self> {
        let (handle, owned) = match handle.or_else(|| Handle::try_current().ok()) {
            Some(handle) => (handle, None),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("jsembed-scope")
                    .enable_all()
                    .build()?;
                (runtime.handle().clone(), Some(runtime))
            }
        };

        Ok(Self {
            handle,
            owned: Mutex::new(owned),
            token: Mutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn work that is aborted when the scope is cancelled.
    ///
    /// Returns `None` once the scope has been closed; the future is dropped.
    pub fn spawn<F>(&self, future: F) -> Option<AbortHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Task scope is closed, dropping spawned work");
            return None;
        }

        let token = lock(&self.token).clone();
        let task = self.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });
        Some(task.abort_handle())
    }

    pub fn cancel(&self) {
        lock(&self.token).cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.token).is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Replace a cancelled token so the next execution can schedule work again
    pub(crate) fn renew(&self) {
        if self.is_closed() {
            return;
        }
        let mut token = lock(&self.token);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Cancel outstanding work and refuse new work
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel();
        if let Some(runtime) = lock(&self.owned).take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_stop_request_is_idempotent() {
        let signal = StopSignal::new();
        assert!(signal.request());
        assert!(!signal.request());
        assert!(signal.is_requested());

        signal.clear();
        assert!(!signal.is_requested());
        assert!(signal.request());
    }

    #[tokio::test]
    async fn test_requested_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.requested().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        signal.request();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_aborts_spawned_work_and_renew_rearms() {
        let scope = TaskScope::new(None).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        {
            let ran = ran.clone();
            scope.spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        scope.cancel();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        scope.renew();
        assert!(!scope.is_cancelled());
        {
            let ran = ran.clone();
            scope.spawn(async move {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_scope_refuses_work() {
        let scope = TaskScope::new(None).unwrap();
        scope.close();
        assert!(scope.spawn(async {}).is_none());
        scope.renew();
        assert!(scope.is_cancelled());
    }
}
