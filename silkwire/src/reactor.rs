//! Reactor: the executor triad behind every session
//!
//! One dedicated multi-thread runtime carries three capabilities: `submit`
//! for pool work, `schedule` for delayed one-shots (ping deadlines, the
//! close grace timer), and `spawn_driver` for the per-connection read/write
//! loops. The factory owns the [`Reactor`]; sessions hold cloned
//! [`ReactorHandle`]s. `destroy` is idempotent: it force-closes every live
//! session (each delivers its close callback exactly once) and then shuts
//! the runtime down in the background, so no user work runs after it
//! returns.

use crate::session::SessionInner;
use silkwire_core::log;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{AbortHandle, JoinHandle};

const TAG: &str = "reactor";

pub(crate) struct Reactor {
    runtime: Mutex<Option<Runtime>>,
    shared: ReactorHandle,
}

impl Reactor {
    pub(crate) fn new() -> silkwire_core::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_io()
            .enable_time()
            .thread_name("silkwire-reactor")
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            shared: ReactorHandle {
                inner: Arc::new(ReactorInner {
                    handle,
                    alive: AtomicBool::new(true),
                    sessions: Mutex::new(Vec::new()),
                }),
            },
        })
    }

    pub(crate) fn handle(&self) -> ReactorHandle {
        self.shared.clone()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Idempotent teardown: close every registered session, then release
    /// the runtime without blocking.
    pub(crate) fn destroy(&self) {
        if self.shared.inner.alive.swap(false, Ordering::SeqCst) {
            log::debug(TAG, "destroy");
            let sessions = {
                let mut guard = self
                    .shared
                    .inner
                    .sessions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            for weak in sessions {
                if let Some(session) = weak.upgrade() {
                    session.close_now();
                }
            }
        }
        let runtime = {
            let mut guard = self
                .runtime
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Cloneable handle to the reactor, carried by sessions.
#[derive(Clone)]
pub(crate) struct ReactorHandle {
    inner: Arc<ReactorInner>,
}

struct ReactorInner {
    handle: Handle,
    alive: AtomicBool,
    sessions: Mutex<Vec<Weak<SessionInner>>>,
}

impl ReactorHandle {
    pub(crate) fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// Run a task on the pool. Silently dropped once the reactor is
    /// shutting down.
    pub(crate) fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_alive() {
            log::debug(TAG, "submit after destroy dropped");
            return;
        }
        self.inner.handle.spawn(task);
    }

    /// Spawn a connection driver task, returning its join handle.
    pub(crate) fn spawn_driver<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(task)
    }

    /// Run `task` once after `delay` on the timer. Returns `None` when the
    /// reactor is already destroyed.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F) -> Option<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_alive() {
            return None;
        }
        let join = self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Some(ScheduledTask {
            handle: join.abort_handle(),
        })
    }

    /// Track a session for teardown at destroy time.
    pub(crate) fn register(&self, session: &Arc<SessionInner>) {
        let mut guard = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.retain(|weak| weak.strong_count() > 0);
        guard.push(Arc::downgrade(session));
    }
}

/// A pending timer task; cancelling aborts the sleep.
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}
