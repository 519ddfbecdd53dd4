//! Resource handle and the two-phase disposal protocol
//!
//! A [`NativeHandle`] owns one engine resource. Its lock guards the disposed
//! flag together with the proxy's own state, so "check disposed, then act"
//! is always atomic. Disposal flips the flag and runs local teardown under
//! the lock; the engine delete and token release happen afterwards, either
//! inline or on the release queue when the caller is an engine callback.
//!
//! Event delivery goes through [`NativeHandle::dispatch`], which holds a
//! reentrant delivery gate while handlers run. Disposal takes the same gate,
//! so once `dispose` returns no handler of the resource is running on another
//! thread and none will start.

use crate::callback_thread;
use crate::error::{check, RtcError, RtcResult};
use crate::registry::{self, Token};
use crate::release_queue;
use datachannel_engine::Engine;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, ReentrantMutex};
use std::ffi::c_int;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Connection,
    Channel,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Connection => write!(f, "peer connection"),
            ResourceKind::Channel => write!(f, "data channel"),
        }
    }
}

pub(crate) struct Guarded<S> {
    pub disposed: bool,
    pub state: S,
}

pub(crate) struct NativeHandle<S> {
    id: c_int,
    kind: ResourceKind,
    token: Token,
    engine: Arc<dyn Engine>,
    delivery: ReentrantMutex<()>,
    inner: Mutex<Guarded<S>>,
}

impl<S> NativeHandle<S> {
    pub fn new(id: c_int, kind: ResourceKind, token: Token, engine: Arc<dyn Engine>, state: S) -> Self {
        Self {
            id,
            kind,
            token,
            engine,
            delivery: ReentrantMutex::new(()),
            inner: Mutex::new(Guarded {
                disposed: false,
                state,
            }),
        }
    }

    pub fn id(&self) -> c_int {
        self.id
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub fn lock(&self) -> MutexGuard<'_, Guarded<S>> {
        self.inner.lock()
    }

    /// Locks the state, failing with [`RtcError::Disposed`] once disposed
    pub fn lock_live(&self) -> RtcResult<MappedMutexGuard<'_, S>> {
        let guard = self.inner.lock();
        if guard.disposed {
            return Err(RtcError::Disposed);
        }
        Ok(MutexGuard::map(guard, |guarded| &mut guarded.state))
    }

    /// Delivers one engine event. `pick` runs under the lock and is skipped
    /// once disposed; `emit` runs after the lock is released. Returns whether
    /// the event was delivered.
    pub fn dispatch<T>(&self, pick: impl FnOnce(&mut S) -> T, emit: impl FnOnce(T)) -> bool {
        let _delivering = self.delivery.lock();
        let picked = {
            let mut guard = self.inner.lock();
            if guard.disposed {
                return false;
            }
            pick(&mut guard.state)
        };
        emit(picked);
        true
    }

    /// First phase of disposal: waits for deliveries running on other
    /// threads, marks the handle disposed and runs `teardown` under the
    /// lock. Returns `None` if already disposed.
    pub fn begin_dispose<T>(&self, teardown: impl FnOnce(&mut S) -> T) -> Option<T> {
        let _delivering = self.delivery.lock();
        let mut guard = self.inner.lock();
        if guard.disposed {
            return None;
        }
        guard.disposed = true;
        Some(teardown(&mut guard.state))
    }

    /// Second phase of disposal: deletes the engine resource, then releases
    /// the token. Must be called without holding the lock.
    pub fn release(&self) {
        let job = ReleaseJob {
            id: self.id,
            kind: self.kind,
            token: self.token,
            engine: Arc::clone(&self.engine),
        };
        if callback_thread::is_callback_thread() {
            debug!(id = self.id, kind = %self.kind, "Deferring release from callback thread");
            release_queue::defer(move || job.run());
        } else {
            job.run();
        }
    }
}

struct ReleaseJob {
    id: c_int,
    kind: ResourceKind,
    token: Token,
    engine: Arc<dyn Engine>,
}

impl ReleaseJob {
    fn run(self) {
        let result = match self.kind {
            ResourceKind::Connection => self.engine.delete_peer_connection(self.id),
            ResourceKind::Channel => self.engine.delete_data_channel(self.id),
        };
        if let Err(e) = check(result) {
            warn!(id = self.id, kind = %self.kind, error = %e, "Failed to delete engine resource");
        }
        if let Err(e) = registry::release(self.token) {
            warn!(id = self.id, kind = %self.kind, error = %e, "Failed to release token");
        }
        debug!(id = self.id, kind = %self.kind, "Released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachannel_engine::{EngineConfiguration, LoopbackEngine};

    fn handle(engine: &Arc<LoopbackEngine>) -> NativeHandle<u32> {
        let id = engine.create_peer_connection(&EngineConfiguration::default());
        assert!(id > 0);
        let token = registry::reserve().unwrap();
        let engine: Arc<dyn Engine> = engine.clone();
        NativeHandle::new(id, ResourceKind::Connection, token, engine, 7)
    }

    #[test]
    fn test_lock_live_until_disposed() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = handle(&engine);
        assert_eq!(*handle.lock_live().unwrap(), 7);

        assert_eq!(handle.begin_dispose(|state| *state * 2), Some(14));
        assert!(handle.is_disposed());
        assert!(matches!(handle.lock_live(), Err(RtcError::Disposed)));
        assert_eq!(handle.begin_dispose(|_| ()), None);
        handle.release();
    }

    #[test]
    fn test_dispatch_stops_after_dispose() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = handle(&engine);
        let mut seen = Vec::new();
        assert!(handle.dispatch(|state| *state, |value| seen.push(value)));
        handle.begin_dispose(|_| ());
        assert!(!handle.dispatch(|state| *state, |value| seen.push(value)));
        assert_eq!(seen, vec![7]);
        handle.release();
    }

    #[test]
    fn test_dispose_inside_dispatch() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = handle(&engine);
        let delivered = handle.dispatch(
            |_| (),
            |()| {
                assert!(handle.begin_dispose(|_| ()).is_some());
            },
        );
        assert!(delivered);
        assert!(handle.is_disposed());
        handle.release();
    }

    #[test]
    fn test_dispose_waits_for_running_delivery() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = Arc::new(handle(&engine));
        let (entered_tx, entered_rx) = crossbeam::channel::bounded::<()>(0);
        let (finish_tx, finish_rx) = crossbeam::channel::bounded::<()>(0);
        let finished = Arc::new(Mutex::new(false));

        let worker = {
            let handle = handle.clone();
            let finished = finished.clone();
            std::thread::spawn(move || {
                handle.dispatch(
                    |_| (),
                    |()| {
                        entered_tx.send(()).unwrap();
                        finish_rx.recv().unwrap();
                        *finished.lock() = true;
                    },
                );
            })
        };

        entered_rx.recv().unwrap();
        let releaser = std::thread::spawn(move || finish_tx.send(()).unwrap());
        handle.begin_dispose(|_| ());
        assert!(*finished.lock());

        releaser.join().unwrap();
        worker.join().unwrap();
        handle.release();
    }

    #[test]
    fn test_release_from_caller_thread_is_synchronous() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = handle(&engine);
        let id = handle.id();
        handle.begin_dispose(|_| ());
        handle.release();
        assert!(!engine.contains(id));
        assert!(matches!(
            registry::resolve_connection(handle.token),
            Err(RtcError::StaleToken)
        ));
    }

    #[test]
    fn test_release_from_callback_thread_is_deferred() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let handle = handle(&engine);
        let id = handle.id();

        // hold the worker so the deferred job cannot run yet
        let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(0);
        release_queue::defer(move || {
            let _ = gate_rx.recv();
        });

        handle.begin_dispose(|_| ());
        {
            let _scope = callback_thread::enter();
            handle.release();
        }
        assert!(engine.contains(id));

        gate_tx.send(()).unwrap();
        release_queue::flush();
        assert!(!engine.contains(id));
    }
}
