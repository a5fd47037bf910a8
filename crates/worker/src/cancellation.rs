use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Cancelled;

type CleanupCallback = Box<dyn FnOnce() + Send>;
type Reason = Arc<Mutex<Option<String>>>;

struct Slot {
    token: CancellationToken,
    reason: Reason,
    cleanups: Vec<CleanupCallback>,
}

/// Tracks in-flight requests by id and lets an out-of-band cancellation
/// message (§4.5) signal the one handler running that request.
///
/// Mirrors the Python original's `CancellationManager`: a lock-guarded map
/// from request id to a signal, plus per-request cleanup callbacks that run
/// outside the lock so a callback can itself touch the manager (e.g. to
/// check `is_cancelled` on a different request) without deadlocking.
#[derive(Clone, Default)]
pub struct CancellationManager {
    slots: Arc<Mutex<HashMap<u64, Slot>>>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new in-flight request and returns its [`CancelSignal`].
    /// Replaces any stale slot left behind for the same id (ids are recycled
    /// by the host, not by this worker).
    pub fn register(&self, request_id: u64) -> CancelSignal {
        let token = CancellationToken::new();
        let reason = Arc::new(Mutex::new(None));
        let mut slots = self.slots.lock().expect("cancellation map poisoned");
        slots.insert(
            request_id,
            Slot {
                token: token.clone(),
                reason: reason.clone(),
                cleanups: Vec::new(),
            },
        );
        CancelSignal {
            request_id,
            token,
            reason,
            manager: self.clone(),
        }
    }

    /// Removes the slot for `request_id` and runs any cleanup callbacks that
    /// were attached to it, outside the lock.
    pub fn unregister(&self, request_id: u64) {
        let slot = {
            let mut slots = self.slots.lock().expect("cancellation map poisoned");
            slots.remove(&request_id)
        };
        if let Some(slot) = slot {
            for cleanup in slot.cleanups {
                cleanup();
            }
        }
    }

    /// Signals cancellation for `request_id` with the given reason.
    /// Idempotent: cancelling a request twice, or a request that already
    /// finished (or never existed), logs a warning instead of erroring — an
    /// out-of-band cancellation can always race the reply it targets.
    pub fn cancel(&self, request_id: u64, reason: impl Into<String>) {
        let slots = self.slots.lock().expect("cancellation map poisoned");
        match slots.get(&request_id) {
            Some(slot) => {
                if slot.token.is_cancelled() {
                    warn!(request_id, "cancel requested for an already-cancelled request");
                    return;
                }
                *slot.reason.lock().expect("reason mutex poisoned") = Some(reason.into());
                slot.token.cancel();
            }
            None => warn!(request_id, "cancel requested for unknown or completed request"),
        }
    }

    pub fn is_cancelled(&self, request_id: u64) -> bool {
        let slots = self.slots.lock().expect("cancellation map poisoned");
        slots
            .get(&request_id)
            .map(|slot| slot.token.is_cancelled())
            .unwrap_or(false)
    }

    /// Attaches a cleanup callback to a still-registered request. Silently
    /// drops the callback if the request already finished — there is
    /// nothing left to clean up for.
    pub fn add_cleanup(&self, request_id: u64, cleanup: impl FnOnce() + Send + 'static) {
        let mut slots = self.slots.lock().expect("cancellation map poisoned");
        if let Some(slot) = slots.get_mut(&request_id) {
            slot.cleanups.push(Box::new(cleanup));
        }
    }

    /// Cancels every still-registered request with reason "connection
    /// closed", used when a connection drops mid-flight so in-progress
    /// handlers get a chance to unwind instead of running to completion
    /// against a reply channel nobody will read.
    pub fn cancel_all(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let slots = self.slots.lock().expect("cancellation map poisoned");
        for slot in slots.values() {
            if !slot.token.is_cancelled() {
                *slot.reason.lock().expect("reason mutex poisoned") = Some(reason.clone());
                slot.token.cancel();
            }
        }
    }

    /// Scopes a request's lifetime to the returned guard: registers on
    /// entry, unregisters (running cleanups) on drop, regardless of how the
    /// caller's future completes.
    pub fn track(&self, request_id: u64) -> TrackedRequest {
        let signal = self.register(request_id);
        TrackedRequest {
            manager: self.clone(),
            request_id,
            signal,
        }
    }
}

/// The signal a handler observes to learn it has been cancelled. Cheaply
/// cloneable; cloning shares the same underlying flag and reason.
#[derive(Clone)]
pub struct CancelSignal {
    request_id: u64,
    token: CancellationToken,
    reason: Reason,
    manager: CancellationManager,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is signalled. Useful in `tokio::select!`
    /// alongside the handler's own work.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns `Err(Cancelled)` carrying the reason supplied by the
    /// cancelling message, if cancellation has been signalled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            let reason = self
                .reason
                .lock()
                .expect("reason mutex poisoned")
                .clone()
                .unwrap_or_else(|| "cancellation requested".to_string());
            Err(Cancelled::new(self.request_id, reason))
        } else {
            Ok(())
        }
    }

    /// Registers a cleanup callback for this request, run once dispatch
    /// unregisters it (handler returned, normally or otherwise) — see
    /// [`CancellationManager::add_cleanup`].
    pub fn add_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        self.manager.add_cleanup(self.request_id, cleanup);
    }
}

/// RAII guard returned by [`CancellationManager::track`]. Exposes the
/// request's [`CancelSignal`] for the duration of the guard's lifetime.
pub struct TrackedRequest {
    manager: CancellationManager,
    request_id: u64,
    signal: CancelSignal,
}

impl TrackedRequest {
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }
}

impl Drop for TrackedRequest {
    fn drop(&mut self) {
        self.manager.unregister(self.request_id);
    }
}

/// Helper for CPU-bound or tight-loop handlers that want to check for
/// cancellation periodically rather than on every iteration, mirroring the
/// Python original's `CancellableOperation(check_interval=...)`.
pub struct CancellableOperation {
    signal: CancelSignal,
    check_interval: u64,
    iterations: u64,
}

impl CancellableOperation {
    pub fn new(signal: CancelSignal, check_interval: u64) -> Self {
        Self {
            signal,
            check_interval: check_interval.max(1),
            iterations: 0,
        }
    }

    /// Call once per loop iteration. Returns `Err(Cancelled)` roughly every
    /// `check_interval` calls if cancellation has been signalled, and always
    /// on the first call following it.
    pub fn check(&mut self) -> Result<(), Cancelled> {
        self.iterations += 1;
        if self.iterations % self.check_interval == 0 {
            self.signal.check()
        } else {
            Ok(())
        }
    }

    /// Final check, intended for a clean loop exit rather than a periodic
    /// one — always evaluates the signal regardless of the interval.
    pub fn finish(&self) -> Result<(), Cancelled> {
        self.signal.check()
    }
}
