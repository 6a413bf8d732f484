//! Live report subscriptions.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// How a subscription's snapshots are ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Server-side ordering by creation time, newest first.
    Ordered,
    /// Collection order as delivered by the store.
    Unordered,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Subscription whose callback is running on this thread, if any.
    static IN_CALLBACK: Cell<u64> = const { Cell::new(0) };
}

/// Marks this thread as running a subscription's callback; restores the
/// previous marker on drop, unwinding included.
struct CallbackMarker {
    previous: u64,
}

impl CallbackMarker {
    fn enter(id: u64) -> Self {
        Self {
            previous: IN_CALLBACK.with(|c| c.replace(id)),
        }
    }
}

impl Drop for CallbackMarker {
    fn drop(&mut self) {
        IN_CALLBACK.with(|c| c.set(self.previous));
    }
}

/// Serializes callback delivery against cancellation.
///
/// A delivery holds `gate` for the duration of the callback and checks
/// `active` first; `cancel` clears `active` and then takes `gate`, so once it
/// returns no callback is running or will start.
pub(crate) struct DeliveryGate {
    id: u64,
    active: AtomicBool,
    gate: Mutex<()>,
}

impl DeliveryGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
        })
    }

    /// Run `deliver` unless the subscription was cancelled.
    /// Returns `false` once cancelled.
    pub(crate) fn deliver<F: FnOnce()>(&self, deliver: F) -> bool {
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let _marker = CallbackMarker::enter(self.id);
        deliver();
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        // Cancelling from inside our own callback: the gate is already held by
        // this thread and the running delivery is the last one.
        if IN_CALLBACK.with(Cell::get) == self.id {
            return;
        }
        drop(self.gate.lock().unwrap_or_else(|e| e.into_inner()));
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Handle to a live report subscription.
///
/// The subscription runs until [`cancel`](Self::cancel) is called; dropping
/// the handle does not detach it.
pub struct SubscriptionHandle {
    mode: SubscriptionMode,
    gate: Arc<DeliveryGate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        mode: SubscriptionMode,
        gate: Arc<DeliveryGate>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            mode,
            gate,
            task: Mutex::new(task),
        }
    }

    /// Ordering the store is serving for this subscription.
    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// Whether callbacks may still be delivered.
    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    /// Detach the subscription. Once this returns the callback is not
    /// running and is never invoked again. Safe to call repeatedly, and from
    /// within the callback itself.
    pub fn cancel(&self) {
        self.gate.close();
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("mode", &self.mode)
            .field("active", &self.is_active())
            .finish()
    }
}
