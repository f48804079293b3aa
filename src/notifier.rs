//! Change notification registry for geometry events.
//!
//! A [`ChangeNotifier`] is the registration point a geometry-owning subsystem
//! exposes for binning or ROI changes:
//! - Observers register a callback and receive a [`SubscriptionId`]
//! - `notify()` delivers each event exactly once to every registered observer
//! - Observers are removed with the id they were registered under
//!
//! # Reentrancy
//!
//! `notify()` snapshots the observer list under the read lock and releases the
//! lock before invoking any callback. A callback may therefore register or
//! unregister observers (including itself) without deadlocking; such changes
//! take effect from the next event on.
//!
//! # Example
//!
//! ```
//! use frelon_sync::geometry::Bin;
//! use frelon_sync::notifier::ChangeNotifier;
//! use std::sync::Arc;
//!
//! let notifier = ChangeNotifier::<Bin>::new("bin");
//! let id = notifier.register(Arc::new(|bin: &Bin| {
//!     println!("binning is now {bin}");
//!     Ok(())
//! }));
//! notifier.notify(&Bin::IDENTITY)?;
//! assert!(notifier.unregister(id));
//! # Ok::<(), anyhow::Error>(())
//! ```

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer callback. Errors are propagated to whoever fired the event.
pub type ChangeCallback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned when registering an observer, used for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Get the internal ID (for debugging/logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Registry of change observers for one kind of event.
///
/// Uses `parking_lot::RwLock`: registration takes the write lock (rare),
/// delivery only holds the read lock long enough to clone the observer list.
pub struct ChangeNotifier<T> {
    name: &'static str,
    observers: RwLock<Vec<(u64, ChangeCallback<T>)>>,
    next_id: AtomicU64,
    events_delivered: AtomicU64,
}

impl<T> ChangeNotifier<T> {
    /// Create a new empty notifier. `name` only appears in log output.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events_delivered: AtomicU64::new(0),
        }
    }

    /// Register an observer and return a handle for unregistration.
    pub fn register(&self, callback: ChangeCallback<T>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(notifier = self.name, subscription = id, "Registering observer");
        self.observers.write().push((id, callback));
        SubscriptionId(id)
    }

    /// Unregister an observer by its handle.
    ///
    /// Returns `true` if the observer was found and removed, `false` otherwise.
    pub fn unregister(&self, handle: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let initial_len = observers.len();
        observers.retain(|(id, _)| *id != handle.0);
        let removed = observers.len() < initial_len;

        if removed {
            tracing::debug!(notifier = self.name, subscription = handle.0, "Unregistered observer");
        } else {
            tracing::warn!(
                notifier = self.name,
                subscription = handle.0,
                "Observer not found for unregistration"
            );
        }

        removed
    }

    /// Deliver `value` to every registered observer, in registration order.
    ///
    /// Stops at the first failing observer and returns its error.
    pub fn notify(&self, value: &T) -> anyhow::Result<()> {
        let snapshot: Vec<ChangeCallback<T>> = self
            .observers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            self.events_delivered.fetch_add(1, Ordering::Relaxed);
            callback(value)?;
        }
        Ok(())
    }

    /// Get the number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Total callback invocations since creation.
    #[must_use]
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("name", &self.name)
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}
