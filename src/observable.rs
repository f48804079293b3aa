//! Observable software mirrors.
//!
//! An [`Observable`] is the software-side copy of one hardware parameter. It
//! uses `tokio::sync::watch` internally, so any number of subscribers (display,
//! logging, remote clients) see every reconciled value without polling.
//!
//! # Example
//!
//! ```
//! use frelon_sync::observable::Observable;
//!
//! let latency = Observable::new("latency_time", 0.0_f64).with_units("s");
//! let rx = latency.subscribe();
//!
//! latency.set(0.25)?;
//! assert_eq!(*rx.borrow(), 0.25);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Validator callback type.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Descriptive metadata of a mirrored parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Parameter name, unique within one detector
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Physical units (e.g. "s")
    pub units: Option<String>,
}

/// Metadata and validator, shared by all clones of one observable.
///
/// `parking_lot::RwLock` keeps `get()`/`metadata()` synchronous.
struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

/// A thread-safe value with change notifications.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    description: None,
                    units: None,
                },
                validator: None,
            })),
        }
    }

    /// Add a description to this observable.
    #[must_use]
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Add units to this observable.
    #[must_use]
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Add a custom validator function.
    #[must_use]
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the parameter name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without setting it.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if let Some(validator) = &guard.validator {
            validator(value)?;
        }
        Ok(())
    }

    /// Set a new value, notifying all subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialOrd + std::fmt::Debug + 'static,
{
    /// Reject values outside `[min, max]`.
    #[must_use]
    pub fn with_range(self, min: T, max: T) -> Self {
        self.with_validator(move |value| {
            if *value < min || *value > max {
                return Err(anyhow!(
                    "Value {:?} out of range [{:?}, {:?}]",
                    value,
                    min,
                    max
                ));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_basic() {
        let obs = Observable::new("test", 42);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.name(), "test");

        obs.set(100).unwrap();
        assert_eq!(obs.get(), 100);
    }

    #[test]
    fn test_observable_with_metadata() {
        let obs = Observable::new("shutter_close_time", 0.0)
            .with_units("s")
            .with_description("Shutter close time");

        let meta = obs.metadata();
        assert_eq!(meta.units.as_deref(), Some("s"));
        assert_eq!(meta.description.as_deref(), Some("Shutter close time"));
    }

    #[test]
    fn test_observable_range_validation() {
        let obs = Observable::new("latency_time", 0.0).with_range(0.0, 10.0);
        assert!(obs.set(-1.0).is_err());
        assert_eq!(obs.get(), 0.0);
        assert!(obs.set(2.5).is_ok());
    }

    #[tokio::test]
    async fn test_observable_subscription() {
        let obs = Observable::new("value", 0);
        let mut rx = obs.subscribe();
        assert_eq!(obs.subscriber_count(), 1);
        assert_eq!(*rx.borrow(), 0);

        obs.set(42).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 42);
    }

    #[test]
    fn test_clones_share_value_and_metadata() {
        let a = Observable::new("shared", 1).with_units("ms");
        let b = a.clone();
        a.set(7).unwrap();
        assert_eq!(b.get(), 7);
        assert_eq!(b.metadata().units.as_deref(), Some("ms"));
    }
}
