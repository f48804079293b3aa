//! Geometry dependency tracking for the correction stage.
//!
//! A [`CorrectionBinding`] subscribes to the binning and ROI notifiers of the
//! detector interface and pushes every change into its correction stage.
//!
//! # Ownership
//!
//! ```text
//! manager ──owns──▶ CorrectionBinding ──owns──▶ BindingTarget ──owns──▶ stage
//!                          │                         ▲
//!                          │ weak                    │ weak
//!                          ▼                         │
//!                  Bin/Roi notifiers ──own──▶ callback adapters
//! ```
//!
//! The notifiers own the callback adapters, and the adapters only hold a
//! `Weak` to the binding target. Nothing in the notifier keeps the binding
//! alive, and an event that reaches an adapter after the binding is gone is
//! discarded. Each adapter upgrades its `Weak` once and works on that strong
//! reference for the whole event, so teardown on another thread cannot free
//! the target half-way through.

use crate::error::{SyncError, SyncResult};
use crate::geometry::{Bin, Roi};
use crate::hardware::{BinControl, CorrectionStage, DetectorInfo, RoiControl};
use crate::notifier::{ChangeCallback, SubscriptionId};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// State shared between the binding and its callback adapters.
struct BindingTarget {
    stage: Arc<dyn CorrectionStage>,
    det_info: Weak<dyn DetectorInfo>,
    last_seen_bin: Mutex<Bin>,
}

impl BindingTarget {
    fn hw_bin_changed(&self, hw_bin: Bin) -> anyhow::Result<()> {
        debug!(%hw_bin, "hw bin changed");
        let mut last_seen_bin = self.last_seen_bin.lock();
        *last_seen_bin = hw_bin;
        self.stage.set_hw_bin(hw_bin)
    }

    fn hw_roi_changed(&self, hw_roi: Roi) -> anyhow::Result<()> {
        debug!(%hw_roi, "hw roi changed");
        let last_seen_bin = self.last_seen_bin.lock();
        let hw_roi = if hw_roi.is_empty() {
            trace!("Empty Roi, getting max image size");
            let Some(det_info) = self.det_info.upgrade() else {
                trace!("Detector interface gone, discarding roi event");
                return Ok(());
            };
            let max_size = det_info.max_image_size()?;
            let resolved = Roi::full(max_size).binned(*last_seen_bin);
            trace!(%resolved, "Resolved full frame roi");
            resolved
        } else {
            hw_roi
        };
        self.stage.set_hw_roi(hw_roi)
    }
}

fn bin_adapter(target: Weak<BindingTarget>) -> ChangeCallback<Bin> {
    Arc::new(move |hw_bin: &Bin| match target.upgrade() {
        Some(target) => target.hw_bin_changed(*hw_bin),
        None => {
            trace!(%hw_bin, "Binding gone, discarding bin event");
            Ok(())
        }
    })
}

fn roi_adapter(target: Weak<BindingTarget>) -> ChangeCallback<Roi> {
    Arc::new(move |hw_roi: &Roi| match target.upgrade() {
        Some(target) => target.hw_roi_changed(*hw_roi),
        None => {
            trace!(%hw_roi, "Binding gone, discarding roi event");
            Ok(())
        }
    })
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    bin: SubscriptionId,
    roi: SubscriptionId,
}

/// Keeps a correction stage's geometry in sync with the hardware binning and ROI.
pub struct CorrectionBinding {
    target: Arc<BindingTarget>,
    bin_ctrl: Weak<dyn BinControl>,
    roi_ctrl: Weak<dyn RoiControl>,
    registration: Mutex<Option<Registration>>,
}

impl CorrectionBinding {
    /// Bind `stage` to the geometry of a detector interface.
    ///
    /// Only weak handles to the facets are kept. No subscription is made until
    /// [`set_registration_active`](Self::set_registration_active) is called.
    pub fn new(
        stage: Arc<dyn CorrectionStage>,
        det_info: &Arc<dyn DetectorInfo>,
        bin_ctrl: &Arc<dyn BinControl>,
        roi_ctrl: &Arc<dyn RoiControl>,
    ) -> Self {
        Self {
            target: Arc::new(BindingTarget {
                stage,
                det_info: Arc::downgrade(det_info),
                last_seen_bin: Mutex::new(Bin::IDENTITY),
            }),
            bin_ctrl: Arc::downgrade(bin_ctrl),
            roi_ctrl: Arc::downgrade(roi_ctrl),
            registration: Mutex::new(None),
        }
    }

    /// Subscribe to (`true`) or unsubscribe from (`false`) both notifiers.
    ///
    /// Idempotent in both directions. On activation the stage is primed with
    /// the current binning, then the current ROI, so it never starts from
    /// stale geometry.
    pub fn set_registration_active(&self, active: bool) -> SyncResult<()> {
        let mut registration = self.registration.lock();
        match (active, *registration) {
            (true, None) => {
                *registration = Some(self.register()?);
                drop(registration);
                self.prime()
            }
            (false, Some(reg)) => {
                *registration = None;
                self.unregister(reg)
            }
            _ => Ok(()),
        }
    }

    /// True while both subscriptions are held.
    #[must_use]
    pub fn is_registration_active(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Binning of the most recent bin event (identity before any).
    #[must_use]
    pub fn last_seen_bin(&self) -> Bin {
        *self.target.last_seen_bin.lock()
    }

    fn controls(&self) -> SyncResult<(Arc<dyn BinControl>, Arc<dyn RoiControl>)> {
        match (self.bin_ctrl.upgrade(), self.roi_ctrl.upgrade()) {
            (Some(bin), Some(roi)) => Ok((bin, roi)),
            _ => Err(SyncError::Hardware(anyhow!("detector interface is gone"))),
        }
    }

    fn register(&self) -> SyncResult<Registration> {
        let (bin_ctrl, roi_ctrl) = self.controls()?;
        let weak = Arc::downgrade(&self.target);

        let bin = bin_ctrl.register_bin_changed(bin_adapter(weak.clone()))?;
        let roi = match roi_ctrl.register_roi_changed(roi_adapter(weak)) {
            Ok(roi) => roi,
            Err(err) => {
                // Roll back so a failed activation leaves no half subscription
                if let Err(undo) = bin_ctrl.unregister_bin_changed(bin) {
                    warn!(error = %undo, "Failed to roll back bin subscription");
                }
                return Err(err.into());
            }
        };
        debug!(bin = bin.id(), roi = roi.id(), "Registered geometry callbacks");
        Ok(Registration { bin, roi })
    }

    fn unregister(&self, reg: Registration) -> SyncResult<()> {
        // Subscriptions die with the interface
        let (Some(bin_ctrl), Some(roi_ctrl)) = (self.bin_ctrl.upgrade(), self.roi_ctrl.upgrade())
        else {
            trace!("Detector interface gone, nothing to unregister");
            return Ok(());
        };
        let bin_result = bin_ctrl.unregister_bin_changed(reg.bin);
        let roi_result = roi_ctrl.unregister_roi_changed(reg.roi);
        debug!(bin = reg.bin.id(), roi = reg.roi.id(), "Unregistered geometry callbacks");
        bin_result?;
        roi_result?;
        Ok(())
    }

    fn prime(&self) -> SyncResult<()> {
        let (bin_ctrl, roi_ctrl) = self.controls()?;
        self.target.hw_bin_changed(bin_ctrl.bin()?)?;
        self.target.hw_roi_changed(roi_ctrl.roi()?)?;
        Ok(())
    }
}

impl Drop for CorrectionBinding {
    fn drop(&mut self) {
        if let Err(err) = self.set_registration_active(false) {
            warn!(error = %err, "Failed to unregister correction binding");
        }
    }
}

impl std::fmt::Debug for CorrectionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionBinding")
            .field("registered", &self.is_registration_active())
            .field("last_seen_bin", &self.last_seen_bin())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::test_support::{FakeGeometry, RecordingStage, StageCall};
    use crate::geometry::Size;

    fn binding_over(
        geometry: &Arc<FakeGeometry>,
        stage: &Arc<RecordingStage>,
    ) -> CorrectionBinding {
        let det_info: Arc<dyn DetectorInfo> = geometry.clone();
        let bin_ctrl: Arc<dyn BinControl> = geometry.clone();
        let roi_ctrl: Arc<dyn RoiControl> = geometry.clone();
        CorrectionBinding::new(stage.clone(), &det_info, &bin_ctrl, &roi_ctrl)
    }

    #[test]
    fn test_activation_is_idempotent() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);

        binding.set_registration_active(true).unwrap();
        binding.set_registration_active(true).unwrap();

        assert!(binding.is_registration_active());
        assert_eq!(geometry.bin_observers(), 1);
        assert_eq!(geometry.roi_observers(), 1);
    }

    #[test]
    fn test_deactivation_when_inactive_is_noop() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);

        binding.set_registration_active(false).unwrap();
        assert!(!binding.is_registration_active());
        assert_eq!(geometry.unregister_calls(), 0);
    }

    #[test]
    fn test_activation_primes_bin_then_roi() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        geometry.set_geometry(Bin::new(2, 2).unwrap(), Roi::empty());
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);

        binding.set_registration_active(true).unwrap();

        assert_eq!(
            stage.calls(),
            vec![
                StageCall::Bin(Bin::new(2, 2).unwrap()),
                StageCall::Roi(Roi::new(0, 0, 512, 512)),
            ]
        );
    }

    #[test]
    fn test_empty_roi_resolves_to_binned_full_frame() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();
        stage.clear();

        geometry.fire_bin(Bin::new(2, 2).unwrap()).unwrap();
        geometry.fire_roi(Roi::empty()).unwrap();

        assert_eq!(binding.last_seen_bin(), Bin::new(2, 2).unwrap());
        assert_eq!(
            stage.calls(),
            vec![
                StageCall::Bin(Bin::new(2, 2).unwrap()),
                StageCall::Roi(Roi::new(0, 0, 512, 512)),
            ]
        );
    }

    #[test]
    fn test_explicit_roi_forwarded_unchanged() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();
        stage.clear();

        geometry.fire_roi(Roi::new(8, 16, 100, 50)).unwrap();
        assert_eq!(stage.calls(), vec![StageCall::Roi(Roi::new(8, 16, 100, 50))]);
    }

    #[test]
    fn test_drop_unregisters() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();

        drop(binding);
        assert_eq!(geometry.bin_observers(), 0);
        assert_eq!(geometry.roi_observers(), 0);
    }

    #[test]
    fn test_event_after_binding_destroyed_is_discarded() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();
        let (bin_cb, roi_cb) = geometry.retained_callbacks();
        stage.clear();

        drop(binding);

        // Callbacks captured before teardown, delivered after it
        assert!(bin_cb(&Bin::new(4, 4).unwrap()).is_ok());
        assert!(roi_cb(&Roi::empty()).is_ok());
        assert!(stage.calls().is_empty());
    }

    #[test]
    fn test_roi_event_after_interface_gone_is_discarded() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();
        let (_, roi_cb) = geometry.retained_callbacks();
        stage.clear();

        drop(geometry);

        assert!(roi_cb(&Roi::empty()).is_ok());
        assert!(stage.calls().is_empty());
        // Unregistering against a dead interface is fine too
        binding.set_registration_active(false).unwrap();
    }

    #[test]
    fn test_stage_error_propagates_to_event_source() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);
        binding.set_registration_active(true).unwrap();

        stage.fail_next("stage rejected roi");
        let err = geometry.fire_roi(Roi::new(0, 0, 10, 10)).unwrap_err();
        assert_eq!(err.to_string(), "stage rejected roi");
    }

    #[test]
    fn test_failed_roi_registration_rolls_back_bin() {
        let geometry = FakeGeometry::new(Size::new(1024, 1024));
        geometry.fail_roi_registration();
        let stage = RecordingStage::new();
        let binding = binding_over(&geometry, &stage);

        assert!(matches!(
            binding.set_registration_active(true),
            Err(SyncError::Hardware(_))
        ));
        assert!(!binding.is_registration_active());
        assert_eq!(geometry.bin_observers(), 0);
        assert_eq!(geometry.roi_observers(), 0);
    }
}
