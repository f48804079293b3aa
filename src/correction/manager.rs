//! Creation and destruction of the E2V correction stage.
//!
//! The manager holds the user intent (`active_flag`) and keeps
//! `stage present == active_flag && chip is corrigible` after every
//! successful [`check_correction`](CorrectionLifecycleManager::check_correction).
//! Transitions are refused while an acquisition is running.

use crate::correction::CorrectionBinding;
use crate::error::{SyncError, SyncResult};
use crate::hardware::{
    BinControl, CorrectionStage, DetectorInfo, ProcessingPipeline, RoiControl, StageFactory,
    StatusSource,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

struct ActiveCorrection {
    stage: Arc<dyn CorrectionStage>,
    binding: CorrectionBinding,
}

struct ManagerState {
    active_flag: bool,
    active: Option<ActiveCorrection>,
}

/// Owns the correction stage and its geometry binding.
pub struct CorrectionLifecycleManager {
    det_info: Arc<dyn DetectorInfo>,
    bin_ctrl: Arc<dyn BinControl>,
    roi_ctrl: Arc<dyn RoiControl>,
    status: Arc<dyn StatusSource>,
    pipeline: Arc<dyn ProcessingPipeline>,
    factory: StageFactory,
    state: Mutex<ManagerState>,
}

impl CorrectionLifecycleManager {
    /// Create a manager with the given initial intent. No stage is created
    /// until [`check_correction`](Self::check_correction) runs.
    pub fn new(
        det_info: Arc<dyn DetectorInfo>,
        bin_ctrl: Arc<dyn BinControl>,
        roi_ctrl: Arc<dyn RoiControl>,
        status: Arc<dyn StatusSource>,
        pipeline: Arc<dyn ProcessingPipeline>,
        factory: StageFactory,
        active_flag: bool,
    ) -> Self {
        Self {
            det_info,
            bin_ctrl,
            roi_ctrl,
            status,
            pipeline,
            factory,
            state: Mutex::new(ManagerState {
                active_flag,
                active: None,
            }),
        }
    }

    /// Record the user intent and re-evaluate.
    ///
    /// The intent is kept even if the re-evaluation fails, so a later
    /// [`check_correction`](Self::check_correction) picks it up.
    #[instrument(skip(self))]
    pub fn set_active(&self, active: bool) -> SyncResult<()> {
        let mut state = self.state.lock();
        debug!(active, "Setting e2v_corr_act");
        state.active_flag = active;
        self.check_locked(&mut state)
    }

    /// User intent, regardless of whether the chip supports the correction.
    #[must_use]
    pub fn is_active_flag(&self) -> bool {
        self.state.lock().active_flag
    }

    /// True while a correction stage exists.
    #[must_use]
    pub fn has_stage(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Current correction stage, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Arc<dyn CorrectionStage>> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.stage))
    }

    /// Bring the stage in line with intent and hardware model.
    ///
    /// A no-op when nothing has to change. Fails with
    /// [`SyncError::AcquisitionInProgress`] when a transition is needed during
    /// an acquisition; facet errors are returned unchanged. A failed
    /// transition leaves the previous state in place.
    #[instrument(skip(self))]
    pub fn check_correction(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        self.check_locked(&mut state)
    }

    fn check_locked(&self, state: &mut ManagerState) -> SyncResult<()> {
        trace!("Checking E2V correction");
        let chip = self.det_info.chip_type()?;
        let is_e2v = chip.is_corrigible();
        let wanted = is_e2v && state.active_flag;
        debug!(is_e2v, active_flag = state.active_flag, "Correction state");

        if wanted == state.active.is_some() {
            return Ok(());
        }

        if self.status.status()?.is_running() {
            return Err(SyncError::AcquisitionInProgress);
        }

        if wanted {
            info!("Enabling E2V correction");
            state.active = Some(self.enable()?);
        } else {
            info!("Disabling E2V correction");
            // Detach first so the pipeline stops feeding frames into the stage
            self.pipeline.set_reconstruction_stage(None)?;
            if let Some(ActiveCorrection { stage, binding }) = state.active.take() {
                let result = binding.set_registration_active(false);
                drop(binding);
                drop(stage);
                result?;
            }
        }
        Ok(())
    }

    fn enable(&self) -> SyncResult<ActiveCorrection> {
        let stage = (self.factory)();
        let binding = CorrectionBinding::new(
            Arc::clone(&stage),
            &self.det_info,
            &self.bin_ctrl,
            &self.roi_ctrl,
        );
        binding.set_registration_active(true)?;
        // On failure the binding unregisters itself when dropped
        self.pipeline
            .set_reconstruction_stage(Some(Arc::clone(&stage)))?;
        Ok(ActiveCorrection { stage, binding })
    }
}

impl Drop for CorrectionLifecycleManager {
    fn drop(&mut self) {
        // Binding and stage go in that order
        if let Some(ActiveCorrection { stage, binding }) = self.state.get_mut().active.take() {
            drop(binding);
            drop(stage);
        }
    }
}

impl std::fmt::Debug for CorrectionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CorrectionLifecycleManager")
            .field("active_flag", &state.active_flag)
            .field("has_stage", &state.active.is_some())
            .finish_non_exhaustive()
    }
}
