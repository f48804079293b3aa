//! Geometry holder for the E2V readout correction.

use crate::geometry::{Bin, Roi};
use crate::hardware::{CorrectionStage, StageFactory};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Correction stage that records the geometry the pixel correction must use.
///
/// The pixel algorithm runs in the processing pipeline; it reads
/// [`hw_bin`](Self::hw_bin) and [`hw_roi`](Self::hw_roi) for every frame.
#[derive(Debug, Default)]
pub struct E2vCorrectionStage {
    hw_bin: Mutex<Bin>,
    hw_roi: Mutex<Option<Roi>>,
}

impl E2vCorrectionStage {
    /// Stage at identity binning with no ROI yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for [`crate::correction::CorrectionLifecycleManager`].
    #[must_use]
    pub fn factory() -> StageFactory {
        Box::new(|| Arc::new(E2vCorrectionStage::new()) as Arc<dyn CorrectionStage>)
    }

    /// Last hardware binning pushed by the binding.
    #[must_use]
    pub fn hw_bin(&self) -> Bin {
        *self.hw_bin.lock()
    }

    /// `None` until the first ROI event.
    #[must_use]
    pub fn hw_roi(&self) -> Option<Roi> {
        *self.hw_roi.lock()
    }
}

impl CorrectionStage for E2vCorrectionStage {
    fn set_hw_bin(&self, bin: Bin) -> Result<()> {
        debug!(%bin, "E2V correction bin");
        *self.hw_bin.lock() = bin;
        Ok(())
    }

    fn set_hw_roi(&self, roi: Roi) -> Result<()> {
        if roi.is_empty() {
            bail!("E2V correction needs an explicit roi");
        }
        debug!(%roi, "E2V correction roi");
        *self.hw_roi.lock() = Some(roi);
        Ok(())
    }
}
