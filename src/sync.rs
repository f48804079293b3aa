//! Detector synchronization facade.
//!
//! [`DetectorSync`] ties together, for one detector:
//! - the E2V correction lifecycle ([`CorrectionLifecycleManager`])
//! - the serial command reconciliation ([`SerialCommandMirror`])
//! - the frame period monitor ([`FrameRateMonitor`])
//!
//! # Example
//!
//! ```
//! use frelon_sync::config::SyncConfig;
//! use frelon_sync::geometry::ChipType;
//! use frelon_sync::hardware::CameraModel;
//! use frelon_sync::simulated::SimulatedFrelon;
//! use frelon_sync::sync::DetectorSync;
//!
//! let camera = SimulatedFrelon::new(CameraModel {
//!     chip: ChipType::E2v2k,
//!     serial_nb: 12,
//!     firmware: "3.1".into(),
//! });
//! let sync = DetectorSync::new(camera.facets(), &SyncConfig::default())?;
//! assert!(sync.has_correction_stage());
//!
//! let response = sync.exec_serial_command("T=10")?;
//! assert_eq!(response, "!OK");
//! assert_eq!(sync.mirrors().latency_time.get(), 0.010);
//! # Ok::<(), frelon_sync::error::SyncError>(())
//! ```

use crate::config::{AcquisitionChannel, SyncConfig};
use crate::correction::{CorrectionLifecycleManager, E2vCorrectionStage};
use crate::error::SyncResult;
use crate::geometry::{Bin, Roi};
use crate::hardware::{CameraModel, DetectorFacets, StageFactory};
use crate::mirrors::ControlMirrors;
use crate::period::{FrameRateMonitor, ImageCounters, MonitorUpdate, PeriodEstimate};
use crate::serial::{MirroredValue, SerialCommand, SerialCommandMirror};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Synchronization layer of one Frelon detector.
pub struct DetectorSync {
    facets: DetectorFacets,
    channel: AcquisitionChannel,
    line_terminator: String,
    serial_timeout: Duration,
    /// Held across one write/read pair so responses are not crossed
    serial_lock: Mutex<()>,
    mirrors: Arc<ControlMirrors>,
    correction: CorrectionLifecycleManager,
    serial_mirror: SerialCommandMirror,
    frame_rate: FrameRateMonitor,
}

impl DetectorSync {
    /// Build with the stock [`E2vCorrectionStage`].
    pub fn new(facets: DetectorFacets, config: &SyncConfig) -> SyncResult<Self> {
        Self::with_stage_factory(facets, config, E2vCorrectionStage::factory())
    }

    /// Build with a custom correction stage.
    ///
    /// The mirrors are seeded from the hardware and the correction state is
    /// checked once, as on every detector start-up.
    pub fn with_stage_factory(
        facets: DetectorFacets,
        config: &SyncConfig,
        factory: StageFactory,
    ) -> SyncResult<Self> {
        config.validate()?;

        let mirrors = Arc::new(ControlMirrors::new());
        let correction = CorrectionLifecycleManager::new(
            Arc::clone(&facets.det_info),
            Arc::clone(&facets.bin),
            Arc::clone(&facets.roi),
            Arc::clone(&facets.status),
            Arc::clone(&facets.pipeline),
            factory,
            config.detector.e2v_correction,
        );
        let serial_mirror = SerialCommandMirror::new(
            Arc::clone(&facets.sync),
            Arc::clone(&facets.shutter),
            mirrors.clone(),
            mirrors.clone(),
        );

        let sync = Self {
            facets,
            channel: config.detector.channel,
            line_terminator: config.serial.line_terminator.clone(),
            serial_timeout: config.serial.timeout(),
            serial_lock: Mutex::new(()),
            mirrors,
            correction,
            serial_mirror,
            frame_rate: FrameRateMonitor::new(),
        };

        sync.serial_mirror.refresh_all()?;
        sync.correction.check_correction()?;
        info!(
            model = %sync.camera_model_string()?,
            channel = ?sync.channel,
            "Detector sync ready"
        );
        Ok(sync)
    }

    // =========================================================================
    // Correction
    // =========================================================================

    /// Record the correction intent and apply it.
    pub fn set_correction_active(&self, active: bool) -> SyncResult<()> {
        self.correction.set_active(active)
    }

    /// The correction intent.
    #[must_use]
    pub fn is_correction_active(&self) -> bool {
        self.correction.is_active_flag()
    }

    /// True while a correction stage is installed.
    #[must_use]
    pub fn has_correction_stage(&self) -> bool {
        self.correction.has_stage()
    }

    /// Re-evaluate the correction state, e.g. after an acquisition ended.
    pub fn check_correction(&self) -> SyncResult<()> {
        self.correction.check_correction()
    }

    // =========================================================================
    // Serial line
    // =========================================================================

    /// Reconcile the mirrors after a command executed elsewhere.
    pub fn on_command_executed(
        &self,
        cmd: &str,
        response: &str,
    ) -> SyncResult<Option<MirroredValue>> {
        self.serial_mirror.on_command_text(cmd, response)
    }

    /// Send a raw command, read its response and reconcile the mirrors.
    ///
    /// Malformed commands are rejected before anything is written. The
    /// response must arrive within the configured `serial.timeout_ms`.
    #[instrument(skip(self))]
    pub fn exec_serial_command(&self, cmd: &str) -> SyncResult<String> {
        let parsed = SerialCommand::parse(cmd)?;
        let response = {
            let _line = self.serial_lock.lock();
            debug!("Executing Frelon serial cmd: {}", cmd.trim_end());
            self.facets.serial.write(cmd)?;
            self.facets.serial.read_line(self.serial_timeout)?
        };
        self.serial_mirror.on_command_executed(&parsed, &response)?;

        debug!("Received response:");
        for line in response.split(self.line_terminator.as_str()) {
            debug!("{}", line);
        }
        Ok(response)
    }

    /// Software mirrors of the monitored registers.
    #[must_use]
    pub fn mirrors(&self) -> &ControlMirrors {
        &self.mirrors
    }

    // =========================================================================
    // Frame period
    // =========================================================================

    /// Reset the period fit at acquisition start.
    pub fn start_period_estimate(&self, nb_frames: Option<u64>) {
        self.frame_rate.start(nb_frames);
    }

    /// Add one `(frames, seconds since start)` sample.
    pub fn on_frame_sample(&self, n: u64, t: f64) {
        self.frame_rate.on_sample(n, t);
    }

    /// Feed an image status notification.
    pub fn on_image_status(&self, counters: ImageCounters) -> MonitorUpdate {
        self.frame_rate.on_image_status(counters)
    }

    /// Current frame period estimate.
    #[must_use]
    pub fn estimate_period(&self) -> PeriodEstimate {
        self.frame_rate.estimate()
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Current hardware binning.
    pub fn bin(&self) -> SyncResult<Bin> {
        Ok(self.facets.bin.bin()?)
    }

    /// Change the binning; ROI and correction stage follow through the bin event.
    pub fn set_bin(&self, bin: Bin) -> SyncResult<()> {
        debug!(%bin, "Setting bin");
        Ok(self.facets.bin.set_bin(bin)?)
    }

    /// Full frame at the current binning.
    pub fn max_roi(&self) -> SyncResult<Roi> {
        let max_size = self.facets.det_info.max_image_size()?;
        let max_roi = Roi::full(max_size.binned(self.bin()?));
        debug!(%max_roi, "Max roi");
        Ok(max_roi)
    }

    /// Set the ROI; the full frame is stored as the empty sentinel.
    pub fn set_roi(&self, roi: Roi) -> SyncResult<()> {
        debug!(%roi, "Setting roi");
        let roi = if roi == self.max_roi()? { Roi::empty() } else { roi };
        Ok(self.facets.roi.set_roi(roi)?)
    }

    /// Current ROI, the full frame when none is set.
    pub fn roi(&self) -> SyncResult<Roi> {
        let roi = self.facets.roi.roi()?;
        if roi.is_empty() {
            self.max_roi()
        } else {
            Ok(roi)
        }
    }

    // =========================================================================
    // Identification
    // =========================================================================

    /// Chip, serial number and firmware read from the detector.
    pub fn camera_model(&self) -> SyncResult<CameraModel> {
        Ok(self.facets.det_info.model()?)
    }

    /// `Frelon <chip> #<serial>, FW:<firmware>`
    pub fn camera_model_string(&self) -> SyncResult<String> {
        Ok(self.camera_model()?.to_string())
    }

    /// Acquisition channel this facade was configured with.
    #[must_use]
    pub fn channel(&self) -> AcquisitionChannel {
        self.channel
    }
}

impl std::fmt::Debug for DetectorSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorSync")
            .field("channel", &self.channel)
            .field("correction", &self.correction)
            .field("frame_rate", &self.frame_rate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::geometry::ChipType;
    use crate::hardware::RoiControl;
    use crate::simulated::SimulatedFrelon;

    fn camera(chip: ChipType) -> Arc<SimulatedFrelon> {
        SimulatedFrelon::new(CameraModel {
            chip,
            serial_nb: 12,
            firmware: "3.1".into(),
        })
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SyncConfig::default();
        config.serial.timeout_ms = 0;
        assert!(matches!(
            DetectorSync::new(camera(ChipType::E2v2k).facets(), &config),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_model_string() {
        let sync = DetectorSync::new(camera(ChipType::Kodak).facets(), &SyncConfig::default())
            .unwrap();
        assert_eq!(sync.camera_model_string().unwrap(), "Frelon Kodak #12, FW:3.1");
        assert!(sync.is_correction_active());
        assert!(!sync.has_correction_stage());
    }

    #[test]
    fn test_max_roi_stored_as_empty() {
        let cam = camera(ChipType::E2v2k);
        let sync = DetectorSync::new(cam.facets(), &SyncConfig::default()).unwrap();
        sync.set_bin(Bin::new(2, 2).unwrap()).unwrap();

        sync.set_roi(Roi::new(0, 0, 1024, 1024)).unwrap();
        assert!(cam.roi().unwrap().is_empty());
        assert_eq!(sync.roi().unwrap(), Roi::new(0, 0, 1024, 1024));

        sync.set_roi(Roi::new(0, 0, 512, 512)).unwrap();
        assert_eq!(cam.roi().unwrap(), Roi::new(0, 0, 512, 512));
    }

    #[test]
    fn test_invalid_serial_command_not_sent() {
        let cam = camera(ChipType::E2v2k);
        let sync = DetectorSync::new(cam.facets(), &SyncConfig::default()).unwrap();
        assert!(matches!(
            sync.exec_serial_command("T==1"),
            Err(SyncError::InvalidCommand(_))
        ));
        assert!(cam.written_commands().is_empty());
    }
}
