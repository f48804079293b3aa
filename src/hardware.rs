//! Hardware-control facets consumed by the synchronization layer.
//!
//! The detector interface is split into small capability traits instead of one
//! monolithic camera trait, so each consumer only sees what it actually reads:
//!
//! - The correction binding needs [`DetectorInfo`], [`BinControl`] and [`RoiControl`]
//! - The lifecycle manager needs [`StatusSource`] and [`ProcessingPipeline`]
//! - The serial mirror needs [`SyncParams`] and [`ShutterParams`]
//!
//! # Design Philosophy
//!
//! Each facet:
//! - Is synchronous: change notifications are delivered on the caller's thread
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors, surfaced as `SyncError::Hardware`
//! - Uses interior mutability for its own state (`&self` everywhere)

use crate::geometry::{Bin, ChipType, Roi, Size};
use crate::notifier::{ChangeCallback, SubscriptionId};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identification of the detector head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Fitted CCD chip
    pub chip: ChipType,
    /// Camera serial number
    pub serial_nb: u32,
    /// Firmware version string
    pub firmware: String,
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frelon {} #{}, FW:{}",
            self.chip.name(),
            self.serial_nb,
            self.firmware
        )
    }
}

/// Capability: Detector identification and size
pub trait DetectorInfo: Send + Sync {
    /// Model of the connected detector head
    fn model(&self) -> Result<CameraModel>;

    /// Unbinned detector size in pixels
    fn max_image_size(&self) -> Result<Size>;

    /// Chip type, taken from the model by default
    fn chip_type(&self) -> Result<ChipType> {
        Ok(self.model()?.chip)
    }
}

/// Capability: Hardware binning with change notification
///
/// # Contract
/// - Every change of the hardware binning, whatever its origin, fires the
///   registered callbacks exactly once with the new value
/// - Unregistering an unknown id is not an error
pub trait BinControl: Send + Sync {
    /// Current hardware binning
    fn bin(&self) -> Result<Bin>;

    /// Change the hardware binning
    fn set_bin(&self, bin: Bin) -> Result<()>;

    /// Subscribe to binning changes
    fn register_bin_changed(&self, callback: ChangeCallback<Bin>) -> Result<SubscriptionId>;

    /// Remove a binning subscription
    fn unregister_bin_changed(&self, id: SubscriptionId) -> Result<()>;
}

/// Capability: Hardware ROI with change notification
///
/// ROIs are in binned coordinates; [`Roi::empty`] means full frame.
pub trait RoiControl: Send + Sync {
    /// Current hardware ROI (possibly the empty sentinel)
    fn roi(&self) -> Result<Roi>;

    /// Change the hardware ROI
    fn set_roi(&self, roi: Roi) -> Result<()>;

    /// Subscribe to ROI changes
    fn register_roi_changed(&self, callback: ChangeCallback<Roi>) -> Result<SubscriptionId>;

    /// Remove a ROI subscription
    fn unregister_roi_changed(&self, id: SubscriptionId) -> Result<()>;
}

/// Capability: Hardware synchronization parameters
pub trait SyncParams: Send + Sync {
    /// Latency time between frames, in seconds
    fn latency_time(&self) -> Result<f64>;
}

/// Shutter operating mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShutterMode {
    /// Shutter driven by software only
    #[default]
    Manual,
    /// Shutter opened and closed by the camera for every frame
    AutoFrame,
}

impl ShutterMode {
    /// Label used in diagnostics for the shutter-enable register
    #[must_use]
    pub fn enable_label(&self) -> &'static str {
        match self {
            ShutterMode::AutoFrame => "AutoFrame",
            ShutterMode::Manual => "Off",
        }
    }
}

/// Capability: Hardware shutter parameters
pub trait ShutterParams: Send + Sync {
    /// Current shutter mode
    fn shutter_mode(&self) -> Result<ShutterMode>;

    /// Shutter close time, in seconds
    fn shutter_close_time(&self) -> Result<f64>;
}

/// Acquisition state of the control layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AcquisitionStatus {
    /// Idle, configuration may change
    #[default]
    Ready,
    /// Frames are being acquired
    Running,
    /// Last acquisition ended with an error
    Fault,
}

impl AcquisitionStatus {
    /// True while an acquisition is in progress
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, AcquisitionStatus::Running)
    }
}

/// Capability: Acquisition status source
pub trait StatusSource: Send + Sync {
    /// Current acquisition status
    fn status(&self) -> Result<AcquisitionStatus>;
}

/// Image correction stage driven by the detector geometry.
///
/// The pixel algorithm itself lives elsewhere; this trait only carries the
/// geometry parameters the stage must be kept in sync with.
pub trait CorrectionStage: Send + Sync {
    /// Hardware binning of the incoming frames
    fn set_hw_bin(&self, bin: Bin) -> Result<()>;

    /// Hardware ROI of the incoming frames, never the empty sentinel
    fn set_hw_roi(&self, roi: Roi) -> Result<()>;
}

/// Allocates a fresh correction stage.
pub type StageFactory = Box<dyn Fn() -> Arc<dyn CorrectionStage> + Send + Sync>;

/// Capability: Downstream processing pipeline
pub trait ProcessingPipeline: Send + Sync {
    /// Install (`Some`) or remove (`None`) the reconstruction stage
    fn set_reconstruction_stage(&self, stage: Option<Arc<dyn CorrectionStage>>) -> Result<()>;
}

/// Capability: Raw line-oriented serial channel to the detector
pub trait SerialLine: Send + Sync {
    /// Write one command line
    fn write(&self, cmd: &str) -> Result<()>;

    /// Read the response to the last command, failing once `timeout` elapses
    fn read_line(&self, timeout: Duration) -> Result<String>;
}

/// Every facet of one detector, as handed to [`crate::sync::DetectorSync`].
#[derive(Clone)]
pub struct DetectorFacets {
    /// Detector identification
    pub det_info: Arc<dyn DetectorInfo>,
    /// Binning control
    pub bin: Arc<dyn BinControl>,
    /// ROI control
    pub roi: Arc<dyn RoiControl>,
    /// Synchronization parameters
    pub sync: Arc<dyn SyncParams>,
    /// Shutter parameters
    pub shutter: Arc<dyn ShutterParams>,
    /// Acquisition status
    pub status: Arc<dyn StatusSource>,
    /// Processing pipeline
    pub pipeline: Arc<dyn ProcessingPipeline>,
    /// Serial channel
    pub serial: Arc<dyn SerialLine>,
}
