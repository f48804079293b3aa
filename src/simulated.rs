//! In-process Frelon detector.
//!
//! [`SimulatedFrelon`] implements every hardware facet with plain state and
//! real change notifiers, so the synchronization layer can run without a
//! camera. Its serial line understands the monitored registers:
//!
//! | Command | Meaning                         | Units |
//! |---------|---------------------------------|-------|
//! | `T`     | latency time                    | ms    |
//! | `U`     | shutter enable (1 = AutoFrame)  |       |
//! | `F`     | shutter close time              | ms    |
//!
//! Any other token is stored verbatim and echoed back by its query.
//! Responses follow the camera convention `!OK` / `!OK:<value>`.
//!
//! Changing the binning fires the bin event first, then a ROI event carrying
//! the ROI rescaled to the new binning.

use crate::geometry::{Bin, GeometryState, Roi, Size};
use crate::hardware::{
    AcquisitionStatus, BinControl, CameraModel, CorrectionStage, DetectorFacets, DetectorInfo,
    ProcessingPipeline, RoiControl, SerialLine, ShutterMode, ShutterParams, StatusSource,
    SyncParams,
};
use crate::notifier::{ChangeCallback, ChangeNotifier, SubscriptionId};
use crate::serial::SerialCommand;
use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Registers {
    latency_ms: u32,
    shutter_enable: u32,
    shutter_close_ms: u32,
    other: HashMap<String, String>,
}

/// Simulated Frelon camera with its acquisition pipeline.
pub struct SimulatedFrelon {
    model: CameraModel,
    geometry: Mutex<GeometryState>,
    bin_notifier: ChangeNotifier<Bin>,
    roi_notifier: ChangeNotifier<Roi>,
    registers: Mutex<Registers>,
    responses: Mutex<VecDeque<String>>,
    written: Mutex<Vec<String>>,
    response_delay: Mutex<Duration>,
    status: Mutex<AcquisitionStatus>,
    reconstruction: Mutex<Option<Arc<dyn CorrectionStage>>>,
}

impl SimulatedFrelon {
    /// A camera of the given model, full frame, unbinned, all registers zero.
    #[must_use]
    pub fn new(model: CameraModel) -> Arc<Self> {
        Arc::new(Self {
            model,
            geometry: Mutex::new(GeometryState::default()),
            bin_notifier: ChangeNotifier::new("bin"),
            roi_notifier: ChangeNotifier::new("roi"),
            registers: Mutex::new(Registers::default()),
            responses: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            response_delay: Mutex::new(Duration::ZERO),
            status: Mutex::new(AcquisitionStatus::Ready),
            reconstruction: Mutex::new(None),
        })
    }

    /// All facets, each backed by this camera.
    pub fn facets(self: &Arc<Self>) -> DetectorFacets {
        DetectorFacets {
            det_info: self.clone(),
            bin: self.clone(),
            roi: self.clone(),
            sync: self.clone(),
            shutter: self.clone(),
            status: self.clone(),
            pipeline: self.clone(),
            serial: self.clone(),
        }
    }

    /// Drive the acquisition status.
    pub fn set_status(&self, status: AcquisitionStatus) {
        debug!(?status, "Simulated acquisition status");
        *self.status.lock() = status;
    }

    /// Stage currently installed in the processing pipeline.
    #[must_use]
    pub fn reconstruction_stage(&self) -> Option<Arc<dyn CorrectionStage>> {
        self.reconstruction.lock().clone()
    }

    /// Number of (bin, roi) observers.
    #[must_use]
    pub fn observer_counts(&self) -> (usize, usize) {
        (
            self.bin_notifier.observer_count(),
            self.roi_notifier.observer_count(),
        )
    }

    /// Commands written to the serial line, in order.
    #[must_use]
    pub fn written_commands(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    /// Simulated time the camera takes to answer a command.
    ///
    /// A read with a shorter timeout fails and the late response is lost.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = delay;
    }

    /// Change the latency register behind the back of the serial line.
    pub fn poke_latency_ms(&self, latency_ms: u32) {
        self.registers.lock().latency_ms = latency_ms;
    }

    fn execute(&self, cmd: &SerialCommand) -> String {
        let mut guard = self.registers.lock();
        let regs = &mut *guard;
        let slot = match cmd.token.as_str() {
            "T" => Some(&mut regs.latency_ms),
            "U" => Some(&mut regs.shutter_enable),
            "F" => Some(&mut regs.shutter_close_ms),
            _ => None,
        };

        match (slot, cmd.is_query) {
            (Some(slot), true) => format!("!OK:{slot}"),
            (Some(slot), false) => match cmd.raw_value.as_deref().map(str::parse::<u32>) {
                Some(Ok(value)) => {
                    *slot = value;
                    "!OK".to_string()
                }
                Some(Err(_)) => format!("!CMD:ERR invalid value for {}", cmd.token),
                None => {
                    // Bare token toggles
                    *slot = u32::from(*slot == 0);
                    "!OK".to_string()
                }
            },
            (None, true) => {
                let value = regs.other.get(&cmd.token).cloned().unwrap_or_default();
                format!("!OK:{value}")
            }
            (None, false) => {
                let value = cmd.raw_value.clone().unwrap_or_default();
                regs.other.insert(cmd.token.clone(), value);
                "!OK".to_string()
            }
        }
    }
}

impl DetectorInfo for SimulatedFrelon {
    fn model(&self) -> Result<CameraModel> {
        Ok(self.model.clone())
    }

    fn max_image_size(&self) -> Result<Size> {
        Ok(self.model.chip.max_frame_size())
    }
}

impl BinControl for SimulatedFrelon {
    fn bin(&self) -> Result<Bin> {
        Ok(self.geometry.lock().bin)
    }

    fn set_bin(&self, bin: Bin) -> Result<()> {
        let max = self.model.chip.max_frame_size();
        if bin.x() > max.width || bin.y() > max.height {
            bail!("Bin {bin} exceeds the {}x{} frame", max.width, max.height);
        }
        let roi = {
            let mut geom = self.geometry.lock();
            if !geom.roi.is_empty() {
                geom.roi = geom.roi.rebinned(geom.bin, bin, max.binned(bin));
            }
            geom.bin = bin;
            geom.roi
        };
        trace!(%bin, %roi, "Firing change callbacks");
        self.bin_notifier.notify(&bin)?;
        self.roi_notifier.notify(&roi)
    }

    fn register_bin_changed(&self, callback: ChangeCallback<Bin>) -> Result<SubscriptionId> {
        Ok(self.bin_notifier.register(callback))
    }

    fn unregister_bin_changed(&self, id: SubscriptionId) -> Result<()> {
        self.bin_notifier.unregister(id);
        Ok(())
    }
}

impl RoiControl for SimulatedFrelon {
    fn roi(&self) -> Result<Roi> {
        Ok(self.geometry.lock().roi)
    }

    fn set_roi(&self, roi: Roi) -> Result<()> {
        {
            let mut geom = self.geometry.lock();
            let max = self.model.chip.max_frame_size().binned(geom.bin);
            if !roi.is_empty() && !roi.is_valid_for(max) {
                bail!("Roi {roi} exceeds the {}x{} binned frame", max.width, max.height);
            }
            geom.roi = roi;
        }
        trace!(%roi, "Firing change callback");
        self.roi_notifier.notify(&roi)
    }

    fn register_roi_changed(&self, callback: ChangeCallback<Roi>) -> Result<SubscriptionId> {
        Ok(self.roi_notifier.register(callback))
    }

    fn unregister_roi_changed(&self, id: SubscriptionId) -> Result<()> {
        self.roi_notifier.unregister(id);
        Ok(())
    }
}

impl SyncParams for SimulatedFrelon {
    fn latency_time(&self) -> Result<f64> {
        Ok(f64::from(self.registers.lock().latency_ms) / 1e3)
    }
}

impl ShutterParams for SimulatedFrelon {
    fn shutter_mode(&self) -> Result<ShutterMode> {
        Ok(if self.registers.lock().shutter_enable != 0 {
            ShutterMode::AutoFrame
        } else {
            ShutterMode::Manual
        })
    }

    fn shutter_close_time(&self) -> Result<f64> {
        Ok(f64::from(self.registers.lock().shutter_close_ms) / 1e3)
    }
}

impl StatusSource for SimulatedFrelon {
    fn status(&self) -> Result<AcquisitionStatus> {
        Ok(*self.status.lock())
    }
}

impl ProcessingPipeline for SimulatedFrelon {
    fn set_reconstruction_stage(&self, stage: Option<Arc<dyn CorrectionStage>>) -> Result<()> {
        debug!(installed = stage.is_some(), "Reconstruction stage");
        *self.reconstruction.lock() = stage;
        Ok(())
    }
}

impl SerialLine for SimulatedFrelon {
    fn write(&self, cmd: &str) -> Result<()> {
        let parsed = SerialCommand::parse(cmd)?;
        let response = self.execute(&parsed);
        self.written.lock().push(parsed.to_string());
        self.responses.lock().push_back(response);
        Ok(())
    }

    fn read_line(&self, timeout: Duration) -> Result<String> {
        let response = self
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("Serial line timeout: no pending response"))?;
        let delay = *self.response_delay.lock();
        if delay > timeout {
            bail!("Serial line timeout after {} ms", timeout.as_millis());
        }
        Ok(response)
    }
}

impl std::fmt::Debug for SimulatedFrelon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedFrelon")
            .field("model", &self.model)
            .field("geometry", &*self.geometry.lock())
            .finish_non_exhaustive()
    }
}
