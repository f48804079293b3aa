//! Higher-level software mirrors of monitored hardware parameters.
//!
//! The serial reconciliation only talks to the two setter traits below, so an
//! application can plug in its own control layer. [`ControlMirrors`] is the
//! stock implementation backed by [`Observable`]s.

use crate::hardware::ShutterMode;
use crate::observable::Observable;
use anyhow::Result;
use tracing::debug;

/// Setter side of the acquisition parameters mirror.
pub trait AcquisitionMirror: Send + Sync {
    /// Latency time between frames, in seconds
    fn set_latency_time(&self, latency_time: f64) -> Result<()>;
}

/// Setter side of the shutter parameters mirror.
pub trait ShutterMirror: Send + Sync {
    /// Shutter operating mode
    fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()>;

    /// Shutter close time, in seconds
    fn set_shutter_close_time(&self, close_time: f64) -> Result<()>;
}

/// Observable copies of the monitored parameters.
#[derive(Debug, Clone)]
pub struct ControlMirrors {
    /// Latency time, seconds
    pub latency_time: Observable<f64>,
    /// Shutter mode
    pub shutter_mode: Observable<ShutterMode>,
    /// Shutter close time, seconds
    pub shutter_close_time: Observable<f64>,
}

impl ControlMirrors {
    /// Mirrors with zero times and a manual shutter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latency_time: Observable::new("latency_time", 0.0)
                .with_description("Dead time between two frames")
                .with_units("s")
                .with_range(0.0, f64::MAX),
            shutter_mode: Observable::new("shutter_mode", ShutterMode::Manual)
                .with_description("Shutter operating mode"),
            shutter_close_time: Observable::new("shutter_close_time", 0.0)
                .with_description("Time the shutter takes to close")
                .with_units("s")
                .with_range(0.0, f64::MAX),
        }
    }
}

impl Default for ControlMirrors {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionMirror for ControlMirrors {
    fn set_latency_time(&self, latency_time: f64) -> Result<()> {
        debug!(latency_time, "Mirror latency time");
        self.latency_time.set(latency_time)
    }
}

impl ShutterMirror for ControlMirrors {
    fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()> {
        debug!(enable = mode.enable_label(), "Mirror shutter mode");
        self.shutter_mode.set(mode)
    }

    fn set_shutter_close_time(&self, close_time: f64) -> Result<()> {
        debug!(close_time, "Mirror shutter close time");
        self.shutter_close_time.set(close_time)
    }
}
