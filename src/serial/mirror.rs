//! Reconciliation of software mirrors with raw serial traffic.
//!
//! Commands sent straight to the serial line bypass the structured API, so
//! every executed command is inspected. Only a *set* of a monitored register
//! triggers a reconciliation: the authoritative value is read back from the
//! hardware-control object and pushed into exactly one mirror setter.

use crate::error::SyncResult;
use crate::hardware::{ShutterMode, ShutterParams, SyncParams};
use crate::mirrors::{AcquisitionMirror, ShutterMirror};
use crate::serial::SerialCommand;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Hardware parameters whose software mirrors follow raw serial commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredRegister {
    /// `T`, latency time in ms
    LatencyTime,
    /// `U`, shutter enable
    ShutEnable,
    /// `F`, shutter close time in ms
    ShutCloseTime,
}

/// Fixed token table of the monitored registers.
const MONITORED_TOKENS: [(&str, MonitoredRegister); 3] = [
    ("T", MonitoredRegister::LatencyTime),
    ("U", MonitoredRegister::ShutEnable),
    ("F", MonitoredRegister::ShutCloseTime),
];

impl MonitoredRegister {
    /// Register addressed by a command token, if it is monitored.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        MONITORED_TOKENS
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, reg)| *reg)
    }

    /// Serial command token of this register.
    #[must_use]
    pub fn token(&self) -> &'static str {
        MONITORED_TOKENS
            .iter()
            .find(|(_, reg)| reg == self)
            .map_or("", |(t, _)| t)
    }
}

/// Value pushed into a mirror by one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirroredValue {
    /// Seconds
    LatencyTime(f64),
    /// Mode derived from the enable register
    ShutterMode(ShutterMode),
    /// Seconds
    ShutterCloseTime(f64),
}

/// Watches executed serial commands for changes of monitored registers.
pub struct SerialCommandMirror {
    sync: Arc<dyn SyncParams>,
    shutter: Arc<dyn ShutterParams>,
    acq_mirror: Arc<dyn AcquisitionMirror>,
    shutter_mirror: Arc<dyn ShutterMirror>,
}

impl SerialCommandMirror {
    /// Reconcile from the given register facets into the given mirrors.
    pub fn new(
        sync: Arc<dyn SyncParams>,
        shutter: Arc<dyn ShutterParams>,
        acq_mirror: Arc<dyn AcquisitionMirror>,
        shutter_mirror: Arc<dyn ShutterMirror>,
    ) -> Self {
        Self {
            sync,
            shutter,
            acq_mirror,
            shutter_mirror,
        }
    }

    /// Inspect one executed command and reconcile its mirror if needed.
    ///
    /// Returns the reconciled value, or `None` when the command is not a set
    /// of a monitored register. The integer value of the command is only
    /// logged; the mirror always receives the value read back from hardware.
    #[instrument(skip(self, response), fields(response_len = response.len()))]
    pub fn on_command_executed(
        &self,
        cmd: &SerialCommand,
        response: &str,
    ) -> SyncResult<Option<MirroredValue>> {
        let Some(reg) = MonitoredRegister::from_token(&cmd.token) else {
            return Ok(None);
        };
        if cmd.is_query {
            return Ok(None);
        }

        let vstr = match (&cmd.raw_value, cmd.int_value()) {
            (_, Ok(val)) => format!("={val}"),
            (None, Err(_)) => {
                debug!(token = %cmd.token, "Monitored toggle command without value");
                String::new()
            }
            (Some(_), Err(err)) => {
                warn!(error = %err, "Could not parse monitored command value");
                String::new()
            }
        };
        trace!("Detected monitored serial command: {}{}", cmd.token, vstr);

        let value = self.reconcile(reg)?;
        Ok(Some(value))
    }

    /// Parse and inspect a raw command line.
    pub fn on_command_text(&self, cmd: &str, response: &str) -> SyncResult<Option<MirroredValue>> {
        let cmd = SerialCommand::parse(cmd)?;
        self.on_command_executed(&cmd, response)
    }

    /// Push the current hardware value of every monitored register.
    ///
    /// Used once at start-up so the mirrors do not wait for the first set.
    pub fn refresh_all(&self) -> SyncResult<Vec<MirroredValue>> {
        MONITORED_TOKENS
            .iter()
            .map(|(_, reg)| self.reconcile(*reg))
            .collect()
    }

    fn reconcile(&self, reg: MonitoredRegister) -> SyncResult<MirroredValue> {
        let value = match reg {
            MonitoredRegister::LatencyTime => {
                let lat_time = self.sync.latency_time()?;
                debug!("Updating LatTime: {:.3} ms", lat_time * 1e3);
                self.acq_mirror.set_latency_time(lat_time)?;
                MirroredValue::LatencyTime(lat_time)
            }
            MonitoredRegister::ShutCloseTime => {
                let shut_time = self.shutter.shutter_close_time()?;
                debug!("Updating ShutCloseTime: {:.3} ms", shut_time * 1e3);
                self.shutter_mirror.set_shutter_close_time(shut_time)?;
                MirroredValue::ShutterCloseTime(shut_time)
            }
            MonitoredRegister::ShutEnable => {
                let shut_mode = self.shutter.shutter_mode()?;
                debug!("Updating ShutEnable: {}", shut_mode.enable_label());
                self.shutter_mirror.set_shutter_mode(shut_mode)?;
                MirroredValue::ShutterMode(shut_mode)
            }
        };
        Ok(value)
    }
}

impl std::fmt::Debug for SerialCommandMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialCommandMirror").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use anyhow::{bail, Result};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeParams {
        reads: AtomicUsize,
        latency: Mutex<f64>,
        offline: Mutex<bool>,
    }

    impl SyncParams for FakeParams {
        fn latency_time(&self) -> Result<f64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if *self.offline.lock() {
                bail!("serial timeout");
            }
            Ok(*self.latency.lock())
        }
    }

    impl ShutterParams for FakeParams {
        fn shutter_mode(&self) -> Result<ShutterMode> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(ShutterMode::AutoFrame)
        }

        fn shutter_close_time(&self) -> Result<f64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(0.004)
        }
    }

    #[derive(Default)]
    struct RecordingMirror {
        values: Mutex<Vec<MirroredValue>>,
    }

    impl AcquisitionMirror for RecordingMirror {
        fn set_latency_time(&self, latency_time: f64) -> Result<()> {
            self.values.lock().push(MirroredValue::LatencyTime(latency_time));
            Ok(())
        }
    }

    impl ShutterMirror for RecordingMirror {
        fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()> {
            self.values.lock().push(MirroredValue::ShutterMode(mode));
            Ok(())
        }

        fn set_shutter_close_time(&self, close_time: f64) -> Result<()> {
            self.values.lock().push(MirroredValue::ShutterCloseTime(close_time));
            Ok(())
        }
    }

    fn setup() -> (Arc<FakeParams>, Arc<RecordingMirror>, SerialCommandMirror) {
        let params = Arc::new(FakeParams::default());
        let mirror = Arc::new(RecordingMirror::default());
        let serial_mirror = SerialCommandMirror::new(
            params.clone(),
            params.clone(),
            mirror.clone(),
            mirror.clone(),
        );
        (params, mirror, serial_mirror)
    }

    #[test]
    fn test_token_table() {
        assert_eq!(
            MonitoredRegister::from_token("T"),
            Some(MonitoredRegister::LatencyTime)
        );
        assert_eq!(MonitoredRegister::ShutEnable.token(), "U");
        assert_eq!(MonitoredRegister::from_token("t"), None);
        assert_eq!(MonitoredRegister::from_token("I"), None);
    }

    #[test]
    fn test_query_never_reconciles() {
        let (params, mirror, serial_mirror) = setup();
        for cmd in ["T?", "U?", "F?"] {
            assert_eq!(serial_mirror.on_command_text(cmd, "!OK:5").unwrap(), None);
        }
        assert_eq!(params.reads.load(Ordering::SeqCst), 0);
        assert!(mirror.values.lock().is_empty());
    }

    #[test]
    fn test_unmonitored_set_ignored() {
        let (params, mirror, serial_mirror) = setup();
        assert_eq!(serial_mirror.on_command_text("I=100", "!OK").unwrap(), None);
        assert_eq!(params.reads.load(Ordering::SeqCst), 0);
        assert!(mirror.values.lock().is_empty());
    }

    #[test]
    fn test_set_uses_hardware_value_not_command_value() {
        let (params, mirror, serial_mirror) = setup();
        *params.latency.lock() = 0.007;

        let value = serial_mirror.on_command_text("T=5", "!OK").unwrap();

        assert_eq!(value, Some(MirroredValue::LatencyTime(0.007)));
        assert_eq!(params.reads.load(Ordering::SeqCst), 1);
        assert_eq!(*mirror.values.lock(), vec![MirroredValue::LatencyTime(0.007)]);
    }

    #[test]
    fn test_each_register_reaches_one_setter() {
        let (_, mirror, serial_mirror) = setup();
        serial_mirror.on_command_text("U=1", "").unwrap();
        serial_mirror.on_command_text("F=4", "").unwrap();
        assert_eq!(
            *mirror.values.lock(),
            vec![
                MirroredValue::ShutterMode(ShutterMode::AutoFrame),
                MirroredValue::ShutterCloseTime(0.004),
            ]
        );
    }

    #[test]
    fn test_unparsable_value_still_reconciles() {
        let (params, _, serial_mirror) = setup();
        assert!(serial_mirror.on_command_text("F=2.5", "").unwrap().is_some());
        assert!(serial_mirror.on_command_text("U", "").unwrap().is_some());
        assert_eq!(params.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_all_reads_every_register() {
        let (params, mirror, serial_mirror) = setup();
        let values = serial_mirror.refresh_all().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(params.reads.load(Ordering::SeqCst), 3);
        assert_eq!(*mirror.values.lock(), values);
    }

    #[test]
    fn test_hardware_error_propagates() {
        let (params, mirror, serial_mirror) = setup();
        *params.offline.lock() = true;
        let err = serial_mirror.on_command_text("T=5", "").unwrap_err();
        assert!(matches!(err, SyncError::Hardware(_)));
        assert!(mirror.values.lock().is_empty());
    }

    #[test]
    fn test_invalid_text_rejected() {
        let (_, _, serial_mirror) = setup();
        assert!(matches!(
            serial_mirror.on_command_text("T=abc", ""),
            Err(SyncError::InvalidCommand(_))
        ));
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_parse_failure_is_logged() {
        let (_, _, serial_mirror) = setup();
        serial_mirror.on_command_text("F=2.5", "").unwrap();
        assert!(logs_contain("Could not parse monitored command value"));
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_bare_toggle_is_not_a_warning() {
        let (params, _, serial_mirror) = setup();
        assert!(serial_mirror.on_command_text("U", "").unwrap().is_some());
        assert_eq!(params.reads.load(Ordering::SeqCst), 1);
        assert!(logs_contain("Monitored toggle command without value"));
        assert!(!logs_contain("Could not parse monitored command value"));
    }
}
