//! Frame period estimation from image-ready notifications.
//!
//! [`PeriodEstimator`] is an O(1) incremental least-squares fit of
//! `t = offset + period * n`. [`FrameRateMonitor`] feeds it from acquisition
//! status callbacks and logs the running fit. The fit is informative only:
//! nothing in the control path depends on it.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Result of [`PeriodEstimator::estimate`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PeriodEstimate {
    /// Seconds per frame
    pub period: f64,
    /// Time of frame zero relative to the reference start, seconds
    pub offset: f64,
    /// False with fewer than two samples or a degenerate fit
    pub valid: bool,
}

impl PeriodEstimate {
    const UNDEFINED: PeriodEstimate = PeriodEstimate {
        period: 0.0,
        offset: 0.0,
        valid: false,
    };
}

/// Running sums of a simple linear regression of `t` on `n`.
#[derive(Debug, Clone, Default)]
pub struct PeriodEstimator {
    sum_n: f64,
    sum_n2: f64,
    sum_t: f64,
    sum_nt: f64,
    count: u64,
}

impl PeriodEstimator {
    /// Empty estimator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all samples.
    pub fn start(&mut self) {
        *self = Self::default();
    }

    /// Add one sample: `n` completed frames at `t` seconds after start.
    #[allow(clippy::cast_precision_loss)]
    pub fn on_sample(&mut self, n: u64, t: f64) {
        let n = n as f64;
        self.sum_n += n;
        self.sum_n2 += n * n;
        self.sum_t += t;
        self.sum_nt += n * t;
        self.count += 1;
    }

    /// Number of samples since the last [`start`](Self::start).
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.count
    }

    /// Least-squares slope and intercept.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate(&self) -> PeriodEstimate {
        if self.count < 2 {
            return PeriodEstimate::UNDEFINED;
        }
        let k = self.count as f64;
        let denom = k * self.sum_n2 - self.sum_n * self.sum_n;
        if denom == 0.0 || !denom.is_finite() {
            return PeriodEstimate::UNDEFINED;
        }
        let period = (k * self.sum_nt - self.sum_n * self.sum_t) / denom;
        let offset = (self.sum_t - period * self.sum_n) / k;
        PeriodEstimate {
            period,
            offset,
            valid: true,
        }
    }
}

/// Image counters carried by an acquisition status notification.
///
/// Counters are frame indices, `-1` before the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageCounters {
    /// Last frame read out of the detector
    pub last_image_acquired: i64,
    /// Last frame through the base processing
    pub last_base_image_ready: i64,
    /// Last frame fully processed
    pub last_image_ready: i64,
}

impl Default for ImageCounters {
    fn default() -> Self {
        Self {
            last_image_acquired: -1,
            last_base_image_ready: -1,
            last_image_ready: -1,
        }
    }
}

/// Progress of the monitored acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MonitorState {
    /// Not started
    #[default]
    Idle,
    /// Started, frames still expected
    Acquiring,
    /// The requested number of frames is ready
    Finished,
}

/// Outcome of one status notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorUpdate {
    /// Period estimate after this notification
    pub estimate: PeriodEstimate,
    /// Acquisition progress after this notification
    pub state: MonitorState,
}

struct MonitorInner {
    estimator: PeriodEstimator,
    start: Instant,
    nb_frames: Option<u64>,
    state: MonitorState,
}

/// Estimates the frame period from status callbacks.
///
/// Callbacks may come from the acquisition thread while another thread reads
/// the estimate, so the estimator sits behind a mutex.
pub struct FrameRateMonitor {
    inner: Mutex<MonitorInner>,
}

impl FrameRateMonitor {
    /// Idle monitor with an empty estimator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                estimator: PeriodEstimator::new(),
                start: Instant::now(),
                nb_frames: None,
                state: MonitorState::Idle,
            }),
        }
    }

    /// Reset the fit and take the reference time.
    ///
    /// With `nb_frames`, the monitor reports [`MonitorState::Finished`] once
    /// the last frame is ready.
    pub fn start(&self, nb_frames: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.estimator.start();
        inner.start = Instant::now();
        inner.nb_frames = nb_frames;
        inner.state = MonitorState::Acquiring;
        debug!(?nb_frames, "Frame rate monitor started");
    }

    /// Add a sample with an explicit time offset, in seconds from start.
    pub fn on_sample(&self, n: u64, t: f64) {
        self.inner.lock().estimator.on_sample(n, t);
    }

    /// Feed one status notification, stamped with the monotonic clock.
    pub fn on_image_status(&self, counters: ImageCounters) -> MonitorUpdate {
        let mut inner = self.inner.lock();
        let dt = inner.start.elapsed().as_secs_f64();
        let n = u64::try_from(counters.last_image_acquired + 1).unwrap_or(0);
        inner.estimator.on_sample(n, dt);

        if let Some(nb_frames) = inner.nb_frames {
            let last_ready = u64::try_from(counters.last_image_ready + 1).unwrap_or(0);
            if inner.state == MonitorState::Acquiring && last_ready == nb_frames {
                inner.state = MonitorState::Finished;
            }
        }

        let estimate = inner.estimator.estimate();
        info!(
            "Last Acquired: {:8}, Last Base: {:8}, Last Ready: {:8}, Status: {:?}, PT: {:.6}, T0: {:.6}",
            counters.last_image_acquired,
            counters.last_base_image_ready,
            counters.last_image_ready,
            inner.state,
            estimate.period,
            estimate.offset,
        );
        MonitorUpdate {
            estimate,
            state: inner.state,
        }
    }

    /// Current fit.
    #[must_use]
    pub fn estimate(&self) -> PeriodEstimate {
        self.inner.lock().estimator.estimate()
    }

    /// Current acquisition progress.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.inner.lock().state
    }
}

impl Default for FrameRateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameRateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameRateMonitor")
            .field("samples", &inner.estimator.sample_count())
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_exact_line() {
        let mut est = PeriodEstimator::new();
        est.start();
        for (n, t) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            est.on_sample(n, t);
        }
        let fit = est.estimate();
        assert!(fit.valid);
        assert!(approx(fit.period, 1.0));
        assert!(approx(fit.offset, 0.0));
    }

    #[test]
    fn test_fewer_than_two_samples_is_undefined() {
        let mut est = PeriodEstimator::new();
        assert_eq!(est.estimate(), PeriodEstimate::UNDEFINED);
        est.on_sample(1, 0.5);
        assert!(!est.estimate().valid);
        assert_eq!(est.estimate().period, 0.0);
    }

    #[test]
    fn test_same_n_is_degenerate() {
        let mut est = PeriodEstimator::new();
        est.on_sample(4, 1.0);
        est.on_sample(4, 1.1);
        assert!(!est.estimate().valid);
    }

    #[test]
    fn test_offset_and_noise() {
        let mut est = PeriodEstimator::new();
        // 10 ms period, first frame 3 ms late, alternating jitter
        for n in 1..=1000_u64 {
            let jitter = if n % 2 == 0 { 1e-4 } else { -1e-4 };
            est.on_sample(n, 0.003 + 0.010 * n as f64 + jitter);
        }
        let fit = est.estimate();
        assert!(fit.valid);
        assert!((fit.period - 0.010).abs() < 1e-6, "{fit:?}");
        assert!((fit.offset - 0.003).abs() < 1e-4, "{fit:?}");
    }

    #[test]
    fn test_start_resets() {
        let mut est = PeriodEstimator::new();
        est.on_sample(1, 1.0);
        est.on_sample(2, 2.0);
        est.start();
        assert_eq!(est.sample_count(), 0);
        assert!(!est.estimate().valid);
    }

    #[test]
    fn test_monitor_counts_frames_from_zero_index() {
        let monitor = FrameRateMonitor::new();
        monitor.start(Some(2));
        let first = monitor.on_image_status(ImageCounters {
            last_image_acquired: 0,
            last_base_image_ready: 0,
            last_image_ready: 0,
        });
        assert!(!first.estimate.valid);
        assert_eq!(first.state, MonitorState::Acquiring);

        let second = monitor.on_image_status(ImageCounters {
            last_image_acquired: 1,
            last_base_image_ready: 1,
            last_image_ready: 1,
        });
        assert!(second.estimate.valid);
        assert_eq!(second.state, MonitorState::Finished);
        assert_eq!(monitor.state(), MonitorState::Finished);
    }

    #[test]
    fn test_monitor_explicit_samples() {
        let monitor = FrameRateMonitor::default();
        monitor.start(None);
        monitor.on_sample(1, 0.1);
        monitor.on_sample(2, 0.2);
        assert!(approx(monitor.estimate().period, 0.1));
    }
}
