use std::time::{Duration, Instant};

/// Monotonic clock in nanoseconds, plus a bounded record of frame durations.
pub trait Timer {
    fn now(&self) -> u64;
    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }
    fn record_frame(&mut self, d: Duration);
    fn calibration_stats(&self) -> CalibrationStats;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl CalibrationStats {
    fn from_frames(frames: &FrameLog) -> Self {
        let times: Vec<f64> = frames.samples.iter().map(|d| d.as_nanos() as f64).collect();
        if times.is_empty() {
            return Self::default();
        }
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        CalibrationStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone)]
struct FrameLog {
    samples: Vec<Duration>,
    max_samples: usize,
}

impl FrameLog {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    fn push(&mut self, d: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(d);
    }
}

/// Wall clock timer used when presenting in a real window.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    start: Instant,
    frames: FrameLog,
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: FrameLog::new(1000),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.samples.len()
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for HighPrecisionTimer {
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }
    fn calibration_stats(&self) -> CalibrationStats {
        CalibrationStats::from_frames(&self.frames)
    }
}

/// Clock that only moves when told to. Drives headless trials and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ns: u64,
    frames: FrameLog,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now_ns: 0,
            frames: FrameLog::new(1000),
        }
    }

    pub fn advance(&mut self, d: Duration) {
        self.now_ns += d.as_nanos() as u64;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for ManualClock {
    fn now(&self) -> u64 {
        self.now_ns
    }
    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }
    fn calibration_stats(&self) -> CalibrationStats {
        CalibrationStats::from_frames(&self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let mut clock = ManualClock::new();
        clock.advance(Duration::from_millis(16));
        assert_eq!(clock.now(), 16_000_000);
        assert_eq!(clock.elapsed(6_000_000), Duration::from_millis(10));
        assert_eq!(clock.elapsed(20_000_000), Duration::ZERO);
    }

    #[test]
    fn stats_from_frames() {
        let mut clock = ManualClock::new();
        assert_eq!(clock.calibration_stats(), CalibrationStats::default());

        clock.record_frame(Duration::from_millis(10));
        clock.record_frame(Duration::from_millis(20));
        let stats = clock.calibration_stats();
        assert_eq!(stats.average_frame_time_ns, 15_000_000.0);
        assert_eq!(stats.jitter_ns, 5_000_000.0);
        assert_eq!(stats.min_frame_time_ns, 10_000_000.0);
        assert_eq!(stats.max_frame_time_ns, 20_000_000.0);
        assert!((stats.effective_fps - 66.666).abs() < 0.01);
    }

    #[test]
    fn frame_log_is_bounded() {
        let mut log = FrameLog::new(3);
        for ms in 1..=5 {
            log.push(Duration::from_millis(ms));
        }
        assert_eq!(
            log.samples,
            vec![
                Duration::from_millis(3),
                Duration::from_millis(4),
                Duration::from_millis(5)
            ]
        );
    }

    #[test]
    fn high_precision_timer_is_monotonic() {
        let timer = HighPrecisionTimer::new();
        let a = timer.now();
        let b = timer.now();
        assert!(b >= a);
        assert_eq!(timer.frame_count(), 0);
    }
}
