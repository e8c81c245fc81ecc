use std::time::{Duration, Instant};

use tracing::info;

use super::FlipObserver;

/// Counts completed flips and logs the achieved frame rate
#[derive(Debug)]
pub struct FpsCounter {
    interval: Duration,
    window_start: Option<Instant>,
    frames: u32,
    total: u64,
    last_fps: Option<f64>,
}

impl Default for FpsCounter {
    fn default() -> Self {
        FpsCounter::new(Duration::from_secs(1))
    }
}

impl FpsCounter {
    /// Report once per `interval`
    pub fn new(interval: Duration) -> FpsCounter {
        FpsCounter {
            interval,
            window_start: None,
            frames: 0,
            total: 0,
            last_fps: None,
        }
    }

    /// Record a completed flip at `now`, returning the frame rate if a report interval elapsed
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.total += 1;
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.window_start = Some(now);
        self.frames = 0;
        self.last_fps = Some(fps);
        Some(fps)
    }

    /// Completed flips since creation
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Most recently reported frame rate
    pub fn last_fps(&self) -> Option<f64> {
        self.last_fps
    }
}

impl FlipObserver for FpsCounter {
    fn on_flip_completed(&mut self) {
        if let Some(fps) = self.record(Instant::now()) {
            info!(fps = format_args!("{:.2}", fps), total = self.total, "Frame rate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FpsCounter;
    use std::time::{Duration, Instant};

    #[test]
    fn reports_once_per_interval() {
        let mut counter = FpsCounter::new(Duration::from_secs(1));
        let start = Instant::now();
        assert_eq!(counter.record(start), None);
        for i in 1..60 {
            assert_eq!(counter.record(start + Duration::from_millis(i * 16)), None);
        }
        let fps = counter.record(start + Duration::from_secs(1)).unwrap();
        // the window opened with the first frame, 61 frames in one second
        assert!((fps - 61.0).abs() < 1e-9, "{fps}");
        assert_eq!(counter.last_fps(), Some(fps));
        assert_eq!(counter.total(), 61);

        // next window starts at the report
        assert_eq!(counter.record(start + Duration::from_millis(1500)), None);
        let fps = counter.record(start + Duration::from_secs(2)).unwrap();
        assert!((fps - 2.0).abs() < 1e-9, "{fps}");
    }

    #[test]
    fn burst_without_elapsed_time() {
        let mut counter = FpsCounter::new(Duration::ZERO);
        let now = Instant::now();
        assert_eq!(counter.record(now), None);
        assert_eq!(counter.record(now), None);
        let fps = counter.record(now + Duration::from_millis(500)).unwrap();
        assert_eq!(fps.round(), 6.0);
    }
}
