//! Run progress reporting.

use ensemble_core::ReportCadence;
use std::time::{Duration, Instant};
use tracing::info;

/// Logs run progress at fixed fractions of simulated time, or after a
/// wall-clock interval without any report.
#[derive(Debug)]
pub struct ProgressIndicator {
    origin: f64,
    duration: f64,
    cadence: ReportCadence,
    interval: Duration,
    started: Instant,
    last_report: Instant,
    steps: u64,
}

impl ProgressIndicator {
    /// `fraction` of the simulated span `[origin, end]` between reports.
    pub fn new(origin: f64, end: f64, fraction: f64, interval: Duration) -> Self {
        let duration = (end - origin).max(0.0);
        let now = Instant::now();
        Self {
            origin,
            duration,
            cadence: ReportCadence::starting_at(duration * fraction, 0.0),
            interval,
            started: now,
            last_report: now,
            steps: 0,
        }
    }

    /// Completed share of the simulated span, in `[0, 1]`.
    pub fn fraction_done(&self, t: f64) -> f64 {
        if self.duration > 0.0 {
            ((t - self.origin) / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Records one step reaching `t`; returns true when a line was logged.
    pub fn progress(&mut self, t: f64) -> bool {
        self.steps += 1;
        let elapsed_sim = t - self.origin;
        let due_by_fraction = self.cadence.due(elapsed_sim);
        let due_by_clock = self.last_report.elapsed() > self.interval;
        if !(due_by_fraction || due_by_clock) {
            return false;
        }

        let p = self.fraction_done(t);
        let elapsed = self.started.elapsed().as_secs_f64();
        let total = if p > 0.0 { elapsed / p } else { 0.0 };
        info!(
            "[{:5.1}%] {} / {} / {} (avg. dt={:5.3})",
            p * 100.0,
            clock(elapsed),
            clock(total),
            clock(total - elapsed),
            elapsed_sim / self.steps as f64
        );
        self.last_report = Instant::now();
        true
    }
}

/// Formats seconds as `HH:MM:SS`.
fn clock(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_format() {
        assert_eq!(clock(0.0), "00:00:00");
        assert_eq!(clock(3723.4), "01:02:03");
        assert_eq!(clock(-5.0), "00:00:00");
    }

    #[test]
    fn test_reports_at_each_tenth() {
        let mut progress = ProgressIndicator::new(100.0, 200.0, 0.1, Duration::from_secs(3600));
        let reports: Vec<f64> = (1..=40)
            .map(|i| 100.0 + i as f64 * 2.5)
            .filter(|t| progress.progress(*t))
            .collect();
        assert_eq!(reports, vec![110.0, 120.0, 130.0, 140.0, 150.0, 160.0, 170.0, 180.0, 190.0, 200.0]);
    }

    #[test]
    fn test_fraction_done_clamped() {
        let progress = ProgressIndicator::new(0.0, 10.0, 0.1, Duration::from_secs(60));
        assert_eq!(progress.fraction_done(5.0), 0.5);
        assert_eq!(progress.fraction_done(20.0), 1.0);

        let empty = ProgressIndicator::new(5.0, 5.0, 0.1, Duration::from_secs(60));
        assert_eq!(empty.fraction_done(5.0), 1.0);
    }
}
