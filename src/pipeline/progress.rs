//! Batch progress
//!
//! The indicatif bar is for interactive terminals. `[PROGRESS]` log lines
//! cover redirected and JSON runs, emitted every quarter of a batch or every
//! 30 seconds on long batches, whichever comes first.

use crate::ConversionResult;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

const LOG_INTERVAL: Duration = Duration::from_secs(30);
const LOG_STEP_PERCENT: f64 = 25.0;

/// Per-batch conversion counters behind the `[PROGRESS]` lines
#[derive(Debug, Clone)]
pub struct ProgressState {
    batch: u64,
    total: u64,
    converted: u64,
    failed: u64,
    started: Instant,
    last_logged: Instant,
    last_logged_percent: f64,
    interval: Duration,
    step_percent: f64,
}

impl ProgressState {
    /// Tracker for `total` items of batch `batch`
    pub fn for_batch(batch: u64, total: u64) -> Self {
        let now = Instant::now();
        Self {
            batch,
            total,
            converted: 0,
            failed: 0,
            started: now,
            last_logged: now,
            last_logged_percent: 0.0,
            interval: LOG_INTERVAL,
            step_percent: LOG_STEP_PERCENT,
        }
    }

    /// Override how often lines are due
    pub fn with_cadence(mut self, interval: Duration, step_percent: f64) -> Self {
        self.interval = interval;
        self.step_percent = step_percent;
        self
    }

    /// Count a finished item; returns the log line if one is due
    pub fn record(&mut self, result: &ConversionResult) -> Option<String> {
        self.converted += 1;
        if !result.is_success() {
            self.failed += 1;
        }

        let percent = self.percent();
        let stepped = percent - self.last_logged_percent >= self.step_percent;
        let stale = self.last_logged.elapsed() >= self.interval;
        if !(stepped || stale) {
            return None;
        }
        self.last_logged = Instant::now();
        self.last_logged_percent = percent;
        Some(self.line())
    }

    /// Items finished, failures included
    pub fn converted(&self) -> u64 {
        self.converted
    }

    /// Items that failed
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Share of the batch finished, 0-100
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.converted as f64 * 100.0 / self.total as f64
    }

    /// Items per second since the batch started
    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.converted as f64 / secs
        } else {
            0.0
        }
    }

    /// Time left at the current rate; `None` when done or no rate yet
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.total.saturating_sub(self.converted);
        let rate = self.rate();
        (left > 0 && rate > 0.0).then(|| Duration::from_secs_f64(left as f64 / rate))
    }

    /// `[PROGRESS] batch 3: 4/10 items (1 failed), 40.0% at 2.1 items/sec, ~3s left`
    pub fn line(&self) -> String {
        let mut line = format!(
            "[PROGRESS] batch {}: {}/{} items",
            self.batch, self.converted, self.total
        );
        if self.failed > 0 {
            line.push_str(&format!(" ({} failed)", self.failed));
        }
        line.push_str(&format!(", {:.1}%", self.percent()));
        let rate = self.rate();
        if rate > 0.0 {
            line.push_str(&format!(" at {rate:.1} items/sec"));
        }
        if let Some(left) = self.remaining() {
            line.push_str(&format!(", ~{} left", format_duration(left)));
        }
        line
    }
}

/// Bar over the items of one batch; hidden when `visible` is false
pub fn create_progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>10} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} items")
            .expect("hardcoded template is valid")
            .progress_chars("=> "),
    );
    bar
}

/// `42s`, `7m05s`, `2h10m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
