//! Lightweight section timer for the fixed-step driver.
//!
//! `UnitWorld` times each fixed update under the `"fixed_update"` section
//! when `SimConfig::profile` is set. Other sections can be added with
//! `record` or `time_section`. Summaries go out through `tracing`.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Accumulated timings for one named section.
#[derive(Debug, Default, Clone, Copy)]
pub struct SectionStats {
    pub total_time: Duration,
    pub call_count: u64,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
}

impl SectionStats {
    pub fn avg_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total_time.div_f64(self.call_count as f64)
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
        self.min_time = Some(self.min_time.map_or(elapsed, |m| m.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |m| m.max(elapsed)));
    }
}

/// One row of [`Profiler::summary`], in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
    pub name: String,
    pub calls: u64,
    pub total_us: f64,
    pub avg_us: f64,
    pub min_us: f64,
    pub max_us: f64,
    /// Share of all profiled time, 0..=100.
    pub percent: f64,
}

#[derive(Debug, Default)]
pub struct Profiler {
    sections: HashMap<String, SectionStats>,
    tick_count: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an externally measured duration.
    pub fn record(&mut self, name: &str, elapsed: Duration) {
        match self.sections.get_mut(name) {
            Some(stats) => stats.record(elapsed),
            None => {
                let mut stats = SectionStats::default();
                stats.record(elapsed);
                self.sections.insert(name.to_string(), stats);
            }
        }
    }

    /// Time a section using a closure.
    pub fn time_section<F, R>(&mut self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(name, start.elapsed());
        result
    }

    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn get_section(&self, name: &str) -> Option<&SectionStats> {
        self.sections.get(name)
    }

    /// Sections sorted by total time, most expensive first.
    pub fn summary(&self) -> Vec<SectionSummary> {
        let total: Duration = self.sections.values().map(|s| s.total_time).sum();
        let micros = |d: Duration| d.as_secs_f64() * 1e6;

        let mut rows: Vec<SectionSummary> = self
            .sections
            .iter()
            .map(|(name, stats)| SectionSummary {
                name: name.clone(),
                calls: stats.call_count,
                total_us: micros(stats.total_time),
                avg_us: micros(stats.avg_time()),
                min_us: micros(stats.min_time.unwrap_or(Duration::ZERO)),
                max_us: micros(stats.max_time.unwrap_or(Duration::ZERO)),
                percent: if total.is_zero() {
                    0.0
                } else {
                    stats.total_time.as_secs_f64() / total.as_secs_f64() * 100.0
                },
            })
            .collect();
        rows.sort_by(|a, b| b.total_us.total_cmp(&a.total_us).then_with(|| a.name.cmp(&b.name)));
        rows
    }

    /// Emit the summary at info level, one event per section.
    pub fn log_summary(&self) {
        tracing::info!(ticks = self.tick_count, sections = self.sections.len(), "profiler summary");
        for row in self.summary() {
            tracing::info!(
                section = %row.name,
                calls = row.calls,
                avg_us = format_args!("{:.1}", row.avg_us),
                max_us = format_args!("{:.1}", row.max_us),
                percent = format_args!("{:.1}", row.percent),
                "profiled section"
            );
        }
    }

    pub fn reset(&mut self) {
        self.sections.clear();
        self.tick_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_profiler_basic() {
        let mut profiler = Profiler::new();
        let value = profiler.time_section("test_section", || {
            sleep(Duration::from_millis(10));
            7
        });
        profiler.tick();

        assert_eq!(value, 7);
        let stats = profiler.get_section("test_section").unwrap();
        assert!(stats.total_time >= Duration::from_millis(10));
        assert_eq!(stats.call_count, 1);
        assert_eq!(profiler.tick_count(), 1);
    }

    #[test]
    fn test_summary_sorted_by_cost() {
        let mut profiler = Profiler::new();
        for _ in 0..3 {
            profiler.record("fast", Duration::from_micros(10));
            profiler.record("slow", Duration::from_micros(90));
        }

        let summary = profiler.summary();
        assert_eq!(summary[0].name, "slow");
        assert_eq!(summary[0].calls, 3);
        assert!((summary[0].percent - 90.0).abs() < 1e-6);
        assert!((summary[1].avg_us - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut profiler = Profiler::new();
        profiler.record("a", Duration::from_millis(1));
        profiler.tick();
        profiler.reset();
        assert!(profiler.summary().is_empty());
        assert_eq!(profiler.tick_count(), 0);
    }
}
