//! Activity log.
//!
//! A bounded most-recent-first ring of entries, fed by lifecycle
//! events, failures, and significant sensor changes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::model::{Metric, SensorSnapshot};

/// Maximum entries retained.
pub const MAX_ENTRIES: usize = 10;

/// Metrics watched for significant changes.
const WATCHED: [Metric; 5] = [
    Metric::Temperature,
    Metric::Ph,
    Metric::Tds,
    Metric::Ec,
    Metric::Distance,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    System,
    Sensor,
    Error,
}

impl ActivitySource {
    pub fn label(&self) -> &'static str {
        match self {
            ActivitySource::System => "System",
            ActivitySource::Sensor => "Sensor",
            ActivitySource::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub source: ActivitySource,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded activity ring, newest entry first.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: ActivitySource, message: impl Into<String>) {
        self.entries.push_front(ActivityEntry {
            source,
            message: message.into(),
            at: Utc::now(),
        });
        self.entries.truncate(MAX_ENTRIES);
    }

    /// Record every significant change between two snapshots.
    pub fn record_changes(&mut self, previous: &SensorSnapshot, current: &SensorSnapshot) {
        for message in significant_changes(previous, current) {
            self.record(ActivitySource::Sensor, message);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a metric moved enough to be worth logging.
///
/// pH uses an absolute threshold; the rest use a 5% relative change. A
/// previous value of zero is always significant, which also keeps the
/// relative comparison away from dividing by zero.
pub fn is_significant_change(metric: Metric, old: f64, new: f64) -> bool {
    if metric == Metric::Ph {
        return (new - old).abs() >= 0.3;
    }
    if old == 0.0 {
        return new != 0.0;
    }
    ((new - old) / old).abs() >= 0.05
}

/// Log messages for every watched metric that changed significantly.
pub fn significant_changes(previous: &SensorSnapshot, current: &SensorSnapshot) -> Vec<String> {
    let mut messages = Vec::new();

    for metric in WATCHED {
        let (old, new) = match (previous.reading(metric), current.reading(metric)) {
            (Some(old), Some(new)) => (old.value, new.value),
            _ => continue,
        };

        if !is_significant_change(metric, old, new) {
            continue;
        }

        messages.push(format!(
            "{} changed from {}{} to {}{}",
            capitalize_first(metric.as_str()),
            round1(old),
            metric.unit(),
            round1(new),
            metric.unit(),
        ));
    }

    messages
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reading;

    fn snapshot_with(values: &[(Metric, f64)]) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::default();
        for (metric, value) in values {
            snapshot
                .readings
                .insert(*metric, Reading { value: *value, time: 0.0 });
        }
        snapshot
    }

    #[test]
    fn test_ph_uses_absolute_threshold() {
        assert!(is_significant_change(Metric::Ph, 6.0, 6.3));
        assert!(!is_significant_change(Metric::Ph, 6.0, 6.2));
    }

    #[test]
    fn test_relative_threshold() {
        assert!(is_significant_change(Metric::Tds, 200.0, 211.0));
        assert!(!is_significant_change(Metric::Tds, 200.0, 205.0));
    }

    #[test]
    fn test_zero_previous_value_is_always_significant() {
        assert!(is_significant_change(Metric::Ec, 0.0, 0.1));
        assert!(!is_significant_change(Metric::Ec, 0.0, 0.0));
    }

    #[test]
    fn test_change_message_format() {
        let previous = snapshot_with(&[(Metric::Tds, 200.0)]);
        let current = snapshot_with(&[(Metric::Tds, 250.0)]);

        let messages = significant_changes(&previous, &current);
        assert_eq!(messages, vec!["TDS changed from 200ppm to 250ppm".to_string()]);
    }

    #[test]
    fn test_unchanged_snapshot_produces_no_messages() {
        let snapshot = snapshot_with(&[(Metric::Temperature, 22.0), (Metric::Ph, 6.2)]);
        assert!(significant_changes(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_metric_missing_on_either_side_is_skipped() {
        let previous = snapshot_with(&[(Metric::Tds, 200.0)]);
        let current = snapshot_with(&[(Metric::Ec, 20.0)]);
        assert!(significant_changes(&previous, &current).is_empty());
    }

    #[test]
    fn test_log_is_bounded_and_newest_first() {
        let mut log = ActivityLog::new();
        for i in 0..15 {
            log.record(ActivitySource::System, format!("entry {}", i));
        }

        assert_eq!(log.len(), MAX_ENTRIES);
        let newest = log.entries().next().unwrap();
        assert_eq!(newest.message, "entry 14");
        let oldest = log.entries().last().unwrap();
        assert_eq!(oldest.message, "entry 5");
    }
}
