use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Epoch seconds.
    pub time: i64,
    pub temp: i32,
}

/// Sampled control temperatures of the current run.
#[derive(Debug, Clone)]
pub struct TemperatureLog {
    entries: Vec<HistoryEntry>,
    sample_every: u32,
    ticks: u32,
}

impl TemperatureLog {
    pub fn new(sample_every: u32) -> Self {
        Self {
            entries: Vec::new(),
            sample_every: sample_every.max(1),
            ticks: 0,
        }
    }

    /// Counts a control tick and records the truncated temperature on every
    /// Nth tick when it differs from the last recorded one.
    pub fn record(&mut self, now: DateTime<Utc>, temperature: f32) -> bool {
        self.ticks += 1;
        if self.ticks < self.sample_every {
            return false;
        }
        self.ticks = 0;

        let temp = temperature.trunc() as i32;
        if self.entries.last().is_some_and(|last| last.temp == temp) {
            return false;
        }

        self.entries.push(HistoryEntry {
            time: now.timestamp(),
            temp,
        });
        true
    }

    /// Entries newer than `last_date`, newest first. `None` returns all.
    pub fn since(&self, last_date: Option<i64>) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .take_while(|entry| last_date.map_or(true, |last| entry.time > last))
            .copied()
            .collect()
    }

    pub fn last_time(&self) -> i64 {
        self.entries.last().map_or(0, |entry| entry.time)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One history point published per control tick while running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub time: i64,
    pub temp: f32,
    pub target: f32,
    pub output: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub time: i64,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(now: DateTime<Utc>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: now.timestamp(),
            level,
            message: message.into(),
        }
    }
}

/// Optional sink for telemetry; must not block the caller.
pub trait Publisher: Send + Sync {
    fn publish_record(&self, record: &TelemetryRecord);
    fn publish_log(&self, line: &LogLine);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish_record(&self, _record: &TelemetryRecord) {}

    fn publish_log(&self, _line: &LogLine) {}
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(second: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(second)
    }

    #[test]
    fn samples_every_nth_tick() {
        let mut log = TemperatureLog::new(5);
        for second in 0..4 {
            assert!(!log.record(at(second), 60.0 + second as f32));
        }
        assert!(log.record(at(4), 64.7));
        assert_eq!(
            log.since(None),
            vec![HistoryEntry {
                time: at(4).timestamp(),
                temp: 64
            }]
        );
    }

    #[test]
    fn skips_unchanged_temperature() {
        let mut log = TemperatureLog::new(1);
        assert!(log.record(at(0), 64.2));
        assert!(!log.record(at(1), 64.9));
        assert!(log.record(at(2), 65.0));
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_time(), at(2).timestamp());
    }

    #[test]
    fn increments_are_newest_first() {
        let mut log = TemperatureLog::new(1);
        for (second, temp) in [(0, 60.0), (10, 61.0), (20, 62.0)] {
            log.record(at(second), temp);
        }

        let increment: Vec<i32> = log
            .since(Some(at(0).timestamp()))
            .iter()
            .map(|entry| entry.temp)
            .collect();
        assert_eq!(increment, vec![62, 61]);
        assert!(log.since(Some(at(20).timestamp())).is_empty());
    }

    #[test]
    fn log_line_serializes_lowercase_level() {
        let line = LogLine::new(at(0), LogLevel::Warn, "overtime");
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["message"], "overtime");
    }
}
