use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StirConfig {
    /// Cycle length in minutes.
    #[serde(rename = "max")]
    pub time_span: u16,
    #[serde(rename = "intervalStart")]
    pub interval_start: u16,
    #[serde(rename = "intervalStop")]
    pub interval_stop: u16,
}

impl Default for StirConfig {
    fn default() -> Self {
        Self {
            time_span: 10,
            interval_start: 0,
            interval_stop: 5,
        }
    }
}

/// Repeating on/off window for the agitator.
#[derive(Debug, Clone)]
pub struct StirCycle {
    config: StirConfig,
    cycle_start: DateTime<Utc>,
}

impl StirCycle {
    pub fn new(config: StirConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            cycle_start: now,
        }
    }

    pub fn is_always_on(&self) -> bool {
        self.config.interval_start == 0 && self.config.interval_stop == self.config.time_span
    }

    /// Desired stir level at `now`; rolls the cycle forward once it has elapsed.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_always_on() {
            return true;
        }

        let minutes = |m: u16| Duration::minutes(i64::from(m));
        let start = self.cycle_start + minutes(self.config.interval_start);
        let stop = self.cycle_start + minutes(self.config.interval_stop);
        let cycle_end = self.cycle_start + minutes(self.config.time_span);

        let on = now >= start && now <= stop;

        if now >= cycle_end {
            self.cycle_start = cycle_end;
        }

        on
    }
}
