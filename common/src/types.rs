use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schedule::{ExecutionStep, Notification};
use crate::telemetry::HistoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureScale {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureScale {
    pub fn boiling_point(self) -> f32 {
        match self {
            Self::Celsius => 100.0,
            Self::Fahrenheit => 212.0,
        }
    }

    /// Converts a raw Celsius reading into this scale.
    pub fn from_celsius(self, celsius: f32) -> f32 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Overtime,
    Finished,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Overtime => "Overtime",
            Self::Finished => "Finished",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Overtime)
    }
}

/// What the control loop exposes to the regulator and the command layer.
/// Written only by the control task.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlView {
    pub status: RunStatus,
    pub target_temperature: f32,
    pub manual_override_output: Option<u8>,
    pub is_boil_mode: bool,
    pub in_overtime: bool,
    pub current_step_index: usize,
    pub plan_version: u32,
}

impl ControlView {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningSchedule {
    pub version: u32,
    pub steps: Vec<ExecutionStep>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorTemperature {
    pub sensor: String,
    pub temp: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub temp: f32,
    pub temps: Vec<SensorTemperature>,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    pub output: u8,
    #[serde(rename = "manualOverrideOutput")]
    pub manual_override_output: Option<u8>,
    pub status: &'static str,
    #[serde(rename = "stirStatus")]
    pub stir_status: &'static str,
    #[serde(rename = "lastLogDateTime")]
    pub last_log_date_time: i64,
    #[serde(rename = "tempLog")]
    pub temp_log: Vec<HistoryEntry>,
    #[serde(rename = "runningVersion")]
    pub running_version: u32,
}

impl TelemetrySnapshot {
    pub fn sensor_temps(per_sensor: &BTreeMap<u64, f32>) -> Vec<SensorTemperature> {
        per_sensor
            .iter()
            .map(|(id, temp)| SensorTemperature {
                sensor: id.to_string(),
                temp: display_round(*temp),
            })
            .collect()
    }
}

/// Structured reply for every command; never carries raw internal errors.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub data: serde_json::Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            data,
            success: true,
            message: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(serde_json::Value::Null)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: serde_json::Value::Null,
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Truncates to one decimal for display.
pub fn display_round(value: f32) -> f32 {
    (value * 10.0).trunc() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boiling_point_follows_scale() {
        assert_eq!(TemperatureScale::Celsius.boiling_point(), 100.0);
        assert_eq!(TemperatureScale::Fahrenheit.boiling_point(), 212.0);
        assert_eq!(TemperatureScale::Fahrenheit.from_celsius(100.0), 212.0);
    }

    #[test]
    fn display_round_truncates() {
        assert_eq!(display_round(64.99), 64.9);
        assert_eq!(display_round(-1.25), -1.2);
    }

    #[test]
    fn failure_result_serializes_message() {
        let json = serde_json::to_value(CommandResult::failure("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "nope");

        let json = serde_json::to_value(CommandResult::ok_empty()).unwrap();
        assert!(json.get("message").is_none());
    }
}
