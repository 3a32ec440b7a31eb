use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Schedule with name: {0} not found")]
    ScheduleNotFound(String),

    #[error("Steps not available anymore (index={index}, len={len})")]
    StepsUnavailable { index: usize, len: usize },

    #[error("kP, kI and kD must all be non-zero")]
    InvalidGains,

    #[error("Heater settings cannot be changed while a program is running")]
    HeatersLocked,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Failures reported by a sensor driver for a single sensor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("temperature conversion failed")]
    ConversionFailed,

    #[error("temperature read failed")]
    ReadFailed,

    #[error("sensor not connected")]
    NotConnected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Incorrect data for {command}: {reason}")]
    InvalidPayload {
        command: &'static str,
        reason: String,
    },
}
