pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod heater;
pub mod output;
pub mod pid;
pub mod schedule;
pub mod sensor;
pub mod stir;
pub mod telemetry;
pub mod topics;
pub mod types;

pub use command::{Command, CommandEnvelope};
pub use config::{EngineConfig, PidSettings, RuntimeConfig};
pub use engine::{BrewEngine, EngineEvent};
pub use error::{CommandError, EngineError, EngineResult, SensorError};
pub use heater::{Heater, HeaterBank, MAX_HEATERS};
pub use output::{BurnWindow, OutputCapability, OutputDriver, OutputId};
pub use pid::{PidGains, PidRegulator};
pub use schedule::{
    CompiledPlan, ExecutionStep, MashSchedule, MashStep, Notification, NotificationTemplate,
    ScheduleRegistry,
};
pub use sensor::{SensorAggregator, SensorDriver, SensorSnapshot, TemperatureSensor, MAX_SENSORS};
pub use stir::{StirConfig, StirCycle};
pub use telemetry::{
    HistoryEntry, LogLevel, LogLine, NoopPublisher, Publisher, TelemetryRecord, TemperatureLog,
};
pub use topics::*;
pub use types::{
    display_round, CommandResult, ControlView, RunStatus, RunningSchedule, SensorTemperature,
    TelemetrySnapshot, TemperatureScale,
};
