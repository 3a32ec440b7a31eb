use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::PidSettings;
use crate::error::CommandError;
use crate::heater::Heater;
use crate::schedule::MashSchedule;
use crate::sensor::TemperatureSensor;
use crate::stir::StirConfig;

/// Raw `{command, data}` request as received by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Data { last_date: Option<i64> },
    GetRunningSchedule,
    SetTemp { target_temperature: f32 },
    SetOverrideOutput { output: Option<i64> },
    Start { schedule: Option<String> },
    StartStir(StirConfig),
    Stop,
    StopStir,
    GetMashSchedules,
    SaveMashSchedule(MashSchedule),
    DeleteMashSchedule { name: String },
    GetPidSettings,
    SavePidSettings(PidSettings),
    GetTempSettings,
    SaveTempSettings(Vec<TemperatureSensor>),
    GetHeaterSettings,
    SaveHeaterSettings(Vec<Heater>),
}

#[derive(Debug, Default, Deserialize)]
struct DataRequest {
    #[serde(rename = "lastDate", default)]
    last_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SetTempRequest {
    #[serde(rename = "targetTemp")]
    target_temp: f32,
}

#[derive(Debug, Default, Deserialize)]
struct OverrideRequest {
    #[serde(default)]
    output: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(rename = "selectedMashSchedule", default)]
    selected_mash_schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    name: String,
}

fn payload<T: DeserializeOwned>(command: &'static str, data: Value) -> Result<T, CommandError> {
    serde_json::from_value(data).map_err(|err| CommandError::InvalidPayload {
        command,
        reason: err.to_string(),
    })
}

/// Like [`payload`], but a missing `data` yields the default request.
fn optional_payload<T: DeserializeOwned + Default>(
    command: &'static str,
    data: Value,
) -> Result<T, CommandError> {
    if data.is_null() {
        return Ok(T::default());
    }
    payload(command, data)
}

impl Command {
    pub fn parse(envelope: CommandEnvelope) -> Result<Self, CommandError> {
        let CommandEnvelope { command, data } = envelope;

        let parsed = match command.as_str() {
            "Data" => {
                let request: DataRequest = optional_payload("Data", data)?;
                Self::Data {
                    last_date: request.last_date,
                }
            }
            "GetRunningSchedule" => Self::GetRunningSchedule,
            "SetTemp" => {
                let request: SetTempRequest = payload("SetTemp", data)?;
                Self::SetTemp {
                    target_temperature: request.target_temp,
                }
            }
            "SetOverrideOutput" => {
                let request: OverrideRequest = optional_payload("SetOverrideOutput", data)?;
                Self::SetOverrideOutput {
                    output: request.output,
                }
            }
            "Start" => {
                let request: StartRequest = optional_payload("Start", data)?;
                Self::Start {
                    schedule: request
                        .selected_mash_schedule
                        .filter(|name| !name.is_empty()),
                }
            }
            "StartStir" => Self::StartStir(optional_payload("StartStir", data)?),
            "Stop" => Self::Stop,
            "StopStir" => Self::StopStir,
            "GetMashSchedules" => Self::GetMashSchedules,
            "SaveMashSchedule" => Self::SaveMashSchedule(payload("SaveMashSchedule", data)?),
            "DeleteMashSchedule" => {
                let request: DeleteRequest = payload("DeleteMashSchedule", data)?;
                Self::DeleteMashSchedule { name: request.name }
            }
            "GetPIDSettings" => Self::GetPidSettings,
            "SavePIDSettings" => Self::SavePidSettings(payload("SavePIDSettings", data)?),
            "GetTempSettings" => Self::GetTempSettings,
            "SaveTempSettings" => Self::SaveTempSettings(payload("SaveTempSettings", data)?),
            "GetHeaterSettings" => Self::GetHeaterSettings,
            "SaveHeaterSettings" => {
                Self::SaveHeaterSettings(payload("SaveHeaterSettings", data)?)
            }
            _ => return Err(CommandError::Unknown(command)),
        };

        Ok(parsed)
    }

    pub fn from_json(body: &str) -> Result<Self, CommandError> {
        let envelope: CommandEnvelope =
            serde_json::from_str(body).map_err(|err| CommandError::InvalidPayload {
                command: "envelope",
                reason: err.to_string(),
            })?;
        Self::parse(envelope)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data { .. } => "Data",
            Self::GetRunningSchedule => "GetRunningSchedule",
            Self::SetTemp { .. } => "SetTemp",
            Self::SetOverrideOutput { .. } => "SetOverrideOutput",
            Self::Start { .. } => "Start",
            Self::StartStir(_) => "StartStir",
            Self::Stop => "Stop",
            Self::StopStir => "StopStir",
            Self::GetMashSchedules => "GetMashSchedules",
            Self::SaveMashSchedule(_) => "SaveMashSchedule",
            Self::DeleteMashSchedule { .. } => "DeleteMashSchedule",
            Self::GetPidSettings => "GetPIDSettings",
            Self::SavePidSettings(_) => "SavePIDSettings",
            Self::GetTempSettings => "GetTempSettings",
            Self::SaveTempSettings(_) => "SaveTempSettings",
            Self::GetHeaterSettings => "GetHeaterSettings",
            Self::SaveHeaterSettings(_) => "SaveHeaterSettings",
        }
    }
}
