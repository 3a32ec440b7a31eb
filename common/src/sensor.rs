use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SensorError;
use crate::types::TemperatureScale;

pub const MAX_SENSORS: usize = 10;

/// Access to the temperature probes on the bus. Implementations enforce
/// their own bounded timeouts.
pub trait SensorDriver: Send {
    fn trigger_conversion(&mut self, sensor_id: u64) -> Result<(), SensorError>;

    /// Raw reading in degrees Celsius.
    fn read_temperature(&mut self, sensor_id: u64) -> Result<f32, SensorError>;
}

fn default_true() -> bool {
    true
}

fn default_color() -> String {
    "#ffffff".to_string()
}

fn default_factor() -> f32 {
    1.0
}

// Sensor ids are 64-bit bus addresses; the wire carries them as strings.
mod id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(id) => Ok(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemperatureSensor {
    #[serde(with = "id_string")]
    pub id: u64,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "useForControl", default = "default_true")]
    pub use_for_control: bool,
    #[serde(default = "default_true")]
    pub show: bool,
    #[serde(rename = "compensateAdditive", alias = "offset", default)]
    pub compensate_additive: f32,
    #[serde(rename = "compensateMultiplicative", default = "default_factor")]
    pub compensate_multiplicative: f32,
    #[serde(default, skip_deserializing)]
    pub connected: bool,
    #[serde(rename = "lastTemp", default, skip_deserializing)]
    pub last_reading: Option<f32>,
}

impl TemperatureSensor {
    pub fn detected(id: u64) -> Self {
        Self {
            id,
            name: id.to_string(),
            color: default_color(),
            enabled: true,
            use_for_control: true,
            show: true,
            compensate_additive: 0.0,
            compensate_multiplicative: 1.0,
            connected: true,
            last_reading: None,
        }
    }

    fn compensate(&self, value: f32) -> f32 {
        let value = value + self.compensate_additive;
        if self.compensate_multiplicative == 1.0 {
            value
        } else {
            value * self.compensate_multiplicative
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.last_reading = None;
    }
}

/// Result of one read pass over all sensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    /// Control average; the last valid one is held when no sensor delivered.
    pub average: Option<f32>,
    /// True when `average` was computed in this pass.
    pub fresh: bool,
    /// Readings of displayable sensors, keyed by sensor id.
    pub per_sensor: BTreeMap<u64, f32>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorAggregator {
    sensors: BTreeMap<u64, TemperatureSensor>,
    scale: TemperatureScale,
    last_average: Option<f32>,
}

impl SensorAggregator {
    pub fn new(sensors: Vec<TemperatureSensor>, scale: TemperatureScale) -> Self {
        let mut aggregator = Self {
            sensors: BTreeMap::new(),
            scale,
            last_average: None,
        };
        for sensor in sensors.into_iter().take(MAX_SENSORS) {
            aggregator.sensors.insert(sensor.id, sensor);
        }
        aggregator
    }

    pub fn sensors(&self) -> Vec<TemperatureSensor> {
        self.sensors.values().cloned().collect()
    }

    /// Marks sensors found on the bus as connected, adding unknown ones.
    pub fn register_detected(&mut self, ids: &[u64]) {
        for id in ids {
            if let Some(sensor) = self.sensors.get_mut(id) {
                info!("existing sensor {id} connected");
                sensor.connected = true;
            } else if self.sensors.len() >= MAX_SENSORS {
                warn!("max sensor count reached, ignoring sensor {id}");
            } else {
                info!("new sensor {id} connected");
                self.sensors.insert(*id, TemperatureSensor::detected(*id));
            }
        }
    }

    /// Updates known sensors from `settings` and drops the ones not listed.
    pub fn apply_settings(&mut self, settings: Vec<TemperatureSensor>) {
        let listed: Vec<u64> = settings.iter().map(|sensor| sensor.id).collect();

        for update in settings {
            let Some(sensor) = self.sensors.get_mut(&update.id) else {
                debug!("sensor {} no longer exists, ignoring", update.id);
                continue;
            };
            sensor.name = update.name;
            sensor.color = update.color;
            sensor.enabled = update.enabled;
            sensor.use_for_control = update.use_for_control;
            sensor.show = update.show;
            sensor.compensate_additive = update.compensate_additive;
            sensor.compensate_multiplicative = update.compensate_multiplicative;
        }

        self.sensors.retain(|id, _| {
            let keep = listed.contains(id);
            if !keep {
                info!("erasing sensor {id}");
            }
            keep
        });
    }

    pub fn read_all(&mut self, driver: &mut dyn SensorDriver) -> SensorSnapshot {
        let mut sum = 0.0f32;
        let mut count = 0u32;
        let mut per_sensor = BTreeMap::new();

        for (id, sensor) in self.sensors.iter_mut() {
            if !sensor.enabled || !sensor.connected {
                continue;
            }

            let raw = driver
                .trigger_conversion(*id)
                .and_then(|()| driver.read_temperature(*id));

            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("error reading from [{id}] ({err}), disabling sensor");
                    sensor.disconnect();
                    continue;
                }
            };

            let reading = sensor.compensate(self.scale.from_celsius(raw));
            sensor.last_reading = Some(reading);
            debug!("temperature read from [{id}]: {reading:.2}");

            if sensor.use_for_control {
                sum += reading;
                count += 1;
            }
            if sensor.show {
                per_sensor.insert(*id, reading);
            }
        }

        let fresh = count > 0;
        if fresh {
            self.last_average = Some(sum / count as f32);
        } else {
            debug!("no control sensor delivered, holding last average");
        }

        SensorSnapshot {
            average: self.last_average,
            fresh,
            per_sensor,
        }
    }
}
