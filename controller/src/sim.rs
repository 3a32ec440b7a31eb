//! Simulated kettle used when running on a host without probes or relays.
//!
//! Heater outputs feed a crude thermal model that the simulated probes read
//! back, so a run visibly ramps and holds.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use brewengine_common::{OutputCapability, OutputId, SensorDriver, SensorError};

const AMBIENT_C: f32 = 20.0;
const HEAT_PER_HEATER_C: f32 = 0.08;
const LOSS_FACTOR: f32 = 0.0008;

pub const SIM_SENSOR_IDS: [u64; 2] = [0x28ff_4a1b_0016_03a1, 0x28ff_9c3e_0016_0412];

#[derive(Debug)]
struct KettleState {
    temperature: f32,
    heaters_on: BTreeSet<u8>,
}

#[derive(Debug, Clone)]
pub struct SimKettle {
    state: Arc<Mutex<KettleState>>,
}

impl Default for SimKettle {
    fn default() -> Self {
        Self::new(AMBIENT_C)
    }
}

impl SimKettle {
    pub fn new(temperature: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(KettleState {
                temperature,
                heaters_on: BTreeSet::new(),
            })),
        }
    }

    /// Sensor ids visible on the simulated bus.
    pub fn detect(&self) -> Vec<u64> {
        SIM_SENSOR_IDS.to_vec()
    }

    pub fn probes(&self) -> SimProbes {
        SimProbes {
            kettle: self.clone(),
        }
    }

    pub fn outputs(&self) -> SimOutputs {
        SimOutputs {
            kettle: self.clone(),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut KettleState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

pub struct SimProbes {
    kettle: SimKettle,
}

impl SensorDriver for SimProbes {
    fn trigger_conversion(&mut self, sensor_id: u64) -> Result<(), SensorError> {
        if !SIM_SENSOR_IDS.contains(&sensor_id) {
            return Err(SensorError::NotConnected);
        }

        // One conversion per probe per second advances the model by half a second.
        self.kettle.with_state(|state| {
            let heating = state.heaters_on.len() as f32 * HEAT_PER_HEATER_C / 2.0;
            let loss = (state.temperature - AMBIENT_C) * LOSS_FACTOR / 2.0;
            state.temperature += heating - loss;
        });
        Ok(())
    }

    fn read_temperature(&mut self, sensor_id: u64) -> Result<f32, SensorError> {
        let position = SIM_SENSOR_IDS
            .iter()
            .position(|id| *id == sensor_id)
            .ok_or(SensorError::NotConnected)?;

        // The bottom probe sits closer to the elements.
        let offset = if position == 0 { 0.3 } else { -0.2 };
        Ok(self.kettle.with_state(|state| state.temperature + offset))
    }
}

pub struct SimOutputs {
    kettle: SimKettle,
}

impl OutputCapability for SimOutputs {
    fn set_level(&self, output: OutputId, on: bool) {
        debug!("gpio {output:?} -> {}", if on { "high" } else { "low" });
        if let OutputId::Heater(id) = output {
            self.kettle.with_state(|state| {
                if on {
                    state.heaters_on.insert(id);
                } else {
                    state.heaters_on.remove(&id);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heaters_warm_the_kettle() {
        let kettle = SimKettle::new(60.0);
        let mut probes = kettle.probes();
        let outputs = kettle.outputs();

        outputs.set_level(OutputId::Heater(1), true);
        for _ in 0..10 {
            probes.trigger_conversion(SIM_SENSOR_IDS[1]).unwrap();
        }
        let warmed = probes.read_temperature(SIM_SENSOR_IDS[1]).unwrap();
        assert!(warmed > 59.8);

        outputs.set_level(OutputId::Heater(1), false);
        for _ in 0..10 {
            probes.trigger_conversion(SIM_SENSOR_IDS[1]).unwrap();
        }
        assert!(probes.read_temperature(SIM_SENSOR_IDS[1]).unwrap() < warmed);
    }

    #[test]
    fn unknown_probe_is_not_connected() {
        let mut probes = SimKettle::default().probes();
        assert_eq!(probes.trigger_conversion(7), Err(SensorError::NotConnected));
        assert_eq!(probes.read_temperature(7), Err(SensorError::NotConnected));
    }
}
