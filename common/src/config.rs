use serde::{Deserialize, Serialize};

use crate::pid::PidGains;
use crate::types::TemperatureScale;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "stepIntervalSeconds")]
    pub step_interval_secs: u32,
    #[serde(rename = "temperatureScale")]
    pub temperature_scale: TemperatureScale,
    #[serde(rename = "buzzerSeconds")]
    pub buzzer_secs: u16,
    #[serde(rename = "historySampleEvery")]
    pub history_sample_every: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_interval_secs: 60,
            temperature_scale: TemperatureScale::Celsius,
            buzzer_secs: 2,
            history_sample_every: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PidSettings {
    #[serde(rename = "kP")]
    pub kp: f64,
    #[serde(rename = "kI")]
    pub ki: f64,
    #[serde(rename = "kD")]
    pub kd: f64,
    #[serde(rename = "boilkP")]
    pub boil_kp: f64,
    #[serde(rename = "boilkI")]
    pub boil_ki: f64,
    #[serde(rename = "boilkD")]
    pub boil_kd: f64,
    #[serde(rename = "pidLoopTime")]
    pub loop_time_secs: u16,
    #[serde(rename = "stepInterval")]
    pub step_interval_secs: u16,
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 1.0,
            kd: 10.0,
            boil_kp: 10.0,
            boil_ki: 1.0,
            boil_kd: 10.0,
            loop_time_secs: 60,
            step_interval_secs: 60,
        }
    }
}

impl PidSettings {
    pub fn gains(&self) -> PidGains {
        PidGains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }

    pub fn boil_gains(&self) -> PidGains {
        PidGains {
            kp: self.boil_kp,
            ki: self.boil_ki,
            kd: self.boil_kd,
        }
    }

    pub fn gains_for(&self, boil: bool) -> PidGains {
        if boil {
            self.boil_gains()
        } else {
            self.gains()
        }
    }

    pub fn sanitize(&mut self) {
        self.loop_time_secs = self.loop_time_secs.clamp(10, 600);
        self.step_interval_secs = self.step_interval_secs.clamp(10, 600);

        // Gains are kept in tenths.
        for gain in [
            &mut self.kp,
            &mut self.ki,
            &mut self.kd,
            &mut self.boil_kp,
            &mut self.boil_ki,
            &mut self.boil_kd,
        ] {
            *gain = (*gain * 10.0).trunc() / 10.0;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub pid: PidSettings,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.pid.sanitize();
        self.engine.step_interval_secs = u32::from(self.pid.step_interval_secs);
        self.engine.history_sample_every = self.engine.history_sample_every.max(1);
    }
}
