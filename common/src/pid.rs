//! Positional PID regulator producing a clamped output percentage.
//!
//! Must be driven on a fixed cadence matching the configured loop time; the
//! integral and derivative terms assume one call per loop.

use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone)]
pub struct PidRegulator {
    gains: PidGains,
    min: f64,
    max: f64,
    integral: f64,
    previous_error: f64,
    first_run: bool,
}

impl PidRegulator {
    pub fn new(gains: PidGains, min: f64, max: f64) -> EngineResult<Self> {
        if gains.kp == 0.0 || gains.ki == 0.0 || gains.kd == 0.0 {
            return Err(EngineError::InvalidGains);
        }

        Ok(Self {
            gains,
            min,
            max,
            integral: 0.0,
            previous_error: 0.0,
            first_run: true,
        })
    }

    /// Regulator bounded to a 0-100 % output.
    pub fn percent(gains: PidGains) -> EngineResult<Self> {
        Self::new(gains, 0.0, 100.0)
    }

    pub fn output(&mut self, actual: f64, setpoint: f64) -> f64 {
        let error = setpoint - actual;
        let p = self.gains.kp * error;

        let (i, d) = if self.first_run {
            (0.0, 0.0)
        } else {
            self.integral = (self.integral + error).clamp(self.min, self.max);
            // Trapezoidal half step.
            let i = (self.gains.ki * (self.integral / 2.0)).clamp(self.min, self.max);
            let d = self.gains.kd * (error - self.previous_error);
            (i, d)
        };

        self.previous_error = error;
        self.first_run = false;

        let output = (p + i + d).clamp(self.min, self.max);
        debug!("p:{p:.3} i:{i:.3} d:{d:.3} output:{output:.3}");
        output
    }
}
