use std::collections::BTreeMap;

use tracing::debug;

use crate::heater::Heater;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputId {
    Heater(u8),
    Stir,
    Buzzer,
}

/// Physical digital outputs (GPIO or equivalent).
pub trait OutputCapability: Send + Sync {
    fn set_level(&self, output: OutputId, on: bool);
}

/// One regulator window: which heater is on during which second.
#[derive(Debug, Clone, PartialEq)]
pub struct BurnWindow {
    loop_time_secs: u16,
    burn_until: Vec<(u8, u16)>,
}

impl BurnWindow {
    pub fn new(heaters: &[Heater], loop_time_secs: u16) -> Self {
        let burn_until = heaters
            .iter()
            .filter(|heater| heater.enabled_for_current_mode)
            .map(|heater| {
                let seconds =
                    (f64::from(heater.burn_fraction) / 100.0 * f64::from(loop_time_secs)).round();
                (heater.id, seconds as u16)
            })
            .collect();

        Self {
            loop_time_secs,
            burn_until,
        }
    }

    pub fn loop_time_secs(&self) -> u16 {
        self.loop_time_secs
    }

    /// Engaged state of each enabled heater during `second` of the window.
    pub fn engaged_at(&self, second: u16) -> Vec<(u8, bool)> {
        self.burn_until
            .iter()
            .map(|(id, until)| (*id, *until > second))
            .collect()
    }
}

/// Applies desired levels, touching an output only when its level changes.
#[derive(Debug, Default)]
pub struct OutputDriver {
    levels: BTreeMap<OutputId, bool>,
}

impl OutputDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, capability: &dyn OutputCapability, output: OutputId, on: bool) -> bool {
        if self.levels.get(&output) == Some(&on) {
            return false;
        }
        debug!("{output:?}: {}", if on { "On" } else { "Off" });
        capability.set_level(output, on);
        self.levels.insert(output, on);
        true
    }

    pub fn apply_heaters(&mut self, capability: &dyn OutputCapability, engaged: &[(u8, bool)]) {
        for (id, on) in engaged {
            self.apply(capability, OutputId::Heater(*id), *on);
        }
    }

    /// Forces every known heater output off.
    pub fn all_heaters_off(&mut self, capability: &dyn OutputCapability) {
        let heaters: Vec<OutputId> = self
            .levels
            .keys()
            .copied()
            .filter(|output| matches!(output, OutputId::Heater(_)))
            .collect();
        for output in heaters {
            self.apply(capability, output, false);
        }
    }
}
