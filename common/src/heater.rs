use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MAX_HEATERS: usize = 10;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heater {
    pub id: u8,
    pub name: String,
    /// Ascending: lower values are engaged first.
    #[serde(rename = "preference")]
    pub priority: u8,
    #[serde(rename = "watt", default)]
    pub wattage_rating: u16,
    #[serde(rename = "useForMash", default = "default_true")]
    pub usable_for_mash: bool,
    #[serde(rename = "useForBoil", default = "default_true")]
    pub usable_for_boil: bool,
    #[serde(skip)]
    pub enabled_for_current_mode: bool,
    /// Share of the regulator window this heater is on, 0-100.
    #[serde(skip)]
    pub burn_fraction: u8,
}

impl Heater {
    pub fn new(id: u8, name: &str, priority: u8, wattage_rating: u16) -> Self {
        Self {
            id,
            name: name.to_string(),
            priority,
            wattage_rating,
            usable_for_mash: true,
            usable_for_boil: true,
            enabled_for_current_mode: false,
            burn_fraction: 0,
        }
    }
}

/// Priority-ordered set of at most [`MAX_HEATERS`] heaters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaterBank {
    heaters: Vec<Heater>,
}

impl HeaterBank {
    pub fn new(mut heaters: Vec<Heater>) -> Self {
        if heaters.len() > MAX_HEATERS {
            warn!(
                "{} heaters configured, only the first {MAX_HEATERS} are used",
                heaters.len()
            );
            heaters.truncate(MAX_HEATERS);
        }
        heaters.sort_by_key(|heater| heater.priority);
        Self { heaters }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![
            Heater::new(1, "Heater 1", 1, 1500),
            Heater::new(2, "Heater 2", 2, 1500),
        ])
    }

    pub fn heaters(&self) -> &[Heater] {
        &self.heaters
    }

    pub fn set_mode(&mut self, boil: bool) {
        for heater in &mut self.heaters {
            heater.enabled_for_current_mode = if boil {
                heater.usable_for_boil
            } else {
                heater.usable_for_mash
            };
        }
    }

    /// Distributes `output_percent` of the enabled wattage over the heaters
    /// in priority order and stores each heater's burn fraction.
    pub fn allocate(&mut self, output_percent: u8) {
        let total_wattage: u32 = self
            .heaters
            .iter()
            .filter(|heater| heater.enabled_for_current_mode)
            .map(|heater| u32::from(heater.wattage_rating))
            .sum();

        // Integer watts: the per-percent share is truncated before scaling.
        let output_watt = (total_wattage / 100) * u32::from(output_percent.min(100));
        let mut remaining = i64::from(output_watt);

        for heater in &mut self.heaters {
            if !heater.enabled_for_current_mode || remaining <= 0 {
                heater.burn_fraction = 0;
                continue;
            }

            let watt = i64::from(heater.wattage_rating);
            if watt > remaining {
                heater.burn_fraction = (remaining as f64 / watt as f64 * 100.0).round() as u8;
                remaining = 0;
            } else {
                heater.burn_fraction = 100;
                remaining -= watt;
            }
            debug!("heater {} burn {}%", heater.id, heater.burn_fraction);
        }
    }

    pub fn clear(&mut self) {
        for heater in &mut self.heaters {
            heater.burn_fraction = 0;
        }
    }
}
