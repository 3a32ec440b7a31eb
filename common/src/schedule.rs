use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Offset of a jump step (no ramp) from the previous cursor.
pub const JUMP_STEP_SECONDS: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MashStep {
    pub index: u32,
    pub name: String,
    pub temperature: i32,
    /// Ramp duration; 0 jumps straight to the target.
    #[serde(rename = "stepTime")]
    pub ramp_minutes: u32,
    #[serde(rename = "time")]
    pub hold_minutes: u32,
    #[serde(rename = "extendStepTimeIfNeeded")]
    pub extend_if_needed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationTemplate {
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "timeFromStart")]
    pub minutes_from_start: u32,
    #[serde(rename = "buzzer", default)]
    pub triggers_buzzer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MashSchedule {
    pub name: String,
    #[serde(rename = "boil", default)]
    pub is_boil: bool,
    pub steps: Vec<MashStep>,
    #[serde(default)]
    pub notifications: Vec<NotificationTemplate>,
}

impl MashSchedule {
    pub fn normalize(&mut self) {
        self.steps.sort_by_key(|step| step.index);
        self.notifications
            .sort_by_key(|notification| notification.minutes_from_start);
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidSchedule("name cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.index) {
                return Err(EngineError::InvalidSchedule(format!(
                    "duplicate step index {}",
                    step.index
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ExecutionStep {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub temperature: f32,
    #[serde(rename = "extendIfNeeded")]
    pub extend_if_needed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub name: String,
    pub message: String,
    #[serde(rename = "timeFromStart")]
    pub minutes_from_start: u32,
    #[serde(rename = "timePoint", with = "chrono::serde::ts_seconds")]
    pub fires_at: DateTime<Utc>,
    #[serde(rename = "buzzer")]
    pub triggers_buzzer: bool,
    pub done: bool,
}

/// A schedule expanded against the moment it was started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPlan {
    pub steps: Vec<ExecutionStep>,
    pub notifications: Vec<Notification>,
    pub is_boil: bool,
}

/// Expands `schedule` into timestamped setpoints starting at `start`.
///
/// Plan index 0 is always the starting point itself. A ramp is split into
/// `floor(ramp * 60 / step_interval_secs)` substeps that are rounded to whole
/// degrees; consecutive duplicates inside a ramp are dropped except for the
/// final substep, which always lands exactly on the target.
pub fn compile(
    schedule: &MashSchedule,
    start: DateTime<Utc>,
    start_temperature: f32,
    step_interval_secs: u32,
) -> CompiledPlan {
    let interval = i64::from(step_interval_secs.max(1));

    let mut prev_time = start;
    let mut prev_temp = start_temperature.trunc();

    let mut steps = vec![ExecutionStep {
        time: prev_time,
        temperature: prev_temp,
        extend_if_needed: false,
    }];
    debug!("plan start {} at {prev_temp}", prev_time.to_rfc3339());

    let mut ordered: Vec<&MashStep> = schedule.steps.iter().collect();
    ordered.sort_by_key(|step| step.index);

    for step in ordered {
        let target = step.temperature as f32;

        if step.ramp_minutes > 0 {
            let ramp_secs = i64::from(step.ramp_minutes) * 60;
            let substeps = (ramp_secs / interval).max(1);
            let delta = (target - prev_temp) / substeps as f32;

            let mut last_appended: Option<f32> = None;
            for j in 0..substeps {
                let is_last = j == substeps - 1;
                let temperature = (prev_temp + delta * (j + 1) as f32).round();

                if last_appended != Some(temperature) || is_last {
                    steps.push(ExecutionStep {
                        time: prev_time + Duration::seconds(j * interval),
                        temperature,
                        extend_if_needed: is_last && step.extend_if_needed,
                    });
                    last_appended = Some(temperature);
                }
            }

            prev_time += Duration::seconds(ramp_secs);
        } else {
            prev_time += Duration::seconds(JUMP_STEP_SECONDS);
            steps.push(ExecutionStep {
                time: prev_time,
                temperature: target,
                extend_if_needed: step.extend_if_needed,
            });
        }

        prev_time += Duration::minutes(i64::from(step.hold_minutes));
        steps.push(ExecutionStep {
            time: prev_time,
            temperature: target,
            extend_if_needed: false,
        });
        prev_temp = target;
        debug!("step {} holds {target} until {}", step.name, prev_time.to_rfc3339());
    }

    let mut notifications: Vec<Notification> = schedule
        .notifications
        .iter()
        .map(|template| Notification {
            name: template.name.clone(),
            message: template.message.clone(),
            minutes_from_start: template.minutes_from_start,
            fires_at: start + Duration::minutes(i64::from(template.minutes_from_start)),
            triggers_buzzer: template.triggers_buzzer,
            done: false,
        })
        .collect();
    notifications.sort_by_key(|notification| notification.fires_at);

    CompiledPlan {
        steps,
        notifications,
        is_boil: schedule.is_boil,
    }
}

/// Shifts the remainder of the plan after an overrun of `steps[index]`.
///
/// Every step from `index` on and every pending notification moves by the
/// same whole-second drift, so their spacing is unchanged. Returns the drift.
pub fn reschedule_after_overtime(
    steps: &mut [ExecutionStep],
    notifications: &mut [Notification],
    index: usize,
    now: DateTime<Utc>,
) -> EngineResult<Duration> {
    let Some(planned_end) = steps.get(index).map(|step| step.time) else {
        return Err(EngineError::StepsUnavailable {
            index,
            len: steps.len(),
        });
    };

    let drift = Duration::seconds((now - planned_end).num_seconds());

    for step in &mut steps[index..] {
        let moved = step.time + drift;
        debug!(
            "time changed from {} to {}",
            step.time.to_rfc3339(),
            moved.to_rfc3339()
        );
        step.time = moved;
    }

    for notification in notifications.iter_mut() {
        notification.fires_at += drift;
    }

    info!("plan shifted by {}s after overtime", drift.num_seconds());
    Ok(drift)
}

/// Named mash schedules, keyed by their unique name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleRegistry {
    schedules: BTreeMap<String, MashSchedule>,
}

impl ScheduleRegistry {
    pub fn new(schedules: Vec<MashSchedule>) -> Self {
        let mut registry = Self::default();
        for schedule in schedules {
            registry.insert(schedule);
        }
        registry
    }

    pub fn with_defaults() -> Self {
        Self::new(default_schedules())
    }

    pub fn get(&self, name: &str) -> Option<&MashSchedule> {
        self.schedules.get(name)
    }

    pub fn list(&self) -> Vec<MashSchedule> {
        self.schedules.values().cloned().collect()
    }

    /// Inserts or replaces the schedule with the same name.
    pub fn save(&mut self, mut schedule: MashSchedule) -> EngineResult<()> {
        schedule.validate()?;
        schedule.normalize();
        self.insert(schedule);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> EngineResult<()> {
        self.schedules
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::ScheduleNotFound(name.to_string()))
    }

    pub fn compile(
        &self,
        name: &str,
        start: DateTime<Utc>,
        start_temperature: f32,
        step_interval_secs: u32,
    ) -> EngineResult<CompiledPlan> {
        let schedule = self
            .get(name)
            .ok_or_else(|| EngineError::ScheduleNotFound(name.to_string()))?;
        Ok(compile(schedule, start, start_temperature, step_interval_secs))
    }

    fn insert(&mut self, mut schedule: MashSchedule) {
        schedule.normalize();
        self.schedules.insert(schedule.name.clone(), schedule);
    }
}

fn mash_step(index: u32, name: &str, temperature: i32, ramp: u32, hold: u32) -> MashStep {
    MashStep {
        index,
        name: name.to_string(),
        temperature,
        ramp_minutes: ramp,
        hold_minutes: hold,
        extend_if_needed: true,
    }
}

pub fn default_schedules() -> Vec<MashSchedule> {
    vec![
        MashSchedule {
            name: "Default".to_string(),
            is_boil: false,
            steps: vec![
                mash_step(0, "Beta Amylase", 64, 0, 45),
                mash_step(1, "Alpha Amylase", 72, 5, 20),
                mash_step(2, "Mash Out", 78, 5, 5),
            ],
            notifications: Vec::new(),
        },
        MashSchedule {
            name: "Rye Mash".to_string(),
            is_boil: false,
            steps: vec![
                mash_step(0, "Beta Glucanase", 43, 0, 20),
                mash_step(1, "Beta Amylase", 64, 5, 45),
                mash_step(2, "Alpha Amylase", 72, 5, 20),
                mash_step(3, "Mash Out", 78, 5, 5),
            ],
            notifications: Vec::new(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    fn single_step(temperature: i32, ramp: u32, hold: u32, extend: bool) -> MashSchedule {
        MashSchedule {
            name: "Single".to_string(),
            is_boil: false,
            steps: vec![MashStep {
                index: 0,
                name: "Alpha".to_string(),
                temperature,
                ramp_minutes: ramp,
                hold_minutes: hold,
                extend_if_needed: extend,
            }],
            notifications: Vec::new(),
        }
    }

    fn notification(name: &str, minutes: u32) -> NotificationTemplate {
        NotificationTemplate {
            name: name.to_string(),
            message: format!("{name} now"),
            minutes_from_start: minutes,
            triggers_buzzer: true,
        }
    }

    #[test]
    fn ramp_splits_into_rounded_substeps() {
        let plan = compile(&single_step(72, 5, 20, true), t0(), 64.0, 60);

        let temps: Vec<f32> = plan.steps.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![64.0, 66.0, 67.0, 69.0, 70.0, 72.0, 72.0]);

        let flags: Vec<bool> = plan.steps.iter().map(|s| s.extend_if_needed).collect();
        assert_eq!(flags, vec![false, false, false, false, false, true, false]);

        // Substep j sits j intervals after the cursor, the first one on it.
        assert_eq!(plan.steps[1].time, t0());
        assert_eq!(plan.steps[5].time, t0() + Duration::seconds(240));
        // Hold point is measured from the end of the ramp.
        assert_eq!(plan.steps[6].time, t0() + Duration::minutes(25));
    }

    #[test]
    fn ramp_substep_count_follows_interval() {
        let plan = compile(&single_step(100, 10, 0, false), t0(), 0.0, 120);
        // 10 minutes at 120s -> 5 substeps, no duplicates on a 20 degree rise.
        assert_eq!(plan.steps.len(), 1 + 5 + 1);
        assert_eq!(plan.steps[5].temperature, 100.0);
    }

    #[test]
    fn ramp_drops_duplicate_substeps_but_keeps_final() {
        // 2 degrees over 6 substeps: 64.33, 64.67, 65, 65.33, 65.67, 66
        let plan = compile(&single_step(66, 6, 1, false), t0(), 64.0, 60);
        let temps: Vec<f32> = plan.steps.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![64.0, 64.0, 65.0, 66.0, 66.0, 66.0]);
    }

    #[test]
    fn ramp_shorter_than_interval_yields_single_substep() {
        let plan = compile(&single_step(70, 1, 0, true), t0(), 60.0, 120);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[1].temperature, 70.0);
        assert!(plan.steps[1].extend_if_needed);
    }

    #[test]
    fn jump_step_starts_ten_seconds_later() {
        let plan = compile(&single_step(64, 0, 45, true), t0(), 20.7, 60);

        assert_eq!(plan.steps[0].temperature, 20.0);
        assert_eq!(plan.steps[1].time, t0() + Duration::seconds(10));
        assert_eq!(plan.steps[1].temperature, 64.0);
        assert!(plan.steps[1].extend_if_needed);
        assert_eq!(
            plan.steps[2].time,
            t0() + Duration::seconds(10) + Duration::minutes(45)
        );
        assert!(!plan.steps[2].extend_if_needed);
    }

    #[test]
    fn compiled_times_never_decrease() {
        for schedule in default_schedules() {
            let plan = compile(&schedule, t0(), 18.0, 60);
            assert!(plan
                .steps
                .windows(2)
                .all(|pair| pair[0].time <= pair[1].time));
        }
    }

    #[test]
    fn steps_are_compiled_in_index_order() {
        let mut schedule = default_schedules().remove(0);
        schedule.steps.reverse();
        let plan = compile(&schedule, t0(), 50.0, 60);
        assert_eq!(plan.steps[1].temperature, 64.0);
        assert_eq!(plan.steps.last().unwrap().temperature, 78.0);
    }

    #[test]
    fn notifications_resolve_against_start_and_sort() {
        let mut schedule = single_step(66, 0, 60, false);
        schedule.notifications = vec![notification("Hops", 50), notification("Yeast", 5)];
        schedule.is_boil = true;

        let plan = compile(&schedule, t0(), 90.0, 60);

        assert!(plan.is_boil);
        assert_eq!(plan.notifications[0].name, "Yeast");
        assert_eq!(plan.notifications[0].fires_at, t0() + Duration::minutes(5));
        assert_eq!(plan.notifications[1].fires_at, t0() + Duration::minutes(50));
        assert!(plan.notifications.iter().all(|n| !n.done));
    }

    #[test]
    fn overtime_shifts_remaining_steps_and_notifications() {
        let mut schedule = default_schedules().remove(0);
        schedule.notifications = vec![notification("Iodine", 30), notification("Sparge", 80)];
        let plan = compile(&schedule, t0(), 20.0, 60);
        let mut steps = plan.steps.clone();
        let mut notifications = plan.notifications.clone();

        let index = 3;
        let now = steps[index].time + Duration::seconds(95);
        let drift =
            reschedule_after_overtime(&mut steps, &mut notifications, index, now).unwrap();

        assert_eq!(drift, Duration::seconds(95));
        for (before, after) in plan.steps.iter().zip(&steps).take(index) {
            assert_eq!(before.time, after.time);
        }
        for (before, after) in plan.steps.iter().zip(&steps).skip(index) {
            assert_eq!(after.time - before.time, drift);
        }
        for (before, after) in plan.notifications.iter().zip(&notifications) {
            assert_eq!(after.fires_at - before.fires_at, drift);
        }
        assert!(notifications
            .windows(2)
            .all(|pair| pair[0].fires_at <= pair[1].fires_at));
    }

    #[test]
    fn overtime_with_stale_index_fails() {
        let plan = compile(&single_step(66, 0, 1, true), t0(), 20.0, 60);
        let mut steps = plan.steps;
        let err = reschedule_after_overtime(&mut steps, &mut [], 3, t0()).unwrap_err();
        assert_eq!(err, EngineError::StepsUnavailable { index: 3, len: 3 });
    }

    #[test]
    fn registry_compile_reports_unknown_schedule() {
        let registry = ScheduleRegistry::with_defaults();
        assert!(registry.compile("Default", t0(), 20.0, 60).is_ok());
        assert_eq!(
            registry.compile("Stout", t0(), 20.0, 60).unwrap_err(),
            EngineError::ScheduleNotFound("Stout".to_string())
        );
    }

    #[test]
    fn registry_save_rejects_duplicate_indices_and_sorts() {
        let mut registry = ScheduleRegistry::default();

        let mut schedule = default_schedules().remove(1);
        schedule.steps.reverse();
        registry.save(schedule.clone()).unwrap();
        let indices: Vec<u32> = registry
            .get("Rye Mash")
            .unwrap()
            .steps
            .iter()
            .map(|s| s.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        schedule.steps[0].index = 1;
        schedule.steps[1].index = 1;
        assert!(matches!(
            registry.save(schedule),
            Err(EngineError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn registry_delete_unknown_fails() {
        let mut registry = ScheduleRegistry::with_defaults();
        registry.delete("Default").unwrap();
        assert!(registry.get("Default").is_none());
        assert!(registry.delete("Default").is_err());
    }

    #[test]
    fn mash_step_uses_wire_names() {
        let step: MashStep = serde_json::from_str(
            r#"{"index":1,"name":"Alpha","temperature":72,"stepTime":5,"time":20,"extendStepTimeIfNeeded":true}"#,
        )
        .unwrap();
        assert_eq!(step.ramp_minutes, 5);
        assert_eq!(step.hold_minutes, 20);

        let json = serde_json::to_value(ExecutionStep {
            time: t0(),
            temperature: 72.0,
            extend_if_needed: true,
        })
        .unwrap();
        assert_eq!(json["time"], t0().timestamp());
        assert_eq!(json["extendIfNeeded"], true);
    }
}
