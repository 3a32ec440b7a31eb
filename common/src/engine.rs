//! Control state machine: advances through a compiled plan, detects
//! overtime, and fires timed notifications.
//!
//! The engine is synchronous and clock-agnostic; the caller supplies `now`
//! on every call and acts on the returned [`EngineEvent`]s.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::schedule::{self, ExecutionStep, Notification, ScheduleRegistry};
use crate::telemetry::TemperatureLog;
use crate::types::{ControlView, RunStatus, RunningSchedule};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    OvertimeStarted { index: usize, target: f32 },
    OvertimeDone { drift_secs: i64 },
    StepAdvanced { index: usize },
    NotificationFired(Notification),
    Finished,
    RunAborted(EngineError),
}

impl EngineEvent {
    /// Whether the regulator should start a fresh window right away.
    pub fn restarts_window(&self) -> bool {
        matches!(self, Self::StepAdvanced { .. })
    }
}

#[derive(Debug, Clone)]
pub struct BrewEngine {
    config: EngineConfig,
    status: RunStatus,
    current_temperature: Option<f32>,
    target_temperature: f32,
    manual_override_output: Option<u8>,
    is_boil_mode: bool,
    in_overtime: bool,
    step_index: usize,
    plan_version: u32,
    steps: Vec<ExecutionStep>,
    notifications: Vec<Notification>,
    history: TemperatureLog,
}

impl BrewEngine {
    pub fn new(config: EngineConfig) -> Self {
        let history = TemperatureLog::new(config.history_sample_every);
        Self {
            config,
            status: RunStatus::Idle,
            current_temperature: None,
            target_temperature: 0.0,
            manual_override_output: None,
            is_boil_mode: false,
            in_overtime: false,
            step_index: 0,
            plan_version: 0,
            steps: Vec::new(),
            notifications: Vec::new(),
            history,
        }
    }

    /// Takes effect for the next run.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.current_temperature
    }

    pub fn target_temperature(&self) -> f32 {
        self.target_temperature
    }

    pub fn history(&self) -> &TemperatureLog {
        &self.history
    }

    pub fn view(&self) -> ControlView {
        ControlView {
            status: self.status,
            target_temperature: self.target_temperature,
            manual_override_output: self.manual_override_output,
            is_boil_mode: self.is_boil_mode,
            in_overtime: self.in_overtime,
            current_step_index: self.step_index,
            plan_version: self.plan_version,
        }
    }

    pub fn running_schedule(&self) -> RunningSchedule {
        RunningSchedule {
            version: self.plan_version,
            steps: self.steps.clone(),
            notifications: self.notifications.clone(),
        }
    }

    /// Latest control average; `None` keeps the previous value.
    pub fn update_temperature(&mut self, average: Option<f32>) {
        if average.is_some() {
            self.current_temperature = average;
        }
    }

    pub fn set_target_temperature(&mut self, temperature: f32) {
        info!("target temperature set to {temperature}");
        self.target_temperature = temperature;
    }

    pub fn set_manual_override(&mut self, output: Option<i64>) -> Option<u8> {
        self.manual_override_output = output.map(|value| value.clamp(0, 100) as u8);
        match self.manual_override_output {
            Some(value) => info!("manual output override {value}%"),
            None => info!("manual output override cleared"),
        }
        self.manual_override_output
    }

    pub fn start(
        &mut self,
        schedule_name: Option<&str>,
        registry: &ScheduleRegistry,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.is_running() {
            debug!("start ignored, already running");
            return Ok(());
        }

        let plan = match schedule_name {
            Some(name) => {
                let start_temperature = self.current_temperature.unwrap_or(0.0).trunc();
                Some(registry.compile(
                    name,
                    now,
                    start_temperature,
                    self.config.step_interval_secs,
                )?)
            }
            None => None,
        };

        self.history = TemperatureLog::new(self.config.history_sample_every);
        self.steps.clear();
        self.notifications.clear();
        self.in_overtime = false;
        self.step_index = 0;

        match plan {
            Some(plan) => {
                self.steps = plan.steps;
                self.notifications = plan.notifications;
                self.is_boil_mode = plan.is_boil;
                // Index 0 is the synthetic starting point.
                self.step_index = 1;
                self.plan_version += 1;
                info!(
                    "starting schedule {} with {} steps (plan version {})",
                    schedule_name.unwrap_or_default(),
                    self.steps.len(),
                    self.plan_version
                );
            }
            None => {
                self.is_boil_mode =
                    self.target_temperature >= self.config.temperature_scale.boiling_point();
                info!(
                    "starting manual run at {} (boil: {})",
                    self.target_temperature, self.is_boil_mode
                );
            }
        }

        self.status = RunStatus::Running;
        Ok(())
    }

    /// Ends the run and discards its plan and pending notifications.
    pub fn stop(&mut self) {
        if self.is_running() {
            info!("stopping run");
        }
        self.status = RunStatus::Idle;
        self.in_overtime = false;
        self.steps.clear();
        self.notifications.clear();
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !self.is_running() {
            return events;
        }

        if let Some(temperature) = self.current_temperature {
            self.history.record(now, temperature);
        }

        // Manual runs only hold the target.
        if self.steps.is_empty() {
            return events;
        }

        let Some(next) = self.steps.get(self.step_index).copied() else {
            info!("program finished");
            self.stop();
            self.status = RunStatus::Finished;
            events.push(EngineEvent::Finished);
            return events;
        };

        self.target_temperature = next.temperature;
        let seconds_to_go = (next.time - now).num_seconds().max(0);

        if seconds_to_go < 1 {
            let reached = self
                .current_temperature
                .is_some_and(|temperature| temperature >= next.temperature);

            if next.extend_if_needed && !self.in_overtime && !reached {
                info!("overtime start at step {}", self.step_index);
                self.in_overtime = true;
                self.status = RunStatus::Overtime;
                events.push(EngineEvent::OvertimeStarted {
                    index: self.step_index,
                    target: next.temperature,
                });
            } else if self.in_overtime && reached {
                info!("overtime done");
                self.in_overtime = false;
                self.status = RunStatus::Running;

                match schedule::reschedule_after_overtime(
                    &mut self.steps,
                    &mut self.notifications,
                    self.step_index,
                    now,
                ) {
                    Ok(drift) => {
                        self.plan_version += 1;
                        events.push(EngineEvent::OvertimeDone {
                            drift_secs: drift.num_seconds(),
                        });
                        self.advance(&mut events);
                    }
                    Err(err) => {
                        error!("{err}, stopping");
                        self.stop();
                        events.push(EngineEvent::RunAborted(err));
                        return events;
                    }
                }
            } else if !self.in_overtime {
                self.advance(&mut events);
            }
        }

        if !self.in_overtime {
            self.fire_due_notification(now, &mut events);
        }

        events
    }

    fn advance(&mut self, events: &mut Vec<EngineEvent>) {
        self.step_index += 1;
        if let Some(step) = self.steps.get(self.step_index) {
            self.target_temperature = step.temperature;
        }
        debug!("going to step {}", self.step_index);
        events.push(EngineEvent::StepAdvanced {
            index: self.step_index,
        });
    }

    fn fire_due_notification(&mut self, now: DateTime<Utc>, events: &mut Vec<EngineEvent>) {
        let due = self
            .notifications
            .first()
            .is_some_and(|notification| notification.fires_at <= now);
        if !due {
            return;
        }

        let mut notification = self.notifications.remove(0);
        notification.done = true;
        info!("notification: {} {}", notification.name, notification.message);
        events.push(EngineEvent::NotificationFired(notification));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schedule::{MashSchedule, MashStep, NotificationTemplate};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(n)
    }

    fn registry(steps: Vec<MashStep>, notifications: Vec<NotificationTemplate>) -> ScheduleRegistry {
        ScheduleRegistry::new(vec![MashSchedule {
            name: "Test".to_string(),
            is_boil: false,
            steps,
            notifications,
        }])
    }

    fn jump(index: u32, temperature: i32, hold: u32, extend: bool) -> MashStep {
        MashStep {
            index,
            name: format!("Step {index}"),
            temperature,
            ramp_minutes: 0,
            hold_minutes: hold,
            extend_if_needed: extend,
        }
    }

    fn started(registry: &ScheduleRegistry, temperature: f32) -> BrewEngine {
        let mut engine = BrewEngine::new(EngineConfig::default());
        engine.update_temperature(Some(temperature));
        engine.start(Some("Test"), registry, t0()).unwrap();
        engine
    }

    #[test]
    fn start_skips_synthetic_first_step() {
        let registry = registry(vec![jump(1, 66, 60, false)], Vec::new());
        let engine = started(&registry, 20.4);

        let view = engine.view();
        assert_eq!(view.status, RunStatus::Running);
        assert_eq!(view.current_step_index, 1);
        assert_eq!(view.plan_version, 1);

        let plan = engine.running_schedule();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].temperature, 20.0);
        assert_eq!(plan.steps[0].time, t0());
    }

    #[test]
    fn target_follows_next_step_while_waiting() {
        let registry = registry(vec![jump(1, 66, 60, false)], Vec::new());
        let mut engine = started(&registry, 20.0);

        assert!(engine.tick(secs(3)).is_empty());
        assert_eq!(engine.target_temperature(), 66.0);
        assert_eq!(engine.view().current_step_index, 1);
    }

    #[test]
    fn overtime_waits_for_temperature_and_shifts_plan() {
        let registry = registry(
            vec![jump(1, 78, 10, true), jump(2, 80, 5, false)],
            vec![NotificationTemplate {
                name: "Hops".to_string(),
                message: "Add hops".to_string(),
                minutes_from_start: 30,
                triggers_buzzer: true,
            }],
        );
        let mut engine = started(&registry, 75.0);
        let before = engine.running_schedule();

        // Planned end of step 1 is t0 + 10s.
        let events = engine.tick(secs(10));
        assert_eq!(
            events,
            vec![EngineEvent::OvertimeStarted {
                index: 1,
                target: 78.0
            }]
        );
        assert_eq!(engine.status(), RunStatus::Overtime);

        assert!(engine.tick(secs(70)).is_empty());
        assert!(engine.view().in_overtime);
        assert_eq!(engine.view().current_step_index, 1);

        engine.update_temperature(Some(78.0));
        let events = engine.tick(secs(130));
        assert_eq!(
            events,
            vec![
                EngineEvent::OvertimeDone { drift_secs: 120 },
                EngineEvent::StepAdvanced { index: 2 },
            ]
        );
        assert!(events[1].restarts_window());
        assert_eq!(engine.status(), RunStatus::Running);

        let after = engine.running_schedule();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.steps[0].time, before.steps[0].time);
        for (moved, original) in after.steps[1..].iter().zip(&before.steps[1..]) {
            assert_eq!(moved.time - original.time, Duration::seconds(120));
        }
        assert_eq!(
            after.notifications[0].fires_at - before.notifications[0].fires_at,
            Duration::seconds(120)
        );
    }

    #[test]
    fn reached_temperature_skips_overtime() {
        let registry = registry(vec![jump(1, 66, 10, true)], Vec::new());
        let mut engine = started(&registry, 66.5);

        assert_eq!(
            engine.tick(secs(10)),
            vec![EngineEvent::StepAdvanced { index: 2 }]
        );
    }

    #[test]
    fn finishes_one_past_the_end() {
        let registry = registry(vec![jump(1, 66, 0, false)], Vec::new());
        let mut engine = started(&registry, 66.0);

        assert_eq!(engine.tick(secs(10)), vec![EngineEvent::StepAdvanced { index: 2 }]);
        assert_eq!(engine.tick(secs(11)), vec![EngineEvent::StepAdvanced { index: 3 }]);
        assert_eq!(engine.tick(secs(12)), vec![EngineEvent::Finished]);
        assert_eq!(engine.status(), RunStatus::Finished);
        assert!(!engine.is_running());
        assert!(engine.tick(secs(13)).is_empty());
    }

    #[test]
    fn target_moves_with_the_step_index() {
        let registry = registry(
            vec![jump(1, 66, 0, false), jump(2, 72, 10, false)],
            Vec::new(),
        );
        let mut engine = started(&registry, 66.0);

        let mut advanced = 0;
        for second in [10, 11, 12, 13] {
            for event in engine.tick(secs(second)) {
                if let EngineEvent::StepAdvanced { index } = event {
                    advanced += 1;
                    let view = engine.view();
                    assert_eq!(view.current_step_index, index);
                    let plan = engine.running_schedule();
                    if let Some(step) = plan.steps.get(index) {
                        assert_eq!(view.target_temperature, step.temperature);
                    }
                }
            }
        }
        assert!(advanced >= 2);
        assert_eq!(engine.target_temperature(), 72.0);
    }

    #[test]
    fn stop_discards_plan_and_notifications() {
        let registry = registry(
            vec![jump(1, 66, 60, false)],
            vec![NotificationTemplate {
                name: "Later".to_string(),
                message: String::new(),
                minutes_from_start: 30,
                triggers_buzzer: false,
            }],
        );
        let mut engine = started(&registry, 60.0);
        assert!(!engine.running_schedule().steps.is_empty());

        engine.stop();
        let plan = engine.running_schedule();
        assert!(plan.steps.is_empty());
        assert!(plan.notifications.is_empty());
        assert_eq!(engine.status(), RunStatus::Idle);
    }

    #[test]
    fn fires_notifications_in_order_once() {
        let registry = registry(
            vec![jump(1, 66, 60, false)],
            vec![
                NotificationTemplate {
                    name: "Second".to_string(),
                    message: String::new(),
                    minutes_from_start: 2,
                    triggers_buzzer: false,
                },
                NotificationTemplate {
                    name: "First".to_string(),
                    message: "Stir".to_string(),
                    minutes_from_start: 1,
                    triggers_buzzer: true,
                },
            ],
        );
        let mut engine = started(&registry, 66.0);
        engine.tick(secs(10));

        assert!(engine.tick(secs(59)).is_empty());

        let events = engine.tick(secs(61));
        let [EngineEvent::NotificationFired(fired)] = events.as_slice() else {
            panic!("expected one notification, got {events:?}");
        };
        assert_eq!(fired.name, "First");
        assert!(fired.done);
        assert!(fired.triggers_buzzer);

        assert!(engine.tick(secs(62)).is_empty());
        assert_eq!(engine.running_schedule().notifications.len(), 1);
    }

    #[test]
    fn notifications_are_held_during_overtime() {
        let registry = registry(
            vec![jump(1, 78, 10, true)],
            vec![NotificationTemplate {
                name: "Now".to_string(),
                message: String::new(),
                minutes_from_start: 0,
                triggers_buzzer: false,
            }],
        );
        let mut engine = started(&registry, 70.0);

        let events = engine.tick(secs(10));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::OvertimeStarted { .. }));
        assert!(engine.tick(secs(20)).is_empty());
    }

    #[test]
    fn unknown_schedule_keeps_engine_idle() {
        let mut engine = BrewEngine::new(EngineConfig::default());
        let err = engine
            .start(Some("Missing"), &ScheduleRegistry::with_defaults(), t0())
            .unwrap_err();

        assert_eq!(err, EngineError::ScheduleNotFound("Missing".to_string()));
        assert_eq!(engine.status(), RunStatus::Idle);
        assert_eq!(engine.view().plan_version, 0);
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let registry = registry(vec![jump(1, 66, 60, false)], Vec::new());
        let mut engine = started(&registry, 60.0);
        engine.start(Some("Test"), &registry, secs(100)).unwrap();
        assert_eq!(engine.view().plan_version, 1);
    }

    #[test]
    fn manual_run_infers_boil_mode() {
        let registry = ScheduleRegistry::default();
        let mut engine = BrewEngine::new(EngineConfig::default());
        engine.set_target_temperature(100.0);
        engine.start(None, &registry, t0()).unwrap();

        let view = engine.view();
        assert!(view.is_running());
        assert!(view.is_boil_mode);
        assert!(engine.tick(secs(60)).is_empty());
        assert_eq!(engine.target_temperature(), 100.0);

        engine.stop();
        engine.set_target_temperature(65.0);
        engine.start(None, &registry, secs(120)).unwrap();
        assert!(!engine.view().is_boil_mode);
    }

    #[test]
    fn manual_override_is_clamped() {
        let mut engine = BrewEngine::new(EngineConfig::default());
        assert_eq!(engine.set_manual_override(Some(150)), Some(100));
        assert_eq!(engine.set_manual_override(Some(-5)), Some(0));
        assert_eq!(engine.set_manual_override(None), None);
    }

    #[test]
    fn history_is_sampled_and_reset_on_start() {
        let config = EngineConfig {
            history_sample_every: 1,
            ..EngineConfig::default()
        };
        let registry = ScheduleRegistry::default();
        let mut engine = BrewEngine::new(config);
        engine.update_temperature(Some(50.0));
        engine.start(None, &registry, t0()).unwrap();

        engine.tick(secs(1));
        engine.update_temperature(None);
        engine.tick(secs(2));
        engine.update_temperature(Some(51.5));
        engine.tick(secs(3));
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.current_temperature(), Some(51.5));

        engine.stop();
        engine.start(None, &registry, secs(10)).unwrap();
        assert!(engine.history().is_empty());
    }
}
