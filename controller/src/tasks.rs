//! One task per periodic concern. Each task owns its state; the others see
//! it only through watch channels or by request.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot, watch, Notify},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use brewengine_common::{
    BrewEngine, BurnWindow, ControlView, EngineConfig, EngineEvent, EngineResult, Heater,
    HeaterBank, HistoryEntry, LogLevel, LogLine, MashSchedule, OutputCapability, OutputDriver,
    OutputId, PidRegulator, PidSettings, Publisher, RunningSchedule, ScheduleRegistry,
    SensorAggregator, SensorDriver, SensorSnapshot, StirConfig, StirCycle, TelemetryRecord,
    TemperatureSensor,
};

const TICK: Duration = Duration::from_secs(1);

fn ticker() -> tokio::time::Interval {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub enum SensorRequest {
    Get(oneshot::Sender<Vec<TemperatureSensor>>),
    Save(Vec<TemperatureSensor>, oneshot::Sender<Vec<TemperatureSensor>>),
}

/// Reads every second; settings edits are applied between two reads.
pub fn spawn_sensor_task(
    mut aggregator: SensorAggregator,
    mut driver: Box<dyn SensorDriver>,
    snapshot_tx: watch::Sender<SensorSnapshot>,
    mut requests: mpsc::Receiver<SensorRequest>,
) {
    tokio::spawn(async move {
        let mut interval = ticker();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = aggregator.read_all(driver.as_mut());
                    snapshot_tx.send_replace(snapshot);
                }
                request = requests.recv() => match request {
                    Some(SensorRequest::Get(reply)) => {
                        let _ = reply.send(aggregator.sensors());
                    }
                    Some(SensorRequest::Save(settings, reply)) => {
                        aggregator.apply_settings(settings);
                        let _ = reply.send(aggregator.sensors());
                    }
                    None => break,
                },
            }
        }
        debug!("sensor task stopped");
    });
}

pub struct HistoryView {
    pub entries: Vec<HistoryEntry>,
    pub last_time: i64,
}

pub enum ControlRequest {
    Start {
        schedule: Option<String>,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Stop,
    SetTarget(f32),
    SetOverride(Option<i64>),
    SetConfig(EngineConfig),
    RunningSchedule(oneshot::Sender<RunningSchedule>),
    History {
        since: Option<i64>,
        reply: oneshot::Sender<HistoryView>,
    },
    ListSchedules(oneshot::Sender<Vec<MashSchedule>>),
    SaveSchedule(MashSchedule, oneshot::Sender<EngineResult<Vec<MashSchedule>>>),
    DeleteSchedule(String, oneshot::Sender<EngineResult<Vec<MashSchedule>>>),
}

/// Sounds the buzzer on a detached task.
#[derive(Clone)]
pub struct Buzzer {
    outputs: Arc<dyn OutputCapability>,
    duration: Duration,
}

impl Buzzer {
    pub fn new(outputs: Arc<dyn OutputCapability>, seconds: u16) -> Self {
        Self {
            outputs,
            duration: Duration::from_secs(u64::from(seconds)),
        }
    }

    pub fn sound(&self) {
        let outputs = self.outputs.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            outputs.set_level(OutputId::Buzzer, true);
            tokio::time::sleep(duration).await;
            outputs.set_level(OutputId::Buzzer, false);
        });
    }
}

pub struct ControlTask {
    pub engine: BrewEngine,
    pub registry: ScheduleRegistry,
    pub view_tx: watch::Sender<ControlView>,
    pub restart: Arc<Notify>,
    pub snapshot_rx: watch::Receiver<SensorSnapshot>,
    pub output_rx: watch::Receiver<u8>,
    pub publisher: Arc<dyn Publisher>,
    pub buzzer: Buzzer,
}

impl ControlTask {
    pub fn spawn(mut self, mut requests: mpsc::Receiver<ControlRequest>) {
        tokio::spawn(async move {
            let mut interval = ticker();
            loop {
                let mut restart = false;
                tokio::select! {
                    _ = interval.tick() => restart = self.tick(),
                    request = requests.recv() => match request {
                        Some(request) => self.handle(request),
                        None => break,
                    },
                }
                // The regulator reads the view when it wakes up.
                self.publish_view();
                if restart {
                    self.restart.notify_one();
                }
            }
            debug!("control task stopped");
        });
    }

    fn publish_view(&self) {
        let view = self.engine.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    /// Returns whether the regulator window should restart.
    fn tick(&mut self) -> bool {
        let now = Utc::now();
        let average = self.snapshot_rx.borrow().average;
        self.engine.update_temperature(average);

        let mut restart = false;
        for event in self.engine.tick(now) {
            restart |= event.restarts_window();

            match event {
                EngineEvent::OvertimeStarted { index, target } => {
                    self.publisher.publish_log(&LogLine::new(
                        now,
                        LogLevel::Info,
                        format!("OverTime Start (step {index}, target {target})"),
                    ));
                }
                EngineEvent::OvertimeDone { drift_secs } => {
                    self.publisher.publish_log(&LogLine::new(
                        now,
                        LogLevel::Info,
                        format!("OverTime Done (+{drift_secs}s)"),
                    ));
                }
                EngineEvent::NotificationFired(notification) => {
                    if notification.triggers_buzzer {
                        self.buzzer.sound();
                    }
                }
                EngineEvent::RunAborted(err) => {
                    self.publisher
                        .publish_log(&LogLine::new(now, LogLevel::Warn, err.to_string()));
                }
                EngineEvent::StepAdvanced { .. } | EngineEvent::Finished => {}
            }
        }

        if self.engine.is_running() {
            if let Some(temp) = self.engine.current_temperature() {
                self.publisher.publish_record(&TelemetryRecord {
                    time: now.timestamp(),
                    temp,
                    target: self.engine.target_temperature(),
                    output: *self.output_rx.borrow(),
                });
            }
        }
        restart
    }

    fn handle(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Start { schedule, reply } => {
                let result = self
                    .engine
                    .start(schedule.as_deref(), &self.registry, Utc::now());
                if let Err(err) = &result {
                    warn!("start failed: {err}");
                }
                let _ = reply.send(result);
            }
            ControlRequest::Stop => self.engine.stop(),
            ControlRequest::SetTarget(temperature) => {
                self.engine.set_target_temperature(temperature)
            }
            ControlRequest::SetOverride(output) => {
                self.engine.set_manual_override(output);
            }
            ControlRequest::SetConfig(config) => self.engine.set_config(config),
            ControlRequest::RunningSchedule(reply) => {
                let _ = reply.send(self.engine.running_schedule());
            }
            ControlRequest::History { since, reply } => {
                let history = self.engine.history();
                let _ = reply.send(HistoryView {
                    entries: history.since(since),
                    last_time: history.last_time(),
                });
            }
            ControlRequest::ListSchedules(reply) => {
                let _ = reply.send(self.registry.list());
            }
            ControlRequest::SaveSchedule(schedule, reply) => {
                let name = schedule.name.clone();
                let result = self.registry.save(schedule).map(|()| self.registry.list());
                if result.is_ok() {
                    info!("schedule {name} saved");
                }
                let _ = reply.send(result);
            }
            ControlRequest::DeleteSchedule(name, reply) => {
                let result = self.registry.delete(&name).map(|()| self.registry.list());
                let _ = reply.send(result);
            }
        }
    }
}

/// PID + allocator + burn window. Idles while no run is active.
pub struct RegulatorTask {
    pub view_rx: watch::Receiver<ControlView>,
    pub snapshot_rx: watch::Receiver<SensorSnapshot>,
    pub pid_rx: watch::Receiver<PidSettings>,
    pub heaters_rx: watch::Receiver<Vec<Heater>>,
    pub restart: Arc<Notify>,
    pub engaged_tx: watch::Sender<Vec<(u8, bool)>>,
    pub output_tx: watch::Sender<u8>,
}

impl RegulatorTask {
    pub fn spawn(self) {
        tokio::spawn(async move {
            self.run().await;
            debug!("regulator task stopped");
        });
    }

    async fn run(mut self) {
        let mut bank = HeaterBank::new(self.heaters_rx.borrow_and_update().clone());
        let mut pid: Option<PidRegulator> = None;
        let mut pid_boil_mode = false;

        loop {
            let view = *self.view_rx.borrow_and_update();

            if !view.is_running() {
                pid = None;
                bank.clear();
                self.output_tx.send_replace(0);
                self.engaged_tx.send_replace(Vec::new());
                if self.view_rx.changed().await.is_err() {
                    return;
                }
                continue;
            }

            if self.heaters_rx.has_changed().unwrap_or(false) {
                bank = HeaterBank::new(self.heaters_rx.borrow_and_update().clone());
            }
            let settings_changed = self.pid_rx.has_changed().unwrap_or(false);
            let settings = self.pid_rx.borrow_and_update().clone();

            if pid.is_none() || settings_changed || pid_boil_mode != view.is_boil_mode {
                pid_boil_mode = view.is_boil_mode;
                pid = match PidRegulator::percent(settings.gains_for(pid_boil_mode)) {
                    Ok(pid) => Some(pid),
                    Err(err) => {
                        warn!("regulator disabled: {err}");
                        None
                    }
                };
            }

            let average = self.snapshot_rx.borrow().average;
            let output = match (view.manual_override_output, pid.as_mut(), average) {
                (Some(manual), _, _) => manual,
                (None, Some(pid), Some(average)) => {
                    pid.output(f64::from(average), f64::from(view.target_temperature)) as u8
                }
                _ => 0,
            };
            debug!("regulator output {output}%");
            self.output_tx.send_replace(output);

            bank.set_mode(view.is_boil_mode);
            bank.allocate(output);
            let window = BurnWindow::new(bank.heaters(), settings.loop_time_secs);

            if !self.run_window(&window).await {
                return;
            }
        }
    }

    /// Returns false once the control side has gone away.
    async fn run_window(&mut self, window: &BurnWindow) -> bool {
        for second in 0..window.loop_time_secs() {
            self.engaged_tx.send_replace(window.engaged_at(second));

            let sleep = tokio::time::sleep(TICK);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    _ = self.restart.notified() => {
                        debug!("window restarted at second {second}");
                        return true;
                    }
                    changed = self.view_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                        if !self.view_rx.borrow().is_running() {
                            return true;
                        }
                    }
                }
            }
        }
        true
    }
}

/// Applies heater levels published by the regulator.
pub fn spawn_output_task(
    outputs: Arc<dyn OutputCapability>,
    mut engaged_rx: watch::Receiver<Vec<(u8, bool)>>,
) {
    tokio::spawn(async move {
        let mut driver = OutputDriver::new();
        while engaged_rx.changed().await.is_ok() {
            let engaged = engaged_rx.borrow_and_update().clone();
            if engaged.is_empty() {
                driver.all_heaters_off(outputs.as_ref());
            } else {
                driver.apply_heaters(outputs.as_ref(), &engaged);
            }
        }
        driver.all_heaters_off(outputs.as_ref());
        debug!("output task stopped");
    });
}

pub enum StirRequest {
    Start(StirConfig),
    Stop,
}

pub fn spawn_stir_task(
    outputs: Arc<dyn OutputCapability>,
    status_tx: watch::Sender<bool>,
    mut requests: mpsc::Receiver<StirRequest>,
) {
    tokio::spawn(async move {
        let mut driver = OutputDriver::new();
        let mut cycle: Option<StirCycle> = None;
        let mut interval = ticker();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(cycle) = cycle.as_mut() {
                        let on = cycle.evaluate(Utc::now());
                        driver.apply(outputs.as_ref(), OutputId::Stir, on);
                    }
                }
                request = requests.recv() => match request {
                    Some(StirRequest::Start(config)) => {
                        info!("stir started: {config:?}");
                        cycle = Some(StirCycle::new(config, Utc::now()));
                        status_tx.send_replace(true);
                    }
                    Some(StirRequest::Stop) => {
                        info!("stir stopped");
                        cycle = None;
                        driver.apply(outputs.as_ref(), OutputId::Stir, false);
                        status_tx.send_replace(false);
                    }
                    None => break,
                },
            }
        }
        driver.apply(outputs.as_ref(), OutputId::Stir, false);
    });
}
