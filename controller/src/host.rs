use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch, Mutex, Notify},
};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use brewengine_common::{
    display_round, BrewEngine, Command, CommandResult, ControlView, EngineError, Heater,
    HeaterBank, MashSchedule, NoopPublisher, OutputCapability, PidRegulator, PidSettings,
    Publisher, RuntimeConfig, ScheduleRegistry, SensorAggregator, SensorDriver, SensorSnapshot,
    TelemetrySnapshot,
};

use crate::{
    publisher::{spawn_mqtt_loop, MqttPublisher},
    sim::SimKettle,
    store::AppStore,
    tasks::{
        spawn_output_task, spawn_sensor_task, spawn_stir_task, Buzzer, ControlRequest,
        ControlTask, RegulatorTask, SensorRequest, StirRequest,
    },
};

const REQUEST_QUEUE: usize = 16;

#[derive(Clone)]
pub struct AppState {
    control: mpsc::Sender<ControlRequest>,
    sensors: mpsc::Sender<SensorRequest>,
    stir: mpsc::Sender<StirRequest>,
    view_rx: watch::Receiver<ControlView>,
    snapshot_rx: watch::Receiver<SensorSnapshot>,
    output_rx: watch::Receiver<u8>,
    stir_rx: watch::Receiver<bool>,
    pid_tx: Arc<watch::Sender<PidSettings>>,
    heaters_tx: Arc<watch::Sender<Vec<Heater>>>,
    runtime: Arc<Mutex<RuntimeConfig>>,
    store: AppStore,
}

/// Hardware the core talks to.
pub struct Collaborators {
    pub sensor_driver: Box<dyn SensorDriver>,
    pub detected_sensors: Vec<u64>,
    pub outputs: Arc<dyn OutputCapability>,
    pub publisher: Arc<dyn Publisher>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let hostname =
        std::env::var("BREWENGINE_HOSTNAME").unwrap_or_else(|_| "brewengine".to_string());

    let publisher: Arc<dyn Publisher> = match MqttPublisher::from_env(&hostname) {
        Some((publisher, eventloop)) => {
            spawn_mqtt_loop(eventloop);
            Arc::new(publisher)
        }
        None => {
            info!("MQTT_HOST not set, telemetry publishing disabled");
            Arc::new(NoopPublisher)
        }
    };

    let kettle = SimKettle::default();
    let collaborators = Collaborators {
        sensor_driver: Box::new(kettle.probes()),
        detected_sensors: kettle.detect(),
        outputs: Arc::new(kettle.outputs()),
        publisher,
    };

    let app_state = start_engine(AppStore::from_env(), collaborators).await?;

    let web_dir = std::env::var_os("BREWENGINE_WEB_DIR").map(PathBuf::from);
    if web_dir.is_none() {
        info!("BREWENGINE_WEB_DIR not set, static web UI disabled");
    }
    let app = router(app_state, web_dir);

    let port = std::env::var("BREWENGINE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind brew engine server at {addr}"))?;

    info!("brew engine listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn router(app_state: AppState, web_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/api", post(handle_api))
        .with_state(app_state);
    match web_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

/// Loads persisted settings and spawns every task.
pub async fn start_engine(
    store: AppStore,
    collaborators: Collaborators,
) -> anyhow::Result<AppState> {
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let schedules = store.load_schedules().await.unwrap_or_else(|err| {
        warn!("failed to load schedules from store: {err:#}");
        Vec::new()
    });
    let registry = if schedules.is_empty() {
        ScheduleRegistry::with_defaults()
    } else {
        ScheduleRegistry::new(schedules)
    };

    let heaters = store.load_heaters().await.unwrap_or_else(|err| {
        warn!("failed to load heaters from store: {err:#}");
        HeaterBank::with_defaults().heaters().to_vec()
    });
    let heaters = HeaterBank::new(heaters).heaters().to_vec();

    let sensors = store.load_sensors().await.unwrap_or_else(|err| {
        warn!("failed to load sensors from store: {err:#}");
        Vec::new()
    });
    let mut aggregator = SensorAggregator::new(sensors, runtime.engine.temperature_scale);
    aggregator.register_detected(&collaborators.detected_sensors);
    if let Err(err) = store.save_sensors(&aggregator.sensors()).await {
        warn!("failed to persist detected sensors: {err:#}");
    }

    let (snapshot_tx, snapshot_rx) = watch::channel(SensorSnapshot::default());
    let (view_tx, view_rx) = watch::channel(ControlView::default());
    let (output_tx, output_rx) = watch::channel(0u8);
    let (engaged_tx, engaged_rx) = watch::channel(Vec::new());
    let (stir_status_tx, stir_rx) = watch::channel(false);
    let (pid_tx, pid_rx) = watch::channel(runtime.pid.clone());
    let (heaters_tx, heaters_rx) = watch::channel(heaters);

    let (sensor_requests, sensor_requests_rx) = mpsc::channel(REQUEST_QUEUE);
    let (control, control_rx) = mpsc::channel(REQUEST_QUEUE);
    let (stir, stir_requests_rx) = mpsc::channel(REQUEST_QUEUE);
    let restart = Arc::new(Notify::new());

    spawn_sensor_task(
        aggregator,
        collaborators.sensor_driver,
        snapshot_tx,
        sensor_requests_rx,
    );

    ControlTask {
        engine: BrewEngine::new(runtime.engine.clone()),
        registry,
        view_tx,
        restart: restart.clone(),
        snapshot_rx: snapshot_rx.clone(),
        output_rx: output_rx.clone(),
        publisher: collaborators.publisher,
        buzzer: Buzzer::new(collaborators.outputs.clone(), runtime.engine.buzzer_secs),
    }
    .spawn(control_rx);

    RegulatorTask {
        view_rx: view_rx.clone(),
        snapshot_rx: snapshot_rx.clone(),
        pid_rx,
        heaters_rx,
        restart,
        engaged_tx,
        output_tx,
    }
    .spawn();

    spawn_output_task(collaborators.outputs.clone(), engaged_rx);
    spawn_stir_task(collaborators.outputs, stir_status_tx, stir_requests_rx);

    Ok(AppState {
        control,
        sensors: sensor_requests,
        stir,
        view_rx,
        snapshot_rx,
        output_rx,
        stir_rx,
        pid_tx: Arc::new(pid_tx),
        heaters_tx: Arc::new(heaters_tx),
        runtime: Arc::new(Mutex::new(runtime)),
        store,
    })
}

async fn handle_api(State(app_state): State<AppState>, body: String) -> axum::response::Response {
    let command = match Command::from_json(&body) {
        Ok(command) => command,
        Err(err) => {
            warn!("rejected command: {err}");
            return reply(StatusCode::BAD_REQUEST, CommandResult::failure(err.to_string()));
        }
    };

    let name = command.as_str();
    let result = match dispatch(&app_state, command).await {
        Ok(result) => result,
        Err(err) => {
            warn!("{name} failed: {err:#}");
            CommandResult::failure(format!("{name} failed"))
        }
    };
    reply(StatusCode::OK, result)
}

fn reply(status: StatusCode, result: CommandResult) -> axum::response::Response {
    (status, Json(result)).into_response()
}

async fn ask<R, T>(
    tx: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<T>) -> R,
) -> anyhow::Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(request(reply_tx))
        .await
        .map_err(|_| anyhow::anyhow!("task unavailable"))?;
    reply_rx.await.context("task dropped the request")
}

async fn tell<R>(tx: &mpsc::Sender<R>, request: R) -> anyhow::Result<()> {
    tx.send(request)
        .await
        .map_err(|_| anyhow::anyhow!("task unavailable"))
}

fn to_data<T: serde::Serialize>(value: &T) -> anyhow::Result<CommandResult> {
    Ok(CommandResult::ok(serde_json::to_value(value)?))
}

pub async fn dispatch(state: &AppState, command: Command) -> anyhow::Result<CommandResult> {
    match command {
        Command::Data { last_date } => {
            let history = ask(&state.control, |reply| ControlRequest::History {
                since: last_date,
                reply,
            })
            .await?;
            let view = *state.view_rx.borrow();
            let snapshot = state.snapshot_rx.borrow().clone();

            to_data(&TelemetrySnapshot {
                temp: display_round(snapshot.average.unwrap_or_default()),
                temps: TelemetrySnapshot::sensor_temps(&snapshot.per_sensor),
                target_temp: view.target_temperature,
                output: *state.output_rx.borrow(),
                manual_override_output: view.manual_override_output,
                status: view.status.as_str(),
                stir_status: if *state.stir_rx.borrow() { "Running" } else { "Idle" },
                last_log_date_time: history.last_time,
                temp_log: history.entries,
                running_version: view.plan_version,
            })
        }
        Command::GetRunningSchedule => {
            let schedule = ask(&state.control, ControlRequest::RunningSchedule).await?;
            to_data(&schedule)
        }
        Command::SetTemp { target_temperature } => {
            tell(&state.control, ControlRequest::SetTarget(target_temperature)).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::SetOverrideOutput { output } => {
            tell(&state.control, ControlRequest::SetOverride(output)).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::Start { schedule } => {
            let started =
                ask(&state.control, |reply| ControlRequest::Start { schedule, reply }).await?;
            Ok(match started {
                Ok(()) => CommandResult::ok_empty(),
                Err(err) => CommandResult::failure(err.to_string()),
            })
        }
        Command::StartStir(config) => {
            tell(&state.stir, StirRequest::Start(config)).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::Stop => {
            tell(&state.control, ControlRequest::Stop).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::StopStir => {
            tell(&state.stir, StirRequest::Stop).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::GetMashSchedules => {
            let schedules = ask(&state.control, ControlRequest::ListSchedules).await?;
            to_data(&schedules)
        }
        Command::SaveMashSchedule(schedule) => {
            let saved = ask(&state.control, |reply| {
                ControlRequest::SaveSchedule(schedule, reply)
            })
            .await?;
            persist_schedules(state, saved).await
        }
        Command::DeleteMashSchedule { name } => {
            let deleted = ask(&state.control, |reply| {
                ControlRequest::DeleteSchedule(name, reply)
            })
            .await?;
            persist_schedules(state, deleted).await
        }
        Command::GetPidSettings => {
            let runtime = state.runtime.lock().await;
            to_data(&runtime.pid)
        }
        Command::SavePidSettings(mut settings) => {
            for gains in [settings.gains(), settings.boil_gains()] {
                if let Err(err) = PidRegulator::percent(gains) {
                    return Ok(CommandResult::failure(err.to_string()));
                }
            }
            settings.sanitize();

            let runtime = {
                let mut runtime = state.runtime.lock().await;
                runtime.pid = settings.clone();
                runtime.sanitize();
                runtime.clone()
            };
            tell(&state.control, ControlRequest::SetConfig(runtime.engine.clone())).await?;
            state.pid_tx.send_replace(settings);
            state.store.save_runtime_config(&runtime).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::GetTempSettings => {
            let sensors = ask(&state.sensors, SensorRequest::Get).await?;
            to_data(&sensors)
        }
        Command::SaveTempSettings(settings) => {
            let sensors = ask(&state.sensors, |reply| SensorRequest::Save(settings, reply)).await?;
            state.store.save_sensors(&sensors).await?;
            Ok(CommandResult::ok_empty())
        }
        Command::GetHeaterSettings => {
            let heaters = state.heaters_tx.borrow().clone();
            to_data(&heaters)
        }
        Command::SaveHeaterSettings(heaters) => {
            if state.view_rx.borrow().is_running() {
                return Ok(CommandResult::failure(EngineError::HeatersLocked.to_string()));
            }
            let heaters = HeaterBank::new(heaters).heaters().to_vec();
            state.store.save_heaters(&heaters).await?;
            state.heaters_tx.send_replace(heaters);
            Ok(CommandResult::ok_empty())
        }
    }
}

async fn persist_schedules(
    state: &AppState,
    result: Result<Vec<MashSchedule>, EngineError>,
) -> anyhow::Result<CommandResult> {
    match result {
        Ok(schedules) => {
            state.store.save_schedules(&schedules).await?;
            Ok(CommandResult::ok_empty())
        }
        Err(err) => Ok(CommandResult::failure(err.to_string())),
    }
}
