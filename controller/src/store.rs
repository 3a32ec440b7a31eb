use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use brewengine_common::{
    schedule::default_schedules, Heater, HeaterBank, MashSchedule, RuntimeConfig,
    TemperatureSensor,
};

/// JSON documents under one data directory.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedules_path: Arc<PathBuf>,
    heaters_path: Arc<PathBuf>,
    sensors_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedules_path: Arc::new(data_dir.join("schedules.json")),
            heaters_path: Arc::new(data_dir.join("heaters.json")),
            sensors_path: Arc::new(data_dir.join("sensors.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("BREWENGINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.brewengine"));
        Self::new(data_dir)
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        self.load_or_default(&self.runtime_path, RuntimeConfig::default)
            .await
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        self.save(&self.runtime_path, runtime).await
    }

    pub async fn load_schedules(&self) -> anyhow::Result<Vec<MashSchedule>> {
        self.load_or_default(&self.schedules_path, default_schedules)
            .await
    }

    pub async fn save_schedules(&self, schedules: &[MashSchedule]) -> anyhow::Result<()> {
        self.save(&self.schedules_path, schedules).await
    }

    pub async fn load_heaters(&self) -> anyhow::Result<Vec<Heater>> {
        self.load_or_default(&self.heaters_path, || {
            HeaterBank::with_defaults().heaters().to_vec()
        })
        .await
    }

    pub async fn save_heaters(&self, heaters: &[Heater]) -> anyhow::Result<()> {
        self.save(&self.heaters_path, heaters).await
    }

    pub async fn load_sensors(&self) -> anyhow::Result<Vec<TemperatureSensor>> {
        self.load_or_default(&self.sensors_path, Vec::new).await
    }

    pub async fn save_sensors(&self, sensors: &[TemperatureSensor]) -> anyhow::Result<()> {
        self.save(&self.sensors_path, sensors).await
    }

    /// Absent or unreadable documents are replaced by the default, which is
    /// written back right away.
    async fn load_or_default<T, F>(&self, path: &Path, default: F) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce() -> T,
    {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => match serde_json::from_slice::<T>(&raw) {
                Ok(value) => return Ok(value),
                Err(err) => warn!("malformed {}, using defaults: {err}", path.display()),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("{} not found, writing defaults", path.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }

        let value = default();
        write_json(path, &value).await?;
        Ok(value)
    }

    async fn save<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(path, value).await
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_documents_fall_back_to_defaults_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path());

        let schedules = store.load_schedules().await.unwrap();
        let names: Vec<&str> = schedules.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Default", "Rye Mash"]);
        assert!(dir.path().join("schedules.json").exists());

        let heaters = store.load_heaters().await.unwrap();
        assert_eq!(heaters.len(), 2);
        assert!(dir.path().join("heaters.json").exists());

        assert!(store.load_sensors().await.unwrap().is_empty());
        assert_eq!(
            store.load_runtime_config().await.unwrap(),
            RuntimeConfig::default()
        );
    }

    #[tokio::test]
    async fn malformed_document_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = AppStore::new(dir.path());
        let runtime = store.load_runtime_config().await.unwrap();
        assert_eq!(runtime, RuntimeConfig::default());

        let rewritten: RuntimeConfig =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(rewritten, runtime);
    }

    #[tokio::test]
    async fn saved_documents_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::new(dir.path().join("nested"));

        let heaters = vec![Heater::new(3, "Element", 1, 3500)];
        store.save_heaters(&heaters).await.unwrap();
        assert_eq!(store.load_heaters().await.unwrap(), heaters);

        let mut runtime = RuntimeConfig::default();
        runtime.pid.kp = 42.0;
        store.save_runtime_config(&runtime).await.unwrap();
        assert_eq!(store.load_runtime_config().await.unwrap().pid.kp, 42.0);
    }
}
