use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use climate_common::{RuntimeConfig, SensorRecord, Settings};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

/// JSON files holding the runtime config (with the active settings) and the
/// reading history.
#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    history_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("CLIMATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.climate"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            history_path: Arc::new(data_dir.join("history.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        Ok(read_json(&self.runtime_path).await?.unwrap_or_default())
    }

    /// Stores `settings` inside the persisted runtime config.
    pub async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut runtime: RuntimeConfig = read_json(&self.runtime_path).await?.unwrap_or_default();
        runtime.settings = settings.clone();
        write_json(&self.runtime_path, &runtime).await
    }

    pub async fn load_history(&self) -> anyhow::Result<Vec<SensorRecord>> {
        let _guard = self.lock.lock().await;
        Ok(read_json(&self.history_path).await?.unwrap_or_default())
    }

    pub async fn save_history(&self, records: &[SensorRecord]) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.history_path, records).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice::<T>(&raw)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "climate-controller-{}-{name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
