use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use climate_common::{
    evaluate, ActuationOutput, ControllerConfig, ControllerStatus, HistoryBuffer, LightWindow,
    SensorReading, SensorRecord, Settings, SettingsError, SettingsStore, SettingsUpdate,
    TOPIC_CONTROLLER_ACTUATION, TOPIC_CONTROLLER_SETTINGS,
};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::AppStore;

/// Process-wide state shared by the HTTP handlers, the MQTT loop and the
/// background tasks. Settings and history each have their own lock.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Mutex<SettingsStore>>,
    pub history: Arc<Mutex<HistoryBuffer>>,
    pub last_actuation: Arc<Mutex<Option<ActuationOutput>>>,
    pub history_dirty: Arc<AtomicBool>,
    pub config: Arc<ControllerConfig>,
    pub mqtt: Option<AsyncClient>,
    pub store: AppStore,
}

impl AppState {
    pub fn new(
        config: ControllerConfig,
        settings: SettingsStore,
        history: HistoryBuffer,
        mqtt: Option<AsyncClient>,
        store: AppStore,
    ) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            history: Arc::new(Mutex::new(history)),
            last_actuation: Arc::new(Mutex::new(None)),
            history_dirty: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
            mqtt,
            store,
        }
    }

    pub async fn current_settings(&self) -> Settings {
        self.settings.lock().await.get()
    }

    /// Resolves and installs a settings update, then persists and publishes
    /// the result. Persistence failures are returned after the in-memory
    /// settings have already changed.
    ///
    /// The settings lock is held until the file is written, so the order of
    /// writes on disk follows the order of updates in memory.
    pub async fn apply_settings(
        &self,
        update: &SettingsUpdate,
        now: DateTime<Utc>,
    ) -> Result<Settings, ApplyError> {
        let mut store = self.settings.lock().await;
        let settings = store.replace(update, now)?;

        self.publish_json(TOPIC_CONTROLLER_SETTINGS, true, &settings);
        self.store
            .save_settings(&settings)
            .await
            .map_err(ApplyError::Persist)?;
        drop(store);
        Ok(settings)
    }

    /// Re-resolves a sunset-anchored light-on for the date of `now`.
    pub async fn refresh_sunset(&self, now: DateTime<Utc>) -> anyhow::Result<Option<Settings>> {
        let mut store = self.settings.lock().await;
        let refreshed = store.refresh_sunset(now);

        if let Some(settings) = &refreshed {
            self.publish_json(TOPIC_CONTROLLER_SETTINGS, true, settings);
            self.store.save_settings(settings).await?;
        }
        drop(store);
        Ok(refreshed)
    }

    /// Evaluates one reading against the current settings and records it.
    pub async fn ingest(&self, reading: SensorReading, now: DateTime<Utc>) -> ActuationOutput {
        let settings = self.current_settings().await;
        let local_now = self.local_time(now).await;

        let (output, record) = evaluate(&settings, local_now, reading);

        self.history.lock().await.append(record);
        self.history_dirty.store(true, Ordering::Relaxed);
        *self.last_actuation.lock().await = Some(output);

        self.publish_json(TOPIC_CONTROLLER_ACTUATION, true, &output);
        output
    }

    pub async fn recent(&self, count: usize) -> Vec<SensorRecord> {
        self.history.lock().await.recent(count)
    }

    pub async fn history_capacity(&self) -> usize {
        self.history.lock().await.capacity()
    }

    pub async fn status(&self, now: DateTime<Utc>) -> ControllerStatus {
        let settings = self.current_settings().await;
        let timezone = self.settings.lock().await.location().timezone.clone();
        let local_now = self.local_time(now).await;
        let window = LightWindow::from_settings(&settings);

        let (history_len, history_capacity, last_reading_epoch) = {
            let history = self.history.lock().await;
            (
                history.len(),
                history.capacity(),
                history.latest().map(|record| record.received_at.timestamp()),
            )
        };

        ControllerStatus {
            window_active: window.contains(local_now.time()),
            window_wraps_midnight: window.wraps_midnight(),
            last_actuation: *self.last_actuation.lock().await,
            last_reading_epoch,
            history_len,
            history_capacity,
            timezone,
            settings,
        }
    }

    /// Writes the history to disk if it changed since the last flush.
    pub async fn flush_history(&self) -> anyhow::Result<bool> {
        if !self.history_dirty.swap(false, Ordering::Relaxed) {
            return Ok(false);
        }

        let records: Vec<SensorRecord> = {
            let history = self.history.lock().await;
            history.iter().cloned().collect()
        };

        if let Err(err) = self.store.save_history(&records).await {
            self.history_dirty.store(true, Ordering::Relaxed);
            return Err(err);
        }
        debug!("flushed {} history records", records.len());
        Ok(true)
    }

    /// `now` in the configured location's timezone.
    pub async fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let tz = self.settings.lock().await.location().tz();
        match tz {
            Some(tz) => {
                let local = now.with_timezone(&tz);
                local.with_timezone(&local.offset().fix())
            }
            None => now.fixed_offset(),
        }
    }

    /// Queues a JSON publish without waiting on the event loop, which may be
    /// the caller.
    fn publish_json<T: Serialize>(&self, topic: &str, retain: bool, value: &T) {
        let Some(mqtt) = &self.mqtt else {
            return;
        };

        match serde_json::to_vec(value) {
            Ok(body) => {
                if let Err(err) = mqtt.try_publish(topic, QoS::AtLeastOnce, retain, body) {
                    warn!("publish to {topic} failed: {err}");
                }
            }
            Err(err) => warn!("serialization for {topic} failed: {err}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Invalid(#[from] SettingsError),
    #[error("failed to persist settings: {0:#}")]
    Persist(anyhow::Error),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::scratch_dir;
    use chrono::{NaiveTime, TimeZone};
    use climate_common::{FixedSunset, LightOnSource, Location};

    pub(crate) fn hms(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).unwrap()
    }

    pub(crate) fn test_state(name: &str, capacity: usize) -> AppState {
        let location = Location {
            latitude: 0.0,
            longitude: 0.0,
            timezone: "UTC".to_string(),
        };
        let settings = SettingsStore::new(
            location,
            Arc::new(FixedSunset(hms(18, 45, 0))),
            Settings::default(),
        );
        AppState::new(
            ControllerConfig::default(),
            settings,
            HistoryBuffer::new(capacity),
            None,
            AppStore::at(scratch_dir(name)),
        )
    }

    pub(crate) fn update(temperature: f32, light_on: &str, duration: &str) -> SettingsUpdate {
        SettingsUpdate {
            temperature,
            light_on_spec: light_on.to_string(),
            duration_spec: duration.to_string(),
        }
    }

    fn reading(temperature: f32, presence: bool) -> SensorReading {
        SensorReading {
            temperature,
            presence,
            device_timestamp: "device".to_string(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn wrapped_window_drives_light_through_ingest() {
        let state = test_state("ingest-window", 10);
        let settings = state
            .apply_settings(&update(25.0, "22:00:00", "4h"), at(12, 0))
            .await
            .unwrap();
        assert_eq!(settings.light_off, hms(2, 0, 0));

        let night = state.ingest(reading(20.0, true), at(23, 0)).await;
        let morning = state.ingest(reading(20.0, true), at(10, 0)).await;

        assert!(night.light);
        assert!(!morning.light);
        assert_eq!(state.recent(10).await.len(), 2);
    }

    #[tokio::test]
    async fn sunset_update_uses_provider_time() {
        let state = test_state("sunset", 10);
        let settings = state
            .apply_settings(&update(25.0, "sunset", "2h"), at(12, 0))
            .await
            .unwrap();

        assert_eq!(settings.light_on, hms(18, 45, 0));
        assert_eq!(settings.light_off, hms(20, 45, 0));
        assert_eq!(settings.light_on_source, LightOnSource::Sunset);
    }

    #[tokio::test]
    async fn rejected_update_keeps_previous_settings() {
        let state = test_state("rejected", 10);
        let result = state
            .apply_settings(&update(25.0, "half past six", "4h"), at(12, 0))
            .await;

        assert!(matches!(result, Err(ApplyError::Invalid(_))));
        assert_eq!(state.current_settings().await, Settings::default());
    }

    #[tokio::test]
    async fn applied_settings_are_persisted() {
        let state = test_state("persisted", 10);
        let settings = state
            .apply_settings(&update(28.0, "07:00:00", "30m"), at(12, 0))
            .await
            .unwrap();

        let runtime = state.store.load_runtime_config().await.unwrap();
        assert_eq!(runtime.settings, settings);
    }

    #[tokio::test]
    async fn history_flush_only_writes_when_dirty() {
        let state = test_state("flush", 3);
        assert!(!state.flush_history().await.unwrap());

        for index in 0..5 {
            state
                .ingest(reading(20.0 + index as f32, false), at(9, index))
                .await;
        }
        assert!(state.flush_history().await.unwrap());
        assert!(!state.flush_history().await.unwrap());

        let saved = state.store.load_history().await.unwrap();
        let temps: Vec<f32> = saved.iter().map(|record| record.temperature).collect();
        assert_eq!(temps, vec![22.0, 23.0, 24.0]);
    }

    #[tokio::test]
    async fn status_reports_window_and_last_actuation() {
        let state = test_state("status", 10);
        state.ingest(reading(30.0, true), at(19, 0)).await;

        let status = state.status(at(19, 0)).await;
        assert!(status.window_active);
        assert!(!status.window_wraps_midnight);
        assert_eq!(
            status.last_actuation,
            Some(ActuationOutput {
                fan: true,
                light: true
            })
        );
        assert_eq!(status.history_len, 1);
        assert_eq!(status.history_capacity, 10);
        assert_eq!(status.timezone, "UTC");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_replace_never_tears_settings() {
        let state = test_state("concurrent", 50);
        let old = state.current_settings().await;
        let new = {
            let mut store = SettingsStore::new(
                Location::default(),
                Arc::new(FixedSunset(hms(18, 45, 0))),
                Settings::default(),
            );
            store
                .replace(&update(31.0, "21:15:00", "5h"), at(12, 0))
                .unwrap()
        };

        let mut readers = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            let (old, new) = (old.clone(), new.clone());
            readers.push(tokio::spawn(async move {
                for minute in 0..50 {
                    let seen = state.current_settings().await;
                    assert!(seen == old || seen == new, "torn settings: {seen:?}");
                    state.ingest(reading(20.0, true), at(10, minute)).await;
                    assert!(state.recent(5).await.len() <= 5);
                }
            }));
        }

        state
            .apply_settings(&update(31.0, "21:15:00", "5h"), at(12, 0))
            .await
            .unwrap();

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(state.current_settings().await, new);
        assert_eq!(state.recent(1_000).await.len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_persist_the_last_applied() {
        let state = test_state("persist-order", 10);

        for round in 0..10 {
            let mut writers = Vec::new();
            for index in 0..16u32 {
                let state = state.clone();
                let light_on = format!("{:02}:{:02}:00", index, round);
                writers.push(tokio::spawn(async move {
                    state
                        .apply_settings(&update(20.0 + index as f32, &light_on, "1h"), at(12, 0))
                        .await
                        .unwrap();
                }));
            }
            for writer in writers {
                writer.await.unwrap();
            }

            let runtime = state.store.load_runtime_config().await.unwrap();
            assert_eq!(runtime.settings, state.current_settings().await);
        }
    }
}
