use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use climate_common::{
    sunset::local_date, HistoryBuffer, RuntimeConfig, SensorReading, SettingsStore, SolarSunset,
    TOPIC_SENSOR_READING, TOPIC_SENSOR_STATUS,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{routes, state::AppState, store::AppStore};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let records = store.load_history().await.unwrap_or_else(|err| {
        warn!("failed to load history from store: {err:#}");
        Vec::new()
    });
    let history = HistoryBuffer::from_records(runtime.controller.history_capacity, records);
    info!(
        "restored {} of {} history records",
        history.len(),
        history.capacity()
    );

    let settings = SettingsStore::new(
        runtime.location.clone(),
        Arc::new(SolarSunset),
        runtime.settings.clone(),
    );

    let (mqtt, eventloop) = if runtime.network.mqtt_enabled {
        let (client, eventloop) = connect_mqtt(&runtime);
        (Some(client), Some(eventloop))
    } else {
        info!("mqtt disabled, readings are accepted over http only");
        (None, None)
    };

    let app_state = AppState::new(
        runtime.controller.clone(),
        settings,
        history,
        mqtt,
        store,
    );

    if let (Some(client), Some(eventloop)) = (&app_state.mqtt, eventloop) {
        client
            .subscribe(TOPIC_SENSOR_READING, QoS::AtMostOnce)
            .await
            .context("failed to subscribe to sensor readings")?;
        client
            .subscribe(TOPIC_SENSOR_STATUS, QoS::AtMostOnce)
            .await
            .context("failed to subscribe to sensor status")?;
        spawn_mqtt_loop(app_state.clone(), eventloop);
    }
    spawn_history_flush_loop(app_state.clone());
    if runtime.controller.auto_refresh_sunset {
        spawn_sunset_refresh_loop(app_state.clone());
    }

    let app = routes::router(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state
        .flush_history()
        .await
        .context("failed to flush history on shutdown")?;
    info!("controller stopped");
    Ok(())
}

fn connect_mqtt(runtime: &RuntimeConfig) -> (AsyncClient, EventLoop) {
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("climate-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    AsyncClient::new(mqtt_options, 64)
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > app_state.config.max_payload_bytes {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    match topic {
        TOPIC_SENSOR_READING => {
            let reading: SensorReading =
                serde_json::from_slice(payload).context("malformed sensor reading")?;
            if !reading.temperature.is_finite() {
                anyhow::bail!("non-finite temperature in sensor reading");
            }
            let output = app_state.ingest(reading, Utc::now()).await;
            debug!("mqtt reading -> fan={} light={}", output.fan, output.light);
        }
        TOPIC_SENSOR_STATUS => {
            let status = String::from_utf8_lossy(payload);
            info!("sensor status: {status}");
        }
        _ => {}
    }

    Ok(())
}

fn spawn_history_flush_loop(app_state: AppState) {
    let period = Duration::from_millis(app_state.config.history_flush_interval_ms);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = app_state.flush_history().await {
                warn!("history flush failed: {err:#}");
            }
        }
    });
}

/// Moves a sunset-anchored light-on to the new day's sunset once the local
/// date changes.
fn spawn_sunset_refresh_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        let mut last_date: Option<NaiveDate> = None;

        loop {
            interval.tick().await;
            let now = Utc::now();
            let today = {
                let settings = app_state.settings.lock().await;
                local_date(settings.location(), now)
            };
            if last_date == Some(today) {
                continue;
            }

            match app_state.refresh_sunset(now).await {
                Ok(Some(settings)) => {
                    info!(
                        "sunset window for {today}: {}..{}",
                        settings.light_on, settings.light_off
                    );
                }
                Ok(None) => {}
                Err(err) => warn!("failed to persist refreshed sunset: {err:#}"),
            }
            last_date = Some(today);
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
