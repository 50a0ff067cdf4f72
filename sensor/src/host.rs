use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use climate_common::{
    ActuationOutput, SensorReading, TOPIC_CONTROLLER_ACTUATION, TOPIC_SENSOR_READING,
    TOPIC_SENSOR_STATUS,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{info, warn};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let interval_secs = std::env::var("SENSOR_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(5);

    let mut mqtt_options = MqttOptions::new("climate-sensor", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.subscribe(TOPIC_CONTROLLER_ACTUATION, QoS::AtMostOnce)
        .await
        .context("failed to subscribe to actuation topic")?;
    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message)))
                    if message.topic == TOPIC_CONTROLLER_ACTUATION =>
                {
                    match serde_json::from_slice::<ActuationOutput>(&message.payload) {
                        Ok(output) => {
                            info!("actuation: fan={} light={}", output.fan, output.light)
                        }
                        Err(err) => warn!("malformed actuation payload: {err}"),
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("sensor mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!("sensor publisher started");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let reading = simulated_reading(tick, timestamp);
        let payload = serde_json::to_vec(&reading).context("failed to encode sensor reading")?;

        mqtt.publish(TOPIC_SENSOR_READING, QoS::AtLeastOnce, false, payload)
            .await
            .context("failed to publish sensor reading")?;
    }
}

/// Slow temperature drift around 24-26 C; presence alternates in runs of
/// three readings.
fn simulated_reading(tick: u64, device_timestamp: String) -> SensorReading {
    let temperature = 24.0 + ((tick % 10) as f32 * 0.25);
    let presence = (tick / 3) % 2 == 0;

    SensorReading {
        temperature,
        presence,
        device_timestamp,
    }
}
