use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{history::SensorRecord, settings::Settings};

/// Reading as sent by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f32,
    pub presence: bool,
    #[serde(alias = "datetime")]
    pub device_timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationOutput {
    pub fan: bool,
    pub light: bool,
}

/// Daily interval in which the light may be on. Both ends are inclusive and
/// `on > off` means the window runs across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightWindow {
    pub on: NaiveTime,
    pub off: NaiveTime,
}

impl LightWindow {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            on: settings.light_on,
            off: settings.light_off,
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.on > self.off
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.wraps_midnight() {
            time >= self.on || time <= self.off
        } else {
            self.on <= time && time <= self.off
        }
    }
}

/// Decides fan and light for one reading.
///
/// `now` must be in the controller's local timezone: its time-of-day is
/// compared against the light window. The returned record is stamped with
/// `now` and should be appended to the history by the caller.
pub fn evaluate(
    settings: &Settings,
    now: DateTime<FixedOffset>,
    reading: SensorReading,
) -> (ActuationOutput, SensorRecord) {
    let window_active = LightWindow::from_settings(settings).contains(now.time());

    let output = ActuationOutput {
        fan: reading.presence && reading.temperature >= settings.temperature_trigger,
        light: reading.presence && window_active,
    };

    debug!(
        "evaluated reading temp={} presence={} window_active={} -> {:?}",
        reading.temperature, reading.presence, window_active, output
    );

    let record = SensorRecord {
        temperature: reading.temperature,
        presence: reading.presence,
        device_timestamp: reading.device_timestamp,
        received_at: now.with_timezone(&Utc),
    };

    (output, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Span;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn hms(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).unwrap()
    }

    fn local(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, hour, minute, 0)
            .unwrap()
    }

    fn settings(trigger: f32, light_on: NaiveTime, duration: Span) -> Settings {
        Settings {
            temperature_trigger: trigger,
            light_on,
            light_off: duration.end_from(light_on),
            light_on_source: crate::settings::LightOnSource::Fixed,
            light_duration: duration,
        }
    }

    fn reading(temperature: f32, presence: bool) -> SensorReading {
        SensorReading {
            temperature,
            presence,
            device_timestamp: "2026-01-05T23:00:00".to_string(),
        }
    }

    #[test]
    fn wrapped_window_is_active_late_evening_and_early_morning() {
        let settings = settings(25.0, hms(22, 0, 0), Span::new(4, 0, 0));
        assert_eq!(settings.light_off, hms(2, 0, 0));

        let (late, _) = evaluate(&settings, local(23, 0), reading(20.0, true));
        let (early, _) = evaluate(&settings, local(1, 30), reading(20.0, true));
        let (morning, _) = evaluate(&settings, local(10, 0), reading(20.0, true));

        assert!(late.light);
        assert!(early.light);
        assert!(!morning.light);
    }

    #[test]
    fn same_day_window_includes_both_ends() {
        let window = LightWindow {
            on: hms(18, 30, 0),
            off: hms(22, 30, 0),
        };

        assert!(!window.wraps_midnight());
        assert!(window.contains(hms(18, 30, 0)));
        assert!(window.contains(hms(22, 30, 0)));
        assert!(!window.contains(hms(18, 29, 59)));
        assert!(!window.contains(hms(22, 30, 1)));
    }

    #[test]
    fn wrapped_window_includes_both_ends() {
        let window = LightWindow {
            on: hms(22, 0, 0),
            off: hms(2, 0, 0),
        };

        assert!(window.wraps_midnight());
        assert!(window.contains(hms(22, 0, 0)));
        assert!(window.contains(hms(0, 0, 0)));
        assert!(window.contains(hms(2, 0, 0)));
        assert!(!window.contains(hms(2, 0, 1)));
        assert!(!window.contains(hms(21, 59, 59)));
    }

    #[test]
    fn light_needs_presence() {
        let settings = settings(25.0, hms(22, 0, 0), Span::new(4, 0, 0));
        let (output, _) = evaluate(&settings, local(23, 0), reading(20.0, false));
        assert!(!output.light);
    }

    #[test]
    fn fan_follows_trigger_and_presence() {
        let settings = settings(25.0, hms(18, 30, 0), Span::new(4, 0, 0));

        let (hot, _) = evaluate(&settings, local(12, 0), reading(26.0, true));
        let (cool, _) = evaluate(&settings, local(12, 0), reading(24.9, true));
        let (empty, _) = evaluate(&settings, local(12, 0), reading(30.0, false));
        let (at_trigger, _) = evaluate(&settings, local(12, 0), reading(25.0, true));

        assert!(hot.fan);
        assert!(!cool.fan);
        assert!(!empty.fan);
        assert!(at_trigger.fan);
    }

    #[test]
    fn record_carries_reading_and_receive_time() {
        let settings = Settings::default();
        let now = local(23, 0);
        let (_, record) = evaluate(&settings, now, reading(21.5, true));

        assert_eq!(record.temperature, 21.5);
        assert!(record.presence);
        assert_eq!(record.device_timestamp, "2026-01-05T23:00:00");
        assert_eq!(record.received_at, Utc.with_ymd_and_hms(2026, 1, 6, 7, 0, 0).unwrap());
    }

    #[test]
    fn reading_accepts_device_field_names() {
        let reading: SensorReading = serde_json::from_str(
            r#"{"temperature": 22.5, "presence": true, "datetime": "2023-02-23T18:22:28"}"#,
        )
        .unwrap();
        assert_eq!(reading.device_timestamp, "2023-02-23T18:22:28");
    }
}
