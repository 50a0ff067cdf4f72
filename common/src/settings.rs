use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::{
    duration::{parse_duration, Span},
    sunset::{local_date, Location, SunsetProvider},
};

pub const SUNSET_TOKEN: &str = "sunset";

/// Light-off used when the duration in an update cannot be parsed.
pub const FALLBACK_LIGHT_OFF: NaiveTime = match NaiveTime::from_hms_opt(22, 30, 0) {
    Some(time) => time,
    None => panic!("invalid fallback light-off"),
};

const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightOnSource {
    Fixed,
    Sunset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub temperature_trigger: f32,
    #[serde(with = "hms")]
    pub light_on: NaiveTime,
    #[serde(with = "hms")]
    pub light_off: NaiveTime,
    pub light_on_source: LightOnSource,
    pub light_duration: Span,
}

impl Default for Settings {
    fn default() -> Self {
        let light_on = NaiveTime::from_hms_opt(18, 30, 0).unwrap_or(NaiveTime::MIN);
        let light_duration = Span::new(4, 0, 0);
        Self {
            temperature_trigger: 25.0,
            light_on,
            light_off: light_duration.end_from(light_on),
            light_on_source: LightOnSource::Fixed,
            light_duration,
        }
    }
}

impl Settings {
    /// Restores the derived `light_off` after loading from disk.
    pub fn sanitize(&mut self) {
        if !self.temperature_trigger.is_finite() {
            self.temperature_trigger = Settings::default().temperature_trigger;
        }
        self.light_off = self.light_duration.end_from(self.light_on);
    }
}

/// Settings change as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(alias = "user_temp", deserialize_with = "number_or_numeric_string")]
    pub temperature: f32,
    #[serde(alias = "user_light")]
    pub light_on_spec: String,
    #[serde(alias = "light_duration")]
    pub duration_spec: String,
}

/// The dashboard posts the trigger straight from a text input, so it can
/// arrive as `"26.5"` as well as `26.5`.
fn number_or_numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text
            .trim()
            .parse::<f32>()
            .map_err(|_| D::Error::custom(format!("invalid temperature '{text}'"))),
    }
}

/// Strict two-digit `HH:MM:SS`; no single-digit fields, no leap second.
fn parse_hms(raw: &str) -> Option<NaiveTime> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 8
        && bytes[2] == b':'
        && bytes[5] == b':'
        && [0, 1, 3, 4, 6, 7]
            .iter()
            .all(|&index| bytes[index].is_ascii_digit());
    if !shaped {
        return None;
    }

    let time = NaiveTime::parse_from_str(raw, TIME_FORMAT).ok()?;
    (time.nanosecond() < 1_000_000_000).then_some(time)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid light-on time '{0}' (expected HH:MM:SS or 'sunset')")]
    InvalidLightOn(String),
    #[error("temperature trigger must be a finite number")]
    InvalidTemperature,
}

/// The single active configuration plus what is needed to resolve updates.
pub struct SettingsStore {
    current: Settings,
    location: Location,
    sunset: Arc<dyn SunsetProvider>,
}

impl SettingsStore {
    pub fn new(location: Location, sunset: Arc<dyn SunsetProvider>, initial: Settings) -> Self {
        Self {
            current: initial,
            location,
            sunset,
        }
    }

    pub fn get(&self) -> Settings {
        self.current.clone()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Resolves `update` against the clock and installs it.
    ///
    /// A bad light-on literal rejects the whole update and leaves the stored
    /// settings untouched. A bad duration does not: the window falls back to
    /// ending at [`FALLBACK_LIGHT_OFF`].
    pub fn replace(
        &mut self,
        update: &SettingsUpdate,
        now: DateTime<Utc>,
    ) -> Result<Settings, SettingsError> {
        if !update.temperature.is_finite() {
            return Err(SettingsError::InvalidTemperature);
        }

        let (light_on, light_on_source) = self.resolve_light_on(&update.light_on_spec, now)?;

        let (light_duration, light_off) = match parse_duration(&update.duration_spec) {
            Ok(span) => (span, span.end_from(light_on)),
            Err(err) => {
                warn!(
                    "{err}; light window for '{}' ends at {FALLBACK_LIGHT_OFF}",
                    update.duration_spec
                );
                (
                    Span::between(light_on, FALLBACK_LIGHT_OFF),
                    FALLBACK_LIGHT_OFF,
                )
            }
        };

        let settings = Settings {
            temperature_trigger: update.temperature,
            light_on,
            light_off,
            light_on_source,
            light_duration,
        };
        debug!(
            "settings replaced: trigger={} window={}..{} ({:?})",
            settings.temperature_trigger,
            settings.light_on,
            settings.light_off,
            settings.light_on_source
        );
        self.current = settings.clone();
        Ok(settings)
    }

    /// Re-resolves a sunset-anchored window for the date of `now`.
    ///
    /// Returns `None` when light-on is a fixed time.
    pub fn refresh_sunset(&mut self, now: DateTime<Utc>) -> Option<Settings> {
        if self.current.light_on_source != LightOnSource::Sunset {
            return None;
        }

        let light_on = self
            .sunset
            .sunset_for(&self.location, local_date(&self.location, now));
        self.current.light_on = light_on;
        self.current.light_off = self.current.light_duration.end_from(light_on);
        Some(self.current.clone())
    }

    fn resolve_light_on(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<(NaiveTime, LightOnSource), SettingsError> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(SUNSET_TOKEN) {
            let date = local_date(&self.location, now);
            let sunset = self.sunset.sunset_for(&self.location, date);
            return Ok((sunset, LightOnSource::Sunset));
        }

        parse_hms(raw)
            .map(|time| (time, LightOnSource::Fixed))
            .ok_or_else(|| SettingsError::InvalidLightOn(raw.to_string()))
    }
}

mod hms {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::{parse_hms, TIME_FORMAT};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_hms(&raw).ok_or_else(|| D::Error::custom(format!("invalid time '{raw}'")))
    }
}
