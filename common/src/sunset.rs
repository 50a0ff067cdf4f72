use chrono::{NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sunrise::{Coordinates, SolarDay, SolarEvent};
use tracing::warn;

/// Used whenever sunset cannot be computed for a location/date.
pub const FALLBACK_SUNSET: NaiveTime = match NaiveTime::from_hms_opt(18, 45, 0) {
    Some(time) => time,
    None => panic!("invalid fallback sunset"),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            latitude: 47.6062,
            longitude: -122.3321,
            timezone: "America/Los_Angeles".to_string(),
        }
    }
}

impl Location {
    pub fn tz(&self) -> Option<Tz> {
        self.timezone.parse().ok()
    }

    pub fn sanitize(&mut self) {
        if !self.latitude.is_finite() {
            self.latitude = 0.0;
        }
        if !self.longitude.is_finite() {
            self.longitude = 0.0;
        }
        self.latitude = self.latitude.clamp(-90.0, 90.0);
        self.longitude = self.longitude.clamp(-180.0, 180.0);
        if self.tz().is_none() {
            warn!(
                "unknown timezone '{}', falling back to UTC",
                self.timezone
            );
            self.timezone = "UTC".to_string();
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SunsetError {
    #[error("coordinates out of range: {latitude}, {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("no sunset on {0} at this latitude")]
    NoSunset(NaiveDate),
}

/// Local time-of-day of sunset for a location and calendar date.
///
/// Implementations never fail: when the underlying computation is
/// unavailable they return a fixed fallback time instead.
pub trait SunsetProvider: Send + Sync {
    fn sunset_for(&self, location: &Location, date: NaiveDate) -> NaiveTime;
}

/// Astronomical sunset from the `sunrise` crate, converted to the location's
/// timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolarSunset;

impl SolarSunset {
    pub fn try_sunset_for(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<NaiveTime, SunsetError> {
        let tz = location
            .tz()
            .ok_or_else(|| SunsetError::UnknownTimezone(location.timezone.clone()))?;
        let coordinates = Coordinates::new(location.latitude, location.longitude).ok_or(
            SunsetError::InvalidCoordinates {
                latitude: location.latitude,
                longitude: location.longitude,
            },
        )?;

        let sunset_utc = SolarDay::new(coordinates, date).event_time(SolarEvent::Sunset);

        // Polar day/night yields a timestamp far from the requested date.
        let anchor = date.and_time(NaiveTime::MIN).and_utc();
        let drift = sunset_utc.signed_duration_since(anchor).num_hours();
        if !(-24..=48).contains(&drift) {
            return Err(SunsetError::NoSunset(date));
        }

        Ok(sunset_utc.with_timezone(&tz).time())
    }
}

impl SunsetProvider for SolarSunset {
    fn sunset_for(&self, location: &Location, date: NaiveDate) -> NaiveTime {
        self.try_sunset_for(location, date).unwrap_or_else(|err| {
            warn!("sunset computation failed, using {FALLBACK_SUNSET}: {err}");
            FALLBACK_SUNSET
        })
    }
}

/// Always answers with the same time; for tests and offline installs.
#[derive(Debug, Clone, Copy)]
pub struct FixedSunset(pub NaiveTime);

impl Default for FixedSunset {
    fn default() -> Self {
        Self(FALLBACK_SUNSET)
    }
}

impl SunsetProvider for FixedSunset {
    fn sunset_for(&self, _location: &Location, _date: NaiveDate) -> NaiveTime {
        self.0
    }
}

/// Calendar date at `location` for the instant `now` (UTC if the timezone is
/// unknown).
pub fn local_date(location: &Location, now: chrono::DateTime<Utc>) -> NaiveDate {
    match location.tz() {
        Some(tz) => now.with_timezone(&tz).date_naive(),
        None => now.date_naive(),
    }
}
