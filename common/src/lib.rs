pub mod config;
pub mod duration;
pub mod engine;
pub mod history;
pub mod settings;
pub mod sunset;
pub mod topics;
pub mod types;

pub use config::{ControllerConfig, NetworkConfig, RuntimeConfig};
pub use duration::{parse_duration, DurationParseError, Span};
pub use engine::{evaluate, ActuationOutput, LightWindow, SensorReading};
pub use history::{HistoryBuffer, SensorRecord};
pub use settings::{LightOnSource, Settings, SettingsError, SettingsStore, SettingsUpdate};
pub use sunset::{FixedSunset, Location, SolarSunset, SunsetProvider};
pub use topics::*;
pub use types::{ControllerStatus, HistoryEntry};
