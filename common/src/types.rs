use serde::Serialize;

use crate::{engine::ActuationOutput, history::SensorRecord, settings::Settings};

/// History entry as served to the dashboard graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub temperature: f32,
    pub presence: bool,
    pub datetime: String,
}

impl From<&SensorRecord> for HistoryEntry {
    fn from(record: &SensorRecord) -> Self {
        Self {
            temperature: record.temperature,
            presence: record.presence,
            datetime: record.device_timestamp.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub settings: Settings,
    pub window_active: bool,
    pub window_wraps_midnight: bool,
    pub last_actuation: Option<ActuationOutput>,
    pub last_reading_epoch: Option<i64>,
    pub history_len: usize,
    pub history_capacity: usize,
    pub timezone: String,
}
