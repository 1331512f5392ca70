use super::{status_guard, Model, ModelFields, Transition};
use crate::{error::Result, EntityKind, FieldGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

const MILLIS_PER_HOUR: f64 = 60.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelogType {
    Captured,
    Adjusted,
}

impl fmt::Display for TimelogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelogType::Captured => f.write_str("captured"),
            TimelogType::Adjusted => f.write_str("adjusted"),
        }
    }
}

impl Transition for TimelogType {
    const ALL: &'static [Self] = &[TimelogType::Captured, TimelogType::Adjusted];

    fn allowed(&self) -> &'static [Self] {
        match self {
            TimelogType::Captured => &[TimelogType::Adjusted],
            TimelogType::Adjusted => &[],
        }
    }
}

/// Times are milliseconds since the epoch; `duration` is in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelogFields {
    pub duration: i64,
    pub time_start: i64,
    pub time_end: i64,
    #[serde(rename = "type")]
    pub kind: TimelogType,
    pub job_uid: String,
}

impl TimelogFields {
    /// A captured interval for a job version.
    pub fn captured(job_uid: impl Into<String>, time_start: i64, time_end: i64) -> Self {
        Self {
            duration: time_end - time_start,
            time_start,
            time_end,
            kind: TimelogType::Captured,
            job_uid: job_uid.into(),
        }
    }
}

impl ModelFields for TimelogFields {
    const KIND: EntityKind = EntityKind::Timelog;

    fn guard(&self) -> Result<Option<FieldGuard>> {
        status_guard("type", self.kind).map(Some)
    }
}

pub type Timelog = Model<TimelogFields>;

impl Model<TimelogFields> {
    pub fn duration_hours(&self) -> f64 {
        self.fields.duration as f64 / MILLIS_PER_HOUR
    }

    /// Set a corrected duration; the end time follows and the log becomes
    /// adjusted.
    pub fn adjust_duration(&mut self, duration: i64) {
        self.fields.duration = duration;
        self.fields.time_end = self.fields.time_start + duration;
        self.fields.kind = TimelogType::Adjusted;
    }
}
