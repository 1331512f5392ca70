use super::{status_guard, Model, ModelFields, Transition};
use crate::{error::Result, EntityKind, FieldGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Extended,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Extended => "extended",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Transition for JobStatus {
    const ALL: &'static [Self] = &[JobStatus::Active, JobStatus::Extended, JobStatus::Completed];

    fn allowed(&self) -> &'static [Self] {
        match self {
            JobStatus::Active => &[JobStatus::Extended, JobStatus::Completed],
            JobStatus::Extended => &[JobStatus::Active, JobStatus::Completed],
            JobStatus::Completed => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFields {
    pub status: JobStatus,
    pub rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub company_id: String,
    pub contractor_id: String,
}

impl JobFields {
    pub fn new(
        status: JobStatus,
        rate: f64,
        company_id: impl Into<String>,
        contractor_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            rate,
            title: None,
            company_id: company_id.into(),
            contractor_id: contractor_id.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl ModelFields for JobFields {
    const KIND: EntityKind = EntityKind::Job;

    fn guard(&self) -> Result<Option<FieldGuard>> {
        status_guard("status", self.status).map(Some)
    }
}

pub type Job = Model<JobFields>;

impl Model<JobFields> {
    /// Active or extended.
    pub fn is_active(&self) -> bool {
        matches!(self.fields.status, JobStatus::Active | JobStatus::Extended)
    }

    pub fn is_completed(&self) -> bool {
        self.fields.status == JobStatus::Completed
    }
}
