//! Typed repositories over the client.
//!
//! A [`Repository`] reads and writes one entity kind as [`Model`]s. Remote
//! payloads that do not fit the kind's schema surface as decode errors.
//!
//! Writes of persisted models and status changes carry a guard built from
//! the kind's transition table, so a retry after a conflict never moves a
//! status somewhere the table forbids.

use crate::client::ScdClient;
use crate::error::{ClientError, Result};
use crate::retry::Deadline;
use futures::future;
use scd_engine::{
    transition_guard, BatchOutcome, Conditions, EntityKind, EntityQuery, Job, JobFields, JobStatus,
    Model, ModelFields, MutationRequest, Payload, PaymentLineItem, PaymentLineItemFields,
    PaymentLineItemStatus, QueryOptions, Range, Resolved, Timelog, TimelogFields, Transition,
    Version,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;

/// Repository for one entity kind.
#[derive(Clone)]
pub struct Repository<F> {
    client: ScdClient,
    _fields: PhantomData<fn() -> F>,
}

pub type JobRepository = Repository<JobFields>;
pub type TimelogRepository = Repository<TimelogFields>;
pub type PaymentLineItemRepository = Repository<PaymentLineItemFields>;

impl<F: ModelFields> Repository<F> {
    pub fn new(client: ScdClient) -> Self {
        Self {
            client,
            _fields: PhantomData,
        }
    }

    fn kind(&self) -> &'static str {
        F::KIND.as_str()
    }

    pub async fn get(&self, id: &str) -> Result<Model<F>> {
        let entity = self.client.get_latest(self.kind(), id).await?;
        Ok(Model::from_entity(entity)?)
    }

    pub async fn get_version(&self, id: &str, version: Version) -> Result<Model<F>> {
        let entity = self.client.get_version(self.kind(), id, version).await?;
        Ok(Model::from_entity(entity)?)
    }

    /// Every version, ascending, with the current one flagged.
    pub async fn history(&self, id: &str) -> Result<Vec<Resolved<Model<F>>>> {
        let rows = self.client.get_history(self.kind(), id).await?;
        rows.into_iter()
            .map(|row| row.try_map(Model::from_entity).map_err(ClientError::from))
            .collect()
    }

    /// Current versions whose fields equal every condition.
    pub async fn find_latest(&self, conditions: Conditions) -> Result<Vec<Model<F>>> {
        let query = EntityQuery {
            conditions,
            options: QueryOptions::latest(),
            ..EntityQuery::default()
        };
        let rows = self.client.query(self.kind(), &query).await?;
        rows.into_iter()
            .map(|row| Model::from_entity(row).map_err(ClientError::from))
            .collect()
    }

    /// Persist a new model with a generated id.
    pub async fn create(&self, fields: F) -> Result<Model<F>> {
        self.save(&Model::create(fields)).await
    }

    /// Write every field of `model` as the next version.
    ///
    /// A persisted model is merged over the current version, whose status
    /// must equal the model's or be able to move to it.
    pub async fn save(&self, model: &Model<F>) -> Result<Model<F>> {
        let entity = self.client.submit(model.to_request()?).await?;
        Ok(Model::from_entity(entity)?)
    }

    /// Write only `fields` over the current version of `id`.
    pub async fn update_fields(&self, id: &str, fields: Payload) -> Result<Model<F>> {
        let request = MutationRequest::new(self.kind(), id, fields);
        let entity = self.client.submit(request).await?;
        Ok(Model::from_entity(entity)?)
    }

    /// Save many models; each one is recovered from conflicts on its own.
    pub async fn save_all(&self, models: &[Model<F>]) -> BatchOutcome {
        let entries = models.iter().map(Model::to_request).collect();
        self.client
            .batch_submit_resolved(self.kind(), entries, Deadline::none())
            .await
    }

    /// Move `model` to status `to`, after checking the transition from
    /// `from`. Every attempt checks it again against the version it merges
    /// over.
    async fn transition<S>(&self, model: &Model<F>, from: S, to: S) -> Result<Model<F>>
    where
        S: Transition + Serialize,
    {
        from.validate_transition(to)?;
        let guard = transition_guard("status", to)?;

        let mut fields = Payload::new();
        fields.insert("status".to_string(), guard.target.clone());

        let request = MutationRequest::new(self.kind(), model.envelope.id.clone(), fields).guarded(guard);
        let entity = self.client.submit(request).await?;
        Ok(Model::from_entity(entity)?)
    }

    async fn find_where(&self, field: &str, value: impl Into<Value>) -> Result<Vec<Model<F>>> {
        let mut conditions = Conditions::new();
        conditions.insert(field.to_string(), value.into());
        self.find_latest(conditions).await
    }
}

impl Repository<JobFields> {
    /// Active and extended jobs of a company.
    pub async fn active_jobs_for_company(&self, company_id: &str) -> Result<Vec<Job>> {
        let jobs = self.find_where("companyId", company_id).await?;
        Ok(jobs.into_iter().filter(Job::is_active).collect())
    }

    pub async fn active_jobs_for_contractor(&self, contractor_id: &str) -> Result<Vec<Job>> {
        let jobs = self.find_where("contractorId", contractor_id).await?;
        Ok(jobs.into_iter().filter(Job::is_active).collect())
    }

    pub async fn update_status(&self, id: &str, status: JobStatus) -> Result<Job> {
        let job = self.get(id).await?;
        self.transition(&job, job.fields.status, status).await
    }
}

impl Repository<TimelogFields> {
    /// Current timelogs recorded against one job version.
    pub async fn timelogs_for_job(&self, job_uid: &str) -> Result<Vec<Timelog>> {
        self.find_where("jobUid", job_uid).await
    }

    /// Correct the duration of a timelog; it becomes an adjusted log.
    pub async fn adjust_duration(&self, id: &str, duration: i64) -> Result<Timelog> {
        if duration < 0 {
            return Err(ClientError::InvalidPayload(format!(
                "duration must not be negative, got {duration}"
            )));
        }
        let mut timelog = self.get(id).await?;
        timelog.adjust_duration(duration);
        self.save(&timelog).await
    }
}

impl Repository<PaymentLineItemFields> {
    pub async fn payment_line_items_for_timelog(&self, timelog_uid: &str) -> Result<Vec<PaymentLineItem>> {
        self.find_where("timelogUid", timelog_uid).await
    }

    pub async fn payment_line_items_for_job(&self, job_uid: &str) -> Result<Vec<PaymentLineItem>> {
        self.find_where("jobUid", job_uid).await
    }

    /// Current line items on the active jobs of a contractor whose timelog
    /// ran inside `[start, end]`, in epoch milliseconds.
    ///
    /// Jobs are matched by the uid of their current version; any version of
    /// a timelog inside the window counts.
    pub async fn payment_line_items_for_contractor(
        &self,
        contractor_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<PaymentLineItem>> {
        let jobs = JobRepository::new(self.client.clone())
            .active_jobs_for_contractor(contractor_id)
            .await?;

        let per_job = jobs
            .iter()
            .map(|job| self.items_in_window(&job.envelope.uid, start, end));
        let mut items: Vec<PaymentLineItem> = future::try_join_all(per_job)
            .await?
            .into_iter()
            .flatten()
            .collect();
        items.sort_by(|a, b| a.envelope.id.cmp(&b.envelope.id));
        Ok(items)
    }

    pub async fn total_amount_for_contractor(&self, contractor_id: &str, start: i64, end: i64) -> Result<f64> {
        let items = self
            .payment_line_items_for_contractor(contractor_id, start, end)
            .await?;
        Ok(items.iter().map(|item| item.fields.amount).sum())
    }

    pub async fn update_status(&self, id: &str, status: PaymentLineItemStatus) -> Result<PaymentLineItem> {
        let item = self.get(id).await?;
        self.transition(&item, item.fields.status, status).await
    }

    /// Settle a line item that is being processed.
    pub async fn mark_as_paid(&self, id: &str) -> Result<PaymentLineItem> {
        self.update_status(id, PaymentLineItemStatus::Paid).await
    }

    async fn items_in_window(&self, job_uid: &str, start: i64, end: i64) -> Result<Vec<PaymentLineItem>> {
        let window = EntityQuery::history()
            .where_eq("jobUid", job_uid)
            .where_in_range("timeStart", Range::at_least(start))
            .where_in_range("timeEnd", Range::at_most(end));
        let timelogs = self
            .client
            .query(EntityKind::Timelog.as_str(), &window)
            .await?;
        let timelog_uids: HashSet<String> = timelogs.into_iter().map(|log| log.envelope.uid).collect();
        if timelog_uids.is_empty() {
            return Ok(Vec::new());
        }

        let items = self.payment_line_items_for_job(job_uid).await?;
        Ok(items
            .into_iter()
            .filter(|item| timelog_uids.contains(&item.fields.timelog_uid))
            .collect())
    }
}
