//! Protocol tests for scd-engine
//!
//! These exercise version families, resolution and mutation planning
//! together, the way a store and its writers use them.

use proptest::prelude::*;
use scd_engine::{
    generate_uid, latest_per_identity, mark_latest, partition_batch, Entity, EntityQuery, Error,
    Expectation, Job, JobStatus, MutationRequest, Payload, RetryBudget, RetryStep, SortDirection,
    VersionFamily, Versioned,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

fn request(value: Value) -> MutationRequest {
    MutationRequest::from_value("job", value).unwrap()
}

fn seed(id: &str, fields: Value) -> VersionFamily {
    let creation = request(json!({"id": id})).creation();
    let mut family = VersionFamily::create(&creation, generate_uid("job"), 1_000).unwrap();

    let mut payload = fields.as_object().cloned().unwrap_or_default();
    payload.insert("id".into(), json!(id));
    let submission = MutationRequest::from_payload("job", payload)
        .unwrap()
        .submission_over(Some(family.current()));
    family.append(&submission, generate_uid("job"), 2_000).unwrap();
    family
}

// ============================================================================
// Fencing
// ============================================================================

#[test]
fn job_abc_scenario() {
    // v2 is current with status active
    let mut family = seed("job_abc", json!({"status": "active", "rate": 50.0}));
    let v2 = family.current().clone();
    assert_eq!(v2.envelope.version, 2);

    // Writer A pins v2 and extends the job
    let a = request(json!({
        "id": "job_abc",
        "version": 2,
        "uid": v2.envelope.uid,
        "status": "extended"
    }));
    family
        .append(&a.pinned_submission().unwrap(), generate_uid("job"), 3_000)
        .unwrap();
    assert_eq!(family.current().envelope.version, 3);

    // Writer B also pinned v2 and loses the race
    let b = request(json!({
        "id": "job_abc",
        "version": 2,
        "uid": v2.envelope.uid,
        "rate": 80.0
    }));
    let err = family
        .append(&b.pinned_submission().unwrap(), generate_uid("job"), 3_001)
        .unwrap_err();
    assert!(err.is_conflict());

    // B refetches v3, re-merges its fields and wins v4
    let retry = b.submission_over(Some(family.current()));
    family.append(&retry, generate_uid("job"), 3_002).unwrap();

    let v4 = family.current();
    assert_eq!(v4.envelope.version, 4);
    assert_eq!(v4.payload["status"], "extended");
    assert_eq!(v4.payload["rate"], 80.0);

    let job = Job::from_entity(v4.clone());
    // company and contractor were never set, so the typed decode refuses it
    assert!(matches!(job, Err(Error::Decode { .. })));
}

#[test]
fn creation_race_has_one_winner() {
    let first = request(json!({"id": "job_new", "status": "active"})).creation();
    let family = VersionFamily::create(&first, "job_uid_a", 1).unwrap();

    let second = request(json!({"id": "job_new", "status": "completed"})).creation();
    assert_eq!(
        family.check(&second.expect),
        Err(Error::AlreadyExists("job_new".into()))
    );
}

#[test]
fn update_of_absent_identity_is_not_found() {
    let pinned = request(json!({"id": "ghost", "version": 1}))
        .pinned_submission()
        .unwrap();
    assert_eq!(
        VersionFamily::create(&pinned, "u", 1),
        Err(Error::EntityNotFound("ghost".into()))
    );
}

#[test]
fn pinned_update_keeps_unsent_fields() {
    let mut family = seed("job_1", json!({"status": "active", "rate": 50.0, "title": "Dev"}));
    let current = family.current().envelope.clone();

    let pinned = request(json!({
        "id": "job_1",
        "version": current.version,
        "uid": current.uid,
        "rate": 55.0
    }));
    family
        .append(&pinned.pinned_submission().unwrap(), "u_next", 5_000)
        .unwrap();

    let latest = family.current();
    assert_eq!(latest.payload["title"], "Dev");
    assert_eq!(latest.payload["rate"], 55.0);
    assert!(latest.envelope.is_successor_of(&current));
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn latest_only_one_row_per_identity() {
    let mut rows = Vec::new();
    let mut first = seed("first", json!({"n": 2}));
    let submission = request(json!({"id": "first", "n": 3})).submission_over(Some(first.current()));
    first.append(&submission, "first_v3", 3_000).unwrap();
    rows.extend(first.history().iter().cloned());

    let second = VersionFamily::create(&request(json!({"id": "second"})).creation(), "second_v1", 1).unwrap();
    rows.extend(second.history().iter().cloned());

    let latest = latest_per_identity(rows.clone());
    let versions: BTreeMap<_, _> = latest
        .iter()
        .map(|e| (e.envelope.id.clone(), e.envelope.version))
        .collect();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions["first"], 3);
    assert_eq!(versions["second"], 1);

    let flagged = mark_latest(rows);
    assert_eq!(flagged.iter().filter(|r| r.is_latest).count(), 2);
}

#[test]
fn history_query_is_ascending_and_idempotent() {
    let family = seed("job_h", json!({"status": "active"}));
    let rows = family.history().to_vec();

    let query = EntityQuery::history().sort_by("version", SortDirection::Asc);
    let first = query.evaluate(rows.clone());
    let second = query.evaluate(rows);
    assert_eq!(first, second);

    let versions: Vec<_> = first.iter().map(|e| e.version()).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn absent_identity_is_empty_for_bulk_reads() {
    let query = EntityQuery::latest().where_eq("id", "nobody");
    let family = seed("job_1", json!({}));
    assert!(query.evaluate(family.history().to_vec()).is_empty());
}

// ============================================================================
// Batch and retry bookkeeping
// ============================================================================

#[test]
fn batch_partition_reports_entries_individually() {
    let payloads: Vec<Payload> = vec![
        json!({"id": "a"}),
        json!({"id": "b", "version": "two"}),
        json!({"id": "c"}),
    ]
    .into_iter()
    .map(|v| v.as_object().cloned().unwrap())
    .collect();

    let (requests, failures) = partition_batch("job", payloads);
    assert_eq!(requests.len(), 2);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
}

#[test]
fn default_conflict_budget_is_twice_transport_retries() {
    let mut budget = RetryBudget::for_max_retries(3);
    let retries = std::iter::from_fn(|| match budget.record_conflict() {
        RetryStep::Retry { attempt } => Some(attempt),
        RetryStep::GiveUp { .. } => None,
    })
    .count();
    assert_eq!(retries, 6);
}

#[test]
fn status_round_trips_through_entity() {
    let entity: Entity = serde_json::from_value(json!({
        "id": "job_t",
        "entityType": "job",
        "version": 1,
        "uid": "job_uid_t",
        "createdAt": 1,
        "updatedAt": 1,
        "payload": {"status": "completed", "rate": 1, "companyId": "c", "contractorId": "k"}
    }))
    .unwrap();
    let job = Job::from_entity(entity).unwrap();
    assert_eq!(job.fields.status, JobStatus::Completed);
    assert_eq!(job.uid(), "job_uid_t");
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_accepted_writes_are_contiguous(
        // Each step is a writer that read `lag` versions ago
        lags in proptest::collection::vec(0u64..3, 1..40),
    ) {
        let creation = request(json!({"id": "p"})).creation();
        let mut family = VersionFamily::create(&creation, generate_uid("job"), 0).unwrap();
        let mut accepted = 1u64;

        for (step, lag) in lags.into_iter().enumerate() {
            let current = family.current().envelope.version;
            let seen = current.saturating_sub(lag).max(1);
            let uid = family.get(seen).map(|e| e.envelope.uid.clone());
            let writer = request(json!({"id": "p", "step": step})).pinned(seen, uid);

            match family.append(&writer.pinned_submission().unwrap(), generate_uid("job"), step as i64) {
                Ok(_) => {
                    prop_assert_eq!(seen, current);
                    accepted += 1;
                }
                Err(err) => {
                    prop_assert!(err.is_conflict());
                    prop_assert!(seen < current);
                }
            }
        }

        let versions: Vec<_> = family.history().iter().map(|e| e.envelope.version).collect();
        let expected: Vec<_> = (1..=accepted).collect();
        prop_assert_eq!(versions, expected);

        let uids: HashSet<_> = family.history().iter().map(|e| e.envelope.uid.clone()).collect();
        prop_assert_eq!(uids.len() as u64, accepted);
    }

    #[test]
    fn prop_latest_matches_brute_force(
        rows in proptest::collection::vec((0u8..5, 1u64..6), 0..50),
    ) {
        let entities: Vec<Entity> = rows
            .iter()
            .enumerate()
            .map(|(n, (id, version))| {
                let mut envelope = scd_engine::VersionEnvelope::unsaved("job", format!("id{id}"));
                envelope.version = *version;
                envelope.uid = format!("u{n}");
                Entity::new(envelope, Payload::new())
            })
            .collect();

        let mut expected: BTreeMap<String, u64> = BTreeMap::new();
        for entity in &entities {
            let max = expected.entry(entity.envelope.id.clone()).or_insert(0);
            *max = (*max).max(entity.envelope.version);
        }

        let latest = latest_per_identity(entities);
        let actual: BTreeMap<String, u64> = latest
            .into_iter()
            .map(|e| (e.envelope.id, e.envelope.version))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_submission_never_targets_older_than_observed(
        baseline_version in 1u64..1_000,
    ) {
        let mut envelope = scd_engine::VersionEnvelope::unsaved("job", "x");
        envelope.version = baseline_version;
        envelope.uid = "u".into();
        let baseline = Entity::new(envelope, Payload::new());

        let submission = request(json!({"id": "x", "a": 1})).submission_over(Some(&baseline));
        prop_assert_eq!(submission.next_version(), baseline_version + 1);
        let is_current = matches!(submission.expect, Expectation::Current { version, .. } if version == baseline_version);
        prop_assert!(is_current);
    }
}
