//! Version family: every persisted version of one identity.
//!
//! The family enforces the append-only rules a store must uphold: versions
//! run 1, 2, 3, ... with no gaps, each carries a fresh uid, and a new
//! version is appended only when the writer's expectation still holds.

use crate::entity::{merge_fields, strip_reserved};
use crate::envelope::{EntityKey, VersionEnvelope};
use crate::mutation::{Expectation, Submission};
use crate::{error::Result, Entity, Error, Timestamp, Uid, Version};
use std::collections::HashSet;

/// All versions of one `(entity_type, id)`, ascending by version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionFamily {
    versions: Vec<Entity>,
}

impl VersionFamily {
    /// Start a family from a creation submission.
    pub fn create(submission: &Submission, uid: impl Into<Uid>, now: Timestamp) -> Result<Self> {
        if submission.expect != Expectation::Create {
            return Err(Error::EntityNotFound(submission.id.clone()));
        }

        let envelope = VersionEnvelope {
            id: submission.id.clone(),
            entity_type: submission.entity_type.clone(),
            version: 1,
            uid: uid.into(),
            created_at: now,
            updated_at: now,
        };
        let first = Entity::new(envelope, strip_reserved(submission.fields.clone()));
        Ok(Self {
            versions: vec![first],
        })
    }

    /// Rebuild a family from stored rows, in any order.
    pub fn from_versions(mut versions: Vec<Entity>) -> Result<Self> {
        versions.sort_by_key(|e| e.envelope.version);

        let first = versions
            .first()
            .ok_or_else(|| Error::BrokenFamily("no versions".into()))?;
        let key = first.envelope.key();

        let mut uids = HashSet::new();
        for (index, entity) in versions.iter().enumerate() {
            let expected = index as Version + 1;
            if entity.envelope.key() != key {
                return Err(Error::BrokenFamily(format!(
                    "{} mixed into family {key}",
                    entity.envelope.key()
                )));
            }
            if entity.envelope.version != expected {
                return Err(Error::BrokenFamily(format!(
                    "{key}: expected version {expected}, found {}",
                    entity.envelope.version
                )));
            }
            if !uids.insert(entity.envelope.uid.as_str()) {
                return Err(Error::BrokenFamily(format!(
                    "{key}: uid {} reused",
                    entity.envelope.uid
                )));
            }
        }

        Ok(Self { versions })
    }

    pub fn key(&self) -> EntityKey {
        self.current().envelope.key()
    }

    /// The current version.
    pub fn current(&self) -> &Entity {
        // Never empty: both constructors produce at least one version
        &self.versions[self.versions.len() - 1]
    }

    pub fn get(&self, version: Version) -> Option<&Entity> {
        version
            .checked_sub(1)
            .and_then(|index| self.versions.get(index as usize))
    }

    /// Every version, ascending.
    pub fn history(&self) -> &[Entity] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.versions.iter().any(|e| e.envelope.uid == uid)
    }

    /// Check a writer's expectation against the current version.
    pub fn check(&self, expect: &Expectation) -> Result<()> {
        let current = &self.current().envelope;
        match expect {
            Expectation::Create => Err(Error::AlreadyExists(current.id.clone())),
            Expectation::Current { version, uid } => {
                if *version != current.version {
                    return Err(Error::VersionMismatch {
                        id: current.id.clone(),
                        expected: *version,
                        actual: current.version,
                    });
                }
                match uid {
                    Some(uid) if *uid != current.uid => Err(Error::UidMismatch {
                        id: current.id.clone(),
                        version: current.version,
                    }),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Append the next version if the submission's expectation holds.
    ///
    /// Submitted fields are merged over the current payload, so a submission
    /// carrying only the changed fields keeps everything else.
    pub fn append(
        &mut self,
        submission: &Submission,
        uid: impl Into<Uid>,
        now: Timestamp,
    ) -> Result<&Entity> {
        if submission.entity_type != self.current().envelope.entity_type
            || submission.id != self.current().envelope.id
        {
            return Err(Error::InvalidPayload(format!(
                "submission for {}/{} sent to family {}",
                submission.entity_type,
                submission.id,
                self.key()
            )));
        }
        self.check(&submission.expect)?;

        let uid = uid.into();
        if uid.is_empty() || self.contains_uid(&uid) {
            return Err(Error::BrokenFamily(format!("{}: uid {uid} reused", self.key())));
        }

        let current = self.current();
        let envelope = VersionEnvelope {
            id: current.envelope.id.clone(),
            entity_type: current.envelope.entity_type.clone(),
            version: current.envelope.version + 1,
            uid,
            created_at: current.envelope.created_at,
            updated_at: now.max(current.envelope.updated_at),
        };
        let payload = merge_fields(&current.payload, &submission.fields);
        self.versions.push(Entity::new(envelope, payload));

        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn creation(id: &str, value: serde_json::Value) -> Submission {
        Submission {
            entity_type: "job".into(),
            id: id.into(),
            expect: Expectation::Create,
            fields: fields(value),
        }
    }

    fn update(id: &str, version: Version, uid: Option<&str>, value: serde_json::Value) -> Submission {
        Submission {
            entity_type: "job".into(),
            id: id.into(),
            expect: Expectation::Current {
                version,
                uid: uid.map(Into::into),
            },
            fields: fields(value),
        }
    }

    fn job_abc() -> VersionFamily {
        let mut family =
            VersionFamily::create(&creation("job_abc", json!({"status": "active", "rate": 50.0})), "u1", 100)
                .unwrap();
        family
            .append(&update("job_abc", 1, Some("u1"), json!({"rate": 60.0})), "u2", 200)
            .unwrap();
        family
    }

    #[test]
    fn create_starts_at_version_one() {
        let family = VersionFamily::create(&creation("job_abc", json!({"status": "active"})), "u1", 100).unwrap();
        let current = family.current();
        assert_eq!(current.envelope.version, 1);
        assert_eq!(current.envelope.uid, "u1");
        assert_eq!(current.envelope.created_at, 100);
        assert_eq!(family.len(), 1);
    }

    #[test]
    fn create_requires_creation_expectation() {
        let result = VersionFamily::create(&update("job_abc", 1, None, json!({})), "u1", 100);
        assert_eq!(result, Err(Error::EntityNotFound("job_abc".into())));
    }

    #[test]
    fn append_merges_and_increments() {
        let family = job_abc();
        let current = family.current();
        assert_eq!(current.envelope.version, 2);
        assert_eq!(current.envelope.uid, "u2");
        assert_eq!(current.envelope.created_at, 100);
        assert_eq!(current.envelope.updated_at, 200);
        assert_eq!(current.payload["status"], "active");
        assert_eq!(current.payload["rate"], 60.0);
    }

    #[test]
    fn stale_version_is_rejected() {
        let mut family = job_abc();
        let err = family
            .append(&update("job_abc", 1, Some("u1"), json!({"rate": 70.0})), "u3", 300)
            .unwrap_err();
        assert_eq!(
            err,
            Error::VersionMismatch {
                id: "job_abc".into(),
                expected: 1,
                actual: 2
            }
        );
        assert!(err.is_conflict());
        assert_eq!(family.len(), 2);
    }

    #[test]
    fn stale_uid_is_rejected() {
        let mut family = job_abc();
        let err = family
            .append(&update("job_abc", 2, Some("other"), json!({})), "u3", 300)
            .unwrap_err();
        assert!(matches!(err, Error::UidMismatch { version: 2, .. }));
    }

    #[test]
    fn version_only_pin_is_accepted() {
        let mut family = job_abc();
        family
            .append(&update("job_abc", 2, None, json!({"status": "extended"})), "u3", 300)
            .unwrap();
        assert_eq!(family.current().envelope.version, 3);
    }

    #[test]
    fn creation_race_conflicts() {
        let family = job_abc();
        assert_eq!(
            family.check(&Expectation::Create),
            Err(Error::AlreadyExists("job_abc".into()))
        );
    }

    #[test]
    fn reused_uid_is_rejected() {
        let mut family = job_abc();
        let err = family
            .append(&update("job_abc", 2, Some("u2"), json!({})), "u1", 300)
            .unwrap_err();
        assert!(matches!(err, Error::BrokenFamily(_)));
    }

    #[test]
    fn get_and_history() {
        let family = job_abc();
        assert_eq!(family.get(1).unwrap().envelope.uid, "u1");
        assert!(family.get(0).is_none());
        assert!(family.get(3).is_none());
        let versions: Vec<_> = family.history().iter().map(|e| e.envelope.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn rebuild_from_rows() {
        let family = job_abc();
        let mut rows = family.history().to_vec();
        rows.reverse();
        let rebuilt = VersionFamily::from_versions(rows).unwrap();
        assert_eq!(rebuilt, family);
    }

    #[test]
    fn rebuild_rejects_gaps() {
        let family = job_abc();
        let rows = vec![family.history()[1].clone()];
        assert!(matches!(
            VersionFamily::from_versions(rows),
            Err(Error::BrokenFamily(_))
        ));
        assert!(VersionFamily::from_versions(Vec::new()).is_err());
    }
}
