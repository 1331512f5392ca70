//! Latest-version resolution.
//!
//! The current version of an identity is the member of its family with the
//! highest version number. Stores that are queried directly may hold
//! duplicate rows, so every function here breaks ties deterministically:
//! higher version, then later `updated_at`, then greater `uid`.

use crate::envelope::{EntityKey, VersionEnvelope, Versioned};
use crate::query::SortDirection;
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// A resolution result with the derived "is current" flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved<T> {
    pub entity: T,
    pub is_latest: bool,
}

impl<T> Resolved<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            entity: f(self.entity),
            is_latest: self.is_latest,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> std::result::Result<U, E>) -> std::result::Result<Resolved<U>, E> {
        Ok(Resolved {
            entity: f(self.entity)?,
            is_latest: self.is_latest,
        })
    }
}

fn precedence(a: &VersionEnvelope, b: &VersionEnvelope) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| a.updated_at.cmp(&b.updated_at))
        .then_with(|| a.uid.cmp(&b.uid))
}

/// The current member of a version family.
pub fn resolve_latest<'a, T, I>(family: I) -> Option<&'a T>
where
    T: Versioned + 'a,
    I: IntoIterator<Item = &'a T>,
{
    family
        .into_iter()
        .max_by(|a, b| precedence(a.envelope(), b.envelope()))
}

/// Keep exactly one row, the current one, per identity.
///
/// Output is ordered by `(entity_type, id)`.
pub fn latest_per_identity<T, I>(rows: I) -> Vec<T>
where
    T: Versioned,
    I: IntoIterator<Item = T>,
{
    let mut latest: BTreeMap<EntityKey, T> = BTreeMap::new();
    for row in rows {
        let key = row.envelope().key();
        let newer = latest
            .get(&key)
            .map_or(true, |current| precedence(current.envelope(), row.envelope()) == Ordering::Less);
        if newer {
            latest.insert(key, row);
        }
    }
    latest.into_values().collect()
}

/// Flag every row with whether it is the current version of its identity.
pub fn mark_latest<T: Versioned>(rows: Vec<T>) -> Vec<Resolved<T>> {
    let mut winners: BTreeMap<EntityKey, usize> = BTreeMap::new();
    for (index, row) in rows.iter().enumerate() {
        let key = row.envelope().key();
        let newer = winners.get(&key).map_or(true, |&current| {
            precedence(rows[current].envelope(), row.envelope()) == Ordering::Less
        });
        if newer {
            winners.insert(key, index);
        }
    }
    let winners: HashSet<usize> = winners.into_values().collect();

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| Resolved {
            entity: row,
            is_latest: winners.contains(&index),
        })
        .collect()
}

/// Order a family by version in the requested direction.
pub fn order_history<T: Versioned>(mut rows: Vec<T>, direction: SortDirection) -> Vec<T> {
    rows.sort_by(|a, b| {
        let ord = precedence(a.envelope(), b.envelope());
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    rows
}

/// Accept only plain SQL identifiers and payload field names.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Builds the "latest only" read as a single self-join.
///
/// The generated statement joins the table against a per-identity
/// `MAX(version)` aggregate, so the store evaluates resolution itself instead
/// of shipping whole histories to the client:
///
/// ```sql
/// SELECT t.* FROM jobs t
/// INNER JOIN (SELECT id, MAX(version) AS max_version FROM jobs GROUP BY id) latest
///   ON t.id = latest.id AND t.version = latest.max_version
/// ```
///
/// With a scope column, the aggregate is filtered by `scope = ?` and the join
/// matches on it too; the caller binds the scope value first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestOnlySql {
    table: String,
    scope: Option<String>,
    columns: Vec<String>,
}

impl LatestOnlySql {
    pub fn new(table: &str) -> Result<Self> {
        Ok(Self {
            table: validate_identifier(table)?.to_string(),
            scope: None,
            columns: Vec::new(),
        })
    }

    /// Partition identities by an extra column, e.g. an entity type.
    pub fn scoped_by(mut self, column: &str) -> Result<Self> {
        self.scope = Some(validate_identifier(column)?.to_string());
        Ok(self)
    }

    /// Select these columns instead of `t.*`.
    pub fn columns(mut self, columns: &[&str]) -> Result<Self> {
        self.columns = columns
            .iter()
            .map(|c| validate_identifier(c).map(|c| format!("t.{c}")))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn to_sql(&self) -> String {
        let table = &self.table;
        let select = if self.columns.is_empty() {
            "t.*".to_string()
        } else {
            self.columns.join(", ")
        };

        match &self.scope {
            Some(scope) => format!(
                "SELECT {select} FROM {table} t \
                 INNER JOIN (SELECT {scope}, id, MAX(version) AS max_version FROM {table} \
                 WHERE {scope} = ? GROUP BY {scope}, id) latest \
                 ON t.{scope} = latest.{scope} AND t.id = latest.id AND t.version = latest.max_version"
            ),
            None => format!(
                "SELECT {select} FROM {table} t \
                 INNER JOIN (SELECT id, MAX(version) AS max_version FROM {table} GROUP BY id) latest \
                 ON t.id = latest.id AND t.version = latest.max_version"
            ),
        }
    }
}
