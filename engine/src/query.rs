//! Bulk query description: conditions plus read mode and paging.

use crate::resolve::latest_per_identity;
use crate::{error::Result, Entity, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Field equality conditions, keyed by caller-visible field name.
pub type Conditions = BTreeMap<String, Value>;

/// Range conditions, keyed by caller-visible field name.
pub type Ranges = BTreeMap<String, Range>;

/// Inclusive bounds on one field. An absent bound is open.
///
/// Only values of the same JSON kind as a bound compare: a string field
/// never falls inside a numeric range, and a missing field falls in none.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
}

impl Range {
    pub fn between(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self {
            min: Some(min.into()),
            max: Some(max.into()),
        }
    }

    pub fn at_least(min: impl Into<Value>) -> Self {
        Self {
            min: Some(min.into()),
            max: None,
        }
    }

    pub fn at_most(max: impl Into<Value>) -> Self {
        Self {
            min: None,
            max: Some(max.into()),
        }
    }

    pub fn contains(&self, value: Option<&Value>) -> bool {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return false;
        };
        let above = self.min.as_ref().map_or(true, |min| {
            same_kind(value, min) && compare_values(Some(value), Some(min)) != Ordering::Less
        });
        let below = self.max.as_ref().map_or(true, |max| {
            same_kind(value, max) && compare_values(Some(value), Some(max)) != Ordering::Greater
        });
        above && below
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(Error::InvalidPayload(format!("unknown sort direction: {other}"))),
        }
    }
}

/// Read mode and paging for a bulk query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Keep only the current version of each identity
    pub latest_only: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::latest()
    }
}

impl QueryOptions {
    /// Current versions only.
    pub fn latest() -> Self {
        Self {
            latest_only: true,
            limit: None,
            offset: 0,
            sort_by: None,
            sort_direction: SortDirection::Asc,
        }
    }

    /// Every version of every matching identity.
    pub fn history() -> Self {
        Self {
            latest_only: false,
            ..Self::latest()
        }
    }
}

/// A bulk query against one entity type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ranges: Ranges,
    #[serde(default)]
    pub options: QueryOptions,
}

impl EntityQuery {
    pub fn latest() -> Self {
        Self {
            conditions: Conditions::new(),
            ranges: Ranges::new(),
            options: QueryOptions::latest(),
        }
    }

    pub fn history() -> Self {
        Self {
            options: QueryOptions::history(),
            ..Self::latest()
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    pub fn where_in_range(mut self, field: impl Into<String>, range: Range) -> Self {
        self.ranges.insert(field.into(), range);
        self
    }

    /// Versions numbered `min..=max`.
    pub fn versions_between(self, min: u64, max: u64) -> Self {
        self.where_in_range("version", Range::between(min, max))
    }

    /// Versions created between two epoch-millisecond instants, inclusive.
    pub fn created_between(self, start: i64, end: i64) -> Self {
        self.where_in_range("createdAt", Range::between(start, end))
    }

    /// Versions written between two epoch-millisecond instants, inclusive.
    pub fn updated_between(self, start: i64, end: i64) -> Self {
        self.where_in_range("updatedAt", Range::between(start, end))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.options.offset = offset;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.sort_by = Some(field.into());
        self.options.sort_direction = direction;
        self
    }

    /// Evaluate the query over a set of rows held in memory.
    ///
    /// Latest-only resolution happens before conditions are applied, so an
    /// identity whose older version matches but whose current version does
    /// not is excluded.
    pub fn evaluate(&self, rows: Vec<Entity>) -> Vec<Entity> {
        let candidates = if self.options.latest_only {
            latest_per_identity(rows)
        } else {
            rows
        };

        let mut matched: Vec<Entity> = candidates
            .into_iter()
            .filter(|e| e.matches(&self.conditions) && e.within(&self.ranges))
            .collect();

        let sort_by = self.options.sort_by.as_deref();
        matched.sort_by(|a, b| {
            let primary = match sort_by {
                Some(field) => compare_values(a.field(field).as_ref(), b.field(field).as_ref()),
                None => Ordering::Equal,
            };
            let primary = match self.options.sort_direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };
            primary
                .then_with(|| a.envelope.id.cmp(&b.envelope.id))
                .then_with(|| a.envelope.version.cmp(&b.envelope.version))
        });

        let paged = matched.into_iter().skip(self.options.offset);
        match self.options.limit {
            Some(limit) => paged.take(limit).collect(),
            None => paged.collect(),
        }
    }
}

/// Total order over optional JSON values: missing/null first, then bools,
/// numbers, strings, and anything else by its JSON text.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => match rank(a).cmp(&rank(b)) {
            Ordering::Equal => {
                let a = a.map(Value::to_string).unwrap_or_default();
                let b = b.map(Value::to_string).unwrap_or_default();
                a.cmp(&b)
            }
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VersionEnvelope;
    use serde_json::json;

    fn row(id: &str, version: u64, payload: Value) -> Entity {
        Entity::new(
            VersionEnvelope {
                id: id.into(),
                entity_type: "job".into(),
                version,
                uid: format!("{id}_uid_{version}"),
                created_at: 0,
                updated_at: version as i64,
            },
            payload.as_object().cloned().unwrap(),
        )
    }

    fn rows() -> Vec<Entity> {
        vec![
            row("a", 1, json!({"status": "active", "rate": 10})),
            row("a", 2, json!({"status": "completed", "rate": 12})),
            row("b", 1, json!({"status": "active", "rate": 30})),
            row("c", 1, json!({"status": "active", "rate": 20})),
        ]
    }

    #[test]
    fn latest_only_resolves_before_filtering() {
        let query = EntityQuery::latest().where_eq("status", "active");
        let ids: Vec<_> = query
            .evaluate(rows())
            .into_iter()
            .map(|e| e.envelope.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn history_mode_keeps_every_version() {
        let query = EntityQuery::history();
        assert_eq!(query.evaluate(rows()).len(), 4);

        let query = EntityQuery::history().where_eq("status", "active");
        assert_eq!(query.evaluate(rows()).len(), 3);
    }

    #[test]
    fn sort_and_page() {
        let query = EntityQuery::latest()
            .sort_by("rate", SortDirection::Desc)
            .offset(1)
            .limit(1);
        let result = query.evaluate(rows());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].envelope.id, "c");
    }

    #[test]
    fn sort_by_envelope_field() {
        let query = EntityQuery::history().sort_by("version", SortDirection::Desc);
        let result = query.evaluate(rows());
        assert_eq!(result[0].envelope.version, 2);
    }

    #[test]
    fn ranges_are_inclusive_and_typed() {
        let range = Range::between(10, 20);
        assert!(range.contains(Some(&json!(10))));
        assert!(range.contains(Some(&json!(20.0))));
        assert!(!range.contains(Some(&json!(21))));
        assert!(!range.contains(Some(&json!("15"))));
        assert!(!range.contains(None));
        assert!(!range.contains(Some(&Value::Null)));

        assert!(Range::at_least("m").contains(Some(&json!("z"))));
        assert!(!Range::at_most("m").contains(Some(&json!("z"))));
    }

    #[test]
    fn query_ranges_apply_after_latest_resolution() {
        let query = EntityQuery::latest().where_in_range("rate", Range::between(11, 30));
        let ids: Vec<_> = query
            .evaluate(rows())
            .into_iter()
            .map(|e| e.envelope.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let query = EntityQuery::latest().where_in_range("rate", Range::at_least(20));
        assert_eq!(query.evaluate(rows()).len(), 2);

        let query = EntityQuery::history().versions_between(2, 2);
        let result = query.evaluate(rows());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].envelope.id, "a");

        let query = EntityQuery::history().updated_between(2, 5);
        assert_eq!(query.evaluate(rows()).len(), 1);
    }

    #[test]
    fn empty_ranges_stay_off_the_wire() {
        let json = serde_json::to_value(EntityQuery::latest()).unwrap();
        assert!(json.get("ranges").is_none());

        let query = EntityQuery::latest().created_between(1, 2);
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["ranges"]["createdAt"], json!({"min": 1, "max": 2}));
        let back: EntityQuery = serde_json::from_value(json).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn parse_sort_direction() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn compare_mixed_types() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10.5))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!("b")), Some(&json!("a"))),
            Ordering::Greater
        );
    }
}
