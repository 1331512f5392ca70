//! SQLite-backed cache mirror.

use super::{CacheError, CacheMirror};
use async_trait::async_trait;
use scd_engine::{
    validate_identifier, Conditions, Entity, LatestOnlySql, Payload, Range, Ranges, VersionEnvelope,
};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;

const TABLE: &str = "entity_versions";
const COLUMNS: &[&str] = &[
    "entity_type",
    "id",
    "version",
    "uid",
    "created_at",
    "updated_at",
    "payload",
];

/// A stored version row.
#[derive(Debug)]
pub struct StoredVersion {
    pub entity_type: String,
    pub id: String,
    pub version: i64,
    pub uid: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// JSON text of the payload fields
    pub payload: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredVersion {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredVersion {
            entity_type: row.try_get("entity_type")?,
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            uid: row.try_get("uid")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl StoredVersion {
    /// Convert a database row to an entity.
    pub fn to_entity(&self) -> Result<Entity, CacheError> {
        let payload: Payload = serde_json::from_str(&self.payload)?;
        let envelope = VersionEnvelope {
            id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            version: self.version as u64,
            uid: self.uid.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        Ok(Entity::new(envelope, payload))
    }
}

/// Value bound to a condition placeholder.
enum Bound {
    Text(String),
    Int(i64),
    Real(f64),
}

/// Append-only mirror of entity versions in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteMirror {
    pool: SqlitePool,
}

impl SqliteMirror {
    /// Open (creating if needed) the database at `url` and run migrations.
    ///
    /// An in-memory URL keeps its own options, shared cache included, and
    /// gets a pool that holds one connection for its whole lifetime.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(url)?;
        if is_in_memory(&options) {
            return Self::with_pool(pinned_pool(options).await?).await;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.create_if_missing(true))
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::with_pool(pinned_pool(options).await?).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Cache mirror migrations applied");
        Ok(Self { pool })
    }

    /// Current cached version of one identity.
    pub async fn latest(&self, entity_type: &str, id: &str) -> Result<Option<Entity>, CacheError> {
        let row = sqlx::query_as::<_, StoredVersion>(
            r#"
            SELECT entity_type, id, version, uid, created_at, updated_at, payload
            FROM entity_versions
            WHERE entity_type = ? AND id = ?
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(entity_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.to_entity()).transpose()
    }

    /// Every cached version of one identity, ascending.
    pub async fn history(&self, entity_type: &str, id: &str) -> Result<Vec<Entity>, CacheError> {
        let rows = sqlx::query_as::<_, StoredVersion>(
            r#"
            SELECT entity_type, id, version, uid, created_at, updated_at, payload
            FROM entity_versions
            WHERE entity_type = ? AND id = ?
            ORDER BY version ASC
            "#,
        )
        .bind(entity_type)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(StoredVersion::to_entity).collect()
    }

    /// Latest cached version of every identity of `entity_type` matching
    /// `conditions`, ordered by id.
    ///
    /// Conditions are evaluated against the latest version only: an identity
    /// whose older version matched but whose current one does not is not
    /// returned.
    pub async fn find_latest(
        &self,
        entity_type: &str,
        conditions: &Conditions,
    ) -> Result<Vec<Entity>, CacheError> {
        self.find_latest_where(entity_type, conditions, &Ranges::new())
            .await
    }

    /// [`SqliteMirror::find_latest`] with inclusive range conditions as well.
    pub async fn find_latest_where(
        &self,
        entity_type: &str,
        conditions: &Conditions,
        ranges: &Ranges,
    ) -> Result<Vec<Entity>, CacheError> {
        let mut sql = LatestOnlySql::new(TABLE)?
            .scoped_by("entity_type")?
            .columns(COLUMNS)?
            .to_sql();

        let mut binds = Vec::new();
        let mut clauses = Vec::new();
        for (field, value) in conditions {
            let (clause, bound) = condition(field, value)?;
            clauses.push(clause);
            binds.extend(bound);
        }
        for (field, range) in ranges {
            range_clauses(field, range, &mut clauses, &mut binds)?;
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY t.id");

        let mut query = sqlx::query_as::<_, StoredVersion>(&sql).bind(entity_type);
        for bound in binds {
            query = match bound {
                Bound::Text(text) => query.bind(text),
                Bound::Int(int) => query.bind(int),
                Bound::Real(real) => query.bind(real),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(StoredVersion::to_entity).collect()
    }
}

fn is_in_memory(options: &SqliteConnectOptions) -> bool {
    options
        .to_url_lossy()
        .query_pairs()
        .any(|(key, value)| key == "mode" && value == "memory")
}

/// Every SQLite memory database lives only as long as a connection to it.
async fn pinned_pool(options: SqliteConnectOptions) -> Result<SqlitePool, CacheError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[async_trait]
impl CacheMirror for SqliteMirror {
    async fn persist(&self, entities: &[Entity]) -> Result<u64, CacheError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for entity in entities.iter().filter(|e| e.envelope.is_saved()) {
            let envelope = &entity.envelope;
            let payload = serde_json::to_string(&entity.payload)?;
            let done = sqlx::query(
                r#"
                INSERT OR IGNORE INTO entity_versions (
                    entity_type, id, version, uid, created_at, updated_at, payload
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&envelope.entity_type)
            .bind(&envelope.id)
            .bind(envelope.version as i64)
            .bind(&envelope.uid)
            .bind(envelope.created_at)
            .bind(envelope.updated_at)
            .bind(payload)
            .execute(&mut *tx)
            .await?;
            inserted += done.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

/// Envelope fields kept in their own columns.
fn envelope_column(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("t.id"),
        "entityType" => Some("t.entity_type"),
        "version" => Some("t.version"),
        "uid" => Some("t.uid"),
        "createdAt" => Some("t.created_at"),
        "updatedAt" => Some("t.updated_at"),
        _ => None,
    }
}

fn column(field: &str) -> Result<String, CacheError> {
    match envelope_column(field) {
        Some(column) => Ok(column.to_string()),
        None => Ok(format!("json_extract(t.payload, '$.{}')", validate_identifier(field)?)),
    }
}

/// SQL naming the storage type of a field: SQLite's for envelope columns,
/// JSON's for payload fields.
fn column_type(field: &str) -> Result<String, CacheError> {
    match envelope_column(field) {
        Some(column) => Ok(format!("typeof({column})")),
        None => Ok(format!("json_type(t.payload, '$.{}')", validate_identifier(field)?)),
    }
}

fn scalar(field: &str, value: &Value) -> Result<Bound, CacheError> {
    match value {
        Value::Bool(flag) => Ok(Bound::Int(i64::from(*flag))),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(int), _) => Ok(Bound::Int(int)),
            (None, Some(real)) => Ok(Bound::Real(real)),
            (None, None) => Err(CacheError::UnsupportedCondition {
                field: field.to_string(),
                reason: "number out of range",
            }),
        },
        Value::String(text) => Ok(Bound::Text(text.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(CacheError::UnsupportedCondition {
            field: field.to_string(),
            reason: "only scalar values can be matched",
        }),
    }
}

/// SQL for one equality condition, and the value to bind for it.
fn condition(field: &str, value: &Value) -> Result<(String, Option<Bound>), CacheError> {
    let column = column(field)?;
    if value.is_null() {
        return Ok((format!("{column} IS NULL"), None));
    }
    Ok((format!("{column} = ?"), Some(scalar(field, value)?)))
}

/// Clauses for the bounds of one range. Text bounds compare as text and
/// numeric bounds as numbers, matching the in-memory evaluation.
fn range_clauses(
    field: &str,
    range: &Range,
    clauses: &mut Vec<String>,
    binds: &mut Vec<Bound>,
) -> Result<(), CacheError> {
    let column = column(field)?;
    let type_of = column_type(field)?;
    for (bound, op) in [(&range.min, ">="), (&range.max, "<=")] {
        let Some(value) = bound else { continue };
        let kinds = match value {
            Value::String(_) => "'text'",
            Value::Bool(_) => "'true', 'false'",
            _ => "'integer', 'real'",
        };
        clauses.push(format!("{type_of} IN ({kinds}) AND {column} {op} ?"));
        binds.push(scalar(field, value)?);
    }
    Ok(())
}
