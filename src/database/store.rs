//! Record persistence behind the access layer.
//!
//! Stores execute an already-restricted predicate; they never decide access
//! themselves.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::access::{AccessRegistry, Predicate, RecordShape};
use crate::filter::{Filter, FilterError, JoinSpec, QueryOptions, SortDirection, SqlResult};

use super::manager::{DatabaseError, DatabaseManager};

/// One query against a record type: effective predicate plus resolved joins
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub table: String,
    pub predicate: Predicate,
    pub joins: Vec<JoinSpec>,
    pub options: QueryOptions,
}

impl RecordQuery {
    /// Resolve the joins the predicate requires against the record's relations
    pub fn new(
        registry: &AccessRegistry,
        shape: &RecordShape,
        predicate: Predicate,
        options: QueryOptions,
    ) -> Result<Self, DatabaseError> {
        let joins = predicate
            .joins()
            .into_iter()
            .map(|join| {
                let relation = shape.relations.get(&join.relation).ok_or_else(|| {
                    DatabaseError::QueryError(format!("'{}' has no relation '{}'", shape.name, join.relation))
                })?;
                let target = registry.record(&relation.target).ok_or_else(|| {
                    DatabaseError::QueryError(format!("unknown record type '{}'", relation.target))
                })?;
                Ok(JoinSpec {
                    kind: join.kind,
                    table: target.table.clone(),
                    alias: join.alias.clone(),
                    local_column: relation.local_column.clone(),
                    foreign_column: relation.foreign_column.clone(),
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        Ok(Self { table: shape.table.clone(), predicate, joins, options })
    }

    /// Render as a parameterized Postgres SELECT
    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let mut filter = Filter::new(&self.table)?;
        filter.options(self.options.clone())?.predicate(self.predicate.clone());
        for join in &self.joins {
            filter.join(join.clone())?;
        }
        filter.to_sql()
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<Map<String, Value>>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<Map<String, Value>>, DatabaseError> {
        let sql = query.to_sql()?;

        // rows come back as one jsonb object each
        let wrapped = format!("SELECT to_jsonb(q) AS record FROM ({}) q", sql.query);
        if crate::config::CONFIG.database.enable_query_logging {
            tracing::debug!(query = %wrapped, params = ?sql.params, "executing find");
        }

        let mut q = sqlx::query(&wrapped);
        for param in &sql.params {
            q = q.bind(param.as_str());
        }
        let rows = q.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| match row.try_get::<Value, _>("record")? {
                Value::Object(map) => Ok(map),
                other => Err(DatabaseError::QueryError(format!("expected object row, got {}", other))),
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        DatabaseManager::health_check(&self.pool).await
    }
}

/// In-process store keyed by table name. Joined values are read from an
/// object embedded under the relation name.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: impl Into<String>, record: Map<String, Value>) {
        self.tables.write().await.entry(table.into()).or_default().push(record);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<Map<String, Value>>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Map<String, Value>> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.predicate.matches(r)).cloned().collect())
            .unwrap_or_default();

        let options = &query.options;
        rows.sort_by(|a, b| {
            options.order.iter().fold(Ordering::Equal, |acc, info| {
                acc.then_with(|| {
                    let ord = compare_values(a.get(&info.column), b.get(&info.column));
                    match info.sort {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                })
            })
        });

        let offset = options.offset.unwrap_or(0).max(0) as usize;
        let limit = options.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut row| {
                if !options.select.is_empty() && !options.select.iter().any(|c| c == "*") {
                    row.retain(|key, _| options.select.contains(key));
                }
                row
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        // nulls sort last, as in Postgres ascending order
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
