//! Postgres implementation of the store seam, runtime-checked SQL via sqlx.

use chrono::{Duration, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use crate::{
    EarningsUpsert, Filter, FilterValue, Page, RowStore, StoreError, TableQuery,
};
use ajira_core::NotificationRecord;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn where_clause(filters: &[Filter]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let mut placeholder = 0usize;
    let fragments: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, _) => {
                placeholder += 1;
                format!("{column} = ${placeholder}")
            }
            Filter::Gte(column, _) => {
                placeholder += 1;
                format!("{column} >= ${placeholder}")
            }
            Filter::Lte(column, _) => {
                placeholder += 1;
                format!("{column} <= ${placeholder}")
            }
            Filter::In(column, _) => {
                placeholder += 1;
                format!("{column} = ANY(${placeholder})")
            }
            Filter::IsNull(column) => format!("{column} IS NULL"),
            Filter::NotNull(column) => format!("{column} IS NOT NULL"),
        })
        .collect();
    format!(" WHERE {}", fragments.join(" AND "))
}

/// Rows come back as one jsonb column so the page API stays generic over row
/// shape; pages carry no ORDER BY because callers treat the result as a set.
fn select_sql(query: &TableQuery, offset: u64, limit: u64) -> String {
    let projection = match &query.columns {
        Some(columns) => columns.join(", "),
        None => "*".to_string(),
    };
    format!(
        "SELECT to_jsonb(t) AS row FROM (SELECT {projection} FROM {table}{filters} LIMIT {limit} OFFSET {offset}) t",
        table = query.table.name(),
        filters = where_clause(&query.filters),
    )
}

fn count_sql(query: &TableQuery) -> String {
    format!(
        "SELECT COUNT(*) AS total FROM {table}{filters}",
        table = query.table.name(),
        filters = where_clause(&query.filters),
    )
}

fn bind_filters<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    filters: &'q [Filter],
) -> Query<'q, Postgres, PgArguments> {
    for filter in filters {
        query = match filter {
            Filter::Eq(_, value) | Filter::Gte(_, value) | Filter::Lte(_, value) => {
                bind_value(query, value)
            }
            Filter::In(_, values) => query.bind(values),
            Filter::IsNull(_) | Filter::NotNull(_) => query,
        };
    }
    query
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q FilterValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FilterValue::Text(text) => query.bind(text),
        FilterValue::Number(number) => query.bind(number),
        FilterValue::Bool(flag) => query.bind(flag),
        FilterValue::Timestamp(stamp) => query.bind(stamp),
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn fetch_page(
        &self,
        query: &TableQuery,
        offset: u64,
        limit: u64,
        want_total: bool,
    ) -> Result<Page, StoreError> {
        let sql = select_sql(query, offset, limit);
        debug!(table = query.table.name(), offset, "fetching page");
        let fetched = bind_filters(sqlx::query(&sql), &query.filters)
            .fetch_all(&self.pool)
            .await?;
        let mut rows = Vec::with_capacity(fetched.len());
        for row in fetched {
            rows.push(row.try_get::<JsonValue, _>("row")?);
        }

        let total = if want_total {
            let sql = count_sql(query);
            let row = bind_filters(sqlx::query(&sql), &query.filters)
                .fetch_one(&self.pool)
                .await?;
            Some(row.try_get::<i64, _>("total")? as u64)
        } else {
            None
        };

        Ok(Page { rows, total })
    }

    async fn upsert_earnings(&self, row: &EarningsUpsert) -> Result<(), StoreError> {
        let day_start = row.day.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);
        let metadata = match &row.metadata {
            Some(metadata) => Some(serde_json::to_value(metadata).map_err(|source| {
                StoreError::Encode {
                    what: "earnings metadata",
                    source,
                }
            })?),
            None => None,
        };

        let updated = sqlx::query(
            r#"
            UPDATE earnings
               SET amount = $1,
                   currency = $2,
                   metadata = $3
             WHERE revenue_source = $4
               AND earned_at >= $5
               AND earned_at < $6
            "#,
        )
        .bind(row.amount)
        .bind(&row.currency)
        .bind(&metadata)
        .bind(row.revenue_source.as_str())
        .bind(day_start)
        .bind(day_end)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO earnings (revenue_source, amount, currency, earned_at, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(row.revenue_source.as_str())
            .bind(row.amount)
            .bind(&row.currency)
            .bind(day_start)
            .bind(&metadata)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_history
                (title, message, recipient_type, recipient_uids, sent_by,
                 delivery_count, read_count, sent_at, image_url, action_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.title)
        .bind(&record.message)
        .bind(record.recipient_type.as_str())
        .bind(&record.recipient_uids)
        .bind(&record.sent_by)
        .bind(record.delivery_count as i64)
        .bind(record.read_count as i64)
        .bind(record.sent_at)
        .bind(&record.image_url)
        .bind(&record.action_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_push_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE all_users
               SET push_token = NULL
             WHERE push_token = ANY($1)
            "#,
        )
        .bind(tokens)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
