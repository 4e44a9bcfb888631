//! In-memory store used by tests across the workspace. Mirrors the paging,
//! filtering, and write semantics of the Postgres implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::{json, Map, Value as JsonValue};

use crate::{
    EarningsUpsert, Filter, FilterValue, Page, RowStore, StoreError, Table, TableQuery,
};
use ajira_core::NotificationRecord;
use async_trait::async_trait;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<JsonValue>>>,
    page_requests: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail, for exercising degrade paths.
    pub fn fail_all(&self) {
        self.failing.store(true, AtomicOrdering::SeqCst);
    }

    fn check_failing(&self) -> Result<(), StoreError> {
        if self.failing.load(AtomicOrdering::SeqCst) {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }

    pub fn seed(&self, table: Table, rows: Vec<JsonValue>) {
        self.tables
            .lock()
            .expect("memory store poisoned")
            .entry(table)
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<JsonValue> {
        self.tables
            .lock()
            .expect("memory store poisoned")
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `fetch_page` calls served so far.
    pub fn page_requests(&self) -> usize {
        self.page_requests.load(AtomicOrdering::SeqCst)
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|stamp| stamp.with_timezone(&Utc))
}

fn value_eq(actual: &JsonValue, expected: &FilterValue) -> bool {
    match expected {
        FilterValue::Text(text) => actual.as_str() == Some(text.as_str()),
        FilterValue::Number(number) => actual.as_f64() == Some(*number),
        FilterValue::Bool(flag) => actual.as_bool() == Some(*flag),
        FilterValue::Timestamp(stamp) => parse_timestamp(actual) == Some(*stamp),
    }
}

fn value_cmp(actual: &JsonValue, expected: &FilterValue) -> Option<Ordering> {
    match expected {
        FilterValue::Number(number) => actual.as_f64()?.partial_cmp(number),
        FilterValue::Timestamp(stamp) => Some(parse_timestamp(actual)?.cmp(stamp)),
        FilterValue::Text(text) => Some(actual.as_str()?.cmp(text.as_str())),
        FilterValue::Bool(_) => None,
    }
}

fn matches(filter: &Filter, row: &JsonValue) -> bool {
    match filter {
        Filter::Eq(column, expected) => row.get(column).is_some_and(|v| value_eq(v, expected)),
        Filter::Gte(column, expected) => row
            .get(column)
            .and_then(|v| value_cmp(v, expected))
            .is_some_and(|ordering| ordering != Ordering::Less),
        Filter::Lte(column, expected) => row
            .get(column)
            .and_then(|v| value_cmp(v, expected))
            .is_some_and(|ordering| ordering != Ordering::Greater),
        Filter::In(column, values) => row
            .get(column)
            .and_then(JsonValue::as_str)
            .is_some_and(|actual| values.iter().any(|v| v == actual)),
        Filter::IsNull(column) => row.get(column).is_none_or(JsonValue::is_null),
        Filter::NotNull(column) => row.get(column).is_some_and(|v| !v.is_null()),
    }
}

fn project(row: &JsonValue, columns: &Option<Vec<&'static str>>) -> JsonValue {
    let Some(columns) = columns else {
        return row.clone();
    };
    let mut out = Map::new();
    for column in columns {
        out.insert(
            (*column).to_string(),
            row.get(*column).cloned().unwrap_or(JsonValue::Null),
        );
    }
    JsonValue::Object(out)
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn fetch_page(
        &self,
        query: &TableQuery,
        offset: u64,
        limit: u64,
        want_total: bool,
    ) -> Result<Page, StoreError> {
        self.check_failing()?;
        self.page_requests.fetch_add(1, AtomicOrdering::SeqCst);
        let tables = self.tables.lock().expect("memory store poisoned");
        let filtered: Vec<&JsonValue> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(f, row)))
                    .collect()
            })
            .unwrap_or_default();
        let total = want_total.then_some(filtered.len() as u64);
        let rows = filtered
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| project(row, &query.columns))
            .collect();
        Ok(Page { rows, total })
    }

    async fn upsert_earnings(&self, row: &EarningsUpsert) -> Result<(), StoreError> {
        self.check_failing()?;
        let day_start = row.day.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);
        let metadata = match &row.metadata {
            Some(metadata) => serde_json::to_value(metadata).map_err(|source| {
                StoreError::Encode {
                    what: "earnings metadata",
                    source,
                }
            })?,
            None => JsonValue::Null,
        };

        let mut tables = self.tables.lock().expect("memory store poisoned");
        let rows = tables.entry(Table::Earnings).or_default();
        let existing = rows.iter_mut().find(|existing| {
            existing.get("revenue_source").and_then(JsonValue::as_str)
                == Some(row.revenue_source.as_str())
                && existing
                    .get("earned_at")
                    .and_then(parse_timestamp)
                    .is_some_and(|stamp| stamp >= day_start && stamp < day_end)
        });

        match existing {
            Some(found) => {
                found["amount"] = json!(row.amount);
                found["currency"] = json!(row.currency);
                found["metadata"] = metadata;
            }
            None => rows.push(json!({
                "revenue_source": row.revenue_source.as_str(),
                "amount": row.amount,
                "currency": row.currency,
                "earned_at": day_start.to_rfc3339(),
                "metadata": metadata,
            })),
        }
        Ok(())
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.check_failing()?;
        let row = serde_json::to_value(record).map_err(|source| StoreError::Encode {
            what: "notification record",
            source,
        })?;
        self.tables
            .lock()
            .expect("memory store poisoned")
            .entry(Table::NotificationHistory)
            .or_default()
            .push(row);
        Ok(())
    }

    async fn clear_push_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        self.check_failing()?;
        let mut cleared = 0u64;
        let mut tables = self.tables.lock().expect("memory store poisoned");
        if let Some(rows) = tables.get_mut(&Table::AllUsers) {
            for row in rows {
                let has_listed_token = row
                    .get("push_token")
                    .and_then(JsonValue::as_str)
                    .is_some_and(|token| tokens.iter().any(|t| t == token));
                if has_listed_token {
                    row["push_token"] = JsonValue::Null;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajira_core::{EarningsMetadata, RevenueSource};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn upsert_earnings_matches_existing_day_rows() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let first = EarningsUpsert {
            revenue_source: RevenueSource::Admob,
            amount: 4.2,
            currency: "USD".into(),
            day,
            metadata: Some(EarningsMetadata {
                impressions: Some(100),
                ..Default::default()
            }),
        };
        store.upsert_earnings(&first).await.unwrap();
        store
            .upsert_earnings(&EarningsUpsert {
                amount: 5.0,
                ..first.clone()
            })
            .await
            .unwrap();

        let rows = store.rows(Table::Earnings);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["amount"], json!(5.0));
    }

    #[tokio::test]
    async fn upsert_earnings_keeps_days_and_sources_apart() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let admob = EarningsUpsert {
            revenue_source: RevenueSource::Admob,
            amount: 1.0,
            currency: "USD".into(),
            day,
            metadata: None,
        };
        store.upsert_earnings(&admob).await.unwrap();
        store
            .upsert_earnings(&EarningsUpsert {
                revenue_source: RevenueSource::Subscription,
                ..admob.clone()
            })
            .await
            .unwrap();
        store
            .upsert_earnings(&EarningsUpsert {
                day: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
                ..admob.clone()
            })
            .await
            .unwrap();
        assert_eq!(store.rows(Table::Earnings).len(), 3);
    }

    #[tokio::test]
    async fn clear_push_tokens_only_touches_listed_tokens() {
        let store = MemoryStore::new();
        store.seed(
            Table::AllUsers,
            vec![
                json!({"uid": "a", "push_token": "tok-a"}),
                json!({"uid": "b", "push_token": "tok-b"}),
                json!({"uid": "c", "push_token": JsonValue::Null}),
            ],
        );
        let cleared = store
            .clear_push_tokens(&["tok-a".to_string(), "tok-zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        let rows = store.rows(Table::AllUsers);
        assert!(rows[0]["push_token"].is_null());
        assert_eq!(rows[1]["push_token"], json!("tok-b"));
    }
}
