//! Typed query descriptors + paginated bulk fetch over the relational store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use ajira_core::{EarningsMetadata, NotificationRecord, RevenueSource};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgRowStore;

pub const CRATE_NAME: &str = "ajira-store";

/// The hosted store caps single-query result size, so every full-table read
/// goes through [`fetch_all_rows`] in pages of this size.
pub const PAGE_SIZE: u64 = 1000;

/// Every table this backend reads or writes. Table names never come from
/// request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Earnings,
    AllUsers,
    Companies,
    LatestJobs,
    JobApplications,
    Interviews,
    CreditTransactions,
    Referrals,
    SubscriptionHistory,
    GeneratedResumes,
    NotificationHistory,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Earnings => "earnings",
            Table::AllUsers => "all_users",
            Table::Companies => "companies",
            Table::LatestJobs => "latest_jobs",
            Table::JobApplications => "job_applications",
            Table::Interviews => "interviews",
            Table::CreditTransactions => "credit_transactions",
            Table::Referrals => "referrals",
            Table::SubscriptionHistory => "subscription_history",
            Table::GeneratedResumes => "generated_resumes",
            Table::NotificationHistory => "notification_history",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// One WHERE clause. Column names are `'static` by construction so a query
/// can never be assembled from request input.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, FilterValue),
    Gte(&'static str, FilterValue),
    Lte(&'static str, FilterValue),
    In(&'static str, Vec<String>),
    IsNull(&'static str),
    NotNull(&'static str),
}

/// A typed query descriptor: table, conjunctive filters, optional projection.
#[derive(Debug, Clone)]
pub struct TableQuery {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub columns: Option<Vec<&'static str>>,
}

impl TableQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            columns: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        self.columns = Some(columns.to_vec());
        self
    }
}

/// One page of results. `total` is the exact filtered row count, populated
/// only when the caller asked for it (the bulk fetcher does, on page one).
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<JsonValue>,
    pub total: Option<u64>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decoding {table} row: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Daily earnings figure written by the AdMob sync. Matched against existing
/// rows by source + day range, not by id.
#[derive(Debug, Clone, PartialEq)]
pub struct EarningsUpsert {
    pub revenue_source: RevenueSource,
    pub amount: f64,
    pub currency: String,
    pub day: NaiveDate,
    pub metadata: Option<EarningsMetadata>,
}

/// The store seam. Reads go through the generic page API; the few writes the
/// backend performs are explicit operations with their own SQL.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn fetch_page(
        &self,
        query: &TableQuery,
        offset: u64,
        limit: u64,
        want_total: bool,
    ) -> Result<Page, StoreError>;

    async fn upsert_earnings(&self, row: &EarningsUpsert) -> Result<(), StoreError>;

    async fn insert_notification(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Null out stored push tokens reported permanently invalid. Returns the
    /// number of accounts updated.
    async fn clear_push_tokens(&self, tokens: &[String]) -> Result<u64, StoreError>;
}

/// Paginated bulk fetch: assemble the full matching set from fixed-size
/// pages. Stops when a page comes back shorter than [`PAGE_SIZE`], so a table
/// holding an exact multiple of the page size costs one extra confirming
/// request. Any per-page failure aborts the whole fetch; there is no partial
/// result and no retry.
pub async fn fetch_all_rows(
    store: &dyn RowStore,
    query: &TableQuery,
) -> Result<Vec<JsonValue>, StoreError> {
    let mut rows: Vec<JsonValue> = Vec::new();
    let mut offset = 0u64;
    loop {
        let page = store.fetch_page(query, offset, PAGE_SIZE, offset == 0).await?;
        if offset == 0 {
            if let Some(total) = page.total {
                rows.reserve(total as usize);
            }
        }
        let fetched = page.rows.len() as u64;
        rows.extend(page.rows);
        if fetched < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }
    Ok(rows)
}

/// Bulk fetch decoded into a concrete row shape. A single undecodable row
/// fails the fetch, naming the table.
pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn RowStore,
    query: &TableQuery,
) -> Result<Vec<T>, StoreError> {
    let rows = fetch_all_rows(store, query).await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|source| StoreError::Decode {
                table: query.table.name(),
                source,
            })
        })
        .collect()
}
