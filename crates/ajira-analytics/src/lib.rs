//! Analytics aggregation over the relational store, reconciled with live
//! AdMob totals.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use ajira_admob::{AdMobClient, AdMobError};
use ajira_core::AdMobReportRow;
use ajira_store::RowStore;

mod dashboard;
mod earnings;
mod platform;
mod revenue;

pub use dashboard::DashboardOverview;
pub use earnings::{
    maybe_build_scheduler, DailyRevenuePoint, EarningsOverview, EarningsSyncSummary, SyncError,
    SyncSchedule, SYNC_WINDOW_DAYS,
};
pub use platform::{MonthlyCount, PlatformOverview};
pub use revenue::{
    ctr, ecpm, growth_rate, last_months, reconcile_revenue, windowed_revenue, RevenueBreakdown,
    Window,
};

pub const CRATE_NAME: &str = "ajira-analytics";

/// How far back the "all time" AdMob report reaches.
pub(crate) const ALL_TIME_YEARS: i64 = 5;

/// Live revenue totals. Implemented by the AdMob client; tests substitute a
/// fixed feed.
#[async_trait]
pub trait RevenueFeed: Send + Sync {
    async fn daily_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdMobReportRow>, AdMobError>;

    async fn total_between(&self, start: NaiveDate, end: NaiveDate) -> Result<f64, AdMobError> {
        Ok(self
            .daily_report(start, end)
            .await?
            .iter()
            .map(|row| row.earnings)
            .sum())
    }
}

#[async_trait]
impl RevenueFeed for AdMobClient {
    async fn daily_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdMobReportRow>, AdMobError> {
        self.fetch_report(start, end).await
    }
}

/// The aggregation entry point shared by the web surface, the CLI, and the
/// sync scheduler. Holds no per-request state; every call re-fetches from
/// the store.
pub struct Analytics {
    store: Arc<dyn RowStore>,
    feed: Option<Arc<dyn RevenueFeed>>,
}

impl Analytics {
    pub fn new(store: Arc<dyn RowStore>, feed: Option<Arc<dyn RevenueFeed>>) -> Self {
        Self { store, feed }
    }

    pub(crate) fn store(&self) -> &dyn RowStore {
        self.store.as_ref()
    }

    pub(crate) fn feed(&self) -> Option<&Arc<dyn RevenueFeed>> {
        self.feed.as_ref()
    }

    /// Live AdMob total for the range, zero when unconfigured or failing.
    /// AdMob problems are never surfaced past this point.
    pub(crate) async fn live_total(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        match &self.feed {
            None => 0.0,
            Some(feed) => zero_on_failure(feed.total_between(start, end).await, "admob total"),
        }
    }
}

/// The degrade policy from the error-handling design: an upstream failure
/// contributes a zeroed value and a warning, never an error to the caller.
pub fn zero_on_failure<T, E>(result: Result<T, E>, operation: &str) -> T
where
    T: Default,
    E: std::fmt::Display,
{
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("{operation} failed, substituting zeroes: {err}");
            T::default()
        }
    }
}
