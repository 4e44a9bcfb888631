//! Earnings overview aggregation + the AdMob cache sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use ajira_admob::AdMobError;
use ajira_core::{EarningsMetadata, EarningsRow, RevenueSource};
use ajira_store::{fetch_all, EarningsUpsert, StoreError, Table, TableQuery};

use crate::revenue::{
    ctr, ecpm, growth_rate, reconcile_revenue, windowed_revenue, Window,
};
use crate::{zero_on_failure, Analytics, ALL_TIME_YEARS};

/// How far back the daily sync refreshes the stored admob rows.
pub const SYNC_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EarningsOverview {
    pub total_revenue: f64,
    pub admob_revenue: f64,
    pub other_revenue: f64,
    pub month_revenue: f64,
    pub month_admob_revenue: f64,
    pub last_30_days_revenue: f64,
    pub last_7_days_revenue: f64,
    pub revenue_growth: f64,
    pub by_source: BTreeMap<String, f64>,
    pub total_impressions: u64,
    pub total_clicks: u64,
    pub ctr: f64,
    pub ecpm: f64,
    pub daily: Vec<DailyRevenuePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyRevenuePoint {
    pub date: NaiveDate,
    pub admob: f64,
    pub other: f64,
    pub total: f64,
}

impl Analytics {
    /// Earnings figures for the dashboard. Store failures degrade to the
    /// zeroed overview; AdMob failures degrade to stored sums.
    pub async fn earnings_overview(&self, now: DateTime<Utc>) -> EarningsOverview {
        zero_on_failure(self.earnings_overview_inner(now).await, "earnings overview")
    }

    async fn earnings_overview_inner(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EarningsOverview, StoreError> {
        let today = now.date_naive();
        let all_time_start = today - Duration::days(365 * ALL_TIME_YEARS);
        let month = Window::month_to_date(now);

        // The live API is only trusted for the all-time and month-to-date
        // totals; windowed figures below always come from storage.
        let earnings_query = TableQuery::new(Table::Earnings);
        let (rows, api_all_time, api_month) = tokio::join!(
            fetch_all::<EarningsRow>(self.store(), &earnings_query),
            self.live_total(all_time_start, today),
            self.live_total(month.start.date_naive(), today),
        );
        let rows = rows?;

        let breakdown = reconcile_revenue(&rows, api_all_time);
        let month_rows: Vec<EarningsRow> = rows
            .iter()
            .filter(|row| month.contains(row.earned_at))
            .cloned()
            .collect();
        let month_breakdown = reconcile_revenue(&month_rows, api_month);

        let last_30 = Window::last_days(now, 30);
        let last_7 = Window::last_days(now, 7);
        let sum_30 = windowed_revenue(&rows, last_30).total_revenue;
        let sum_previous_30 = windowed_revenue(&rows, last_30.previous()).total_revenue;
        let sum_7 = windowed_revenue(&rows, last_7).total_revenue;

        let mut by_source: BTreeMap<String, f64> = BTreeMap::new();
        for row in &rows {
            *by_source
                .entry(row.revenue_source.as_str().to_string())
                .or_default() += row.amount;
        }

        let mut total_impressions = 0u64;
        let mut total_clicks = 0u64;
        for row in rows
            .iter()
            .filter(|row| row.revenue_source == RevenueSource::Admob)
        {
            if let Some(metadata) = &row.metadata {
                total_impressions += metadata.impressions.unwrap_or(0);
                total_clicks += metadata.clicks.unwrap_or(0);
            }
        }

        let daily = (0..30)
            .rev()
            .map(|back| {
                let date = today - Duration::days(back);
                let day = windowed_revenue(&rows, Window::day(date));
                DailyRevenuePoint {
                    date,
                    admob: day.total_admob,
                    other: day.other_total,
                    total: day.total_revenue,
                }
            })
            .collect();

        Ok(EarningsOverview {
            total_revenue: breakdown.total_revenue,
            admob_revenue: breakdown.total_admob,
            other_revenue: breakdown.other_total,
            month_revenue: month_breakdown.total_revenue,
            month_admob_revenue: month_breakdown.total_admob,
            last_30_days_revenue: sum_30,
            last_7_days_revenue: sum_7,
            revenue_growth: growth_rate(sum_30, sum_previous_30),
            by_source,
            total_impressions,
            total_clicks,
            ctr: ctr(total_clicks, total_impressions),
            ecpm: ecpm(breakdown.total_admob, total_impressions),
            daily,
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("AdMob is not configured")]
    NotConfigured,
    #[error(transparent)]
    AdMob(#[from] AdMobError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct EarningsSyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub days_reported: usize,
    pub rows_upserted: usize,
    pub rows_failed: usize,
    pub total_amount: f64,
}

impl Analytics {
    /// Refresh the stored admob earnings cache from the live report: one
    /// upserted row per reported day. Per-day failures are logged and
    /// counted; the sync keeps going.
    pub async fn sync_admob_earnings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EarningsSyncSummary, SyncError> {
        let feed = self.feed().ok_or(SyncError::NotConfigured)?;
        let run_id = Uuid::new_v4();
        let today = now.date_naive();
        let report = feed
            .daily_report(today - Duration::days(SYNC_WINDOW_DAYS), today)
            .await?;

        let mut rows_upserted = 0usize;
        let mut rows_failed = 0usize;
        let mut total_amount = 0.0;
        for day in &report {
            let metadata = EarningsMetadata {
                impressions: Some(day.impressions),
                clicks: Some(day.clicks),
                ctr: Some(ctr(day.clicks, day.impressions)),
                ecpm: Some(ecpm(day.earnings, day.impressions)),
                last_synced: Some(now),
            };
            let upsert = EarningsUpsert {
                revenue_source: RevenueSource::Admob,
                amount: day.earnings,
                currency: day.currency.clone(),
                day: day.date,
                metadata: Some(metadata),
            };
            match self.store().upsert_earnings(&upsert).await {
                Ok(()) => {
                    rows_upserted += 1;
                    total_amount += day.earnings;
                }
                Err(err) => {
                    rows_failed += 1;
                    warn!("upserting admob earnings for {}: {err}", day.date);
                }
            }
        }

        info!(%run_id, rows_upserted, rows_failed, "admob earnings sync finished");
        Ok(EarningsSyncSummary {
            run_id,
            started_at: now,
            finished_at: Utc::now(),
            days_reported: report.len(),
            rows_upserted,
            rows_failed,
            total_amount,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncSchedule {
    pub enabled: bool,
    pub cron: String,
}

impl SyncSchedule {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("EARNINGS_SYNC_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron: std::env::var("EARNINGS_SYNC_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        }
    }
}

/// Cron-driven earnings sync, disabled unless opted in via env.
pub async fn maybe_build_scheduler(
    analytics: Arc<Analytics>,
    schedule: &SyncSchedule,
) -> anyhow::Result<Option<JobScheduler>> {
    if !schedule.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = schedule.cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let analytics = analytics.clone();
        Box::pin(async move {
            match analytics.sync_admob_earnings(Utc::now()).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    rows_upserted = summary.rows_upserted,
                    rows_failed = summary.rows_failed,
                    "scheduled earnings sync completed"
                ),
                Err(err) => warn!("scheduled earnings sync failed: {err}"),
            }
        })
    })
    .with_context(|| format!("creating sync job for cron {cron}"))?;
    sched.add(job).await.context("adding sync job")?;
    Ok(Some(sched))
}
