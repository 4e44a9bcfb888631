//! Landing-page dashboard aggregation: headline totals + today's activity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ajira_core::EarningsRow;
use ajira_store::{fetch_all, StoreError, Table, TableQuery};

use crate::revenue::{growth_rate, reconcile_revenue, windowed_revenue, Window};
use crate::{zero_on_failure, Analytics, ALL_TIME_YEARS};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardOverview {
    pub total_users: u64,
    pub total_companies: u64,
    pub total_jobs: u64,
    pub total_applications: u64,
    pub total_revenue: f64,
    pub admob_revenue: f64,
    pub today_new_users: u64,
    pub today_new_jobs: u64,
    pub today_new_applications: u64,
    pub new_users_30d: u64,
    pub user_growth: f64,
    pub revenue_growth: f64,
}

#[derive(Debug, Deserialize)]
struct StampedRow {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn count_within(rows: &[StampedRow], window: Window) -> u64 {
    rows.iter()
        .filter(|row| row.created_at.is_some_and(|s| window.contains(s)))
        .count() as u64
}

impl Analytics {
    /// Headline numbers for the dashboard landing page. Store failures
    /// degrade to the zeroed overview.
    pub async fn dashboard_overview(&self, now: DateTime<Utc>) -> DashboardOverview {
        zero_on_failure(
            self.dashboard_overview_inner(now).await,
            "dashboard overview",
        )
    }

    async fn dashboard_overview_inner(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DashboardOverview, StoreError> {
        let store = self.store();
        let today = now.date_naive();

        let users_query = TableQuery::new(Table::AllUsers).columns(&["created_at"]);
        let companies_query = TableQuery::new(Table::Companies).columns(&["created_at"]);
        let jobs_query = TableQuery::new(Table::LatestJobs).columns(&["created_at"]);
        let applications_query = TableQuery::new(Table::JobApplications).columns(&["created_at"]);
        let earnings_query = TableQuery::new(Table::Earnings);
        let (tables, api_all_time) = tokio::join!(
            async {
                tokio::try_join!(
                    fetch_all::<StampedRow>(store, &users_query),
                    fetch_all::<StampedRow>(store, &companies_query),
                    fetch_all::<StampedRow>(store, &jobs_query),
                    fetch_all::<StampedRow>(store, &applications_query),
                    fetch_all::<EarningsRow>(store, &earnings_query),
                )
            },
            self.live_total(today - Duration::days(365 * ALL_TIME_YEARS), today),
        );
        let (users, companies, jobs, applications, earnings) = tables?;

        let breakdown = reconcile_revenue(&earnings, api_all_time);
        let today_window = Window::today(now);
        let last_30 = Window::last_days(now, 30);
        let previous_30 = last_30.previous();

        let new_users_30d = count_within(&users, last_30);
        let new_users_previous_30d = count_within(&users, previous_30);
        let revenue_30d = windowed_revenue(&earnings, last_30).total_revenue;
        let revenue_previous_30d = windowed_revenue(&earnings, previous_30).total_revenue;

        Ok(DashboardOverview {
            total_users: users.len() as u64,
            total_companies: companies.len() as u64,
            total_jobs: jobs.len() as u64,
            total_applications: applications.len() as u64,
            total_revenue: breakdown.total_revenue,
            admob_revenue: breakdown.total_admob,
            today_new_users: count_within(&users, today_window),
            today_new_jobs: count_within(&jobs, today_window),
            today_new_applications: count_within(&applications, today_window),
            new_users_30d,
            user_growth: growth_rate(new_users_30d as f64, new_users_previous_30d as f64),
            revenue_growth: growth_rate(revenue_30d, revenue_previous_30d),
        })
    }
}
