//! Platform-wide activity aggregation: users, jobs, applications,
//! interviews, credits, referrals, subscriptions, resumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ajira_store::{fetch_all, StoreError, Table, TableQuery};

use crate::revenue::{growth_rate, last_months, Window};
use crate::{zero_on_failure, Analytics};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlatformOverview {
    pub total_users: u64,
    pub total_seekers: u64,
    pub total_companies: u64,
    pub new_users_7d: u64,
    pub new_users_30d: u64,
    pub user_growth: f64,
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub new_jobs_30d: u64,
    pub total_applications: u64,
    pub new_applications_30d: u64,
    pub applications_per_job: f64,
    pub total_interviews: u64,
    pub upcoming_interviews: u64,
    pub credits_purchased: f64,
    pub credits_purchased_30d: f64,
    pub total_referrals: u64,
    pub new_referrals_30d: u64,
    pub active_subscriptions: u64,
    pub new_subscriptions_30d: u64,
    pub total_resumes: u64,
    pub new_resumes_30d: u64,
    pub monthly_signups: Vec<MonthlyCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyCount {
    pub month: String,
    pub users: u64,
    pub jobs: u64,
    pub applications: u64,
}

#[derive(Debug, Deserialize)]
struct UserRow {
    #[serde(default)]
    account_type: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StampedRow {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct JobRow {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct InterviewRow {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CreditRow {
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    transaction_type: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRow {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn count_within<T>(
    rows: &[T],
    window: Window,
    stamp: impl Fn(&T) -> Option<DateTime<Utc>>,
) -> u64 {
    rows.iter()
        .filter(|row| stamp(row).is_some_and(|s| window.contains(s)))
        .count() as u64
}

impl CreditRow {
    /// Non-purchase transaction rows (spends, refunds) stay out of revenue
    /// bookkeeping; rows without a type predate the column and count.
    fn is_purchase(&self) -> bool {
        self.transaction_type
            .as_deref()
            .map_or(true, |kind| kind == "purchase")
    }
}

impl Analytics {
    /// Platform activity for the admin dashboard. Store failures degrade to
    /// the zeroed overview.
    pub async fn platform_overview(&self, now: DateTime<Utc>) -> PlatformOverview {
        zero_on_failure(self.platform_overview_inner(now).await, "platform overview")
    }

    async fn platform_overview_inner(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PlatformOverview, StoreError> {
        let store = self.store();
        // Fixed fan-out: independent tables fetched together, one failed
        // branch fails the batch.
        let users_query =
            TableQuery::new(Table::AllUsers).columns(&["account_type", "created_at"]);
        let jobs_query = TableQuery::new(Table::LatestJobs).columns(&["status", "created_at"]);
        let applications_query =
            TableQuery::new(Table::JobApplications).columns(&["created_at"]);
        let interviews_query =
            TableQuery::new(Table::Interviews).columns(&["created_at", "scheduled_at"]);
        let credits_query = TableQuery::new(Table::CreditTransactions)
            .columns(&["amount", "transaction_type", "created_at"]);
        let referrals_query = TableQuery::new(Table::Referrals).columns(&["created_at"]);
        let subscriptions_query =
            TableQuery::new(Table::SubscriptionHistory).columns(&["status", "created_at"]);
        let resumes_query = TableQuery::new(Table::GeneratedResumes).columns(&["created_at"]);
        let (users, jobs, applications, interviews, credits, referrals, subscriptions, resumes) =
            tokio::try_join!(
                fetch_all::<UserRow>(store, &users_query),
                fetch_all::<JobRow>(store, &jobs_query),
                fetch_all::<StampedRow>(store, &applications_query),
                fetch_all::<InterviewRow>(store, &interviews_query),
                fetch_all::<CreditRow>(store, &credits_query),
                fetch_all::<StampedRow>(store, &referrals_query),
                fetch_all::<SubscriptionRow>(store, &subscriptions_query),
                fetch_all::<StampedRow>(store, &resumes_query),
            )?;

        let last_7 = Window::last_days(now, 7);
        let last_30 = Window::last_days(now, 30);
        let previous_30 = last_30.previous();

        let new_users_30d = count_within(&users, last_30, |u| u.created_at);
        let new_users_previous_30d = count_within(&users, previous_30, |u| u.created_at);

        let total_jobs = jobs.len() as u64;
        let total_applications = applications.len() as u64;

        let purchases: Vec<&CreditRow> = credits.iter().filter(|c| c.is_purchase()).collect();
        let credits_purchased = purchases.iter().filter_map(|c| c.amount).sum();
        let credits_purchased_30d = purchases
            .iter()
            .filter(|c| c.created_at.is_some_and(|s| last_30.contains(s)))
            .filter_map(|c| c.amount)
            .sum();

        let monthly_signups = last_months(now, 6)
            .into_iter()
            .map(|(month, window)| MonthlyCount {
                month,
                users: count_within(&users, window, |u| u.created_at),
                jobs: count_within(&jobs, window, |j| j.created_at),
                applications: count_within(&applications, window, |a| a.created_at),
            })
            .collect();

        Ok(PlatformOverview {
            total_users: users.len() as u64,
            total_seekers: users
                .iter()
                .filter(|u| u.account_type.as_deref() == Some("seeker"))
                .count() as u64,
            total_companies: users
                .iter()
                .filter(|u| u.account_type.as_deref() == Some("company"))
                .count() as u64,
            new_users_7d: count_within(&users, last_7, |u| u.created_at),
            new_users_30d,
            user_growth: growth_rate(new_users_30d as f64, new_users_previous_30d as f64),
            total_jobs,
            active_jobs: jobs
                .iter()
                .filter(|j| j.status.as_deref() == Some("active"))
                .count() as u64,
            new_jobs_30d: count_within(&jobs, last_30, |j| j.created_at),
            total_applications,
            new_applications_30d: count_within(&applications, last_30, |a| a.created_at),
            applications_per_job: if total_jobs == 0 {
                0.0
            } else {
                total_applications as f64 / total_jobs as f64
            },
            total_interviews: interviews.len() as u64,
            upcoming_interviews: interviews
                .iter()
                .filter(|i| i.scheduled_at.is_some_and(|s| s >= now))
                .count() as u64,
            credits_purchased,
            credits_purchased_30d,
            total_referrals: referrals.len() as u64,
            new_referrals_30d: count_within(&referrals, last_30, |r| r.created_at),
            active_subscriptions: subscriptions
                .iter()
                .filter(|s| s.status.as_deref() == Some("active"))
                .count() as u64,
            new_subscriptions_30d: count_within(&subscriptions, last_30, |s| s.created_at),
            total_resumes: resumes.len() as u64,
            new_resumes_30d: count_within(&resumes, last_30, |r| r.created_at),
            monthly_signups,
        })
    }
}
