//! Pure revenue math shared by every aggregator. One reconciliation
//! function, one growth policy, no I/O.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};

use ajira_core::{EarningsRow, RevenueSource};

/// Result of merging a live AdMob total with stored earnings rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RevenueBreakdown {
    pub total_admob: f64,
    pub other_total: f64,
    pub total_revenue: f64,
}

/// The reconciliation rule: the live API figure wins over the stored admob
/// sum whenever it is positive; every other source is summed from storage.
pub fn reconcile_revenue(rows: &[EarningsRow], api_total: f64) -> RevenueBreakdown {
    let mut stored_admob = 0.0;
    let mut other_total = 0.0;
    for row in rows {
        if row.revenue_source == RevenueSource::Admob {
            stored_admob += row.amount;
        } else {
            other_total += row.amount;
        }
    }
    let total_admob = if api_total > 0.0 { api_total } else { stored_admob };
    RevenueBreakdown {
        total_admob,
        other_total,
        total_revenue: total_admob + other_total,
    }
}

/// Click-through rate in percent; zero impressions means zero, not NaN.
pub fn ctr(clicks: u64, impressions: u64) -> f64 {
    if impressions == 0 {
        0.0
    } else {
        clicks as f64 / impressions as f64 * 100.0
    }
}

/// Effective cost per thousand impressions; zero impressions means zero.
pub fn ecpm(revenue: f64, impressions: u64) -> f64 {
    if impressions == 0 {
        0.0
    } else {
        revenue / impressions as f64 * 1000.0
    }
}

/// Percentage growth between adjacent windows. An empty previous window is
/// "no growth" (0), the policy every aggregator now shares.
pub fn growth_rate(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - Duration::days(days),
            end: now,
        }
    }

    /// The same-length window immediately before this one.
    pub fn previous(&self) -> Self {
        let span = self.end - self.start;
        Self {
            start: self.start - span,
            end: self.start,
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn today(now: DateTime<Utc>) -> Self {
        Self::day(now.date_naive())
    }

    pub fn month_to_date(now: DateTime<Utc>) -> Self {
        let first = now
            .date_naive()
            .with_day(1)
            .expect("day one is always a valid date");
        Self {
            start: first.and_time(NaiveTime::MIN).and_utc(),
            end: now,
        }
    }

    pub fn contains(&self, stamp: DateTime<Utc>) -> bool {
        stamp >= self.start && stamp < self.end
    }
}

/// Stored revenue inside a window, same source split as the all-time figure
/// but never trusting the live API (windowed figures are storage-only).
pub fn windowed_revenue(rows: &[EarningsRow], window: Window) -> RevenueBreakdown {
    let scoped: Vec<EarningsRow> = rows
        .iter()
        .filter(|row| window.contains(row.earned_at))
        .cloned()
        .collect();
    reconcile_revenue(&scoped, 0.0)
}

/// The last `count` calendar months ending with the current one, as
/// `("YYYY-MM", window)` pairs in chronological order.
pub fn last_months(now: DateTime<Utc>, count: u32) -> Vec<(String, Window)> {
    let current_first = now
        .date_naive()
        .with_day(1)
        .expect("day one is always a valid date");
    (0..count)
        .rev()
        .map(|back| {
            let first = current_first
                .checked_sub_months(Months::new(back))
                .expect("month arithmetic stays in range");
            let next_first = first
                .checked_add_months(Months::new(1))
                .expect("month arithmetic stays in range");
            let window = Window {
                start: first.and_time(NaiveTime::MIN).and_utc(),
                end: next_first.and_time(NaiveTime::MIN).and_utc(),
            };
            (format!("{:04}-{:02}", first.year(), first.month()), window)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(source: RevenueSource, amount: f64, earned_at: &str) -> EarningsRow {
        EarningsRow {
            id: None,
            revenue_source: source,
            amount,
            currency: Some("USD".into()),
            earned_at: DateTime::parse_from_rfc3339(earned_at)
                .expect("test timestamp")
                .with_timezone(&Utc),
            metadata: None,
        }
    }

    #[test]
    fn stored_admob_sum_wins_when_api_reports_zero() {
        let rows = vec![
            row(RevenueSource::Admob, 10.0, "2024-01-01T00:00:00Z"),
            row(RevenueSource::Subscription, 5.0, "2024-01-01T00:00:00Z"),
        ];
        let breakdown = reconcile_revenue(&rows, 0.0);
        assert_eq!(breakdown.total_admob, 10.0);
        assert_eq!(breakdown.other_total, 5.0);
        assert_eq!(breakdown.total_revenue, 15.0);
    }

    #[test]
    fn positive_api_total_overrides_stored_admob() {
        let rows = vec![
            row(RevenueSource::Admob, 10.0, "2024-01-01T00:00:00Z"),
            row(RevenueSource::Subscription, 5.0, "2024-01-01T00:00:00Z"),
        ];
        let breakdown = reconcile_revenue(&rows, 12.0);
        assert_eq!(breakdown.total_admob, 12.0);
        assert_eq!(breakdown.total_revenue, 17.0);
    }

    #[test]
    fn total_is_always_admob_plus_other() {
        let rows = vec![
            row(RevenueSource::Admob, 3.0, "2024-01-01T00:00:00Z"),
            row(RevenueSource::FeaturedJob, 7.5, "2024-01-02T00:00:00Z"),
            row(RevenueSource::CreditsPurchase, 1.5, "2024-01-03T00:00:00Z"),
        ];
        for api_total in [0.0, 4.0, -2.0] {
            let breakdown = reconcile_revenue(&rows, api_total);
            assert_eq!(
                breakdown.total_revenue,
                breakdown.total_admob + breakdown.other_total
            );
        }
    }

    #[test]
    fn rate_metrics_guard_zero_impressions() {
        assert_eq!(ctr(10, 0), 0.0);
        assert_eq!(ecpm(5.0, 0), 0.0);
        assert_eq!(ctr(10, 1000), 1.0);
        assert_eq!(ecpm(2.5, 500), 5.0);
    }

    #[test]
    fn empty_previous_window_means_no_growth() {
        // Unified policy: 0, not 100, when the previous window was empty.
        assert_eq!(growth_rate(50.0, 0.0), 0.0);
        assert_eq!(growth_rate(150.0, 100.0), 50.0);
        assert_eq!(growth_rate(50.0, 100.0), -50.0);
    }

    #[test]
    fn previous_window_is_adjacent_and_same_length() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap();
        let last_30 = Window::last_days(now, 30);
        let previous = last_30.previous();
        assert_eq!(previous.end, last_30.start);
        assert_eq!(previous.end - previous.start, last_30.end - last_30.start);
    }

    #[test]
    fn month_to_date_starts_on_the_first() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap();
        let month = Window::month_to_date(now);
        assert_eq!(
            month.start,
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().unwrap()
        );
        assert_eq!(month.end, now);
    }

    #[test]
    fn windowed_revenue_ignores_live_totals() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap();
        let rows = vec![
            row(RevenueSource::Admob, 4.0, "2024-06-10T00:00:00Z"),
            row(RevenueSource::Admob, 9.0, "2024-01-10T00:00:00Z"),
            row(RevenueSource::Subscription, 2.0, "2024-06-12T00:00:00Z"),
        ];
        let breakdown = windowed_revenue(&rows, Window::last_days(now, 30));
        assert_eq!(breakdown.total_admob, 4.0);
        assert_eq!(breakdown.total_revenue, 6.0);
    }

    #[test]
    fn last_months_covers_six_contiguous_months() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap();
        let months = last_months(now, 6);
        assert_eq!(months.len(), 6);
        assert_eq!(months[0].0, "2024-01");
        assert_eq!(months[5].0, "2024-06");
        for pair in months.windows(2) {
            assert_eq!(pair[0].1.end, pair[1].1.start);
        }
    }
}
