//! Core domain model for the Ajira admin backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "ajira-core";

/// Where a revenue figure came from. Stored as snake_case text in the
/// `earnings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueSource {
    Admob,
    Subscription,
    FeaturedJob,
    CreditsPurchase,
    Other,
}

impl RevenueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RevenueSource::Admob => "admob",
            RevenueSource::Subscription => "subscription",
            RevenueSource::FeaturedJob => "featured_job",
            RevenueSource::CreditsPurchase => "credits_purchase",
            RevenueSource::Other => "other",
        }
    }
}

/// Ad performance figures carried alongside an admob earnings row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarningsMetadata {
    #[serde(default)]
    pub impressions: Option<u64>,
    #[serde(default)]
    pub clicks: Option<u64>,
    #[serde(default)]
    pub ctr: Option<f64>,
    #[serde(default)]
    pub ecpm: Option<f64>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
}

/// One row of the `earnings` table, one per calendar day per source.
///
/// Admob-sourced amounts are a provisional cache; the live API total wins
/// whenever it is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsRow {
    #[serde(default)]
    pub id: Option<i64>,
    pub revenue_source: RevenueSource,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    pub earned_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_metadata")]
    pub metadata: Option<EarningsMetadata>,
}

/// Older rows persisted metadata as a JSON-encoded string rather than an
/// object; accept both and drop anything unparseable.
fn deserialize_metadata<'de, D>(deserializer: D) -> Result<Option<EarningsMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(raw)) => serde_json::from_str(&raw).ok(),
        Some(other) => serde_json::from_value(other).ok(),
    })
}

/// One day of the AdMob network report. Transient: produced per API call,
/// never persisted in this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdMobReportRow {
    pub date: NaiveDate,
    pub earnings: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub currency: String,
}

/// Broadcast targeting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    All,
    Seekers,
    Companies,
    Specific,
}

impl RecipientType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientType::All => "all",
            RecipientType::Seekers => "seekers",
            RecipientType::Companies => "companies",
            RecipientType::Specific => "specific",
        }
    }
}

/// One row of `notification_history`, written once per broadcast.
/// `delivery_count`/`read_count` are mutated later by read-receipt plumbing
/// outside this backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub title: String,
    pub message: String,
    pub recipient_type: RecipientType,
    pub recipient_uids: Vec<String>,
    pub sent_by: String,
    pub delivery_count: u64,
    pub read_count: u64,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
}

/// Projection of `all_users` used for recipient resolution and token lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub uid: String,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}
