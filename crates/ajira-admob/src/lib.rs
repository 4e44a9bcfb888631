//! AdMob reporting client: OAuth2 refresh grant + one network report call.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use ajira_core::AdMobReportRow;

pub const CRATE_NAME: &str = "ajira-admob";

/// Reports are filtered to the one production app.
pub const APP_ID: &str = "ca-app-pub-1644643871385985~1470724022";

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://admob.googleapis.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum AdMobError {
    #[error("missing AdMob credential {0}")]
    MissingCredential(&'static str),
    #[error("token exchange rejected: {0}")]
    TokenExchange(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("report request returned http {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("malformed report row: {0}")]
    MalformedReport(String),
}

/// Long-lived credentials for the refresh-token grant. All four variables
/// must be present; a missing one degrades the whole feature to
/// database-only figures.
#[derive(Debug, Clone)]
pub struct AdMobConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub publisher_id: String,
}

impl AdMobConfig {
    pub fn from_env() -> Result<Self, AdMobError> {
        Ok(Self {
            client_id: require_env("ADMOB_API_CLIENT_ID")?,
            client_secret: require_env("ADMOB_API_CLIENT_SECRET")?,
            refresh_token: require_env("ADMOB_API_REFRESH_TOKEN")?,
            publisher_id: require_env("ADMOB_PUBLISHER_ID")?,
        })
    }

    /// Account resource name; the stored publisher id may or may not carry
    /// the `pub-` prefix.
    pub fn account(&self) -> String {
        let digits = self.publisher_id.trim_start_matches("pub-");
        format!("accounts/pub-{digits}")
    }
}

fn require_env(name: &'static str) -> Result<String, AdMobError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AdMobError::MissingCredential(name)),
    }
}

pub struct AdMobClient {
    http: reqwest::Client,
    config: AdMobConfig,
}

impl AdMobClient {
    pub fn new(config: AdMobConfig) -> Result<Self, AdMobError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, AdMobError> {
        Self::new(AdMobConfig::from_env()?)
    }

    /// Exchange the stored refresh token for a short-lived bearer token.
    pub async fn access_token(&self) -> Result<String, AdMobError> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AdMobError::TokenExchange(format!("http {status}: {body}")));
        }
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| AdMobError::TokenExchange(err.to_string()))?;
        parsed
            .access_token
            .ok_or_else(|| AdMobError::TokenExchange("response carried no access_token".into()))
    }

    /// One network report call for the inclusive date range, filtered to
    /// [`APP_ID`], one row per day. A range with no activity is an empty
    /// vec, not an error.
    pub async fn fetch_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdMobReportRow>, AdMobError> {
        let token = self.access_token().await?;
        let url = format!(
            "{API_BASE}/{account}/networkReport:generate",
            account = self.config.account()
        );
        debug!(%start, %end, "requesting AdMob network report");
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&report_request_body(start, end))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AdMobError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let entries: Vec<ReportEntry> = serde_json::from_str(&body)
            .map_err(|err| AdMobError::MalformedReport(err.to_string()))?;
        parse_report(entries)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

fn report_request_body(start: NaiveDate, end: NaiveDate) -> JsonValue {
    json!({
        "reportSpec": {
            "dateRange": {
                "startDate": {"year": start.year(), "month": start.month(), "day": start.day()},
                "endDate": {"year": end.year(), "month": end.month(), "day": end.day()},
            },
            "dimensions": ["DATE"],
            "metrics": ["ESTIMATED_EARNINGS", "IMPRESSIONS", "CLICKS"],
            "dimensionFilters": [{
                "dimension": "APP",
                "matchesAny": {"values": [APP_ID]},
            }],
            "localizationSettings": {"currencyCode": "USD"},
        }
    })
}

/// The report streams back as an array of header/row/footer entries; only
/// the row entries carry data.
#[derive(Debug, Deserialize)]
struct ReportEntry {
    #[serde(default)]
    row: Option<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(default, rename = "dimensionValues")]
    dimension_values: HashMap<String, DimensionValue>,
    #[serde(default, rename = "metricValues")]
    metric_values: HashMap<String, MetricValue>,
}

#[derive(Debug, Deserialize)]
struct DimensionValue {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricValue {
    #[serde(default, rename = "microsValue")]
    micros_value: Option<String>,
    #[serde(default, rename = "integerValue")]
    integer_value: Option<String>,
    #[serde(default, rename = "doubleValue")]
    double_value: Option<f64>,
}

impl MetricValue {
    fn as_currency(&self) -> f64 {
        if let Some(micros) = &self.micros_value {
            return micros.parse::<i64>().map(|m| m as f64 / 1_000_000.0).unwrap_or(0.0);
        }
        self.double_value.unwrap_or(0.0)
    }

    fn as_count(&self) -> u64 {
        self.integer_value
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }
}

fn parse_report(entries: Vec<ReportEntry>) -> Result<Vec<AdMobReportRow>, AdMobError> {
    let mut rows = Vec::new();
    for entry in entries {
        let Some(row) = entry.row else { continue };
        let raw_date = row
            .dimension_values
            .get("DATE")
            .and_then(|d| d.value.as_deref())
            .ok_or_else(|| AdMobError::MalformedReport("row without DATE dimension".into()))?;
        let date = NaiveDate::parse_from_str(raw_date, "%Y%m%d")
            .map_err(|err| AdMobError::MalformedReport(format!("bad DATE {raw_date}: {err}")))?;
        let metric = |name: &str| row.metric_values.get(name);
        rows.push(AdMobReportRow {
            date,
            earnings: metric("ESTIMATED_EARNINGS").map(MetricValue::as_currency).unwrap_or(0.0),
            impressions: metric("IMPRESSIONS").map(MetricValue::as_count).unwrap_or(0),
            clicks: metric("CLICKS").map(MetricValue::as_count).unwrap_or(0),
            currency: "USD".to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdMobConfig {
        AdMobConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            publisher_id: "pub-1644643871385985".into(),
        }
    }

    #[test]
    fn account_normalizes_publisher_prefix() {
        assert_eq!(config().account(), "accounts/pub-1644643871385985");
        let bare = AdMobConfig {
            publisher_id: "1644643871385985".into(),
            ..config()
        };
        assert_eq!(bare.account(), "accounts/pub-1644643871385985");
    }

    #[test]
    fn request_body_pins_range_and_app_filter() {
        let body = report_request_body(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        assert_eq!(body["reportSpec"]["dateRange"]["startDate"]["day"], 1);
        assert_eq!(body["reportSpec"]["dateRange"]["endDate"]["day"], 31);
        assert_eq!(
            body["reportSpec"]["dimensionFilters"][0]["matchesAny"]["values"][0],
            APP_ID
        );
    }

    #[test]
    fn report_rows_convert_micros_and_counts() {
        let raw = serde_json::json!([
            {"header": {"dateRange": {}}},
            {"row": {
                "dimensionValues": {"DATE": {"value": "20240101"}},
                "metricValues": {
                    "ESTIMATED_EARNINGS": {"microsValue": "12345678"},
                    "IMPRESSIONS": {"integerValue": "1000"},
                    "CLICKS": {"integerValue": "25"}
                }
            }},
            {"row": {
                "dimensionValues": {"DATE": {"value": "20240102"}},
                "metricValues": {
                    "ESTIMATED_EARNINGS": {"doubleValue": 2.5},
                    "IMPRESSIONS": {"integerValue": "400"},
                    "CLICKS": {"integerValue": "0"}
                }
            }},
            {"footer": {"matchingRowCount": "2"}}
        ]);
        let entries: Vec<ReportEntry> = serde_json::from_value(raw).unwrap();
        let rows = parse_report(entries).unwrap();
        assert_eq!(rows.len(), 2);
        assert!((rows[0].earnings - 12.345678).abs() < 1e-9);
        assert_eq!(rows[0].impressions, 1000);
        assert_eq!(rows[0].clicks, 25);
        assert!((rows[1].earnings - 2.5).abs() < 1e-9);
    }

    #[test]
    fn empty_report_is_not_an_error() {
        let entries: Vec<ReportEntry> = serde_json::from_str("[]").unwrap();
        assert!(parse_report(entries).unwrap().is_empty());

        let header_only: Vec<ReportEntry> =
            serde_json::from_str(r#"[{"header": {}}, {"footer": {}}]"#).unwrap();
        assert!(parse_report(header_only).unwrap().is_empty());
    }

    #[test]
    fn row_without_date_is_malformed() {
        let raw = serde_json::json!([{"row": {"metricValues": {}}}]);
        let entries: Vec<ReportEntry> = serde_json::from_value(raw).unwrap();
        let err = parse_report(entries).unwrap_err();
        assert!(matches!(err, AdMobError::MalformedReport(_)));
    }
}
