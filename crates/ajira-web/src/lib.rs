//! Axum JSON surface for the admin dashboard.

use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::{info, warn};

use ajira_analytics::Analytics;
use ajira_core::NotificationRecord;
use ajira_notify::{BroadcastRequest, Broadcaster};
use ajira_store::{fetch_all, RowStore, Table, TableQuery};

pub const CRATE_NAME: &str = "ajira-web";

#[derive(Clone)]
pub struct AppState {
    pub analytics: Arc<Analytics>,
    pub broadcaster: Option<Arc<Broadcaster>>,
    pub store: Arc<dyn RowStore>,
}

impl AppState {
    pub fn new(
        analytics: Arc<Analytics>,
        broadcaster: Option<Arc<Broadcaster>>,
        store: Arc<dyn RowStore>,
    ) -> Self {
        Self {
            analytics,
            broadcaster,
            store,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/analytics/earnings", get(earnings_handler))
        .route("/api/analytics/platform", get(platform_handler))
        .route("/api/analytics/dashboard", get(dashboard_handler))
        .route("/api/earnings/sync", post(sync_handler))
        .route("/api/notifications/broadcast", post(broadcast_handler))
        .route("/api/notifications/history", get(history_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("AJIRA_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "admin backend listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Mutating endpoints answer `{success, summary | error}` with HTTP 200;
/// the admin UI keys off the `success` flag.
fn success(summary: impl Serialize) -> Json<JsonValue> {
    Json(json!({"success": true, "summary": summary}))
}

fn failure(error: impl Display) -> Json<JsonValue> {
    Json(json!({"success": false, "error": error.to_string()}))
}

async fn health_handler() -> Json<JsonValue> {
    Json(json!({"status": "ok", "service": CRATE_NAME}))
}

async fn earnings_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let overview = state.analytics.earnings_overview(Utc::now()).await;
    Json(json!(overview))
}

async fn platform_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let overview = state.analytics.platform_overview(Utc::now()).await;
    Json(json!(overview))
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let overview = state.analytics.dashboard_overview(Utc::now()).await;
    Json(json!(overview))
}

async fn sync_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    match state.analytics.sync_admob_earnings(Utc::now()).await {
        Ok(summary) => success(summary),
        Err(err) => failure(err),
    }
}

async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> Json<JsonValue> {
    let Some(broadcaster) = &state.broadcaster else {
        return failure("push provider is not configured");
    };
    match broadcaster.broadcast(&request, Utc::now()).await {
        Ok(summary) => success(summary),
        Err(err) => failure(err),
    }
}

/// Most recent broadcasts first. A store failure renders as an empty list,
/// same as the analytics pages.
async fn history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<NotificationRecord>> {
    let query = TableQuery::new(Table::NotificationHistory);
    let mut records: Vec<NotificationRecord> =
        match fetch_all(state.store.as_ref(), &query).await {
            Ok(records) => records,
            Err(err) => {
                warn!("loading notification history: {err}");
                Vec::new()
            }
        };
    records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    Json(records)
}
