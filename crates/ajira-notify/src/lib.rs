//! Push broadcast pipeline: validation, recipient resolution, batched
//! delivery, invalid-token pruning, history bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use ajira_core::{NotificationRecord, RecipientType, UserAccount};
use ajira_store::{fetch_all, Filter, FilterValue, RowStore, StoreError, Table, TableQuery};

mod fcm;

pub use fcm::{FcmClient, FcmConfig};

pub const CRATE_NAME: &str = "ajira-notify";

/// Provider hard ceiling on tokens per multicast call.
pub const SEND_BATCH_SIZE: usize = 500;
/// Chunk size for token lookups, bounded by the store's querying limits and
/// deliberately distinct from the send batch size.
pub const TOKEN_FETCH_CHUNK: usize = 1000;
pub const MAX_TITLE_CHARS: usize = 65;
pub const MAX_MESSAGE_CHARS: usize = 240;

/// A broadcast as submitted from the admin UI.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
    pub recipient_type: RecipientType,
    #[serde(default)]
    pub recipient_uids: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
    pub sent_by: String,
}

/// The one platform-spanning payload shared across every batch of a
/// broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub action_url: Option<String>,
}

impl PushPayload {
    pub fn from_request(request: &BroadcastRequest) -> Self {
        Self {
            title: request.title.clone(),
            body: request.message.clone(),
            image_url: request.image_url.clone(),
            action_url: request.action_url.clone(),
        }
    }
}

/// Per-token delivery failure as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// Provider rejected the token itself as malformed.
    InvalidToken,
    /// Token belongs to an app instance that no longer exists.
    NotRegistered,
    /// Anything transient or unclassified; never triggers pruning.
    Other(String),
}

impl SendFailure {
    /// Only the two permanent codes justify nulling the stored token.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendFailure::InvalidToken | SendFailure::NotRegistered)
    }
}

#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub token: String,
    pub result: Result<(), SendFailure>,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push provider is not configured: missing {0}")]
    MissingCredential(&'static str),
    #[error("service account token grant rejected: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("signing service account assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The delivery seam. Implemented by [`FcmClient`]; tests substitute a fake.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Deliver one payload to at most [`SEND_BATCH_SIZE`] tokens, one
    /// outcome per token. An `Err` means the whole batch went undelivered.
    async fn send_batch(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<Vec<TokenOutcome>, PushError>;
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("notification title must be 1-{MAX_TITLE_CHARS} characters")]
    InvalidTitle,
    #[error("notification message must be 1-{MAX_MESSAGE_CHARS} characters")]
    InvalidMessage,
    #[error("No recipients found")]
    NoRecipients,
    #[error("no push tokens registered for the selected recipients")]
    NoTokens,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checked before any I/O; a violation short-circuits with zero side
/// effects.
pub fn validate_request(request: &BroadcastRequest) -> Result<(), BroadcastError> {
    let title_chars = request.title.trim().chars().count();
    if title_chars == 0 || title_chars > MAX_TITLE_CHARS {
        return Err(BroadcastError::InvalidTitle);
    }
    let message_chars = request.message.trim().chars().count();
    if message_chars == 0 || message_chars > MAX_MESSAGE_CHARS {
        return Err(BroadcastError::InvalidMessage);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastSummary {
    pub recipients: usize,
    pub tokens: usize,
    pub batches: usize,
    pub delivered: u64,
    pub failed: u64,
    pub pruned_tokens: usize,
}

pub struct Broadcaster {
    store: Arc<dyn RowStore>,
    provider: Arc<dyn PushProvider>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn RowStore>, provider: Arc<dyn PushProvider>) -> Self {
        Self { store, provider }
    }

    /// Run the whole pipeline once. Batches are sent sequentially; a failed
    /// batch counts its tokens as failed and the pass continues. There are
    /// no retries anywhere.
    pub async fn broadcast(
        &self,
        request: &BroadcastRequest,
        now: DateTime<Utc>,
    ) -> Result<BroadcastSummary, BroadcastError> {
        validate_request(request)?;
        let recipients = self.resolve_recipients(request).await?;
        let tokens = self.fetch_tokens(&recipients).await?;
        let payload = PushPayload::from_request(request);

        let mut delivered = 0u64;
        let mut failed = 0u64;
        let mut invalid_tokens: Vec<String> = Vec::new();
        let mut batches = 0usize;
        for batch in tokens.chunks(SEND_BATCH_SIZE) {
            batches += 1;
            match self.provider.send_batch(batch, &payload).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome.result {
                            Ok(()) => delivered += 1,
                            Err(failure) => {
                                failed += 1;
                                if failure.is_permanent() {
                                    invalid_tokens.push(outcome.token);
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    failed += batch.len() as u64;
                    warn!("push batch {batches} failed wholesale: {err}");
                }
            }
        }

        let pruned_tokens = if invalid_tokens.is_empty() {
            0
        } else {
            // Best effort: a failed prune leaves dead tokens for the next
            // broadcast to report again.
            match self.store.clear_push_tokens(&invalid_tokens).await {
                Ok(count) => count as usize,
                Err(err) => {
                    warn!(
                        "pruning {} invalid push tokens: {err}",
                        invalid_tokens.len()
                    );
                    0
                }
            }
        };

        let record = NotificationRecord {
            title: request.title.clone(),
            message: request.message.clone(),
            recipient_type: request.recipient_type,
            recipient_uids: recipients.clone(),
            sent_by: request.sent_by.clone(),
            delivery_count: delivered,
            read_count: 0,
            sent_at: now,
            image_url: request.image_url.clone(),
            action_url: request.action_url.clone(),
        };
        // One history row regardless of partial failures; delivery already
        // happened, so a failed write is logged rather than surfaced.
        if let Err(err) = self.store.insert_notification(&record).await {
            warn!("recording notification history: {err}");
        }

        info!(
            recipients = recipients.len(),
            tokens = tokens.len(),
            delivered,
            failed,
            pruned_tokens,
            "broadcast finished"
        );
        Ok(BroadcastSummary {
            recipients: recipients.len(),
            tokens: tokens.len(),
            batches,
            delivered,
            failed,
            pruned_tokens,
        })
    }

    async fn resolve_recipients(
        &self,
        request: &BroadcastRequest,
    ) -> Result<Vec<String>, BroadcastError> {
        let uids = match request.recipient_type {
            RecipientType::Specific => request.recipient_uids.clone(),
            RecipientType::All => self.fetch_uids(None).await?,
            RecipientType::Seekers => self.fetch_uids(Some("seeker")).await?,
            RecipientType::Companies => self.fetch_uids(Some("company")).await?,
        };
        if uids.is_empty() {
            return Err(BroadcastError::NoRecipients);
        }
        Ok(uids)
    }

    async fn fetch_uids(
        &self,
        account_type: Option<&'static str>,
    ) -> Result<Vec<String>, BroadcastError> {
        let mut query = TableQuery::new(Table::AllUsers).columns(&["uid", "account_type"]);
        if let Some(kind) = account_type {
            query = query.filter(Filter::Eq("account_type", FilterValue::Text(kind.into())));
        }
        let users: Vec<UserAccount> = fetch_all(self.store.as_ref(), &query).await?;
        Ok(users.into_iter().map(|user| user.uid).collect())
    }

    async fn fetch_tokens(&self, uids: &[String]) -> Result<Vec<String>, BroadcastError> {
        let mut tokens = Vec::new();
        for chunk in uids.chunks(TOKEN_FETCH_CHUNK) {
            let query = TableQuery::new(Table::AllUsers)
                .columns(&["uid", "push_token"])
                .filter(Filter::In("uid", chunk.to_vec()))
                .filter(Filter::NotNull("push_token"));
            let users: Vec<UserAccount> = fetch_all(self.store.as_ref(), &query).await?;
            tokens.extend(
                users
                    .into_iter()
                    .filter_map(|user| user.push_token)
                    .filter(|token| !token.is_empty()),
            );
        }
        if tokens.is_empty() {
            return Err(BroadcastError::NoTokens);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajira_store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<usize>>,
        wholesale_fail_batches: Vec<usize>,
        token_failures: HashMap<String, SendFailure>,
    }

    impl FakeProvider {
        fn batch_sizes(&self) -> Vec<usize> {
            self.calls.lock().expect("fake provider poisoned").clone()
        }
    }

    #[async_trait]
    impl PushProvider for FakeProvider {
        async fn send_batch(
            &self,
            tokens: &[String],
            _payload: &PushPayload,
        ) -> Result<Vec<TokenOutcome>, PushError> {
            let index = {
                let mut calls = self.calls.lock().expect("fake provider poisoned");
                calls.push(tokens.len());
                calls.len() - 1
            };
            if self.wholesale_fail_batches.contains(&index) {
                return Err(PushError::Auth("token grant unavailable".into()));
            }
            Ok(tokens
                .iter()
                .map(|token| TokenOutcome {
                    token: token.clone(),
                    result: match self.token_failures.get(token) {
                        None => Ok(()),
                        Some(failure) => Err(failure.clone()),
                    },
                })
                .collect())
        }
    }

    fn request(title: &str, message: &str) -> BroadcastRequest {
        BroadcastRequest {
            title: title.to_string(),
            message: message.to_string(),
            recipient_type: RecipientType::All,
            recipient_uids: vec![],
            image_url: None,
            action_url: None,
            sent_by: "admin@ajira.app".into(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap()
    }

    fn store_with_users(count: usize) -> MemoryStore {
        let store = MemoryStore::new();
        let rows = (0..count)
            .map(|i| {
                json!({
                    "uid": format!("u{i}"),
                    "account_type": if i % 2 == 0 { "seeker" } else { "company" },
                    "push_token": format!("tok-{i}"),
                })
            })
            .collect();
        store.seed(Table::AllUsers, rows);
        store
    }

    #[tokio::test]
    async fn title_over_the_limit_is_rejected_before_any_io() {
        let store = Arc::new(store_with_users(3));
        let broadcaster = Broadcaster::new(store.clone(), Arc::new(FakeProvider::default()));
        let err = broadcaster
            .broadcast(&request(&"x".repeat(66), "hello"), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidTitle));
        assert_eq!(store.page_requests(), 0);
        assert!(store.rows(Table::NotificationHistory).is_empty());
    }

    #[tokio::test]
    async fn title_at_the_limit_is_accepted() {
        let store = Arc::new(store_with_users(3));
        let broadcaster = Broadcaster::new(store.clone(), Arc::new(FakeProvider::default()));
        let summary = broadcaster
            .broadcast(&request(&"x".repeat(65), "hello"), fixed_now())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 3);
    }

    #[tokio::test]
    async fn message_bounds_are_enforced() {
        let store = Arc::new(store_with_users(1));
        let broadcaster = Broadcaster::new(store.clone(), Arc::new(FakeProvider::default()));
        let err = broadcaster
            .broadcast(&request("hi", &"m".repeat(241)), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidMessage));

        let empty = broadcaster
            .broadcast(&request("hi", "   "), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(empty, BroadcastError::InvalidMessage));

        broadcaster
            .broadcast(&request("hi", &"m".repeat(240)), fixed_now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn five_hundred_one_tokens_make_exactly_two_batches() {
        let store = Arc::new(store_with_users(501));
        let provider = Arc::new(FakeProvider::default());
        let broadcaster = Broadcaster::new(store, provider.clone());
        let summary = broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap();
        assert_eq!(provider.batch_sizes(), vec![500, 1]);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.delivered, 501);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn only_permanent_failures_are_pruned() {
        let store = Arc::new(store_with_users(4));
        let provider = Arc::new(FakeProvider {
            token_failures: HashMap::from([
                ("tok-0".to_string(), SendFailure::NotRegistered),
                ("tok-1".to_string(), SendFailure::InvalidToken),
                ("tok-2".to_string(), SendFailure::Other("UNAVAILABLE".into())),
            ]),
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(store.clone(), provider);
        let summary = broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap();

        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.pruned_tokens, 2);

        let rows = store.rows(Table::AllUsers);
        assert!(rows[0]["push_token"].is_null());
        assert!(rows[1]["push_token"].is_null());
        assert_eq!(rows[2]["push_token"], json!("tok-2"));
        assert_eq!(rows[3]["push_token"], json!("tok-3"));
    }

    #[tokio::test]
    async fn wholesale_batch_failure_counts_the_slice_and_continues() {
        let store = Arc::new(store_with_users(501));
        let provider = Arc::new(FakeProvider {
            wholesale_fail_batches: vec![0],
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(store, provider.clone());
        let summary = broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap();
        assert_eq!(provider.batch_sizes(), vec![500, 1]);
        assert_eq!(summary.failed, 500);
        assert_eq!(summary.delivered, 1);
    }

    #[tokio::test]
    async fn empty_recipient_resolution_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Broadcaster::new(store, Arc::new(FakeProvider::default()));
        let err = broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::NoRecipients));
        assert_eq!(err.to_string(), "No recipients found");

        let specific = BroadcastRequest {
            recipient_type: RecipientType::Specific,
            ..request("hi", "hello")
        };
        let store = Arc::new(store_with_users(2));
        let broadcaster = Broadcaster::new(store, Arc::new(FakeProvider::default()));
        let err = broadcaster.broadcast(&specific, fixed_now()).await.unwrap_err();
        assert!(matches!(err, BroadcastError::NoRecipients));
    }

    #[tokio::test]
    async fn seeker_targeting_only_reaches_seeker_tokens() {
        let store = Arc::new(store_with_users(6));
        let provider = Arc::new(FakeProvider::default());
        let broadcaster = Broadcaster::new(store, provider.clone());
        let seekers = BroadcastRequest {
            recipient_type: RecipientType::Seekers,
            ..request("hi", "hello")
        };
        let summary = broadcaster.broadcast(&seekers, fixed_now()).await.unwrap();
        assert_eq!(summary.recipients, 3);
        assert_eq!(summary.delivered, 3);
    }

    #[tokio::test]
    async fn recipients_without_tokens_are_reported() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            Table::AllUsers,
            vec![json!({"uid": "u0", "account_type": "seeker", "push_token": null})],
        );
        let broadcaster = Broadcaster::new(store, Arc::new(FakeProvider::default()));
        let err = broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, BroadcastError::NoTokens));
    }

    #[tokio::test]
    async fn one_history_row_is_written_despite_failures() {
        let store = Arc::new(store_with_users(2));
        let provider = Arc::new(FakeProvider {
            token_failures: HashMap::from([(
                "tok-0".to_string(),
                SendFailure::Other("UNAVAILABLE".into()),
            )]),
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(store.clone(), provider);
        broadcaster
            .broadcast(&request("hi", "hello"), fixed_now())
            .await
            .unwrap();

        let history = store.rows(Table::NotificationHistory);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["delivery_count"], json!(1));
        assert_eq!(history[0]["recipient_type"], json!("all"));
        assert_eq!(
            history[0]["recipient_uids"],
            json!(["u0", "u1"])
        );
    }
}
