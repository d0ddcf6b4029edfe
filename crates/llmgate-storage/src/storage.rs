//! The persistence contract the core consumes: user/key auth lookups,
//! the credit ledger's conditional balance update, and the activity sink.

use async_trait::async_trait;
use time::OffsetDateTime;

use llmgate_common::{Tier, TrialState};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub credits: f64,
    pub tier: Tier,
    pub trial: TrialState,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct UserKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub enabled: bool,
}

/// A user plus the key that authenticated the request.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub user: UserRow,
    pub key: UserKeyRow,
}

#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: i64,
    pub delta_usd: f64,
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CreditTransactionRow {
    pub user_id: i64,
    pub at: OffsetDateTime,
    pub delta_usd: f64,
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    pub user_id: i64,
    pub at: OffsetDateTime,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub finish_reason: Option<String>,
    pub endpoint: String,
    pub session_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of one conditional balance update attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaOutcome {
    Applied { balance_after: f64 },
    /// Another writer moved the balance first; re-read and retry.
    Conflict,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync, run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    // Auth
    async fn find_auth_by_key_hash(&self, key_hash: &str) -> StorageResult<Option<AuthRecord>>;
    async fn touch_user_key(&self, key_id: i64, at: OffsetDateTime) -> StorageResult<()>;

    // Credit ledger
    async fn get_balance(&self, user_id: i64) -> StorageResult<Option<f64>>;
    /// Atomically move the balance from `expected_balance` to
    /// `expected_balance + tx.delta_usd` and append the transaction row.
    /// Fails with [`DeltaOutcome::Conflict`] when the balance no longer
    /// matches, leaving nothing written.
    async fn apply_credit_delta(
        &self,
        expected_balance: f64,
        tx: NewCreditTransaction,
    ) -> StorageResult<DeltaOutcome>;
    async fn list_credit_transactions(
        &self,
        user_id: i64,
    ) -> StorageResult<Vec<CreditTransactionRow>>;

    // Activity sink
    async fn insert_activity_events(&self, events: Vec<NewActivityEvent>) -> StorageResult<()>;

    // Admin surface (consumed by provisioning, exercised by tests)
    async fn insert_user(&self, user: UserRow) -> StorageResult<i64>;
    async fn insert_user_key(
        &self,
        user_id: i64,
        key_hash: &str,
        label: Option<&str>,
    ) -> StorageResult<i64>;
}
