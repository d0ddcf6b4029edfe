//! Credit ledger: balance checks, atomic debits, and credits. Concurrent
//! writers are serialized by a conditional update on the balance row,
//! retried on conflict.

use std::sync::Arc;

use llmgate_storage::{DeltaOutcome, NewCreditTransaction, Storage, StorageError, StorageResult};

const MAX_CONFLICT_RETRIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReserveOutcome {
    Ok { balance: f64 },
    InsufficientFunds { balance: f64 },
}

/// Accounting context recorded with every balance mutation.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub model: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub reason: String,
}

#[derive(Clone)]
pub struct CreditLedger {
    storage: Arc<dyn Storage>,
}

impl CreditLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Soft reservation: verify the balance covers the estimate. No state
    /// is written; the debit after completion is the authoritative charge.
    pub async fn reserve(&self, user_id: i64, estimated_cost: f64) -> StorageResult<ReserveOutcome> {
        let balance = self.storage.get_balance(user_id).await?.unwrap_or(0.0);
        if balance >= estimated_cost {
            Ok(ReserveOutcome::Ok { balance })
        } else {
            Ok(ReserveOutcome::InsufficientFunds { balance })
        }
    }

    /// Debit `amount` and append the transaction row atomically. The
    /// charge is clamped to the available balance so a successful debit
    /// never leaves it negative.
    pub async fn debit(&self, user_id: i64, amount: f64, entry: LedgerEntry) -> StorageResult<f64> {
        debug_assert!(amount >= 0.0);
        if amount <= 0.0 {
            return Ok(self.storage.get_balance(user_id).await?.unwrap_or(0.0));
        }
        self.apply(user_id, -amount, entry, true).await
    }

    /// Symmetric top-up, used by payment webhooks.
    pub async fn credit(&self, user_id: i64, amount: f64, entry: LedgerEntry) -> StorageResult<f64> {
        debug_assert!(amount >= 0.0);
        self.apply(user_id, amount, entry, false).await
    }

    async fn apply(
        &self,
        user_id: i64,
        delta: f64,
        entry: LedgerEntry,
        clamp_to_balance: bool,
    ) -> StorageResult<f64> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let balance = self.storage.get_balance(user_id).await?.unwrap_or(0.0);
            let mut delta = delta;
            if clamp_to_balance && balance + delta < 0.0 {
                tracing::warn!(user_id, balance, charge = -delta, "debit exceeds balance, clamping");
                delta = -balance;
            }
            let outcome = self
                .storage
                .apply_credit_delta(
                    balance,
                    NewCreditTransaction {
                        user_id,
                        delta_usd: delta,
                        model: entry.model.clone(),
                        prompt_tokens: entry.prompt_tokens,
                        completion_tokens: entry.completion_tokens,
                        reason: entry.reason.clone(),
                    },
                )
                .await?;
            match outcome {
                DeltaOutcome::Applied { balance_after } => return Ok(balance_after),
                DeltaOutcome::Conflict => continue,
            }
        }
        Err(StorageError::Conflict(
            "credit update conflicted repeatedly".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_common::{Tier, TrialState};
    use llmgate_storage::{MemoryStorage, UserRow};

    fn entry(reason: &str) -> LedgerEntry {
        LedgerEntry {
            model: Some("openai/gpt-4".into()),
            prompt_tokens: 500,
            completion_tokens: 500,
            reason: reason.into(),
        }
    }

    async fn user_with(balance: f64) -> (Arc<MemoryStorage>, i64) {
        let storage = Arc::new(MemoryStorage::new());
        let id = storage
            .insert_user(UserRow {
                id: 0,
                name: "u".into(),
                credits: balance,
                tier: Tier::Basic,
                trial: TrialState { active: true, expires_at: None, remaining_credits: 0.0 },
                enabled: true,
            })
            .await
            .unwrap();
        (storage, id)
    }

    #[tokio::test]
    async fn debit_moves_balance_and_appends_row() {
        let (storage, user_id) = user_with(10.0).await;
        let ledger = CreditLedger::new(storage.clone());

        let after = ledger.debit(user_id, 0.045, entry("chat")).await.unwrap();
        assert!((after - 9.955).abs() < 1e-9);

        let rows = storage.list_credit_transactions(user_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].delta_usd + 0.045).abs() < 1e-9);
    }

    #[tokio::test]
    async fn transactions_reconcile_with_balance() {
        let (storage, user_id) = user_with(10.0).await;
        let ledger = CreditLedger::new(storage.clone());

        ledger.debit(user_id, 1.5, entry("chat")).await.unwrap();
        ledger.credit(user_id, 5.0, entry("topup")).await.unwrap();
        ledger.debit(user_id, 0.25, entry("chat")).await.unwrap();

        let balance = storage.get_balance(user_id).await.unwrap().unwrap();
        let sum: f64 = storage
            .list_credit_transactions(user_id)
            .await
            .unwrap()
            .iter()
            .map(|row| row.delta_usd)
            .sum();
        assert!((10.0 + sum - balance).abs() < 1e-9);
    }

    #[tokio::test]
    async fn debit_never_goes_negative() {
        let (storage, user_id) = user_with(0.01).await;
        let ledger = CreditLedger::new(storage.clone());
        let after = ledger.debit(user_id, 5.0, entry("chat")).await.unwrap();
        assert_eq!(after, 0.0);
    }

    #[tokio::test]
    async fn reserve_checks_balance() {
        let (storage, user_id) = user_with(1.0).await;
        let ledger = CreditLedger::new(storage);
        assert!(matches!(
            ledger.reserve(user_id, 0.5).await.unwrap(),
            ReserveOutcome::Ok { .. }
        ));
        assert!(matches!(
            ledger.reserve(user_id, 1.5).await.unwrap(),
            ReserveOutcome::InsufficientFunds { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_debits_serialize() {
        let (storage, user_id) = user_with(100.0).await;
        let ledger = CreditLedger::new(storage.clone());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(user_id, 1.0, entry("chat")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let balance = storage.get_balance(user_id).await.unwrap().unwrap();
        assert!((balance - 90.0).abs() < 1e-9);
        assert_eq!(storage.list_credit_transactions(user_id).await.unwrap().len(), 10);
    }
}
