//! In-memory [`Storage`] used by tests and ephemeral deployments. Shares
//! the conditional-update semantics of the SeaORM backend so ledger
//! behavior can be exercised without a database.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::storage::{
    AuthRecord, CreditTransactionRow, DeltaOutcome, NewActivityEvent, NewCreditTransaction,
    Storage, StorageResult, UserKeyRow, UserRow,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, UserRow>,
    keys: HashMap<i64, (i64, String, Option<OffsetDateTime>)>,
    transactions: Vec<CreditTransactionRow>,
    activity: Vec<NewActivityEvent>,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    next_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn activity_events(&self) -> Vec<NewActivityEvent> {
        self.state.lock().expect("memory storage poisoned").activity.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn find_auth_by_key_hash(&self, key_hash: &str) -> StorageResult<Option<AuthRecord>> {
        let state = self.state.lock().expect("memory storage poisoned");
        for (key_id, (user_id, hash, _)) in &state.keys {
            if hash == key_hash {
                let Some(user) = state.users.get(user_id) else {
                    return Ok(None);
                };
                if !user.enabled {
                    return Ok(None);
                }
                return Ok(Some(AuthRecord {
                    user: user.clone(),
                    key: UserKeyRow {
                        id: *key_id,
                        user_id: *user_id,
                        enabled: true,
                    },
                }));
            }
        }
        Ok(None)
    }

    async fn touch_user_key(&self, key_id: i64, at: OffsetDateTime) -> StorageResult<()> {
        let mut state = self.state.lock().expect("memory storage poisoned");
        if let Some(entry) = state.keys.get_mut(&key_id) {
            entry.2 = Some(at);
        }
        Ok(())
    }

    async fn get_balance(&self, user_id: i64) -> StorageResult<Option<f64>> {
        let state = self.state.lock().expect("memory storage poisoned");
        Ok(state.users.get(&user_id).map(|user| user.credits))
    }

    async fn apply_credit_delta(
        &self,
        expected_balance: f64,
        tx: NewCreditTransaction,
    ) -> StorageResult<DeltaOutcome> {
        let mut state = self.state.lock().expect("memory storage poisoned");
        let Some(user) = state.users.get_mut(&tx.user_id) else {
            return Ok(DeltaOutcome::Conflict);
        };
        if user.credits != expected_balance {
            return Ok(DeltaOutcome::Conflict);
        }
        let balance_after = expected_balance + tx.delta_usd;
        user.credits = balance_after;
        state.transactions.push(CreditTransactionRow {
            user_id: tx.user_id,
            at: OffsetDateTime::now_utc(),
            delta_usd: tx.delta_usd,
            model: tx.model,
            prompt_tokens: tx.prompt_tokens,
            completion_tokens: tx.completion_tokens,
            reason: tx.reason,
        });
        Ok(DeltaOutcome::Applied { balance_after })
    }

    async fn list_credit_transactions(
        &self,
        user_id: i64,
    ) -> StorageResult<Vec<CreditTransactionRow>> {
        let state = self.state.lock().expect("memory storage poisoned");
        Ok(state
            .transactions
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_activity_events(&self, events: Vec<NewActivityEvent>) -> StorageResult<()> {
        let mut state = self.state.lock().expect("memory storage poisoned");
        state.activity.extend(events);
        Ok(())
    }

    async fn insert_user(&self, mut user: UserRow) -> StorageResult<i64> {
        let id = self.alloc_id();
        user.id = id;
        let mut state = self.state.lock().expect("memory storage poisoned");
        state.users.insert(id, user);
        Ok(id)
    }

    async fn insert_user_key(
        &self,
        user_id: i64,
        key_hash: &str,
        _label: Option<&str>,
    ) -> StorageResult<i64> {
        let id = self.alloc_id();
        let mut state = self.state.lock().expect("memory storage poisoned");
        state.keys.insert(id, (user_id, key_hash.to_string(), None));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_common::{Tier, TrialState};

    fn user(credits: f64) -> UserRow {
        UserRow {
            id: 0,
            name: "u".into(),
            credits,
            tier: Tier::Basic,
            trial: TrialState { active: true, expires_at: None, remaining_credits: 1.0 },
            enabled: true,
        }
    }

    #[tokio::test]
    async fn conditional_delta_detects_conflicts() {
        let storage = MemoryStorage::new();
        let user_id = storage.insert_user(user(10.0)).await.unwrap();

        let tx = NewCreditTransaction {
            user_id,
            delta_usd: -1.0,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            reason: "chat".into(),
        };
        let outcome = storage.apply_credit_delta(10.0, tx.clone()).await.unwrap();
        assert_eq!(outcome, DeltaOutcome::Applied { balance_after: 9.0 });

        // Stale expected balance no longer matches.
        let outcome = storage.apply_credit_delta(10.0, tx).await.unwrap();
        assert_eq!(outcome, DeltaOutcome::Conflict);
        assert_eq!(storage.get_balance(user_id).await.unwrap(), Some(9.0));
    }
}
