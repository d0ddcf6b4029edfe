//! Bearer-key authentication. Keys are stored hashed; the plaintext only
//! exists in the request.

use time::OffsetDateTime;

use llmgate_common::{Tier, TrialState};
use llmgate_storage::Storage;

use crate::error::GatewayError;

/// Authenticated caller context, borrowed read-only for the duration of a
/// request.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: i64,
    pub key_id: i64,
    pub name: String,
    pub credits: f64,
    pub tier: Tier,
    pub trial: TrialState,
}

pub fn hash_api_key(api_key: &str) -> String {
    blake3::hash(api_key.trim().as_bytes()).to_hex().to_string()
}

pub async fn authenticate(
    storage: &dyn Storage,
    bearer_token: &str,
) -> Result<AuthedUser, GatewayError> {
    let token = bearer_token.trim();
    if token.is_empty() {
        return Err(GatewayError::Auth("missing API key".to_string()));
    }
    let record = storage
        .find_auth_by_key_hash(&hash_api_key(token))
        .await?
        .ok_or_else(|| GatewayError::Auth("invalid API key".to_string()))?;

    // Best-effort bookkeeping; an error here must not fail the request.
    if let Err(err) = storage
        .touch_user_key(record.key.id, OffsetDateTime::now_utc())
        .await
    {
        tracing::warn!(error = %err, "failed to touch key last_used_at");
    }

    Ok(AuthedUser {
        user_id: record.user.id,
        key_id: record.key.id,
        name: record.user.name,
        credits: record.user.credits,
        tier: record.user.tier,
        trial: record.user.trial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_storage::{MemoryStorage, UserRow};

    #[tokio::test]
    async fn authenticates_by_hashed_key() {
        let storage = MemoryStorage::new();
        let user_id = storage
            .insert_user(UserRow {
                id: 0,
                name: "dev".into(),
                credits: 3.0,
                tier: Tier::Pro,
                trial: TrialState { active: true, expires_at: None, remaining_credits: 1.0 },
                enabled: true,
            })
            .await
            .unwrap();
        storage
            .insert_user_key(user_id, &hash_api_key("sk-test-123"), None)
            .await
            .unwrap();

        let auth = authenticate(&storage, "sk-test-123").await.unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.tier, Tier::Pro);

        let err = authenticate(&storage, "sk-wrong").await.unwrap_err();
        assert_eq!(err.status_code(), 401);
        let err = authenticate(&storage, "  ").await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
