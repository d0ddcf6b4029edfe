use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Schema, TransactionTrait,
};
use time::OffsetDateTime;

use llmgate_common::{Tier, TrialState};

use crate::entities;
use crate::entities::user_keys::Column as UserKeyColumn;
use crate::entities::users::Column as UserColumn;
use crate::storage::{
    AuthRecord, CreditTransactionRow, DeltaOutcome, NewActivityEvent, NewCreditTransaction,
    Storage, StorageResult, UserKeyRow, UserRow,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Sqlite needs foreign keys switched on for cascades to hold.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn user_row(model: entities::users::Model) -> UserRow {
    UserRow {
        id: model.id,
        name: model.name,
        credits: model.credits,
        tier: Tier::parse(&model.tier).unwrap_or(Tier::Basic),
        trial: TrialState {
            active: model.trial_active,
            expires_at: model.trial_expires_at,
            remaining_credits: model.trial_remaining_credits,
        },
        enabled: model.enabled,
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Users)
            .register(entities::UserKeys)
            .register(entities::CreditTransactions)
            .register(entities::ActivityEvents)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn find_auth_by_key_hash(&self, key_hash: &str) -> StorageResult<Option<AuthRecord>> {
        let Some(key) = entities::UserKeys::find()
            .filter(UserKeyColumn::KeyHash.eq(key_hash))
            .filter(UserKeyColumn::Enabled.eq(true))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(user) = entities::Users::find_by_id(key.user_id).one(&self.db).await? else {
            return Ok(None);
        };
        if !user.enabled {
            return Ok(None);
        }
        Ok(Some(AuthRecord {
            user: user_row(user),
            key: UserKeyRow {
                id: key.id,
                user_id: key.user_id,
                enabled: key.enabled,
            },
        }))
    }

    async fn touch_user_key(&self, key_id: i64, at: OffsetDateTime) -> StorageResult<()> {
        entities::UserKeys::update_many()
            .col_expr(UserKeyColumn::LastUsedAt, Expr::value(Some(at)))
            .filter(UserKeyColumn::Id.eq(key_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn get_balance(&self, user_id: i64) -> StorageResult<Option<f64>> {
        Ok(entities::Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .map(|user| user.credits))
    }

    async fn apply_credit_delta(
        &self,
        expected_balance: f64,
        tx: NewCreditTransaction,
    ) -> StorageResult<DeltaOutcome> {
        let balance_after = expected_balance + tx.delta_usd;
        let txn = self.db.begin().await?;

        let updated = entities::Users::update_many()
            .col_expr(UserColumn::Credits, Expr::value(balance_after))
            .col_expr(UserColumn::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(UserColumn::Id.eq(tx.user_id))
            .filter(UserColumn::Credits.eq(expected_balance))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(DeltaOutcome::Conflict);
        }

        let row = entities::credit_transactions::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(tx.user_id),
            at: ActiveValue::Set(OffsetDateTime::now_utc()),
            delta_usd: ActiveValue::Set(tx.delta_usd),
            model: ActiveValue::Set(tx.model),
            prompt_tokens: ActiveValue::Set(tx.prompt_tokens),
            completion_tokens: ActiveValue::Set(tx.completion_tokens),
            reason: ActiveValue::Set(tx.reason),
            ..Default::default()
        };
        entities::CreditTransactions::insert(row).exec(&txn).await?;
        txn.commit().await?;
        Ok(DeltaOutcome::Applied { balance_after })
    }

    async fn list_credit_transactions(
        &self,
        user_id: i64,
    ) -> StorageResult<Vec<CreditTransactionRow>> {
        let rows = entities::CreditTransactions::find()
            .filter(entities::credit_transactions::Column::UserId.eq(user_id))
            .order_by_asc(entities::credit_transactions::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| CreditTransactionRow {
                user_id: row.user_id,
                at: row.at,
                delta_usd: row.delta_usd,
                model: row.model,
                prompt_tokens: row.prompt_tokens,
                completion_tokens: row.completion_tokens,
                reason: row.reason,
            })
            .collect())
    }

    async fn insert_activity_events(&self, events: Vec<NewActivityEvent>) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let models = events.into_iter().map(|event| entities::activity_events::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(event.user_id),
            at: ActiveValue::Set(event.at),
            model: ActiveValue::Set(event.model),
            provider: ActiveValue::Set(event.provider),
            prompt_tokens: ActiveValue::Set(event.prompt_tokens),
            completion_tokens: ActiveValue::Set(event.completion_tokens),
            total_tokens: ActiveValue::Set(event.total_tokens),
            cost_usd: ActiveValue::Set(event.cost_usd),
            latency_ms: ActiveValue::Set(event.latency_ms),
            finish_reason: ActiveValue::Set(event.finish_reason),
            endpoint: ActiveValue::Set(event.endpoint),
            session_id: ActiveValue::Set(event.session_id),
            metadata: ActiveValue::Set(event.metadata),
            created_at: ActiveValue::Set(now),
        });
        entities::ActivityEvents::insert_many(models).exec(&self.db).await?;
        Ok(())
    }

    async fn insert_user(&self, user: UserRow) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let row = entities::users::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(user.name),
            credits: ActiveValue::Set(user.credits),
            tier: ActiveValue::Set(user.tier.as_str().to_string()),
            trial_active: ActiveValue::Set(user.trial.active),
            trial_expires_at: ActiveValue::Set(user.trial.expires_at),
            trial_remaining_credits: ActiveValue::Set(user.trial.remaining_credits),
            enabled: ActiveValue::Set(user.enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let inserted = entities::Users::insert(row).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn insert_user_key(
        &self,
        user_id: i64,
        key_hash: &str,
        label: Option<&str>,
    ) -> StorageResult<i64> {
        let row = entities::user_keys::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            key_hash: ActiveValue::Set(key_hash.to_string()),
            label: ActiveValue::Set(label.map(str::to_string)),
            enabled: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            last_used_at: ActiveValue::Set(None),
            ..Default::default()
        };
        let inserted = entities::UserKeys::insert(row).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }
}
