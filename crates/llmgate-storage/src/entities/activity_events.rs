use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "activity_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
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
    pub metadata: Option<Json>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
