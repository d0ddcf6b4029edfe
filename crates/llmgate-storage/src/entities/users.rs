use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "user_name")]
    pub name: String,
    /// Balance in USD. Mutated only through conditional updates.
    pub credits: f64,
    pub tier: String,
    pub trial_active: bool,
    pub trial_expires_at: Option<OffsetDateTime>,
    pub trial_remaining_credits: f64,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub keys: HasMany<super::user_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
