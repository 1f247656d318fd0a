use sea_orm::entity::prelude::*;

/// Outbound sync queue. Rows are consumed by the sync transport, which lives
/// outside this crate.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pending_ops")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub entity_id: String,
    pub kind: String,
    pub payload: Option<String>,
    pub created_at: i64,
    pub owner_user_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
