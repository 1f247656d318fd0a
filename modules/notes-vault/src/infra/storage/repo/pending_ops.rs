//! Outbound sync queue writes and reads.

use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde_json::Value as Json;
use vault_security::UserId;

use crate::infra::storage::entity::{self, Entity as PendingOpEntity};

/// Append one operation for the sync transport.
///
/// # Errors
/// Returns the driver error unchanged.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    owner: &UserId,
    entity_id: &str,
    kind: &str,
    payload: Option<&Json>,
    now_millis: i64,
) -> Result<entity::Model, DbErr> {
    entity::ActiveModel {
        id: ActiveValue::NotSet,
        entity_id: ActiveValue::Set(entity_id.to_owned()),
        kind: ActiveValue::Set(kind.to_owned()),
        payload: ActiveValue::Set(payload.map(Json::to_string)),
        created_at: ActiveValue::Set(now_millis),
        owner_user_id: ActiveValue::Set(owner.as_str().to_owned()),
    }
    .insert(conn)
    .await
}

/// Queued operations of one owner, oldest first.
///
/// # Errors
/// Returns the driver error unchanged.
pub async fn list_for<C: ConnectionTrait>(conn: &C, owner: &UserId) -> Result<Vec<entity::Model>, DbErr> {
    PendingOpEntity::find()
        .filter(entity::Column::OwnerUserId.eq(owner.as_str()))
        .order_by_asc(entity::Column::Id)
        .all(conn)
        .await
}

/// Queued operations that refer to `entity_id`, oldest first.
///
/// # Errors
/// Returns the driver error unchanged.
pub async fn list_for_entity<C: ConnectionTrait>(
    conn: &C,
    entity_id: &str,
) -> Result<Vec<entity::Model>, DbErr> {
    PendingOpEntity::find()
        .filter(entity::Column::EntityId.eq(entity_id))
        .order_by_asc(entity::Column::Id)
        .all(conn)
        .await
}
