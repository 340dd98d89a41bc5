//! Resource ownership checks.
//!
//! Every per-user resource goes through one resolver keyed by resource kind,
//! so ownership enforcement lives in a single place instead of being
//! re-implemented query-by-query. A missing resource and another user's
//! resource both come back as 404, so responses never reveal whether an id
//! exists.

use super::error::ApiError;
use crate::db::DbPool;

/// Kinds of user-owned resources subject to ownership checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Category,
    Transaction,
}

impl ResourceKind {
    fn table(&self) -> &'static str {
        match self {
            ResourceKind::Category => "categories",
            ResourceKind::Transaction => "transactions",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResourceKind::Category => "Category",
            ResourceKind::Transaction => "Transaction",
        }
    }
}

/// Verify that `id` exists and belongs to `user_id`.
pub async fn authorize_ownership(
    pool: &DbPool,
    kind: ResourceKind,
    id: i64,
    user_id: i64,
) -> Result<(), ApiError> {
    // Table names come from the enum above, never from input
    let sql = format!("SELECT user_id FROM {} WHERE id = ?", kind.table());
    let owner: Option<(i64,)> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

    match owner {
        Some((owner_id,)) if owner_id == user_id => Ok(()),
        _ => Err(ApiError::not_found(format!("{} not found", kind.label()))),
    }
}
