//! Category models and DTOs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{from_minor_units, EntryKind};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: EntryKind,
    pub description: Option<String>,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCategoryRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub description: Option<String>,
}

/// Optional type filter for the category list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct CategoryListQuery {
    #[serde(rename = "type")]
    pub kind: Option<EntryKind>,
}

/// Raw usage row as aggregated in SQL (minor units).
#[derive(Debug, FromRow)]
pub struct CategoryUsageRow {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: EntryKind,
    pub transaction_count: i64,
    pub total_minor: i64,
}

/// Per-category usage stats. Unused categories appear with zero count/total.
#[derive(Debug, Serialize)]
pub struct CategoryUsage {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub transaction_count: i64,
    pub total_amount: Decimal,
}

impl From<CategoryUsageRow> for CategoryUsage {
    fn from(row: CategoryUsageRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            kind: row.kind,
            transaction_count: row.transaction_count,
            total_amount: from_minor_units(row.total_minor),
        }
    }
}
