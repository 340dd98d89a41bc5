//! Transaction models, filter DTOs, and aggregate shapes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{from_minor_units, EntryKind};
use crate::api::validation::deserialize_amount;

/// Transaction row joined with its (optional) category.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub title: String,
    pub amount_minor: i64,
    #[sqlx(rename = "type")]
    pub kind: EntryKind,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub description: Option<String>,
    pub transaction_date: String,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub id: i64,
    pub title: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub description: Option<String>,
    pub transaction_date: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TransactionRow> for TransactionResponse {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            amount: from_minor_units(row.amount_minor),
            kind: row.kind,
            category_id: row.category_id,
            category_name: row.category_name,
            description: row.description,
            transaction_date: row.transaction_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTransactionRequest {
    pub title: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to today (server local date) when omitted.
    #[serde(default)]
    pub transaction_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTransactionRequest {
    pub title: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    pub transaction_date: String,
}

/// Query parameters for the transaction list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct TransactionListQuery {
    #[serde(rename = "type")]
    pub kind: Option<EntryKind>,
    pub category_id: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub month: Option<u32>,
    pub year: Option<i32>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<EntryKind>,
    pub category_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReportQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StatisticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionResponse>,
    pub pagination: Pagination,
}

/// Dashboard balance: income and expense totals with exact zero defaults.
#[derive(Debug, Serialize, PartialEq)]
pub struct Balance {
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, FromRow)]
pub struct ReportRow {
    #[sqlx(rename = "type")]
    pub kind: EntryKind,
    pub category_name: Option<String>,
    pub transaction_count: i64,
    pub total_minor: i64,
}

#[derive(Debug, Serialize)]
pub struct ReportCategory {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub category_name: Option<String>,
    pub transaction_count: i64,
    pub total_amount: Decimal,
}

impl From<ReportRow> for ReportCategory {
    fn from(row: ReportRow) -> Self {
        Self {
            kind: row.kind,
            category_name: row.category_name,
            transaction_count: row.transaction_count,
            total_amount: from_minor_units(row.total_minor),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SummarySide {
    pub count: i64,
    pub total: Decimal,
}

impl Default for SummarySide {
    fn default() -> Self {
        Self {
            count: 0,
            total: Decimal::ZERO,
        }
    }
}

/// Monthly summary with zero defaults for absent types, never null.
#[derive(Debug, Serialize, PartialEq)]
pub struct MonthlySummary {
    pub income: SummarySide,
    pub expense: SummarySide,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct MonthlyReport {
    pub month: u32,
    pub year: i32,
    pub summary: MonthlySummary,
    pub categories: Vec<ReportCategory>,
}

#[derive(Debug, FromRow)]
pub struct StatisticsRow {
    #[sqlx(rename = "type")]
    pub kind: EntryKind,
    pub count: i64,
    pub total_minor: i64,
    pub min_minor: i64,
    pub max_minor: i64,
}

#[derive(Debug, Serialize)]
pub struct TypeStatistics {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub count: i64,
    pub total: Decimal,
    pub average: Decimal,
    pub min: Decimal,
    pub max: Decimal,
}

impl From<StatisticsRow> for TypeStatistics {
    fn from(row: StatisticsRow) -> Self {
        // Average over exact minor-unit totals, rounded to cents.
        let average = if row.count > 0 {
            (from_minor_units(row.total_minor) / Decimal::from(row.count)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        Self {
            kind: row.kind,
            count: row.count,
            total: from_minor_units(row.total_minor),
            average,
            min: from_minor_units(row.min_minor),
            max: from_minor_units(row.max_minor),
        }
    }
}
