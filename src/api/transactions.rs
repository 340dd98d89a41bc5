//! Transaction endpoints: CRUD, filtered listing, search, and the
//! balance/report/statistics aggregates.
//!
//! Amounts are stored as integer minor units so every SQL aggregate stays
//! exact; conversion to and from `Decimal` happens at the model boundary.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, Local};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::ownership::{authorize_ownership, ResourceKind};
use super::rate_limit::{ClientKey, RateLimitTier};
use super::validation;
use super::ApiResponse;
use crate::db::models::{
    from_minor_units, to_minor_units, Balance, CreateTransactionRequest, EntryKind,
    MonthlyReport, MonthlySummary, Pagination, RecentQuery, ReportCategory, ReportQuery,
    ReportRow, SearchQuery, StatisticsQuery, StatisticsRow, SummarySide, TransactionListQuery,
    TransactionListResponse, TransactionResponse, TransactionRow, TypeStatistics,
    UpdateTransactionRequest,
};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;
const SEARCH_RESULT_CAP: i64 = 50;

const SELECT_JOINED: &str = r#"
    SELECT t.id, t.title, t.amount_minor, t.type,
           t.category_id, c.name AS category_name,
           t.description, t.transaction_date, t.user_id,
           t.created_at, t.updated_at
    FROM transactions t
    LEFT JOIN categories c ON c.id = t.category_id
"#;

fn validate_entry_fields(
    title: &str,
    amount: Decimal,
    description: &Option<String>,
) -> Result<i64, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(msg) = validation::validate_title(title) {
        errors.add("title", msg);
    }
    if let Err(msg) = validation::validate_amount(amount) {
        errors.add("amount", msg);
    }
    if let Err(msg) = validation::validate_description(description) {
        errors.add("description", msg);
    }
    errors.finish()?;

    to_minor_units(amount)
        .ok_or_else(|| ApiError::validation_field("amount", "Amount has too many decimal places"))
}

/// Check the referenced category exists, belongs to the user, and carries the
/// same entry type as the transaction. A category reference is request data,
/// not the addressed resource, so a bad one is a 400. Nonexistent and
/// foreign-owned ids get the same message, so ids still cannot be probed.
async fn check_category(
    state: &AppState,
    user_id: i64,
    category_id: i64,
    kind: EntryKind,
) -> Result<(), ApiError> {
    let category: Option<(i64, EntryKind)> =
        sqlx::query_as("SELECT user_id, type FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&state.db)
            .await?;

    let category_kind = match category {
        Some((owner_id, category_kind)) if owner_id == user_id => category_kind,
        _ => return Err(ApiError::validation_field("category_id", "Unknown category")),
    };

    if category_kind != kind {
        return Err(ApiError::bad_request(format!(
            "Category type '{}' does not match transaction type '{}'",
            category_kind, kind
        )));
    }
    Ok(())
}

async fn fetch_transaction(state: &AppState, id: i64) -> Result<TransactionRow, ApiError> {
    let sql = format!("{} WHERE t.id = ?", SELECT_JOINED);
    let row: TransactionRow = sqlx::query_as(&sql).bind(id).fetch_one(&state.db).await?;
    Ok(row)
}

/// POST /api/transactions
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TransactionResponse>>), ApiError> {
    // Per-user write throttle, independent of the per-IP limits
    if let Err(retry_after) = state
        .rate_limiter
        .check_rate_limit(ClientKey::User(auth.id), RateLimitTier::TransactionWrite)
    {
        return Err(ApiError::rate_limited(format!(
            "Too many transactions created, please try again in {} seconds",
            retry_after
        )));
    }

    let amount_minor = validate_entry_fields(&req.title, req.amount, &req.description)?;

    let transaction_date = match &req.transaction_date {
        Some(raw) => {
            validation::validate_transaction_date(raw)
                .map_err(|msg| ApiError::validation_field("transaction_date", msg))?;
            raw.clone()
        }
        None => Local::now()
            .date_naive()
            .format(validation::DATE_FORMAT)
            .to_string(),
    };

    if let Some(category_id) = req.category_id {
        check_category(&state, auth.id, category_id, req.kind).await?;
    }

    let inserted: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO transactions (user_id, title, amount_minor, type, category_id, description, transaction_date)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(auth.id)
    .bind(req.title.trim())
    .bind(amount_minor)
    .bind(req.kind)
    .bind(req.category_id)
    .bind(&req.description)
    .bind(&transaction_date)
    .fetch_one(&state.db)
    .await?;

    let row = fetch_transaction(&state, inserted.0).await?;

    tracing::info!(user_id = auth.id, transaction_id = row.id, "Transaction created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_data("Transaction created", row.into())),
    ))
}

/// GET /api/transactions/:id
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Transaction, id, auth.id).await?;
    let row = fetch_transaction(&state, id).await?;
    Ok(Json(ApiResponse::with_data("Transaction retrieved", row.into())))
}

/// PUT /api/transactions/:id
pub async fn update_transaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTransactionRequest>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Transaction, id, auth.id).await?;

    let amount_minor = validate_entry_fields(&req.title, req.amount, &req.description)?;
    validation::validate_transaction_date(&req.transaction_date)
        .map_err(|msg| ApiError::validation_field("transaction_date", msg))?;

    if let Some(category_id) = req.category_id {
        check_category(&state, auth.id, category_id, req.kind).await?;
    }

    sqlx::query(
        r#"
        UPDATE transactions
        SET title = ?, amount_minor = ?, type = ?, category_id = ?,
            description = ?, transaction_date = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(req.title.trim())
    .bind(amount_minor)
    .bind(req.kind)
    .bind(req.category_id)
    .bind(&req.description)
    .bind(&req.transaction_date)
    .bind(id)
    .execute(&state.db)
    .await?;

    let row = fetch_transaction(&state, id).await?;
    Ok(Json(ApiResponse::with_data("Transaction updated", row.into())))
}

/// DELETE /api/transactions/:id
pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TransactionResponse>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Transaction, id, auth.id).await?;

    let row = fetch_transaction(&state, id).await?;

    sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = auth.id, transaction_id = id, "Transaction deleted");

    Ok(Json(ApiResponse::with_data("Transaction deleted", row.into())))
}

/// Build the WHERE clause and bindings shared by the list count and page
/// queries. Numeric values are bound as strings; SQLite's type affinity
/// converts them for comparison against INTEGER columns.
fn build_list_filters(
    user_id: i64,
    query: &TransactionListQuery,
) -> Result<(String, Vec<String>), ApiError> {
    let mut conditions = vec!["t.user_id = ?".to_string()];
    let mut bindings = vec![user_id.to_string()];

    if let Some(kind) = query.kind {
        conditions.push("t.type = ?".to_string());
        bindings.push(kind.to_string());
    }
    if let Some(category_id) = query.category_id {
        conditions.push("t.category_id = ?".to_string());
        bindings.push(category_id.to_string());
    }
    if let Some(start) = &query.start_date {
        validation::parse_date(start)
            .map_err(|msg| ApiError::validation_field("start_date", msg))?;
        conditions.push("t.transaction_date >= ?".to_string());
        bindings.push(start.clone());
    }
    if let Some(end) = &query.end_date {
        validation::parse_date(end).map_err(|msg| ApiError::validation_field("end_date", msg))?;
        conditions.push("t.transaction_date <= ?".to_string());
        bindings.push(end.clone());
    }
    if let Some(month) = query.month {
        validation::validate_month(month)
            .map_err(|msg| ApiError::validation_field("month", msg))?;
        conditions.push("CAST(strftime('%m', t.transaction_date) AS INTEGER) = ?".to_string());
        bindings.push(month.to_string());
    }
    if let Some(year) = query.year {
        validation::validate_year(year).map_err(|msg| ApiError::validation_field("year", msg))?;
        conditions.push("CAST(strftime('%Y', t.transaction_date) AS INTEGER) = ?".to_string());
        bindings.push(year.to_string());
    }

    Ok((conditions.join(" AND "), bindings))
}

/// GET /api/transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<ApiResponse<TransactionListResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let (where_clause, bindings) = build_list_filters(auth.id, &query)?;

    let count_sql = format!(
        "SELECT COUNT(*) FROM transactions t WHERE {}",
        where_clause
    );
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let (total,) = count_query.fetch_one(&state.db).await?;

    let page_sql = format!(
        "{} WHERE {} ORDER BY t.transaction_date DESC, t.created_at DESC, t.id DESC LIMIT ? OFFSET ?",
        SELECT_JOINED, where_clause
    );
    let mut page_query = sqlx::query_as::<_, TransactionRow>(&page_sql);
    for binding in &bindings {
        page_query = page_query.bind(binding);
    }
    let rows = page_query
        .bind(limit)
        .bind(offset)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiResponse::with_data(
        "Transactions retrieved",
        TransactionListResponse {
            transactions: rows.into_iter().map(TransactionResponse::from).collect(),
            pagination: Pagination {
                total,
                limit,
                offset,
            },
        },
    )))
}

/// GET /api/transactions/search
pub async fn search_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    let raw = query.q.as_deref().unwrap_or("");
    let term = validation::validate_search_term(raw)
        .map_err(|msg| ApiError::validation_field("q", msg))?;
    let pattern = format!("%{}%", validation::escape_like(term));

    let limit = query.limit.unwrap_or(SEARCH_RESULT_CAP).clamp(1, SEARCH_RESULT_CAP);

    let mut conditions = vec![
        "t.user_id = ?".to_string(),
        "(t.title LIKE ? ESCAPE '\\' OR t.description LIKE ? ESCAPE '\\' OR c.name LIKE ? ESCAPE '\\')"
            .to_string(),
    ];
    let mut bindings = vec![
        auth.id.to_string(),
        pattern.clone(),
        pattern.clone(),
        pattern,
    ];

    if let Some(kind) = query.kind {
        conditions.push("t.type = ?".to_string());
        bindings.push(kind.to_string());
    }
    if let Some(category_id) = query.category_id {
        conditions.push("t.category_id = ?".to_string());
        bindings.push(category_id.to_string());
    }

    let sql = format!(
        "{} WHERE {} ORDER BY t.transaction_date DESC, t.created_at DESC, t.id DESC LIMIT ?",
        SELECT_JOINED,
        conditions.join(" AND ")
    );
    let mut search_query = sqlx::query_as::<_, TransactionRow>(&sql);
    for binding in &bindings {
        search_query = search_query.bind(binding);
    }
    let rows = search_query.bind(limit).fetch_all(&state.db).await?;

    Ok(Json(ApiResponse::with_data(
        "Search results retrieved",
        rows.into_iter().map(TransactionResponse::from).collect::<Vec<_>>(),
    )))
}

/// GET /api/transactions/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<Balance>>, ApiError> {
    let (income_minor, expense_minor): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE WHEN type = 'income' THEN amount_minor ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN type = 'expense' THEN amount_minor ELSE 0 END), 0)
        FROM transactions
        WHERE user_id = ?
        "#,
    )
    .bind(auth.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ApiResponse::with_data(
        "Balance retrieved",
        Balance {
            total_income: from_minor_units(income_minor),
            total_expense: from_minor_units(expense_minor),
            balance: from_minor_units(income_minor - expense_minor),
        },
    )))
}

/// GET /api/transactions/recent
pub async fn recent_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<RecentQuery>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    let limit = query.limit.unwrap_or(10).clamp(1, MAX_PAGE_SIZE);

    let sql = format!(
        "{} WHERE t.user_id = ? ORDER BY t.created_at DESC, t.id DESC LIMIT ?",
        SELECT_JOINED
    );
    let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
        .bind(auth.id)
        .bind(limit)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiResponse::with_data(
        "Recent transactions retrieved",
        rows.into_iter().map(TransactionResponse::from).collect::<Vec<_>>(),
    )))
}

/// GET /api/transactions/report
///
/// Monthly breakdown by type and category. Month and year default to the
/// current month; months with no activity come back with zero totals.
pub async fn monthly_report(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ApiResponse<MonthlyReport>>, ApiError> {
    let today = Local::now().date_naive();
    let month = query.month.unwrap_or(today.month());
    let year = query.year.unwrap_or(today.year());
    validation::validate_month(month).map_err(|msg| ApiError::validation_field("month", msg))?;
    validation::validate_year(year).map_err(|msg| ApiError::validation_field("year", msg))?;

    let rows: Vec<ReportRow> = sqlx::query_as(
        r#"
        SELECT t.type, c.name AS category_name,
               COUNT(*) AS transaction_count,
               SUM(t.amount_minor) AS total_minor
        FROM transactions t
        LEFT JOIN categories c ON c.id = t.category_id
        WHERE t.user_id = ?
          AND CAST(strftime('%m', t.transaction_date) AS INTEGER) = ?
          AND CAST(strftime('%Y', t.transaction_date) AS INTEGER) = ?
        GROUP BY t.type, c.name
        ORDER BY t.type, total_minor DESC
        "#,
    )
    .bind(auth.id)
    .bind(month)
    .bind(year)
    .fetch_all(&state.db)
    .await?;

    let mut income = (0i64, 0i64);
    let mut expense = (0i64, 0i64);
    for row in &rows {
        let side = match row.kind {
            EntryKind::Income => &mut income,
            EntryKind::Expense => &mut expense,
        };
        side.0 += row.transaction_count;
        side.1 += row.total_minor;
    }

    let summary = MonthlySummary {
        income: SummarySide {
            count: income.0,
            total: from_minor_units(income.1),
        },
        expense: SummarySide {
            count: expense.0,
            total: from_minor_units(expense.1),
        },
        balance: from_minor_units(income.1 - expense.1),
    };

    Ok(Json(ApiResponse::with_data(
        "Monthly report retrieved",
        MonthlyReport {
            month,
            year,
            summary,
            categories: rows.into_iter().map(ReportCategory::from).collect(),
        },
    )))
}

/// GET /api/transactions/statistics
pub async fn transaction_statistics(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<ApiResponse<Vec<TypeStatistics>>>, ApiError> {
    let mut conditions = vec!["user_id = ?".to_string()];
    let mut bindings = vec![auth.id.to_string()];

    if let Some(start) = &query.start_date {
        validation::parse_date(start)
            .map_err(|msg| ApiError::validation_field("start_date", msg))?;
        conditions.push("transaction_date >= ?".to_string());
        bindings.push(start.clone());
    }
    if let Some(end) = &query.end_date {
        validation::parse_date(end).map_err(|msg| ApiError::validation_field("end_date", msg))?;
        conditions.push("transaction_date <= ?".to_string());
        bindings.push(end.clone());
    }

    let sql = format!(
        r#"
        SELECT type, COUNT(*) AS count,
               SUM(amount_minor) AS total_minor,
               MIN(amount_minor) AS min_minor,
               MAX(amount_minor) AS max_minor
        FROM transactions
        WHERE {}
        GROUP BY type
        ORDER BY type
        "#,
        conditions.join(" AND ")
    );
    let mut stats_query = sqlx::query_as::<_, StatisticsRow>(&sql);
    for binding in &bindings {
        stats_query = stats_query.bind(binding);
    }
    let rows = stats_query.fetch_all(&state.db).await?;

    Ok(Json(ApiResponse::with_data(
        "Statistics retrieved",
        rows.into_iter().map(TypeStatistics::from).collect::<Vec<_>>(),
    )))
}

/// GET /api/transactions/daily/:date
pub async fn daily_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(date): Path<String>,
) -> Result<Json<ApiResponse<Vec<TransactionResponse>>>, ApiError> {
    validation::parse_date(&date).map_err(|msg| ApiError::validation_field("date", msg))?;

    let sql = format!(
        "{} WHERE t.user_id = ? AND t.transaction_date = ? ORDER BY t.created_at DESC, t.id DESC",
        SELECT_JOINED
    );
    let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
        .bind(auth.id)
        .bind(&date)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(ApiResponse::with_data(
        "Daily transactions retrieved",
        rows.into_iter().map(TransactionResponse::from).collect::<Vec<_>>(),
    )))
}
