//! Category management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::ownership::{authorize_ownership, ResourceKind};
use super::validation;
use super::ApiResponse;
use crate::db::models::{
    Category, CategoryListQuery, CategoryUsage, CategoryUsageRow, CreateCategoryRequest,
    UpdateCategoryRequest,
};
use crate::AppState;

fn validate_category_fields(name: &str, description: &Option<String>) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(msg) = validation::validate_title(name) {
        errors.add("name", msg);
    }
    if let Err(msg) = validation::validate_description(description) {
        errors.add("description", msg);
    }
    errors.finish()
}

/// Owner-scoped name collision check; `exclude_id` skips the row being updated.
async fn name_taken(
    state: &AppState,
    user_id: i64,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<bool, ApiError> {
    let existing: Option<(i64,)> = match exclude_id {
        Some(id) => {
            sqlx::query_as("SELECT id FROM categories WHERE user_id = ? AND name = ? AND id != ?")
                .bind(user_id)
                .bind(name)
                .bind(id)
                .fetch_optional(&state.db)
                .await?
        }
        None => sqlx::query_as("SELECT id FROM categories WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .fetch_optional(&state.db)
            .await?,
    };
    Ok(existing.is_some())
}

/// GET /api/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<CategoryListQuery>,
) -> Result<Json<ApiResponse<Vec<Category>>>, ApiError> {
    let categories: Vec<Category> = match query.kind {
        Some(kind) => {
            sqlx::query_as(
                "SELECT * FROM categories WHERE user_id = ? AND type = ? ORDER BY type, name",
            )
            .bind(auth.id)
            .bind(kind)
            .fetch_all(&state.db)
            .await?
        }
        None => sqlx::query_as("SELECT * FROM categories WHERE user_id = ? ORDER BY type, name")
            .bind(auth.id)
            .fetch_all(&state.db)
            .await?,
    };

    Ok(Json(ApiResponse::with_data("Categories retrieved", categories)))
}

/// POST /api/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Category>>), ApiError> {
    validate_category_fields(&req.name, &req.description)?;

    let name = req.name.trim();
    if name_taken(&state, auth.id, name, None).await? {
        return Err(ApiError::conflict("A category with this name already exists"));
    }

    let category: Category = sqlx::query_as(
        r#"
        INSERT INTO categories (user_id, name, type, description)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(auth.id)
    .bind(name)
    .bind(req.kind)
    .bind(&req.description)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = auth.id, category_id = category.id, "Category created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_data("Category created", category)),
    ))
}

/// GET /api/categories/:id
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Category>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Category, id, auth.id).await?;

    let category: Category = sqlx::query_as("SELECT * FROM categories WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(ApiResponse::with_data("Category retrieved", category)))
}

/// PUT /api/categories/:id
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<ApiResponse<Category>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Category, id, auth.id).await?;
    validate_category_fields(&req.name, &req.description)?;

    let name = req.name.trim();
    if name_taken(&state, auth.id, name, Some(id)).await? {
        return Err(ApiError::conflict("A category with this name already exists"));
    }

    let category: Category = sqlx::query_as(
        r#"
        UPDATE categories
        SET name = ?, type = ?, description = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(req.kind)
    .bind(&req.description)
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ApiResponse::with_data("Category updated", category)))
}

/// DELETE /api/categories/:id
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    authorize_ownership(&state.db, ResourceKind::Category, id, auth.id).await?;

    // The FK is ON DELETE RESTRICT as a backstop, but checking first gives a
    // clear message instead of a bare constraint error
    let (in_use,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE category_id = ?")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
    if in_use > 0 {
        return Err(ApiError::conflict(format!(
            "Category is in use by {} transaction(s) and cannot be deleted",
            in_use
        )));
    }

    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = auth.id, category_id = id, "Category deleted");

    Ok(Json(ApiResponse::message("Category deleted")))
}

/// GET /api/categories/stats
///
/// Per-category transaction counts and totals. Categories with no
/// transactions appear with zeros.
pub async fn category_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<Vec<CategoryUsage>>>, ApiError> {
    let rows: Vec<CategoryUsageRow> = sqlx::query_as(
        r#"
        SELECT c.id, c.name, c.type,
               COUNT(t.id) AS transaction_count,
               COALESCE(SUM(t.amount_minor), 0) AS total_minor
        FROM categories c
        LEFT JOIN transactions t ON t.category_id = c.id
        WHERE c.user_id = ?
        GROUP BY c.id, c.name, c.type
        ORDER BY c.type, c.name
        "#,
    )
    .bind(auth.id)
    .fetch_all(&state.db)
    .await?;

    let stats: Vec<CategoryUsage> = rows.into_iter().map(CategoryUsage::from).collect();

    Ok(Json(ApiResponse::with_data("Category statistics retrieved", stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::db::models::EntryKind;

    async fn test_state() -> Arc<AppState> {
        let pool = db::init_test().await;
        Arc::new(AppState::new(Config::default(), pool))
    }

    async fn seed_user(state: &AppState, email: &str) -> AuthUser {
        let uid = uuid::Uuid::new_v4().to_string();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO users (uid, name, email, password_hash) VALUES (?, ?, ?, 'x') RETURNING id",
        )
        .bind(&uid)
        .bind("Test User")
        .bind(email)
        .fetch_one(&state.db)
        .await
        .unwrap();
        AuthUser {
            id: row.0,
            uid,
            email: email.to_string(),
        }
    }

    fn create_req(name: &str, kind: EntryKind) -> CreateCategoryRequest {
        CreateCategoryRequest {
            name: name.to_string(),
            kind,
            description: None,
        }
    }

    #[tokio::test]
    async fn duplicate_name_for_same_user_conflicts() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;

        let _ = create_category(
            State(state.clone()),
            user.clone(),
            Json(create_req("Groceries", EntryKind::Expense)),
        )
        .await
        .unwrap();

        let err = create_category(
            State(state.clone()),
            user,
            Json(create_req("Groceries", EntryKind::Income)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        // A different user can reuse the name
        let other = seed_user(&state, "b@example.com").await;
        assert!(create_category(
            State(state),
            other,
            Json(create_req("Groceries", EntryKind::Expense)),
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn delete_blocked_while_in_use() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;

        let (_, Json(created)) = create_category(
            State(state.clone()),
            user.clone(),
            Json(create_req("Salary", EntryKind::Income)),
        )
        .await
        .unwrap();
        let category = created.data.unwrap();

        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, title, amount_minor, type, category_id, transaction_date)
            VALUES (?, 'January pay', 500000, 'income', ?, '2024-01-15')
            "#,
        )
        .bind(user.id)
        .bind(category.id)
        .execute(&state.db)
        .await
        .unwrap();

        let err = delete_category(State(state.clone()), user.clone(), Path(category.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        sqlx::query("DELETE FROM transactions WHERE category_id = ?")
            .bind(category.id)
            .execute(&state.db)
            .await
            .unwrap();

        assert!(delete_category(State(state), user, Path(category.id))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_kind() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;

        for (name, kind) in [
            ("Salary", EntryKind::Income),
            ("Groceries", EntryKind::Expense),
            ("Rent", EntryKind::Expense),
        ] {
            let _ = create_category(State(state.clone()), user.clone(), Json(create_req(name, kind)))
                .await
                .unwrap();
        }

        let Json(all) = list_categories(
            State(state.clone()),
            user.clone(),
            Query(CategoryListQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(all.data.unwrap().len(), 3);

        let Json(expenses) = list_categories(
            State(state),
            user,
            Query(CategoryListQuery {
                kind: Some(EntryKind::Expense),
            }),
        )
        .await
        .unwrap();
        let expenses = expenses.data.unwrap();
        assert_eq!(expenses.len(), 2);
        assert!(expenses.iter().all(|c| c.kind == EntryKind::Expense));
    }

    #[tokio::test]
    async fn stats_include_unused_categories_with_zeros() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;

        let (_, Json(created)) = create_category(
            State(state.clone()),
            user.clone(),
            Json(create_req("Transport", EntryKind::Expense)),
        )
        .await
        .unwrap();
        let category = created.data.unwrap();

        let _ = create_category(
            State(state.clone()),
            user.clone(),
            Json(create_req("Hobbies", EntryKind::Expense)),
        )
        .await
        .unwrap();

        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, title, amount_minor, type, category_id, transaction_date)
            VALUES (?, 'Bus pass', 2550, 'expense', ?, '2024-02-01')
            "#,
        )
        .bind(user.id)
        .bind(category.id)
        .execute(&state.db)
        .await
        .unwrap();

        let Json(response) = category_stats(State(state), user).await.unwrap();
        let stats = response.data.unwrap();
        assert_eq!(stats.len(), 2);

        let transport = stats.iter().find(|s| s.name == "Transport").unwrap();
        assert_eq!(transport.transaction_count, 1);
        assert_eq!(transport.total_amount.to_string(), "25.50");

        let hobbies = stats.iter().find(|s| s.name == "Hobbies").unwrap();
        assert_eq!(hobbies.transaction_count, 0);
        assert_eq!(hobbies.total_amount, rust_decimal::Decimal::new(0, 2));
    }
}
