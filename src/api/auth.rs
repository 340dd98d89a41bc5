//! Authentication: password hashing, JWT issuance and the `AuthUser`
//! extractor, plus the account-management handlers.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation;
use super::ApiResponse;
use crate::config::AuthConfig;
use crate::db::models::{
    AuthResponse, ChangePasswordRequest, DeleteAccountRequest, LoginRequest, RegisterRequest,
    UpdateProfileRequest, User, UserResponse,
};
use crate::AppState;

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| ApiError::internal(format!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// JWT claims. The shape is fixed: tokens carrying unknown fields are
/// rejected so every token in circulation decodes to exactly this struct.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    /// Numeric user id
    pub sub: i64,
    /// Public user identifier
    pub uid: String,
    pub email: String,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Token verification failures worth telling apart: an expired token gets a
/// different message than a malformed or tampered one.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Issue a signed JWT for a user. Returns the token and its expiry timestamp.
pub fn issue_token(user: &User, auth: &AuthConfig) -> Result<(String, i64), ApiError> {
    let now = Utc::now().timestamp();
    let expires_at = now + auth.token_ttl_hours * 3600;

    let claims = Claims {
        sub: user.id,
        uid: user.uid.clone(),
        email: user.email.clone(),
        iat: now,
        exp: expires_at,
        iss: auth.issuer.clone(),
        aud: auth.audience.clone(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))?;

    Ok((token, expires_at))
}

/// Verify a JWT and return its claims
pub fn verify_token(token: &str, auth: &AuthConfig) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&auth.issuer]);
    validation.set_audience(&[&auth.audience]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })
}

/// Authenticated user extracted from the Authorization header.
///
/// The token must still resolve to an existing user row; tokens issued for
/// since-deleted accounts are rejected.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub uid: String,
    pub email: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Access token required"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Access token required"))?;

        let claims = verify_token(token, &state.config.auth).map_err(|e| match e {
            TokenError::Expired => ApiError::unauthorized("Token has expired"),
            TokenError::Invalid => ApiError::unauthorized("Invalid token"),
        })?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await?;

        if exists.is_none() {
            return Err(ApiError::unauthorized("Invalid token - user not found"));
        }

        Ok(AuthUser {
            id: claims.sub,
            uid: claims.uid,
            email: claims.email,
        })
    }
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(msg) = validation::validate_name(&req.name) {
        errors.add("name", msg);
    }
    if let Err(msg) = validation::validate_email(&req.email) {
        errors.add("email", msg);
    }
    if let Err(msg) = validation::validate_password_strength(&req.password) {
        errors.add("password", msg);
    }
    if let Err(msg) = validation::validate_photo_url(&req.photo_url) {
        errors.add("photo_url", msg);
    }
    if let Some(filename) = &req.photo_filename {
        if let Err(msg) = validation::validate_photo_filename(filename) {
            errors.add("photo_filename", msg);
        }
    }

    errors.finish()
}

async fn fetch_user(state: &AppState, id: i64) -> Result<User, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    user.ok_or_else(|| ApiError::not_found("User not found"))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    validate_registration(&req)?;

    let email = validation::normalize_email(&req.email);

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&req.password)?;
    let uid = Uuid::new_v4().to_string();

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (uid, name, email, password_hash, photo_url, photo_filename)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&uid)
    .bind(req.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(&req.photo_url)
    .bind(&req.photo_filename)
    .fetch_one(&state.db)
    .await?;

    let (token, expires_at) = issue_token(&user, &state.config.auth)?;

    tracing::info!(user_id = user.id, "New user registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_data(
            "Account created successfully",
            AuthResponse {
                user: user.into(),
                token,
                expires_at,
            },
        )),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let email = validation::normalize_email(&req.email);

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    // Same response whether the account is missing or the password is wrong
    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    let (token, expires_at) = issue_token(&user, &state.config.auth)?;

    tracing::info!(user_id = user.id, "User logged in");

    Ok(Json(ApiResponse::with_data(
        "Login successful",
        AuthResponse {
            user: user.into(),
            token,
            expires_at,
        },
    )))
}

/// GET /api/auth/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let user = fetch_user(&state, auth.id).await?;
    Ok(Json(ApiResponse::with_data("Profile retrieved", user.into())))
}

/// PUT /api/auth/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let current = fetch_user(&state, auth.id).await?;

    let mut errors = ValidationErrorBuilder::new();

    let name = match &req.name {
        Some(name) => {
            if let Err(msg) = validation::validate_name(name) {
                errors.add("name", msg);
            }
            name.trim().to_string()
        }
        None => current.name.clone(),
    };

    let email = match &req.email {
        Some(email) => {
            if let Err(msg) = validation::validate_email(email) {
                errors.add("email", msg);
            }
            validation::normalize_email(email)
        }
        None => current.email.clone(),
    };

    if let Err(msg) = validation::validate_photo_url(&req.photo_url) {
        errors.add("photo_url", msg);
    }
    if let Some(filename) = &req.photo_filename {
        if let Err(msg) = validation::validate_photo_filename(filename) {
            errors.add("photo_filename", msg);
        }
    }

    errors.finish()?;

    if email != current.email {
        let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = ? AND id != ?")
            .bind(&email)
            .bind(auth.id)
            .fetch_optional(&state.db)
            .await?;
        if taken.is_some() {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
    }

    let photo_url = req.photo_url.or_else(|| current.photo_url.clone());
    let photo_filename = req.photo_filename.or_else(|| current.photo_filename.clone());
    let photo_changed =
        photo_filename != current.photo_filename && current.photo_filename.is_some();

    let updated: User = sqlx::query_as(
        r#"
        UPDATE users
        SET name = ?, email = ?, photo_url = ?, photo_filename = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(&photo_url)
    .bind(&photo_filename)
    .bind(auth.id)
    .fetch_one(&state.db)
    .await?;

    // Remove the superseded photo only after the row change is durable, so a
    // failed update never orphans the user's current photo.
    if photo_changed {
        if let Some(old) = &current.photo_filename {
            if validation::validate_photo_filename(old).is_ok() {
                let path = state.config.server.upload_dir.join(old);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), "Failed to remove old photo: {}", e);
                }
            }
        }
    }

    Ok(Json(ApiResponse::with_data("Profile updated", updated.into())))
}

/// PUT /api/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = fetch_user(&state, auth.id).await?;

    if !verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }

    validation::validate_password_strength(&req.new_password)
        .map_err(|msg| ApiError::validation_field("new_password", msg))?;

    let password_hash = hash_password(&req.new_password)?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(&password_hash)
        .bind(auth.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = auth.id, "Password changed");

    Ok(Json(ApiResponse::message("Password changed successfully")))
}

/// DELETE /api/auth/account
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = fetch_user(&state, auth.id).await?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::unauthorized("Password is incorrect"));
    }

    // Categories and transactions go with the user via ON DELETE CASCADE
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(auth.id)
        .execute(&state.db)
        .await?;

    if let Some(filename) = &user.photo_filename {
        if validation::validate_photo_filename(filename).is_ok() {
            let path = state.config.server.upload_dir.join(filename);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), "Failed to remove photo: {}", e);
            }
        }
    }

    tracing::info!(user_id = auth.id, "Account deleted");

    Ok(Json(ApiResponse::message("Account deleted successfully")))
}

/// POST /api/auth/logout
///
/// Tokens are stateless, so this is an acknowledgement; clients discard the
/// token on their side.
pub async fn logout(_auth: AuthUser) -> Json<ApiResponse<()>> {
    Json(ApiResponse::message("Logged out successfully"))
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub user: UserResponse,
    pub token_expires: i64,
}

/// GET /api/auth/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<VerifyResponse>>, ApiError> {
    let user = fetch_user(&state, auth.id).await?;

    // The extractor already validated the token; decode again for the expiry
    let token_expires = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .and_then(|token| verify_token(token, &state.config.auth).ok())
        .map(|claims| claims.exp)
        .unwrap_or(0);

    Ok(Json(ApiResponse::with_data(
        "Token is valid",
        VerifyResponse {
            user: user.into(),
            token_expires,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;

    fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret-for-auth-tests".to_string(),
            issuer: "finbook".to_string(),
            audience: "finbook-api".to_string(),
            token_ttl_hours: 1,
        }
    }

    fn sample_user() -> User {
        User {
            id: 1,
            uid: "u-1".to_string(),
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            password_hash: String::new(),
            photo_url: None,
            photo_filename: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("Str0ng!pass").unwrap();
        assert_ne!(hash, "Str0ng!pass");
        assert!(verify_password("Str0ng!pass", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn token_roundtrip_preserves_claims() {
        let auth = test_auth_config();
        let user = sample_user();

        let (token, expires_at) = issue_token(&user, &auth).unwrap();
        let claims = verify_token(&token, &auth).unwrap();

        assert_eq!(claims.sub, 1);
        assert_eq!(claims.uid, "u-1");
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.exp, expires_at);
        assert_eq!(claims.iss, "finbook");
        assert_eq!(claims.aud, "finbook-api");
    }

    #[test]
    fn expired_token_is_distinguished_from_malformed() {
        let auth = test_auth_config();

        // Backdate well past the decoder's default 60s leeway
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: 1,
            uid: "u-1".to_string(),
            email: "test@example.com".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: auth.issuer.clone(),
            aud: auth.audience.clone(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            verify_token(&token, &auth),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            verify_token("not.a.token", &auth),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let auth = test_auth_config();
        let user = sample_user();
        let (token, _) = issue_token(&user, &auth).unwrap();

        let mut other = test_auth_config();
        other.jwt_secret = "a-different-secret".to_string();
        assert!(matches!(
            verify_token(&token, &other),
            Err(TokenError::Invalid)
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_case_insensitively() {
        let pool = db::init_test().await;
        let state = Arc::new(crate::AppState::new(Config::default(), pool));

        let first = register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Ama".to_string(),
                email: "Ama@Example.com".to_string(),
                password: "Str0ng!pass".to_string(),
                photo_url: None,
                photo_filename: None,
            }),
        )
        .await;
        assert!(first.is_ok());

        let second = register(
            State(state),
            Json(RegisterRequest {
                name: "Ama Again".to_string(),
                email: "ama@example.COM".to_string(),
                password: "Str0ng!pass".to_string(),
                photo_url: None,
                photo_filename: None,
            }),
        )
        .await;
        let err = second.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn login_gives_same_error_for_unknown_email_and_bad_password() {
        let pool = db::init_test().await;
        let state = Arc::new(crate::AppState::new(Config::default(), pool));

        let _ = register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Kofi".to_string(),
                email: "kofi@example.com".to_string(),
                password: "Str0ng!pass".to_string(),
                photo_url: None,
                photo_filename: None,
            }),
        )
        .await
        .unwrap();

        let unknown = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "nobody@example.com".to_string(),
                password: "Str0ng!pass".to_string(),
            }),
        )
        .await
        .unwrap_err();

        let wrong = login(
            State(state),
            Json(LoginRequest {
                email: "kofi@example.com".to_string(),
                password: "Wr0ng!pass".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(unknown.message(), wrong.message());
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deleted_user_token_is_rejected_by_lookup() {
        let pool = db::init_test().await;
        let state = Arc::new(crate::AppState::new(Config::default(), pool));

        let response = register(
            State(state.clone()),
            Json(RegisterRequest {
                name: "Gone".to_string(),
                email: "gone@example.com".to_string(),
                password: "Str0ng!pass".to_string(),
                photo_url: None,
                photo_filename: None,
            }),
        )
        .await
        .unwrap();
        let auth_data = response.1 .0.data.unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(auth_data.user.id)
            .execute(&state.db)
            .await
            .unwrap();

        // Token still verifies cryptographically but the user row is gone
        let claims = verify_token(&auth_data.token, &state.config.auth).unwrap();
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await
            .unwrap();
        assert!(exists.is_none());
    }
}
