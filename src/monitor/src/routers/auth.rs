//! # Auth Administration
//!
//! Login and token refresh, plus admin CRUD for users and API keys.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use cortex_common::models::ApiResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::auth::{self, AuthUser};
use crate::error::MonitorError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/users", get(list_users).post(create_user))
        .route("/auth/users/:user_id", axum::routing::delete(delete_user))
        .route("/auth/api-keys", get(list_api_keys).post(create_api_key))
        .route("/auth/api-keys/:key_id", axum::routing::delete(revoke_api_key))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let user = state
        .store
        .get_user_by_username(&body.username)
        .await?
        .ok_or_else(|| MonitorError::Unauthorized("invalid credentials".to_string()))?;

    if !auth::verify_password(&body.password, &user.password_hash) {
        return Err(MonitorError::Unauthorized("invalid credentials".to_string()));
    }

    let token = auth::create_access_token(
        &state.settings.auth.secret_key,
        state.settings.auth.access_token_expire_minutes,
        &user.username,
        &user.role,
    )?;
    state.store.touch_last_login(user.id).await?;

    info!("user logged in: {}", user.username);
    Ok(Json(ApiResponse::ok(
        json!({
            "access_token": token,
            "token_type": "bearer",
            "role": user.role,
        }),
        "Login successful",
    )))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let token = auth::create_access_token(
        &state.settings.auth.secret_key,
        state.settings.auth.access_token_expire_minutes,
        &auth_user.username,
        &auth_user.role,
    )?;

    Ok(Json(ApiResponse::ok(
        json!({"access_token": token, "token_type": "bearer"}),
        "Token refreshed",
    )))
}

#[derive(Debug, Deserialize)]
struct CreateUserBody {
    username: String,
    email: String,
    password: String,
    #[serde(default = "default_role")]
    role: String,
}

fn default_role() -> String {
    auth::ROLE_VIEWER.to_string()
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(body): Json<CreateUserBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;

    if !matches!(
        body.role.as_str(),
        auth::ROLE_ADMIN | auth::ROLE_OPERATOR | auth::ROLE_VIEWER
    ) {
        return Err(MonitorError::Validation(format!("invalid role: {}", body.role)));
    }
    if body.password.len() < 8 {
        return Err(MonitorError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let hash = auth::hash_password(&body.password)?;
    let user = state
        .store
        .create_user(&body.username, &body.email, &hash, &body.role)
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({"id": user.id, "username": user.username, "role": user.role}),
        "User created successfully",
    )))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;
    let users = state.store.list_users().await?;
    let count = users.len();

    Ok(Json(ApiResponse::ok(
        json!({
            "users": users,
            "count": count,
        }),
        "Users retrieved successfully",
    )))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;
    state.store.delete_user(user_id).await?;

    Ok(Json(ApiResponse::ok(
        json!({"user_id": user_id}),
        "User deleted successfully",
    )))
}

#[derive(Debug, Deserialize)]
struct CreateApiKeyBody {
    name: String,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default = "default_role")]
    role: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

async fn create_api_key(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Json(body): Json<CreateApiKeyBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;

    let key = format!("ak_{}", uuid::Uuid::new_v4().simple());
    let record = state
        .store
        .create_api_key(
            &key,
            &body.name,
            body.owner_name.as_deref(),
            &body.role,
            body.expires_at,
        )
        .await?;

    // The plaintext key is shown exactly once, at creation
    Ok(Json(ApiResponse::ok(
        json!({"id": record.id, "name": record.name, "key": key}),
        "API key created successfully",
    )))
}

async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;
    let keys = state.store.list_api_keys().await?;
    let count = keys.len();

    Ok(Json(ApiResponse::ok(
        json!({
            "api_keys": keys,
            "count": count,
        }),
        "API keys retrieved successfully",
    )))
}

async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(key_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth_user.require_admin()?;
    state.store.revoke_api_key(key_id).await?;

    Ok(Json(ApiResponse::ok(
        json!({"key_id": key_id}),
        "API key revoked successfully",
    )))
}
