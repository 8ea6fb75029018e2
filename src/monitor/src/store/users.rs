//! Users and API keys for the administrative surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use tracing::info;

use super::Store;
use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub key: String,
    pub name: String,
    pub owner_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Store {
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<UserRecord, MonitorError> {
        let existing = sqlx::query("SELECT id FROM users WHERE username = ? OR email = ?")
            .bind(username)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(MonitorError::Conflict(format!(
                "user '{username}' already exists"
            )));
        }

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, role, created_at, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!("user created: {} ({})", username, role);
        self.get_user(result.last_insert_rowid())
            .await?
            .ok_or(MonitorError::NotFound("user"))
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_user))
    }

    pub async fn get_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ? AND is_active = 1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_user))
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, MonitorError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_user).collect())
    }

    pub async fn delete_user(&self, id: i64) -> Result<(), MonitorError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound("user"));
        }
        Ok(())
    }

    pub async fn touch_last_login(&self, id: i64) -> Result<(), MonitorError> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_api_key(
        &self,
        key: &str,
        name: &str,
        owner_name: Option<&str>,
        role: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKeyRecord, MonitorError> {
        let result = sqlx::query(
            "INSERT INTO api_keys (key, name, owner_name, role, is_active, created_at, expires_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(key)
        .bind(name)
        .bind(owner_name)
        .bind(role)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        info!("api key created: {}", name);
        self.get_api_key(result.last_insert_rowid())
            .await?
            .ok_or(MonitorError::NotFound("api key"))
    }

    pub async fn get_api_key(&self, id: i64) -> Result<Option<ApiKeyRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_api_key))
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, MonitorError> {
        let rows = sqlx::query("SELECT * FROM api_keys ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_api_key).collect())
    }

    pub async fn revoke_api_key(&self, id: i64) -> Result<(), MonitorError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound("api key"));
        }
        Ok(())
    }

    /// Look up an active, unexpired key and record its use.
    pub async fn authenticate_api_key(
        &self,
        key: &str,
    ) -> Result<Option<ApiKeyRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key = ? AND is_active = 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(record) = row.map(row_to_api_key) else {
            return Ok(None);
        };

        if let Some(expires_at) = record.expires_at {
            if expires_at <= Utc::now() {
                return Ok(None);
            }
        }

        sqlx::query(
            "UPDATE api_keys SET last_used_at = ?, usage_count = usage_count + 1 WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        Ok(Some(record))
    }
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> UserRecord {
    let is_active: i64 = row.get("is_active");
    UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        created_at: row.get("created_at"),
        last_login: row.get("last_login"),
        is_active: is_active != 0,
    }
}

fn row_to_api_key(row: sqlx::sqlite::SqliteRow) -> ApiKeyRecord {
    let is_active: i64 = row.get("is_active");
    ApiKeyRecord {
        id: row.get("id"),
        key: row.get("key"),
        name: row.get("name"),
        owner_name: row.get("owner_name"),
        role: row.get("role"),
        is_active: is_active != 0,
        last_used_at: row.get("last_used_at"),
        usage_count: row.get("usage_count"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_user("admin", "admin@example.com", "hash", "admin")
            .await
            .unwrap();

        let err = store
            .create_user("admin", "other@example.com", "hash", "viewer")
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Conflict(_)));
    }

    #[tokio::test]
    async fn api_key_authentication_tracks_usage() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_api_key("key-123", "probe key", Some("ops"), "operator", None)
            .await
            .unwrap();

        let first = store.authenticate_api_key("key-123").await.unwrap().unwrap();
        assert_eq!(first.role, "operator");

        let second = store.authenticate_api_key("key-123").await.unwrap().unwrap();
        assert_eq!(second.usage_count, 1);
        assert!(second.last_used_at.is_some());

        assert!(store.authenticate_api_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoked_and_expired_keys_fail_authentication() {
        let store = Store::open_in_memory().await.unwrap();
        let key = store
            .create_api_key("key-r", "revoked", None, "viewer", None)
            .await
            .unwrap();
        store.revoke_api_key(key.id).await.unwrap();
        assert!(store.authenticate_api_key("key-r").await.unwrap().is_none());

        store
            .create_api_key(
                "key-e",
                "expired",
                None,
                "viewer",
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert!(store.authenticate_api_key("key-e").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_login_is_recorded() {
        let store = Store::open_in_memory().await.unwrap();
        let user = store
            .create_user("viewer", "v@example.com", "hash", "viewer")
            .await
            .unwrap();
        assert!(user.last_login.is_none());

        store.touch_last_login(user.id).await.unwrap();
        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert!(user.last_login.is_some());
    }
}
