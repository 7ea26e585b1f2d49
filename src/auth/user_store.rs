//! User Storage
//! Mission: Resolve session subjects to user accounts stored in SQLite

use crate::auth::models::{User, UserRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Lookup contract the gates depend on
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Check credentials; `None` for unknown user or wrong password
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>>;
}

/// User storage with SQLite backend
#[derive(Clone)]
pub struct SqliteUserStore {
    db_path: Arc<String>,
}

const USER_COLUMNS: &str = "id, username, password_hash, role, created_at";

impl SqliteUserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: Arc::new(db_path.to_string()),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(self.db_path.as_str())
            .with_context(|| format!("Failed to open user database {}", self.db_path))
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Create an admin account when none exists yet
    pub fn ensure_admin(&self, username: &str, password: &str) -> Result<()> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("Failed to check for admin users")?;

        if count == 0 {
            self.create_user(username, password, UserRole::Admin)?;
            warn!("Bootstrap admin account '{}' created, change its password", username);
        }

        Ok(())
    }

    /// Create a new user
    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
            ],
        )
        .context("Failed to insert user")?;

        info!("Created user: {} ({})", user.username, user.role);

        Ok(user)
    }

    /// Get user by id
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let user = conn
            .query_row(&sql, params![id], user_from_row)
            .optional()?;
        Ok(user)
    }

    /// Get user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
        let user = conn
            .query_row(&sql, params![username], user_from_row)
            .optional()?;
        Ok(user)
    }

    /// Verify username and password
    pub fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid.then_some(user))
            }
            None => Ok(None),
        }
    }

    /// Delete a user by id
    pub fn delete_user(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        let rows_affected = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;

        if rows_affected == 0 {
            anyhow::bail!("User not found");
        }

        info!("Deleted user: {}", id);
        Ok(())
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    // Unknown roles degrade to the least privileged one.
    let role = UserRole::parse(&role_str).unwrap_or(UserRole::Viewer);
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role,
        created_at: row.get(4)?,
    })
}

#[async_trait]
impl UserDirectory for SqliteUserStore {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.get_user(&id))
            .await
            .context("User lookup task failed")?
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let store = self.clone();
        let username = username.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || store.verify_password(&username, &password))
            .await
            .context("Credential check task failed")?
    }
}
