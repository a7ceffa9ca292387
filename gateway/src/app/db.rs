//! Persistent credential store backed by `SQLite`.
//!
//! Holds the local accounts linked to Kakao identities and the anonymised withdrawal history.

use core::future::Future;
use core::str::FromStr as _;
use core::time::Duration;
use std::path::Path;

use chrono::{DateTime, Utc};
use eyre::WrapErr as _;
use rand::{Rng as _, distr::Alphanumeric};
use serde::Serialize;
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use thiserror::Error;

pub(crate) type DbPool = SqlitePool;

const ACCOUNT_COLUMNS: &str =
    "id, kakao_id, email, name, nickname, profile_url, role, created_at, updated_at";

/// Initialize the database pool and run migrations.
///
/// `:memory:` opens a private in-memory database on a single connection.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or a migration fails.
pub async fn init(path: &Path) -> eyre::Result<DbPool> {
    let in_memory = path.as_os_str() == ":memory:";
    let options = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
    }
    .foreign_keys(true);

    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
    if in_memory {
        // the database lives only as long as its single connection
        pool_options = pool_options
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
    }
    let pool = pool_options
        .connect_with(options)
        .await
        .wrap_err("Failed to open database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .wrap_err("Failed to run database migrations")?;

    Ok(pool)
}

/// Errors surfaced by the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("a unique value is already taken")]
    Conflict,
}

impl StoreError {
    fn from_write(e: sqlx::Error) -> Self {
        if e
            .as_database_error()
            .is_some_and(|d| d.is_unique_violation())
        {
            Self::Conflict
        } else {
            Self::Database(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

/// A local account linked to one Kakao identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub kakao_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub profile_url: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity data handed to the store after a successful provider login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialProfile {
    pub kakao_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub profile_url: Option<String>,
}

/// Reason given by a user closing their account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub kind: String,
    pub comment: Option<String>,
}

/// Account persistence used by the login flow and the settings handlers.
pub trait CredentialStore: Send + Sync + 'static {
    /// Creates or updates the account for `profile.kakao_id`.
    ///
    /// An email already owned by a different account is dropped instead of failing the
    /// upsert: new accounts get no email, existing accounts keep theirs.
    fn upsert_credential(
        &self,
        profile: &CredentialProfile,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    fn find_account(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    /// Whether `nickname` belongs to an account other than `except_id`.
    fn nickname_taken(
        &self,
        nickname: &str,
        except_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn update_nickname(
        &self,
        id: &str,
        nickname: &str,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    /// Records the withdrawal reason and deletes the account in one transaction.
    /// Returns `false` if the account did not exist.
    fn withdraw(
        &self,
        id: &str,
        withdrawal: &Withdrawal,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Decides which email an upserted account may carry.
///
/// `owner` is the id of the account currently holding `incoming`, `existing` the id of
/// the account being upserted (if it already exists).
#[must_use]
pub fn resolve_email(
    incoming: Option<&str>,
    owner: Option<&str>,
    existing: Option<&str>,
) -> Option<String> {
    let email = incoming?;
    match owner {
        None => Some(email.to_owned()),
        Some(owner) if Some(owner) == existing => Some(email.to_owned()),
        Some(_) => None,
    }
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
}

fn generate_account_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn upsert_in(
        tx: &mut Transaction<'static, Sqlite>,
        profile: &CredentialProfile,
    ) -> Result<Account, StoreError> {
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE kakao_id = ?")
            .bind(&profile.kakao_id)
            .fetch_optional(&mut **tx)
            .await?;

        let email = normalize_email(profile.email.as_deref());
        let owner: Option<String> = match email {
            Some(ref email) => {
                sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
                    .bind(email)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            None => None,
        };
        let email = resolve_email(email.as_deref(), owner.as_deref(), existing.as_deref());
        if email.is_none() && owner.is_some() {
            tracing::info!(
                kakao_id = %profile.kakao_id,
                "Provider email already belongs to another account, storing account without it"
            );
        }

        let now = Utc::now();
        let account = if let Some(id) = existing {
            sqlx::query_as::<_, Account>(&format!(
                "UPDATE users SET email = COALESCE(?, email), name = COALESCE(?, name), updated_at = ? \
                 WHERE id = ? RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(email)
            .bind(&profile.name)
            .bind(now)
            .bind(id)
            .fetch_one(&mut **tx)
            .await
        } else {
            sqlx::query_as::<_, Account>(&format!(
                "INSERT INTO users (id, kakao_id, email, name, profile_url, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(generate_account_id())
            .bind(&profile.kakao_id)
            .bind(email)
            .bind(&profile.name)
            .bind(&profile.profile_url)
            .bind(now)
            .bind(now)
            .fetch_one(&mut **tx)
            .await
        }
        .map_err(StoreError::from_write)?;

        Ok(account)
    }
}

impl CredentialStore for SqliteCredentialStore {
    async fn upsert_credential(
        &self,
        profile: &CredentialProfile,
    ) -> Result<Option<Account>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let account = Self::upsert_in(&mut tx, profile).await?;
        tx.commit().await?;
        Ok(Some(account))
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn nickname_taken(&self, nickname: &str, except_id: &str) -> Result<bool, StoreError> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM users WHERE nickname = ? AND id != ? LIMIT 1")
                .bind(nickname)
                .bind(except_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(exists.is_some())
    }

    async fn update_nickname(&self, id: &str, nickname: &str) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE users SET nickname = ?, updated_at = ? WHERE id = ? RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(nickname)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_write)
    }

    async fn withdraw(&self, id: &str, withdrawal: &Withdrawal) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO withdrawal_history (type, comment, created_at) VALUES (?, ?, ?)")
            .bind(&withdrawal.kind)
            .bind(&withdrawal.comment)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }
}
