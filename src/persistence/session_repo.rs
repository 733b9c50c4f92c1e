//! Session repository for `SQLite` persistence.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

/// Repository wrapper around the session table.
#[derive(Clone)]
pub struct SessionRepo {
    pool: SqlitePool,
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions \
             (id, user_identifier, status, valid, created, last_used, profile_path, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user)
        .bind(session.status.as_str())
        .bind(session.valid)
        .bind(session.created)
        .bind(session.last_used)
        .bind(path_str(&session.profile_path))
        .bind(metadata_str(session)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the mutable fields of an existing record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails or matches no row.
    pub async fn update(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, valid = ?, last_used = ?, metadata = ? \
             WHERE id = ?",
        )
        .bind(session.status.as_str())
        .bind(session.valid)
        .bind(session.last_used)
        .bind(metadata_str(session)?)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Db(format!(
                "session {} missing from store",
                session.id
            )));
        }
        Ok(())
    }

    /// Load every persisted session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is malformed.
    pub async fn load_all(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY created ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_session).collect()
    }
}

fn path_str(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

fn metadata_str(session: &Session) -> Result<Option<String>> {
    session
        .metadata
        .as_ref()
        .map(|value| {
            serde_json::to_string(value)
                .map_err(|err| AppError::Db(format!("metadata not serializable: {err}")))
        })
        .transpose()
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let status_raw: String = row.try_get("status")?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| AppError::Db(format!("unknown session status '{status_raw}'")))?;

    let metadata_raw: Option<String> = row.try_get("metadata")?;
    let metadata = metadata_raw
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|err| AppError::Db(format!("metadata not parseable: {err}")))
        })
        .transpose()?;

    let created: DateTime<Utc> = row.try_get("created")?;
    let last_used: DateTime<Utc> = row.try_get("last_used")?;
    let profile_path: String = row.try_get("profile_path")?;

    Ok(Session {
        id: row.try_get("id")?,
        user: row.try_get("user_identifier")?,
        status,
        valid: row.try_get("valid")?,
        created,
        last_used,
        profile_path: PathBuf::from(profile_path),
        metadata,
    })
}
