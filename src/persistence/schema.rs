//! Session table schema.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the schema. Idempotent.
///
/// # Errors
///
/// Returns `AppError::Db` if a statement fails.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_identifier TEXT NOT NULL,
            status TEXT NOT NULL,
            valid INTEGER NOT NULL,
            created TEXT NOT NULL,
            last_used TEXT NOT NULL,
            profile_path TEXT NOT NULL,
            metadata TEXT
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
