//! Expiring named locks in the `coalescing_locks` table.
//!
//! A row is live while `expires_at > now()`. Expired rows are left in place
//! and overwritten by the next acquire for the same name.

use crate::error::Result;
use std::time::Duration;

impl super::Db {
    /// Create the lock `name` for `ttl` unless a live one exists.
    ///
    /// A single statement, so two concurrent callers cannot both see `true`:
    /// the conflicting insert waits on the row lock and then re-checks the
    /// expiry predicate.
    pub async fn try_acquire_lock(&self, name: &str, ttl: Duration) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "INSERT INTO coalescing_locks (name, expires_at)
             VALUES ($1, now() + make_interval(secs => $2))
             ON CONFLICT (name) DO UPDATE SET expires_at = EXCLUDED.expires_at
             WHERE coalescing_locks.expires_at <= now()
             RETURNING name",
        )
        .bind(name)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Delete the lock `name`. Returns whether a live lock was removed.
    pub async fn release_lock(&self, name: &str) -> Result<bool> {
        let rows_affected = sqlx::query(
            "DELETE FROM coalescing_locks WHERE name = $1 AND expires_at > now()",
        )
        .bind(name)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }
}
