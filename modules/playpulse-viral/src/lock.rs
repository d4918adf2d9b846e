//! Advisory task locks. Every lock carries an expiry so a crashed holder
//! self-heals within the hour; entries past their expiry are treated as
//! absent.

use sqlx::PgPool;
use tracing::{debug, error};

use playpulse_common::Result;

pub const VIRAL_SCANNER_LOCK: &str = "viral_scanner";

#[derive(Clone)]
pub struct TaskLockStore {
    pool: PgPool,
}

impl TaskLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to take the named lock for one hour. Expired locks are swept
    /// first. Returns false when another live holder has it.
    pub async fn acquire(&self, task_name: &str) -> Result<bool> {
        sqlx::query("DELETE FROM task_locks WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO task_locks (task_name, locked_at, locked_by, expires_at)
            VALUES ($1, NOW(), $2, NOW() + INTERVAL '1 hour')
            ON CONFLICT (task_name) DO NOTHING
            "#,
        )
        .bind(task_name)
        .bind(format!("worker-{}", std::process::id()))
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() > 0;
        debug!(task_name, acquired, "Lock attempt");
        Ok(acquired)
    }

    /// Release the named lock. Failures are logged, not propagated, so a
    /// release on the error path can't mask the original error.
    pub async fn release(&self, task_name: &str) {
        if let Err(e) = sqlx::query("DELETE FROM task_locks WHERE task_name = $1")
            .bind(task_name)
            .execute(&self.pool)
            .await
        {
            error!(task_name, error = %e, "Failed to release lock");
        }
    }
}
