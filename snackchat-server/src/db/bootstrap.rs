use std::sync::{Mutex, OnceLock, PoisonError};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

/// Schema scripts, applied in order on every start. Each is idempotent.
const SCRIPTS: &[(&str, &str)] = &[
    (
        "001_chatlog.sql",
        include_str!("../../sql/schema/001_chatlog.sql"),
    ),
    (
        "002_push_subscriptions.sql",
        include_str!("../../sql/schema/002_push_subscriptions.sql"),
    ),
];

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database error executing {script}: {source}")]
    Sql {
        script: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

static READINESS_OVERRIDE: OnceLock<Mutex<Option<Result<(), String>>>> = OnceLock::new();

fn readiness_override() -> &'static Mutex<Option<Result<(), String>>> {
    READINESS_OVERRIDE.get_or_init(|| Mutex::new(None))
}

/// Forces the outcome of [`ensure_readiness`]; `None` restores the real probe.
pub fn set_readiness_override(outcome: Option<Result<(), String>>) {
    *readiness_override()
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = outcome;
}

/// Applies the embedded schema scripts.
///
/// # Errors
///
/// Returns the first script that fails; its transaction is rolled back.
pub async fn run(pool: &PgPool) -> Result<(), BootstrapError> {
    info!(count = SCRIPTS.len(), "running database bootstrap");

    for (script, sql) in SCRIPTS {
        apply_script(pool, script, sql).await?;
    }

    Ok(())
}

/// Simple liveness check used during startup.
///
/// # Errors
///
/// Returns the driver error when the database cannot be reached.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Readiness probe: the chat table must exist and be readable.
///
/// # Errors
///
/// Returns the driver error, or the forced failure when an override is set.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), sqlx::Error> {
    let forced = readiness_override()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(outcome) = forced {
        return outcome.map_err(sqlx::Error::Protocol);
    }

    sqlx::query("SELECT 1 FROM chatlog LIMIT 1")
        .execute(pool)
        .await
        .map(|_| ())
}

async fn apply_script(
    pool: &PgPool,
    script: &'static str,
    sql: &str,
) -> Result<(), BootstrapError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        warn!(script, "skipping empty bootstrap script");
        return Ok(());
    }

    let mut transaction = pool
        .begin()
        .await
        .map_err(|source| BootstrapError::Sql { script, source })?;

    info!(script, "executing bootstrap script");
    sqlx::raw_sql(trimmed)
        .execute(&mut *transaction)
        .await
        .map_err(|source| BootstrapError::Sql { script, source })?;

    transaction
        .commit()
        .await
        .map_err(|source| BootstrapError::Sql { script, source })
}
