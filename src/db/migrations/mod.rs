//! Schema migrations for the budget store.
//!
//! `migration_NN_up.sql` takes the schema from version `NN-1` to `NN`, and
//! `migration_NN_down.sql` takes it back. The version lives in the one-row `schema_version` table.

use anyhow::{ensure, Context};
use sqlx::{Executor, SqlitePool};
use tracing::debug;

use crate::Result;

struct Migration {
    up: &'static str,
    down: &'static str,
}

/// Index `i` holds the migration to version `i + 1`.
const MIGRATIONS: &[Migration] = &[Migration {
    up: include_str!("migration_01_up.sql"),
    down: include_str!("migration_01_down.sql"),
}];

/// The schema version this build of the program expects.
pub(crate) const CURRENT_VERSION: i32 = MIGRATIONS.len() as i32;

/// Creates the `schema_version` table of a brand new database at version 0.
pub(crate) async fn create_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await
        .context("Failed to create schema_version table")?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
        .execute(pool)
        .await
        .context("Failed to insert initial schema version")?;
    Ok(())
}

pub(crate) async fn version(pool: &SqlitePool) -> Result<i32> {
    let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .context("Failed to query schema version")?;
    Ok(row.0)
}

/// Moves the schema to `target`, up or down, one version per transaction. Returns the version the
/// database was at before.
pub(crate) async fn migrate(pool: &SqlitePool, target: i32) -> Result<i32> {
    let from = version(pool).await?;
    ensure!(
        from <= CURRENT_VERSION,
        "The database schema version {from} is newer than this program supports ({CURRENT_VERSION})"
    );
    for (sql, version) in steps(from, target)? {
        debug!("Migrating budget store schema to version {version}");
        apply(pool, sql, version).await?;
    }
    Ok(from)
}

/// The SQL to run, and the version each step leaves the schema at, to get from `from` to `to`.
fn steps(from: i32, to: i32) -> Result<Vec<(&'static str, i32)>> {
    ensure!(
        (0..=CURRENT_VERSION).contains(&to),
        "There is no schema version {to}, the latest is {CURRENT_VERSION}"
    );
    let migration = |version: i32| &MIGRATIONS[(version - 1) as usize];
    Ok(if from <= to {
        (from + 1..=to).map(|v| (migration(v).up, v)).collect()
    } else {
        (to + 1..=from)
            .rev()
            .map(|v| (migration(v).down, v - 1))
            .collect()
    })
}

async fn apply(pool: &SqlitePool, sql: &str, version: i32) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin migration transaction")?;
    tx.execute(sql)
        .await
        .with_context(|| format!("Failed to migrate the schema to version {version}"))?;
    sqlx::query("UPDATE schema_version SET version = ?")
        .bind(version)
        .execute(&mut *tx)
        .await
        .context("Failed to update schema_version")?;
    tx.commit()
        .await
        .context("Failed to commit migration transaction")
}
