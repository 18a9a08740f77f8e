//! Schema migrations for the booking database.
//!
//! Each step is a SQL file compiled into the binary. Applied steps are
//! recorded by name in `_relay_migrations` and never run twice.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

const LEDGER: &str = "_relay_migrations";

/// (name, sql) in the order they must apply. Append only.
const STEPS: &[(&str, &str)] = &[
    ("000_booking", include_str!("migrations/000_booking.sql")),
    (
        "001_active_appointment_per_slot",
        include_str!("migrations/001_active_appointment_per_slot.sql"),
    ),
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read the migration ledger: {0}")]
    StateQuery(rusqlite::Error),
}

/// Brings the schema up to date and returns how many steps were applied.
///
/// # Errors
///
/// Fails on the first step that does not apply. That step leaves no trace.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, STEPS)
}

fn apply(conn: &Connection, steps: &[(&str, &str)]) -> Result<usize, MigrationError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"
    ))
    .map_err(MigrationError::StateQuery)?;

    let mut applied = 0;
    for &(name, sql) in steps {
        if is_recorded(conn, name)? {
            continue;
        }
        apply_step(conn, name, sql).map_err(|source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        })?;
        tracing::info!(migration = name, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

fn is_recorded(conn: &Connection, name: &str) -> Result<bool, MigrationError> {
    conn.query_row(&format!("SELECT 1 FROM {LEDGER} WHERE name = ?1"), [name], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
        .map_err(MigrationError::StateQuery)
}

fn apply_step(conn: &Connection, name: &str, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(&format!("INSERT INTO {LEDGER} (name) VALUES (?1)"), [name])?;
    tx.commit()
}
