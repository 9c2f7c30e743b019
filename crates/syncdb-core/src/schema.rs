/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The ordered DDL manifest, derived-view recreation, `view_column_meta`
//! seeding, and idempotent column/table ensures for historical drift.
//! Mirrors the named, ordered migration-list shape used for other
//! versioned schemas, just with a static manifest instead of a `match`
//! over version numbers (that match lives in [`crate::versioning`]).

use crate::error::{Error, Result};
use rusqlite::Connection;
use sql_support::ConnExt;

/// One named, ordered DDL script. Applied in declaration order; every
/// statement must be safe to re-run against an already-migrated database.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_base_tables",
        sql: "
            CREATE TABLE IF NOT EXISTS tune (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                tune_type TEXT,
                last_modified_at TEXT
            );
            CREATE TABLE IF NOT EXISTS playlist (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                last_modified_at TEXT
            );
            CREATE TABLE IF NOT EXISTS practice_record (
                id TEXT PRIMARY KEY,
                tune_id TEXT NOT NULL,
                practiced_at TEXT NOT NULL,
                last_modified_at TEXT
            );
            CREATE TABLE IF NOT EXISTS genre_tune_type (
                genre_id TEXT NOT NULL,
                tune_type_id TEXT NOT NULL,
                label TEXT,
                PRIMARY KEY (genre_id, tune_type_id)
            );
        ",
    },
    Migration {
        name: "0002_playlist_description",
        // Exercised by `ensure_historical_columns` too: this column is
        // intentionally also re-added there so a snapshot that predates
        // this migration but was never fully re-migrated still ends up
        // with it.
        sql: "ALTER TABLE playlist ADD COLUMN description TEXT;",
    },
];

/// Columns that must exist on a table regardless of which migrations a
/// given snapshot actually ran — the idempotent "ensure" path for
/// historical drift.
struct ColumnEnsure {
    table: &'static str,
    column: &'static str,
    definition: &'static str,
}

const HISTORICAL_COLUMN_ENSURES: &[ColumnEnsure] = &[ColumnEnsure {
    table: "playlist",
    column: "description",
    definition: "TEXT",
}];

struct DerivedView {
    name: &'static str,
    sql: &'static str,
    columns: &'static [(&'static str, &'static str)],
}

const DERIVED_VIEWS: &[DerivedView] = &[DerivedView {
    name: "tune_practice_summary",
    sql: "
        SELECT
            tune.id AS tune_id,
            tune.title AS title,
            COUNT(practice_record.id) AS practice_count
        FROM tune
        LEFT JOIN practice_record ON practice_record.tune_id = tune.id
        GROUP BY tune.id, tune.title
    ",
    columns: &[
        ("tune_id", "the tune's primary key"),
        ("title", "the tune's display title"),
        ("practice_count", "number of practice_record rows referencing this tune"),
    ],
}];

/// Applies every migration script in order, idempotently.
///
/// Most DDL (`CREATE TABLE IF NOT EXISTS`, `CREATE INDEX IF NOT EXISTS`) is
/// naturally idempotent. `ALTER TABLE ... ADD COLUMN` is not — SQLite errors
/// on a duplicate column — so each such statement is gated on
/// `table_has_column` first, the same check `ensure_historical_columns` uses
/// for post-hoc column drift.
pub fn apply_ddl_manifest(conn: &Connection) -> Result<()> {
    for migration in MIGRATIONS {
        for statement in sql_support::split_statements(migration.sql) {
            if let Some((table, column)) = parse_add_column(statement) {
                if table_has_column(conn, table, column)? {
                    continue;
                }
            }
            conn.execute_batch(statement).map_err(|e| {
                log::error!("migration {} failed: {e}", migration.name);
                Error::DdlFailed(e)
            })?;
        }
    }
    Ok(())
}

/// Recognizes `ALTER TABLE <table> ADD COLUMN <column> ...` (the only
/// non-idempotent shape this manifest's migrations use) and returns the
/// table/column pair to gate on. Any other statement shape returns `None`
/// and is executed unconditionally.
fn parse_add_column(statement: &str) -> Option<(&str, &str)> {
    let rest = statement.trim().strip_prefix("ALTER TABLE")?;
    let (table, rest) = rest.trim_start().split_once(char::is_whitespace)?;
    let rest = rest.trim_start().strip_prefix("ADD COLUMN")?;
    let (column, _) = rest.trim_start().split_once(char::is_whitespace)?;
    Some((table, column))
}

/// Recreates every derived view to its latest definition (idempotent
/// drop+create).
pub fn recreate_derived_views(conn: &Connection) -> Result<()> {
    for view in DERIVED_VIEWS {
        conn.execute_batch(&format!(
            "DROP VIEW IF EXISTS {name}; CREATE VIEW {name} AS {sql};",
            name = view.name,
            sql = view.sql
        ))
        .map_err(Error::DdlFailed)?;
    }
    Ok(())
}

/// Seeds `view_column_meta` for every derived view column, after ensuring
/// the table itself exists.
pub fn seed_view_column_meta(conn: &Connection) -> Result<()> {
    ensure_view_column_meta_table(conn)?;
    for view in DERIVED_VIEWS {
        for &(column, description) in view.columns {
            conn.execute_cached(
                "INSERT INTO view_column_meta (view_name, column_name, description)
                 VALUES (:view, :column, :description)
                 ON CONFLICT(view_name, column_name) DO UPDATE SET description = excluded.description",
                &[
                    (":view", &view.name as &dyn rusqlite::ToSql),
                    (":column", &column as &dyn rusqlite::ToSql),
                    (":description", &description as &dyn rusqlite::ToSql),
                ],
            )?;
        }
    }
    Ok(())
}

/// `view_column_meta(view_name, column_name, description)` and its index.
fn ensure_view_column_meta_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS view_column_meta (
            view_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            description TEXT,
            PRIMARY KEY (view_name, column_name)
        );
        CREATE INDEX IF NOT EXISTS idx_view_column_meta_view
            ON view_column_meta(view_name);",
    )
    .map_err(Error::DdlFailed)
}

/// `sync_change_log(table_name PK, changed_at)`.
pub fn ensure_sync_change_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_change_log (
            table_name TEXT PRIMARY KEY,
            changed_at TEXT NOT NULL
        );",
    )
    .map_err(Error::DdlFailed)
}

/// Idempotent column ensures for historical drift. `ALTER TABLE ADD
/// COLUMN` is not itself idempotent in SQLite, so each column's presence
/// is checked via `PRAGMA table_info` first.
pub fn ensure_historical_columns(conn: &Connection) -> Result<()> {
    for ensure in HISTORICAL_COLUMN_ENSURES {
        if !table_has_column(conn, ensure.table, ensure.column)? {
            conn.execute_batch(&format!(
                "ALTER TABLE {table} ADD COLUMN {column} {definition};",
                table = ensure.table,
                column = ensure.column,
                definition = ensure.definition
            ))
            .map_err(Error::DdlFailed)?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Runs the full post-migration bootstrap sequence: derived views, their
/// column metadata, historical column ensures, then the change log table.
pub fn bootstrap(conn: &Connection) -> Result<()> {
    recreate_derived_views(conn)?;
    seed_view_column_meta(conn)?;
    ensure_historical_columns(conn)?;
    ensure_sync_change_log(conn)?;
    Ok(())
}
