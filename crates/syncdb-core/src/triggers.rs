/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The push queue, the trigger-control row, the per-table change-capture
//! triggers, and the auto-modified trigger for incrementally-syncable
//! tables.
//!
//! `encodePk`, the unique id, and `changed_at` are all generated in SQL —
//! there is no per-mutation Rust call site to hook, since mutations happen
//! directly against the engine connection from application code. Two
//! deterministic-looking-but-not scalar functions are registered once per
//! connection (mirrors `places`' `db::create_functions`, which registers
//! its own `now()` SQL function the same way) to supply that id and
//! timestamp without reaching for non-standard SQLite extensions.

use crate::error::{Error, Result};
use crate::registry::{PrimaryKey, SyncableTable, SYNCABLE_TABLES};
use crate::util;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

const RANDOM_HEX32_FN: &str = "syncdb_random_hex32";
const NOW_ISO_MS_FN: &str = "syncdb_now_iso_ms";

/// Registers the two SQL-callable helpers triggers need. Neither is
/// deterministic, so `FunctionFlags::SQLITE_DETERMINISTIC` is deliberately
/// left unset.
pub fn register_sql_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(RANDOM_HEX32_FN, 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(util::random_hex32())
    })?;
    conn.create_scalar_function(NOW_ISO_MS_FN, 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(util::now_iso_ms())
    })?;
    Ok(())
}

pub fn ensure_trigger_control(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_trigger_control (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            disabled INTEGER NOT NULL DEFAULT 0
        );
        INSERT OR IGNORE INTO sync_trigger_control (id, disabled) VALUES (1, 0);",
    )
    .map_err(Error::TriggerInstallFailed)
}

pub fn ensure_push_queue(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_push_queue (
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            row_id TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in_progress', 'failed')),
            changed_at TEXT NOT NULL,
            synced_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_push_queue_status_changed_at
            ON sync_push_queue(status, changed_at);
        CREATE INDEX IF NOT EXISTS idx_push_queue_table_row
            ON sync_push_queue(table_name, row_id);",
    )
    .map_err(Error::TriggerInstallFailed)
}

/// A single-column PK is NEW/OLD's bare column value; a composite PK is a
/// `json_object(...)` literal with keys in registry-declared order, so the
/// encoding is stable regardless of which columns a caller touches.
fn encode_pk_expr(table: &SyncableTable, row_alias: &str) -> String {
    match &table.primary_key {
        PrimaryKey::Single(col) => format!("{row_alias}.{col}"),
        PrimaryKey::Composite(cols) => {
            let pairs: Vec<String> = cols
                .iter()
                .map(|c| format!("'{c}', {row_alias}.{c}"))
                .collect();
            format!("json_object({})", pairs.join(", "))
        }
    }
}

fn pk_match_clause(table: &SyncableTable, row_alias: &str) -> String {
    table
        .primary_key
        .columns()
        .iter()
        .map(|c| format!("{c} = {row_alias}.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn push_queue_insert_trigger_sql(table: &SyncableTable, event: &str, row_alias: &str) -> String {
    let trigger_name = format!("trg_{}_push_{}", table.name, event.to_lowercase());
    let row_id_expr = encode_pk_expr(table, row_alias);
    format!(
        "DROP TRIGGER IF EXISTS {trigger_name};
        CREATE TRIGGER {trigger_name}
        AFTER {event} ON {table_name}
        WHEN (SELECT disabled FROM sync_trigger_control WHERE id = 1) = 0
        BEGIN
            INSERT INTO sync_push_queue (id, table_name, row_id, operation, status, changed_at, attempts)
            VALUES ({rnd}(), '{table_name}', {row_id_expr}, '{event}', 'pending', {now}(), 0);
        END;",
        table_name = table.name,
        rnd = RANDOM_HEX32_FN,
        now = NOW_ISO_MS_FN,
    )
}

/// Stamps `last_modified_at` when a caller didn't set it, implemented as
/// AFTER UPDATE rather than BEFORE UPDATE: SQLite triggers cannot assign
/// into `NEW` directly, so the standard
/// workaround (also how `places`'s `note_sync_change` keeps `guid`/mtimes in
/// sync) is a same-table `UPDATE` from the trigger body. Doing that from a
/// BEFORE trigger would have the outer statement immediately overwrite the
/// fix-up with its own (stale) `NEW.last_modified_at` once the BEFORE
/// trigger returns; running it AFTER avoids that. `recursive_triggers` is
/// off by default, so this self-UPDATE does not re-fire the trigger.
fn auto_modified_trigger_sql(table: &SyncableTable) -> String {
    let trigger_name = format!("trg_{}_auto_modified", table.name);
    let pk_match = pk_match_clause(table, "NEW");
    format!(
        "DROP TRIGGER IF EXISTS {trigger_name};
        CREATE TRIGGER {trigger_name}
        AFTER UPDATE ON {table_name}
        WHEN NEW.last_modified_at IS OLD.last_modified_at OR NEW.last_modified_at IS NULL
        BEGIN
            UPDATE {table_name} SET last_modified_at = {now}() WHERE {pk_match};
        END;",
        table_name = table.name,
        now = NOW_ISO_MS_FN,
    )
}

/// Drop-and-create every change-capture trigger and, for incrementally
/// syncable tables, the auto-modified trigger.
pub fn install_all(conn: &Connection) -> Result<()> {
    register_sql_functions(conn)?;
    ensure_trigger_control(conn)?;
    ensure_push_queue(conn)?;

    for table in SYNCABLE_TABLES {
        conn.execute_batch(&push_queue_insert_trigger_sql(table, "INSERT", "NEW"))
            .map_err(Error::TriggerInstallFailed)?;
        conn.execute_batch(&push_queue_insert_trigger_sql(table, "UPDATE", "NEW"))
            .map_err(Error::TriggerInstallFailed)?;
        conn.execute_batch(&push_queue_insert_trigger_sql(table, "DELETE", "OLD"))
            .map_err(Error::TriggerInstallFailed)?;

        if table.supports_incremental {
            conn.execute_batch(&auto_modified_trigger_sql(table))
                .map_err(Error::TriggerInstallFailed)?;
        }
    }
    Ok(())
}

pub fn suppress(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE sync_trigger_control SET disabled = 1 WHERE id = 1", [])?;
    Ok(())
}

pub fn enable(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE sync_trigger_control SET disabled = 0 WHERE id = 1", [])?;
    Ok(())
}

pub fn is_suppressed(conn: &Connection) -> Result<bool> {
    let disabled: i64 =
        conn.query_row("SELECT disabled FROM sync_trigger_control WHERE id = 1", [], |r| r.get(0))?;
    Ok(disabled != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn fresh_installed() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::apply_ddl_manifest(&conn).unwrap();
        install_all(&conn).unwrap();
        conn
    }

    fn push_queue_rows(conn: &Connection) -> Vec<(String, String, String)> {
        let mut stmt = conn
            .prepare("SELECT table_name, row_id, operation FROM sync_push_queue ORDER BY changed_at")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn insert_produces_exactly_one_push_queue_item() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO tune (id, title) VALUES ('t-1', 'Kesh')",
            [],
        )
        .unwrap();
        let rows = push_queue_rows(&conn);
        assert_eq!(rows, vec![("tune".into(), "t-1".into(), "INSERT".into())]);
    }

    #[test]
    fn composite_pk_delete_encodes_json_object_in_declared_key_order() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO genre_tune_type (genre_id, tune_type_id, label) VALUES ('irish', 'jig', 'Irish jig')",
            [],
        )
        .unwrap();
        conn.execute(
            "DELETE FROM genre_tune_type WHERE genre_id = 'irish' AND tune_type_id = 'jig'",
            [],
        )
        .unwrap();
        let rows = push_queue_rows(&conn);
        let (table, row_id, op) = rows.last().unwrap();
        assert_eq!(table, "genre_tune_type");
        assert_eq!(op, "DELETE");
        assert_eq!(row_id, r#"{"genre_id":"irish","tune_type_id":"jig"}"#);
    }

    #[test]
    fn suppression_silences_and_resumes_capture() {
        let conn = fresh_installed();
        suppress(&conn).unwrap();
        assert!(is_suppressed(&conn).unwrap());

        conn.execute("INSERT INTO tune (id, title) VALUES ('t-s', 'Suppressed')", [])
            .unwrap();
        conn.execute("UPDATE tune SET title = 'Still suppressed' WHERE id = 't-s'", [])
            .unwrap();
        conn.execute("DELETE FROM tune WHERE id = 't-s'", []).unwrap();
        assert!(push_queue_rows(&conn).is_empty());

        enable(&conn).unwrap();
        assert!(!is_suppressed(&conn).unwrap());
        conn.execute("INSERT INTO tune (id, title) VALUES ('t-e', 'Enabled')", [])
            .unwrap();
        let rows = push_queue_rows(&conn);
        assert_eq!(rows, vec![("tune".into(), "t-e".into(), "INSERT".into())]);
    }

    #[test]
    fn auto_modified_trigger_stamps_when_caller_did_not() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO tune (id, title, last_modified_at) VALUES ('t-1', 'Kesh', '2020-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute("UPDATE tune SET title = 'Kesh Jig' WHERE id = 't-1'", [])
            .unwrap();
        let stamped: String = conn
            .query_row("SELECT last_modified_at FROM tune WHERE id = 't-1'", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stamped, "2020-01-01T00:00:00.000Z");
    }

    #[test]
    fn auto_modified_trigger_honors_explicit_value() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO tune (id, title, last_modified_at) VALUES ('t-1', 'Kesh', '2020-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE tune SET title = 'Kesh Jig', last_modified_at = '2021-06-01T00:00:00.000Z' WHERE id = 't-1'",
            [],
        )
        .unwrap();
        let stamped: String = conn
            .query_row("SELECT last_modified_at FROM tune WHERE id = 't-1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamped, "2021-06-01T00:00:00.000Z");
    }

    #[test]
    fn trigger_ids_are_unique_lowercase_hex32() {
        let conn = fresh_installed();
        for i in 0..5 {
            conn.execute(
                "INSERT INTO tune (id, title) VALUES (?1, 'x')",
                [format!("t-{i}")],
            )
            .unwrap();
        }
        let mut stmt = conn.prepare("SELECT id FROM sync_push_queue").unwrap();
        let ids: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(ids.len(), 5);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
