/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `OutboxBackup`: snapshot pending push-queue items (plus their current
//! row contents) before a destructive schema operation, and best-effort
//! replay them afterwards.

use crate::registry::{find_table, PrimaryKey};
use crate::Result;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupItem {
    pub table_name: String,
    pub row_id: String,
    pub operation: String,
    pub changed_at: String,
    /// Present for non-DELETE items: the row's current contents at backup
    /// time, keyed by column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_data: Option<BTreeMap<String, Json>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxBackup {
    pub version: u32,
    pub created_at: String,
    pub items: Vec<BackupItem>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub applied: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
}

/// A per-item replay failure. Never raised as an `Error`; only ever
/// aggregated into `ReplayOutcome::errors`.
fn item_error(table: &str, row_id: &str, message: impl std::fmt::Display) -> String {
    format!("{table}:{row_id}: {message}")
}

/// Scans `sync_push_queue` for not-yet-completed items and attaches each
/// non-DELETE item's current row contents.
pub fn create(conn: &Connection, created_at: &str) -> Result<OutboxBackup> {
    let mut stmt = conn.prepare(
        "SELECT id, table_name, row_id, operation, changed_at FROM sync_push_queue
         WHERE status IN ('pending', 'failed', 'in_progress') ORDER BY changed_at",
    )?;
    let rows: Vec<(String, String, String, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut items = Vec::with_capacity(rows.len());
    for (_id, table_name, row_id, operation, changed_at) in rows {
        let row_data = if operation == "DELETE" {
            None
        } else {
            load_row_data(conn, &table_name, &row_id)?
        };
        items.push(BackupItem {
            table_name,
            row_id,
            operation,
            changed_at,
            row_data,
        });
    }

    Ok(OutboxBackup {
        version: BACKUP_VERSION,
        created_at: created_at.to_string(),
        items,
    })
}

fn load_row_data(
    conn: &Connection,
    table_name: &str,
    row_id: &str,
) -> Result<Option<BTreeMap<String, Json>>> {
    let Some(table) = find_table(table_name) else {
        return Ok(None);
    };
    let pk_values = decode_pk(table.primary_key.clone(), row_id)?;
    let where_clause = table
        .primary_key
        .columns()
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!("SELECT * FROM {table_name} WHERE {where_clause}");
    let params: Vec<&dyn rusqlite::ToSql> = pk_values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params.as_slice())?;
    if let Some(row) = rows.next()? {
        Ok(Some(row_to_map(row)?))
    } else {
        Ok(None)
    }
}

fn row_to_map(row: &Row) -> Result<BTreeMap<String, Json>> {
    let mut map = BTreeMap::new();
    for (i, column) in row.as_ref().column_names().iter().enumerate() {
        let value: Json = match row.get_ref(i)? {
            rusqlite::types::ValueRef::Null => Json::Null,
            rusqlite::types::ValueRef::Integer(n) => Json::from(n),
            rusqlite::types::ValueRef::Real(f) => {
                serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
            }
            rusqlite::types::ValueRef::Text(t) => {
                Json::String(String::from_utf8_lossy(t).into_owned())
            }
            rusqlite::types::ValueRef::Blob(b) => {
                use base64::Engine;
                Json::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        };
        map.insert((*column).to_string(), value);
    }
    Ok(map)
}

/// Decodes a `rowId` string into the primary key's ordered column values:
/// the bare string for a single-column PK, or a JSON object's values in
/// registry-declared key order for a composite PK.
fn decode_pk(pk: PrimaryKey, row_id: &str) -> Result<Vec<String>> {
    match pk {
        PrimaryKey::Single(_) => Ok(vec![row_id.to_string()]),
        PrimaryKey::Composite(cols) => {
            let value: Json = serde_json::from_str(row_id)?;
            let obj = value.as_object();
            Ok(cols
                .iter()
                .map(|c| {
                    obj.and_then(|o| o.get(*c))
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default()
                })
                .collect())
        }
    }
}

/// Best-effort replay: column drift, rename, or type mismatch causes a
/// per-item skip, never a hard failure.
pub fn replay(conn: &Connection, backup: &OutboxBackup) -> Result<ReplayOutcome> {
    let mut outcome = ReplayOutcome::default();
    for item in &backup.items {
        match replay_item(conn, item) {
            Ok(true) => outcome.applied += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                outcome.skipped += 1;
                outcome
                    .errors
                    .push(item_error(&item.table_name, &item.row_id, e));
            }
        }
    }
    Ok(outcome)
}

fn replay_item(conn: &Connection, item: &BackupItem) -> Result<bool> {
    let Some(table) = find_table(&item.table_name) else {
        return Ok(false);
    };
    let existing_columns = table_columns(conn, table.name)?;
    if existing_columns.is_empty() {
        return Ok(false);
    }

    let pk_cols = table.primary_key.columns();
    let pk_values = decode_pk(table.primary_key.clone(), &item.row_id)?;

    if item.operation == "DELETE" {
        let where_clause = pk_cols
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        conn.execute(
            &format!("DELETE FROM {} WHERE {where_clause}", table.name),
            rusqlite::params_from_iter(pk_values.iter()),
        )?;
        return Ok(true);
    }

    let Some(row_data) = &item.row_data else {
        return Ok(false);
    };
    let mut columns: Vec<String> = row_data
        .keys()
        .filter(|c| existing_columns.iter().any(|e| e == *c))
        .cloned()
        .collect();
    columns.sort();
    if columns.is_empty() {
        return Ok(false);
    }

    let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let column_list = columns.join(", ");
    let non_pk: Vec<&String> = columns
        .iter()
        .filter(|c| !pk_cols.iter().any(|pk| pk == c.as_str()))
        .collect();

    let conflict_clause = if non_pk.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets = non_pk
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {sets}")
    };

    let sql = format!(
        "INSERT INTO {table_name} ({column_list}) VALUES ({placeholders})
         ON CONFLICT({pk_list}) {conflict_clause}",
        table_name = table.name,
        pk_list = pk_cols.join(", "),
    );

    let values: Vec<Box<dyn rusqlite::ToSql>> = columns
        .iter()
        .map(|c| json_to_tosql(row_data.get(c).unwrap_or(&Json::Null)))
        .collect();
    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(true)
}

fn json_to_tosql(value: &Json) -> Box<dyn rusqlite::ToSql> {
    match value {
        Json::Null => Box::new(Option::<String>::None),
        Json::Bool(b) => Box::new(*b as i64),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>("name"))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema, triggers};

    fn fresh_installed() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::apply_ddl_manifest(&conn).unwrap();
        triggers::install_all(&conn).unwrap();
        conn
    }

    #[test]
    fn create_attaches_row_data_for_non_delete_items() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO tune (id, title) VALUES ('t-3', 'Old')",
            [],
        )
        .unwrap();
        let backup = create(&conn, "2024-01-01T00:00:00.000Z").unwrap();
        assert_eq!(backup.items.len(), 1);
        let item = &backup.items[0];
        assert_eq!(item.table_name, "tune");
        assert_eq!(item.operation, "INSERT");
        assert_eq!(
            item.row_data.as_ref().unwrap().get("title").unwrap().as_str(),
            Some("Old")
        );
    }

    #[test]
    fn replay_round_trips_into_recreated_schema() {
        let conn = fresh_installed();
        conn.execute("INSERT INTO tune (id, title) VALUES ('t-3', 'Old')", [])
            .unwrap();
        let backup = create(&conn, "2024-01-01T00:00:00.000Z").unwrap();

        let fresh = Connection::open_in_memory().unwrap();
        schema::apply_ddl_manifest(&fresh).unwrap();
        let outcome = replay(&fresh, &backup).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.errors.is_empty());

        let title: String = fresh
            .query_row("SELECT title FROM tune WHERE id = 't-3'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title, "Old");
    }

    #[test]
    fn replay_skips_unknown_table_without_failing() {
        let fresh = Connection::open_in_memory().unwrap();
        schema::apply_ddl_manifest(&fresh).unwrap();
        let backup = OutboxBackup {
            version: BACKUP_VERSION,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            items: vec![BackupItem {
                table_name: "no_such_table".into(),
                row_id: "x".into(),
                operation: "INSERT".into(),
                changed_at: "2024-01-01T00:00:00.000Z".into(),
                row_data: Some(BTreeMap::new()),
            }],
        };
        let outcome = replay(&fresh, &backup).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn replay_composite_pk_delete() {
        let conn = fresh_installed();
        conn.execute(
            "INSERT INTO genre_tune_type (genre_id, tune_type_id, label) VALUES ('irish','jig','x')",
            [],
        )
        .unwrap();
        let backup = OutboxBackup {
            version: BACKUP_VERSION,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            items: vec![BackupItem {
                table_name: "genre_tune_type".into(),
                row_id: r#"{"genre_id":"irish","tune_type_id":"jig"}"#.into(),
                operation: "DELETE".into(),
                changed_at: "2024-01-01T00:00:00.000Z".into(),
                row_data: None,
            }],
        };
        let outcome = replay(&conn, &backup).unwrap();
        assert_eq!(outcome.applied, 1);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM genre_tune_type", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
