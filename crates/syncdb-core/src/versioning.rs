/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The `CURRENT_SCHEMA_VERSION` constant, stored-version tracking over the
//! blob store's version key, and the migration-needed / forced-reset
//! computation.

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::registry::{MigrationClearPolicy, SYNCABLE_TABLES};
use rusqlite::Connection;

/// Bumped whenever a DDL change requires every stored snapshot to be
/// recreated rather than patched in place.
pub const CURRENT_SCHEMA_VERSION: u8 = 2;

pub fn version_key(user_id: &str) -> String {
    format!("dbVersionPrefix-{user_id}")
}

pub fn db_key(user_id: &str) -> String {
    format!("dbPrefix-{user_id}")
}

pub fn backup_key(user_id: &str) -> String {
    format!("outboxBackupPrefix-{user_id}")
}

/// Host-observable signals that decide whether a migration is needed.
/// `forced_reset` models an external flag indicating the user requested a
/// full wipe (e.g. a URL parameter in a browser host) — kept here as a
/// plain field rather than reaching into a concrete host API, since the
/// mechanism is source-agnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationSignals {
    pub forced_reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationState {
    pub needs_migration: bool,
    pub forced_reset: bool,
}

pub async fn get_stored(store: &dyn BlobStore, user_id: &str) -> Result<Option<u8>> {
    let bytes = store.load(&version_key(user_id)).await?;
    Ok(bytes.and_then(|b| b.first().copied()))
}

pub async fn set_stored(store: &dyn BlobStore, user_id: &str, version: u8) -> Result<()> {
    store.save(&version_key(user_id), vec![version]).await
}

pub async fn clear_stored(store: &dyn BlobStore, user_id: &str) -> Result<()> {
    store.delete(&version_key(user_id)).await
}

/// Combines `needs_migration`/`forced_reset` into one lookup.
pub async fn compute_migration_state(
    store: &dyn BlobStore,
    user_id: &str,
    signals: MigrationSignals,
) -> Result<MigrationState> {
    let stored = get_stored(store, user_id).await?;
    let needs_migration =
        signals.forced_reset || stored.map(|v| v < CURRENT_SCHEMA_VERSION).unwrap_or(true);
    Ok(MigrationState {
        needs_migration,
        forced_reset: signals.forced_reset,
    })
}

/// Deletes user-owned rows across syncable tables, preserving any table
/// whose registry entry says to: the per-table policy lives on
/// [`crate::registry::SyncableTable::migration_clear_policy`].
pub fn clear_local_for_migration(conn: &Connection) -> Result<()> {
    for table in SYNCABLE_TABLES {
        if table.migration_clear_policy == MigrationClearPolicy::ClearOnMigration {
            conn.execute(&format!("DELETE FROM {}", table.name), [])?;
        }
    }
    Ok(())
}
