/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `RuntimeBinding`: the single configuration object published to the
//! upstream sync engine, collecting everything it needs from this core
//! without reaching back into `DatabaseLifecycle` internals.

use crate::error::Result;
use crate::lifecycle::{DatabaseLifecycle, EngineHandle, Handle};
use crate::outbox::{OutboxBackup, ReplayOutcome};
use crate::registry::{table_sync_order, SyncableTable, SYNCABLE_TABLES};
use std::sync::Arc;

/// The per-user blob-store key names the sync engine may need for its own
/// diagnostics.
#[derive(Debug, Clone)]
pub struct SchemaKeyMapping {
    pub db_key: String,
    pub version_key: String,
    pub backup_key: String,
}

pub struct RuntimeBinding {
    lifecycle: Arc<DatabaseLifecycle>,
    user_id: String,
}

impl RuntimeBinding {
    pub fn new(lifecycle: Arc<DatabaseLifecycle>, handle: &Handle) -> Self {
        Self {
            lifecycle,
            user_id: handle.user_id.clone(),
        }
    }

    pub fn syncable_table_registry(&self) -> &'static [SyncableTable] {
        SYNCABLE_TABLES
    }

    pub fn table_sync_order(&self) -> Vec<&'static str> {
        table_sync_order()
    }

    pub fn schema_key_mapping(&self) -> SchemaKeyMapping {
        SchemaKeyMapping {
            db_key: crate::versioning::db_key(&self.user_id),
            version_key: crate::versioning::version_key(&self.user_id),
            backup_key: crate::versioning::backup_key(&self.user_id),
        }
    }

    /// A handle to the `sync_push_queue` table: there's nothing to wrap
    /// beyond the table name, since all reads/writes happen through the
    /// raw engine connection this binding already exposes.
    pub fn push_queue_table_name(&self) -> &'static str {
        "sync_push_queue"
    }

    pub async fn raw_engine(&self) -> Option<EngineHandle> {
        self.lifecycle.get_raw_engine().await
    }

    pub async fn load_outbox_backup(&self) -> Result<Option<OutboxBackup>> {
        self.lifecycle.load_outbox_backup(&self.user_id).await
    }

    pub async fn save_outbox_backup(&self, backup: &OutboxBackup) -> Result<()> {
        self.lifecycle.save_outbox_backup(&self.user_id, backup).await
    }

    pub async fn clear_outbox_backup(&self) -> Result<()> {
        self.lifecycle.clear_outbox_backup(&self.user_id).await
    }

    pub fn replay_outbox_backup(&self, handle: &Handle, backup: &OutboxBackup) -> Result<ReplayOutcome> {
        self.lifecycle.replay_outbox_backup(handle, backup)
    }

    pub async fn suppress_triggers(&self) -> Result<()> {
        self.lifecycle.suppress_triggers().await
    }

    pub async fn enable_triggers(&self) -> Result<()> {
        self.lifecycle.enable_triggers().await
    }

    pub async fn are_triggers_suppressed(&self) -> Result<bool> {
        self.lifecycle.are_triggers_suppressed().await
    }

    pub async fn persist(&self) -> Result<()> {
        self.lifecycle.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::HostConfig;

    #[tokio::test]
    async fn publishes_table_sync_order_and_schema_keys() {
        let lifecycle = Arc::new(DatabaseLifecycle::new(HostConfig {
            automated_test_mode: true,
            ..Default::default()
        }));
        let handle = lifecycle.initialize("u1").await.unwrap();
        let binding = RuntimeBinding::new(lifecycle, &handle);

        assert_eq!(
            binding.table_sync_order(),
            vec!["tune", "playlist", "practice_record", "genre_tune_type"]
        );
        let keys = binding.schema_key_mapping();
        assert_eq!(keys.db_key, "dbPrefix-u1");
        assert_eq!(keys.backup_key, "outboxBackupPrefix-u1");
    }

    #[tokio::test]
    async fn raw_engine_is_available_after_init() {
        let lifecycle = Arc::new(DatabaseLifecycle::new(HostConfig {
            automated_test_mode: true,
            ..Default::default()
        }));
        let handle = lifecycle.initialize("u1").await.unwrap();
        let binding = RuntimeBinding::new(lifecycle, &handle);
        assert!(binding.raw_engine().await.is_some());
    }
}
