/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The static `SYNCABLE_TABLES` registry: table-shape metadata that drives
//! trigger generation and row-id encoding, without any runtime reflection
//! over the schema.

/// A table's primary key: either a single column, or an ordered set of
/// columns for a composite key. Order matters for composite keys — it's
/// the key order the encoded row id's JSON object must use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(&'static str),
    Composite(&'static [&'static str]),
}

impl PrimaryKey {
    pub fn columns(&self) -> &[&'static str] {
        match self {
            PrimaryKey::Single(c) => std::slice::from_ref(c),
            PrimaryKey::Composite(cs) => cs,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, PrimaryKey::Composite(_))
    }
}

/// Whether clearing a table for a schema migration should delete its
/// rows, or leave it alone as static reference data. The registry is
/// exactly the place this per-table policy belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationClearPolicy {
    /// User-owned data: deleted by `clearLocalForMigration`.
    ClearOnMigration,
    /// Static reference data (e.g. a lookup table seeded by DDL): preserved.
    PreserveOnMigration,
}

#[derive(Debug, Clone)]
pub struct SyncableTable {
    pub name: &'static str,
    pub primary_key: PrimaryKey,
    pub supports_incremental: bool,
    pub migration_clear_policy: MigrationClearPolicy,
}

/// The registry entries. Kept as a plain `const` slice (not a `HashMap`) so
/// it's trivially `'static` and iterable without any lazy init — the same
/// reason `places`'s own schema constants are plain `&str`/`&[&str]`
/// rather than loaded structures.
pub const SYNCABLE_TABLES: &[SyncableTable] = &[
    SyncableTable {
        name: "tune",
        primary_key: PrimaryKey::Single("id"),
        supports_incremental: true,
        migration_clear_policy: MigrationClearPolicy::ClearOnMigration,
    },
    SyncableTable {
        name: "playlist",
        primary_key: PrimaryKey::Single("id"),
        supports_incremental: true,
        migration_clear_policy: MigrationClearPolicy::ClearOnMigration,
    },
    SyncableTable {
        name: "practice_record",
        primary_key: PrimaryKey::Single("id"),
        supports_incremental: true,
        migration_clear_policy: MigrationClearPolicy::ClearOnMigration,
    },
    SyncableTable {
        name: "genre_tune_type",
        primary_key: PrimaryKey::Composite(&["genre_id", "tune_type_id"]),
        supports_incremental: false,
        migration_clear_policy: MigrationClearPolicy::PreserveOnMigration,
    },
];

pub fn find_table(name: &str) -> Option<&'static SyncableTable> {
    SYNCABLE_TABLES.iter().find(|t| t.name == name)
}

/// The order consumers of the push queue should apply table syncs in, so
/// foreign-key-like relationships (a playlist referencing tunes, a
/// practice record referencing a tune) land in a sane order. Published to
/// the upstream sync engine via `RuntimeBinding`.
pub fn table_sync_order() -> Vec<&'static str> {
    SYNCABLE_TABLES.iter().map(|t| t.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_pk_columns_keep_declared_order() {
        let t = find_table("genre_tune_type").unwrap();
        assert_eq!(t.primary_key.columns(), &["genre_id", "tune_type_id"]);
        assert!(t.primary_key.is_composite());
    }

    #[test]
    fn single_pk_is_not_composite() {
        let t = find_table("tune").unwrap();
        assert!(!t.primary_key.is_composite());
        assert_eq!(t.primary_key.columns(), &["id"]);
    }

    #[test]
    fn unknown_table_is_none() {
        assert!(find_table("no_such_table").is_none());
    }
}
