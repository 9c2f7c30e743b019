/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `EngineLoader`: a singleton guarding the load of the embedded SQL
//! engine, plus the thin wrapper around `rusqlite`'s `serialize`/
//! `deserialize` support that gives us the opaque byte export a snapshot
//! is. There is no separate WASM-module fetch step to model on a
//! natively-linked SQLite, but the bounded-retry contract and the "never
//! torn down" cache are preserved so `DatabaseLifecycle` can treat this
//! the same way across hosts.

use crate::error::{Error, Result};
use rusqlite::{Connection, DatabaseName};
use std::sync::Mutex;

/// Small bound on load retries: a few attempts with a short delay rather
/// than failing outright on the first transient error.
const MAX_LOAD_ATTEMPTS: u32 = 3;

/// Opaque marker proving the engine module has been loaded. Cheap to clone;
/// carries no connection state of its own — each `UserDatabase` gets its own
/// `Connection`, the loader only guards the one-time module init.
#[derive(Debug, Clone, Copy)]
pub struct EngineModule {
    _private: (),
}

struct LoaderState {
    loaded: bool,
}

/// The process-wide engine loader. Deliberately the one true singleton in
/// this crate: resetting it on `clear()` is explicitly forbidden, to avoid
/// repeated WASM heap churn on a teardown/rebuild cycle.
pub struct EngineLoader {
    state: Mutex<LoaderState>,
}

impl Default for EngineLoader {
    fn default() -> Self {
        Self {
            state: Mutex::new(LoaderState { loaded: false }),
        }
    }
}

impl EngineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached engine module, loading it on first call. Never
    /// torn down afterwards, even across `clear()`.
    pub fn get_engine(&self) -> Result<EngineModule> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::EngineLoadFailed("loader mutex poisoned".into()))?;
        if state.loaded {
            return Ok(EngineModule { _private: () });
        }

        let mut last_err = None;
        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            match try_load_module() {
                Ok(()) => {
                    state.loaded = true;
                    return Ok(EngineModule { _private: () });
                }
                Err(e) if is_retryable(&e) && attempt < MAX_LOAD_ATTEMPTS => {
                    log::warn!(
                        "engine load attempt {attempt}/{MAX_LOAD_ATTEMPTS} failed, retrying: {e}"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(Error::EngineLoadFailed(e)),
            }
        }
        Err(Error::EngineLoadFailed(
            last_err.unwrap_or_else(|| "exhausted retries".into()),
        ))
    }
}

/// On a natively-linked SQLite there's nothing that can transiently fail
/// here; this exists so the retry scaffolding has a real call site, and so
/// a WASM backend can drop its `fetch`+`instantiate` call in without
/// touching `get_engine`'s contract.
fn try_load_module() -> std::result::Result<(), String> {
    Ok(())
}

fn is_retryable(_err: &str) -> bool {
    false
}

/// Opens a fresh, empty engine instance, to be populated from the ordered
/// DDL manifest.
pub fn open_fresh() -> Result<Connection> {
    Connection::open_in_memory().map_err(Error::Sql)
}

/// Instantiates an engine instance from a prior `export_snapshot` blob.
pub fn instantiate_from_snapshot(bytes: Vec<u8>) -> Result<Connection> {
    let mut conn = Connection::open_in_memory().map_err(Error::Sql)?;
    conn.deserialize(DatabaseName::Main, bytes)
        .map_err(Error::Sql)?;
    Ok(conn)
}

/// Produces the opaque byte export used as a snapshot.
pub fn export_snapshot(conn: &Connection) -> Result<Vec<u8>> {
    let data = conn.serialize(DatabaseName::Main).map_err(Error::Sql)?;
    Ok(data.to_vec())
}

/// Reopens exported bytes into a throwaway scratch connection purely to
/// sanity-check a persist's dev-only verification step; never used on the
/// live connection.
pub fn reopen_scratch(bytes: &[u8]) -> Result<Connection> {
    instantiate_from_snapshot(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_engine_is_idempotent() {
        let loader = EngineLoader::new();
        let a = loader.get_engine().unwrap();
        let b = loader.get_engine().unwrap();
        let _ = (a, b);
    }

    #[test]
    fn snapshot_round_trips_schema_and_rows() {
        let conn = open_fresh().unwrap();
        conn.execute_batch("CREATE TABLE t(id TEXT PRIMARY KEY, v TEXT); INSERT INTO t VALUES ('a','1');")
            .unwrap();
        let bytes = export_snapshot(&conn).unwrap();
        let restored = instantiate_from_snapshot(bytes).unwrap();
        let v: String = restored
            .query_row("SELECT v FROM t WHERE id = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, "1");
    }
}
