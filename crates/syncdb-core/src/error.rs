/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Error kinds for the database lifecycle.
//!
//! `BackupReplayItemError` and the persist-verification mismatch are *not*
//! here: both are soft failures that never propagate to a caller, so
//! they're plain structs living in [`crate::outbox`] and [`crate::lifecycle`]
//! respectively, collected or logged instead of raised.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `getHandle()` called before a successful `initialize()`.
    #[error("database is not initialized")]
    NotInitialized,

    /// `getHandle()` called while a `clear()` is in flight.
    #[error("database is clearing")]
    Clearing,

    /// `initialize()` was interrupted by a concurrent `clear()`.
    #[error("initialize was aborted by a concurrent clear")]
    InitAborted,

    /// The embedded SQL engine could not be loaded after bounded retry.
    #[error("engine load failed: {0}")]
    EngineLoadFailed(String),

    /// A migration script failed. Fatal for `initialize()`.
    #[error("DDL migration failed: {0}")]
    DdlFailed(#[source] rusqlite::Error),

    /// Trigger installation failed. Fatal for `initialize()`.
    #[error("trigger install failed: {0}")]
    TriggerInstallFailed(#[source] rusqlite::Error),

    /// `PersistentBlobStore` operation exceeded its timeout budget.
    #[error("blob store operation timed out")]
    StoreTimeout,

    /// `PersistentBlobStore` open was blocked by another connection.
    #[error("blob store open was blocked by another open connection")]
    StoreBlocked,

    /// Any other `PersistentBlobStore` I/O failure.
    #[error("blob store I/O error: {0}")]
    StoreIo(String),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// A short, PII-free label identifying the error kind, for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Error::NotInitialized => "NotInitialized",
            Error::Clearing => "Clearing",
            Error::InitAborted => "InitAborted",
            Error::EngineLoadFailed(_) => "EngineLoadFailed",
            Error::DdlFailed(_) => "DdlFailed",
            Error::TriggerInstallFailed(_) => "TriggerInstallFailed",
            Error::StoreTimeout => "StoreTimeout",
            Error::StoreBlocked => "StoreBlocked",
            Error::StoreIo(_) => "StoreIo",
            Error::Sql(_) => "Sql",
            Error::Json(_) => "Json",
        }
    }
}
