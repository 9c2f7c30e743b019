/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Offline-first, per-user embedded storage and outbound change-capture
//! core.
//!
//! A durable local relational store (an embedded SQL engine with periodic
//! snapshotting to a key-value blob store) paired with a trigger-driven
//! push queue that records every local mutation as a replayable change
//! event for an external sync engine to reconcile against a remote
//! authority. See [`lifecycle::DatabaseLifecycle`] for the orchestrating
//! entry point and [`runtime_binding::RuntimeBinding`] for what gets
//! published to that external sync engine.

pub mod auto_persist;
pub mod blob_store;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod outbox;
pub mod registry;
pub mod runtime_binding;
pub mod schema;
pub mod triggers;
mod util;
pub mod versioning;

pub use error::{Error, Result};
pub use lifecycle::{DatabaseLifecycle, DebugState, EngineHandle, Handle, HostConfig};
pub use runtime_binding::RuntimeBinding;
