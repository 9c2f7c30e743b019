/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Helpers for managing "interruptable" and "epoch-gated" operations across
//! this workspace's crates.
//!
//! Unlike a process-wide interrupt counter, [`InterruptController`] is
//! instance-scoped: each owner (a `DatabaseLifecycle`, a SQLite connection
//! wrapper, a test fixture) gets its own counter, so unrelated lifecycles
//! never interrupt each other.

mod scopes;

pub use scopes::{InterruptController, InterruptScope};

/// Something that is interruptable. In practice this will be `Sync + Send`:
/// created on one thread, `.interrupt()` called from another (or from a
/// callback on the same thread, for the single-threaded-cooperative case this
/// workspace mostly runs under).
pub trait Interruptable {
    fn interrupt(&self);
}

/// Decoupled from `Interruptable` so code that wants to check "was I
/// interrupted" doesn't need to know about the interrupt mechanics.
pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.was_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A convenience implementation that's never interrupted. Only for tests.
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// The error returned by `err_if_interrupted`.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
#[error("the operation was interrupted")]
pub struct Interrupted;
