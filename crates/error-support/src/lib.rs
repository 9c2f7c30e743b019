/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Helpers for components to "handle" errors: log them at the right level
//! and, for the ones worth surfacing, format them consistently.
//!
//! This is a trimmed sibling of `components/support/error`: that crate's
//! `handle_error` attribute macro and its reporting hooks exist to bridge
//! Rust errors across a `uniffi` FFI boundary into Kotlin/Swift. Nothing in
//! this workspace crosses an FFI boundary (the UI layer is out of scope), so
//! there's no `ApiResult`/`#[handle_error]` here — just the logging half.

/// Describes what logging action should be taken for an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorReporting {
    pub log_level: Option<log::Level>,
}

/// Specifies how an "internal" error should be logged on its way out of a
/// component boundary.
pub struct ErrorHandling<E> {
    pub err: E,
    pub reporting: ErrorReporting,
}

impl<E> ErrorHandling<E> {
    /// Convert without any special logging.
    pub fn passthrough(err: E) -> Self {
        Self {
            err,
            reporting: ErrorReporting::default(),
        }
    }

    /// Convert and log at the given level.
    pub fn log(err: E, level: log::Level) -> Self {
        Self {
            err,
            reporting: ErrorReporting {
                log_level: Some(level),
            },
        }
    }

    /// Convert and log as a warning — used for errors that are expected
    /// under some race conditions (e.g. `InitAborted` racing a concurrent
    /// `clear()`).
    pub fn warn(err: E) -> Self {
        Self::log(err, log::Level::Warn)
    }

    /// Convert and log as an error — used for failures with no benign
    /// explanation.
    pub fn unexpected(err: E) -> Self {
        Self::log(err, log::Level::Error)
    }

    /// Apply the logging side-effect and hand back the plain error.
    pub fn take(self, context: &str) -> E {
        if let Some(level) = self.reporting.log_level {
            log::log!(level, "{context}: {}", DisplayErr(&self.err));
        }
        self.err
    }
}

// A tiny shim so `ErrorHandling<E>::take` doesn't need `E: std::fmt::Display`
// at the type-parameter level for callers that only have `Debug`.
struct DisplayErr<'a, E>(&'a E);

impl<'a, E: std::fmt::Display> std::fmt::Display for DisplayErr<'a, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Log a component-internal error that doesn't propagate anywhere (a
/// best-effort side channel, e.g. a failed outbox backup or a persist
/// verification mismatch). Mirrors `report_error!` from
/// `components/support/error`, minus the external error-reporter hook this
/// workspace has no use for.
#[macro_export]
macro_rules! report_error {
    ($label:expr, $($arg:tt)*) => {
        log::warn!(target: $label, $($arg)*)
    };
}
