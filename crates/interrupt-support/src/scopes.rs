/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::{Interrupted, Interruptee};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Owns the shared counter behind a family of [`InterruptScope`]s.
///
/// Calling `interrupt()` bumps the counter, which invalidates every scope
/// created before the call (scopes created after it are unaffected, unless
/// `interrupt()` is called again). This is the generic form of what the
/// database lifecycle calls an "init epoch": `initEpoch` is just
/// `InterruptController::generation()`, and `ensureNotCleared()` is just
/// `scope.err_if_interrupted()`.
#[derive(Clone, Debug, Default)]
pub struct InterruptController {
    counter: Arc<AtomicUsize>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start a new scope. Anything that should observe future `interrupt()`
    /// calls as a cancellation signal should grab one of these at the start
    /// of its work and check it after every suspension point.
    #[inline]
    pub fn scope(&self) -> InterruptScope {
        InterruptScope {
            counter: Arc::clone(&self.counter),
            start_value: self.counter.load(Ordering::Relaxed),
        }
    }

    /// Invalidate every scope created before this call.
    #[inline]
    pub fn interrupt(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// The current generation number (monotonically increasing, bumped once
    /// per `interrupt()` call).
    #[inline]
    pub fn generation(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Scope for an interruptible operation, tied to one [`InterruptController`].
///
/// Basic usage:
///   - Call `controller.scope()` at the start of the operation.
///   - Re-check `err_if_interrupted()` after every `.await` / suspension
///     point, and bail out (without publishing any state) if it errors.
///   - Call `controller.interrupt()` from elsewhere to cancel every scope
///     outstanding at that moment.
///
/// This requires the guarded code to actively check — it can't reach into a
/// long-running SQLite query or a pending Promise and cancel it. For that,
/// pair it with a real cancellation primitive (e.g. `sqlite3_interrupt`).
#[derive(Clone, Debug)]
pub struct InterruptScope {
    counter: Arc<AtomicUsize>,
    start_value: usize,
}

impl InterruptScope {
    #[inline]
    fn was_interrupted(&self) -> bool {
        self.counter.load(Ordering::Relaxed) != self.start_value
    }

    #[inline]
    pub fn err_if_interrupted(&self) -> Result<(), Interrupted> {
        if self.was_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// The generation this scope was started at ("my epoch").
    #[inline]
    pub fn generation(&self) -> usize {
        self.start_value
    }
}

impl Interruptee for InterruptScope {
    fn was_interrupted(&self) -> bool {
        InterruptScope::was_interrupted(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_fresh_until_interrupted() {
        let ctrl = InterruptController::new();
        let scope = ctrl.scope();
        assert!(scope.err_if_interrupted().is_ok());
        ctrl.interrupt();
        assert_eq!(scope.err_if_interrupted(), Err(Interrupted));
    }

    #[test]
    fn interrupt_does_not_affect_later_scopes() {
        let ctrl = InterruptController::new();
        let scope = ctrl.scope();
        ctrl.interrupt();
        assert!(scope.err_if_interrupted().is_err());

        let later = ctrl.scope();
        assert!(later.err_if_interrupted().is_ok());
    }

    #[test]
    fn independent_controllers_do_not_interfere() {
        let a = InterruptController::new();
        let b = InterruptController::new();
        let scope_a = a.scope();
        let scope_b = b.scope();
        a.interrupt();
        assert!(scope_a.err_if_interrupted().is_err());
        assert!(scope_b.err_if_interrupted().is_ok());
    }
}
