/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use interrupt_support::InterruptScope;
use rusqlite::Connection;

/// Wires a [`InterruptScope`] into `conn`'s SQLite-level progress handler,
/// so a long-running statement aborts with `SQLITE_INTERRUPT` as soon as
/// `scope`'s controller is interrupted, rather than only being noticed at
/// the next Rust-level `err_if_interrupted()` checkpoint between
/// statements.
///
/// `n_ops = 1` means the handler is polled after (approximately) every
/// virtual-machine instruction SQLite executes; this crate's DDL and
/// per-row trigger statements are small enough that the extra call
/// overhead doesn't matter, and the responsiveness is worth it given a
/// migration script is exactly the kind of suspension point a concurrent
/// `clear()` needs to cut short quickly.
pub fn bind_interrupt_scope(conn: &Connection, scope: InterruptScope) {
    conn.progress_handler(1, Some(move || scope.err_if_interrupted().is_err()));
}

/// Removes any progress handler previously installed by
/// [`bind_interrupt_scope`]. Connections are per-`UserDatabase` and
/// short-lived relative to a scope's lifetime, so this is mostly useful in
/// tests that reuse one connection across scopes.
pub fn clear_interrupt_scope(conn: &Connection) {
    conn.progress_handler(1, None::<fn() -> bool>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use interrupt_support::InterruptController;

    #[test]
    fn interrupted_scope_aborts_a_running_query() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a INTEGER);").unwrap();

        let controller = InterruptController::new();
        let scope = controller.scope();
        bind_interrupt_scope(&conn, scope);
        controller.interrupt();

        let result = conn.execute_batch(
            "WITH RECURSIVE counter(x) AS (
                 SELECT 1 UNION ALL SELECT x + 1 FROM counter LIMIT 100000000
             ) INSERT INTO t SELECT x FROM counter;",
        );
        assert!(result.is_err());
    }

    #[test]
    fn uninterrupted_scope_does_not_abort() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a INTEGER)").unwrap();

        let controller = InterruptController::new();
        let scope = controller.scope();
        bind_interrupt_scope(&conn, scope);

        conn.execute("INSERT INTO t(a) VALUES (1)", []).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
