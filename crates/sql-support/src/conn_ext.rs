/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{
    types::{FromSql, ToSql},
    Connection, Result as SqlResult, Row, Savepoint, Transaction, TransactionBehavior,
};
use std::ops::Deref;
use std::time::Instant;

/// This trait exists so the helpers below work on `rusqlite::{Connection,
/// Transaction, Savepoint}` alike. You must `use sql_support::ConnExt` to
/// get access to them.
pub trait ConnExt {
    fn conn(&self) -> &Connection;

    /// Execute every statement in `stmts`, in order.
    fn execute_all(&self, stmts: &[&str]) -> SqlResult<()> {
        let conn = self.conn();
        for sql in stmts {
            conn.execute_batch(sql)?;
        }
        Ok(())
    }

    /// Prepare-cached + execute with named params.
    fn execute_cached(&self, sql: &str, params: &[(&str, &dyn ToSql)]) -> SqlResult<usize> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        stmt.execute(params)
    }

    /// Run a `PRAGMA name = value` with a value that isn't a bound
    /// parameter (SQLite doesn't allow binding pragma values).
    fn set_pragma<T: std::fmt::Display>(&self, name: &str, value: T) -> SqlResult<()> {
        self.conn()
            .execute_batch(&format!("PRAGMA {name} = {value}"))
    }

    /// Run a query expected to return exactly one row with one column.
    fn query_one<T: FromSql>(&self, sql: &str) -> SqlResult<T> {
        self.conn().query_row(sql, [], |row| row.get(0))
    }

    /// Like `query_row`, but with named params and a `None` result instead of
    /// an error when there's no matching row.
    fn try_query_row<T, E, F>(
        &self,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
        mapper: F,
        cache: bool,
    ) -> Result<Option<T>, E>
    where
        Self: Sized,
        E: From<rusqlite::Error>,
        F: FnOnce(&Row<'_>) -> Result<T, E>,
    {
        let conn = self.conn();
        let mut stmt = if cache {
            conn.prepare_cached(sql)?
        } else {
            conn.prepare(sql)?
        };
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => Ok(Some(mapper(row)?)),
        }
    }

    fn unchecked_transaction(&self) -> SqlResult<UncheckedTransaction<'_>> {
        UncheckedTransaction::new(self.conn(), TransactionBehavior::Deferred)
    }
}

impl ConnExt for Connection {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

impl ConnExt for Transaction<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

impl ConnExt for Savepoint<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

/// rusqlite requires a `&mut Connection` to start a `Transaction`, which is
/// awkward when a `&Connection` is all that's on hand (e.g. behind an
/// `Arc`/`Mutex` that only ever exposes shared references). This offers an
/// alternative built on raw `BEGIN`/`COMMIT`/`ROLLBACK` statements - the
/// caller is responsible for not nesting these (hence "unchecked").
pub struct UncheckedTransaction<'conn> {
    conn: &'conn Connection,
    started_at: Instant,
}

impl<'conn> UncheckedTransaction<'conn> {
    pub fn new(conn: &'conn Connection, behavior: TransactionBehavior) -> SqlResult<Self> {
        let query = match behavior {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
            _ => "BEGIN DEFERRED",
        };
        conn.execute_batch(query)?;
        Ok(Self {
            conn,
            started_at: Instant::now(),
        })
    }

    pub fn commit(self) -> SqlResult<()> {
        self.conn.execute_batch("COMMIT")?;
        log::trace!("transaction committed after {:?}", self.started_at.elapsed());
        std::mem::forget(self);
        Ok(())
    }

    pub fn rollback(self) -> SqlResult<()> {
        self.rollback_()?;
        std::mem::forget(self);
        Ok(())
    }

    fn rollback_(&self) -> SqlResult<()> {
        self.conn.execute_batch("ROLLBACK")
    }
}

impl Deref for UncheckedTransaction<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for UncheckedTransaction<'_> {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            if let Err(e) = self.rollback_() {
                log::warn!("error rolling back unchecked transaction on drop: {e}");
            }
        }
    }
}

impl ConnExt for UncheckedTransaction<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_all_runs_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_all(&[
            "CREATE TABLE t(a INTEGER)",
            "INSERT INTO t(a) VALUES (1)",
            "INSERT INTO t(a) VALUES (2)",
        ])
        .unwrap();
        let count: i64 = conn.query_one("SELECT count(*) FROM t").unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn unchecked_transaction_rolls_back_on_drop() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a INTEGER)").unwrap();
        {
            let tx = conn.unchecked_transaction().unwrap();
            tx.execute_cached("INSERT INTO t(a) VALUES (1)", &[]).unwrap();
            // dropped without commit
        }
        let count: i64 = conn.query_one("SELECT count(*) FROM t").unwrap();
        assert_eq!(count, 0);
    }
}
