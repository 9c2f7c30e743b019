/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

mod conn_ext;
mod interrupt;
mod statements;

pub use conn_ext::*;
pub use interrupt::{bind_interrupt_scope, clear_interrupt_scope};
pub use statements::split_statements;

/// In `PRAGMA foo='bar'`, `'bar'` must be a constant string (it can't be a
/// bound parameter), so it must be escaped manually. The only character
/// SQLite requires escaping is the single quote, doubled.
pub fn escape_string_for_pragma(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_string_for_pragma() {
        assert_eq!(escape_string_for_pragma("foobar"), "foobar");
        assert_eq!(escape_string_for_pragma("'foo'bar'"), "''foo''bar''");
        assert_eq!(escape_string_for_pragma("''"), "''''");
    }
}
