/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/// Split a DDL script on `;` statement boundaries, dropping `--`-comment-only
/// and empty segments. Used by `schema::apply_ddl_manifest` to turn a named
/// migration script into an ordered list of statements to execute.
///
/// This is intentionally simple (no string-literal-aware `;` scanning): the
/// DDL manifest is authored by us, not derived from user input, so a `;`
/// inside a string literal is something we'd catch immediately in review.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .filter(|stmt| !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(stmt: &str) -> bool {
    stmt.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}
