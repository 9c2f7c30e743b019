/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

/// `changed_at` / `created_at` timestamps are stable, millisecond-resolution
/// ISO-8601 with a literal `Z` suffix, the same shape `nimbus-core`'s
/// `behavior::Utc::now()` timestamps get when serialized.
pub fn now_iso_ms() -> String {
    system_time_to_iso_ms(SystemTime::now())
}

pub fn system_time_to_iso_ms(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A unique trigger-emitted push-queue item id: 16 random bytes, rendered
/// as 32 lower-case hex characters.
pub fn random_hex32() -> String {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(not(feature = "wasm"))]
fn fill_random(buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[cfg(feature = "wasm")]
fn fill_random(buf: &mut [u8]) {
    // `getrandom`'s "js" backend reads from `crypto.getRandomValues` in a
    // browser/worker context, which is what we're compiled for here.
    getrandom::getrandom(buf).expect("crypto.getRandomValues unavailable");
}

/// Turns on logging for a single test run, same trick `logins`' and
/// `logins-sql`'s `util::init_test_logging` use: a process-wide `Once` so
/// repeated calls across the suite's tests don't panic on double-init.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT_LOGGING: Once = Once::new();
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn formats_known_instant() {
        // 2024-01-02T03:04:05.678Z
        let secs = 1_704_164_645i64;
        let s = system_time_to_iso_ms(UNIX_EPOCH + std::time::Duration::from_millis(secs as u64 * 1000 + 678));
        assert_eq!(s, "2024-01-02T03:04:05.678Z");
    }

    #[test]
    fn epoch_is_correct() {
        let s = system_time_to_iso_ms(UNIX_EPOCH);
        assert_eq!(s, "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn random_hex32_is_well_formed_and_unique() {
        let a = random_hex32();
        let b = random_hex32();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }
}
