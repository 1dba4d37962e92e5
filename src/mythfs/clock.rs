//! The Myth epoch clock.
//!
//! All on-disk timestamps are stored as seconds since `2009-05-07T00:00:00Z`,
//! not the Unix epoch. This offset is the distance between the two epochs,
//! computed once as a constant rather than recomputed on every call.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the Myth epoch (`2009-05-07T00:00:00Z`).
const MYTH_EPOCH_OFFSET: u64 = 1_241_654_400;

/// Returns the number of seconds elapsed since the Myth epoch.
///
/// Panics if the system clock reports a time before the Myth epoch, which
/// cannot happen on a correctly configured host since the Myth epoch
/// predates any system this tool runs on.
pub fn now() -> u64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock panic")
        .as_secs();
    unix.saturating_sub(MYTH_EPOCH_OFFSET)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn now_is_nonzero_and_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
        // Sanity: today is well past the Myth epoch.
        assert!(a > 0);
    }
}
