//! # Utility Functions
//!
//! Small helpers shared across the messaging runtime's components.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as nanoseconds since the Unix epoch, used to timestamp
/// published envelopes and `GET_SERVER_TIME` replies.
///
/// Returns 0 if the system clock is set before the epoch rather than
/// panicking.
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_timestamp_ns_is_nonzero_and_monotonic_enough() {
        let first = current_timestamp_ns();
        let second = current_timestamp_ns();
        assert!(first > 0);
        assert!(second >= first);
    }
}
