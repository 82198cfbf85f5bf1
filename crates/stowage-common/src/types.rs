//! Core type definitions for Stowage
//!
//! Tenancy identifiers and the sentinel values used when a piece of record
//! metadata is not known (for example after decoding an older wire format).

/// Account that owns a record
pub type AccountId = i16;

/// Container (within an account) that owns a record
pub type ContainerId = i16;

/// Account id reported when the owning account is not known
pub const UNKNOWN_ACCOUNT_ID: AccountId = -1;

/// Container id reported when the owning container is not known
pub const UNKNOWN_CONTAINER_ID: ContainerId = -1;

/// Timestamp meaning "never" (expiration) or "not recorded" (operation time)
pub const INFINITE_TIME: i64 = -1;

/// Check whether a millisecond timestamp carries a real value
#[must_use]
pub const fn is_finite_time(time_ms: i64) -> bool {
    time_ms != INFINITE_TIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_time() {
        assert!(!is_finite_time(INFINITE_TIME));
        assert!(is_finite_time(0));
        assert!(is_finite_time(1_700_000_000_000));
    }
}
