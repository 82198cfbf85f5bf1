//! Record metadata

use crate::key::StoreKey;
use stowage_common::{
    AccountId, ContainerId, INFINITE_TIME, UNKNOWN_ACCOUNT_ID, UNKNOWN_CONTAINER_ID, is_finite_time,
};

/// Descriptive metadata for one stored record
///
/// Record boundaries are not recorded in segments, so this travels next to
/// the record's [`Offset`](crate::Offset) wherever the record is addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageInfo<K> {
    /// Record key
    pub key: K,
    /// Record size in bytes
    pub size: u64,
    /// Whether the record is a delete marker
    pub is_deleted: bool,
    /// Expiration time, or [`INFINITE_TIME`] for never
    pub expiration_time_ms: i64,
    /// Checksum, known only for freshly written metadata
    pub crc: Option<u64>,
    /// Owning account
    pub account_id: AccountId,
    /// Owning container
    pub container_id: ContainerId,
    /// When the record was written, or [`INFINITE_TIME`] if not recorded
    pub operation_time_ms: i64,
}

impl<K: StoreKey> MessageInfo<K> {
    /// Metadata with only key, size and expiration known
    #[must_use]
    pub fn new(key: K, size: u64, expiration_time_ms: i64) -> Self {
        Self {
            key,
            size,
            is_deleted: false,
            expiration_time_ms,
            crc: None,
            account_id: UNKNOWN_ACCOUNT_ID,
            container_id: UNKNOWN_CONTAINER_ID,
            operation_time_ms: INFINITE_TIME,
        }
    }

    /// Set owning account and container
    #[must_use]
    pub fn with_tenancy(mut self, account_id: AccountId, container_id: ContainerId) -> Self {
        self.account_id = account_id;
        self.container_id = container_id;
        self
    }

    /// Set the checksum
    #[must_use]
    pub fn with_crc(mut self, crc: u64) -> Self {
        self.crc = Some(crc);
        self
    }

    /// Set the operation time
    #[must_use]
    pub fn with_operation_time(mut self, operation_time_ms: i64) -> Self {
        self.operation_time_ms = operation_time_ms;
        self
    }

    /// Mark as a delete marker
    #[must_use]
    pub fn deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = is_deleted;
        self
    }

    /// Whether the record never expires
    #[must_use]
    pub const fn never_expires(&self) -> bool {
        !is_finite_time(self.expiration_time_ms)
    }

    /// Whether the record has expired at `now_ms`
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        !self.never_expires() && self.expiration_time_ms < now_ms
    }
}
