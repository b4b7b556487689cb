//! Distributed cache contract.
//!
//! The core uses the cache for three things: the audience-spec mirror, the
//! audience-spec writer lock, and password-reset OTP codes. The contract is
//! deliberately tiny so any Redis-shaped backend can satisfy it.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;

#[async_trait]
pub trait Cache: Send + Sync + 'static {
    /// Get the value at `key`, or [`None`] if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Unconditionally set `key`, with an optional TTL ([`None`] = no
    /// expiry).
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    /// Set `key` only if it is currently absent (or expired). Returns
    /// whether the set happened. This is the primitive behind the audience
    /// spec writer lock.
    async fn set_nx(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, Error>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), Error>;
}
