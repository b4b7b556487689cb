//! Shared foundation types for Peyk services.
//!
//! Everything in this crate is domain-agnostic plumbing: monetary amounts,
//! timestamps, typed ids, banking identifiers, and test utilities. Business
//! logic lives in `peyk-ads`.

/// Integer Toman amounts.
pub mod amount;
/// Shared constants: amount bounds, deadlines, cache key shapes.
pub mod constants;
/// Typed row ids and uuids.
pub mod id;
/// Iranian mobile numbers.
pub mod mobile;
/// Sheba (IBAN) numbers.
pub mod sheba;
/// `PeykTask`, a must-use [`tokio::task::JoinHandle`] wrapper.
pub mod task;
/// Proptest strategies and roundtrip harnesses.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
/// Millisecond unix timestamps.
pub mod time;
