//! The business-logic core of the Peyk SMS advertising platform.
//!
//! Customers fund a wallet via fiat or crypto charges, create targeted SMS
//! campaigns against the audience catalog, and receive rebates mediated by
//! their referring agency. Administrators approve campaigns; execution bots
//! run approved campaigns and report back.
//!
//! The crate is persistence- and transport-agnostic: it consumes the
//! [`repo::Store`] transactional contract, the [`cache::Cache`] distributed
//! cache contract, the [`notify::Notifier`] contract, and the payment
//! gateway / crypto provider contracts in [`fiat`] and [`crypto`]. HTTP
//! routing, password hashing, JWT issuance, and SMS dispatch workers live in
//! other services.

/// Best-effort audit records.
pub mod audit;
/// The shared audience-spec catalog: file + cache + distributed lock.
pub mod audience;
/// Distributed cache contract.
pub mod cache;
/// Campaign lifecycle engine, pricing, capacity.
pub mod campaign;
/// Process configuration aggregate.
pub mod config;
/// Crypto payment flow and providers.
pub mod crypto;
/// Agency discount management.
pub mod discounts;
/// Sentinel error kinds and the `BusinessError` wrapper.
pub mod error;
/// Fiat payment flow and the gateway client.
pub mod fiat;
/// The wallet ledger: snapshots, transactions, spend ordering.
pub mod ledger;
/// Domain entities.
pub mod models;
/// Fire-and-forget notifications.
pub mod notify;
/// Password-reset OTP codes.
pub mod otp;
/// Agency rebate calculator.
pub mod rebate;
/// Transactional repository contract.
pub mod repo;
/// In-memory store, fake gateway and providers.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
mod scenario_tests;
