//! Domain entities.
//!
//! All monetary fields are [`common::amount::Amount`] (integer Toman).
//! Every persisted entity carries a store-assigned monotone row id plus an
//! opaque uuid; ledger rows additionally carry the correlation id of the
//! logical operation that produced them.

pub mod audience;
pub mod audit;
pub mod campaign;
pub mod crypto;
pub mod customer;
pub mod fiat;
pub mod wallet;
