//! Typed identifiers.
//!
//! Every persisted entity carries a monotone `i64` row id (assigned by the
//! store) plus an opaque uuid. Ledger rows additionally carry a
//! [`CorrelationId`] shared across all rows produced by one logical
//! operation. The newtypes below exist so that a `CampaignId` can never be
//! passed where a `WalletId` was expected.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! row_id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[derive(Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }
    };
}

row_id_newtype!(CustomerId);
row_id_newtype!(WalletId);
row_id_newtype!(SnapshotId);
row_id_newtype!(LedgerTxId);
row_id_newtype!(CampaignId);
row_id_newtype!(AgencyDiscountId);
row_id_newtype!(PaymentRequestId);
row_id_newtype!(CryptoRequestId);
row_id_newtype!(CryptoDepositId);
row_id_newtype!(LineNumberId);
row_id_newtype!(SegmentFactorId);
row_id_newtype!(AuditRecordId);

/// The uuid shared across all ledger rows (snapshots + transactions,
/// possibly spanning several wallets) produced by one logical operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh correlation id for a new logical operation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn row_ids_are_transparent_i64() {
        let id = CampaignId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(serde_json::from_str::<CampaignId>("42").unwrap(), id);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn correlation_id_string_roundtrip() {
        let cid = CorrelationId::generate();
        let parsed = CorrelationId::from_str(&cid.to_string()).unwrap();
        assert_eq!(cid, parsed);
    }
}
