//! Crypto payment requests and deposits.

use std::fmt::{self, Display};
use std::str::FromStr;

use common::amount::Amount;
use common::id::{
    CorrelationId, CryptoDepositId, CryptoRequestId, CustomerId, WalletId,
};
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rebate::ChargeSplit;

/// The supported crypto payment platforms. Webhook verification and the
/// deposit APIs are dispatched on this tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoPlatform {
    BitHide,
    OxaPay,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown crypto platform")]
pub struct UnknownPlatform;

impl CryptoPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitHide => "bithide",
            Self::OxaPay => "oxapay",
        }
    }
}

impl Display for CryptoPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoPlatform {
    type Err = UnknownPlatform;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bithide" => Ok(Self::BitHide),
            "oxapay" => Ok(Self::OxaPay),
            _ => Err(UnknownPlatform),
        }
    }
}

/// A chain transaction hash. Unique per [`CryptoDeposit`]; the idempotency
/// key against duplicate webhook delivery.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The crypto payment request state machine.
///
/// `credited`, `cancelled`, `expired`, and `failed` are final.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoRequestStatus {
    Created,
    AddressProvisioned,
    Pending,
    Underpaid,
    Expired,
    Confirmed,
    Credited,
    Cancelled,
    Failed,
}

impl CryptoRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AddressProvisioned => "address_provisioned",
            Self::Pending => "pending",
            Self::Underpaid => "underpaid",
            Self::Expired => "expired",
            Self::Confirmed => "confirmed",
            Self::Credited => "credited",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Credited | Self::Cancelled | Self::Expired | Self::Failed
        )
    }
}

/// A crypto charge attempt. Several [`CryptoDeposit`]s may map to one
/// request (under- or over-payment).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CryptoPaymentRequest {
    pub id: CryptoRequestId,
    pub uuid: Uuid,
    pub correlation_id: CorrelationId,
    pub customer_id: CustomerId,
    pub wallet_id: WalletId,
    /// The fiat value being purchased, in Toman.
    pub fiat_amount: Amount,
    pub coin: String,
    pub network: String,
    pub platform: CryptoPlatform,
    /// Decimal string straight from the provider; never parsed into a
    /// float.
    pub expected_coin_amount: Option<String>,
    pub exchange_rate: Option<String>,
    pub deposit_address: Option<String>,
    pub deposit_memo: Option<String>,
    pub provider_request_id: Option<String>,
    pub status: CryptoRequestStatus,
    pub status_reason: Option<String>,
    pub expires_at: Option<TimestampMs>,
    pub detected_at: Option<TimestampMs>,
    pub confirmed_at: Option<TimestampMs>,
    /// Set exactly once, by `credit_on_confirmed`; the guard that makes
    /// finalization idempotent.
    pub credited_at: Option<TimestampMs>,
    pub split: ChargeSplit,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Seen on-chain, confirmations still accumulating.
    Detected,
    /// Provider reports the deposit as final.
    Confirmed,
    /// Balance effects applied.
    Credited,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Confirmed => "confirmed",
            Self::Credited => "credited",
            Self::Failed => "failed",
        }
    }
}

/// An observed on-chain deposit towards a [`CryptoPaymentRequest`].
/// De-duplicated by `tx_hash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CryptoDeposit {
    pub id: CryptoDepositId,
    pub uuid: Uuid,
    pub correlation_id: CorrelationId,
    pub request_id: CryptoRequestId,
    pub customer_id: CustomerId,
    pub wallet_id: WalletId,
    pub coin: String,
    pub network: String,
    pub platform: CryptoPlatform,
    pub tx_hash: TxHash,
    pub from_address: Option<String>,
    pub to_address: String,
    pub destination_tag: Option<String>,
    /// Decimal string straight from the provider.
    pub amount_coin: String,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub status: DepositStatus,
    pub detected_at: TimestampMs,
    pub confirmed_at: Option<TimestampMs>,
    pub credited_at: Option<TimestampMs>,
    pub metadata: serde_json::Value,
}
