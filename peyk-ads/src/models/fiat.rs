//! Fiat payment requests and gateway callback types.

use common::amount::Amount;
use common::id::{CorrelationId, CustomerId, PaymentRequestId, WalletId};
use common::mobile::Mobile;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rebate::ChargeSplit;

/// The fiat payment request state machine.
///
/// ```text
/// created -> tokenized -> pending -> completed
///                                 -> cancelled
///                                 -> failed
///                                 -> expired
/// ```
///
/// Transitions are monotone; terminal states reject all further mutations,
/// which is what makes gateway callback replays no-ops.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRequestStatus {
    Created,
    Tokenized,
    Pending,
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl PaymentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Tokenized => "tokenized",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Failed | Self::Expired
        )
    }
}

/// A fiat charge attempt against the payment gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: PaymentRequestId,
    pub uuid: Uuid,
    pub correlation_id: CorrelationId,
    pub customer_id: CustomerId,
    pub wallet_id: WalletId,
    /// Gross amount the customer pays, including VAT.
    pub amount: Amount,
    /// Unique per request; the gateway echoes it back in the callback as
    /// `reservationNumber`, making it the idempotency key.
    pub invoice_number: String,
    pub cell_number: Mobile,
    pub redirect_url: String,
    pub gateway_token: Option<String>,
    pub gateway_status: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_trace: Option<String>,
    pub payment_rrn: Option<String>,
    pub payment_masked_pan: Option<String>,
    pub payment_terminal: Option<String>,
    pub payment_state: Option<String>,
    pub payment_status: Option<String>,
    pub status: PaymentRequestStatus,
    pub status_reason: Option<String>,
    pub expires_at: TimestampMs,
    /// The split computed at invoice creation; finalization replays it
    /// verbatim rather than recomputing against a possibly-changed discount.
    pub split: ChargeSplit,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// The form fields the gateway posts to the redirect callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayCallback {
    /// Our invoice number.
    pub reservation_number: String,
    pub reference_number: Option<String>,
    pub terminal_id: Option<String>,
    pub trace_number: Option<String>,
    pub masked_pan: Option<String>,
    pub rrn: Option<String>,
    pub state: String,
    pub status: String,
}

/// What a `(status, state)` gateway tuple means for the request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CallbackOutcome {
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl CallbackOutcome {
    /// Map the gateway `(status, state)` tuple to an outcome.
    ///
    /// Known tuples:
    /// - `2_OK` -> completed
    /// - `1_CanceledByUser` -> cancelled
    /// - `3_Failed`, `5_InvalidParameters`, `8_*`, `10_*`, `11_*`, `12_*`
    ///   -> failed
    /// - `4_SessionIsNull` -> expired
    ///
    /// Anything unrecognized is treated as failed.
    pub fn from_gateway(status: &str, state: &str) -> Self {
        match status {
            "2" if state == "OK" => Self::Completed,
            "1" => Self::Cancelled,
            "4" => Self::Expired,
            "3" | "5" | "8" | "10" | "11" | "12" => Self::Failed,
            _ => Self::Failed,
        }
    }
}

/// Rendered callback response shown to the paying customer.
#[derive(Clone, Debug)]
pub struct CallbackPage {
    pub success: bool,
    pub html: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn outcome_mapping_table() {
        use CallbackOutcome::*;
        let cases = [
            (("2", "OK"), Completed),
            (("2", "Failed"), Failed),
            (("1", "CanceledByUser"), Cancelled),
            (("3", "Failed"), Failed),
            (("5", "InvalidParameters"), Failed),
            (("8", "anything"), Failed),
            (("10", "x"), Failed),
            (("11", "x"), Failed),
            (("12", "x"), Failed),
            (("4", "SessionIsNull"), Expired),
            (("99", "??"), Failed),
        ];
        for ((status, state), expected) in cases {
            assert_eq!(
                CallbackOutcome::from_gateway(status, state),
                expected,
                "status={status} state={state}",
            );
        }
    }

    #[test]
    fn terminal_statuses() {
        use PaymentRequestStatus::*;
        for status in [Created, Tokenized, Pending] {
            assert!(!status.is_terminal());
        }
        for status in [Completed, Cancelled, Failed, Expired] {
            assert!(status.is_terminal());
        }
    }
}
