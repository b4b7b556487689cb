//! The crypto provider capability set.
//!
//! Each platform implements quoting, deposit provisioning, deposit listing
//! and tx verification; invoice-based platforms additionally implement
//! invoice creation and lookup. Webhook verification is provider-specific
//! and bit-exact, so it lives on the provider too.

use async_trait::async_trait;
use common::amount::Amount;
use common::time::TimestampMs;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::models::crypto::{CryptoPlatform, TxHash};

/// A fiat -> coin quote.
#[derive(Clone, Debug)]
pub struct Quote {
    /// Decimal string; never parsed into a float.
    pub coin_amount: String,
    pub exchange_rate: String,
}

/// A provisioned deposit destination.
#[derive(Clone, Debug)]
pub struct ProvisionedDeposit {
    pub address: String,
    pub memo: Option<String>,
    pub provider_request_id: String,
    pub expires_at: Option<TimestampMs>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProviderDepositStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A deposit as the provider reports it.
#[derive(Clone, Debug)]
pub struct ProviderDeposit {
    pub tx_hash: TxHash,
    pub from_address: Option<String>,
    pub to_address: String,
    pub destination_tag: Option<String>,
    pub amount_coin: String,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub status: ProviderDepositStatus,
    pub detected_at: Option<TimestampMs>,
    pub confirmed_at: Option<TimestampMs>,
}

/// An invoice from an invoice-based provider.
#[derive(Clone, Debug)]
pub struct Invoice {
    pub track_id: String,
    pub pay_link: String,
    pub expires_at: Option<TimestampMs>,
}

/// Internal reading of a provider invoice status.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvoiceState {
    Pending,
    /// Pending, with an underpayment reason attached to the request.
    Underpaid,
    Confirmed,
    Expired,
    Failed,
}

/// Map a provider invoice status string to our reading. Unknown statuses
/// return [`None`]; callers keep the request pending and log.
pub fn map_invoice_status(status: &str) -> Option<InvoiceState> {
    match status {
        "new" | "waiting" | "paying" => Some(InvoiceState::Pending),
        "underpaid" => Some(InvoiceState::Underpaid),
        "paid" | "manual_accept" => Some(InvoiceState::Confirmed),
        "expired" => Some(InvoiceState::Expired),
        "refunding" | "refunded" => Some(InvoiceState::Failed),
        _ => None,
    }
}

/// A parsed webhook: how to locate the request, plus the deposits it
/// reports.
#[derive(Clone, Debug, Default)]
pub struct WebhookEvent {
    pub provider_request_id: Option<String>,
    pub deposit_address: Option<String>,
    /// The invoice-level state, when the provider reports one; carries the
    /// underpaid reason onto the request.
    pub invoice_state: Option<InvoiceState>,
    pub deposits: Vec<ProviderDeposit>,
}

#[async_trait]
pub trait CryptoProvider: Send + Sync + 'static {
    fn platform(&self) -> CryptoPlatform;

    async fn get_quote(
        &self,
        fiat_amount: Amount,
        coin: &str,
        network: &str,
    ) -> anyhow::Result<Quote>;

    async fn provision_deposit(
        &self,
        label: &str,
        callback_url: &str,
    ) -> anyhow::Result<ProvisionedDeposit>;

    async fn get_deposits(
        &self,
        provider_request_id: &str,
    ) -> anyhow::Result<Vec<ProviderDeposit>>;

    async fn verify_tx(
        &self,
        tx_hash: &TxHash,
    ) -> anyhow::Result<Option<ProviderDeposit>>;

    /// Invoice creation, for invoice-based providers only.
    async fn create_invoice(
        &self,
        _fiat_amount: Amount,
        _label: &str,
        _callback_url: &str,
    ) -> anyhow::Result<Invoice> {
        anyhow::bail!("{} does not support invoices", self.platform())
    }

    /// Invoice lookup, for invoice-based providers only.
    async fn get_payment_info(
        &self,
        _track_id: &str,
    ) -> anyhow::Result<(InvoiceState, Vec<ProviderDeposit>)> {
        anyhow::bail!("{} does not support invoices", self.platform())
    }

    /// Authenticate a webhook delivery before parsing it.
    fn verify_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), Error>;

    fn parse_webhook(&self, raw_body: &[u8])
        -> anyhow::Result<WebhookEvent>;
}

// --- Signature helpers --- //

/// Lowercase-hex HMAC-SHA512 of `body` under `secret`.
pub fn hmac_sha512_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret)
        .expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of an HMAC-SHA512 hex signature.
pub fn verify_hmac_sha512(
    secret: &[u8],
    body: &[u8],
    signature_hex: &str,
) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = Hmac::<Sha512>::new_from_slice(secret)
        .expect("HMAC accepts any key length");
    mac.update(body);
    // Mac::verify_slice is constant-time.
    mac.verify_slice(&signature).is_ok()
}

/// Lowercase-hex SHA-256 over nullable string fields concatenated in
/// declared order, followed by the secret. Null fields contribute the
/// empty string.
pub fn composite_checksum_hex(
    fields: &[Option<&str>],
    secret: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.unwrap_or_default().as_bytes());
    }
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two hex digests.
pub fn constant_time_hex_eq(expected_hex: &str, provided_hex: &str) -> bool {
    let (Ok(expected), Ok(provided)) =
        (hex::decode(expected_hex), hex::decode(provided_hex))
    else {
        return false;
    };
    expected.len() == provided.len()
        && expected.ct_eq(&provided).unwrap_u8() == 1
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invoice_status_table() {
        use InvoiceState::*;
        let cases = [
            ("new", Some(Pending)),
            ("waiting", Some(Pending)),
            ("paying", Some(Pending)),
            ("underpaid", Some(Underpaid)),
            ("paid", Some(Confirmed)),
            ("manual_accept", Some(Confirmed)),
            ("expired", Some(Expired)),
            ("refunding", Some(Failed)),
            ("refunded", Some(Failed)),
            ("surprise", None),
        ];
        for (status, expected) in cases {
            assert_eq!(map_invoice_status(status), expected, "{status}");
        }
    }

    #[test]
    fn hmac_sha512_verifies_own_signature() {
        let secret = b"super-secret";
        let body = br#"{"address":"T123","txHash":"0xA"}"#;
        let signature = hmac_sha512_hex(secret, body);
        assert_eq!(signature.len(), 128);
        assert_eq!(signature, signature.to_lowercase());
        assert!(verify_hmac_sha512(secret, body, &signature));
        assert!(!verify_hmac_sha512(secret, body, &signature.replace('a', "b")));
        assert!(!verify_hmac_sha512(b"other-secret", body, &signature));
        assert!(!verify_hmac_sha512(secret, body, "zz-not-hex"));
    }

    #[test]
    fn composite_checksum_covers_nulls() {
        let with_null =
            composite_checksum_hex(&[Some("t1"), None, Some("100")], "s");
        let with_empty =
            composite_checksum_hex(&[Some("t1"), Some(""), Some("100")], "s");
        // A null field and an empty field contribute identically.
        assert_eq!(with_null, with_empty);

        let moved =
            composite_checksum_hex(&[Some("t1"), Some("100"), None], "s");
        assert_ne!(with_null, moved);
        assert!(constant_time_hex_eq(&with_null, &with_empty));
        assert!(!constant_time_hex_eq(&with_null, &moved));
        assert!(!constant_time_hex_eq(&with_null, "00ff"));
        assert!(!constant_time_hex_eq(&with_null, "not-hex"));
    }
}
