//! The BitHide provider client: address-based deposits, HMAC-SHA512
//! webhooks.

use anyhow::Context;
use async_trait::async_trait;
use common::amount::Amount;
use common::constants::GATEWAY_TIMEOUT;
use common::time::TimestampMs;
use serde::Deserialize;

use crate::crypto::provider::{
    verify_hmac_sha512, CryptoProvider, ProviderDeposit,
    ProviderDepositStatus, ProvisionedDeposit, Quote, WebhookEvent,
};
use crate::error::Error;
use crate::models::crypto::{CryptoPlatform, TxHash};

#[derive(Clone, serde::Deserialize)]
pub struct BitHideConfig {
    pub base_url: String,
    /// Never logged.
    pub api_key: String,
    /// HMAC key for webhook deliveries. Never logged.
    pub webhook_secret: String,
}

pub struct BitHideProvider {
    client: reqwest::Client,
    config: BitHideConfig,
}

impl BitHideProvider {
    pub fn new(config: BitHideConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .context("Failed to build BitHide HTTP client")?;
        Ok(Self { client, config })
    }
}

// --- Wire types --- //

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateWire {
    coin_amount: String,
    exchange_rate: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressWire {
    address: String,
    #[serde(default)]
    memo: Option<String>,
    request_id: String,
    /// Unix millis.
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositWire {
    tx_hash: String,
    #[serde(default)]
    from_address: Option<String>,
    to_address: String,
    #[serde(default)]
    destination_tag: Option<String>,
    amount: String,
    confirmations: u32,
    required_confirmations: u32,
    status: String,
    #[serde(default)]
    detected_at: Option<i64>,
    #[serde(default)]
    confirmed_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookWire {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    address: Option<String>,
    deposits: Vec<DepositWire>,
}

fn timestamp(millis: Option<i64>) -> Option<TimestampMs> {
    millis.and_then(|m| (m >= 0).then(|| TimestampMs::from_millis(m)))
}

impl DepositWire {
    fn into_deposit(self) -> ProviderDeposit {
        let status = match self.status.as_str() {
            "confirmed" => ProviderDepositStatus::Confirmed,
            "failed" => ProviderDepositStatus::Failed,
            _ => ProviderDepositStatus::Pending,
        };
        ProviderDeposit {
            tx_hash: TxHash::new(self.tx_hash),
            from_address: self.from_address,
            to_address: self.to_address,
            destination_tag: self.destination_tag,
            amount_coin: self.amount,
            confirmations: self.confirmations,
            required_confirmations: self.required_confirmations,
            status,
            detected_at: timestamp(self.detected_at),
            confirmed_at: timestamp(self.confirmed_at),
        }
    }
}

#[async_trait]
impl CryptoProvider for BitHideProvider {
    fn platform(&self) -> CryptoPlatform {
        CryptoPlatform::BitHide
    }

    async fn get_quote(
        &self,
        fiat_amount: Amount,
        coin: &str,
        network: &str,
    ) -> anyhow::Result<Quote> {
        let url = format!("{}/api/v1/rate", self.config.base_url);
        let wire = self
            .client
            .get(&url)
            .query(&[
                ("coin", coin),
                ("network", network),
                ("fiatAmount", &fiat_amount.tomans().to_string()),
            ])
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .context("rate request failed")?
            .error_for_status()
            .context("rate returned error status")?
            .json::<RateWire>()
            .await
            .context("rate response malformed")?;
        Ok(Quote {
            coin_amount: wire.coin_amount,
            exchange_rate: wire.exchange_rate,
        })
    }

    async fn provision_deposit(
        &self,
        label: &str,
        callback_url: &str,
    ) -> anyhow::Result<ProvisionedDeposit> {
        let url = format!("{}/api/v1/address", self.config.base_url);
        let wire = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "label": label,
                "callbackUrl": callback_url,
            }))
            .send()
            .await
            .context("address request failed")?
            .error_for_status()
            .context("address returned error status")?
            .json::<AddressWire>()
            .await
            .context("address response malformed")?;
        Ok(ProvisionedDeposit {
            address: wire.address,
            memo: wire.memo,
            provider_request_id: wire.request_id,
            expires_at: timestamp(wire.expires_at),
        })
    }

    async fn get_deposits(
        &self,
        provider_request_id: &str,
    ) -> anyhow::Result<Vec<ProviderDeposit>> {
        let url = format!("{}/api/v1/deposits", self.config.base_url);
        let wires = self
            .client
            .get(&url)
            .query(&[("requestId", provider_request_id)])
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .context("deposits request failed")?
            .error_for_status()
            .context("deposits returned error status")?
            .json::<Vec<DepositWire>>()
            .await
            .context("deposits response malformed")?;
        Ok(wires.into_iter().map(DepositWire::into_deposit).collect())
    }

    async fn verify_tx(
        &self,
        tx_hash: &TxHash,
    ) -> anyhow::Result<Option<ProviderDeposit>> {
        let url = format!(
            "{}/api/v1/tx/{}",
            self.config.base_url,
            tx_hash.as_str(),
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .context("tx lookup failed")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wire = response
            .error_for_status()
            .context("tx lookup returned error status")?
            .json::<DepositWire>()
            .await
            .context("tx lookup response malformed")?;
        Ok(Some(wire.into_deposit()))
    }

    fn verify_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), Error> {
        let Some(signature) = signature_header else {
            return Err(Error::CryptoWebhookForbidden);
        };
        if verify_hmac_sha512(
            self.config.webhook_secret.as_bytes(),
            raw_body,
            signature,
        ) {
            Ok(())
        } else {
            Err(Error::CryptoWebhookForbidden)
        }
    }

    fn parse_webhook(
        &self,
        raw_body: &[u8],
    ) -> anyhow::Result<WebhookEvent> {
        let wire = serde_json::from_slice::<WebhookWire>(raw_body)
            .context("webhook body malformed")?;
        Ok(WebhookEvent {
            provider_request_id: wire.request_id,
            deposit_address: wire.address,
            invoice_state: None,
            deposits: wire
                .deposits
                .into_iter()
                .map(DepositWire::into_deposit)
                .collect(),
        })
    }
}

#[cfg(test)]
mod test {
    use crate::crypto::provider::hmac_sha512_hex;

    use super::*;

    fn provider() -> BitHideProvider {
        BitHideProvider::new(BitHideConfig {
            base_url: "http://bithide.test".to_owned(),
            api_key: "key".to_owned(),
            webhook_secret: "hook-secret".to_owned(),
        })
        .unwrap()
    }

    #[test]
    fn webhook_signature_gate() {
        let provider = provider();
        let body = br#"{"requestId":"r1","deposits":[]}"#;
        let signature = hmac_sha512_hex(b"hook-secret", body);

        provider.verify_webhook(body, Some(&signature)).unwrap();
        assert!(matches!(
            provider.verify_webhook(body, None),
            Err(Error::CryptoWebhookForbidden),
        ));
        assert!(matches!(
            provider.verify_webhook(b"tampered", Some(&signature)),
            Err(Error::CryptoWebhookForbidden),
        ));
    }

    #[test]
    fn webhook_parses_deposits() {
        let provider = provider();
        let body = serde_json::json!({
            "requestId": "r1",
            "address": "TDepositAddr",
            "deposits": [{
                "txHash": "0xA",
                "toAddress": "TDepositAddr",
                "amount": "12.5",
                "confirmations": 3,
                "requiredConfirmations": 20,
                "status": "pending",
                "detectedAt": 1700000000000i64,
            }],
        });
        let event = provider
            .parse_webhook(&serde_json::to_vec(&body).unwrap())
            .unwrap();
        assert_eq!(event.provider_request_id.as_deref(), Some("r1"));
        assert_eq!(event.deposits.len(), 1);
        let deposit = &event.deposits[0];
        assert_eq!(deposit.tx_hash.as_str(), "0xA");
        assert_eq!(deposit.status, ProviderDepositStatus::Pending);
        assert_eq!(deposit.confirmations, 3);
    }
}
