//! The Atipay payment gateway client.
//!
//! Two endpoints matter to the core:
//!
//! - `POST /v1/get-token`: tokenize a charge, optionally with scattered
//!   settlement items.
//! - `POST /v1/verify-payment`: the side channel confirming how many Rials
//!   actually settled for a reference number.
//!
//! Both calls carry the terminal api key and run under a 10s deadline.

use anyhow::{ensure, Context};
use async_trait::async_trait;
use common::constants::GATEWAY_TIMEOUT;
use serde::{Deserialize, Serialize};

use crate::fiat::{PaymentGateway, TokenRequest};

#[derive(Clone, serde::Deserialize)]
pub struct AtipayConfig {
    pub base_url: String,
    /// Never logged.
    pub api_key: String,
    pub terminal: String,
}

pub struct AtipayGateway {
    client: reqwest::Client,
    config: AtipayConfig,
}

impl AtipayGateway {
    pub fn new(config: AtipayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .context("Failed to build gateway HTTP client")?;
        Ok(Self { client, config })
    }
}

// --- Wire types --- //

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetTokenWire<'a> {
    amount: u64,
    cell_number: &'a str,
    description: &'a str,
    invoice_number: &'a str,
    redirect_url: &'a str,
    api_key: &'a str,
    terminal: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scattered_settlement_items: Option<Vec<SettlementItemWire<'a>>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettlementItemWire<'a> {
    iban: &'a str,
    amount: u64,
}

#[derive(Deserialize)]
struct GetTokenResponse {
    status: String,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyWire<'a> {
    reference_number: &'a str,
    api_key: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    /// Settled amount in Rials.
    amount: u64,
}

#[async_trait]
impl PaymentGateway for AtipayGateway {
    async fn get_token(
        &self,
        request: &TokenRequest,
    ) -> anyhow::Result<String> {
        let settlement: Vec<SettlementItemWire<'_>> = request
            .settlement
            .iter()
            .map(|item| SettlementItemWire {
                iban: item.iban.as_str(),
                amount: item.amount_rials,
            })
            .collect();
        let wire = GetTokenWire {
            amount: request.amount_rials,
            cell_number: request.cell_number.as_str(),
            description: &request.description,
            invoice_number: &request.invoice_number,
            redirect_url: &request.redirect_url,
            api_key: &self.config.api_key,
            terminal: &self.config.terminal,
            scattered_settlement_items: (!settlement.is_empty())
                .then_some(settlement),
        };

        let url = format!("{}/v1/get-token", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&wire)
            .send()
            .await
            .context("get-token request failed")?
            .error_for_status()
            .context("get-token returned error status")?
            .json::<GetTokenResponse>()
            .await
            .context("get-token response malformed")?;

        ensure!(
            response.status == "1",
            "get-token rejected: status {}",
            response.status,
        );
        Ok(response.token.unwrap_or_default())
    }

    async fn verify_payment(
        &self,
        reference_number: &str,
    ) -> anyhow::Result<u64> {
        let wire = VerifyWire {
            reference_number,
            api_key: &self.config.api_key,
        };

        let url = format!("{}/v1/verify-payment", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&wire)
            .send()
            .await
            .context("verify-payment request failed")?
            .error_for_status()
            .context("verify-payment returned error status")?
            .json::<VerifyResponse>()
            .await
            .context("verify-payment response malformed")?;

        Ok(response.amount)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_wire_shape() {
        let wire = GetTokenWire {
            amount: 10_000_000,
            cell_number: "09123456789",
            description: "wallet charge",
            invoice_number: "abc",
            redirect_url: "https://peyk.example/callback",
            api_key: "key",
            terminal: "t1",
            scattered_settlement_items: Some(vec![SettlementItemWire {
                iban: "IR062960000000100324200001",
                amount: 3_750_000,
            }]),
        };
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["amount"], 10_000_000);
        assert_eq!(value["cellNumber"], "09123456789");
        assert_eq!(
            value["scatteredSettlementItems"][0]["iban"],
            "IR062960000000100324200001",
        );

        // Omitted entirely when empty.
        let wire = GetTokenWire {
            scattered_settlement_items: None,
            ..wire
        };
        let value = serde_json::to_value(&wire).unwrap();
        assert!(value.get("scatteredSettlementItems").is_none());
    }

    #[test]
    fn token_response_tolerates_missing_token() {
        let parsed: GetTokenResponse =
            serde_json::from_str("{\"status\":\"0\"}").unwrap();
        assert_eq!(parsed.status, "0");
        assert!(parsed.token.is_none());
    }
}
