//! Process configuration.
//!
//! One deserializable aggregate covering every subsystem the core wires
//! up. The process loads it from a JSON file or an env-provided blob;
//! secret-bearing sections (gateway api keys, webhook secrets) deliberately
//! have no `Debug` impl so they can't leak into logs.

use serde::Deserialize;
use std::path::PathBuf;

use crate::campaign::CampaignConfig;
use crate::crypto::bithide::BitHideConfig;
use crate::crypto::oxapay::OxaPayConfig;
use crate::crypto::CryptoConfig;
use crate::fiat::atipay::AtipayConfig;
use crate::fiat::FiatConfig;
use crate::ledger::PlatformAccounts;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub accounts: PlatformAccounts,
    pub fiat: FiatConfig,
    pub atipay: AtipayConfig,
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub bithide: Option<BitHideConfig>,
    #[serde(default)]
    pub oxapay: Option<OxaPayConfig>,
    pub campaign: CampaignConfig,
    pub audience: AudienceConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AudienceConfig {
    /// The audience catalog file.
    #[serde(default = "default_audience_path")]
    pub file_path: PathBuf,
    /// Prefix for the catalog cache and lock keys.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
}

fn default_audience_path() -> PathBuf {
    PathBuf::from("data/audience_spec.json")
}

fn default_cache_prefix() -> String {
    "peyk".to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_config_deserializes() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "accounts": {
                "system_customer_id": 1,
                "tax_customer_id": 2,
            },
            "fiat": {
                "redirect_url": "https://peyk.example/payment/callback",
                "system_sheba": "IR062960000000100324200001",
            },
            "atipay": {
                "base_url": "https://gateway.example",
                "api_key": "k",
                "terminal": "t1",
            },
            "crypto": {
                "callback_base_url": "https://peyk.example",
            },
            "bithide": {
                "base_url": "https://bithide.example",
                "api_key": "k",
                "webhook_secret": "s",
            },
            "campaign": {
                "min_acceptable_capacity": 500,
                "admin_email": "ops@peyk.example",
            },
            "audience": {},
        }))
        .unwrap();

        assert_eq!(config.campaign.min_acceptable_capacity, 500);
        assert!(config.bithide.is_some());
        assert!(config.oxapay.is_none());
        // Defaults fill the audience section.
        assert_eq!(
            config.audience.file_path,
            PathBuf::from("data/audience_spec.json"),
        );
        assert_eq!(config.audience.cache_prefix, "peyk");
    }

    #[test]
    fn bad_sheba_in_config_is_rejected() {
        let result = serde_json::from_value::<Config>(serde_json::json!({
            "accounts": { "system_customer_id": 1, "tax_customer_id": 2 },
            "fiat": {
                "redirect_url": "https://peyk.example/cb",
                "system_sheba": "not-a-sheba",
            },
            "atipay": { "base_url": "u", "api_key": "k", "terminal": "t" },
            "crypto": { "callback_base_url": "u" },
            "campaign": { "min_acceptable_capacity": 1, "admin_email": null },
            "audience": {},
        }));
        assert!(result.is_err());
    }
}
