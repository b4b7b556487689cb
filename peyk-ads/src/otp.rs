//! Password-reset OTP codes.
//!
//! Codes live only in the distributed cache under
//! `password_reset:otp:<customer_id>`, with a 5 minute TTL and an attempt
//! counter so a code can't be brute-forced within its window.

use common::constants::{otp_cache_key, OTP_CODE_LEN, OTP_MAX_ATTEMPTS, OTP_TTL};
use common::id::CustomerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::Cache;
use crate::error::Error;

#[derive(Serialize, Deserialize)]
struct OtpEntry {
    code: String,
    attempts: u32,
}

pub struct OtpService<C> {
    cache: C,
}

impl<C: Cache> OtpService<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    /// Issue a fresh 6-digit code for the customer, replacing any
    /// outstanding one, and return it for the notifier to deliver.
    pub async fn issue(
        &self,
        customer_id: CustomerId,
        rng: &mut impl Rng,
    ) -> Result<String, Error> {
        let code = format!("{:06}", rng.gen_range(0..1_000_000u32));
        let entry = OtpEntry {
            code: code.clone(),
            attempts: 0,
        };
        self.store(customer_id, &entry).await?;
        info!(%customer_id, "Issued password reset OTP");
        Ok(code)
    }

    /// Verify a submitted code. The code is burned on success and after
    /// too many failed attempts.
    pub async fn verify(
        &self,
        customer_id: CustomerId,
        submitted: &str,
    ) -> Result<(), Error> {
        if submitted.len() != OTP_CODE_LEN
            || !submitted.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::InvalidOtpCode);
        }

        let key = otp_cache_key(customer_id);
        let bytes = self
            .cache
            .get(&key)
            .await?
            .ok_or(Error::NoValidOtpFound)?;
        let mut entry: OtpEntry = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Cache(e.to_string()))?;

        if entry.attempts >= OTP_MAX_ATTEMPTS {
            self.cache.del(&key).await?;
            return Err(Error::NoValidOtpFound);
        }

        if entry.code != submitted {
            entry.attempts += 1;
            // Re-arming the TTL on a failed attempt is acceptable: the
            // attempt cap bounds the total window.
            self.store(customer_id, &entry).await?;
            return Err(Error::InvalidOtpCode);
        }

        self.cache.del(&key).await?;
        Ok(())
    }

    async fn store(
        &self,
        customer_id: CustomerId,
        entry: &OtpEntry,
    ) -> Result<(), Error> {
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| Error::Cache(e.to_string()))?;
        self.cache
            .set(&otp_cache_key(customer_id), bytes, Some(OTP_TTL))
            .await
    }
}
