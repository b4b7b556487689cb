use std::time::Duration;

use crate::amount::Amount;

/// The smallest wallet charge the platform accepts.
pub const MIN_CHARGE: Amount = Amount::from_tomans(1000);

/// Charges must be an exact multiple of this amount.
pub const CHARGE_MULTIPLE: Amount = Amount::from_tomans(1000);

/// How long a fiat payment request remains payable after creation.
pub const FIAT_REQUEST_TTL: Duration = Duration::from_secs(30 * 60);

/// Fallback crypto request TTL when the provider does not supply one.
pub const CRYPTO_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

/// A campaign's schedule time must be at least this far in the future, both
/// on every update that touches it and again at finalize and approval.
pub const MIN_SCHEDULE_LEAD: Duration = Duration::from_secs(10 * 60);

/// TTL on the audience spec writer lock. A writer that dies mid-mutation
/// blocks other writers for at most this long.
pub const AUDIENCE_LOCK_TTL: Duration = Duration::from_secs(10);

/// Deadline on payment gateway calls (get-token, verify-payment).
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Fresh deadline given to best-effort notifications, disconnected from the
/// caller's context so a client disconnect doesn't abort the send.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a password-reset OTP code remains valid.
pub const OTP_TTL: Duration = Duration::from_secs(5 * 60);

/// Verify attempts allowed per OTP code before it is burned.
pub const OTP_MAX_ATTEMPTS: u32 = 5;

/// Required OTP code length.
pub const OTP_CODE_LEN: usize = 6;

/// Transaction history page size cap.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Cache key suffixes; full keys are `<prefix>:<suffix>`.
pub const AUDIENCE_CACHE_KEY: &str = "audience_spec_cache";
pub const AUDIENCE_LOCK_KEY: &str = "audience_spec_lock";

/// OTP cache key for a customer; the full key is
/// `password_reset:otp:<customer_id>`.
pub fn otp_cache_key(customer_id: crate::id::CustomerId) -> String {
    format!("password_reset:otp:{customer_id}")
}
