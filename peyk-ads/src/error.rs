//! Error kinds returned by the core.
//!
//! Errors are a tagged, layered structure: every fallible path bottoms out
//! in a sentinel [`Error`] leaf kind, and each public operation boundary
//! wraps the leaf in a [`BusinessError`] carrying an operation-specific
//! code. Leaf kinds pass through repository and service boundaries
//! unchanged so callers can match on them; presenters translate operation
//! codes to HTTP statuses.

/// Sentinel leaf error kinds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Input --- //
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("charge amount is below the minimum")]
    AmountTooLow,
    #[error("charge amount is not a multiple of 1000 Toman")]
    AmountNotMultiple,
    #[error("campaign schedule time is too soon")]
    ScheduleTimeTooSoon,
    #[error("invalid captcha")]
    InvalidCaptcha,
    #[error("invalid otp code")]
    InvalidOtpCode,
    #[error("no valid otp found")]
    NoValidOtpFound,
    #[error("invalid sheba number")]
    ShebaNumberInvalid,
    #[error("campaign capacity is below the acceptable minimum")]
    InsufficientCampaignCapacity,

    // --- State --- //
    #[error("campaign is not waiting for approval")]
    CampaignNotWaitingForApproval,
    #[error("campaign can no longer be updated")]
    CampaignUpdateNotAllowed,
    #[error("payment request was already processed")]
    PaymentRequestAlreadyProcessed,
    #[error("payment request has expired")]
    PaymentRequestExpired,
    #[error("crypto payment request was already finalized")]
    CryptoRequestAlreadyFinalized,
    #[error("crypto payment request already has a detected deposit")]
    CryptoDepositAlreadyDetected,
    #[error("multiple completed freeze transactions found")]
    MultipleFreezeTransactionsFound,
    #[error("freeze transaction not found")]
    FreezeTransactionNotFound,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("audience spec writer lock is busy")]
    AudienceSpecLockBusy,

    // --- Not found --- //
    #[error("customer not found")]
    CustomerNotFound,
    #[error("campaign not found")]
    CampaignNotFound,
    #[error("wallet not found")]
    WalletNotFound,
    #[error("balance snapshot not found")]
    BalanceSnapshotNotFound,
    #[error("no active agency discount found")]
    AgencyDiscountNotFound,
    #[error("line number not found")]
    LineNumberNotFound,
    #[error("line number is not active")]
    LineNumberNotActive,
    #[error("payment request not found")]
    PaymentRequestNotFound,
    #[error("crypto payment request not found")]
    CryptoRequestNotFound,
    #[error("no segment price factor found for any selected level3")]
    SegmentPriceFactorNotFound,
    #[error("customer has no referring agency")]
    ReferrerAgencyIdRequired,

    // --- Authorization --- //
    #[error("campaign access denied")]
    CampaignAccessDenied,
    #[error("account is inactive")]
    AccountInactive,
    #[error("referring agency is inactive")]
    AgencyInactive,
    #[error("incorrect password")]
    IncorrectPassword,

    // --- External --- //
    #[error("gateway returned an empty token")]
    AtipayTokenEmpty,
    #[error("gateway call failed: {0}")]
    GatewayFailed(String),
    #[error("crypto provider quote failed: {0}")]
    CryptoProviderQuoteFailed(String),
    #[error("crypto provider call failed: {0}")]
    CryptoProviderCallFailed(String),
    #[error("crypto deposit address provision failed: {0}")]
    CryptoAddressProvisionFailed(String),
    #[error("crypto webhook signature rejected")]
    CryptoWebhookForbidden,

    // --- Infrastructure --- //
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Whether this kind represents a missing entity. Presenters map these
    /// to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CustomerNotFound
                | Self::CampaignNotFound
                | Self::WalletNotFound
                | Self::BalanceSnapshotNotFound
                | Self::AgencyDiscountNotFound
                | Self::LineNumberNotFound
                | Self::PaymentRequestNotFound
                | Self::CryptoRequestNotFound
                | Self::SegmentPriceFactorNotFound
        )
    }
}

/// An [`Error`] tagged with the public operation that failed.
///
/// The code is a stable machine-readable string such as
/// `CHARGE_WALLET_FAILED`; the source leaf is preserved for matching and
/// error chains.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {source}")]
pub struct BusinessError {
    pub code: &'static str,
    #[source]
    pub source: Error,
}

impl BusinessError {
    pub fn new(code: &'static str, source: Error) -> Self {
        Self { code, source }
    }
}

/// Extension trait tagging leaf results with an operation code at public
/// boundaries.
pub trait ResultExt<T> {
    fn with_code(self, code: &'static str) -> Result<T, BusinessError>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn with_code(self, code: &'static str) -> Result<T, BusinessError> {
        self.map_err(|source| BusinessError::new(code, source))
    }
}

/// Displayable list of operation codes, mostly useful for presenter tables.
pub mod codes {
    pub const CHARGE_WALLET_FAILED: &str = "CHARGE_WALLET_FAILED";
    pub const PAYMENT_CALLBACK_FAILED: &str = "PAYMENT_CALLBACK_FAILED";
    pub const TRANSACTION_HISTORY_FAILED: &str = "TRANSACTION_HISTORY_FAILED";
    pub const WALLET_BALANCE_FAILED: &str = "WALLET_BALANCE_FAILED";
    pub const CRYPTO_CREATE_FAILED: &str = "CRYPTO_CREATE_FAILED";
    pub const CRYPTO_STATUS_FAILED: &str = "CRYPTO_STATUS_FAILED";
    pub const CRYPTO_VERIFY_FAILED: &str = "CRYPTO_VERIFY_FAILED";
    pub const CRYPTO_CANCEL_FAILED: &str = "CRYPTO_CANCEL_FAILED";
    pub const CRYPTO_WEBHOOK_FAILED: &str = "CRYPTO_WEBHOOK_FAILED";
    pub const CAMPAIGN_CREATE_FAILED: &str = "CAMPAIGN_CREATE_FAILED";
    pub const CAMPAIGN_UPDATE_FAILED: &str = "CAMPAIGN_UPDATE_FAILED";
    pub const CAMPAIGN_FINALIZE_FAILED: &str = "CAMPAIGN_FINALIZE_FAILED";
    pub const CAMPAIGN_APPROVE_FAILED: &str = "CAMPAIGN_APPROVE_FAILED";
    pub const CAMPAIGN_REJECT_FAILED: &str = "CAMPAIGN_REJECT_FAILED";
    pub const CAMPAIGN_CANCEL_FAILED: &str = "CAMPAIGN_CANCEL_FAILED";
    pub const CAMPAIGN_RUN_FAILED: &str = "CAMPAIGN_RUN_FAILED";
    pub const CAMPAIGN_COMPLETE_FAILED: &str = "CAMPAIGN_COMPLETE_FAILED";
    pub const AUDIENCE_UPDATE_FAILED: &str = "AUDIENCE_UPDATE_FAILED";
    pub const AUDIENCE_RESET_FAILED: &str = "AUDIENCE_RESET_FAILED";
    pub const AUDIENCE_LIST_FAILED: &str = "AUDIENCE_LIST_FAILED";
    pub const DISCOUNT_GRANT_FAILED: &str = "DISCOUNT_GRANT_FAILED";
    pub const OTP_VERIFY_FAILED: &str = "OTP_VERIFY_FAILED";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn business_error_preserves_leaf() {
        let err = BusinessError::new(
            codes::CAMPAIGN_FINALIZE_FAILED,
            Error::InsufficientFunds,
        );
        assert!(matches!(err.source, Error::InsufficientFunds));
        let msg = err.to_string();
        assert!(msg.contains("CAMPAIGN_FINALIZE_FAILED"));
        assert!(msg.contains("insufficient funds"));
    }

    #[test]
    fn not_found_classification() {
        assert!(Error::CampaignNotFound.is_not_found());
        assert!(!Error::InsufficientFunds.is_not_found());
    }
}
