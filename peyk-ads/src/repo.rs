//! The transactional repository contract consumed by the core.
//!
//! A [`Store`] hands out [`StoreTxn`] handles. Everything read or written
//! through one handle observes a serializable snapshot (repeatable-read or
//! stronger is required of implementations, so concurrent wallet mutations
//! cannot lose updates), and [`StoreTxn::commit`] applies the whole handle
//! atomically. The handle itself is the "active transaction handle" carried
//! through a logical operation.
//!
//! Insert methods ignore the id on the passed entity and return the stored
//! row with its store-assigned monotone id. Update methods overwrite the
//! row addressed by the entity's id.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::id::{
    AgencyDiscountId, CampaignId, CryptoRequestId, CustomerId, WalletId,
};
use common::mobile::Mobile;
use common::time::TimestampMs;
use uuid::Uuid;

use crate::error::Error;
use crate::models::audit::AuditRecord;
use crate::models::customer::AccountType;
use crate::models::campaign::{
    Campaign, CampaignFilter, LineNumber, SegmentPriceFactor,
};
use crate::models::crypto::{CryptoDeposit, CryptoPaymentRequest, TxHash};
use crate::models::customer::{AgencyDiscount, Customer};
use crate::models::fiat::PaymentRequest;
use crate::models::wallet::{
    BalanceSnapshot, LedgerTransaction, Page, TransactionFilter, Wallet,
};

/// Filter over customers. All fields are conjunctive; `None` matches
/// everything.
#[derive(Clone, Debug, Default)]
pub struct CustomerFilter {
    pub account_type: Option<AccountType>,
    pub is_active: Option<bool>,
    pub referrer_agency_id: Option<CustomerId>,
}

impl CustomerFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        self.account_type.map_or(true, |t| customer.account_type == t)
            && self.is_active.map_or(true, |a| customer.is_active == a)
            && self
                .referrer_agency_id
                .map_or(true, |r| customer.referrer_agency_id == Some(r))
    }
}

/// A transactional store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Txn: StoreTxn;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Self::Txn, Error>;
}

/// One open transaction. Dropping a handle without committing discards its
/// writes.
#[async_trait]
pub trait StoreTxn: Send {
    async fn commit(self) -> Result<(), Error>;
    async fn rollback(self) -> Result<(), Error>;

    /// Commit on `Ok`, roll back on `Err`. A rollback failure is reported
    /// in favor of neither masking the original error nor losing it: the
    /// original error always wins.
    async fn finish<T: Send>(
        self,
        result: Result<T, Error>,
    ) -> Result<T, Error>
    where
        Self: Sized,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(
                        "Rollback failed after {err}: {rollback_err}"
                    );
                }
                Err(err)
            }
        }
    }

    // --- Customers --- //

    async fn customer_by_id(
        &mut self,
        id: CustomerId,
    ) -> Result<Option<Customer>, Error>;

    async fn customer_by_email(
        &mut self,
        email: &str,
    ) -> Result<Option<Customer>, Error>;

    async fn customer_by_mobile(
        &mut self,
        mobile: &Mobile,
    ) -> Result<Option<Customer>, Error>;

    async fn customer_by_referer_code(
        &mut self,
        code: &str,
    ) -> Result<Option<Customer>, Error>;

    async fn customers_by_filter(
        &mut self,
        filter: &CustomerFilter,
        page: Page,
    ) -> Result<Vec<Customer>, Error>;

    async fn insert_customer(
        &mut self,
        customer: Customer,
    ) -> Result<Customer, Error>;

    async fn update_customer_password(
        &mut self,
        id: CustomerId,
        password_hash: String,
    ) -> Result<(), Error>;

    async fn update_customer_verification(
        &mut self,
        id: CustomerId,
        mobile_verified: bool,
        email_verified: bool,
    ) -> Result<(), Error>;

    // --- Wallets + ledger --- //

    async fn wallet_by_customer_id(
        &mut self,
        customer_id: CustomerId,
    ) -> Result<Option<Wallet>, Error>;

    async fn wallet_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<Wallet>, Error>;

    /// Create a wallet together with its initial all-zero snapshot.
    async fn insert_wallet_with_initial_snapshot(
        &mut self,
        wallet: Wallet,
        initial_snapshot: BalanceSnapshot,
    ) -> Result<(Wallet, BalanceSnapshot), Error>;

    /// The latest snapshot by id, i.e. the wallet's current balance.
    async fn latest_snapshot(
        &mut self,
        wallet_id: WalletId,
    ) -> Result<Option<BalanceSnapshot>, Error>;

    /// A wallet's snapshot history, newest first, paged.
    async fn snapshots_by_wallet(
        &mut self,
        wallet_id: WalletId,
        page: Page,
    ) -> Result<Vec<BalanceSnapshot>, Error>;

    async fn insert_snapshot(
        &mut self,
        snapshot: BalanceSnapshot,
    ) -> Result<BalanceSnapshot, Error>;

    async fn insert_transaction(
        &mut self,
        tx: LedgerTransaction,
    ) -> Result<LedgerTransaction, Error>;

    /// Matching transactions, newest first, paged.
    async fn transactions_by_filter(
        &mut self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, Error>;

    async fn count_transactions(
        &mut self,
        filter: &TransactionFilter,
    ) -> Result<u64, Error>;

    // --- Campaigns --- //

    async fn insert_campaign(
        &mut self,
        campaign: Campaign,
    ) -> Result<Campaign, Error>;

    async fn update_campaign(
        &mut self,
        campaign: Campaign,
    ) -> Result<Campaign, Error>;

    async fn campaign_by_id(
        &mut self,
        id: CampaignId,
    ) -> Result<Option<Campaign>, Error>;

    async fn campaign_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<Campaign>, Error>;

    async fn campaigns_by_filter(
        &mut self,
        filter: &CampaignFilter,
        page: Page,
    ) -> Result<Vec<Campaign>, Error>;

    async fn count_campaigns(
        &mut self,
        filter: &CampaignFilter,
    ) -> Result<u64, Error>;

    /// Total short-link click counts, keyed by campaign id.
    async fn aggregate_click_counts(
        &mut self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, u64>, Error>;

    // --- Agency discounts --- //

    async fn insert_discount(
        &mut self,
        discount: AgencyDiscount,
    ) -> Result<AgencyDiscount, Error>;

    async fn discount_by_id(
        &mut self,
        id: AgencyDiscountId,
    ) -> Result<Option<AgencyDiscount>, Error>;

    /// The single active discount for (agency, customer), i.e. the most
    /// recently created row that has not expired.
    async fn active_discount(
        &mut self,
        agency_id: CustomerId,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> Result<Option<AgencyDiscount>, Error>;

    /// Expire all currently-active rows for (agency, customer). Returns how
    /// many rows were expired.
    async fn expire_active_discounts(
        &mut self,
        agency_id: CustomerId,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> Result<u32, Error>;

    async fn list_active_discounts_with_customer(
        &mut self,
        agency_id: CustomerId,
        now: TimestampMs,
    ) -> Result<Vec<(AgencyDiscount, Customer)>, Error>;

    // --- Line numbers --- //

    async fn line_number_by_value(
        &mut self,
        value: &str,
    ) -> Result<Option<LineNumber>, Error>;

    async fn list_line_numbers(
        &mut self,
        only_active: bool,
    ) -> Result<Vec<LineNumber>, Error>;

    async fn insert_line_number(
        &mut self,
        line_number: LineNumber,
    ) -> Result<LineNumber, Error>;

    async fn update_line_numbers_batch(
        &mut self,
        line_numbers: Vec<LineNumber>,
    ) -> Result<(), Error>;

    // --- Segment price factors --- //

    async fn insert_segment_factor(
        &mut self,
        factor: SegmentPriceFactor,
    ) -> Result<SegmentPriceFactor, Error>;

    /// The latest factor per level3, restricted to the given level3s.
    /// Level3s with no factor at all are absent from the map.
    async fn latest_segment_factors(
        &mut self,
        level3s: &[String],
    ) -> Result<BTreeMap<String, SegmentPriceFactor>, Error>;

    async fn list_latest_segment_factors(
        &mut self,
    ) -> Result<Vec<SegmentPriceFactor>, Error>;

    // --- Fiat payment requests --- //

    async fn insert_payment_request(
        &mut self,
        request: PaymentRequest,
    ) -> Result<PaymentRequest, Error>;

    async fn update_payment_request(
        &mut self,
        request: PaymentRequest,
    ) -> Result<PaymentRequest, Error>;

    async fn payment_request_by_invoice(
        &mut self,
        invoice_number: &str,
    ) -> Result<Option<PaymentRequest>, Error>;

    async fn payment_request_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<PaymentRequest>, Error>;

    // --- Crypto payment requests --- //

    async fn insert_crypto_request(
        &mut self,
        request: CryptoPaymentRequest,
    ) -> Result<CryptoPaymentRequest, Error>;

    async fn update_crypto_request(
        &mut self,
        request: CryptoPaymentRequest,
    ) -> Result<CryptoPaymentRequest, Error>;

    async fn crypto_request_by_id(
        &mut self,
        id: CryptoRequestId,
    ) -> Result<Option<CryptoPaymentRequest>, Error>;

    async fn crypto_request_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<CryptoPaymentRequest>, Error>;

    async fn crypto_request_by_provider_request_id(
        &mut self,
        platform: crate::models::crypto::CryptoPlatform,
        provider_request_id: &str,
    ) -> Result<Option<CryptoPaymentRequest>, Error>;

    async fn crypto_request_by_deposit_address(
        &mut self,
        address: &str,
    ) -> Result<Option<CryptoPaymentRequest>, Error>;

    /// Non-final requests whose `expires_at` has passed and which have no
    /// detected deposit; input to the expiry sweep.
    async fn list_expired_pending_crypto_requests(
        &mut self,
        now: TimestampMs,
    ) -> Result<Vec<CryptoPaymentRequest>, Error>;

    // --- Crypto deposits --- //

    async fn insert_crypto_deposit(
        &mut self,
        deposit: CryptoDeposit,
    ) -> Result<CryptoDeposit, Error>;

    async fn update_crypto_deposit(
        &mut self,
        deposit: CryptoDeposit,
    ) -> Result<CryptoDeposit, Error>;

    async fn crypto_deposit_by_tx_hash(
        &mut self,
        tx_hash: &TxHash,
    ) -> Result<Option<CryptoDeposit>, Error>;

    async fn crypto_deposits_by_request(
        &mut self,
        request_id: CryptoRequestId,
    ) -> Result<Vec<CryptoDeposit>, Error>;

    // --- Audit --- //

    async fn insert_audit_record(
        &mut self,
        record: AuditRecord,
    ) -> Result<AuditRecord, Error>;
}
