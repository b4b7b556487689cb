//! Test support: an in-memory transactional store, an in-memory cache, and
//! fake gateway / provider / notifier implementations.
//!
//! [`MemStore`] gives real transaction semantics for tests: `begin` takes
//! the world lock and clones the state, writes go to the clone, and
//! `commit` swaps the clone back in. Holding the lock for the life of the
//! handle serializes transactions, which is (more than) the repeatable
//! read §5 requires of production stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::id::{
    AgencyDiscountId, CampaignId, CryptoRequestId, CustomerId, WalletId,
};
use common::mobile::Mobile;
use common::time::TimestampMs;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::cache::Cache;
use crate::crypto::provider::{
    CryptoProvider, ProviderDeposit, ProvisionedDeposit, Quote, WebhookEvent,
};
use crate::error::Error;
use crate::fiat::{PaymentGateway, TokenRequest};
use crate::models::audit::AuditRecord;
use crate::models::campaign::{
    Campaign, CampaignFilter, LineNumber, SegmentPriceFactor,
};
use crate::models::crypto::{
    CryptoDeposit, CryptoPaymentRequest, CryptoPlatform, TxHash,
};
use crate::models::customer::{AgencyDiscount, Customer};
use crate::models::fiat::PaymentRequest;
use crate::models::wallet::{
    BalanceSnapshot, LedgerTransaction, Page, TransactionFilter, Wallet,
};
use crate::notify::Notifier;
use crate::repo::{CustomerFilter, Store, StoreTxn};

// --- MemCache --- //

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// An in-memory [`Cache`] with real TTL behavior.
#[derive(Clone, Default)]
pub struct MemCache {
    inner: Arc<StdMutex<HashMap<String, CacheEntry>>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.get(key) {
            Some(entry) if entry.is_live() =>
                return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.lock().unwrap().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.get(key).is_some_and(CacheEntry::is_live) {
            return Ok(false);
        }
        inner.insert(
            key.to_owned(),
            CacheEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }
}

// --- MemStore --- //

#[derive(Clone, Default)]
struct World {
    next_id: i64,
    customers: BTreeMap<i64, Customer>,
    wallets: BTreeMap<i64, Wallet>,
    snapshots: BTreeMap<i64, BalanceSnapshot>,
    transactions: BTreeMap<i64, LedgerTransaction>,
    campaigns: BTreeMap<i64, Campaign>,
    discounts: BTreeMap<i64, AgencyDiscount>,
    line_numbers: BTreeMap<i64, LineNumber>,
    segment_factors: BTreeMap<i64, SegmentPriceFactor>,
    payment_requests: BTreeMap<i64, PaymentRequest>,
    crypto_requests: BTreeMap<i64, CryptoPaymentRequest>,
    crypto_deposits: BTreeMap<i64, CryptoDeposit>,
    audit_records: BTreeMap<i64, AuditRecord>,
}

impl World {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// The in-memory [`Store`].
#[derive(Clone, Default)]
pub struct MemStore {
    world: Arc<TokioMutex<World>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots, for invariant assertions in tests.
    pub async fn snapshot_dump(&self) -> Vec<BalanceSnapshot> {
        self.world.lock().await.snapshots.values().cloned().collect()
    }

    /// All ledger transactions, for invariant assertions in tests.
    pub async fn transaction_dump(&self) -> Vec<LedgerTransaction> {
        self.world.lock().await.transactions.values().cloned().collect()
    }
}

pub struct MemTxn {
    guard: OwnedMutexGuard<World>,
    work: World,
}

#[async_trait]
impl Store for MemStore {
    type Txn = MemTxn;

    async fn begin(&self) -> Result<MemTxn, Error> {
        let guard = self.world.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemTxn { guard, work })
    }
}

fn dup(what: &str) -> Error {
    Error::Storage(format!("unique constraint violated: {what}"))
}

fn missing_row(what: &str) -> Error {
    Error::Storage(format!("update of missing row: {what}"))
}

#[async_trait]
impl StoreTxn for MemTxn {
    async fn commit(mut self) -> Result<(), Error> {
        *self.guard = self.work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Error> {
        Ok(())
    }

    // --- Customers --- //

    async fn customer_by_id(
        &mut self,
        id: CustomerId,
    ) -> Result<Option<Customer>, Error> {
        Ok(self.work.customers.get(&id.as_i64()).cloned())
    }

    async fn customer_by_email(
        &mut self,
        email: &str,
    ) -> Result<Option<Customer>, Error> {
        Ok(self
            .work
            .customers
            .values()
            .find(|c| c.email == email)
            .cloned())
    }

    async fn customer_by_mobile(
        &mut self,
        mobile: &Mobile,
    ) -> Result<Option<Customer>, Error> {
        Ok(self
            .work
            .customers
            .values()
            .find(|c| &c.representative_mobile == mobile)
            .cloned())
    }

    async fn customer_by_referer_code(
        &mut self,
        code: &str,
    ) -> Result<Option<Customer>, Error> {
        Ok(self
            .work
            .customers
            .values()
            .find(|c| c.agency_referer_code.as_deref() == Some(code))
            .cloned())
    }

    async fn customers_by_filter(
        &mut self,
        filter: &CustomerFilter,
        page: Page,
    ) -> Result<Vec<Customer>, Error> {
        Ok(self
            .work
            .customers
            .values()
            .filter(|c| filter.matches(c))
            .skip(page.offset())
            .take(page.page_size as usize)
            .cloned()
            .collect())
    }

    async fn insert_customer(
        &mut self,
        mut customer: Customer,
    ) -> Result<Customer, Error> {
        let exists = self.work.customers.values().any(|c| {
            c.email == customer.email
                || c.representative_mobile == customer.representative_mobile
                || (customer.agency_referer_code.is_some()
                    && c.agency_referer_code == customer.agency_referer_code)
        });
        if exists {
            return Err(dup("customer"));
        }
        customer.id = CustomerId::new(self.work.next_id());
        self.work.customers.insert(customer.id.as_i64(), customer.clone());
        Ok(customer)
    }

    async fn update_customer_password(
        &mut self,
        id: CustomerId,
        password_hash: String,
    ) -> Result<(), Error> {
        let customer = self
            .work
            .customers
            .get_mut(&id.as_i64())
            .ok_or_else(|| missing_row("customer"))?;
        customer.password_hash = password_hash;
        Ok(())
    }

    async fn update_customer_verification(
        &mut self,
        id: CustomerId,
        mobile_verified: bool,
        email_verified: bool,
    ) -> Result<(), Error> {
        let customer = self
            .work
            .customers
            .get_mut(&id.as_i64())
            .ok_or_else(|| missing_row("customer"))?;
        customer.mobile_verified = mobile_verified;
        customer.email_verified = email_verified;
        Ok(())
    }

    // --- Wallets + ledger --- //

    async fn wallet_by_customer_id(
        &mut self,
        customer_id: CustomerId,
    ) -> Result<Option<Wallet>, Error> {
        Ok(self
            .work
            .wallets
            .values()
            .find(|w| w.customer_id == customer_id)
            .cloned())
    }

    async fn wallet_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<Wallet>, Error> {
        Ok(self.work.wallets.values().find(|w| &w.uuid == uuid).cloned())
    }

    async fn insert_wallet_with_initial_snapshot(
        &mut self,
        mut wallet: Wallet,
        mut initial_snapshot: BalanceSnapshot,
    ) -> Result<(Wallet, BalanceSnapshot), Error> {
        if self
            .work
            .wallets
            .values()
            .any(|w| w.customer_id == wallet.customer_id)
        {
            return Err(dup("wallet per customer"));
        }
        wallet.id = WalletId::new(self.work.next_id());
        initial_snapshot.id =
            common::id::SnapshotId::new(self.work.next_id());
        initial_snapshot.wallet_id = wallet.id;
        self.work.wallets.insert(wallet.id.as_i64(), wallet.clone());
        self.work
            .snapshots
            .insert(initial_snapshot.id.as_i64(), initial_snapshot.clone());
        Ok((wallet, initial_snapshot))
    }

    async fn latest_snapshot(
        &mut self,
        wallet_id: WalletId,
    ) -> Result<Option<BalanceSnapshot>, Error> {
        Ok(self
            .work
            .snapshots
            .values()
            .filter(|s| s.wallet_id == wallet_id)
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn snapshots_by_wallet(
        &mut self,
        wallet_id: WalletId,
        page: Page,
    ) -> Result<Vec<BalanceSnapshot>, Error> {
        let mut matching: Vec<&BalanceSnapshot> = self
            .work
            .snapshots
            .values()
            .filter(|s| s.wallet_id == wallet_id)
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse(s.id));
        Ok(matching
            .into_iter()
            .skip(page.offset())
            .take(page.page_size as usize)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(
        &mut self,
        mut snapshot: BalanceSnapshot,
    ) -> Result<BalanceSnapshot, Error> {
        if snapshot.total != snapshot.balances.total() {
            return Err(Error::Storage(
                "snapshot total does not match compartments".to_owned(),
            ));
        }
        snapshot.id = common::id::SnapshotId::new(self.work.next_id());
        self.work.snapshots.insert(snapshot.id.as_i64(), snapshot.clone());
        Ok(snapshot)
    }

    async fn insert_transaction(
        &mut self,
        mut tx: LedgerTransaction,
    ) -> Result<LedgerTransaction, Error> {
        tx.id = common::id::LedgerTxId::new(self.work.next_id());
        self.work.transactions.insert(tx.id.as_i64(), tx.clone());
        Ok(tx)
    }

    async fn transactions_by_filter(
        &mut self,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Vec<LedgerTransaction>, Error> {
        let mut matching: Vec<&LedgerTransaction> = self
            .work
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .collect();
        matching.sort_by_key(|tx| std::cmp::Reverse(tx.id));
        Ok(matching
            .into_iter()
            .skip(page.offset())
            .take(page.page_size as usize)
            .cloned()
            .collect())
    }

    async fn count_transactions(
        &mut self,
        filter: &TransactionFilter,
    ) -> Result<u64, Error> {
        Ok(self
            .work
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .count() as u64)
    }

    // --- Campaigns --- //

    async fn insert_campaign(
        &mut self,
        mut campaign: Campaign,
    ) -> Result<Campaign, Error> {
        campaign.id = CampaignId::new(self.work.next_id());
        self.work.campaigns.insert(campaign.id.as_i64(), campaign.clone());
        Ok(campaign)
    }

    async fn update_campaign(
        &mut self,
        campaign: Campaign,
    ) -> Result<Campaign, Error> {
        let slot = self
            .work
            .campaigns
            .get_mut(&campaign.id.as_i64())
            .ok_or_else(|| missing_row("campaign"))?;
        *slot = campaign.clone();
        Ok(campaign)
    }

    async fn campaign_by_id(
        &mut self,
        id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        Ok(self.work.campaigns.get(&id.as_i64()).cloned())
    }

    async fn campaign_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<Campaign>, Error> {
        Ok(self
            .work
            .campaigns
            .values()
            .find(|c| &c.uuid == uuid)
            .cloned())
    }

    async fn campaigns_by_filter(
        &mut self,
        filter: &CampaignFilter,
        page: Page,
    ) -> Result<Vec<Campaign>, Error> {
        let mut matching: Vec<&Campaign> = self
            .work
            .campaigns
            .values()
            .filter(|c| filter.matches(c))
            .collect();
        matching.sort_by_key(|c| std::cmp::Reverse(c.id));
        Ok(matching
            .into_iter()
            .skip(page.offset())
            .take(page.page_size as usize)
            .cloned()
            .collect())
    }

    async fn count_campaigns(
        &mut self,
        filter: &CampaignFilter,
    ) -> Result<u64, Error> {
        Ok(self
            .work
            .campaigns
            .values()
            .filter(|c| filter.matches(c))
            .count() as u64)
    }

    async fn aggregate_click_counts(
        &mut self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, u64>, Error> {
        Ok(campaign_ids
            .iter()
            .filter_map(|id| {
                let campaign = self.work.campaigns.get(&id.as_i64())?;
                let clicks = campaign.statistics.get("clicks")?.as_u64()?;
                Some((*id, clicks))
            })
            .collect())
    }

    // --- Agency discounts --- //

    async fn insert_discount(
        &mut self,
        mut discount: AgencyDiscount,
    ) -> Result<AgencyDiscount, Error> {
        discount.id = AgencyDiscountId::new(self.work.next_id());
        self.work.discounts.insert(discount.id.as_i64(), discount.clone());
        Ok(discount)
    }

    async fn discount_by_id(
        &mut self,
        id: AgencyDiscountId,
    ) -> Result<Option<AgencyDiscount>, Error> {
        Ok(self.work.discounts.get(&id.as_i64()).cloned())
    }

    async fn active_discount(
        &mut self,
        agency_id: CustomerId,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> Result<Option<AgencyDiscount>, Error> {
        Ok(self
            .work
            .discounts
            .values()
            .filter(|d| {
                d.agency_id == agency_id
                    && d.customer_id == customer_id
                    && d.is_active(now)
            })
            .max_by_key(|d| d.id)
            .cloned())
    }

    async fn expire_active_discounts(
        &mut self,
        agency_id: CustomerId,
        customer_id: CustomerId,
        now: TimestampMs,
    ) -> Result<u32, Error> {
        let mut expired = 0;
        for discount in self.work.discounts.values_mut() {
            if discount.agency_id == agency_id
                && discount.customer_id == customer_id
                && discount.is_active(now)
            {
                discount.expires_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_active_discounts_with_customer(
        &mut self,
        agency_id: CustomerId,
        now: TimestampMs,
    ) -> Result<Vec<(AgencyDiscount, Customer)>, Error> {
        // Latest active row per customer.
        let mut per_customer: BTreeMap<i64, &AgencyDiscount> = BTreeMap::new();
        for discount in self.work.discounts.values() {
            if discount.agency_id != agency_id || !discount.is_active(now) {
                continue;
            }
            let slot =
                per_customer.entry(discount.customer_id.as_i64()).or_insert(discount);
            if discount.id > slot.id {
                *slot = discount;
            }
        }
        Ok(per_customer
            .into_values()
            .filter_map(|discount| {
                let customer = self
                    .work
                    .customers
                    .get(&discount.customer_id.as_i64())?;
                Some((discount.clone(), customer.clone()))
            })
            .collect())
    }

    // --- Line numbers --- //

    async fn line_number_by_value(
        &mut self,
        value: &str,
    ) -> Result<Option<LineNumber>, Error> {
        Ok(self
            .work
            .line_numbers
            .values()
            .find(|l| l.value == value)
            .cloned())
    }

    async fn list_line_numbers(
        &mut self,
        only_active: bool,
    ) -> Result<Vec<LineNumber>, Error> {
        let mut lines: Vec<LineNumber> = self
            .work
            .line_numbers
            .values()
            .filter(|l| !only_active || l.is_active)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.priority);
        Ok(lines)
    }

    async fn insert_line_number(
        &mut self,
        mut line_number: LineNumber,
    ) -> Result<LineNumber, Error> {
        if self
            .work
            .line_numbers
            .values()
            .any(|l| l.value == line_number.value)
        {
            return Err(dup("line number value"));
        }
        line_number.id = common::id::LineNumberId::new(self.work.next_id());
        self.work
            .line_numbers
            .insert(line_number.id.as_i64(), line_number.clone());
        Ok(line_number)
    }

    async fn update_line_numbers_batch(
        &mut self,
        line_numbers: Vec<LineNumber>,
    ) -> Result<(), Error> {
        for line_number in line_numbers {
            let slot = self
                .work
                .line_numbers
                .get_mut(&line_number.id.as_i64())
                .ok_or_else(|| missing_row("line number"))?;
            *slot = line_number;
        }
        Ok(())
    }

    // --- Segment price factors --- //

    async fn insert_segment_factor(
        &mut self,
        mut factor: SegmentPriceFactor,
    ) -> Result<SegmentPriceFactor, Error> {
        factor.id = common::id::SegmentFactorId::new(self.work.next_id());
        self.work
            .segment_factors
            .insert(factor.id.as_i64(), factor.clone());
        Ok(factor)
    }

    async fn latest_segment_factors(
        &mut self,
        level3s: &[String],
    ) -> Result<BTreeMap<String, SegmentPriceFactor>, Error> {
        Ok(level3s
            .iter()
            .filter_map(|level3| {
                self.work
                    .segment_factors
                    .values()
                    .filter(|f| &f.level3 == level3)
                    .max_by_key(|f| f.id)
                    .map(|f| (level3.clone(), f.clone()))
            })
            .collect())
    }

    async fn list_latest_segment_factors(
        &mut self,
    ) -> Result<Vec<SegmentPriceFactor>, Error> {
        let mut latest: BTreeMap<&str, &SegmentPriceFactor> = BTreeMap::new();
        for factor in self.work.segment_factors.values() {
            let slot = latest.entry(&factor.level3).or_insert(factor);
            if factor.id > slot.id {
                *slot = factor;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    // --- Fiat payment requests --- //

    async fn insert_payment_request(
        &mut self,
        mut request: PaymentRequest,
    ) -> Result<PaymentRequest, Error> {
        if self
            .work
            .payment_requests
            .values()
            .any(|r| r.invoice_number == request.invoice_number)
        {
            return Err(dup("invoice number"));
        }
        request.id = common::id::PaymentRequestId::new(self.work.next_id());
        self.work
            .payment_requests
            .insert(request.id.as_i64(), request.clone());
        Ok(request)
    }

    async fn update_payment_request(
        &mut self,
        request: PaymentRequest,
    ) -> Result<PaymentRequest, Error> {
        let slot = self
            .work
            .payment_requests
            .get_mut(&request.id.as_i64())
            .ok_or_else(|| missing_row("payment request"))?;
        *slot = request.clone();
        Ok(request)
    }

    async fn payment_request_by_invoice(
        &mut self,
        invoice_number: &str,
    ) -> Result<Option<PaymentRequest>, Error> {
        Ok(self
            .work
            .payment_requests
            .values()
            .find(|r| r.invoice_number == invoice_number)
            .cloned())
    }

    async fn payment_request_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<PaymentRequest>, Error> {
        Ok(self
            .work
            .payment_requests
            .values()
            .find(|r| &r.uuid == uuid)
            .cloned())
    }

    // --- Crypto payment requests --- //

    async fn insert_crypto_request(
        &mut self,
        mut request: CryptoPaymentRequest,
    ) -> Result<CryptoPaymentRequest, Error> {
        request.id = CryptoRequestId::new(self.work.next_id());
        self.work
            .crypto_requests
            .insert(request.id.as_i64(), request.clone());
        Ok(request)
    }

    async fn update_crypto_request(
        &mut self,
        request: CryptoPaymentRequest,
    ) -> Result<CryptoPaymentRequest, Error> {
        let slot = self
            .work
            .crypto_requests
            .get_mut(&request.id.as_i64())
            .ok_or_else(|| missing_row("crypto request"))?;
        *slot = request.clone();
        Ok(request)
    }

    async fn crypto_request_by_id(
        &mut self,
        id: CryptoRequestId,
    ) -> Result<Option<CryptoPaymentRequest>, Error> {
        Ok(self.work.crypto_requests.get(&id.as_i64()).cloned())
    }

    async fn crypto_request_by_uuid(
        &mut self,
        uuid: &Uuid,
    ) -> Result<Option<CryptoPaymentRequest>, Error> {
        Ok(self
            .work
            .crypto_requests
            .values()
            .find(|r| &r.uuid == uuid)
            .cloned())
    }

    async fn crypto_request_by_provider_request_id(
        &mut self,
        platform: CryptoPlatform,
        provider_request_id: &str,
    ) -> Result<Option<CryptoPaymentRequest>, Error> {
        Ok(self
            .work
            .crypto_requests
            .values()
            .find(|r| {
                r.platform == platform
                    && r.provider_request_id.as_deref()
                        == Some(provider_request_id)
            })
            .cloned())
    }

    async fn crypto_request_by_deposit_address(
        &mut self,
        address: &str,
    ) -> Result<Option<CryptoPaymentRequest>, Error> {
        Ok(self
            .work
            .crypto_requests
            .values()
            .find(|r| r.deposit_address.as_deref() == Some(address))
            .cloned())
    }

    async fn list_expired_pending_crypto_requests(
        &mut self,
        now: TimestampMs,
    ) -> Result<Vec<CryptoPaymentRequest>, Error> {
        let with_deposits: std::collections::BTreeSet<i64> = self
            .work
            .crypto_deposits
            .values()
            .map(|d| d.request_id.as_i64())
            .collect();
        Ok(self
            .work
            .crypto_requests
            .values()
            .filter(|r| {
                !r.status.is_final()
                    && r.expires_at.is_some_and(|at| at < now)
                    && !with_deposits.contains(&r.id.as_i64())
            })
            .cloned()
            .collect())
    }

    // --- Crypto deposits --- //

    async fn insert_crypto_deposit(
        &mut self,
        mut deposit: CryptoDeposit,
    ) -> Result<CryptoDeposit, Error> {
        if self
            .work
            .crypto_deposits
            .values()
            .any(|d| d.tx_hash == deposit.tx_hash)
        {
            return Err(dup("tx hash"));
        }
        deposit.id = common::id::CryptoDepositId::new(self.work.next_id());
        self.work
            .crypto_deposits
            .insert(deposit.id.as_i64(), deposit.clone());
        Ok(deposit)
    }

    async fn update_crypto_deposit(
        &mut self,
        deposit: CryptoDeposit,
    ) -> Result<CryptoDeposit, Error> {
        let slot = self
            .work
            .crypto_deposits
            .get_mut(&deposit.id.as_i64())
            .ok_or_else(|| missing_row("crypto deposit"))?;
        *slot = deposit.clone();
        Ok(deposit)
    }

    async fn crypto_deposit_by_tx_hash(
        &mut self,
        tx_hash: &TxHash,
    ) -> Result<Option<CryptoDeposit>, Error> {
        Ok(self
            .work
            .crypto_deposits
            .values()
            .find(|d| &d.tx_hash == tx_hash)
            .cloned())
    }

    async fn crypto_deposits_by_request(
        &mut self,
        request_id: CryptoRequestId,
    ) -> Result<Vec<CryptoDeposit>, Error> {
        Ok(self
            .work
            .crypto_deposits
            .values()
            .filter(|d| d.request_id == request_id)
            .cloned()
            .collect())
    }

    // --- Audit --- //

    async fn insert_audit_record(
        &mut self,
        mut record: AuditRecord,
    ) -> Result<AuditRecord, Error> {
        record.id = common::id::AuditRecordId::new(self.work.next_id());
        self.work
            .audit_records
            .insert(record.id.as_i64(), record.clone());
        Ok(record)
    }
}

// --- Fake gateway --- //

/// A scriptable [`PaymentGateway`]: configure the token and verify
/// responses, observe the captured token requests.
#[derive(Default)]
pub struct FakeGateway {
    /// `None` fails tokenization.
    pub token: StdMutex<Option<String>>,
    /// reference number -> settled Rials. Missing references fail verify.
    pub verify_amounts: StdMutex<HashMap<String, u64>>,
    pub token_requests: StdMutex<Vec<TokenRequest>>,
}

impl FakeGateway {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: StdMutex::new(Some(token.to_owned())),
            ..Self::default()
        }
    }

    pub fn expect_verify(&self, reference: &str, rials: u64) {
        self.verify_amounts
            .lock()
            .unwrap()
            .insert(reference.to_owned(), rials);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn get_token(
        &self,
        request: &TokenRequest,
    ) -> anyhow::Result<String> {
        self.token_requests.lock().unwrap().push(request.clone());
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("gateway is down"))
    }

    async fn verify_payment(
        &self,
        reference_number: &str,
    ) -> anyhow::Result<u64> {
        self.verify_amounts
            .lock()
            .unwrap()
            .get(reference_number)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown reference"))
    }
}

// --- Fake crypto provider --- //

/// A scriptable [`CryptoProvider`]. Webhook bodies use the same JSON shape
/// [`FakeCryptoProvider::webhook_body`] produces; the signature header must
/// be `"valid"`.
pub struct FakeCryptoProvider {
    platform: CryptoPlatform,
    /// Deposits returned by `get_deposits` / `verify_tx`.
    pub deposits: StdMutex<Vec<ProviderDeposit>>,
    provision_counter: StdMutex<u32>,
}

impl FakeCryptoProvider {
    pub fn new(platform: CryptoPlatform) -> Self {
        Self {
            platform,
            deposits: StdMutex::new(Vec::new()),
            provision_counter: StdMutex::new(0),
        }
    }

    /// A webhook body this provider's `parse_webhook` understands.
    pub fn webhook_body(
        provider_request_id: &str,
        deposit: &ProviderDeposit,
    ) -> Vec<u8> {
        let status = match deposit.status {
            crate::crypto::provider::ProviderDepositStatus::Pending =>
                "pending",
            crate::crypto::provider::ProviderDepositStatus::Confirmed =>
                "confirmed",
            crate::crypto::provider::ProviderDepositStatus::Failed => "failed",
        };
        serde_json::to_vec(&serde_json::json!({
            "requestId": provider_request_id,
            "txHash": deposit.tx_hash.as_str(),
            "toAddress": deposit.to_address,
            "amount": deposit.amount_coin,
            "confirmations": deposit.confirmations,
            "requiredConfirmations": deposit.required_confirmations,
            "status": status,
        }))
        .unwrap()
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeWebhookWire {
    request_id: String,
    tx_hash: String,
    to_address: String,
    amount: String,
    confirmations: u32,
    required_confirmations: u32,
    status: String,
}

#[async_trait]
impl CryptoProvider for FakeCryptoProvider {
    fn platform(&self) -> CryptoPlatform {
        self.platform
    }

    async fn get_quote(
        &self,
        _fiat_amount: common::amount::Amount,
        _coin: &str,
        _network: &str,
    ) -> anyhow::Result<Quote> {
        Ok(Quote {
            coin_amount: "12.5".to_owned(),
            exchange_rate: "80000".to_owned(),
        })
    }

    async fn provision_deposit(
        &self,
        label: &str,
        _callback_url: &str,
    ) -> anyhow::Result<ProvisionedDeposit> {
        let mut counter = self.provision_counter.lock().unwrap();
        *counter += 1;
        Ok(ProvisionedDeposit {
            address: format!("T{label}"),
            memo: None,
            provider_request_id: format!("req-{counter}"),
            expires_at: None,
        })
    }

    async fn get_deposits(
        &self,
        _provider_request_id: &str,
    ) -> anyhow::Result<Vec<ProviderDeposit>> {
        Ok(self.deposits.lock().unwrap().clone())
    }

    async fn verify_tx(
        &self,
        tx_hash: &TxHash,
    ) -> anyhow::Result<Option<ProviderDeposit>> {
        Ok(self
            .deposits
            .lock()
            .unwrap()
            .iter()
            .find(|d| &d.tx_hash == tx_hash)
            .cloned())
    }

    fn verify_webhook(
        &self,
        _raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), Error> {
        if signature_header == Some("valid") {
            Ok(())
        } else {
            Err(Error::CryptoWebhookForbidden)
        }
    }

    fn parse_webhook(
        &self,
        raw_body: &[u8],
    ) -> anyhow::Result<WebhookEvent> {
        use crate::crypto::provider::ProviderDepositStatus;
        let wire = serde_json::from_slice::<FakeWebhookWire>(raw_body)?;
        let status = match wire.status.as_str() {
            "confirmed" => ProviderDepositStatus::Confirmed,
            "failed" => ProviderDepositStatus::Failed,
            _ => ProviderDepositStatus::Pending,
        };
        Ok(WebhookEvent {
            provider_request_id: Some(wire.request_id),
            deposit_address: Some(wire.to_address.clone()),
            invoice_state: None,
            deposits: vec![ProviderDeposit {
                tx_hash: TxHash::new(wire.tx_hash),
                from_address: None,
                to_address: wire.to_address,
                destination_tag: None,
                amount_coin: wire.amount,
                confirmations: wire.confirmations,
                required_confirmations: wire.required_confirmations,
                status,
                detected_at: None,
                confirmed_at: None,
            }],
        })
    }
}

// --- Recording notifier --- //

/// Records notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sms: StdMutex<Vec<(String, String)>>,
    pub emails: StdMutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_sms(
        &self,
        mobile: &Mobile,
        message: &str,
        _customer_id: Option<CustomerId>,
    ) -> anyhow::Result<()> {
        self.sms
            .lock()
            .unwrap()
            .push((mobile.to_string(), message.to_owned()));
        Ok(())
    }

    async fn send_email(
        &self,
        address: &str,
        subject: &str,
        _body: &str,
    ) -> anyhow::Result<()> {
        self.emails
            .lock()
            .unwrap()
            .push((address.to_owned(), subject.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn txn_commit_and_rollback() {
        logger::init_for_testing();
        let store = MemStore::new();

        let mut txn = store.begin().await.unwrap();
        let customer = txn
            .insert_customer(fixtures::customer_fixture(None))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        // Visible after commit.
        let mut txn = store.begin().await.unwrap();
        assert!(txn.customer_by_id(customer.id).await.unwrap().is_some());
        let doomed = txn
            .insert_customer(fixtures::customer_fixture(Some("x@peyk.example")))
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        // Gone after rollback.
        let mut txn = store.begin().await.unwrap();
        assert!(txn.customer_by_id(doomed.id).await.unwrap().is_none());
        txn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn cache_ttl_and_set_nx() {
        logger::init_for_testing();
        let cache = MemCache::new();
        assert!(cache
            .set_nx("lock", b"1".to_vec(), Duration::from_millis(20))
            .await
            .unwrap());
        assert!(!cache
            .set_nx("lock", b"1".to_vec(), Duration::from_millis(20))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Expired: acquirable again.
        assert!(cache
            .set_nx("lock", b"1".to_vec(), Duration::from_millis(20))
            .await
            .unwrap());
    }
}

/// Entity fixtures shared across crate tests.
pub mod fixtures {
    use common::amount::Amount;
    use common::id::{AgencyDiscountId, CustomerId};
    use common::time::TimestampMs;
    use std::str::FromStr;
    use uuid::Uuid;

    use crate::models::campaign::{LineNumber, PriceFactor, SegmentPriceFactor};
    use crate::models::customer::{
        AccountType, AgencyDiscount, Customer, DiscountRate,
    };

    /// A fresh individual customer; unique mobile/email derived from a
    /// uuid.
    pub fn customer_fixture(email: Option<&str>) -> Customer {
        let uuid = Uuid::new_v4();
        let suffix: u32 = uuid.as_fields().0 % 1_000_000_000;
        Customer {
            id: CustomerId::new(0),
            uuid,
            account_type: AccountType::Individual,
            representative_mobile: common::mobile::Mobile::from_str(&format!(
                "09{suffix:09}"
            ))
            .unwrap(),
            email: email
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{uuid}@peyk.example")),
            password_hash: "argon2id$fixture".to_owned(),
            company_name: None,
            company_national_id: None,
            referrer_agency_id: None,
            agency_referer_code: None,
            sheba_number: None,
            is_active: true,
            mobile_verified: true,
            email_verified: false,
            created_at: TimestampMs::now(),
        }
    }

    /// A marketing agency with a Sheba and referer code.
    pub fn agency_fixture() -> Customer {
        let uuid = Uuid::new_v4();
        let mut agency = customer_fixture(None);
        agency.account_type = AccountType::MarketingAgency;
        agency.agency_referer_code = Some(format!("AG-{uuid}"));
        agency.sheba_number = Some(
            common::sheba::Sheba::from_str("IR062960000000100324200001")
                .unwrap(),
        );
        agency
    }

    pub fn discount_fixture(
        agency_id: CustomerId,
        customer_id: CustomerId,
        basis_points: u16,
    ) -> AgencyDiscount {
        AgencyDiscount {
            id: AgencyDiscountId::new(0),
            uuid: Uuid::new_v4(),
            agency_id,
            customer_id,
            discount_rate: DiscountRate::from_basis_points(basis_points),
            expires_at: None,
            reason: "negotiated".to_owned(),
            metadata: serde_json::Value::Null,
            created_at: TimestampMs::now(),
        }
    }

    pub fn line_number_fixture(value: &str, per_mille: u32) -> LineNumber {
        LineNumber {
            id: common::id::LineNumberId::new(0),
            uuid: Uuid::new_v4(),
            name: format!("line {value}"),
            value: value.to_owned(),
            price_factor: PriceFactor::from_per_mille(per_mille),
            priority: 0,
            is_active: true,
        }
    }

    pub fn segment_factor_fixture(
        level3: &str,
        per_mille: u32,
    ) -> SegmentPriceFactor {
        SegmentPriceFactor {
            id: common::id::SegmentFactorId::new(0),
            level3: level3.to_owned(),
            price_factor: PriceFactor::from_per_mille(per_mille),
            created_at: TimestampMs::now(),
        }
    }

    /// 1,000,000 TMN, the worked example used across scenario tests.
    pub const MILLION: Amount = Amount::from_tomans(1_000_000);
}
