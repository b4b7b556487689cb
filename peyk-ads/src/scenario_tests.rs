//! End-to-end scenarios over the in-memory store: fiat charge with rebate,
//! campaign finalize / approve / reject round trips, duplicate crypto
//! webhooks, and the cross-cutting ledger invariants.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use common::amount::Amount;
use common::constants::MIN_SCHEDULE_LEAD;
use common::id::CorrelationId;
use common::sheba::Sheba;
use common::time::TimestampMs;

use crate::audience::AudienceStore;
use crate::campaign::{CampaignConfig, CampaignEngine};
use crate::crypto::provider::{ProviderDeposit, ProviderDepositStatus};
use crate::crypto::{CryptoConfig, CryptoFlow};
use crate::error::Error;
use crate::fiat::{FiatConfig, FiatFlow};
use crate::ledger::{self, PlatformAccounts, Posting};
use crate::models::audience::AudienceLeaf;
use crate::models::campaign::{CampaignSpec, CampaignStatus};
use crate::models::crypto::{
    CryptoPlatform, CryptoRequestStatus, DepositStatus, TxHash,
};
use crate::models::customer::Customer;
use crate::models::fiat::{GatewayCallback, PaymentRequestStatus};
use crate::models::wallet::{Balances, TxType};
use crate::repo::{Store, StoreTxn};
use crate::testing::fixtures::{
    agency_fixture, customer_fixture, discount_fixture, line_number_fixture,
    segment_factor_fixture, MILLION,
};
use crate::testing::{
    FakeCryptoProvider, FakeGateway, MemCache, MemStore, RecordingNotifier,
};

struct Harness {
    store: MemStore,
    gateway: Arc<FakeGateway>,
    notifier: Arc<RecordingNotifier>,
    provider: Arc<FakeCryptoProvider>,
    fiat: FiatFlow<MemStore, Arc<FakeGateway>, RecordingNotifier>,
    crypto: CryptoFlow<MemStore, RecordingNotifier>,
    campaigns: CampaignEngine<MemStore, MemCache, RecordingNotifier>,
    customer: Customer,
    agency: Customer,
    accounts: PlatformAccounts,
    _audience_dir: tempfile::TempDir,
}

impl Harness {
    /// Seed: an agency with a 20% discount over one customer, platform
    /// wallets, a neutral line number "3000", a neutral segment factor for
    /// "d1", and 10k available audience under retail/tehran/d1.
    async fn new() -> Self {
        logger::init_for_testing();

        let store = MemStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(FakeGateway::with_token("T1"));
        let provider =
            Arc::new(FakeCryptoProvider::new(CryptoPlatform::BitHide));

        let mut txn = store.begin().await.unwrap();
        let agency = txn.insert_customer(agency_fixture()).await.unwrap();
        let mut customer = customer_fixture(None);
        customer.referrer_agency_id = Some(agency.id);
        let customer = txn.insert_customer(customer).await.unwrap();
        txn.insert_discount(discount_fixture(agency.id, customer.id, 2000))
            .await
            .unwrap();
        let system =
            txn.insert_customer(customer_fixture(None)).await.unwrap();
        let tax = txn.insert_customer(customer_fixture(None)).await.unwrap();
        txn.insert_line_number(line_number_fixture("3000", 1000))
            .await
            .unwrap();
        txn.insert_segment_factor(segment_factor_fixture("d1", 1000))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let accounts = PlatformAccounts {
            system_customer_id: system.id,
            tax_customer_id: tax.id,
        };

        let audience_dir = tempfile::tempdir().unwrap();
        let audience = Arc::new(AudienceStore::new(
            MemCache::new(),
            audience_dir.path().join("audience_spec.json"),
            "peyk",
        ));
        audience
            .update(
                "retail",
                "tehran",
                "d1",
                AudienceLeaf {
                    tags: vec!["young".to_owned()],
                    available_audience: 10_000,
                },
            )
            .await
            .unwrap();

        let fiat = FiatFlow::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            accounts,
            FiatConfig {
                redirect_url: "https://peyk.example/payment/callback"
                    .to_owned(),
                system_sheba: Sheba::from_str("IR999999999999999999999999")
                    .unwrap(),
            },
        );
        let crypto = CryptoFlow::new(
            store.clone(),
            notifier.clone(),
            vec![provider.clone() as Arc<dyn crate::crypto::provider::CryptoProvider>],
            accounts,
            CryptoConfig {
                callback_base_url: "https://peyk.example".to_owned(),
            },
        );
        let campaigns = CampaignEngine::new(
            store.clone(),
            audience,
            notifier.clone(),
            CampaignConfig {
                min_acceptable_capacity: 100,
                admin_email: Some("ops@peyk.example".to_owned()),
            },
        );

        Self {
            store,
            gateway,
            notifier,
            provider,
            fiat,
            crypto,
            campaigns,
            customer,
            agency,
            accounts,
            _audience_dir: audience_dir,
        }
    }

    async fn balances_of(&self, customer: &Customer) -> Balances {
        let mut txn = self.store.begin().await.unwrap();
        let result = async {
            let Some(wallet) =
                txn.wallet_by_customer_id(customer.id).await?
            else {
                return Ok(Balances::ZERO);
            };
            ledger::current_balance(&mut txn, wallet.id)
                .await
                .map(|s| s.balances)
        }
        .await;
        txn.finish(result).await.unwrap()
    }

    async fn balances_by_customer_id(
        &self,
        customer_id: common::id::CustomerId,
    ) -> Balances {
        let mut txn = self.store.begin().await.unwrap();
        let customer = txn
            .customer_by_id(customer_id)
            .await
            .unwrap()
            .expect("seeded customer");
        txn.rollback().await.unwrap();
        self.balances_of(&customer).await
    }

    /// Put spendable funds on the customer's wallet directly.
    async fn fund_customer(&self, free: u64, credit: u64) {
        let now = TimestampMs::now();
        let mut txn = self.store.begin().await.unwrap();
        let (wallet, balance) =
            ledger::ensure_wallet(&mut txn, &self.customer, now)
                .await
                .unwrap();
        let before = balance.balances;
        let after = Balances {
            free: before.free + Amount::from_tomans(free),
            credit: before.credit + Amount::from_tomans(credit),
            ..before
        };
        let posting = Posting::new(
            &wallet,
            before,
            after,
            TxType::Deposit,
            Amount::from_tomans(free + credit),
            "test_seed",
        );
        ledger::post(&mut txn, CorrelationId::generate(), now, posting)
            .await
            .unwrap();
        txn.commit().await.unwrap();
    }

    /// A campaign priced at 400/message: one part, neutral factors.
    async fn waiting_campaign(&self, budget: u64) -> crate::models::campaign::Campaign {
        let campaign =
            self.campaigns.create(self.customer.id).await.unwrap();
        let spec = CampaignSpec {
            title: Some("spring sale".to_owned()),
            level1: Some("retail".to_owned()),
            level2s: vec!["tehran".to_owned()],
            level3s: vec!["d1".to_owned()],
            content: Some("visit our spring sale".to_owned()),
            line_number: Some("3000".to_owned()),
            schedule_at: Some(
                TimestampMs::now()
                    + MIN_SCHEDULE_LEAD
                    + Duration::from_secs(600),
            ),
            budget: Some(Amount::from_tomans(budget)),
            ..CampaignSpec::default()
        };
        self.campaigns
            .update(self.customer.id, &campaign.uuid, spec)
            .await
            .unwrap();
        self.campaigns
            .finalize(self.customer.id, &campaign.uuid)
            .await
            .unwrap()
    }

    /// Assert the cross-cutting ledger invariants over everything written
    /// so far.
    async fn assert_ledger_invariants(&self) {
        let snapshots = self.store.snapshot_dump().await;
        let transactions = self.store.transaction_dump().await;

        // Every snapshot's total is the sum of its compartments.
        for snapshot in &snapshots {
            assert_eq!(snapshot.total, snapshot.balances.total());
        }

        // Every transaction's correlation id is shared with exactly one
        // snapshot of the affected wallet.
        for tx in &transactions {
            let sharing = snapshots
                .iter()
                .filter(|s| {
                    s.correlation_id == tx.correlation_id
                        && s.wallet_id == tx.wallet_id
                })
                .count();
            assert!(
                sharing >= 1,
                "transaction {} has no correlated snapshot",
                tx.id,
            );
        }

        // Snapshot ids are strictly monotone per wallet (BTreeMap order is
        // id order).
        let mut latest_per_wallet: HashMap<i64, i64> = HashMap::new();
        for snapshot in &snapshots {
            let last = latest_per_wallet
                .entry(snapshot.wallet_id.as_i64())
                .or_insert(0);
            assert!(snapshot.id.as_i64() > *last);
            *last = snapshot.id.as_i64();
        }
    }
}

fn ok_callback(invoice: &str, reference: &str) -> GatewayCallback {
    GatewayCallback {
        reservation_number: invoice.to_owned(),
        reference_number: Some(reference.to_owned()),
        terminal_id: Some("t1".to_owned()),
        trace_number: Some("tr-9".to_owned()),
        masked_pan: Some("603799******1234".to_owned()),
        rrn: Some("rrn-5".to_owned()),
        state: "OK".to_owned(),
        status: "2".to_owned(),
    }
}

fn confirmed_deposit(tx_hash: &str, to_address: &str) -> ProviderDeposit {
    ProviderDeposit {
        tx_hash: TxHash::new(tx_hash),
        from_address: None,
        to_address: to_address.to_owned(),
        destination_tag: None,
        amount_coin: "12.5".to_owned(),
        confirmations: 25,
        required_confirmations: 20,
        status: ProviderDepositStatus::Confirmed,
        detected_at: None,
        confirmed_at: None,
    }
}

// --- S1: fiat charge with 20% discount --- //

#[tokio::test]
async fn fiat_charge_splits_across_four_wallets() {
    let h = Harness::new().await;

    let receipt = h.fiat.charge_wallet(h.customer.id, MILLION).await.unwrap();
    assert_eq!(receipt.gateway_token, "T1");

    // The gateway saw the Rial amount and the scattered settlement.
    {
        let requests = h.gateway.token_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount_rials, 10_000_000);
        let settlement = &requests[0].settlement;
        assert_eq!(settlement.len(), 2);
        assert_eq!(settlement[0].amount_rials, 3_750_000); // agency
        assert_eq!(settlement[1].amount_rials, 6_250_000); // system
    }

    h.gateway.expect_verify("R", 10_000_000);
    let page = h
        .fiat
        .payment_callback(ok_callback(&receipt.invoice_number, "R"))
        .await
        .unwrap();
    assert!(page.success);

    let customer = h.balances_of(&h.customer).await;
    assert_eq!(customer.free, Amount::from_tomans(909_090));
    assert_eq!(customer.credit, Amount::from_tomans(227_272));

    let agency = h.balances_of(&h.agency).await;
    assert_eq!(agency.locked, Amount::from_tomans(375_000));

    let tax = h.balances_by_customer_id(h.accounts.tax_customer_id).await;
    assert_eq!(tax.locked, Amount::from_tomans(56_819));

    let system =
        h.balances_by_customer_id(h.accounts.system_customer_id).await;
    assert_eq!(system.locked, Amount::from_tomans(568_181));

    // The three locked shares reassemble the gross.
    assert_eq!(
        agency.locked + tax.locked + system.locked,
        MILLION,
    );

    // All four postings share the request's correlation id.
    let mut txn = h.store.begin().await.unwrap();
    let request = txn
        .payment_request_by_invoice(&receipt.invoice_number)
        .await
        .unwrap()
        .unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(request.status, PaymentRequestStatus::Completed);
    let correlated = h
        .store
        .transaction_dump()
        .await
        .into_iter()
        .filter(|tx| tx.correlation_id == request.correlation_id)
        .count();
    assert_eq!(correlated, 4);

    h.assert_ledger_invariants().await;
}

#[tokio::test]
async fn fiat_callback_replay_is_rejected() {
    let h = Harness::new().await;
    let receipt = h.fiat.charge_wallet(h.customer.id, MILLION).await.unwrap();
    h.gateway.expect_verify("R", 10_000_000);

    let callback = ok_callback(&receipt.invoice_number, "R");
    h.fiat.payment_callback(callback.clone()).await.unwrap();
    let before = h.balances_of(&h.customer).await;

    // Gateway retries the redirect: the terminal status rejects it.
    let err = h.fiat.payment_callback(callback).await.unwrap_err();
    assert!(matches!(err.source, Error::PaymentRequestAlreadyProcessed));
    assert_eq!(h.balances_of(&h.customer).await, before);
}

#[tokio::test]
async fn fiat_verify_mismatch_fails_without_balance_change() {
    let h = Harness::new().await;
    let receipt = h.fiat.charge_wallet(h.customer.id, MILLION).await.unwrap();
    // Gateway says less settled than the request amount.
    h.gateway.expect_verify("R", 9_000_000);

    let page = h
        .fiat
        .payment_callback(ok_callback(&receipt.invoice_number, "R"))
        .await
        .unwrap();
    assert!(!page.success);

    assert_eq!(h.balances_of(&h.customer).await, Balances::ZERO);
    let mut txn = h.store.begin().await.unwrap();
    let request = txn
        .payment_request_by_invoice(&receipt.invoice_number)
        .await
        .unwrap()
        .unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(request.status, PaymentRequestStatus::Failed);
}

#[tokio::test]
async fn fiat_charge_without_agency_fails() {
    let h = Harness::new().await;
    let mut txn = h.store.begin().await.unwrap();
    let orphan = txn.insert_customer(customer_fixture(None)).await.unwrap();
    txn.commit().await.unwrap();

    let err = h.fiat.charge_wallet(orphan.id, MILLION).await.unwrap_err();
    assert!(matches!(err.source, Error::ReferrerAgencyIdRequired));
}

// --- S2 / S3: campaign finalize, approve, reject --- //

#[tokio::test]
async fn finalize_then_approve_consumes_reservation() {
    let h = Harness::new().await;
    h.fund_customer(500_000, 100_000).await;

    // 400/message * min(10_000, 300_000/400 = 750) = 300_000 total.
    let campaign = h.waiting_campaign(300_000).await;
    assert_eq!(campaign.status, CampaignStatus::WaitingForApproval);
    assert_eq!(campaign.num_audience, Some(750));

    let after_finalize = h.balances_of(&h.customer).await;
    assert_eq!(after_finalize.free, Amount::from_tomans(200_000));
    assert_eq!(after_finalize.credit, Amount::from_tomans(100_000));
    assert_eq!(after_finalize.frozen, Amount::from_tomans(300_000));

    let approved =
        h.campaigns.approve("reviewer", &campaign.uuid).await.unwrap();
    assert_eq!(approved.status, CampaignStatus::Approved);

    let after_approve = h.balances_of(&h.customer).await;
    assert_eq!(after_approve.frozen, Amount::ZERO);
    assert_eq!(
        after_approve.spent_on_campaign,
        Amount::from_tomans(300_000),
    );
    // free + credit unchanged from just-after-finalize.
    assert_eq!(
        after_approve.free + after_approve.credit,
        after_finalize.free + after_finalize.credit,
    );

    h.assert_ledger_invariants().await;
}

#[tokio::test]
async fn finalize_then_reject_refunds_as_credit() {
    let h = Harness::new().await;
    h.fund_customer(500_000, 100_000).await;

    let campaign = h.waiting_campaign(300_000).await;
    let rejected = h
        .campaigns
        .reject("reviewer", &campaign.uuid, "weak targeting".to_owned())
        .await
        .unwrap();
    assert_eq!(rejected.status, CampaignStatus::Rejected);
    assert_eq!(rejected.comment.as_deref(), Some("weak targeting"));

    let balances = h.balances_of(&h.customer).await;
    assert_eq!(balances.free, Amount::from_tomans(200_000));
    assert_eq!(balances.credit, Amount::from_tomans(400_000));
    assert_eq!(balances.frozen, Amount::ZERO);

    // (free + credit) returned to its pre-finalize value.
    assert_eq!(
        balances.spendable(),
        Amount::from_tomans(600_000),
    );

    h.assert_ledger_invariants().await;
}

#[tokio::test]
async fn finalize_rejects_overdraft() {
    let h = Harness::new().await;
    h.fund_customer(100_000, 0).await;

    let campaign = h.campaigns.create(h.customer.id).await.unwrap();
    let spec = CampaignSpec {
        title: Some("too big".to_owned()),
        level1: Some("retail".to_owned()),
        level3s: vec!["d1".to_owned()],
        content: Some("hello".to_owned()),
        line_number: Some("3000".to_owned()),
        schedule_at: Some(
            TimestampMs::now() + MIN_SCHEDULE_LEAD + Duration::from_secs(60),
        ),
        budget: Some(Amount::from_tomans(200_000)),
        ..CampaignSpec::default()
    };
    h.campaigns
        .update(h.customer.id, &campaign.uuid, spec)
        .await
        .unwrap();

    let err = h
        .campaigns
        .finalize(h.customer.id, &campaign.uuid)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::InsufficientFunds));

    // Nothing was reserved.
    let balances = h.balances_of(&h.customer).await;
    assert_eq!(balances.frozen, Amount::ZERO);
    assert_eq!(balances.free, Amount::from_tomans(100_000));
}

// --- S6: schedule re-validation at approval --- //

#[tokio::test]
async fn approve_rechecks_schedule() {
    let h = Harness::new().await;
    h.fund_customer(500_000, 100_000).await;
    let campaign = h.waiting_campaign(300_000).await;

    // Time passes: the schedule slips into the past while waiting.
    let mut txn = h.store.begin().await.unwrap();
    let mut stale = txn
        .campaign_by_uuid(&campaign.uuid)
        .await
        .unwrap()
        .unwrap();
    stale.spec.schedule_at = Some(TimestampMs::from_millis(1));
    txn.update_campaign(stale).await.unwrap();
    txn.commit().await.unwrap();

    let err = h
        .campaigns
        .approve("reviewer", &campaign.uuid)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::ScheduleTimeTooSoon));

    // Status unchanged; the reservation still stands.
    let mut txn = h.store.begin().await.unwrap();
    let unchanged = txn
        .campaign_by_uuid(&campaign.uuid)
        .await
        .unwrap()
        .unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(unchanged.status, CampaignStatus::WaitingForApproval);
    assert_eq!(
        h.balances_of(&h.customer).await.frozen,
        Amount::from_tomans(300_000),
    );
}

// --- Bot transitions --- //

#[tokio::test]
async fn bot_claims_and_completes_campaign() {
    let h = Harness::new().await;
    h.fund_customer(500_000, 100_000).await;
    let campaign = h.waiting_campaign(300_000).await;
    h.campaigns.approve("reviewer", &campaign.uuid).await.unwrap();

    let running = h
        .campaigns
        .mark_running("bot-1", &campaign.uuid)
        .await
        .unwrap();
    assert_eq!(running.status, CampaignStatus::Running);

    // Double claim is rejected.
    let err = h
        .campaigns
        .mark_running("bot-2", &campaign.uuid)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::CampaignUpdateNotAllowed));

    let stats = serde_json::json!({ "sent": 750, "delivered": 741, "clicks": 44 });
    let executed = h
        .campaigns
        .mark_executed("bot-1", &campaign.uuid, stats)
        .await
        .unwrap();
    assert_eq!(executed.status, CampaignStatus::Executed);

    let clicks = h.campaigns.click_stats(&[executed.id]).await.unwrap();
    assert_eq!(clicks.get(&executed.id), Some(&44));

    h.assert_ledger_invariants().await;
}

// --- S4: crypto duplicate webhook --- //

#[tokio::test]
async fn crypto_duplicate_webhook_credits_once() {
    let h = Harness::new().await;

    let request = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();
    assert_eq!(request.status, CryptoRequestStatus::Pending);
    let provider_request_id =
        request.provider_request_id.clone().unwrap();
    let address = request.deposit_address.clone().unwrap();

    let deposit = confirmed_deposit("0xA", &address);
    let body =
        FakeCryptoProvider::webhook_body(&provider_request_id, &deposit);

    h.crypto
        .handle_provider_webhook("bithide", &body, Some("valid"))
        .await
        .unwrap();

    let view = h.crypto.get_status(&request.uuid).await.unwrap();
    assert_eq!(view.request.status, CryptoRequestStatus::Credited);
    assert!(view.request.credited_at.is_some());
    assert_eq!(view.deposits.len(), 1);
    assert_eq!(view.deposits[0].status, DepositStatus::Credited);

    let customer = h.balances_of(&h.customer).await;
    assert_eq!(customer.free, Amount::from_tomans(909_090));
    assert_eq!(customer.credit, Amount::from_tomans(227_272));

    // Crypto assigns the full gross to the system side.
    let agency = h.balances_of(&h.agency).await;
    assert_eq!(agency.locked, Amount::ZERO);
    assert_eq!(agency.agency_share_with_tax, Amount::ZERO);
    let system =
        h.balances_by_customer_id(h.accounts.system_customer_id).await;
    assert_eq!(system.locked, Amount::from_tomans(909_090));
    let tax = h.balances_by_customer_id(h.accounts.tax_customer_id).await;
    assert_eq!(tax.locked, Amount::from_tomans(90_910));

    let tx_count_before = h.store.transaction_dump().await.len();

    // The provider redelivers the exact same webhook.
    h.crypto
        .handle_provider_webhook("bithide", &body, Some("valid"))
        .await
        .unwrap();

    // No new ledger rows, no balance change.
    assert_eq!(h.store.transaction_dump().await.len(), tx_count_before);
    assert_eq!(
        h.balances_of(&h.customer).await.free,
        Amount::from_tomans(909_090),
    );

    h.assert_ledger_invariants().await;
}

#[tokio::test]
async fn crypto_webhook_rejects_bad_signature() {
    let h = Harness::new().await;
    let request = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();
    let body = FakeCryptoProvider::webhook_body(
        request.provider_request_id.as_deref().unwrap(),
        &confirmed_deposit("0xB", "Taddr"),
    );

    let err = h
        .crypto
        .handle_provider_webhook("bithide", &body, Some("forged"))
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::CryptoWebhookForbidden));
    assert_eq!(h.balances_of(&h.customer).await, Balances::ZERO);
}

#[tokio::test]
async fn crypto_cancel_only_before_deposit() {
    let h = Harness::new().await;
    let request = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();

    // A pending (not yet confirmed) deposit lands.
    let mut deposit = confirmed_deposit(
        "0xC",
        request.deposit_address.as_deref().unwrap(),
    );
    deposit.status = ProviderDepositStatus::Pending;
    deposit.confirmations = 1;
    h.provider.deposits.lock().unwrap().push(deposit);
    h.crypto.refresh_deposits(&request.uuid).await.unwrap();

    let err = h.crypto.cancel_request(&request.uuid).await.unwrap_err();
    assert!(matches!(err.source, Error::CryptoDepositAlreadyDetected));

    // A fresh request with no deposits cancels fine.
    let other = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();
    let cancelled = h.crypto.cancel_request(&other.uuid).await.unwrap();
    assert_eq!(cancelled.status, CryptoRequestStatus::Cancelled);

    // And cancelling it again reports the final state.
    let err = h.crypto.cancel_request(&other.uuid).await.unwrap_err();
    assert!(matches!(err.source, Error::CryptoRequestAlreadyFinalized));
}

#[tokio::test]
async fn crypto_polling_confirms_pending_deposit() {
    let h = Harness::new().await;
    let request = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();
    let address = request.deposit_address.clone().unwrap();

    // First poll: detected, confirmations accumulating.
    let mut pending = confirmed_deposit("0xD", &address);
    pending.status = ProviderDepositStatus::Pending;
    pending.confirmations = 3;
    h.provider.deposits.lock().unwrap().push(pending);
    let view = h.crypto.refresh_deposits(&request.uuid).await.unwrap();
    assert_eq!(view.deposits[0].status, DepositStatus::Detected);
    assert_eq!(view.deposits[0].confirmations, 3);
    assert!(view.request.credited_at.is_none());

    // Second poll: the provider now reports it confirmed.
    h.provider.deposits.lock().unwrap()[0].status =
        ProviderDepositStatus::Confirmed;
    h.provider.deposits.lock().unwrap()[0].confirmations = 21;
    let view = h.crypto.refresh_deposits(&request.uuid).await.unwrap();
    assert_eq!(view.request.status, CryptoRequestStatus::Credited);
    assert_eq!(view.deposits[0].status, DepositStatus::Credited);

    // The customer got notified after commit.
    tokio::task::yield_now().await;
    h.assert_ledger_invariants().await;
}

// --- Expiry sweep --- //

#[tokio::test]
async fn expiry_sweep_only_touches_depositless_requests() {
    let h = Harness::new().await;
    let request = h
        .crypto
        .create_request(
            h.customer.id,
            MILLION,
            "TRX".to_owned(),
            "tron".to_owned(),
            CryptoPlatform::BitHide,
        )
        .await
        .unwrap();

    // Not yet expired: sweep finds nothing.
    let expired =
        h.crypto.expire_stale_requests(TimestampMs::now()).await.unwrap();
    assert_eq!(expired, 0);

    // Far future: the pending depositless request expires.
    let far_future = TimestampMs::now() + Duration::from_secs(7200);
    let expired = h.crypto.expire_stale_requests(far_future).await.unwrap();
    assert_eq!(expired, 1);

    let view = h.crypto.get_status(&request.uuid).await.unwrap();
    assert_eq!(view.request.status, CryptoRequestStatus::Expired);
}

// --- Notifications are best-effort side effects --- //

#[tokio::test]
async fn finalize_notifies_admin() {
    let h = Harness::new().await;
    h.fund_customer(500_000, 100_000).await;
    h.waiting_campaign(300_000).await;

    // Give the detached notify task a chance to run.
    for _ in 0..20 {
        tokio::task::yield_now().await;
        if !h.notifier.emails.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let emails = h.notifier.emails.lock().unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].0, "ops@peyk.example");
}
