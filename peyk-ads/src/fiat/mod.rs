//! The fiat payment flow.
//!
//! A charge tokenizes a request with the external payment gateway and hands
//! the token to the customer's browser. The gateway redirects back with
//! signed-ish form fields; the callback is verified through the gateway's
//! verify-payment side channel before any balance moves. On verified
//! success, four wallets are updated in one database transaction sharing
//! one correlation id: the customer (free + credit), the referring agency
//! (locked share), the tax wallet, and the system wallet.

/// The Atipay gateway client.
pub mod atipay;

use std::sync::Arc;

use async_trait::async_trait;
use common::amount::Amount;
use common::constants::{CHARGE_MULTIPLE, FIAT_REQUEST_TTL, MIN_CHARGE};
use common::id::{CustomerId, PaymentRequestId};
use common::mobile::Mobile;
use common::sheba::Sheba;
use common::time::TimestampMs;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{codes, BusinessError, Error, ResultExt};
use crate::ledger::{self, PlatformAccounts, Posting};
use crate::models::customer::Customer;
use crate::models::fiat::{
    CallbackOutcome, CallbackPage, GatewayCallback, PaymentRequest,
    PaymentRequestStatus,
};
use crate::models::wallet::{
    Balances, LedgerTransaction, Page, TransactionFilter, TxType,
};
use crate::notify::{self, Notifier};
use crate::rebate::{self, ChargeSplit};
use crate::repo::{Store, StoreTxn};
use crate::{audit, models::wallet::BalanceSnapshot};

/// The gateway client surface the flow needs.
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Tokenize a charge; returns the redirect token.
    async fn get_token(&self, request: &TokenRequest)
        -> anyhow::Result<String>;

    /// The verify-payment side channel; returns the settled amount in
    /// Rials.
    async fn verify_payment(
        &self,
        reference_number: &str,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn get_token(
        &self,
        request: &TokenRequest,
    ) -> anyhow::Result<String> {
        (**self).get_token(request).await
    }

    async fn verify_payment(
        &self,
        reference_number: &str,
    ) -> anyhow::Result<u64> {
        (**self).verify_payment(reference_number).await
    }
}

/// One tokenization call.
#[derive(Clone, Debug)]
pub struct TokenRequest {
    pub amount_rials: u64,
    pub cell_number: Mobile,
    pub description: String,
    pub invoice_number: String,
    pub redirect_url: String,
    /// Empty means "no scattered settlement": the whole amount lands on
    /// the default terminal account.
    pub settlement: Vec<SettlementItem>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettlementItem {
    pub iban: Sheba,
    pub amount_rials: u64,
}

/// Build the scattered settlement list for a split: the agency share to the
/// agency's Sheba, the system share to the platform Sheba. Items are merged
/// by IBAN and zero items dropped; if only the system IBAN would remain,
/// the list is omitted entirely (the terminal default does the same thing
/// with fewer moving parts).
pub fn build_settlement(
    split: &ChargeSplit,
    agency_sheba: Option<&Sheba>,
    system_sheba: &Sheba,
) -> Vec<SettlementItem> {
    let mut items: Vec<SettlementItem> = Vec::with_capacity(2);

    let mut push = |iban: &Sheba, amount: Amount| {
        if amount.is_zero() {
            return;
        }
        match items.iter().position(|item| &item.iban == iban) {
            Some(i) => items[i].amount_rials += amount.rials(),
            None => items.push(SettlementItem {
                iban: iban.clone(),
                amount_rials: amount.rials(),
            }),
        }
    };

    if let Some(agency_sheba) = agency_sheba {
        push(agency_sheba, split.agency_share_with_tax);
    }
    push(system_sheba, split.system_share_with_tax);

    let only_system =
        items.iter().all(|item| &item.iban == system_sheba);
    if only_system {
        return Vec::new();
    }
    items
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct FiatConfig {
    /// Where the gateway redirects the customer after payment.
    pub redirect_url: String,
    /// The platform settlement account.
    pub system_sheba: Sheba,
}

/// What `charge_wallet` hands back to the presenter.
#[derive(Clone, Debug)]
pub struct ChargeReceipt {
    pub request_id: PaymentRequestId,
    pub request_uuid: Uuid,
    pub invoice_number: String,
    pub gateway_token: String,
}

/// A page of ledger history.
#[derive(Clone, Debug)]
pub struct TransactionHistory {
    pub transactions: Vec<LedgerTransaction>,
    pub total: u64,
    pub page: Page,
}

/// A customer-facing balance view. Zeroes when the wallet does not exist
/// yet.
#[derive(Clone, Debug)]
pub struct WalletBalanceView {
    pub balances: Balances,
    pub total: Amount,
}

pub struct FiatFlow<S, G, N> {
    store: S,
    gateway: G,
    notifier: Arc<N>,
    accounts: PlatformAccounts,
    config: FiatConfig,
}

impl<S: Store, G: PaymentGateway, N: Notifier> FiatFlow<S, G, N> {
    pub fn new(
        store: S,
        gateway: G,
        notifier: Arc<N>,
        accounts: PlatformAccounts,
        config: FiatConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            accounts,
            config,
        }
    }

    // --- Charge --- //

    /// Create a payment request and tokenize it with the gateway.
    #[instrument(skip_all, name = "(charge-wallet)")]
    pub async fn charge_wallet(
        &self,
        customer_id: CustomerId,
        amount: Amount,
    ) -> Result<ChargeReceipt, BusinessError> {
        validate_charge_amount(amount)
            .with_code(codes::CHARGE_WALLET_FAILED)?;

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CHARGE_WALLET_FAILED)?;
        let result = self
            .charge_wallet_inner(&mut txn, customer_id, amount)
            .await;
        let receipt = txn
            .finish(result)
            .await
            .with_code(codes::CHARGE_WALLET_FAILED)?;

        info!(
            %customer_id,
            invoice = %receipt.invoice_number,
            "Tokenized wallet charge"
        );
        Ok(receipt)
    }

    async fn charge_wallet_inner(
        &self,
        txn: &mut S::Txn,
        customer_id: CustomerId,
        amount: Amount,
    ) -> Result<ChargeReceipt, Error> {
        let now = TimestampMs::now();

        let customer = txn
            .customer_by_id(customer_id)
            .await?
            .ok_or(Error::CustomerNotFound)?;
        if !customer.is_active {
            return Err(Error::AccountInactive);
        }

        let (agency, discount) =
            resolve_agency_discount(txn, &customer, now).await?;
        let (wallet, _balance) =
            ledger::ensure_wallet(txn, &customer, now).await?;

        let split = rebate::fiat_split(amount, customer.id, &discount);
        let invoice_number = Uuid::new_v4().simple().to_string();

        let request = PaymentRequest {
            id: PaymentRequestId::new(0),
            uuid: Uuid::new_v4(),
            correlation_id: common::id::CorrelationId::generate(),
            customer_id: customer.id,
            wallet_id: wallet.id,
            amount,
            invoice_number: invoice_number.clone(),
            cell_number: customer.representative_mobile.clone(),
            redirect_url: self.config.redirect_url.clone(),
            gateway_token: None,
            gateway_status: None,
            payment_reference: None,
            payment_trace: None,
            payment_rrn: None,
            payment_masked_pan: None,
            payment_terminal: None,
            payment_state: None,
            payment_status: None,
            status: PaymentRequestStatus::Created,
            status_reason: None,
            expires_at: now + FIAT_REQUEST_TTL,
            split: split.clone(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        let mut request = txn.insert_payment_request(request).await?;

        let settlement = build_settlement(
            &split,
            agency.sheba_number.as_ref(),
            &self.config.system_sheba,
        );
        let token_request = TokenRequest {
            amount_rials: amount.rials(),
            cell_number: request.cell_number.clone(),
            description: format!("wallet charge {invoice_number}"),
            invoice_number: invoice_number.clone(),
            redirect_url: request.redirect_url.clone(),
            settlement,
        };
        let token = self
            .gateway
            .get_token(&token_request)
            .await
            .map_err(|e| Error::GatewayFailed(format!("{e:#}")))?;
        if token.is_empty() {
            return Err(Error::AtipayTokenEmpty);
        }

        request.gateway_token = Some(token.clone());
        request.status = PaymentRequestStatus::Tokenized;
        request.updated_at = now;
        let mut request = txn.update_payment_request(request).await?;
        request.status = PaymentRequestStatus::Pending;
        let request = txn.update_payment_request(request).await?;

        audit::record(
            txn,
            format!("customer:{customer_id}"),
            "charge_wallet",
            "payment_request",
            Some(request.uuid),
            serde_json::json!({
                "amount": amount,
                "invoice": invoice_number.clone(),
            }),
            now,
        )
        .await;

        Ok(ChargeReceipt {
            request_id: request.id,
            request_uuid: request.uuid,
            invoice_number,
            gateway_token: token,
        })
    }

    // --- Callback --- //

    /// Handle the gateway redirect callback. Always renders a page for the
    /// paying customer; balance moves only after side-channel verification.
    #[instrument(skip_all, name = "(payment-callback)")]
    pub async fn payment_callback(
        &self,
        callback: GatewayCallback,
    ) -> Result<CallbackPage, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::PAYMENT_CALLBACK_FAILED)?;
        let result = self.payment_callback_inner(&mut txn, callback).await;
        let (page, notify) = txn
            .finish(result)
            .await
            .with_code(codes::PAYMENT_CALLBACK_FAILED)?;

        // Best-effort, after the transaction committed.
        if let Some((mobile, message, customer_id)) = notify {
            notify::sms_best_effort(
                self.notifier.clone(),
                mobile,
                message,
                Some(customer_id),
            );
        }

        Ok(page)
    }

    #[allow(clippy::type_complexity)]
    async fn payment_callback_inner(
        &self,
        txn: &mut S::Txn,
        callback: GatewayCallback,
    ) -> Result<(CallbackPage, Option<(Mobile, String, CustomerId)>), Error>
    {
        let now = TimestampMs::now();

        let mut request = txn
            .payment_request_by_invoice(&callback.reservation_number)
            .await?
            .ok_or(Error::PaymentRequestNotFound)?;

        // Idempotency: terminal requests reject all further transitions,
        // so a replayed or duplicated callback is a no-op.
        if request.status != PaymentRequestStatus::Pending {
            return Err(Error::PaymentRequestAlreadyProcessed);
        }

        request.gateway_status = Some(callback.status.clone());
        request.payment_reference = callback.reference_number.clone();
        request.payment_trace = callback.trace_number.clone();
        request.payment_rrn = callback.rrn.clone();
        request.payment_masked_pan = callback.masked_pan.clone();
        request.payment_terminal = callback.terminal_id.clone();
        request.payment_state = Some(callback.state.clone());
        request.payment_status = Some(callback.status.clone());
        request.updated_at = now;

        if now > request.expires_at {
            request.status = PaymentRequestStatus::Expired;
            request.status_reason = Some("payment window elapsed".to_owned());
            txn.update_payment_request(request).await?;
            return Ok((render_page(false, "payment window elapsed"), None));
        }

        let outcome =
            CallbackOutcome::from_gateway(&callback.status, &callback.state);
        let (status, reason) = match outcome {
            CallbackOutcome::Completed =>
                return self.settle_verified(txn, request, callback, now).await,
            CallbackOutcome::Cancelled =>
                (PaymentRequestStatus::Cancelled, "cancelled by user"),
            CallbackOutcome::Expired =>
                (PaymentRequestStatus::Expired, "gateway session expired"),
            CallbackOutcome::Failed =>
                (PaymentRequestStatus::Failed, "gateway reported failure"),
        };
        request.status = status;
        request.status_reason = Some(reason.to_owned());
        txn.update_payment_request(request).await?;
        Ok((render_page(false, reason), None))
    }

    /// Verify through the side channel, then perform the four ledger
    /// updates. A verification failure mutates the request to `failed`
    /// within the same transaction and renders a rejection; it does not
    /// roll back.
    #[allow(clippy::type_complexity)]
    async fn settle_verified(
        &self,
        txn: &mut S::Txn,
        mut request: PaymentRequest,
        callback: GatewayCallback,
        now: TimestampMs,
    ) -> Result<(CallbackPage, Option<(Mobile, String, CustomerId)>), Error>
    {
        let Some(reference) = callback.reference_number.as_deref() else {
            request.status = PaymentRequestStatus::Failed;
            request.status_reason =
                Some("missing reference number".to_owned());
            txn.update_payment_request(request).await?;
            return Ok((render_page(false, "missing reference number"), None));
        };

        let verified_rials = match self.gateway.verify_payment(reference).await
        {
            Ok(amount) => amount,
            Err(e) => {
                warn!("verify-payment failed: {e:#}");
                request.status = PaymentRequestStatus::Failed;
                request.status_reason = Some("verification failed".to_owned());
                txn.update_payment_request(request).await?;
                return Ok((render_page(false, "verification failed"), None));
            }
        };
        if verified_rials != request.amount.rials() {
            warn!(
                verified_rials,
                expected_rials = request.amount.rials(),
                "verify-payment amount mismatch"
            );
            request.status = PaymentRequestStatus::Failed;
            request.status_reason = Some("amount mismatch".to_owned());
            txn.update_payment_request(request).await?;
            return Ok((render_page(false, "amount mismatch"), None));
        }

        let split = request.split.clone();
        let correlation_id = request.correlation_id;
        let customer = txn
            .customer_by_id(request.customer_id)
            .await?
            .ok_or(Error::CustomerNotFound)?;
        let agency_id =
            split.agency_id.ok_or(Error::ReferrerAgencyIdRequired)?;

        // Customer wallet: free += real, credit += rebate.
        let (wallet, balance) =
            ledger::ensure_wallet(txn, &customer, now).await?;
        let before = balance.balances;
        let after = Balances {
            free: before.free + split.real_amount,
            credit: before.credit + split.customer_credit,
            ..before
        };
        let mut posting = Posting::new(
            &wallet,
            before,
            after,
            TxType::Deposit,
            request.amount,
            "fiat_charge",
        );
        posting.external_reference = Some(reference.to_owned());
        posting.external_trace = callback.trace_number.clone();
        posting.external_rrn = callback.rrn.clone();
        posting.external_masked_pan = callback.masked_pan.clone();
        posting.description = format!(
            "wallet charge via invoice {}",
            request.invoice_number
        );
        ledger::post(txn, correlation_id, now, posting).await?;

        // Agency wallet: share held for outbound settlement.
        lock_on_wallet(
            txn,
            correlation_id,
            agency_id,
            split.agency_share_with_tax,
            "agency_share_lock",
            now,
        )
        .await?;
        // Tax wallet.
        lock_on_wallet(
            txn,
            correlation_id,
            self.accounts.tax_customer_id,
            split.tax_system_share,
            "tax_share_lock",
            now,
        )
        .await?;
        // System wallet.
        lock_on_wallet(
            txn,
            correlation_id,
            self.accounts.system_customer_id,
            split.real_system_share,
            "system_share_lock",
            now,
        )
        .await?;

        request.status = PaymentRequestStatus::Completed;
        request.status_reason = None;
        request.updated_at = now;
        let request = txn.update_payment_request(request).await?;

        audit::record(
            txn,
            "system",
            "payment_completed",
            "payment_request",
            Some(request.uuid),
            serde_json::json!({
                "invoice": request.invoice_number.clone(),
                "amount": request.amount,
            }),
            now,
        )
        .await;

        info!(invoice = %request.invoice_number, "Fiat charge credited");
        let notify = (
            customer.representative_mobile.clone(),
            format!(
                "Your wallet was charged {} Toman.",
                split.real_amount + split.customer_credit
            ),
            customer.id,
        );
        Ok((render_page(true, "payment completed"), Some(notify)))
    }

    // --- Queries --- //

    /// Paged ledger history for one customer.
    pub async fn transaction_history(
        &self,
        customer_id: CustomerId,
        mut filter: TransactionFilter,
        page: Page,
    ) -> Result<TransactionHistory, BusinessError> {
        filter.customer_id = Some(customer_id);

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::TRANSACTION_HISTORY_FAILED)?;
        let result = async {
            let transactions =
                txn.transactions_by_filter(&filter, page).await?;
            let total = txn.count_transactions(&filter).await?;
            Ok(TransactionHistory {
                transactions,
                total,
                page,
            })
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::TRANSACTION_HISTORY_FAILED)
    }

    /// The customer's current compartment balances.
    pub async fn wallet_balance(
        &self,
        customer_id: CustomerId,
    ) -> Result<WalletBalanceView, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::WALLET_BALANCE_FAILED)?;
        let result = async {
            let Some(wallet) = txn.wallet_by_customer_id(customer_id).await?
            else {
                return Ok(WalletBalanceView {
                    balances: Balances::ZERO,
                    total: Amount::ZERO,
                });
            };
            let snapshot: BalanceSnapshot =
                ledger::current_balance(&mut txn, wallet.id).await?;
            Ok(WalletBalanceView {
                balances: snapshot.balances,
                total: snapshot.total,
            })
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::WALLET_BALANCE_FAILED)
    }
}

/// Place `amount` in `locked` on the wallet of `customer_id`.
async fn lock_on_wallet<T: StoreTxn>(
    txn: &mut T,
    correlation_id: common::id::CorrelationId,
    customer_id: CustomerId,
    amount: Amount,
    reason: &str,
    now: TimestampMs,
) -> Result<(), Error> {
    let (wallet, balance) =
        ledger::ensure_wallet_by_customer_id(txn, customer_id, now).await?;
    let before = balance.balances;
    let after = Balances {
        locked: before.locked + amount,
        ..before
    };
    let posting =
        Posting::new(&wallet, before, after, TxType::Lock, amount, reason);
    ledger::post(txn, correlation_id, now, posting).await?;
    Ok(())
}

fn validate_charge_amount(amount: Amount) -> Result<(), Error> {
    if amount < MIN_CHARGE {
        return Err(Error::AmountTooLow);
    }
    if amount.tomans() % CHARGE_MULTIPLE.tomans() != 0 {
        return Err(Error::AmountNotMultiple);
    }
    Ok(())
}

/// Resolve the customer's referring agency and its active discount.
async fn resolve_agency_discount<T: StoreTxn>(
    txn: &mut T,
    customer: &Customer,
    now: TimestampMs,
) -> Result<(Customer, crate::models::customer::AgencyDiscount), Error> {
    let agency_id = customer
        .referrer_agency_id
        .ok_or(Error::ReferrerAgencyIdRequired)?;
    let agency = txn
        .customer_by_id(agency_id)
        .await?
        .ok_or(Error::CustomerNotFound)?;
    if !agency.is_active {
        return Err(Error::AgencyInactive);
    }
    let discount = txn
        .active_discount(agency.id, customer.id, now)
        .await?
        .ok_or(Error::AgencyDiscountNotFound)?;
    Ok((agency, discount))
}

fn render_page(success: bool, detail: &str) -> CallbackPage {
    let (title, class) = if success {
        ("Payment successful", "success")
    } else {
        ("Payment failed", "failure")
    };
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"fa\"><head><meta charset=\"utf-8\">\
         <title>{title}</title></head>\
         <body class=\"{class}\"><h1>{title}</h1><p>{detail}</p></body></html>"
    );
    CallbackPage {
        success,
        html,
    }
}

#[cfg(test)]
mod test {
    use common::id::AgencyDiscountId;
    use std::str::FromStr;

    use super::*;
    use crate::models::customer::{AgencyDiscount, DiscountRate};

    fn sheba(tail: u64) -> Sheba {
        Sheba::from_str(&format!("IR{tail:024}")).unwrap()
    }

    fn split(agency: u64, system: u64) -> ChargeSplit {
        ChargeSplit {
            agency_share_with_tax: Amount::from_tomans(agency),
            system_share_with_tax: Amount::from_tomans(system),
            ..ChargeSplit::default()
        }
    }

    #[test]
    fn amount_validation() {
        assert!(matches!(
            validate_charge_amount(Amount::from_tomans(999)),
            Err(Error::AmountTooLow),
        ));
        assert!(matches!(
            validate_charge_amount(Amount::from_tomans(1500)),
            Err(Error::AmountNotMultiple),
        ));
        assert!(validate_charge_amount(Amount::from_tomans(1000)).is_ok());
        assert!(validate_charge_amount(Amount::from_tomans(250_000)).is_ok());
    }

    #[test]
    fn settlement_splits_by_iban() {
        let items = build_settlement(
            &split(375_000, 625_000),
            Some(&sheba(1)),
            &sheba(2),
        );
        assert_eq!(
            items,
            vec![
                SettlementItem {
                    iban: sheba(1),
                    amount_rials: 3_750_000,
                },
                SettlementItem {
                    iban: sheba(2),
                    amount_rials: 6_250_000,
                },
            ],
        );
    }

    #[test]
    fn settlement_merges_same_iban_then_omits() {
        // Agency settles to the system IBAN: merged, then omitted since
        // only the system IBAN remains.
        let items =
            build_settlement(&split(375_000, 625_000), Some(&sheba(2)), &sheba(2));
        assert!(items.is_empty());
    }

    #[test]
    fn settlement_drops_zero_items_and_agencyless() {
        // Zero agency share: only the system item would remain -> omitted.
        let items =
            build_settlement(&split(0, 1_000_000), Some(&sheba(1)), &sheba(2));
        assert!(items.is_empty());

        // No agency sheba on file: same outcome.
        let items = build_settlement(&split(375_000, 625_000), None, &sheba(2));
        assert!(items.is_empty());
    }

    #[test]
    fn callback_page_renders_both_variants() {
        let ok = render_page(true, "payment completed");
        assert!(ok.success);
        assert!(ok.html.contains("Payment successful"));

        let bad = render_page(false, "amount mismatch");
        assert!(!bad.success);
        assert!(bad.html.contains("amount mismatch"));
    }

    #[test]
    fn agency_discount_is_plumbed_into_split() {
        let discount = AgencyDiscount {
            id: AgencyDiscountId::new(3),
            uuid: Uuid::new_v4(),
            agency_id: CustomerId::new(10),
            customer_id: CustomerId::new(20),
            discount_rate: DiscountRate::from_basis_points(2000),
            expires_at: None,
            reason: String::new(),
            metadata: serde_json::Value::Null,
            created_at: TimestampMs::MIN,
        };
        let split = rebate::fiat_split(
            Amount::from_tomans(1_000_000),
            CustomerId::new(20),
            &discount,
        );
        assert_eq!(split.agency_id, Some(CustomerId::new(10)));
        assert_eq!(split.agency_discount_id, Some(AgencyDiscountId::new(3)));
    }
}
