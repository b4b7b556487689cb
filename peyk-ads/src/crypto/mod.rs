//! The crypto payment flow.
//!
//! A request provisions a deposit destination through a pluggable provider
//! and then tracks deposits through detected -> confirmed -> credited.
//! Deposits are de-duplicated by tx hash, and finalization is guarded by
//! `credited_at` on both the deposit and the request, so at-least-once
//! webhook delivery (and polling racing webhooks) produces exactly-once
//! balance effects.

/// BitHide provider client.
pub mod bithide;
/// OxaPay provider client.
pub mod oxapay;
/// The provider capability set and webhook signature helpers.
pub mod provider;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use common::amount::Amount;
use common::constants::{CHARGE_MULTIPLE, CRYPTO_REQUEST_TTL, MIN_CHARGE};
use common::id::{CryptoDepositId, CryptoRequestId, CustomerId};
use common::time::TimestampMs;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit;
use crate::error::{codes, BusinessError, Error, ResultExt};
use crate::ledger::{self, PlatformAccounts, Posting};
use crate::models::crypto::{
    CryptoDeposit, CryptoPaymentRequest, CryptoPlatform, CryptoRequestStatus,
    DepositStatus, TxHash,
};
use crate::models::wallet::{Balances, TxType};
use crate::notify::{self, Notifier};
use crate::rebate;
use crate::repo::{Store, StoreTxn};
use provider::{
    CryptoProvider, InvoiceState, ProviderDeposit, ProviderDepositStatus,
    WebhookEvent,
};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct CryptoConfig {
    /// Base for per-platform webhook callback urls.
    pub callback_base_url: String,
}

/// A request plus its observed deposits; the `getStatus` view.
#[derive(Clone, Debug)]
pub struct RequestStatusView {
    pub request: CryptoPaymentRequest,
    pub deposits: Vec<CryptoDeposit>,
}

pub struct CryptoFlow<S, N> {
    store: S,
    notifier: Arc<N>,
    providers: BTreeMap<CryptoPlatform, Arc<dyn CryptoProvider>>,
    accounts: PlatformAccounts,
    config: CryptoConfig,
}

impl<S: Store, N: Notifier> CryptoFlow<S, N> {
    pub fn new(
        store: S,
        notifier: Arc<N>,
        providers: Vec<Arc<dyn CryptoProvider>>,
        accounts: PlatformAccounts,
        config: CryptoConfig,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.platform(), provider))
            .collect();
        Self {
            store,
            notifier,
            providers,
            accounts,
            config,
        }
    }

    fn provider(
        &self,
        platform: CryptoPlatform,
    ) -> Result<&Arc<dyn CryptoProvider>, Error> {
        self.providers.get(&platform).ok_or_else(|| {
            Error::ValidationFailed(format!(
                "no provider registered for {platform}"
            ))
        })
    }

    // --- Create --- //

    /// Create a request and provision a deposit destination.
    #[instrument(skip_all, name = "(crypto-create)")]
    pub async fn create_request(
        &self,
        customer_id: CustomerId,
        fiat_amount: Amount,
        coin: String,
        network: String,
        platform: CryptoPlatform,
    ) -> Result<CryptoPaymentRequest, BusinessError> {
        validate_charge_amount(fiat_amount)
            .with_code(codes::CRYPTO_CREATE_FAILED)?;
        let provider = self
            .provider(platform)
            .with_code(codes::CRYPTO_CREATE_FAILED)?
            .clone();

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_CREATE_FAILED)?;
        let result = self
            .create_request_inner(
                &mut txn,
                provider.as_ref(),
                customer_id,
                fiat_amount,
                coin,
                network,
                platform,
            )
            .await;
        let request = txn
            .finish(result)
            .await
            .with_code(codes::CRYPTO_CREATE_FAILED)?;

        info!(%customer_id, request = %request.uuid, "Crypto request created");
        Ok(request)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_request_inner(
        &self,
        txn: &mut S::Txn,
        provider: &dyn CryptoProvider,
        customer_id: CustomerId,
        fiat_amount: Amount,
        coin: String,
        network: String,
        platform: CryptoPlatform,
    ) -> Result<CryptoPaymentRequest, Error> {
        let now = TimestampMs::now();

        let customer = txn
            .customer_by_id(customer_id)
            .await?
            .ok_or(Error::CustomerNotFound)?;
        if !customer.is_active {
            return Err(Error::AccountInactive);
        }
        let agency_id = customer
            .referrer_agency_id
            .ok_or(Error::ReferrerAgencyIdRequired)?;
        let discount = txn
            .active_discount(agency_id, customer.id, now)
            .await?
            .ok_or(Error::AgencyDiscountNotFound)?;
        let (wallet, _balance) =
            ledger::ensure_wallet(txn, &customer, now).await?;

        let split = rebate::crypto_split(fiat_amount, customer.id, &discount);

        let request = CryptoPaymentRequest {
            id: CryptoRequestId::new(0),
            uuid: Uuid::new_v4(),
            correlation_id: common::id::CorrelationId::generate(),
            customer_id: customer.id,
            wallet_id: wallet.id,
            fiat_amount,
            coin: coin.clone(),
            network: network.clone(),
            platform,
            expected_coin_amount: None,
            exchange_rate: None,
            deposit_address: None,
            deposit_memo: None,
            provider_request_id: None,
            status: CryptoRequestStatus::Created,
            status_reason: None,
            expires_at: None,
            detected_at: None,
            confirmed_at: None,
            credited_at: None,
            split,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        let mut request = txn.insert_crypto_request(request).await?;

        let quote = provider
            .get_quote(fiat_amount, &coin, &network)
            .await
            .map_err(|e| Error::CryptoProviderQuoteFailed(format!("{e:#}")))?;

        let callback_url = format!(
            "{}/v1/crypto/webhook/{platform}",
            self.config.callback_base_url,
        );
        let provisioned = provider
            .provision_deposit(&request.uuid.to_string(), &callback_url)
            .await
            .map_err(|e| {
                Error::CryptoAddressProvisionFailed(format!("{e:#}"))
            })?;

        request.expected_coin_amount = Some(quote.coin_amount);
        request.exchange_rate = Some(quote.exchange_rate);
        request.deposit_address = Some(provisioned.address);
        request.deposit_memo = provisioned.memo;
        request.provider_request_id = Some(provisioned.provider_request_id);
        request.expires_at = Some(
            provisioned.expires_at.unwrap_or(now + CRYPTO_REQUEST_TTL),
        );
        request.status = CryptoRequestStatus::AddressProvisioned;
        request.updated_at = now;
        let mut request = txn.update_crypto_request(request).await?;
        request.status = CryptoRequestStatus::Pending;
        let request = txn.update_crypto_request(request).await?;

        audit::record(
            txn,
            format!("customer:{customer_id}"),
            "crypto_charge_created",
            "crypto_payment_request",
            Some(request.uuid),
            serde_json::json!({
                "fiat_amount": fiat_amount,
                "coin": request.coin.clone(),
                "platform": platform.as_str(),
            }),
            now,
        )
        .await;

        Ok(request)
    }

    // --- Queries --- //

    /// The request and its deposits.
    pub async fn get_status(
        &self,
        request_uuid: &Uuid,
    ) -> Result<RequestStatusView, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)?;
        let result = async {
            let request = txn
                .crypto_request_by_uuid(request_uuid)
                .await?
                .ok_or(Error::CryptoRequestNotFound)?;
            let deposits =
                txn.crypto_deposits_by_request(request.id).await?;
            Ok(RequestStatusView { request, deposits })
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)
    }

    // --- Reconciliation entrypoints --- //

    /// Poll the provider for deposits and reconcile them.
    #[instrument(skip_all, name = "(crypto-refresh)")]
    pub async fn refresh_deposits(
        &self,
        request_uuid: &Uuid,
    ) -> Result<RequestStatusView, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)?;
        let result = async {
            let mut request = txn
                .crypto_request_by_uuid(request_uuid)
                .await?
                .ok_or(Error::CryptoRequestNotFound)?;
            let provider_request_id = request
                .provider_request_id
                .clone()
                .ok_or(Error::CryptoRequestNotFound)?;

            let provider = self.provider(request.platform)?.clone();
            let deposits = provider
                .get_deposits(&provider_request_id)
                .await
                .map_err(|e| {
                    Error::CryptoProviderCallFailed(format!("{e:#}"))
                })?;

            let mut credited = false;
            for deposit in &deposits {
                credited |= self
                    .reconcile_deposit(&mut txn, &mut request, deposit, None)
                    .await?;
            }
            let deposits =
                txn.crypto_deposits_by_request(request.id).await?;
            Ok((RequestStatusView { request, deposits }, credited))
        }
        .await;
        let (view, credited) = txn
            .finish(result)
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)?;

        if credited {
            self.notify_credited(&view.request).await;
        }
        Ok(view)
    }

    /// Look one tx hash up with the provider and reconcile it.
    #[instrument(skip_all, name = "(crypto-manual-verify)")]
    pub async fn manual_verify(
        &self,
        request_uuid: &Uuid,
        tx_hash: &TxHash,
    ) -> Result<RequestStatusView, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_VERIFY_FAILED)?;
        let result = async {
            let mut request = txn
                .crypto_request_by_uuid(request_uuid)
                .await?
                .ok_or(Error::CryptoRequestNotFound)?;

            let provider = self.provider(request.platform)?.clone();
            let deposit = provider
                .verify_tx(tx_hash)
                .await
                .map_err(|e| {
                    Error::CryptoProviderCallFailed(format!("{e:#}"))
                })?
                .ok_or_else(|| {
                    Error::ValidationFailed(format!(
                        "transaction {tx_hash} not known to the provider"
                    ))
                })?;

            let credited = self
                .reconcile_deposit(&mut txn, &mut request, &deposit, None)
                .await?;
            let deposits =
                txn.crypto_deposits_by_request(request.id).await?;
            Ok((RequestStatusView { request, deposits }, credited))
        }
        .await;
        let (view, credited) = txn
            .finish(result)
            .await
            .with_code(codes::CRYPTO_VERIFY_FAILED)?;

        if credited {
            self.notify_credited(&view.request).await;
        }
        Ok(view)
    }

    /// Cancel a request. Permitted only while the request is not final and
    /// no deposit has been detected.
    #[instrument(skip_all, name = "(crypto-cancel)")]
    pub async fn cancel_request(
        &self,
        request_uuid: &Uuid,
    ) -> Result<CryptoPaymentRequest, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_CANCEL_FAILED)?;
        let result = async {
            let mut request = txn
                .crypto_request_by_uuid(request_uuid)
                .await?
                .ok_or(Error::CryptoRequestNotFound)?;
            if request.status.is_final() {
                return Err(Error::CryptoRequestAlreadyFinalized);
            }
            let deposits =
                txn.crypto_deposits_by_request(request.id).await?;
            if !deposits.is_empty() {
                return Err(Error::CryptoDepositAlreadyDetected);
            }

            let now = TimestampMs::now();
            request.status = CryptoRequestStatus::Cancelled;
            request.status_reason = Some("cancelled by customer".to_owned());
            request.updated_at = now;
            let request = txn.update_crypto_request(request).await?;

            audit::record(
                &mut txn,
                format!("customer:{}", request.customer_id),
                "crypto_charge_cancelled",
                "crypto_payment_request",
                Some(request.uuid),
                serde_json::Value::Null,
                now,
            )
            .await;
            Ok(request)
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CRYPTO_CANCEL_FAILED)
    }

    /// Verify, parse, and reconcile one provider webhook delivery.
    #[instrument(skip_all, name = "(crypto-webhook)", fields(platform = %platform_name))]
    pub async fn handle_provider_webhook(
        &self,
        platform_name: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<(), BusinessError> {
        let platform = CryptoPlatform::from_str(platform_name)
            .map_err(|_| {
                Error::ValidationFailed(format!(
                    "unknown crypto platform {platform_name}"
                ))
            })
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?;
        let provider = self
            .provider(platform)
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?
            .clone();

        provider
            .verify_webhook(raw_body, signature_header)
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?;
        let event = provider
            .parse_webhook(raw_body)
            .map_err(|e| Error::ValidationFailed(format!("{e:#}")))
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?;

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?;
        let result = self
            .apply_webhook_event(&mut txn, platform, &event)
            .await;
        let (request, credited) = txn
            .finish(result)
            .await
            .with_code(codes::CRYPTO_WEBHOOK_FAILED)?;

        if credited {
            self.notify_credited(&request).await;
        }
        Ok(())
    }

    async fn apply_webhook_event(
        &self,
        txn: &mut S::Txn,
        platform: CryptoPlatform,
        event: &WebhookEvent,
    ) -> Result<(CryptoPaymentRequest, bool), Error> {
        let mut request = locate_request(txn, platform, event).await?;

        let mut credited = false;
        for deposit in &event.deposits {
            credited |= self
                .reconcile_deposit(
                    txn,
                    &mut request,
                    deposit,
                    event.invoice_state,
                )
                .await?;
        }

        // Invoice-level states with no deposit attached still move the
        // request.
        if event.deposits.is_empty() {
            match event.invoice_state {
                Some(InvoiceState::Expired)
                    if !request.status.is_final() =>
                {
                    request.status = CryptoRequestStatus::Expired;
                    request.updated_at = TimestampMs::now();
                    request = txn.update_crypto_request(request).await?;
                }
                Some(InvoiceState::Failed) if !request.status.is_final() => {
                    request.status = CryptoRequestStatus::Failed;
                    request.updated_at = TimestampMs::now();
                    request = txn.update_crypto_request(request).await?;
                }
                _ => (),
            }
        }

        Ok((request, credited))
    }

    // --- Deposit reconciliation --- //

    /// Upsert the deposit by tx hash and, when it is confirmed and neither
    /// the deposit nor the request has been credited, finalize. Returns
    /// whether crediting happened in this call.
    async fn reconcile_deposit(
        &self,
        txn: &mut S::Txn,
        request: &mut CryptoPaymentRequest,
        reported: &ProviderDeposit,
        invoice_state: Option<InvoiceState>,
    ) -> Result<bool, Error> {
        let now = TimestampMs::now();

        let mut deposit =
            match txn.crypto_deposit_by_tx_hash(&reported.tx_hash).await? {
                Some(existing) => existing,
                None => {
                    let deposit = CryptoDeposit {
                        id: CryptoDepositId::new(0),
                        uuid: Uuid::new_v4(),
                        correlation_id: request.correlation_id,
                        request_id: request.id,
                        customer_id: request.customer_id,
                        wallet_id: request.wallet_id,
                        coin: request.coin.clone(),
                        network: request.network.clone(),
                        platform: request.platform,
                        tx_hash: reported.tx_hash.clone(),
                        from_address: reported.from_address.clone(),
                        to_address: reported.to_address.clone(),
                        destination_tag: reported.destination_tag.clone(),
                        amount_coin: reported.amount_coin.clone(),
                        confirmations: 0,
                        required_confirmations: reported
                            .required_confirmations,
                        status: DepositStatus::Detected,
                        detected_at: reported.detected_at.unwrap_or(now),
                        confirmed_at: None,
                        credited_at: None,
                        metadata: serde_json::Value::Null,
                    };
                    txn.insert_crypto_deposit(deposit).await?
                }
            };

        deposit.confirmations = reported.confirmations;
        deposit.required_confirmations = reported.required_confirmations;

        if request.detected_at.is_none() {
            request.detected_at = Some(deposit.detected_at);
            request.updated_at = now;
            *request = txn.update_crypto_request(request.clone()).await?;
        }
        if matches!(invoice_state, Some(InvoiceState::Underpaid))
            && request.status_reason.as_deref() != Some("underpaid")
            && !request.status.is_final()
        {
            request.status_reason = Some("underpaid".to_owned());
            request.updated_at = now;
            *request = txn.update_crypto_request(request.clone()).await?;
        }

        match reported.status {
            ProviderDepositStatus::Pending => {
                txn.update_crypto_deposit(deposit).await?;
                Ok(false)
            }
            ProviderDepositStatus::Failed => {
                if deposit.credited_at.is_none() {
                    deposit.status = DepositStatus::Failed;
                }
                txn.update_crypto_deposit(deposit).await?;
                Ok(false)
            }
            ProviderDepositStatus::Confirmed => {
                if deposit.confirmed_at.is_none() {
                    deposit.confirmed_at =
                        Some(reported.confirmed_at.unwrap_or(now));
                }
                if deposit.status == DepositStatus::Detected {
                    deposit.status = DepositStatus::Confirmed;
                }

                if deposit.credited_at.is_some()
                    || request.credited_at.is_some()
                {
                    // Duplicate delivery: the guard makes this a no-op.
                    txn.update_crypto_deposit(deposit).await?;
                    return Ok(false);
                }

                self.credit_on_confirmed(txn, request, &mut deposit, now)
                    .await?;
                Ok(true)
            }
        }
    }

    /// The idempotent finalization step: four ledger updates sharing the
    /// request's correlation id, then the `credited_at` stamps.
    async fn credit_on_confirmed(
        &self,
        txn: &mut S::Txn,
        request: &mut CryptoPaymentRequest,
        deposit: &mut CryptoDeposit,
        now: TimestampMs,
    ) -> Result<(), Error> {
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
            request.fiat_amount,
            "crypto_charge",
        );
        posting.external_reference = Some(deposit.tx_hash.to_string());
        posting.description = format!(
            "crypto charge {} via {}",
            request.uuid, request.platform,
        );
        ledger::post(txn, correlation_id, now, posting).await?;

        // Agency wallet: owed share accrual.
        {
            let (agency_wallet, agency_balance) =
                ledger::ensure_wallet_by_customer_id(txn, agency_id, now)
                    .await?;
            let before = agency_balance.balances;
            let after = Balances {
                agency_share_with_tax: before.agency_share_with_tax
                    + split.agency_share_with_tax,
                ..before
            };
            let posting = Posting::new(
                &agency_wallet,
                before,
                after,
                TxType::ChargeAgencyShareWithTax,
                split.agency_share_with_tax,
                "crypto_agency_share",
            );
            ledger::post(txn, correlation_id, now, posting).await?;
        }

        // Tax and system wallets: held for outbound settlement.
        for (customer_id, amount, reason) in [
            (
                self.accounts.tax_customer_id,
                split.tax_system_share,
                "crypto_tax_share_lock",
            ),
            (
                self.accounts.system_customer_id,
                split.real_system_share,
                "crypto_system_share_lock",
            ),
        ] {
            let (wallet, balance) =
                ledger::ensure_wallet_by_customer_id(txn, customer_id, now)
                    .await?;
            let before = balance.balances;
            let after = Balances {
                locked: before.locked + amount,
                ..before
            };
            let posting = Posting::new(
                &wallet, before, after, TxType::Lock, amount, reason,
            );
            ledger::post(txn, correlation_id, now, posting).await?;
        }

        deposit.status = DepositStatus::Credited;
        deposit.credited_at = Some(now);
        *deposit = txn.update_crypto_deposit(deposit.clone()).await?;

        request.credited_at = Some(now);
        request.confirmed_at = deposit.confirmed_at;
        request.detected_at =
            request.detected_at.or(Some(deposit.detected_at));
        request.status = CryptoRequestStatus::Credited;
        request.status_reason = None;
        request.updated_at = now;
        *request = txn.update_crypto_request(request.clone()).await?;

        audit::record(
            txn,
            "system",
            "crypto_charge_credited",
            "crypto_payment_request",
            Some(request.uuid),
            serde_json::json!({
                "tx_hash": deposit.tx_hash.as_str(),
                "fiat_amount": request.fiat_amount,
            }),
            now,
        )
        .await;

        info!(request = %request.uuid, tx_hash = %deposit.tx_hash, "Crypto charge credited");
        Ok(())
    }

    // --- Expiry sweep --- //

    /// Move stale pending requests (past `expires_at`, no deposit) to
    /// `expired`. Returns how many were expired.
    pub async fn expire_stale_requests(
        &self,
        now: TimestampMs,
    ) -> Result<u64, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)?;
        let result = async {
            let stale =
                txn.list_expired_pending_crypto_requests(now).await?;
            let mut expired = 0u64;
            for mut request in stale {
                request.status = CryptoRequestStatus::Expired;
                request.status_reason =
                    Some("deposit window elapsed".to_owned());
                request.updated_at = now;
                txn.update_crypto_request(request).await?;
                expired += 1;
            }
            Ok(expired)
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CRYPTO_STATUS_FAILED)
    }

    /// Best-effort "payment credited" SMS, after the transaction
    /// committed. The mobile lives on the customer row, so this opens a
    /// short read transaction of its own.
    async fn notify_credited(&self, request: &CryptoPaymentRequest) {
        let mobile = async {
            let mut txn = self.store.begin().await?;
            let result = txn.customer_by_id(request.customer_id).await;
            txn.finish(result).await
        }
        .await;
        match mobile {
            Ok(Some(customer)) => notify::sms_best_effort(
                self.notifier.clone(),
                customer.representative_mobile,
                format!(
                    "Your crypto payment of {} Toman was credited.",
                    request.fiat_amount,
                ),
                Some(request.customer_id),
            ),
            Ok(None) => warn!("Credited request has no customer row"),
            Err(e) => warn!("Failed to load customer for notification: {e}"),
        }
    }
}

/// Find the request a webhook event addresses.
async fn locate_request<T: StoreTxn>(
    txn: &mut T,
    platform: CryptoPlatform,
    event: &WebhookEvent,
) -> Result<CryptoPaymentRequest, Error> {
    if let Some(provider_request_id) = event.provider_request_id.as_deref() {
        if let Some(request) = txn
            .crypto_request_by_provider_request_id(
                platform,
                provider_request_id,
            )
            .await?
        {
            return Ok(request);
        }
    }
    if let Some(address) = event.deposit_address.as_deref() {
        if let Some(request) =
            txn.crypto_request_by_deposit_address(address).await?
        {
            return Ok(request);
        }
    }
    error!("Webhook addressed no known crypto request");
    Err(Error::CryptoRequestNotFound)
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn amount_validation_matches_fiat_rules() {
        assert!(matches!(
            validate_charge_amount(Amount::from_tomans(500)),
            Err(Error::AmountTooLow),
        ));
        assert!(matches!(
            validate_charge_amount(Amount::from_tomans(1001)),
            Err(Error::AmountNotMultiple),
        ));
        assert!(validate_charge_amount(Amount::from_tomans(50_000)).is_ok());
    }

}
