//! The campaign lifecycle engine.
//!
//! Customers assemble a campaign while it is `initiated` / `in-progress`,
//! then finalize it: the total cost is priced against the audience catalog
//! and reserved out of spendable funds into `frozen`, and the campaign
//! moves to `waiting-for-approval`. Approval consumes the reservation into
//! `spent_on_campaign`; rejection and cancellation return it as `credit`.
//! Execution bots claim approved campaigns (`running`) and report
//! completion (`executed`).
//!
//! Approval and refund resolve the reservation by locating the unique
//! completed freeze transaction for (customer, campaign); its amount is
//! read from the typed column, never from metadata.

/// Capacity against the audience catalog.
pub mod capacity;
/// Message pricing.
pub mod pricing;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::amount::Amount;
use common::constants::MIN_SCHEDULE_LEAD;
use common::id::{CampaignId, CustomerId};
use common::mobile::Mobile;
use common::time::TimestampMs;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::audience::AudienceStore;
use crate::audit;
use crate::cache::Cache;
use crate::error::{codes, BusinessError, Error, ResultExt};
use crate::ledger::{self, Posting};
use crate::models::campaign::{
    Campaign, CampaignFilter, CampaignSpec, CampaignStatus, PriceFactor,
};
use crate::models::wallet::{
    Balances, LedgerTransaction, Page, TransactionFilter, TxStatus, TxType,
};
use crate::notify::{self, Notifier};
use crate::repo::{Store, StoreTxn};

/// `source` stamped on freeze transactions.
pub const FREEZE_SOURCE: &str = "campaign_update";
/// `operation` stamped on freeze transactions.
pub const FREEZE_OPERATION: &str = "reserve_budget";

#[derive(Clone, Debug, serde::Deserialize)]
pub struct CampaignConfig {
    /// Updates targeting fewer recipients than this are rejected.
    pub min_acceptable_capacity: u64,
    /// Where finalize notifications go.
    pub admin_email: Option<String>,
}

pub struct CampaignEngine<S, C, N> {
    store: S,
    audience: Arc<AudienceStore<C>>,
    notifier: Arc<N>,
    config: CampaignConfig,
}

impl<S: Store, C: Cache, N: Notifier> CampaignEngine<S, C, N> {
    pub fn new(
        store: S,
        audience: Arc<AudienceStore<C>>,
        notifier: Arc<N>,
        config: CampaignConfig,
    ) -> Self {
        Self {
            store,
            audience,
            notifier,
            config,
        }
    }

    // --- Customer operations --- //

    /// Create an empty campaign shell.
    pub async fn create(
        &self,
        customer_id: CustomerId,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_CREATE_FAILED)?;
        let result = async {
            let now = TimestampMs::now();
            let customer = txn
                .customer_by_id(customer_id)
                .await?
                .ok_or(Error::CustomerNotFound)?;
            if !customer.is_active {
                return Err(Error::AccountInactive);
            }

            let campaign = Campaign {
                id: CampaignId::new(0),
                uuid: Uuid::new_v4(),
                customer_id,
                status: CampaignStatus::Initiated,
                spec: CampaignSpec::default(),
                comment: None,
                num_audience: None,
                statistics: serde_json::Value::Null,
                created_at: now,
                updated_at: now,
            };
            txn.insert_campaign(campaign).await
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_CREATE_FAILED)
    }

    /// Replace the campaign spec. Only `initiated` / `in-progress`
    /// campaigns are mutable; the first update moves `initiated` to
    /// `in-progress`.
    #[instrument(skip_all, name = "(campaign-update)")]
    pub async fn update(
        &self,
        customer_id: CustomerId,
        campaign_uuid: &Uuid,
        spec: CampaignSpec,
    ) -> Result<Campaign, BusinessError> {
        let catalog = self
            .audience
            .full()
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)?;

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)?;
        let result = async {
            let now = TimestampMs::now();
            let mut campaign =
                owned_campaign(&mut txn, customer_id, campaign_uuid).await?;
            if !campaign.status.is_mutable() {
                return Err(Error::CampaignUpdateNotAllowed);
            }

            if let Some(schedule_at) = spec.schedule_at {
                check_schedule_lead(schedule_at, now)?;
            }
            if spec.level1.is_some() {
                let capacity = capacity::capacity(&catalog, &spec);
                if capacity < self.config.min_acceptable_capacity {
                    return Err(Error::InsufficientCampaignCapacity);
                }
            }

            if campaign.status == CampaignStatus::Initiated {
                campaign.status = CampaignStatus::InProgress;
            }
            campaign.spec = spec;
            campaign.updated_at = now;
            txn.update_campaign(campaign).await
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)
    }

    /// Finalize: price the campaign, reserve its budget into `frozen`, and
    /// park it for approval.
    #[instrument(skip_all, name = "(campaign-finalize)")]
    pub async fn finalize(
        &self,
        customer_id: CustomerId,
        campaign_uuid: &Uuid,
    ) -> Result<Campaign, BusinessError> {
        let catalog = self
            .audience
            .full()
            .await
            .with_code(codes::CAMPAIGN_FINALIZE_FAILED)?;

        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_FINALIZE_FAILED)?;
        let result = self
            .finalize_inner(&mut txn, customer_id, campaign_uuid, &catalog)
            .await;
        let campaign = txn
            .finish(result)
            .await
            .with_code(codes::CAMPAIGN_FINALIZE_FAILED)?;

        // Best-effort admin heads-up, outside the transaction.
        if let Some(admin_email) = &self.config.admin_email {
            notify::email_best_effort(
                self.notifier.clone(),
                admin_email.clone(),
                "Campaign awaiting approval".to_owned(),
                format!("Campaign {} needs review.", campaign.uuid),
            );
        }

        info!(campaign = %campaign.uuid, "Campaign finalized");
        Ok(campaign)
    }

    async fn finalize_inner(
        &self,
        txn: &mut S::Txn,
        customer_id: CustomerId,
        campaign_uuid: &Uuid,
        catalog: &crate::models::audience::AudienceSpec,
    ) -> Result<Campaign, Error> {
        let now = TimestampMs::now();
        let mut campaign =
            owned_campaign(txn, customer_id, campaign_uuid).await?;
        if campaign.status != CampaignStatus::InProgress {
            return Err(Error::CampaignUpdateNotAllowed);
        }

        let missing = campaign.spec.missing_fields();
        if !missing.is_empty() {
            return Err(Error::ValidationFailed(format!(
                "missing required fields: {}",
                missing.join(", "),
            )));
        }
        let schedule_at =
            campaign.spec.schedule_at.expect("checked by missing_fields");
        check_schedule_lead(schedule_at, now)?;

        let capacity = capacity::capacity(catalog, &campaign.spec);
        if capacity < self.config.min_acceptable_capacity {
            return Err(Error::InsufficientCampaignCapacity);
        }

        let (price_per_msg, line_factor) =
            self.price_campaign(txn, &campaign.spec).await?;
        let (num_audience, total_cost) = pricing::audience_and_cost(
            capacity,
            campaign.spec.budget,
            price_per_msg,
        );

        // Reserve the budget.
        let customer = txn
            .customer_by_id(customer_id)
            .await?
            .ok_or(Error::CustomerNotFound)?;
        let (wallet, balance) =
            ledger::ensure_wallet(txn, &customer, now).await?;
        let before = balance.balances;
        let spent = ledger::spend_ordered(&before, total_cost)?;
        let after = Balances {
            frozen: spent.frozen + total_cost,
            ..spent
        };

        let correlation_id = common::id::CorrelationId::generate();
        let mut posting = Posting::new(
            &wallet,
            before,
            after,
            TxType::Freeze,
            total_cost,
            "campaign_budget_reserved",
        );
        posting.source = Some(FREEZE_SOURCE.to_owned());
        posting.operation = Some(FREEZE_OPERATION.to_owned());
        posting.campaign_id = Some(campaign.id);
        posting.description =
            format!("budget reserved for campaign {}", campaign.uuid);
        posting.metadata = serde_json::json!({
            "source": FREEZE_SOURCE,
            "operation": FREEZE_OPERATION,
            "campaign_id": campaign.id,
            "amount": total_cost,
            "campaign_spec": campaign.spec.clone(),
            "line_number_price_factor": line_factor.per_mille(),
        });
        ledger::post(txn, correlation_id, now, posting).await?;

        campaign.status = CampaignStatus::WaitingForApproval;
        campaign.num_audience = Some(num_audience);
        campaign.updated_at = now;
        let campaign = txn.update_campaign(campaign).await?;

        audit::record(
            txn,
            format!("customer:{customer_id}"),
            "campaign_finalized",
            "campaign",
            Some(campaign.uuid),
            serde_json::json!({
                "total_cost": total_cost,
                "num_audience": num_audience,
            }),
            now,
        )
        .await;

        Ok(campaign)
    }

    /// Price one message for a finalizable spec.
    async fn price_campaign(
        &self,
        txn: &mut S::Txn,
        spec: &CampaignSpec,
    ) -> Result<(Amount, PriceFactor), Error> {
        let line_value =
            spec.line_number.as_deref().expect("checked by missing_fields");
        let line = txn
            .line_number_by_value(line_value)
            .await?
            .ok_or(Error::LineNumberNotFound)?;
        if !line.is_active {
            return Err(Error::LineNumberNotActive);
        }

        let factors = txn.latest_segment_factors(&spec.level3s).await?;
        let segment_factor = factors
            .values()
            .map(|f| f.price_factor)
            .max()
            .ok_or(Error::SegmentPriceFactorNotFound)?;

        let content = spec.content.as_deref().expect("checked by missing_fields");
        let parts = pricing::message_parts(content);
        let price = pricing::price_per_message(
            parts,
            line.price_factor,
            segment_factor,
        );
        Ok((price, line.price_factor))
    }

    // --- Admin operations --- //

    /// Approve: consume the reservation (`frozen` -> `spent_on_campaign`).
    #[instrument(skip_all, name = "(campaign-approve)")]
    pub async fn approve(
        &self,
        admin: &str,
        campaign_uuid: &Uuid,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_APPROVE_FAILED)?;
        let result = self.approve_inner(&mut txn, admin, campaign_uuid).await;
        let (campaign, notify) = txn
            .finish(result)
            .await
            .with_code(codes::CAMPAIGN_APPROVE_FAILED)?;

        if let Some((mobile, message)) = notify {
            notify::sms_best_effort(
                self.notifier.clone(),
                mobile,
                message,
                Some(campaign.customer_id),
            );
        }
        info!(campaign = %campaign.uuid, "Campaign approved");
        Ok(campaign)
    }

    #[allow(clippy::type_complexity)]
    async fn approve_inner(
        &self,
        txn: &mut S::Txn,
        admin: &str,
        campaign_uuid: &Uuid,
    ) -> Result<(Campaign, Option<(Mobile, String)>), Error> {
        let now = TimestampMs::now();
        let mut campaign = txn
            .campaign_by_uuid(campaign_uuid)
            .await?
            .ok_or(Error::CampaignNotFound)?;
        if campaign.status != CampaignStatus::WaitingForApproval {
            return Err(Error::CampaignNotWaitingForApproval);
        }
        // The schedule may have slipped into the past while waiting.
        match campaign.spec.schedule_at {
            Some(schedule_at) if schedule_at > now => (),
            _ => return Err(Error::ScheduleTimeTooSoon),
        }

        let freeze = locate_freeze(txn, &campaign).await?;
        let amount = freeze.amount;

        let customer = txn
            .customer_by_id(campaign.customer_id)
            .await?
            .ok_or(Error::CustomerNotFound)?;
        let wallet = txn
            .wallet_by_customer_id(customer.id)
            .await?
            .ok_or(Error::WalletNotFound)?;
        let balance = ledger::current_balance(txn, wallet.id).await?;
        let before = balance.balances;
        let frozen = before.frozen.checked_sub(amount).ok_or_else(|| {
            Error::Storage("frozen balance below reservation".to_owned())
        })?;
        let after = Balances {
            frozen,
            spent_on_campaign: before.spent_on_campaign + amount,
            ..before
        };

        let mut posting = Posting::new(
            &wallet,
            before,
            after,
            TxType::Fee,
            amount,
            "campaign_budget_consumed",
        );
        posting.source = Some("campaign_approval".to_owned());
        posting.operation = Some("consume_budget".to_owned());
        posting.campaign_id = Some(campaign.id);
        posting.description =
            format!("budget consumed for campaign {}", campaign.uuid);
        ledger::post(txn, freeze.correlation_id, now, posting).await?;

        campaign.status = CampaignStatus::Approved;
        campaign.updated_at = now;
        let campaign = txn.update_campaign(campaign).await?;

        audit::record(
            txn,
            format!("admin:{admin}"),
            "campaign_approved",
            "campaign",
            Some(campaign.uuid),
            serde_json::json!({ "amount": amount }),
            now,
        )
        .await;

        let notify = (
            customer.representative_mobile.clone(),
            "Your campaign was approved and is scheduled to run.".to_owned(),
        );
        Ok((campaign, Some(notify)))
    }

    /// Reject: return the reservation to the customer as credit.
    #[instrument(skip_all, name = "(campaign-reject)")]
    pub async fn reject(
        &self,
        admin: &str,
        campaign_uuid: &Uuid,
        comment: String,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_REJECT_FAILED)?;
        let result = async {
            let mut campaign = txn
                .campaign_by_uuid(campaign_uuid)
                .await?
                .ok_or(Error::CampaignNotFound)?;
            if campaign.status != CampaignStatus::WaitingForApproval {
                return Err(Error::CampaignNotWaitingForApproval);
            }
            release_reservation(&mut txn, &campaign).await?;

            let now = TimestampMs::now();
            campaign.status = CampaignStatus::Rejected;
            campaign.comment = Some(comment.clone());
            campaign.updated_at = now;
            let campaign = txn.update_campaign(campaign).await?;

            audit::record(
                &mut txn,
                format!("admin:{admin}"),
                "campaign_rejected",
                "campaign",
                Some(campaign.uuid),
                serde_json::json!({ "comment": comment }),
                now,
            )
            .await;
            Ok(campaign)
        }
        .await;
        let campaign = txn
            .finish(result)
            .await
            .with_code(codes::CAMPAIGN_REJECT_FAILED)?;
        info!(campaign = %campaign.uuid, "Campaign rejected");
        Ok(campaign)
    }

    /// Customer cancel of a waiting campaign: same refund as rejection.
    #[instrument(skip_all, name = "(campaign-cancel)")]
    pub async fn cancel(
        &self,
        customer_id: CustomerId,
        campaign_uuid: &Uuid,
        comment: String,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_CANCEL_FAILED)?;
        let result = async {
            let mut campaign =
                owned_campaign(&mut txn, customer_id, campaign_uuid).await?;
            if campaign.status != CampaignStatus::WaitingForApproval {
                return Err(Error::CampaignNotWaitingForApproval);
            }
            release_reservation(&mut txn, &campaign).await?;

            let now = TimestampMs::now();
            campaign.status = CampaignStatus::Cancelled;
            campaign.comment = Some(comment.clone());
            campaign.updated_at = now;
            let campaign = txn.update_campaign(campaign).await?;

            audit::record(
                &mut txn,
                format!("customer:{customer_id}"),
                "campaign_cancelled",
                "campaign",
                Some(campaign.uuid),
                serde_json::json!({ "comment": comment }),
                now,
            )
            .await;
            Ok(campaign)
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_CANCEL_FAILED)
    }

    // --- Bot transitions --- //

    /// A bot claims an approved campaign for execution.
    pub async fn mark_running(
        &self,
        bot: &str,
        campaign_uuid: &Uuid,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_RUN_FAILED)?;
        let result = async {
            let now = TimestampMs::now();
            let mut campaign = txn
                .campaign_by_uuid(campaign_uuid)
                .await?
                .ok_or(Error::CampaignNotFound)?;
            if campaign.status != CampaignStatus::Approved {
                return Err(Error::CampaignUpdateNotAllowed);
            }

            // Mark the launch on the ledger trail; no balance movement.
            if let Ok(freeze) = locate_freeze(&mut txn, &campaign).await {
                let wallet = txn
                    .wallet_by_customer_id(campaign.customer_id)
                    .await?
                    .ok_or(Error::WalletNotFound)?;
                let balance =
                    ledger::current_balance(&mut txn, wallet.id).await?;
                let mut posting = Posting::new(
                    &wallet,
                    balance.balances,
                    balance.balances,
                    TxType::LaunchCampaign,
                    freeze.amount,
                    "campaign_launched",
                );
                posting.campaign_id = Some(campaign.id);
                posting.source = Some("campaign_execution".to_owned());
                posting.operation = Some("launch".to_owned());
                ledger::post(&mut txn, freeze.correlation_id, now, posting)
                    .await?;
            }

            campaign.status = CampaignStatus::Running;
            campaign.updated_at = now;
            let campaign = txn.update_campaign(campaign).await?;

            audit::record(
                &mut txn,
                format!("bot:{bot}"),
                "campaign_running",
                "campaign",
                Some(campaign.uuid),
                serde_json::Value::Null,
                now,
            )
            .await;
            Ok(campaign)
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_RUN_FAILED)
    }

    /// A bot reports a running campaign as executed, with statistics.
    pub async fn mark_executed(
        &self,
        bot: &str,
        campaign_uuid: &Uuid,
        statistics: serde_json::Value,
    ) -> Result<Campaign, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_COMPLETE_FAILED)?;
        let result = async {
            let now = TimestampMs::now();
            let mut campaign = txn
                .campaign_by_uuid(campaign_uuid)
                .await?
                .ok_or(Error::CampaignNotFound)?;
            if campaign.status != CampaignStatus::Running {
                return Err(Error::CampaignUpdateNotAllowed);
            }

            campaign.status = CampaignStatus::Executed;
            campaign.statistics = statistics;
            campaign.updated_at = now;
            let campaign = txn.update_campaign(campaign).await?;

            audit::record(
                &mut txn,
                format!("bot:{bot}"),
                "campaign_executed",
                "campaign",
                Some(campaign.uuid),
                campaign.statistics.clone(),
                now,
            )
            .await;
            Ok(campaign)
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_COMPLETE_FAILED)
    }

    // --- Queries --- //

    pub async fn list(
        &self,
        filter: CampaignFilter,
        page: Page,
    ) -> Result<(Vec<Campaign>, u64), BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)?;
        let result = async {
            let campaigns = txn.campaigns_by_filter(&filter, page).await?;
            let total = txn.count_campaigns(&filter).await?;
            Ok((campaigns, total))
        }
        .await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)
    }

    pub async fn click_stats(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, u64>, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)?;
        let result = txn.aggregate_click_counts(campaign_ids).await;
        txn.finish(result)
            .await
            .with_code(codes::CAMPAIGN_UPDATE_FAILED)
    }
}

// --- Shared helpers --- //

async fn owned_campaign<T: StoreTxn>(
    txn: &mut T,
    customer_id: CustomerId,
    campaign_uuid: &Uuid,
) -> Result<Campaign, Error> {
    let campaign = txn
        .campaign_by_uuid(campaign_uuid)
        .await?
        .ok_or(Error::CampaignNotFound)?;
    if campaign.customer_id != customer_id {
        return Err(Error::CampaignAccessDenied);
    }
    Ok(campaign)
}

fn check_schedule_lead(
    schedule_at: TimestampMs,
    now: TimestampMs,
) -> Result<(), Error> {
    if schedule_at < now + MIN_SCHEDULE_LEAD {
        return Err(Error::ScheduleTimeTooSoon);
    }
    Ok(())
}

/// Locate the unique completed freeze transaction for a campaign.
async fn locate_freeze<T: StoreTxn>(
    txn: &mut T,
    campaign: &Campaign,
) -> Result<LedgerTransaction, Error> {
    let filter = TransactionFilter {
        customer_id: Some(campaign.customer_id),
        campaign_id: Some(campaign.id),
        source: Some(FREEZE_SOURCE.to_owned()),
        operation: Some(FREEZE_OPERATION.to_owned()),
        tx_type: Some(TxType::Freeze),
        status: Some(TxStatus::Completed),
        ..TransactionFilter::default()
    };
    let mut freezes = txn
        .transactions_by_filter(&filter, Page::new(1, 2))
        .await?;
    match txn.count_transactions(&filter).await? {
        0 => Err(Error::FreezeTransactionNotFound),
        1 => Ok(freezes.pop().expect("count said one")),
        n => {
            // Monitoring alert: the reservation invariant was violated
            // somewhere upstream. No compensating logic.
            error!(
                campaign = %campaign.uuid,
                freeze_count = n,
                "Multiple completed freeze transactions for campaign"
            );
            Err(Error::MultipleFreezeTransactionsFound)
        }
    }
}

/// Move the frozen reservation back to `credit`.
async fn release_reservation<T: StoreTxn>(
    txn: &mut T,
    campaign: &Campaign,
) -> Result<(), Error> {
    let now = TimestampMs::now();
    let freeze = locate_freeze(txn, campaign).await?;
    let amount = freeze.amount;

    let wallet = txn
        .wallet_by_customer_id(campaign.customer_id)
        .await?
        .ok_or(Error::WalletNotFound)?;
    let balance = ledger::current_balance(txn, wallet.id).await?;
    let before = balance.balances;
    let frozen = before.frozen.checked_sub(amount).ok_or_else(|| {
        Error::Storage("frozen balance below reservation".to_owned())
    })?;
    let after = Balances {
        frozen,
        credit: before.credit + amount,
        ..before
    };

    let mut posting = Posting::new(
        &wallet,
        before,
        after,
        TxType::Refund,
        amount,
        "campaign_budget_refunded",
    );
    posting.source = Some("campaign_refund".to_owned());
    posting.operation = Some("release_budget".to_owned());
    posting.campaign_id = Some(campaign.id);
    posting.description =
        format!("budget refunded for campaign {}", campaign.uuid);
    ledger::post(txn, freeze.correlation_id, now, posting).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schedule_lead_boundary() {
        let now = TimestampMs::from_millis(1_000_000_000);
        // Exactly at the lead is acceptable.
        assert!(check_schedule_lead(now + MIN_SCHEDULE_LEAD, now).is_ok());
        // One minute short of the lead is not.
        let nine_minutes = std::time::Duration::from_secs(9 * 60);
        assert!(matches!(
            check_schedule_lead(now + nine_minutes, now),
            Err(Error::ScheduleTimeTooSoon),
        ));
    }
}
