//! The wallet ledger.
//!
//! Every money-moving operation drives the ledger the same way: read the
//! wallet's latest snapshot, derive new compartment balances, then append
//! one new snapshot and one or more transaction rows, all through one
//! [`StoreTxn`] handle and all sharing one correlation id. The helpers here
//! enforce the invariants:
//!
//! - `total == sum(compartments)` holds by construction,
//! - a snapshot and its transactions always share the correlation id,
//! - spend ordering deducts `free` before `credit` and never lets a
//!   compartment go negative.

use common::amount::Amount;
use common::id::{CampaignId, CorrelationId, CustomerId, SnapshotId, WalletId};
use common::id::LedgerTxId;
use common::time::TimestampMs;
use uuid::Uuid;

use crate::error::Error;
use crate::models::customer::Customer;
use crate::models::wallet::{
    BalanceSnapshot, Balances, LedgerTransaction, TxStatus, TxType, Wallet,
};
use crate::repo::StoreTxn;

/// The wallet's current balance: its latest snapshot.
pub async fn current_balance<T: StoreTxn>(
    txn: &mut T,
    wallet_id: WalletId,
) -> Result<BalanceSnapshot, Error> {
    txn.latest_snapshot(wallet_id)
        .await?
        .ok_or(Error::BalanceSnapshotNotFound)
}

/// Load the customer's wallet and current balance, creating both lazily
/// with an all-zero initial snapshot on first use.
pub async fn ensure_wallet<T: StoreTxn>(
    txn: &mut T,
    customer: &Customer,
    now: TimestampMs,
) -> Result<(Wallet, BalanceSnapshot), Error> {
    if let Some(wallet) = txn.wallet_by_customer_id(customer.id).await? {
        let balance = current_balance(txn, wallet.id).await?;
        return Ok((wallet, balance));
    }

    let wallet = Wallet {
        id: WalletId::new(0),
        uuid: Uuid::new_v4(),
        customer_id: customer.id,
        metadata: serde_json::Value::Null,
        created_at: now,
    };
    let initial_snapshot = BalanceSnapshot {
        id: SnapshotId::new(0),
        uuid: Uuid::new_v4(),
        correlation_id: CorrelationId::generate(),
        // Patched to the assigned wallet id by the store.
        wallet_id: wallet.id,
        customer_id: customer.id,
        balances: Balances::ZERO,
        total: Amount::ZERO,
        reason: "wallet_created".to_owned(),
        description: "initial snapshot".to_owned(),
        metadata: serde_json::Value::Null,
        created_at: now,
    };
    txn.insert_wallet_with_initial_snapshot(wallet, initial_snapshot)
        .await
}

/// Like [`ensure_wallet`], addressed by customer id. Used for the platform
/// (system, tax) and agency wallets.
pub async fn ensure_wallet_by_customer_id<T: StoreTxn>(
    txn: &mut T,
    customer_id: CustomerId,
    now: TimestampMs,
) -> Result<(Wallet, BalanceSnapshot), Error> {
    let customer = txn
        .customer_by_id(customer_id)
        .await?
        .ok_or(Error::CustomerNotFound)?;
    ensure_wallet(txn, &customer, now).await
}

/// The customer ids owning the platform-side wallets.
#[derive(Copy, Clone, Debug, serde::Deserialize)]
pub struct PlatformAccounts {
    pub system_customer_id: CustomerId,
    pub tax_customer_id: CustomerId,
}

/// Everything needed to append one snapshot + transaction pair.
pub struct Posting {
    pub wallet_id: WalletId,
    pub customer_id: CustomerId,
    /// The balance the wallet is moving *from*; callers read it under the
    /// same handle so the append observes a serializable snapshot.
    pub balance_before: Balances,
    /// The balance the wallet is moving *to*.
    pub balance_after: Balances,
    pub tx_type: TxType,
    pub status: TxStatus,
    /// The headline amount of the movement (not derivable from the balance
    /// delta when several compartments move at once).
    pub amount: Amount,
    pub reason: String,
    pub description: String,
    pub source: Option<String>,
    pub operation: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub external_reference: Option<String>,
    pub external_trace: Option<String>,
    pub external_rrn: Option<String>,
    pub external_masked_pan: Option<String>,
    pub metadata: serde_json::Value,
}

impl Posting {
    /// A minimal posting; callers set the optional columns they need.
    pub fn new(
        wallet: &Wallet,
        balance_before: Balances,
        balance_after: Balances,
        tx_type: TxType,
        amount: Amount,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        Self {
            wallet_id: wallet.id,
            customer_id: wallet.customer_id,
            balance_before,
            balance_after,
            tx_type,
            status: TxStatus::Completed,
            amount,
            description: reason.clone(),
            reason,
            source: None,
            operation: None,
            campaign_id: None,
            external_reference: None,
            external_trace: None,
            external_rrn: None,
            external_masked_pan: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Append one snapshot + one transaction for a posting, both sharing
/// `correlation_id`. Returns the stored pair.
pub async fn post<T: StoreTxn>(
    txn: &mut T,
    correlation_id: CorrelationId,
    now: TimestampMs,
    posting: Posting,
) -> Result<(BalanceSnapshot, LedgerTransaction), Error> {
    let snapshot = BalanceSnapshot {
        id: SnapshotId::new(0),
        uuid: Uuid::new_v4(),
        correlation_id,
        wallet_id: posting.wallet_id,
        customer_id: posting.customer_id,
        balances: posting.balance_after,
        total: posting.balance_after.total(),
        reason: posting.reason,
        description: posting.description.clone(),
        metadata: posting.metadata.clone(),
        created_at: now,
    };
    let snapshot = txn.insert_snapshot(snapshot).await?;

    let tx = LedgerTransaction {
        id: LedgerTxId::new(0),
        uuid: Uuid::new_v4(),
        correlation_id,
        tx_type: posting.tx_type,
        status: posting.status,
        amount: posting.amount,
        currency: "TMN".to_owned(),
        wallet_id: posting.wallet_id,
        customer_id: posting.customer_id,
        balance_before: posting.balance_before,
        balance_after: posting.balance_after,
        source: posting.source,
        operation: posting.operation,
        campaign_id: posting.campaign_id,
        external_reference: posting.external_reference,
        external_trace: posting.external_trace,
        external_rrn: posting.external_rrn,
        external_masked_pan: posting.external_masked_pan,
        description: posting.description,
        metadata: posting.metadata,
        created_at: now,
    };
    let tx = txn.insert_transaction(tx).await?;

    Ok((snapshot, tx))
}

/// Deduct `required` from spendable funds, `free` first, then `credit`.
///
/// Given required amount R and current {F, C}: if R <= F then F' = F - R;
/// else F' = 0 and C' = C - (R - F). Fails with [`Error::InsufficientFunds`]
/// if F + C < R; no compartment ever goes negative.
pub fn spend_ordered(
    balances: &Balances,
    required: Amount,
) -> Result<Balances, Error> {
    if balances.spendable() < required {
        return Err(Error::InsufficientFunds);
    }
    let from_free = balances.free.min(required);
    let from_credit = required - from_free;
    Ok(Balances {
        free: balances.free - from_free,
        credit: balances.credit - from_credit,
        ..*balances
    })
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn balances(free: u64, credit: u64) -> Balances {
        Balances {
            free: Amount::from_tomans(free),
            credit: Amount::from_tomans(credit),
            ..Balances::ZERO
        }
    }

    #[test]
    fn spend_takes_free_first() {
        let next =
            spend_ordered(&balances(500, 100), Amount::from_tomans(300))
                .unwrap();
        assert_eq!(next.free, Amount::from_tomans(200));
        assert_eq!(next.credit, Amount::from_tomans(100));
    }

    #[test]
    fn spend_spills_into_credit() {
        let next =
            spend_ordered(&balances(500, 100), Amount::from_tomans(550))
                .unwrap();
        assert_eq!(next.free, Amount::ZERO);
        assert_eq!(next.credit, Amount::from_tomans(50));
    }

    #[test]
    fn spend_rejects_overdraft() {
        assert!(matches!(
            spend_ordered(&balances(500, 100), Amount::from_tomans(601)),
            Err(Error::InsufficientFunds),
        ));
        // Exactly spendable is fine.
        let next =
            spend_ordered(&balances(500, 100), Amount::from_tomans(600))
                .unwrap();
        assert_eq!(next.free, Amount::ZERO);
        assert_eq!(next.credit, Amount::ZERO);
    }

    proptest! {
        /// Spend ordering conserves value: the deduction exactly equals the
        /// drop in free + credit, and untouched compartments stay put.
        #[test]
        fn spend_conserves_value(
            free in 0u64..=1_000_000_000,
            credit in 0u64..=1_000_000_000,
            required in 0u64..=2_000_000_000,
        ) {
            let before = balances(free, credit);
            let required = Amount::from_tomans(required);
            match spend_ordered(&before, required) {
                Ok(after) => {
                    prop_assert_eq!(
                        after.spendable() + required,
                        before.spendable(),
                    );
                    prop_assert_eq!(after.frozen, before.frozen);
                    prop_assert_eq!(after.locked, before.locked);
                    // Credit is only touched once free is exhausted.
                    if after.credit < before.credit {
                        prop_assert_eq!(after.free, Amount::ZERO);
                    }
                }
                Err(Error::InsufficientFunds) => {
                    prop_assert!(before.spendable() < required);
                }
                Err(other) => prop_assert!(false, "unexpected: {other}"),
            }
        }
    }
}
