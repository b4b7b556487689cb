//! Wallets, balance snapshots, and ledger transactions.
//!
//! The ledger is append-only: the current balance of a wallet is its latest
//! [`BalanceSnapshot`] by id, and every mutation appends a new snapshot plus
//! one or more [`LedgerTransaction`] rows sharing one correlation id. Prior
//! rows are never modified.

use common::amount::Amount;
use common::id::{
    CampaignId, CorrelationId, CustomerId, LedgerTxId, SnapshotId, WalletId,
};
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer's wallet. Created lazily at first charge or on signup; never
/// destroyed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub uuid: Uuid,
    pub customer_id: CustomerId,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
}

/// The six semantic compartments of a wallet balance.
///
/// - `free`: spendable by the customer for campaign budget.
/// - `frozen`: reserved for a campaign awaiting approval.
/// - `locked`: held on system or tax wallets awaiting outbound settlement.
/// - `credit`: agency rebate, spendable after `free` is exhausted.
/// - `spent_on_campaign`: cumulative consumed budget of approved campaigns.
/// - `agency_share_with_tax`: cumulative owed share on agency wallets.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub free: Amount,
    pub frozen: Amount,
    pub locked: Amount,
    pub credit: Amount,
    pub spent_on_campaign: Amount,
    pub agency_share_with_tax: Amount,
}

impl Balances {
    pub const ZERO: Self = Self {
        free: Amount::ZERO,
        frozen: Amount::ZERO,
        locked: Amount::ZERO,
        credit: Amount::ZERO,
        spent_on_campaign: Amount::ZERO,
        agency_share_with_tax: Amount::ZERO,
    };

    /// Sum of all six compartments.
    pub fn total(&self) -> Amount {
        [
            self.free,
            self.frozen,
            self.locked,
            self.credit,
            self.spent_on_campaign,
            self.agency_share_with_tax,
        ]
        .into_iter()
        .sum()
    }

    /// What the customer can put towards a campaign budget: `free` plus
    /// `credit`.
    pub fn spendable(&self) -> Amount {
        self.free + self.credit
    }
}

/// An immutable point-in-time balance record. The current balance of a
/// wallet is the latest snapshot by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub id: SnapshotId,
    pub uuid: Uuid,
    pub correlation_id: CorrelationId,
    pub wallet_id: WalletId,
    pub customer_id: CustomerId,
    pub balances: Balances,
    /// Always equal to `balances.total()`; persisted denormalized so the
    /// invariant is checkable row-by-row.
    pub total: Amount,
    pub reason: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
}

/// The kind of a ledger transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Inbound funds landing on a customer wallet.
    Deposit,
    /// Funds placed on system/tax wallets pending outbound settlement.
    Lock,
    /// Budget reserved for a campaign awaiting approval.
    Freeze,
    /// A reservation returned to the customer as credit.
    Refund,
    /// A consumed reservation (freeze -> spent_on_campaign).
    Fee,
    /// Owed share accrued on an agency wallet.
    ChargeAgencyShareWithTax,
    /// A campaign entering execution.
    LaunchCampaign,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Lock => "lock",
            Self::Freeze => "freeze",
            Self::Refund => "refund",
            Self::Fee => "fee",
            Self::ChargeAgencyShareWithTax => "charge_agency_share_with_tax",
            Self::LaunchCampaign => "launch_campaign",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An append-only ledger transaction, written in the same database
/// transaction as the snapshot(s) it accompanies.
///
/// `source` / `operation` / `campaign_id` are typed columns (not metadata)
/// because approval and refund resolve reservations by filtering on them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: LedgerTxId,
    pub uuid: Uuid,
    pub correlation_id: CorrelationId,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub amount: Amount,
    /// Always the internal fiat unit for now.
    pub currency: String,
    pub wallet_id: WalletId,
    pub customer_id: CustomerId,
    pub balance_before: Balances,
    pub balance_after: Balances,
    pub source: Option<String>,
    pub operation: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub external_reference: Option<String>,
    pub external_trace: Option<String>,
    pub external_rrn: Option<String>,
    pub external_masked_pan: Option<String>,
    pub description: String,
    /// Opaque extras for audit and reconciliation only; decisions read the
    /// typed columns above.
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
}

/// Filter over ledger transactions. All fields are conjunctive; `None`
/// matches everything.
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub wallet_id: Option<WalletId>,
    pub customer_id: Option<CustomerId>,
    pub campaign_id: Option<CampaignId>,
    pub source: Option<String>,
    pub operation: Option<String>,
    pub tx_type: Option<TxType>,
    pub status: Option<TxStatus>,
    pub created_after: Option<TimestampMs>,
    pub created_before: Option<TimestampMs>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &LedgerTransaction) -> bool {
        self.wallet_id.map_or(true, |w| tx.wallet_id == w)
            && self.customer_id.map_or(true, |c| tx.customer_id == c)
            && self.campaign_id.map_or(true, |c| tx.campaign_id == Some(c))
            && self
                .source
                .as_ref()
                .map_or(true, |s| tx.source.as_deref() == Some(s.as_str()))
            && self
                .operation
                .as_ref()
                .map_or(true, |o| tx.operation.as_deref() == Some(o.as_str()))
            && self.tx_type.map_or(true, |t| tx.tx_type == t)
            && self.status.map_or(true, |s| tx.status == s)
            && self.created_after.map_or(true, |t| tx.created_at >= t)
            && self.created_before.map_or(true, |t| tx.created_at < t)
    }
}

/// 1-based pagination with a clamped page size.
#[derive(Copy, Clone, Debug)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, common::constants::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        ((self.page - 1) as usize) * (self.page_size as usize)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn balances_total_sums_compartments() {
        let balances = Balances {
            free: Amount::from_tomans(1),
            frozen: Amount::from_tomans(2),
            locked: Amount::from_tomans(4),
            credit: Amount::from_tomans(8),
            spent_on_campaign: Amount::from_tomans(16),
            agency_share_with_tax: Amount::from_tomans(32),
        };
        assert_eq!(balances.total(), Amount::from_tomans(63));
        assert_eq!(balances.spendable(), Amount::from_tomans(9));
        assert_eq!(Balances::ZERO.total(), Amount::ZERO);
    }

    #[test]
    fn page_clamps() {
        let page = Page::new(0, 100_000);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, common::constants::MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = Page::new(3, 20);
        assert_eq!(page.offset(), 40);
    }

    #[test]
    fn tx_type_serde_is_snake_case() {
        let json =
            serde_json::to_string(&TxType::ChargeAgencyShareWithTax).unwrap();
        assert_eq!(json, "\"charge_agency_share_with_tax\"");
    }
}
