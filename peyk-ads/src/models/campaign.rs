//! Campaigns and their pricing inputs.

use common::amount::Amount;
use common::id::{CampaignId, CustomerId, LineNumberId, SegmentFactorId};
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The campaign state machine.
///
/// ```text
/// initiated -(first update)-> in-progress -(finalize)-> waiting-for-approval
///     waiting-for-approval -(admin approve)-> approved -(bot claim)-> running
///     running -(bot complete)-> executed
///     waiting-for-approval -(admin reject)-> rejected
///     waiting-for-approval -(customer cancel)-> cancelled
/// ```
///
/// Only `initiated` and `in-progress` are mutable by the customer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CampaignStatus {
    Initiated,
    InProgress,
    WaitingForApproval,
    Approved,
    Rejected,
    Cancelled,
    Running,
    Executed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in-progress",
            Self::WaitingForApproval => "waiting-for-approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Running => "running",
            Self::Executed => "executed",
        }
    }

    /// Whether the customer may still edit the campaign spec.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Initiated | Self::InProgress)
    }

    /// Whether this is an end state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Executed)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// The customer-editable campaign fields. Assembled incrementally while the
/// campaign is mutable; [`CampaignSpec::missing_fields`] decides whether it
/// is complete enough to finalize.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub title: Option<String>,
    /// The selected segmentation root. Exactly one per campaign.
    pub level1: Option<String>,
    /// Empty means "all level2s under level1".
    pub level2s: Vec<String>,
    /// Empty means "all level3s under the selected level2s".
    pub level3s: Vec<String>,
    /// Empty means "any tags".
    pub tags: Vec<String>,
    pub sex: Option<Sex>,
    pub cities: Vec<String>,
    pub ad_link: Option<String>,
    pub content: Option<String>,
    pub short_link_domain: Option<String>,
    pub category: Option<String>,
    pub job: Option<String>,
    pub schedule_at: Option<TimestampMs>,
    /// The sending line, by its `LineNumber::value`.
    pub line_number: Option<String>,
    /// Optional spend cap; without it the whole matched audience is priced.
    pub budget: Option<Amount>,
}

impl CampaignSpec {
    /// Names of required fields that are still unset.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.level1.is_none() {
            missing.push("level1");
        }
        if self.content.is_none() {
            missing.push("content");
        }
        if self.line_number.is_none() {
            missing.push("line_number");
        }
        if self.schedule_at.is_none() {
            missing.push("schedule_at");
        }
        missing
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub uuid: Uuid,
    pub customer_id: CustomerId,
    pub status: CampaignStatus,
    pub spec: CampaignSpec,
    /// Admin comment recorded on reject, or customer comment on cancel.
    pub comment: Option<String>,
    /// Number of targeted recipients, fixed at finalize.
    pub num_audience: Option<u64>,
    /// Execution statistics reported by bots (sent, delivered, clicks, ..).
    pub statistics: serde_json::Value,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// Filter over campaigns.
#[derive(Clone, Debug, Default)]
pub struct CampaignFilter {
    pub customer_id: Option<CustomerId>,
    pub status: Option<CampaignStatus>,
    pub created_after: Option<TimestampMs>,
    pub created_before: Option<TimestampMs>,
}

impl CampaignFilter {
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.customer_id.map_or(true, |c| campaign.customer_id == c)
            && self.status.map_or(true, |s| campaign.status == s)
            && self.created_after.map_or(true, |t| campaign.created_at >= t)
            && self.created_before.map_or(true, |t| campaign.created_at < t)
    }
}

/// A positive price multiplier in per-mille, so pricing stays
/// integer-exact. `1000` is the neutral factor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PriceFactor(u32);

#[derive(Debug, thiserror::Error)]
#[error("price factor must be positive")]
pub struct InvalidPriceFactor;

impl PriceFactor {
    /// The neutral factor, 1.000.
    pub const ONE: Self = Self(1000);

    pub fn try_from_per_mille(pm: u32) -> Result<Self, InvalidPriceFactor> {
        if pm > 0 {
            Ok(Self(pm))
        } else {
            Err(InvalidPriceFactor)
        }
    }

    /// Panics on zero; intended for constants and test fixtures.
    pub const fn from_per_mille(pm: u32) -> Self {
        assert!(pm > 0);
        Self(pm)
    }

    pub const fn per_mille(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PriceFactor {
    type Error = InvalidPriceFactor;
    fn try_from(pm: u32) -> Result<Self, Self::Error> {
        Self::try_from_per_mille(pm)
    }
}

impl From<PriceFactor> for u32 {
    fn from(factor: PriceFactor) -> Self {
        factor.0
    }
}

/// A sending line. `value` is the wire-visible number and is unique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineNumber {
    pub id: LineNumberId,
    pub uuid: Uuid,
    pub name: String,
    pub value: String,
    pub price_factor: PriceFactor,
    pub priority: i32,
    pub is_active: bool,
}

/// Append-only per-level3 price multiplier; the latest row per level3 wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentPriceFactor {
    pub id: SegmentFactorId,
    pub level3: String,
    pub price_factor: PriceFactor,
    pub created_at: TimestampMs,
}
