use common::id::{AgencyDiscountId, CustomerId};
use common::mobile::Mobile;
use common::sheba::Sheba;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of entity the customer is. Business types carry company
/// fields; `MarketingAgency` customers may refer other customers and earn a
/// share of their charges.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Individual,
    IndependentCompany,
    MarketingAgency,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::IndependentCompany => "independent_company",
            Self::MarketingAgency => "marketing_agency",
        }
    }

    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Individual)
    }
}

/// A platform customer. Identity is immutable after signup; deactivation is
/// a soft flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub uuid: Uuid,
    pub account_type: AccountType,
    pub representative_mobile: Mobile,
    pub email: String,
    /// Opaque password hash; hashing itself happens outside the core.
    pub password_hash: String,
    /// Present iff `account_type.is_business()`.
    pub company_name: Option<String>,
    pub company_national_id: Option<String>,
    /// Another customer whose `account_type` is `MarketingAgency`. An index
    /// lookup, never an owning reference.
    pub referrer_agency_id: Option<CustomerId>,
    /// The unique code agencies hand out so signups attribute to them.
    pub agency_referer_code: Option<String>,
    pub sheba_number: Option<Sheba>,
    pub is_active: bool,
    pub mobile_verified: bool,
    pub email_verified: bool,
    pub created_at: TimestampMs,
}

impl Customer {
    pub fn is_agency(&self) -> bool {
        matches!(self.account_type, AccountType::MarketingAgency)
    }
}

/// A per-customer discount rate granted by their referring agency,
/// expressed in basis points so rebate math stays integer-exact.
///
/// The rate is bounded to [0, 50%]: the agency can forgo up to half of the
/// gross-up, never more.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct DiscountRate(u16);

#[derive(Debug, thiserror::Error)]
#[error("discount rate must be between 0 and 5000 basis points")]
pub struct InvalidDiscountRate;

impl DiscountRate {
    pub const ZERO: Self = Self(0);
    /// 50.00%
    pub const MAX: Self = Self(5000);

    pub fn try_from_basis_points(bp: u16) -> Result<Self, InvalidDiscountRate> {
        if bp <= Self::MAX.0 {
            Ok(Self(bp))
        } else {
            Err(InvalidDiscountRate)
        }
    }

    /// Panics if out of bounds; intended for constants and test fixtures.
    pub const fn from_basis_points(bp: u16) -> Self {
        assert!(bp <= Self::MAX.0);
        Self(bp)
    }

    pub const fn basis_points(self) -> u16 {
        self.0
    }
}

impl Default for DiscountRate {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<u16> for DiscountRate {
    type Error = InvalidDiscountRate;
    fn try_from(bp: u16) -> Result<Self, Self::Error> {
        Self::try_from_basis_points(bp)
    }
}

impl From<DiscountRate> for u16 {
    fn from(rate: DiscountRate) -> Self {
        rate.0
    }
}

/// An agency discount grant. At most one row per (agency, customer) is
/// active at a time; creating a new grant expires prior active rows in the
/// same transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgencyDiscount {
    pub id: AgencyDiscountId,
    pub uuid: Uuid,
    pub agency_id: CustomerId,
    pub customer_id: CustomerId,
    pub discount_rate: DiscountRate,
    pub expires_at: Option<TimestampMs>,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
}

impl AgencyDiscount {
    pub fn is_active(&self, now: TimestampMs) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn discount_rate_bounds() {
        assert!(DiscountRate::try_from_basis_points(0).is_ok());
        assert!(DiscountRate::try_from_basis_points(5000).is_ok());
        assert!(DiscountRate::try_from_basis_points(5001).is_err());
        assert!(serde_json::from_str::<DiscountRate>("2000").is_ok());
        assert!(serde_json::from_str::<DiscountRate>("9000").is_err());
    }

    #[test]
    fn discount_activity_window() {
        let now = TimestampMs::from_millis(1_000_000);
        let later = TimestampMs::from_millis(2_000_000);
        let discount = AgencyDiscount {
            id: AgencyDiscountId::new(1),
            uuid: Uuid::new_v4(),
            agency_id: CustomerId::new(1),
            customer_id: CustomerId::new(2),
            discount_rate: DiscountRate::from_basis_points(2000),
            expires_at: None,
            reason: "welcome".to_owned(),
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        assert!(discount.is_active(later));

        let expired = AgencyDiscount {
            expires_at: Some(now),
            ..discount
        };
        assert!(!expired.is_active(now));
        assert!(!expired.is_active(later));
    }
}
