//! The agency rebate calculator.
//!
//! Charges carry a fixed 9.0909..% VAT component: for a gross amount `A`,
//! the real (pre-tax) amount is `floor(A * 10 / 11)` and the tax is the
//! remainder. A customer referred by an agency with an active discount rate
//! `r` receives `floor(real / (1 - r)) - real` as rebate credit.
//!
//! For fiat charges the gross is split at invoice creation:
//! `x = A / (1 - r)`, `systemShareWithTax = floor(x / 2)`,
//! `agencyShareWithTax = A - systemShareWithTax`, with each share further
//! split into its real and tax portions the same `10/11` way.
//!
//! Crypto charges currently assign the full gross to the system share and
//! zero to the agency share, while the customer rebate credit is still
//! honored. This preserves the observed production behavior; see DESIGN.md.
//!
//! All arithmetic is integer-exact: rates are basis points and divisions
//! floor, with intermediates widened to `u128`.

use common::amount::Amount;
use common::id::{AgencyDiscountId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::models::customer::DiscountRate;

/// The full precomputed split of one gross charge, persisted on the payment
/// request at creation time and replayed verbatim at finalization.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChargeSplit {
    /// Gross amount the customer pays.
    pub amount_with_tax: Amount,
    /// `floor(amount_with_tax * 10 / 11)`; lands on the customer's `free`.
    pub real_amount: Amount,
    /// `amount_with_tax - real_amount`.
    pub tax_amount: Amount,
    /// Agency rebate; lands on the customer's `credit`.
    pub customer_credit: Amount,
    pub system_share_with_tax: Amount,
    pub real_system_share: Amount,
    pub tax_system_share: Amount,
    pub agency_share_with_tax: Amount,
    pub real_agency_share: Amount,
    pub tax_agency_share: Amount,
    pub discount_rate: DiscountRate,
    pub agency_id: Option<CustomerId>,
    pub agency_discount_id: Option<AgencyDiscountId>,
    pub customer_id: Option<CustomerId>,
}

/// `floor(amount * 10 / 11)`: the pre-VAT portion of a gross amount.
fn real_portion(amount: Amount) -> Amount {
    let real = amount.tomans() as u128 * 10 / 11;
    // real <= amount <= MAX
    Amount::from_tomans(real as u64)
}

/// `floor(amount * 10000 / (10000 - rate_bp))`: gross-up by the discount.
fn gross_up(amount: Amount, rate: DiscountRate) -> Amount {
    let denominator = (10_000 - rate.basis_points()) as u128;
    let grossed = amount.tomans() as u128 * 10_000 / denominator;
    // rate <= 50% so grossed <= 2 * amount; widen-then-narrow is safe as
    // long as the doubled value still fits, which the charge validators
    // guarantee by bounding inputs far below MAX / 2.
    Amount::try_from_tomans(grossed as u64).unwrap_or(Amount::MAX)
}

/// The rebate credit for a gross amount under a discount rate.
fn rebate_credit(real: Amount, rate: DiscountRate) -> Amount {
    gross_up(real, rate) - real
}

/// Compute the fiat four-way split for a gross charge.
pub fn fiat_split(
    amount_with_tax: Amount,
    customer_id: CustomerId,
    discount: &crate::models::customer::AgencyDiscount,
) -> ChargeSplit {
    let rate = discount.discount_rate;
    let real_amount = real_portion(amount_with_tax);
    let tax_amount = amount_with_tax - real_amount;
    let customer_credit = rebate_credit(real_amount, rate);

    let grossed = gross_up(amount_with_tax, rate);
    let system_share_with_tax = Amount::from_tomans(grossed.tomans() / 2);
    let agency_share_with_tax = amount_with_tax - system_share_with_tax;

    let real_system_share = real_portion(system_share_with_tax);
    let tax_system_share = system_share_with_tax - real_system_share;
    let real_agency_share = real_portion(agency_share_with_tax);
    let tax_agency_share = agency_share_with_tax - real_agency_share;

    ChargeSplit {
        amount_with_tax,
        real_amount,
        tax_amount,
        customer_credit,
        system_share_with_tax,
        real_system_share,
        tax_system_share,
        agency_share_with_tax,
        real_agency_share,
        tax_agency_share,
        discount_rate: rate,
        agency_id: Some(discount.agency_id),
        agency_discount_id: Some(discount.id),
        customer_id: Some(customer_id),
    }
}

/// Compute the crypto split: full gross to the system share, zero agency
/// share, customer rebate credit still honored.
pub fn crypto_split(
    amount_with_tax: Amount,
    customer_id: CustomerId,
    discount: &crate::models::customer::AgencyDiscount,
) -> ChargeSplit {
    let rate = discount.discount_rate;
    let real_amount = real_portion(amount_with_tax);
    let tax_amount = amount_with_tax - real_amount;
    let customer_credit = rebate_credit(real_amount, rate);

    let system_share_with_tax = amount_with_tax;
    let real_system_share = real_portion(system_share_with_tax);
    let tax_system_share = system_share_with_tax - real_system_share;

    ChargeSplit {
        amount_with_tax,
        real_amount,
        tax_amount,
        customer_credit,
        system_share_with_tax,
        real_system_share,
        tax_system_share,
        agency_share_with_tax: Amount::ZERO,
        real_agency_share: Amount::ZERO,
        tax_agency_share: Amount::ZERO,
        discount_rate: rate,
        agency_id: Some(discount.agency_id),
        agency_discount_id: Some(discount.id),
        customer_id: Some(customer_id),
    }
}

#[cfg(test)]
mod test {
    use common::id::AgencyDiscountId;
    use common::time::TimestampMs;
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;
    use crate::models::customer::AgencyDiscount;

    fn discount(bp: u16) -> AgencyDiscount {
        AgencyDiscount {
            id: AgencyDiscountId::new(7),
            uuid: Uuid::new_v4(),
            agency_id: CustomerId::new(1),
            customer_id: CustomerId::new(2),
            discount_rate: DiscountRate::from_basis_points(bp),
            expires_at: None,
            reason: String::new(),
            metadata: serde_json::Value::Null,
            created_at: TimestampMs::MIN,
        }
    }

    #[test]
    fn fiat_split_reference_values() {
        // 1,000,000 TMN at a 20% discount.
        let split = fiat_split(
            Amount::from_tomans(1_000_000),
            CustomerId::new(2),
            &discount(2000),
        );
        assert_eq!(split.real_amount, Amount::from_tomans(909_090));
        assert_eq!(split.tax_amount, Amount::from_tomans(90_910));
        assert_eq!(split.customer_credit, Amount::from_tomans(227_272));
        assert_eq!(split.system_share_with_tax, Amount::from_tomans(625_000));
        assert_eq!(split.agency_share_with_tax, Amount::from_tomans(375_000));
        assert_eq!(split.real_system_share, Amount::from_tomans(568_181));
        assert_eq!(split.tax_system_share, Amount::from_tomans(56_819));
        assert_eq!(split.real_agency_share, Amount::from_tomans(340_909));
        assert_eq!(split.tax_agency_share, Amount::from_tomans(34_091));
    }

    #[test]
    fn zero_rate_means_zero_credit() {
        let split = fiat_split(
            Amount::from_tomans(11_000),
            CustomerId::new(2),
            &discount(0),
        );
        assert_eq!(split.customer_credit, Amount::ZERO);
        assert_eq!(split.real_amount, Amount::from_tomans(10_000));
        assert_eq!(split.tax_amount, Amount::from_tomans(1_000));
        // x == A at rate 0, so the split is exactly half and half.
        assert_eq!(split.system_share_with_tax, Amount::from_tomans(5_500));
        assert_eq!(split.agency_share_with_tax, Amount::from_tomans(5_500));
    }

    #[test]
    fn crypto_split_assigns_full_gross_to_system() {
        let split = crypto_split(
            Amount::from_tomans(1_000_000),
            CustomerId::new(2),
            &discount(2000),
        );
        assert_eq!(split.system_share_with_tax, Amount::from_tomans(1_000_000));
        assert_eq!(split.agency_share_with_tax, Amount::ZERO);
        // The rebate is still granted.
        assert_eq!(split.customer_credit, Amount::from_tomans(227_272));
        assert_eq!(
            split.real_system_share + split.tax_system_share,
            split.amount_with_tax,
        );
    }

    proptest! {
        /// The three locked portions always reassemble the gross amount.
        #[test]
        fn fiat_shares_sum_to_gross(
            tomans in 1000u64..=10_000_000_000,
            bp in 0u16..=5000,
        ) {
            let amount = Amount::from_tomans(tomans);
            let split = fiat_split(amount, CustomerId::new(2), &discount(bp));
            prop_assert_eq!(
                split.agency_share_with_tax
                    + split.real_system_share
                    + split.tax_system_share,
                amount,
            );
            prop_assert_eq!(split.real_amount + split.tax_amount, amount);
            // The agency never keeps more than the system at r <= 50%.
            prop_assert!(split.agency_share_with_tax <= split.system_share_with_tax);
        }

        /// Credit is monotone in the discount rate.
        #[test]
        fn credit_monotone_in_rate(tomans in 1000u64..=1_000_000_000) {
            let amount = Amount::from_tomans(tomans);
            let mut last = Amount::ZERO;
            for bp in [0u16, 1000, 2000, 3000, 4000, 5000] {
                let split =
                    fiat_split(amount, CustomerId::new(2), &discount(bp));
                prop_assert!(split.customer_credit >= last);
                last = split.customer_credit;
            }
        }
    }
}
