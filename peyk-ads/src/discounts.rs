//! Agency discount management.
//!
//! At most one discount row per (agency, customer) is active at a time:
//! granting a new one expires the prior active rows in the same
//! transaction, so the rebate calculator always sees a single rate.

use common::id::{AgencyDiscountId, CustomerId};
use common::time::TimestampMs;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::audit;
use crate::error::{codes, BusinessError, Error, ResultExt};
use crate::models::customer::{AgencyDiscount, Customer, DiscountRate};
use crate::repo::{Store, StoreTxn};

pub struct DiscountService<S> {
    store: S,
}

impl<S: Store> DiscountService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Grant a discount from an agency to one of its referred customers,
    /// expiring any prior active grant in the same transaction.
    #[instrument(skip_all, name = "(discount-grant)")]
    pub async fn grant(
        &self,
        agency_id: CustomerId,
        customer_id: CustomerId,
        rate: DiscountRate,
        reason: String,
    ) -> Result<AgencyDiscount, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)?;
        let result = async {
            let now = TimestampMs::now();

            let agency = txn
                .customer_by_id(agency_id)
                .await?
                .ok_or(Error::CustomerNotFound)?;
            if !agency.is_agency() {
                return Err(Error::ValidationFailed(
                    "granting account is not a marketing agency".to_owned(),
                ));
            }
            if !agency.is_active {
                return Err(Error::AgencyInactive);
            }
            let customer = txn
                .customer_by_id(customer_id)
                .await?
                .ok_or(Error::CustomerNotFound)?;
            if customer.referrer_agency_id != Some(agency_id) {
                return Err(Error::ValidationFailed(
                    "customer is not referred by this agency".to_owned(),
                ));
            }

            let expired =
                txn.expire_active_discounts(agency_id, customer_id, now).await?;
            let discount = txn
                .insert_discount(AgencyDiscount {
                    id: AgencyDiscountId::new(0),
                    uuid: Uuid::new_v4(),
                    agency_id,
                    customer_id,
                    discount_rate: rate,
                    expires_at: None,
                    reason: reason.clone(),
                    metadata: serde_json::Value::Null,
                    created_at: now,
                })
                .await?;

            audit::record(
                &mut txn,
                format!("customer:{agency_id}"),
                "discount_granted",
                "agency_discount",
                Some(discount.uuid),
                serde_json::json!({
                    "rate_basis_points": rate.basis_points(),
                    "expired_prior": expired,
                    "reason": reason,
                }),
                now,
            )
            .await;

            Ok(discount)
        }
        .await;
        let discount = txn
            .finish(result)
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)?;
        info!(%agency_id, %customer_id, "Agency discount granted");
        Ok(discount)
    }

    /// The currently-active discount for (agency, customer), if any.
    pub async fn active(
        &self,
        agency_id: CustomerId,
        customer_id: CustomerId,
    ) -> Result<Option<AgencyDiscount>, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)?;
        let result = txn
            .active_discount(agency_id, customer_id, TimestampMs::now())
            .await;
        txn.finish(result)
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)
    }

    /// All of an agency's active grants, joined with the customer rows.
    pub async fn list_active(
        &self,
        agency_id: CustomerId,
    ) -> Result<Vec<(AgencyDiscount, Customer)>, BusinessError> {
        let mut txn = self
            .store
            .begin()
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)?;
        let result = txn
            .list_active_discounts_with_customer(agency_id, TimestampMs::now())
            .await;
        txn.finish(result)
            .await
            .with_code(codes::DISCOUNT_GRANT_FAILED)
    }
}
