//! Coupon ledger: validation, pricing, and redemption.
//!
//! Validation is read-only and consumes nothing. Redemption runs inside the
//! caller's checkout transaction so a validated-but-uncommitted check can
//! never burn a usage slot, and the (coupon, user) unique index closes the
//! race between two concurrent checkouts with the same code.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, Set, SqlErr,
};
use tracing::debug;
use uuid::Uuid;

use crate::entities::coupon::{self, DiscountType, Entity as CouponEntity};
use crate::entities::coupon_usage::{self, Entity as CouponUsageEntity};
use crate::errors::ServiceError;

/// Outcome of a successful validation: what to subtract and which coupon to
/// redeem at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount: Decimal,
}

/// Validates `code` against an order subtotal. Checks run in a fixed priority
/// order and the first failure wins.
pub async fn validate_and_price<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    subtotal: Decimal,
    user_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<CouponQuote, ServiceError> {
    let coupon = CouponEntity::find()
        .filter(coupon::Column::Code.eq(code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::CouponNotFound(code.to_string()))?;

    if !coupon.is_active {
        return Err(ServiceError::CouponInactive(coupon.code));
    }
    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(ServiceError::CouponOutOfWindow(coupon.code));
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(ServiceError::CouponExhausted(coupon.code));
        }
    }
    if let Some(minimum) = coupon.min_order_value {
        if subtotal < minimum {
            return Err(ServiceError::OrderBelowMinimum {
                code: coupon.code,
                minimum,
            });
        }
    }
    if let Some(user_id) = user_id {
        let prior = CouponUsageEntity::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon.id))
            .filter(coupon_usage::Column::UserId.eq(user_id))
            .one(conn)
            .await?;
        if prior.is_some() {
            return Err(ServiceError::CouponAlreadyUsed(coupon.code));
        }
    }

    let discount = calculate_discount(&coupon, subtotal);
    debug!(code = %coupon.code, %subtotal, %discount, "coupon validated");

    Ok(CouponQuote {
        coupon_id: coupon.id,
        code: coupon.code,
        discount,
    })
}

/// Discount for an already-validated coupon. Never exceeds the subtotal.
pub fn calculate_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let pct = subtotal * coupon.discount_value / Decimal::from(100);
            match coupon.max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    };
    raw.min(subtotal).max(Decimal::ZERO)
}

/// Consumes one usage slot: bumps `used_count` and inserts the
/// (coupon, user) row. Call only inside the transaction creating the order.
pub async fn redeem<C: ConnectionTrait>(
    conn: &C,
    quote: &CouponQuote,
    user_id: Uuid,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    // Atomic increment, guarded by the limit in the same statement. A quote
    // that lost its slot to a concurrent checkout matches zero rows.
    let bumped = CouponEntity::update_many()
        .col_expr(
            coupon::Column::UsedCount,
            Expr::col(coupon::Column::UsedCount).add(1),
        )
        .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
        .filter(coupon::Column::Id.eq(quote.coupon_id))
        .filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit))),
        )
        .exec(conn)
        .await?;
    if bumped.rows_affected == 0 {
        return Err(ServiceError::CouponExhausted(quote.code.clone()));
    }

    let usage = coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(quote.coupon_id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        created_at: Set(now),
    };
    usage.insert(conn).await.map_err(|e| {
        // Lost the race against a concurrent checkout with the same pair.
        if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
            ServiceError::CouponAlreadyUsed(quote.code.clone())
        } else {
            ServiceError::DatabaseError(e)
        }
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SPRING".to_string(),
            discount_type,
            discount_value: value,
            max_discount: None,
            min_order_value: None,
            usage_limit: None,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            is_active: true,
            created_at: now,
            updated_at: None,
        }
    }

    #[test]
    fn percentage_discount() {
        let c = coupon(DiscountType::Percentage, dec!(10));
        assert_eq!(calculate_discount(&c, dec!(1_000_000)), dec!(100_000));
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut c = coupon(DiscountType::Percentage, dec!(20));
        c.max_discount = Some(dec!(50_000));
        assert_eq!(calculate_discount(&c, dec!(1_000_000)), dec!(50_000));
    }

    #[test]
    fn fixed_discount() {
        let c = coupon(DiscountType::Fixed, dec!(200_000));
        assert_eq!(calculate_discount(&c, dec!(1_000_000)), dec!(200_000));
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let c = coupon(DiscountType::Fixed, dec!(200_000));
        assert_eq!(calculate_discount(&c, dec!(150_000)), dec!(150_000));

        let p = coupon(DiscountType::Percentage, dec!(150));
        assert_eq!(calculate_discount(&p, dec!(80_000)), dec!(80_000));
    }
}
