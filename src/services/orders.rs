//! Order creation and the status state machine.
//!
//! Checkout freezes catalog facts onto the order lines and settles the coupon
//! inside one transaction; the DELIVERED transition owns warranty issuance.
//! Everything a single transition mutates commits or rolls back as one unit.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, Capability, Role};
use crate::clock::SharedClock;
use crate::db::DbPool;
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::Entity as ProductEntity;
use crate::entities::warranty_unit::{self, Entity as WarrantyUnitEntity};
use crate::errors::ServiceError;
use crate::events::{self, AuditEntry, Event, EventSender};
use crate::services::coupons;
use crate::services::warranties::WarrantyService;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{7,14}$").expect("phone regex"));

const ORDER_NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateOrderRequest {
    /// Customer the order is for. Staff may create on a customer's behalf.
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 120, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(regex(path = "PHONE_RE", message = "Malformed phone number"))]
    pub customer_phone: String,
    #[validate(length(min = 5, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, message = "An order needs at least one line item"))]
    pub items: Vec<OrderLineInput>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct TransitionOrderRequest {
    pub new_status: OrderStatus,
    pub note: Option<String>,
}

/// A loaded order line with the units minted against it.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub item: order_item::Model,
    pub warranty_units: Vec<warranty_unit::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub lines: Vec<OrderLine>,
}

/// A transition either genuinely moved the order, or it was the idempotent
/// DELIVERED retry. Both are successes; callers that care can tell them
/// apart instead of mistaking a stale retry for fresh progress.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(order::Model),
    AlreadyDelivered(order::Model),
}

impl TransitionOutcome {
    pub fn order(&self) -> &order::Model {
        match self {
            TransitionOutcome::Applied(order) | TransitionOutcome::AlreadyDelivered(order) => order,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, TransitionOutcome::AlreadyDelivered(_))
    }
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    warranties: Arc<WarrantyService>,
    clock: SharedClock,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        warranties: Arc<WarrantyService>,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            event_sender,
            warranties,
            clock,
        }
    }

    /// Creates an order from catalog snapshots, settling the coupon in the
    /// same transaction. Nothing is written if any line or the coupon fails.
    #[instrument(skip(self, actor, request), fields(actor_id = %actor.id, customer_id = %request.customer_id))]
    pub async fn create_order(
        &self,
        actor: &Actor,
        request: CreateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        actor.require(Capability::CreateOrder)?;
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }
        if actor.role == Role::Customer && actor.id != request.customer_id {
            return Err(ServiceError::Forbidden(
                "customers may only order for themselves".to_string(),
            ));
        }

        let now = self.clock.now();
        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        // Snapshot builder: freeze price, name and warranty terms per line.
        let mut subtotal = Decimal::ZERO;
        let mut item_rows = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let product = ProductEntity::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
            if !product.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "product '{}' is not available for sale",
                    product.name
                )));
            }

            let unit_price = product.effective_price();
            let promo_snapshot = match product.promo_price {
                Some(promo) if promo < product.price => Some(
                    serde_json::json!({ "promo_price": promo, "list_price": product.price })
                        .to_string(),
                ),
                _ => None,
            };
            subtotal += unit_price * Decimal::from(line.quantity);

            item_rows.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                snapshot_name: Set(product.name),
                quantity: Set(line.quantity),
                unit_price_at_purchase: Set(unit_price),
                promo_snapshot: Set(promo_snapshot),
                warranty_months_snapshot: Set(product.warranty_months),
                warranty_exchange_months_snapshot: Set(product.warranty_exchange_months),
                created_at: Set(now),
            });
        }

        // Coupon ledger: quote first, redeem only alongside the order insert.
        let quote = match &request.coupon_code {
            Some(code) => Some(
                coupons::validate_and_price(
                    &txn,
                    code,
                    subtotal,
                    Some(request.customer_id),
                    now,
                )
                .await?,
            ),
            None => None,
        };
        let discount = quote.as_ref().map(|q| q.discount).unwrap_or(Decimal::ZERO);
        let total_amount = subtotal - discount;

        let order_number = next_order_number(&txn, now).await?;
        let order_row = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(request.customer_id),
            customer_name: Set(request.customer_name.clone()),
            customer_phone: Set(request.customer_phone.clone()),
            shipping_address: Set(request.shipping_address.clone()),
            status: Set(OrderStatus::New),
            total_amount: Set(total_amount),
            delivered_date: Set(None),
            cancel_reason: Set(None),
            coupon_id: Set(quote.as_ref().map(|q| q.coupon_id)),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };
        let order_model = order_row.insert(&txn).await?;

        let mut lines = Vec::with_capacity(item_rows.len());
        for row in item_rows {
            let item = row.insert(&txn).await?;
            lines.push(OrderLine {
                item,
                warranty_units: Vec::new(),
            });
        }

        let mut post_commit = vec![Event::OrderCreated(order_id)];
        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(
                events::ORDER_CREATED,
                serde_json::json!({
                    "order_number": order_model.order_number,
                    "total_amount": total_amount,
                    "subtotal": subtotal,
                    "discount": discount,
                }),
            )
            .for_order(order_id),
        )
        .await?;

        if let Some(quote) = &quote {
            coupons::redeem(&txn, quote, request.customer_id, order_id, now).await?;
            events::append_audit(
                &txn,
                actor,
                now,
                AuditEntry::new(
                    events::COUPON_REDEEMED,
                    serde_json::json!({ "code": quote.code, "discount": quote.discount }),
                )
                .for_order(order_id),
            )
            .await?;
            post_commit.push(Event::CouponRedeemed {
                coupon_id: quote.coupon_id,
                order_id,
            });
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_model.order_number, "order created");
        self.event_sender.publish_all(post_commit).await;

        Ok(OrderDetails {
            order: order_model,
            lines,
        })
    }

    /// Advances the order state machine. A repeat DELIVERED call is the one
    /// sanctioned no-op; every other illegal move is refused.
    #[instrument(skip(self, actor, note), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn transition_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        new_status: OrderStatus,
        note: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let capability = match new_status {
            OrderStatus::CancelledByCustomer => Capability::CancelOrderAsCustomer,
            OrderStatus::CancelledByShop => Capability::CancelOrderAsShop,
            _ => Capability::TransitionOrder,
        };
        actor.require(capability)?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let mut query = OrderEntity::find_by_id(order_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let order_model = query
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Idempotent retry safety for duplicate delivery confirmations.
        if new_status == OrderStatus::Delivered && order_model.status == OrderStatus::Delivered {
            txn.commit().await?;
            return Ok(TransitionOutcome::AlreadyDelivered(order_model));
        }

        let old_status = order_model.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot move order {} from {} to {}",
                order_model.order_number,
                old_status.as_str(),
                new_status.as_str()
            )));
        }

        if new_status == OrderStatus::CancelledByCustomer {
            if actor.role == Role::Customer && order_model.customer_id != actor.id {
                return Err(ServiceError::Forbidden(
                    "customers may only cancel their own orders".to_string(),
                ));
            }
            match note.as_deref().map(str::trim) {
                Some(reason) if reason.len() >= 10 => {}
                _ => {
                    return Err(ServiceError::ValidationError(
                        "cancellation requires a reason of at least 10 characters".to_string(),
                    ))
                }
            }
        }

        let mut active: order::ActiveModel = order_model.clone().into();
        active.status = Set(new_status);
        active.version = Set(order_model.version + 1);
        if matches!(
            new_status,
            OrderStatus::CancelledByCustomer | OrderStatus::CancelledByShop
        ) {
            active.cancel_reason = Set(note.clone());
        }

        let mut post_commit = vec![Event::OrderStatusChanged {
            order_id,
            old_status: old_status.as_str().to_string(),
            new_status: new_status.as_str().to_string(),
        }];

        let updated = if new_status == OrderStatus::Delivered {
            active.delivered_date = Set(Some(now));
            let updated = active.update(&txn).await?;

            // Warranty issuer: one unit per purchased quantity, minted inside
            // this same transaction.
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await?;
            let mut minted_total = 0usize;
            for item in &items {
                minted_total += self.warranties.issue_for_item(&txn, item, now).await?.len();
            }

            events::append_audit(
                &txn,
                actor,
                now,
                AuditEntry::new(
                    events::ORDER_STATUS_CHANGED,
                    status_change_metadata(old_status, new_status, note.as_deref()),
                )
                .for_order(order_id),
            )
            .await?;
            events::append_audit(
                &txn,
                actor,
                now,
                AuditEntry::new(
                    events::ORDER_DELIVERED_CONFIRMED,
                    serde_json::json!({ "delivered_date": now }),
                )
                .for_order(order_id),
            )
            .await?;
            if minted_total > 0 {
                events::append_audit(
                    &txn,
                    actor,
                    now,
                    AuditEntry::new(
                        events::WARRANTY_CODES_GENERATED,
                        serde_json::json!({ "count": minted_total }),
                    )
                    .for_order(order_id),
                )
                .await?;
                post_commit.push(Event::WarrantyCodesGenerated {
                    order_id,
                    count: minted_total,
                });
            }
            post_commit.push(Event::OrderDelivered(order_id));
            updated
        } else {
            let updated = active.update(&txn).await?;
            events::append_audit(
                &txn,
                actor,
                now,
                AuditEntry::new(
                    events::ORDER_STATUS_CHANGED,
                    status_change_metadata(old_status, new_status, note.as_deref()),
                )
                .for_order(order_id),
            )
            .await?;
            updated
        };

        txn.commit().await?;

        info!(
            order_id = %order_id,
            from = old_status.as_str(),
            to = new_status.as_str(),
            "order transitioned"
        );
        self.event_sender.publish_all(post_commit).await;

        Ok(TransitionOutcome::Applied(updated))
    }

    /// Customer/shop cancellation. Thin wrapper: the reason is mandatory and
    /// the state machine decides whether the current status allows it.
    #[instrument(skip(self, actor, reason), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
        reason: String,
    ) -> Result<order::Model, ServiceError> {
        if reason.trim().len() < 10 {
            return Err(ServiceError::ValidationError(
                "cancellation requires a reason of at least 10 characters".to_string(),
            ));
        }
        let target = match actor.role {
            Role::Customer => OrderStatus::CancelledByCustomer,
            _ => OrderStatus::CancelledByShop,
        };
        let outcome = self
            .transition_order(actor, order_id, target, Some(reason))
            .await?;
        Ok(outcome.order().clone())
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError> {
        let db = self.db.as_ref();
        let Some(order_model) = OrderEntity::find_by_id(order_id).one(db).await? else {
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let warranty_units = WarrantyUnitEntity::find()
                .filter(warranty_unit::Column::OrderItemId.eq(item.id))
                .order_by_asc(warranty_unit::Column::UnitNo)
                .all(db)
                .await?;
            lines.push(OrderLine {
                item,
                warranty_units,
            });
        }

        Ok(Some(OrderDetails {
            order: order_model,
            lines,
        }))
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}

fn status_change_metadata(
    from: OrderStatus,
    to: OrderStatus,
    note: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "from": from.as_str(),
        "to": to.as_str(),
        "note": note,
    })
}

/// Allocates a human-readable order number not yet in use. The unique index
/// on `order_number` backstops a concurrent allocation of the same value.
pub(crate) async fn next_order_number<C: ConnectionTrait>(
    conn: &C,
    at: DateTime<Utc>,
) -> Result<String, ServiceError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
        let candidate = format!("ORD-{}-{:05}", at.format("%y%m"), suffix);
        let taken = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(candidate.clone()))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
        "order number space exhausted for this month".to_string(),
    )))
}
