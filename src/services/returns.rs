//! Return/replacement workflow.
//!
//! `PENDING → APPROVED → COMPLETED`, with `PENDING → REJECTED` as the other
//! terminal path. Approval may spawn an independent replacement order;
//! completion retires the claimed warranty unit and mints its successor.

use chrono::Duration;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, Capability};
use crate::clock::SharedClock;
use crate::db::DbPool;
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::Entity as ProductEntity;
use crate::entities::return_request::{self, Entity as ReturnRequestEntity, ReturnStatus};
use crate::entities::warranty_unit::{self, Entity as WarrantyUnitEntity};
use crate::errors::ServiceError;
use crate::events::{self, AuditEntry, Event, EventSender};
use crate::services::warranties::WarrantyService;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    /// Scope the claim to one unit; required for an eventual replacement.
    pub warranty_unit_id: Option<Uuid>,
    #[validate(length(min = 10, message = "Reason must be at least 10 characters"))]
    pub reason: String,
    #[validate(length(min = 1, max = 5, message = "Provide between 1 and 5 images"))]
    pub images: Vec<String>,
}

/// Result of completing a return: the closed request plus both ends of the
/// replacement chain.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedReturn {
    pub return_request: return_request::Model,
    pub old_warranty: warranty_unit::Model,
    pub new_warranty: warranty_unit::Model,
}

#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    warranties: Arc<WarrantyService>,
    clock: SharedClock,
    return_window_days: i64,
}

impl ReturnService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        warranties: Arc<WarrantyService>,
        clock: SharedClock,
        return_window_days: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            warranties,
            clock,
            return_window_days,
        }
    }

    /// Files a claim against a delivered order. The 30-day window is
    /// inclusive: a claim exactly at the boundary is still valid.
    #[instrument(skip(self, actor, request), fields(order_id = %request.order_id, actor_id = %actor.id))]
    pub async fn create_return(
        &self,
        actor: &Actor,
        request: CreateReturnRequest,
    ) -> Result<return_request::Model, ServiceError> {
        actor.require(Capability::CreateReturn)?;
        request.validate()?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let order_model = OrderEntity::find_by_id(request.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", request.order_id))
            })?;
        if order_model.customer_id != actor.id {
            return Err(ServiceError::Forbidden(
                "returns can only be filed for your own orders".to_string(),
            ));
        }
        if order_model.status != OrderStatus::Delivered {
            return Err(ServiceError::InvalidTransition(format!(
                "order {} is not delivered",
                order_model.order_number
            )));
        }
        let delivered_date = order_model.delivered_date.ok_or_else(|| {
            ServiceError::InvalidTransition(format!(
                "order {} has no delivery date",
                order_model.order_number
            ))
        })?;
        if now - delivered_date > Duration::days(self.return_window_days) {
            return Err(ServiceError::ReturnWindowExpired(format!(
                "order {} was delivered more than {} days ago",
                order_model.order_number, self.return_window_days
            )));
        }

        if let Some(unit_id) = request.warranty_unit_id {
            let unit = WarrantyUnitEntity::find_by_id(unit_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Warranty unit {} not found", unit_id))
                })?;
            let item = OrderItemEntity::find_by_id(unit.order_item_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Order item {} not found", unit.order_item_id))
                })?;
            if item.order_id != request.order_id {
                return Err(ServiceError::ValidationError(
                    "warranty unit does not belong to this order".to_string(),
                ));
            }

            let pending = ReturnRequestEntity::find()
                .filter(return_request::Column::WarrantyUnitId.eq(unit_id))
                .filter(return_request::Column::Status.eq(ReturnStatus::Pending))
                .count(&txn)
                .await?;
            if pending > 0 {
                return Err(ServiceError::DuplicatePendingReturn(unit_id));
            }
        }

        let row = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(request.order_id),
            warranty_unit_id: Set(request.warranty_unit_id),
            customer_id: Set(actor.id),
            reason: Set(request.reason.clone()),
            images: Set(serde_json::to_string(&request.images)
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?),
            status: Set(ReturnStatus::Pending),
            admin_note: Set(None),
            replacement_order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let created = row.insert(&txn).await?;

        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(
                events::RETURN_CREATED,
                serde_json::json!({
                    "warranty_unit_id": request.warranty_unit_id,
                    "image_count": request.images.len(),
                }),
            )
            .for_order(request.order_id)
            .for_return(created.id),
        )
        .await?;
        txn.commit().await?;

        info!(return_id = %created.id, "return request created");
        self.event_sender.publish(Event::ReturnCreated(created.id)).await;
        Ok(created)
    }

    /// Approves a pending claim. When the claim is scoped to a unit whose
    /// product is still sold, a brand-new replacement order (NEW, quantity 1,
    /// current sale price, no promo) is spawned in the same transaction; its
    /// lifecycle is independent from here on.
    #[instrument(skip(self, actor, note), fields(return_id = %return_id, actor_id = %actor.id))]
    pub async fn approve_return(
        &self,
        actor: &Actor,
        return_id: Uuid,
        note: Option<String>,
    ) -> Result<return_request::Model, ServiceError> {
        actor.require(Capability::ReviewReturn)?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let request = self.find_pending(&txn, return_id).await?;
        if request.customer_id == actor.id {
            return Err(ServiceError::Forbidden(
                "the filing customer cannot review their own return".to_string(),
            ));
        }

        let mut post_commit = vec![Event::ReturnApproved(return_id)];

        // Replacement order, only when the product is still active.
        let mut replacement_order_id = None;
        if let Some(unit_id) = request.warranty_unit_id {
            let unit = WarrantyUnitEntity::find_by_id(unit_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Warranty unit {} not found", unit_id))
                })?;
            let item = OrderItemEntity::find_by_id(unit.order_item_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Order item {} not found", unit.order_item_id))
                })?;
            let product = ProductEntity::find_by_id(item.product_id).one(&txn).await?;

            if let Some(product) = product.filter(|p| p.is_active) {
                let original = OrderEntity::find_by_id(request.order_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", request.order_id))
                    })?;

                let new_order_id = Uuid::new_v4();
                let order_number = derive_replacement_number(&txn, &original.order_number).await?;
                let order_row = order::ActiveModel {
                    id: Set(new_order_id),
                    order_number: Set(order_number),
                    customer_id: Set(original.customer_id),
                    customer_name: Set(original.customer_name.clone()),
                    customer_phone: Set(original.customer_phone.clone()),
                    shipping_address: Set(original.shipping_address.clone()),
                    status: Set(OrderStatus::New),
                    total_amount: Set(product.price),
                    delivered_date: Set(None),
                    cancel_reason: Set(None),
                    coupon_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(None),
                    version: Set(1),
                };
                let new_order = order_row.insert(&txn).await?;

                let item_row = order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(new_order_id),
                    product_id: Set(product.id),
                    snapshot_name: Set(product.name.clone()),
                    quantity: Set(1),
                    unit_price_at_purchase: Set(product.price),
                    promo_snapshot: Set(None),
                    warranty_months_snapshot: Set(product.warranty_months),
                    warranty_exchange_months_snapshot: Set(product.warranty_exchange_months),
                    created_at: Set(now),
                };
                item_row.insert(&txn).await?;

                events::append_audit(
                    &txn,
                    actor,
                    now,
                    AuditEntry::new(
                        events::REPLACEMENT_ORDER_CREATED,
                        serde_json::json!({
                            "order_number": new_order.order_number,
                            "original_order_id": request.order_id,
                        }),
                    )
                    .for_order(new_order_id)
                    .for_return(return_id),
                )
                .await?;
                post_commit.push(Event::ReplacementOrderCreated {
                    return_request_id: return_id,
                    order_id: new_order_id,
                });
                replacement_order_id = Some(new_order_id);
            }
        }

        let order_id = request.order_id;
        let mut active: return_request::ActiveModel = request.into();
        active.status = Set(ReturnStatus::Approved);
        active.admin_note = Set(note.clone());
        active.replacement_order_id = Set(replacement_order_id);
        let updated = active.update(&txn).await?;

        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(
                events::RETURN_APPROVED,
                serde_json::json!({ "note": note, "replacement_order_id": replacement_order_id }),
            )
            .for_order(order_id)
            .for_return(return_id),
        )
        .await?;
        txn.commit().await?;

        info!(return_id = %return_id, ?replacement_order_id, "return approved");
        self.event_sender.publish_all(post_commit).await;
        Ok(updated)
    }

    #[instrument(skip(self, actor, note), fields(return_id = %return_id, actor_id = %actor.id))]
    pub async fn reject_return(
        &self,
        actor: &Actor,
        return_id: Uuid,
        note: String,
    ) -> Result<return_request::Model, ServiceError> {
        actor.require(Capability::ReviewReturn)?;
        if note.trim().len() < 10 {
            return Err(ServiceError::ValidationError(
                "rejection requires a note of at least 10 characters".to_string(),
            ));
        }

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let request = self.find_pending(&txn, return_id).await?;
        if request.customer_id == actor.id {
            return Err(ServiceError::Forbidden(
                "the filing customer cannot review their own return".to_string(),
            ));
        }

        let order_id = request.order_id;
        let mut active: return_request::ActiveModel = request.into();
        active.status = Set(ReturnStatus::Rejected);
        active.admin_note = Set(Some(note.clone()));
        let updated = active.update(&txn).await?;

        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(events::RETURN_REJECTED, serde_json::json!({ "note": note }))
                .for_order(order_id)
                .for_return(return_id),
        )
        .await?;
        txn.commit().await?;

        info!(return_id = %return_id, "return rejected");
        self.event_sender.publish(Event::ReturnRejected(return_id)).await;
        Ok(updated)
    }

    /// Technician hand-off: the replacement unit physically shipped. Retires
    /// the claimed warranty unit, mints its successor with a fresh term, and
    /// closes the request, all in one transaction.
    #[instrument(skip(self, actor), fields(return_id = %return_id, actor_id = %actor.id))]
    pub async fn complete_return(
        &self,
        actor: &Actor,
        return_id: Uuid,
    ) -> Result<CompletedReturn, ServiceError> {
        actor.require(Capability::CompleteReturn)?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let mut query = ReturnRequestEntity::find_by_id(return_id);
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let request = query
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;
        if request.status != ReturnStatus::Approved {
            return Err(ServiceError::InvalidTransition(format!(
                "return {} is not approved",
                return_id
            )));
        }
        let unit_id = request.warranty_unit_id.ok_or_else(|| {
            ServiceError::ValidationError(
                "return is not scoped to a warranty unit".to_string(),
            )
        })?;

        let old_unit = crate::services::warranties::find_unit(&txn, unit_id).await?;
        let (old_warranty, new_warranty) = self.warranties.replace_unit(&txn, old_unit, now).await?;

        let order_id = request.order_id;
        let mut active: return_request::ActiveModel = request.into();
        active.status = Set(ReturnStatus::Completed);
        let updated = active.update(&txn).await?;

        for (event_type, metadata) in [
            (
                events::RETURN_COMPLETED,
                serde_json::json!({ "warranty_unit_id": unit_id }),
            ),
            (
                events::WARRANTY_REPLACED,
                serde_json::json!({ "old_unit_id": old_warranty.id, "new_unit_id": new_warranty.id }),
            ),
            (
                events::WARRANTY_NEW_CREATED_FROM_REPLACEMENT,
                serde_json::json!({
                    "new_unit_id": new_warranty.id,
                    "warranty_code": new_warranty.warranty_code,
                }),
            ),
        ] {
            events::append_audit(
                &txn,
                actor,
                now,
                AuditEntry::new(event_type, metadata)
                    .for_order(order_id)
                    .for_return(return_id),
            )
            .await?;
        }
        txn.commit().await?;

        info!(
            return_id = %return_id,
            old_unit = %old_warranty.id,
            new_unit = %new_warranty.id,
            "return completed with warranty replacement"
        );
        self.event_sender
            .publish_all([
                Event::ReturnCompleted(return_id),
                Event::WarrantyReplaced {
                    old_unit_id: old_warranty.id,
                    new_unit_id: new_warranty.id,
                },
            ])
            .await;

        Ok(CompletedReturn {
            return_request: updated,
            old_warranty,
            new_warranty,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_return(
        &self,
        return_id: Uuid,
    ) -> Result<Option<return_request::Model>, ServiceError> {
        let request = ReturnRequestEntity::find_by_id(return_id)
            .one(self.db.as_ref())
            .await?;
        Ok(request)
    }

    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<return_request::Model>, u64), ServiceError> {
        let paginator = ReturnRequestEntity::find()
            .order_by_desc(return_request::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await?;
        let requests = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((requests, total))
    }

    // Holds the row until commit on Postgres so two reviewers cannot both
    // see PENDING. SQLite serializes writers on its own.
    async fn find_pending<C: ConnectionTrait>(
        &self,
        conn: &C,
        return_id: Uuid,
    ) -> Result<return_request::Model, ServiceError> {
        let mut query = ReturnRequestEntity::find_by_id(return_id);
        if conn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }
        let request = query
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))?;
        if request.status != ReturnStatus::Pending {
            return Err(ServiceError::InvalidTransition(format!(
                "return {} is not pending",
                return_id
            )));
        }
        Ok(request)
    }
}

/// Derives the replacement order's code from the original's, e.g.
/// `ORD-2608-00042-R1`.
async fn derive_replacement_number<C: ConnectionTrait>(
    conn: &C,
    original: &str,
) -> Result<String, ServiceError> {
    for n in 1..=99 {
        let candidate = format!("{}-R{}", original, n);
        let taken = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(candidate.clone()))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(format!(
        "no replacement number available for {}",
        original
    ))))
}
