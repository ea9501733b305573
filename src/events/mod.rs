//! Domain events.
//!
//! Every committed mutation does two things: appends rows to the append-only
//! `event_log` table inside the same transaction (the audit trail dashboards
//! read), and best-effort publishes an in-process [`Event`] on an mpsc channel
//! after commit for notification/analytics consumers. Channel loss is logged
//! and never fails the operation.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::event_log;
use crate::errors::ServiceError;

// Audit event types. These names are part of the contract with downstream
// dashboard/analytics readers.
pub const ORDER_CREATED: &str = "ORDER_CREATED";
pub const ORDER_STATUS_CHANGED: &str = "ORDER_STATUS_CHANGED";
pub const ORDER_DELIVERED_CONFIRMED: &str = "ORDER_DELIVERED_CONFIRMED";
pub const WARRANTY_CODES_GENERATED: &str = "WARRANTY_CODES_GENERATED";
pub const COUPON_REDEEMED: &str = "COUPON_REDEEMED";
pub const RETURN_CREATED: &str = "RETURN_CREATED";
pub const RETURN_APPROVED: &str = "RETURN_APPROVED";
pub const RETURN_REJECTED: &str = "RETURN_REJECTED";
pub const RETURN_COMPLETED: &str = "RETURN_COMPLETED";
pub const REPLACEMENT_ORDER_CREATED: &str = "REPLACEMENT_ORDER_CREATED";
pub const WARRANTY_REPLACED: &str = "WARRANTY_REPLACED";
pub const WARRANTY_NEW_CREATED_FROM_REPLACEMENT: &str = "WARRANTY_NEW_CREATED_FROM_REPLACEMENT";
pub const WARRANTY_EXCHANGE_VOIDED: &str = "WARRANTY_EXCHANGE_VOIDED";
pub const WARRANTY_VOIDED: &str = "WARRANTY_VOIDED";

/// In-process events published after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderDelivered(Uuid),
    WarrantyCodesGenerated {
        order_id: Uuid,
        count: usize,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
    },
    ReturnCreated(Uuid),
    ReturnApproved(Uuid),
    ReturnRejected(Uuid),
    ReturnCompleted(Uuid),
    ReplacementOrderCreated {
        return_request_id: Uuid,
        order_id: Uuid,
    },
    WarrantyReplaced {
        old_unit_id: Uuid,
        new_unit_id: Uuid,
    },
    WarrantyVoided(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes one event; a full or closed channel is logged, not surfaced.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "failed to publish in-process event");
        }
    }

    pub async fn publish_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

/// One row bound for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: &'static str,
    pub metadata: serde_json::Value,
    pub order_id: Option<Uuid>,
    pub return_request_id: Option<Uuid>,
}

impl AuditEntry {
    pub fn new(event_type: &'static str, metadata: serde_json::Value) -> Self {
        Self {
            event_type,
            metadata,
            order_id: None,
            return_request_id: None,
        }
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn for_return(mut self, return_request_id: Uuid) -> Self {
        self.return_request_id = Some(return_request_id);
        self
    }
}

/// Appends one audit row. Must be called with the transaction of the state
/// change it describes so the trail commits or rolls back with it.
pub async fn append_audit<C: ConnectionTrait>(
    conn: &C,
    actor: &Actor,
    at: DateTime<Utc>,
    entry: AuditEntry,
) -> Result<(), ServiceError> {
    use sea_orm::ActiveModelTrait;

    let row = event_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        event_type: Set(entry.event_type.to_string()),
        metadata: Set(entry.metadata.to_string()),
        actor_id: Set(actor.id),
        actor_role: Set(actor.role.to_string()),
        order_id: Set(entry.order_id),
        return_request_id: Set(entry.return_request_id),
        created_at: Set(at),
    };
    row.insert(conn).await?;
    Ok(())
}
