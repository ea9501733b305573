//! Warranty issuance and administration.
//!
//! Units are minted in exactly two places: [`WarrantyService::issue_for_item`]
//! inside the order delivery transaction, and
//! [`WarrantyService::replace_unit`] inside the return completion transaction.
//! Neither commits on its own.

use chrono::{DateTime, Months, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{Actor, Capability};
use crate::clock::SharedClock;
use crate::db::DbPool;
use crate::entities::order_item;
use crate::entities::warranty_unit::{self, Entity as WarrantyUnitEntity, WarrantyStatus};
use crate::errors::ServiceError;
use crate::events::{self, AuditEntry, Event, EventSender};

/// Attempts before giving up on finding an unused warranty code. The suffix
/// space is 100k per month, so more than one retry is already rare.
const CODE_MINT_ATTEMPTS: u32 = 5;

/// Adds calendar months, e.g. warranty terms. Months are snapshot values from
/// the catalog, never negative.
pub fn add_months(date: DateTime<Utc>, months: i32) -> Result<DateTime<Utc>, ServiceError> {
    date.checked_add_months(Months::new(months.max(0) as u32))
        .ok_or_else(|| ServiceError::ValidationError("warranty date out of range".to_string()))
}

#[derive(Clone)]
pub struct WarrantyService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    clock: SharedClock,
    code_prefix: String,
}

impl WarrantyService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        clock: SharedClock,
        code_prefix: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            clock,
            code_prefix,
        }
    }

    /// `PREFIX-YYMM-NNNNN`: issuance year/month plus a zero-padded 5-digit
    /// suffix. Bit-exact external contract; support tooling parses it.
    fn generate_code(&self, at: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
        format!("{}-{}-{:05}", self.code_prefix, at.format("%y%m"), suffix)
    }

    /// Picks a code not yet present in storage. The UNIQUE index on
    /// `warranty_code` still backstops a concurrent mint of the same value.
    async fn mint_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        for _ in 0..CODE_MINT_ATTEMPTS {
            let code = self.generate_code(at);
            let taken = WarrantyUnitEntity::find()
                .filter(warranty_unit::Column::WarrantyCode.eq(code.clone()))
                .count(conn)
                .await?;
            if taken == 0 {
                return Ok(code);
            }
        }
        Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
            "warranty code space exhausted for this month".to_string(),
        )))
    }

    /// Mints one unit per purchased quantity for a delivered order item.
    ///
    /// Idempotent: if the item already has any units, this is a no-op
    /// returning an empty vec, so a retried delivery transition mints
    /// nothing. Runs inside the caller's DELIVERED transaction.
    pub(crate) async fn issue_for_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: &order_item::Model,
        delivered_at: DateTime<Utc>,
    ) -> Result<Vec<warranty_unit::Model>, ServiceError> {
        let existing = WarrantyUnitEntity::find()
            .filter(warranty_unit::Column::OrderItemId.eq(item.id))
            .count(conn)
            .await?;
        if existing > 0 {
            return Ok(Vec::new());
        }

        let end_date = add_months(delivered_at, item.warranty_months_snapshot)?;
        let exchange_until = add_months(delivered_at, item.warranty_exchange_months_snapshot)?;

        let mut minted = Vec::with_capacity(item.quantity.max(0) as usize);
        for unit_no in 1..=item.quantity {
            let code = self.mint_code(conn, delivered_at).await?;
            let unit = warranty_unit::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_item_id: Set(item.id),
                unit_no: Set(unit_no),
                warranty_code: Set(code),
                warranty_months_at_purchase: Set(item.warranty_months_snapshot),
                exchange_months_at_purchase: Set(item.warranty_exchange_months_snapshot),
                start_date: Set(delivered_at),
                end_date: Set(end_date),
                exchange_until: Set(exchange_until),
                status: Set(WarrantyStatus::Active),
                replaced_by: Set(None),
                void_reason: Set(None),
                created_at: Set(delivered_at),
                updated_at: Set(None),
            };
            minted.push(unit.insert(conn).await?);
        }

        Ok(minted)
    }

    /// Mints the successor unit for a completed replacement and retires the
    /// old one. The coverage term is recomputed from `now` using the months
    /// promised at the original purchase. The `replaced_by` link is set
    /// exactly once; a unit already replaced is refused.
    pub(crate) async fn replace_unit<C: ConnectionTrait>(
        &self,
        conn: &C,
        old: warranty_unit::Model,
        now: DateTime<Utc>,
    ) -> Result<(warranty_unit::Model, warranty_unit::Model), ServiceError> {
        if old.replaced_by.is_some() || old.status == WarrantyStatus::Replaced {
            return Err(ServiceError::InvalidTransition(format!(
                "warranty unit {} was already replaced",
                old.id
            )));
        }
        if old.status == WarrantyStatus::Voided {
            return Err(ServiceError::InvalidTransition(format!(
                "warranty unit {} is voided",
                old.id
            )));
        }

        let code = self.mint_code(conn, now).await?;
        let new_unit = warranty_unit::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_item_id: Set(old.order_item_id),
            unit_no: Set(old.unit_no),
            warranty_code: Set(code),
            warranty_months_at_purchase: Set(old.warranty_months_at_purchase),
            exchange_months_at_purchase: Set(old.exchange_months_at_purchase),
            start_date: Set(now),
            end_date: Set(add_months(now, old.warranty_months_at_purchase)?),
            exchange_until: Set(add_months(now, old.exchange_months_at_purchase)?),
            status: Set(WarrantyStatus::Active),
            replaced_by: Set(None),
            void_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let new_unit = new_unit.insert(conn).await?;

        let mut retiring: warranty_unit::ActiveModel = old.into();
        retiring.status = Set(WarrantyStatus::Replaced);
        retiring.replaced_by = Set(Some(new_unit.id));
        let old = retiring.update(conn).await?;

        Ok((old, new_unit))
    }

    /// Terminates a unit's exchange rights only: `exchange_until` collapses to
    /// now, coverage status is untouched. Irreversible.
    #[instrument(skip(self, actor), fields(unit_id = %unit_id, actor_id = %actor.id))]
    pub async fn void_exchange(
        &self,
        actor: &Actor,
        unit_id: Uuid,
        reason: &str,
    ) -> Result<warranty_unit::Model, ServiceError> {
        actor.require(Capability::VoidWarranty)?;
        let reason = non_empty_reason(reason)?;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        let unit = find_unit(&txn, unit_id).await?;
        if unit.status == WarrantyStatus::Voided {
            return Err(ServiceError::InvalidTransition(format!(
                "warranty unit {} is voided",
                unit_id
            )));
        }

        let mut active: warranty_unit::ActiveModel = unit.into();
        active.exchange_until = Set(now);
        active.void_reason = Set(Some(reason.clone()));
        let updated = active.update(&txn).await?;

        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(
                events::WARRANTY_EXCHANGE_VOIDED,
                serde_json::json!({ "warranty_unit_id": unit_id, "reason": reason }),
            ),
        )
        .await?;
        txn.commit().await?;

        info!(unit_id = %unit_id, "warranty exchange rights voided");
        self.event_sender.publish(Event::WarrantyVoided(unit_id)).await;
        Ok(updated)
    }

    /// Terminates a unit entirely: status VOIDED, coverage ends now.
    /// Irreversible; touches no other unit.
    #[instrument(skip(self, actor), fields(unit_id = %unit_id, actor_id = %actor.id))]
    pub async fn void_full(
        &self,
        actor: &Actor,
        unit_id: Uuid,
        reason: &str,
    ) -> Result<warranty_unit::Model, ServiceError> {
        actor.require(Capability::VoidWarranty)?;
        let reason = non_empty_reason(reason)?;
        let now = self.clock.now();

        let txn = self.db.begin().await?;
        let unit = find_unit(&txn, unit_id).await?;
        if unit.status == WarrantyStatus::Voided {
            return Err(ServiceError::InvalidTransition(format!(
                "warranty unit {} is already voided",
                unit_id
            )));
        }

        let mut active: warranty_unit::ActiveModel = unit.into();
        active.status = Set(WarrantyStatus::Voided);
        active.end_date = Set(now);
        active.void_reason = Set(Some(reason.clone()));
        let updated = active.update(&txn).await?;

        events::append_audit(
            &txn,
            actor,
            now,
            AuditEntry::new(
                events::WARRANTY_VOIDED,
                serde_json::json!({ "warranty_unit_id": unit_id, "reason": reason }),
            ),
        )
        .await?;
        txn.commit().await?;

        info!(unit_id = %unit_id, "warranty unit voided");
        self.event_sender.publish(Event::WarrantyVoided(unit_id)).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_warranty(
        &self,
        unit_id: Uuid,
    ) -> Result<Option<warranty_unit::Model>, ServiceError> {
        let unit = WarrantyUnitEntity::find_by_id(unit_id)
            .one(self.db.as_ref())
            .await?;
        Ok(unit)
    }

    /// Support tooling looks units up by the printed code.
    #[instrument(skip(self))]
    pub async fn get_by_code(
        &self,
        code: &str,
    ) -> Result<Option<warranty_unit::Model>, ServiceError> {
        let unit = WarrantyUnitEntity::find()
            .filter(warranty_unit::Column::WarrantyCode.eq(code))
            .one(self.db.as_ref())
            .await?;
        Ok(unit)
    }

    #[instrument(skip(self))]
    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<warranty_unit::Model>, ServiceError> {
        let units = WarrantyUnitEntity::find()
            .join(JoinType::InnerJoin, warranty_unit::Relation::OrderItem.def())
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(warranty_unit::Column::UnitNo)
            .all(self.db.as_ref())
            .await?;
        Ok(units)
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

// Holds the row until commit on Postgres so a void cannot interleave with a
// concurrent replacement. SQLite serializes writers on its own.
pub(crate) async fn find_unit<C: ConnectionTrait>(
    conn: &C,
    unit_id: Uuid,
) -> Result<warranty_unit::Model, ServiceError> {
    let mut query = WarrantyUnitEntity::find_by_id(unit_id);
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Warranty unit {} not found", unit_id)))
}

fn non_empty_reason(reason: &str) -> Result<String, ServiceError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "a reason is required".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn code_format_matches_contract() {
        let clock: SharedClock = Arc::new(crate::clock::SystemClock);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let service = WarrantyService::new(
            Arc::new(sea_orm::DatabaseConnection::Disconnected),
            EventSender::new(tx),
            clock,
            "VC".to_string(),
        );

        let at = Utc.with_ymd_and_hms(2026, 8, 31, 9, 0, 0).unwrap();
        let code = service.generate_code(at);
        let re = regex::Regex::new(r"^VC-2608-\d{5}$").unwrap();
        assert!(re.is_match(&code), "unexpected code format: {code}");
    }

    #[test]
    fn add_months_tracks_calendar_months() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let end = add_months(start, 12).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 31, 0, 0, 0).unwrap());

        // Clamps to the last day of a shorter month.
        let feb = add_months(start, 1).unwrap();
        assert_eq!(feb, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }
}
