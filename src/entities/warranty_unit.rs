use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum WarrantyStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "REPLACED")]
    Replaced,
    #[sea_orm(string_value = "VOIDED")]
    Voided,
}

/// Coverage phase, derived from the three dates on every read and never
/// cached back into `status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarrantyPhase {
    Exchange,
    Repair,
    Expired,
}

/// One physical unit's warranty coverage. Minted by the issuer when the
/// parent order is delivered, or by the return workflow when a replacement
/// unit ships.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "warranty_units")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_item_id: Uuid,
    /// 1-based position within the order item's quantity.
    pub unit_no: i32,
    /// `PREFIX-YYMM-NNNNN`, unique system-wide. Parsed by support tooling.
    pub warranty_code: String,
    pub warranty_months_at_purchase: i32,
    pub exchange_months_at_purchase: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub exchange_until: DateTime<Utc>,
    pub status: WarrantyStatus,
    /// Successor unit. Set exactly once, when this unit is replaced.
    pub replaced_by: Option<Uuid>,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Pure function of the three dates; `status` plays no part here.
    pub fn phase(&self, now: DateTime<Utc>) -> WarrantyPhase {
        if now <= self.exchange_until {
            WarrantyPhase::Exchange
        } else if now <= self.end_date {
            WarrantyPhase::Repair
        } else {
            WarrantyPhase::Expired
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order_item::Entity",
        from = "Column::OrderItemId",
        to = "super::order_item::Column::Id"
    )]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if !insert {
            active_model.updated_at = Set(Some(Utc::now()));
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn unit(start: DateTime<Utc>) -> Model {
        Model {
            id: Uuid::new_v4(),
            order_item_id: Uuid::new_v4(),
            unit_no: 1,
            warranty_code: "VC-2601-00042".to_string(),
            warranty_months_at_purchase: 12,
            exchange_months_at_purchase: 1,
            start_date: start,
            end_date: start + Duration::days(365),
            exchange_until: start + Duration::days(30),
            status: WarrantyStatus::Active,
            replaced_by: None,
            void_reason: None,
            created_at: start,
            updated_at: None,
        }
    }

    #[test]
    fn phase_boundaries_are_inclusive() {
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let u = unit(start);

        assert_eq!(u.phase(start), WarrantyPhase::Exchange);
        // Exactly at exchange_until is still the exchange phase.
        assert_eq!(u.phase(u.exchange_until), WarrantyPhase::Exchange);
        assert_eq!(
            u.phase(u.exchange_until + Duration::seconds(1)),
            WarrantyPhase::Repair
        );
        // Exactly at end_date is still repair.
        assert_eq!(u.phase(u.end_date), WarrantyPhase::Repair);
        assert_eq!(
            u.phase(u.end_date + Duration::seconds(1)),
            WarrantyPhase::Expired
        );
    }
}
