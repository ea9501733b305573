use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an order. The happy path is linear
/// (`New → Confirmed → Shipping → Delivered`); both cancelled states and
/// `Delivered` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "NEW")]
    New,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "SHIPPING")]
    Shipping,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED_BY_SHOP")]
    CancelledByShop,
    #[sea_orm(string_value = "CANCELLED_BY_CUSTOMER")]
    CancelledByCustomer,
}

impl OrderStatus {
    /// The set of states this status may legally transition to.
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            New => &[Confirmed, CancelledByShop, CancelledByCustomer],
            Confirmed => &[Shipping, CancelledByShop, CancelledByCustomer],
            Shipping => &[Delivered, CancelledByShop],
            Delivered | CancelledByShop | CancelledByCustomer => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::CancelledByShop => "CANCELLED_BY_SHOP",
            OrderStatus::CancelledByCustomer => "CANCELLED_BY_CUSTOMER",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-readable code, unique across the system.
    pub order_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub status: OrderStatus,
    /// Net of coupon discount, frozen at checkout.
    pub total_amount: Decimal,
    pub delivered_date: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::return_request::Entity")]
    ReturnRequest,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::return_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnRequest.def()
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
    use super::OrderStatus::*;
    use test_case::test_case;

    #[test_case(New, Confirmed, true)]
    #[test_case(New, Shipping, false)]
    #[test_case(New, CancelledByShop, true)]
    #[test_case(New, CancelledByCustomer, true)]
    #[test_case(Confirmed, Shipping, true)]
    #[test_case(Confirmed, Delivered, false)]
    #[test_case(Confirmed, CancelledByCustomer, true)]
    #[test_case(Shipping, Delivered, true)]
    #[test_case(Shipping, CancelledByShop, true)]
    #[test_case(Shipping, CancelledByCustomer, false)]
    #[test_case(Delivered, New, false)]
    #[test_case(Delivered, Shipping, false)]
    #[test_case(CancelledByShop, Confirmed, false)]
    #[test_case(CancelledByCustomer, New, false)]
    fn transition_table(from: super::OrderStatus, to: super::OrderStatus, legal: bool) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn terminal_states() {
        assert!(Delivered.is_terminal());
        assert!(CancelledByShop.is_terminal());
        assert!(CancelledByCustomer.is_terminal());
        assert!(!New.is_terminal());
        assert!(!Confirmed.is_terminal());
        assert!(!Shipping.is_terminal());
    }
}
