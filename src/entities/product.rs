use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog snapshot source. This core only ever reads products; catalog CRUD
/// lives with the catalog collaborator.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    pub promo_price: Option<Decimal>,
    pub warranty_months: i32,
    pub warranty_exchange_months: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Price a buyer actually pays right now: the promo price when one is set
    /// and lower than list.
    pub fn effective_price(&self) -> Decimal {
        match self.promo_price {
            Some(promo) if promo < self.price => promo,
            _ => self.price,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
