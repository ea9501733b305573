//! Shared harness: application services over an in-memory SQLite database
//! with a pinned, manually-advanced clock.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use voltcart_api::{
    auth::{Actor, Role},
    clock::{ManualClock, SharedClock},
    db::DbPool,
    entities::{coupon, product},
    events::{Event, EventSender},
    migrator::Migrator,
    services::{orders::OrderService, returns::ReturnService, warranties::WarrantyService},
};

pub const RETURN_WINDOW_DAYS: i64 = 30;

pub struct TestCtx {
    pub db: Arc<DbPool>,
    pub clock: Arc<ManualClock>,
    pub orders: OrderService,
    pub returns: ReturnService,
    pub warranties: Arc<WarrantyService>,
    // Keeps the channel open so publishes stay silent.
    _event_rx: mpsc::Receiver<Event>,
}

pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
}

impl TestCtx {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.expect("sqlite connect");
        use sea_orm_migration::MigratorTrait;
        Migrator::up(&db, None).await.expect("migrations");
        let db = Arc::new(db);

        let clock = Arc::new(ManualClock::new(test_epoch()));
        let shared: SharedClock = clock.clone();

        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);

        let warranties = Arc::new(WarrantyService::new(
            db.clone(),
            event_sender.clone(),
            shared.clone(),
            "VC".to_string(),
        ));
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            warranties.clone(),
            shared.clone(),
        );
        let returns = ReturnService::new(
            db.clone(),
            event_sender,
            warranties.clone(),
            shared,
            RETURN_WINDOW_DAYS,
        );

        Self {
            db,
            clock,
            orders,
            returns,
            warranties,
            _event_rx: rx,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        voltcart_api::clock::Clock::now(self.clock.as_ref())
    }

    pub async fn seed_product(&self, name: &str, sku: &str, price: Decimal) -> product::Model {
        self.seed_product_with_warranty(name, sku, price, 12, 1).await
    }

    pub async fn seed_product_with_warranty(
        &self,
        name: &str,
        sku: &str,
        price: Decimal,
        warranty_months: i32,
        exchange_months: i32,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            price: Set(price),
            promo_price: Set(None),
            warranty_months: Set(warranty_months),
            warranty_exchange_months: Set(exchange_months),
            is_active: Set(true),
            created_at: Set(self.now()),
            updated_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed product")
    }

    pub async fn seed_coupon(&self, row: coupon::ActiveModel) -> coupon::Model {
        row.insert(self.db.as_ref()).await.expect("seed coupon")
    }
}

pub fn customer() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Customer)
}

pub fn staff() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Staff)
}

pub fn technician() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Technician)
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin)
}
