pub mod coupon;
pub mod coupon_usage;
pub mod event_log;
pub mod order;
pub mod order_item;
pub mod product;
pub mod return_request;
pub mod warranty_unit;
