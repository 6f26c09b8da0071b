pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod fulfillment_job;
pub mod order;
pub mod order_item;
pub mod product;
pub mod user;
pub mod user_address;
