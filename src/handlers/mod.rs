pub mod carts;
pub mod common;
pub mod orders;
pub mod webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        carts::CartService, checkout::CheckoutService, fulfillment::FulfillmentService,
        orders::OrderService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub fulfillment: Arc<FulfillmentService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            carts: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                event_sender.clone(),
                gateway,
                config.checkout.clone(),
            )),
            orders: Arc::new(OrderService::new(db.clone())),
            fulfillment: Arc::new(FulfillmentService::new(db, &config.checkout)),
        }
    }
}
