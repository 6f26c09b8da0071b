use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod outbox;

/// Domain events emitted after state changes commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CouponApplied { cart_id: Uuid, coupon_id: Uuid },

    // Checkout events
    CheckoutStarted { cart_id: Uuid, session_id: String },

    // Payment / fulfillment events
    PaymentEventReceived { event_id: String, event_type: String },
    OrderCreated(Uuid),
    FulfillmentFailed { job_id: Uuid, cart_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging on failure. Event delivery is advisory and
    /// must never fail the request path that produced it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dispatch failed: {}", e);
        }
    }
}

/// Consumes the event channel and logs each event. Integration hooks
/// (notifications, analytics) hang off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order materialized");
            }
            Event::CouponApplied { cart_id, coupon_id } => {
                info!(%cart_id, %coupon_id, "coupon applied to cart");
            }
            Event::CheckoutStarted {
                cart_id,
                session_id,
            } => {
                info!(%cart_id, %session_id, "checkout session created");
            }
            Event::PaymentEventReceived {
                event_id,
                event_type,
            } => {
                info!(%event_id, %event_type, "payment event accepted");
            }
            Event::FulfillmentFailed { job_id, cart_id } => {
                error!(%job_id, %cart_id, "fulfillment job exhausted its retries");
            }
            other => {
                info!("event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
