use crate::handlers::common::success_response;
use crate::{
    errors::{ErrorResponse, ServiceError},
    events::{outbox, Event},
    gateway::{signature, GatewayEvent, ShippingMetadata, CHECKOUT_COMPLETED},
    AppState,
};
use axum::{body::Bytes, extract::State, http::HeaderMap, response::Response};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEDUP_TTL_SECS: u64 = 24 * 3600;

/// Receives payment events from the gateway. Authentication happens before
/// anything else; an authenticated event is acknowledged with 200 only once
/// its fulfillment work is durably queued, so a crash after the ack can
/// never lose a paid order.
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event authenticated and queued"),
        (status = 400, description = "Signature or payload rejected", body = ErrorResponse)
    ),
    tag = "Webhooks"
)]
#[instrument(skip(state, headers, body))]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let secret = match state.config.checkout.webhook_secret.as_deref() {
        Some(secret) => secret,
        None => {
            error!("payment webhook received but no webhook secret is configured");
            return Err(ServiceError::WebhookAuthFailure(
                "Webhook signature verification is not configured".to_string(),
            ));
        }
    };

    let tolerance = state.config.checkout.webhook_tolerance_secs;
    if !signature::verify(&headers, &body, secret, tolerance) {
        warn!("payment webhook signature verification failed");
        return Err(ServiceError::WebhookAuthFailure(
            "Invalid webhook signature".to_string(),
        ));
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("Webhook error: {}", e)))?;

    info!(event_id = %event.id, event_type = %event.event_type, "payment event received");

    if already_processed(&state, &event.id).await {
        info!(event_id = %event.id, "payment event already processed");
        return Ok(success_response(json!({ "received": true })));
    }

    if event.event_type == CHECKOUT_COMPLETED {
        enqueue_fulfillment(&state, &event).await?;
        // Fast-path marker is written only after the job row is durable;
        // if we crash in between, the outbox unique index still dedups.
        mark_processed(&state, &event.id).await;
    } else {
        info!(event_type = %event.event_type, "ignoring unhandled payment event type");
    }

    state
        .event_sender
        .send_or_log(Event::PaymentEventReceived {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
        })
        .await;

    Ok(success_response(json!({ "received": true })))
}

/// Validate the completed session's reference fields and queue the
/// materialization work. Sessions that cannot ever materialize (missing
/// cart reference, buyer email, total, or shipping metadata) are logged and
/// acknowledged so the gateway stops redelivering them.
async fn enqueue_fulfillment(state: &AppState, event: &GatewayEvent) -> Result<(), ServiceError> {
    let session = &event.data.object;

    let cart_id = session
        .client_reference_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let (cart_id, buyer_email, amount_total) = match (
        cart_id,
        session.customer_email.as_deref(),
        session.amount_total,
    ) {
        (Some(cart_id), Some(email), Some(amount)) => (cart_id, email, amount),
        _ => {
            warn!(
                event_id = %event.id,
                "completed session is missing reference fields; nothing to fulfill"
            );
            return Ok(());
        }
    };

    let metadata: ShippingMetadata = match session.metadata.clone() {
        Some(raw) => match serde_json::from_value(raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    "completed session carries undecodable shipping metadata: {}", e
                );
                return Ok(());
            }
        },
        None => {
            warn!(event_id = %event.id, "completed session has no shipping metadata");
            return Ok(());
        }
    };

    let enqueued = outbox::enqueue(
        &*state.db,
        &event.id,
        cart_id,
        buyer_email,
        amount_total,
        serde_json::to_value(&metadata)?,
    )
    .await?;

    if enqueued {
        info!(event_id = %event.id, %cart_id, "fulfillment job enqueued");
    } else {
        info!(event_id = %event.id, "fulfillment job already queued for this event");
    }
    Ok(())
}

/// Fast-path duplicate check. Redis being down or unconfigured only costs
/// the fast path; the outbox unique index remains the durable guard.
async fn already_processed(state: &AppState, event_id: &str) -> bool {
    let client = match state.redis.as_ref() {
        Some(client) => client,
        None => return false,
    };
    let mut conn = match client.get_async_connection().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("redis unavailable for webhook dedup: {}", e);
            return false;
        }
    };
    let seen: Result<bool, redis::RedisError> = redis::cmd("EXISTS")
        .arg(dedup_key(event_id))
        .query_async(&mut conn)
        .await;
    matches!(seen, Ok(true))
}

async fn mark_processed(state: &AppState, event_id: &str) {
    let client = match state.redis.as_ref() {
        Some(client) => client,
        None => return,
    };
    let mut conn = match client.get_async_connection().await {
        Ok(conn) => conn,
        Err(_) => return,
    };
    let outcome: Result<(), redis::RedisError> = redis::cmd("SET")
        .arg(dedup_key(event_id))
        .arg("1")
        .arg("EX")
        .arg(DEDUP_TTL_SECS)
        .query_async(&mut conn)
        .await;
    if let Err(e) = outcome {
        warn!("failed to record webhook dedup marker: {}", e);
    }
}

fn dedup_key(event_id: &str) -> String {
    format!("wh:{}", event_id)
}
