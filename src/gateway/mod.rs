use crate::{config::CheckoutConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod signature;

/// One external line item, priced in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub currency: String,
    pub quantity: i32,
}

/// Buyer and shipping details embedded in the session metadata. The gateway
/// echoes these back verbatim on the completion event, which is how the
/// materializer reconstructs the order without a local session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMetadata {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governorate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Everything the gateway needs to host a checkout page for one cart.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub client_reference_id: Uuid,
    pub customer_email: String,
    pub line_items: Vec<SessionLineItem>,
    pub shipping_fee_minor: i64,
    pub currency: String,
    pub metadata: ShippingMetadata,
    pub success_url: String,
    pub cancel_url: String,
}

/// Session created by the gateway. `payload` carries the gateway response
/// verbatim for the caller to forward; `id` and `url` are pulled out for
/// logging and redirects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: Option<String>,
    pub payload: serde_json::Value,
}

/// External payment processor boundary. Injected as a trait object so tests
/// can substitute a fake without network access.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;
}

/// Stripe-hosted checkout over the form-encoded REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(config: &CheckoutConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            api_base: config.gateway_api_base.trim_end_matches('/').to_string(),
            secret_key: config.gateway_secret_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(cart_id = %request.client_reference_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let params = build_form_params(&request);

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("invalid gateway response: {}", e)))?;

        if !status.is_success() {
            error!(%status, "gateway rejected checkout session");
            return Err(ServiceError::GatewayError(format!(
                "gateway returned {}: {}",
                status,
                body.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
            )));
        }

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ServiceError::GatewayError("gateway response missing session id".to_string())
            })?
            .to_string();
        let url = body
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        info!(session_id = %id, "checkout session created");
        Ok(GatewaySession {
            id,
            url,
            payload: body,
        })
    }
}

/// Flattens the session request into Stripe's bracketed form encoding.
fn build_form_params(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("customer_email".into(), request.customer_email.clone()),
        (
            "client_reference_id".into(),
            request.client_reference_id.to_string(),
        ),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        params.push((
            format!("line_items[{}][price_data][unit_amount]", i),
            item.unit_amount_minor.to_string(),
        ));
        params.push((
            format!("line_items[{}][price_data][currency]", i),
            item.currency.clone(),
        ));
        params.push((
            format!("line_items[{}][price_data][product_data][name]", i),
            item.name.clone(),
        ));
        params.push((
            format!("line_items[{}][quantity]", i),
            item.quantity.to_string(),
        ));
    }

    params.push((
        "shipping_options[0][shipping_rate_data][type]".into(),
        "fixed_amount".into(),
    ));
    params.push((
        "shipping_options[0][shipping_rate_data][fixed_amount][amount]".into(),
        request.shipping_fee_minor.to_string(),
    ));
    params.push((
        "shipping_options[0][shipping_rate_data][fixed_amount][currency]".into(),
        request.currency.clone(),
    ));
    params.push((
        "shipping_options[0][shipping_rate_data][display_name]".into(),
        "Shipping takes 5-7 days".into(),
    ));

    params.push(("metadata[firstName]".into(), request.metadata.first_name.clone()));
    params.push(("metadata[lastName]".into(), request.metadata.last_name.clone()));
    params.push(("metadata[phone]".into(), request.metadata.phone.clone()));
    if let Some(ref country) = request.metadata.country {
        params.push(("metadata[country]".into(), country.clone()));
    }
    if let Some(ref address) = request.metadata.address {
        params.push(("metadata[address]".into(), address.clone()));
    }
    if let Some(ref governorate) = request.metadata.governorate {
        params.push(("metadata[governorate]".into(), governorate.clone()));
    }
    if let Some(ref city) = request.metadata.city {
        params.push(("metadata[city]".into(), city.clone()));
    }

    params
}

/// Inbound payment event envelope, as delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    pub object: CompletedSession,
}

/// The completed-session object inside a payment event. Field presence is
/// lenient here; the materializer validates what it actually needs.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Event type the gateway sends when a hosted checkout finishes paying.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            client_reference_id: Uuid::new_v4(),
            customer_email: "buyer@example.com".to_string(),
            line_items: vec![SessionLineItem {
                name: "Keyboard".to_string(),
                unit_amount_minor: 900,
                currency: "usd".to_string(),
                quantity: 2,
            }],
            shipping_fee_minor: 1000,
            currency: "usd".to_string(),
            metadata: ShippingMetadata {
                first_name: "Amira".to_string(),
                last_name: "Hassan".to_string(),
                phone: "+201000000000".to_string(),
                country: Some("Egypt".to_string()),
                address: Some("12 Nile St".to_string()),
                governorate: Some("Cairo".to_string()),
                city: Some("Giza".to_string()),
            },
            success_url: "http://localhost:8080/api/v1/orders/redirect?status=success".to_string(),
            cancel_url: "http://localhost:8080/api/v1/orders/redirect?status=cancel".to_string(),
        }
    }

    #[test]
    fn form_params_use_bracketed_indexing() {
        let request = sample_request();
        let params = build_form_params(&request);

        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("900"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(
            get("line_items[0][price_data][product_data][name]"),
            Some("Keyboard")
        );
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(
            get("shipping_options[0][shipping_rate_data][fixed_amount][amount]"),
            Some("1000")
        );
        assert_eq!(get("metadata[firstName]"), Some("Amira"));
        assert_eq!(get("metadata[governorate]"), Some("Cairo"));
        assert_eq!(
            get("client_reference_id").map(|s| s.to_string()),
            Some(request.client_reference_id.to_string())
        );
    }

    #[test]
    fn shipping_metadata_round_trips_camel_case() {
        let metadata = sample_request().metadata;
        let json = serde_json::to_value(&metadata).unwrap();

        assert_eq!(json["firstName"], "Amira");
        assert_eq!(json["lastName"], "Hassan");
        assert!(json.get("first_name").is_none());

        let back: ShippingMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn parses_completed_event_payload() {
        let cart_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "client_reference_id": cart_id.to_string(),
                    "customer_email": "buyer@example.com",
                    "amount_total": 2800,
                    "metadata": {
                        "firstName": "Amira",
                        "lastName": "Hassan",
                        "phone": "+201000000000",
                        "country": "Egypt",
                        "address": "12 Nile St",
                        "governorate": "Cairo",
                        "city": "Giza"
                    }
                }
            }
        });

        let event: GatewayEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, CHECKOUT_COMPLETED);
        assert_eq!(
            event.data.object.client_reference_id.as_deref(),
            Some(cart_id.to_string().as_str())
        );
        assert_eq!(event.data.object.amount_total, Some(2800));

        let metadata: ShippingMetadata =
            serde_json::from_value(event.data.object.metadata.unwrap()).unwrap();
        assert_eq!(metadata.first_name, "Amira");
        assert_eq!(metadata.city.as_deref(), Some("Giza"));
    }
}
