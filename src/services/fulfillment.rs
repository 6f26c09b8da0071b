use crate::{
    config::CheckoutConfig,
    entities::{cart, cart_item, order, order_item, product, user},
    errors::ServiceError,
    gateway::ShippingMetadata,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a materialization attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// Order persisted and inventory adjusted.
    Created(Uuid),
    /// The referenced cart is gone, so the event was applied before.
    AlreadyApplied,
}

/// Turns a confirmed payment event into a durable order.
///
/// The whole sequence runs in one transaction: snapshot the cart into an
/// order, adjust inventory per line, delete the cart. The cart deletion is
/// the durable applied marker; a redelivered event finds no cart and no-ops.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    shipping_fee_minor: i64,
}

impl FulfillmentService {
    pub fn new(db: Arc<DatabaseConnection>, checkout: &CheckoutConfig) -> Self {
        Self {
            db,
            shipping_fee_minor: checkout.shipping_fee_minor,
        }
    }

    #[instrument(skip(self, metadata), fields(%cart_id))]
    pub async fn materialize(
        &self,
        cart_id: Uuid,
        buyer_email: &str,
        amount_total_minor: i64,
        metadata: &ShippingMetadata,
    ) -> Result<MaterializeOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = match cart::Entity::find_by_id(cart_id).one(&txn).await? {
            Some(cart) => cart,
            None => {
                info!("cart already retired; payment event is a duplicate");
                return Ok(MaterializeOutcome::AlreadyApplied);
            }
        };

        let buyer = user::Entity::find()
            .filter(user::Column::Email.eq(buyer_email))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No user found for email {}", buyer_email))
            })?;

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;

        let shipping_price = Decimal::from(self.shipping_fee_minor) / Decimal::from(100);
        let total_price = Decimal::from(amount_total_minor) / Decimal::from(100) + shipping_price;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(buyer.id),
            first_name: Set(metadata.first_name.clone()),
            last_name: Set(metadata.last_name.clone()),
            phone: Set(metadata.phone.clone()),
            total_price: Set(total_price),
            shipping_price: Set(shipping_price),
            shipping_country: Set(metadata.country.clone()),
            shipping_address: Set(metadata.address.clone()),
            shipping_governorate: Set(metadata.governorate.clone()),
            shipping_city: Set(metadata.city.clone()),
            status: Set("processing".to_string()),
            payment_status: Set("paid".to_string()),
            payment_method_type: Set("card".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for item in &items {
            // Lines are copied verbatim from the cart snapshot, not re-priced.
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                line_price: Set(item.line_price),
                line_price_after_discount: Set(item.line_price_after_discount),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            // Single-statement bounded decrement. Conditioning on remaining
            // stock at write time is what prevents oversell when two
            // checkouts race for the last units.
            let adjusted = product::Entity::update_many()
                .col_expr(
                    product::Column::QuantityOnHand,
                    Expr::col(product::Column::QuantityOnHand).sub(item.quantity),
                )
                .col_expr(
                    product::Column::QuantitySold,
                    Expr::col(product::Column::QuantitySold).add(item.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(item.product_id))
                .filter(product::Column::QuantityOnHand.gte(item.quantity))
                .exec(&txn)
                .await?;

            if adjusted.rows_affected == 0 {
                warn!(
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "insufficient stock during materialization"
                );
                txn.rollback().await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "Not enough quantity in stock for product {}",
                    item.product_id
                )));
            }
        }

        // Retiring the cart marks the event applied. It must be the last
        // write so a crash before commit leaves everything un-applied.
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        cart::Entity::delete_by_id(cart.id).exec(&txn).await?;

        txn.commit().await?;

        info!(%order_id, "order materialized from payment event");
        Ok(MaterializeOutcome::Created(order_id))
    }
}
