use crate::{
    entities::{cart, cart_item, coupon, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{self, LineAmounts},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Bounded retries for mutations that lose the optimistic version race.
const MAX_VERSION_RETRIES: u32 = 3;

/// Shopping cart service owning all pre-checkout cart state.
///
/// Each user has at most one live cart, created lazily on the first add.
/// Every mutation derives the touched line's amounts in full from the
/// catalog's current price and discount, then recomputes cart totals; writes
/// are guarded by the cart's version counter so concurrent mutations of the
/// same cart retry instead of silently losing updates.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Cart plus its lines, as handlers return it.
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's live cart with its items.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.find_cart(&*self.db, user_id).await?;
        let items = self.load_items(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Adds a product to the user's cart, creating the cart if none exists.
    /// If the product is already a line, its quantity is incremented and the
    /// line re-derived from the catalog snapshot at the new quantity.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_add_item(user_id, product_id, quantity).await {
                Err(ServiceError::ConcurrentModification(cart_id))
                    if attempts < MAX_VERSION_RETRIES =>
                {
                    debug!(%cart_id, attempts, "cart version conflict, retrying add");
                }
                Err(e) => return Err(e),
                Ok((result, created)) => {
                    if created {
                        self.event_sender
                            .send_or_log(Event::CartCreated(result.cart.id))
                            .await;
                    }
                    self.event_sender
                        .send_or_log(Event::CartItemAdded {
                            cart_id: result.cart.id,
                            product_id,
                        })
                        .await;
                    info!(cart_id = %result.cart.id, %product_id, quantity, "added item to cart");
                    return Ok(result);
                }
            }
        }
    }

    /// Sets a line's quantity and re-derives its amounts from the catalog.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_update_item(user_id, item_id, quantity).await {
                Err(ServiceError::ConcurrentModification(cart_id))
                    if attempts < MAX_VERSION_RETRIES =>
                {
                    debug!(%cart_id, attempts, "cart version conflict, retrying update");
                }
                Err(e) => return Err(e),
                Ok(result) => {
                    self.event_sender
                        .send_or_log(Event::CartItemUpdated {
                            cart_id: result.cart.id,
                            item_id,
                        })
                        .await;
                    return Ok(result);
                }
            }
        }
    }

    /// Removes a line from the user's cart. Removing an id that is not in
    /// the cart is a no-op, matching the remove-if-present semantics of the
    /// storefront.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_remove_item(user_id, item_id).await {
                Err(ServiceError::ConcurrentModification(cart_id))
                    if attempts < MAX_VERSION_RETRIES =>
                {
                    debug!(%cart_id, attempts, "cart version conflict, retrying remove");
                }
                Err(e) => return Err(e),
                Ok((result, removed)) => {
                    if removed {
                        self.event_sender
                            .send_or_log(Event::CartItemRemoved {
                                cart_id: result.cart.id,
                                item_id,
                            })
                            .await;
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// Deletes the user's cart and all of its lines.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let cart = self.find_cart(&*self.db, user_id).await?;

        let txn = self.db.begin().await?;
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        cart::Entity::delete_by_id(cart.id).exec(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;
        info!(cart_id = %cart.id, "cart cleared");
        Ok(())
    }

    /// Applies a coupon code to the user's cart. A cart takes at most one
    /// coupon for its lifetime; the write is a single conditional update so
    /// two concurrent applications can never both succeed.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_apply_coupon(user_id, code).await {
                Err(ServiceError::ConcurrentModification(cart_id))
                    if attempts < MAX_VERSION_RETRIES =>
                {
                    debug!(%cart_id, attempts, "cart version conflict, retrying coupon");
                }
                Err(e) => return Err(e),
                Ok(result) => {
                    if let Some(coupon_id) = result.cart.coupon_id {
                        self.event_sender
                            .send_or_log(Event::CouponApplied {
                                cart_id: result.cart.id,
                                coupon_id,
                            })
                            .await;
                    }
                    return Ok(result);
                }
            }
        }
    }

    async fn try_add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(CartWithItems, bool), ServiceError> {
        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let existing_cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;

        let now = Utc::now();
        let (cart_model, created) = match existing_cart {
            Some(c) => (c, false),
            None => {
                let cart_id = Uuid::new_v4();
                let fresh = cart::ActiveModel {
                    id: Set(cart_id),
                    user_id: Set(user_id),
                    total_price: Set(Decimal::ZERO),
                    total_price_after_discount: Set(Decimal::ZERO),
                    coupon_applied: Set(false),
                    coupon_id: Set(None),
                    version: Set(1),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                match fresh.insert(&txn).await {
                    Ok(model) => (model, true),
                    // Another request created this user's cart first.
                    Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                        txn.rollback().await?;
                        return Err(ServiceError::ConcurrentModification(cart_id));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let existing_item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_model.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing_item {
            Some(item) => {
                let new_quantity = item.quantity + quantity;
                let amounts =
                    pricing::derive_line(product.price, product.discount_percent, new_quantity);
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(new_quantity);
                item.line_price = Set(amounts.line_price);
                item.line_price_after_discount = Set(amounts.line_price_after_discount);
                item.updated_at = Set(now);
                item.update(&txn).await?;
            }
            None => {
                let amounts =
                    pricing::derive_line(product.price, product.discount_percent, quantity);
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_model.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    line_price: Set(amounts.line_price),
                    line_price_after_discount: Set(amounts.line_price_after_discount),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        match self.refresh_totals(&txn, &cart_model).await? {
            Some(result) => {
                txn.commit().await?;
                Ok((result, created))
            }
            None => {
                txn.rollback().await?;
                Err(ServiceError::ConcurrentModification(cart_model.id))
            }
        }
    }

    async fn try_update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, user_id).await?;
        let item = cart_item::Entity::find()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No cart item found with id {}", item_id))
            })?;

        let product = product::Entity::find_by_id(item.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;

        let amounts = pricing::derive_line(product.price, product.discount_percent, quantity);
        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.line_price = Set(amounts.line_price);
        item.line_price_after_discount = Set(amounts.line_price_after_discount);
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        match self.refresh_totals(&txn, &cart).await? {
            Some(result) => {
                txn.commit().await?;
                Ok(result)
            }
            None => {
                txn.rollback().await?;
                Err(ServiceError::ConcurrentModification(cart.id))
            }
        }
    }

    async fn try_remove_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<(CartWithItems, bool), ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, user_id).await?;
        let item = cart_item::Entity::find()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?;

        let item = match item {
            Some(item) => item,
            None => {
                let items = self.load_items(&txn, cart.id).await?;
                txn.commit().await?;
                return Ok((CartWithItems { cart, items }, false));
            }
        };

        cart_item::Entity::delete_by_id(item.id).exec(&txn).await?;

        match self.refresh_totals(&txn, &cart).await? {
            Some(result) => {
                txn.commit().await?;
                Ok((result, true))
            }
            None => {
                txn.rollback().await?;
                Err(ServiceError::ConcurrentModification(cart.id))
            }
        }
    }

    async fn try_apply_coupon(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError("Coupon is invalid or has expired".to_string())
            })?;

        let cart = self.find_cart(&*self.db, user_id).await?;
        if cart.coupon_applied {
            return Err(ServiceError::Conflict(
                "A coupon has already been applied to this cart".to_string(),
            ));
        }

        let items = self.load_items(&*self.db, cart.id).await?;
        let totals = pricing::compute_totals(&line_amounts(&items), Some(coupon.discount_percent));

        // One conditional write carries both guards: the version check and
        // the never-reapply check.
        let now = Utc::now();
        let updated = cart::Entity::update_many()
            .col_expr(cart::Column::CouponApplied, Expr::value(true))
            .col_expr(cart::Column::CouponId, Expr::value(Some(coupon.id)))
            .col_expr(cart::Column::TotalPrice, Expr::value(totals.total_price))
            .col_expr(
                cart::Column::TotalPriceAfterDiscount,
                Expr::value(totals.total_price_after_discount),
            )
            .col_expr(cart::Column::Version, Expr::value(cart.version + 1))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Version.eq(cart.version))
            .filter(cart::Column::CouponApplied.eq(false))
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            // Re-read to tell a lost coupon race apart from an ordinary
            // version conflict.
            let current = cart::Entity::find_by_id(cart.id).one(&*self.db).await?;
            return match current {
                Some(c) if c.coupon_applied => Err(ServiceError::Conflict(
                    "A coupon has already been applied to this cart".to_string(),
                )),
                _ => Err(ServiceError::ConcurrentModification(cart.id)),
            };
        }

        let mut refreshed = cart;
        refreshed.coupon_applied = true;
        refreshed.coupon_id = Some(coupon.id);
        refreshed.total_price = totals.total_price;
        refreshed.total_price_after_discount = totals.total_price_after_discount;
        refreshed.version += 1;
        refreshed.updated_at = now;

        info!(cart_id = %refreshed.id, coupon_code = %code, "applied coupon");
        Ok(CartWithItems {
            cart: refreshed,
            items,
        })
    }

    /// Recomputes totals from the cart's current lines and writes them back
    /// under the version observed on `cart`. Returns `None` when the guard
    /// misses because another writer bumped the version first.
    async fn refresh_totals(
        &self,
        conn: &impl ConnectionTrait,
        cart: &cart::Model,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        let items = self.load_items(conn, cart.id).await?;
        let coupon_percent = self.coupon_percent(conn, cart).await?;
        let totals = pricing::compute_totals(&line_amounts(&items), coupon_percent);

        let now = Utc::now();
        let updated = cart::Entity::update_many()
            .col_expr(cart::Column::TotalPrice, Expr::value(totals.total_price))
            .col_expr(
                cart::Column::TotalPriceAfterDiscount,
                Expr::value(totals.total_price_after_discount),
            )
            .col_expr(cart::Column::Version, Expr::value(cart.version + 1))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Version.eq(cart.version))
            .exec(conn)
            .await?;

        if updated.rows_affected == 0 {
            return Ok(None);
        }

        let mut refreshed = cart.clone();
        refreshed.total_price = totals.total_price;
        refreshed.total_price_after_discount = totals.total_price_after_discount;
        refreshed.version = cart.version + 1;
        refreshed.updated_at = now;

        Ok(Some(CartWithItems {
            cart: refreshed,
            items,
        }))
    }

    async fn find_cart(
        &self,
        conn: &impl ConnectionTrait,
        user_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("There is no cart for this user".to_string()))
    }

    async fn load_items(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    async fn coupon_percent(
        &self,
        conn: &impl ConnectionTrait,
        cart: &cart::Model,
    ) -> Result<Option<Decimal>, ServiceError> {
        let coupon_id = match cart.coupon_id {
            Some(id) if cart.coupon_applied => id,
            _ => return Ok(None),
        };
        let coupon = coupon::Entity::find_by_id(coupon_id).one(conn).await?;
        Ok(coupon.map(|c| c.discount_percent))
    }
}

fn line_amounts(items: &[cart_item::Model]) -> Vec<LineAmounts> {
    items
        .iter()
        .map(|item| LineAmounts {
            line_price: item.line_price,
            line_price_after_discount: item.line_price_after_discount,
        })
        .collect()
}
