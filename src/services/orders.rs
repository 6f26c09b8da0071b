use crate::{
    entities::{order, order_item},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Read and admin-maintenance operations over materialized orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

/// An order with its line snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Admin patch. Only these three fields are mutable after materialization;
/// anything else in the body is ignored by the handler's deserialization.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_method_type: Option<String>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetch one order. Non-admin viewers are scoped to their own orders and
    /// get a not-found for anything else, never a forbidden.
    #[instrument(skip(self), fields(%viewer_id, %order_id))]
    pub async fn get_order(
        &self,
        viewer_id: Uuid,
        is_admin: bool,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let mut query = order::Entity::find_by_id(order_id);
        if !is_admin {
            query = query.filter(order::Column::UserId.eq(viewer_id));
        }

        let order = match query.one(&*self.db).await? {
            Some(order) => order,
            None if is_admin => {
                return Err(ServiceError::NotFound(
                    "There is no order with this id".to_string(),
                ))
            }
            None => {
                return Err(ServiceError::NotFound(
                    "You don't have an order with this id".to_string(),
                ))
            }
        };

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// List orders newest-first, scoped to the viewer unless they are admin.
    #[instrument(skip(self), fields(%viewer_id))]
    pub async fn list_orders(
        &self,
        viewer_id: Uuid,
        is_admin: bool,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let page = page.max(1);

        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if !is_admin {
            query = query.filter(order::Column::UserId.eq(viewer_id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        // One query for the whole page's lines, grouped in memory.
        let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
        let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if !order_ids.is_empty() {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.is_in(order_ids))
                .order_by_asc(order_item::Column::CreatedAt)
                .all(&*self.db)
                .await?;
            for item in items {
                grouped.entry(item.order_id).or_default().push(item);
            }
        }

        let orders = orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect();

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Admin-only restricted-field update. Does not touch pricing, lines,
    /// or the shipping snapshot.
    #[instrument(skip(self, request), fields(%order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("There is no order with this id".to_string())
            })?;

        let mut active: order::ActiveModel = order.into();
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(payment_status) = request.payment_status {
            active.payment_status = Set(payment_status);
        }
        if let Some(payment_method_type) = request.payment_method_type {
            active.payment_method_type = Set(payment_method_type);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!("order updated");
        Ok(updated)
    }

    /// Admin-only hard delete of an order and its lines.
    #[instrument(skip(self), fields(%order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id).one(&txn).await?;
        if order.is_none() {
            return Err(ServiceError::NotFound(
                "There is no order with this id".to_string(),
            ));
        }

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&txn).await?;

        txn.commit().await?;
        info!("order deleted");
        Ok(())
    }
}
