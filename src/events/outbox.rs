use crate::{
    entities::fulfillment_job::{self, FulfillmentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::ShippingMetadata,
    services::fulfillment::{FulfillmentService, MaterializeOutcome},
};
use chrono::{Duration, Utc};
use rand::Rng;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: i64 = 2;
const BATCH_SIZE: u64 = 20;

/// Persist a fulfillment job keyed by the gateway event id. The unique
/// constraint makes redelivered events no-ops; returns whether a new job
/// was actually enqueued.
pub async fn enqueue<C: ConnectionTrait>(
    db: &C,
    event_id: &str,
    cart_id: Uuid,
    buyer_email: &str,
    amount_total_minor: i64,
    shipping: serde_json::Value,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let job = fulfillment_job::ActiveModel {
        id: Set(Uuid::new_v4()),
        event_id: Set(event_id.to_string()),
        cart_id: Set(cart_id),
        buyer_email: Set(buyer_email.to_string()),
        amount_total_minor: Set(amount_total_minor),
        shipping: Set(shipping),
        status: Set(FulfillmentStatus::Pending),
        attempts: Set(0),
        next_attempt_at: Set(now),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let inserted = fulfillment_job::Entity::insert(job)
        .on_conflict(
            OnConflict::column(fulfillment_job::Column::EventId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(inserted > 0)
}

/// Spawn the background worker that drains due jobs on an interval.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    fulfillment: Arc<FulfillmentService>,
    events: Arc<EventSender>,
    poll_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("fulfillment worker started");
        loop {
            if let Err(e) = drain_due(&db, &fulfillment, &events).await {
                error!("fulfillment worker pass failed: {}", e);
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}

/// Process every job whose next attempt is due. Each job is claimed with a
/// conditional status flip so concurrent workers never run the same job.
pub async fn drain_due(
    db: &DatabaseConnection,
    fulfillment: &FulfillmentService,
    events: &EventSender,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let due = fulfillment_job::Entity::find()
        .filter(fulfillment_job::Column::Status.eq(FulfillmentStatus::Pending))
        .filter(fulfillment_job::Column::NextAttemptAt.lte(now))
        .order_by_asc(fulfillment_job::Column::CreatedAt)
        .limit(BATCH_SIZE)
        .all(db)
        .await?;

    for job in due {
        let claimed = fulfillment_job::Entity::update_many()
            .col_expr(
                fulfillment_job::Column::Status,
                Expr::value(FulfillmentStatus::Processing),
            )
            .col_expr(
                fulfillment_job::Column::Attempts,
                Expr::col(fulfillment_job::Column::Attempts).add(1),
            )
            .col_expr(fulfillment_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(fulfillment_job::Column::Id.eq(job.id))
            .filter(fulfillment_job::Column::Status.eq(FulfillmentStatus::Pending))
            .exec(db)
            .await?;
        if claimed.rows_affected == 0 {
            continue;
        }

        run_job(db, fulfillment, events, job).await?;
    }

    Ok(())
}

#[instrument(skip(db, fulfillment, events, job), fields(job_id = %job.id, event_id = %job.event_id))]
async fn run_job(
    db: &DatabaseConnection,
    fulfillment: &FulfillmentService,
    events: &EventSender,
    job: fulfillment_job::Model,
) -> Result<(), ServiceError> {
    let shipping: ShippingMetadata = match serde_json::from_value(job.shipping.clone()) {
        Ok(shipping) => shipping,
        Err(e) => {
            // Undecodable metadata never improves on retry.
            return park_failed(db, &job, &format!("invalid shipping metadata: {}", e), events)
                .await;
        }
    };

    match fulfillment
        .materialize(
            job.cart_id,
            &job.buyer_email,
            job.amount_total_minor,
            &shipping,
        )
        .await
    {
        Ok(MaterializeOutcome::Created(order_id)) => {
            mark_applied(db, &job).await?;
            events.send_or_log(Event::OrderCreated(order_id)).await;
            Ok(())
        }
        Ok(MaterializeOutcome::AlreadyApplied) => {
            info!("job referenced an already-retired cart");
            mark_applied(db, &job).await
        }
        Err(e) => {
            let attempts = job.attempts + 1;
            if attempts >= MAX_ATTEMPTS {
                park_failed(db, &job, &e.to_string(), events).await
            } else {
                let delay = backoff_delay(attempts);
                warn!(
                    attempts,
                    retry_in_secs = delay.num_seconds(),
                    "fulfillment attempt failed: {}",
                    e
                );
                let mut active: fulfillment_job::ActiveModel = job.into();
                active.status = Set(FulfillmentStatus::Pending);
                active.next_attempt_at = Set(Utc::now() + delay);
                active.last_error = Set(Some(e.to_string()));
                active.updated_at = Set(Utc::now());
                active.update(db).await?;
                Ok(())
            }
        }
    }
}

async fn mark_applied(
    db: &DatabaseConnection,
    job: &fulfillment_job::Model,
) -> Result<(), ServiceError> {
    let mut active: fulfillment_job::ActiveModel = job.clone().into();
    active.status = Set(FulfillmentStatus::Applied);
    active.last_error = Set(None);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}

async fn park_failed(
    db: &DatabaseConnection,
    job: &fulfillment_job::Model,
    reason: &str,
    events: &EventSender,
) -> Result<(), ServiceError> {
    error!("fulfillment job parked after repeated failures: {}", reason);
    let mut active: fulfillment_job::ActiveModel = job.clone().into();
    active.status = Set(FulfillmentStatus::Failed);
    active.last_error = Set(Some(reason.to_string()));
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    events
        .send_or_log(Event::FulfillmentFailed {
            job_id: job.id,
            cart_id: job.cart_id,
        })
        .await;
    Ok(())
}

/// Exponential backoff with millisecond jitter so a burst of failed jobs
/// does not retry in lockstep.
fn backoff_delay(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 10) as u32;
    let secs = BASE_BACKOFF_SECS.saturating_mul(2_i64.saturating_pow(exp));
    let jitter_ms = rand::thread_rng().gen_range(0..1_000);
    Duration::seconds(secs) + Duration::milliseconds(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let first = backoff_delay(1);
        let fifth = backoff_delay(5);
        assert!(first.num_seconds() >= 4);
        assert!(first.num_seconds() < 6);
        assert!(fifth.num_seconds() >= 64);
        assert!(fifth.num_seconds() < 66);
    }

    #[test]
    fn backoff_is_capped_for_runaway_attempt_counts() {
        let capped = backoff_delay(40);
        assert!(capped.num_seconds() <= BASE_BACKOFF_SECS * 1024 + 1);
    }
}
