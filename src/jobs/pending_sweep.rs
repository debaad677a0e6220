//! Cancels pending orders whose reservation started a while ago and was never
//! confirmed, so the tables go back to the pool.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};

use crate::{
    config::SweepConfig,
    db::DbPool,
    notifications::{ADMIN_ROOM, Broadcaster},
    schema::{orders, reservations},
    services::order_status::{OrderEvent, OrderStatus},
};

/// Cancels at most `batch_size` abandoned orders in one transaction and
/// returns their ids. Rows locked by a concurrent request are skipped.
pub async fn sweep_once(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    grace: chrono::Duration,
    batch_size: i64,
) -> Result<Vec<i32>> {
    let cutoff = now - grace;
    let canceled = OrderStatus::Pending.transition(OrderEvent::Cancel)?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let abandoned: Vec<i32> = orders::table
                .filter(orders::status.eq(OrderStatus::Pending))
                .filter(
                    orders::id.eq_any(
                        reservations::table
                            .filter(reservations::active.eq(true))
                            .filter(reservations::start_time.lt(cutoff))
                            .select(reservations::order_id),
                    ),
                )
                .order_by(orders::id.asc())
                .limit(batch_size)
                .select(orders::id)
                .for_update()
                .skip_locked()
                .get_results(conn)
                .await
                .context("Failed to select abandoned orders")?;

            if abandoned.is_empty() {
                return Ok(abandoned);
            }

            diesel::update(orders::table.filter(orders::id.eq_any(&abandoned)))
                .set((
                    orders::status.eq(canceled),
                    orders::updated_at.eq(now),
                ))
                .execute(conn)
                .await
                .context("Failed to cancel abandoned orders")?;

            diesel::update(reservations::table.filter(reservations::order_id.eq_any(&abandoned)))
                .set(reservations::active.eq(false))
                .execute(conn)
                .await
                .context("Failed to deactivate reservations")?;

            Ok::<Vec<i32>, anyhow::Error>(abandoned)
        })
    })
    .await
}

/// Runs until the task is aborted. A failed round is logged and retried on
/// the next tick.
pub async fn run(pool: DbPool, config: SweepConfig, broadcaster: Broadcaster) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_secs = config.interval.as_secs(),
        grace_minutes = config.pending_grace.num_minutes(),
        "Pending reservation sweep started"
    );

    loop {
        ticker.tick().await;
        match sweep_round(&pool, &config, &broadcaster).await {
            Ok(0) => {}
            Ok(count) => info!("Sweep canceled {} abandoned orders", count),
            Err(err) => warn!("Pending reservation sweep failed: {:#}", err),
        }
    }
}

async fn sweep_round(pool: &DbPool, config: &SweepConfig, broadcaster: &Broadcaster) -> Result<usize> {
    let conn = &mut pool.get().await.context("Failed to obtain a DB connection")?;
    let now = Utc::now();
    let mut total = 0;

    loop {
        let canceled = sweep_once(conn, now, config.pending_grace, config.batch_size).await?;
        for order_id in &canceled {
            broadcaster.broadcast(
                ADMIN_ROOM,
                "order_status_changed",
                serde_json::json!({ "order_id": order_id, "status": OrderStatus::Canceled }),
            );
        }
        total += canceled.len();

        if canceled.is_empty() || (canceled.len() as i64) < config.batch_size {
            return Ok(total);
        }
    }
}
