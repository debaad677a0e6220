//! Reservation ledger: which tables are held by which orders, and when.
//!
//! Windows are half-open, `[start, end)`, so a booking that ends at 11:00
//! does not collide with one that starts at 11:00. Reservations of orders in
//! a terminal state never block.
//!
//! Writers must call [`book_tables`] (or [`lock_tables`] followed by
//! [`check_unavailable`] and [`reserve`]) inside the transaction that commits
//! the booking. Locking the table rows serialises competing bookings of the
//! same table; the `reservations_no_overlap` exclusion constraint rejects
//! anything that slips through.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, Queryable,
    SelectableHelper,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    models::{CreateReservationEntity, DiningTableEntity, ReservationEntity},
    schema::{dining_tables, orders, reservations},
    services::order_status::OrderStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReservationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReservationWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AppError> {
        if start >= end {
            return Err(AppError::BadRequest(
                "start_time must be before end_time".into(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn from_parts(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, AppError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            _ => Err(AppError::BadRequest(
                "start_time and end_time are required".into(),
            )),
        }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// An existing reservation joined with what the ledger needs to judge it.
#[derive(Debug, Clone, Queryable)]
pub struct BookedSlot {
    pub reservation_id: i32,
    pub table_id: i32,
    pub table_number: i32,
    pub order_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub order_status: OrderStatus,
}

/// Tables among `booked` that are held during `window` by someone other than
/// `exclude_order`.
pub fn unavailable_tables(
    booked: &[BookedSlot],
    window: &ReservationWindow,
    exclude_order: Option<i32>,
) -> BTreeSet<i32> {
    booked
        .iter()
        .filter(|slot| Some(slot.order_id) != exclude_order)
        .filter(|slot| !slot.order_status.is_terminal())
        .filter(|slot| window.overlaps(slot.start_time, slot.end_time))
        .map(|slot| slot.table_id)
        .collect()
}

/// End time a reservation gets when its table is released at `now`.
/// Never extends the booking and never ends before it starts.
pub fn released_end(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(start).min(end)
}

async fn booked_slots(
    conn: &mut AsyncPgConnection,
    window: &ReservationWindow,
    table_ids: Option<&[i32]>,
) -> Result<Vec<BookedSlot>, AppError> {
    let mut query = reservations::table
        .inner_join(orders::table)
        .inner_join(dining_tables::table)
        .filter(reservations::active.eq(true))
        .filter(reservations::start_time.lt(window.end))
        .filter(reservations::end_time.gt(window.start))
        .filter(
            orders::status
                .ne(OrderStatus::Completed)
                .and(orders::status.ne(OrderStatus::Canceled)),
        )
        .select((
            reservations::id,
            reservations::table_id,
            dining_tables::number,
            reservations::order_id,
            reservations::start_time,
            reservations::end_time,
            orders::status,
        ))
        .into_boxed();

    if let Some(ids) = table_ids {
        query = query.filter(reservations::table_id.eq_any(ids.to_vec()));
    }

    Ok(query.load::<BookedSlot>(conn).await?)
}

/// Locks the live rows of `table_ids` for the rest of the transaction.
/// Fails without locking anything useful if any id is unknown.
pub async fn lock_tables(
    conn: &mut AsyncPgConnection,
    table_ids: &[i32],
) -> Result<Vec<DiningTableEntity>, AppError> {
    let wanted: BTreeSet<i32> = table_ids.iter().copied().collect();

    let tables: Vec<DiningTableEntity> = dining_tables::table
        .filter(dining_tables::id.eq_any(wanted.iter().copied().collect::<Vec<_>>()))
        .filter(dining_tables::deleted_at.is_null())
        .order_by(dining_tables::id.asc())
        .select(DiningTableEntity::as_select())
        .for_update()
        .get_results(conn)
        .await?;

    if tables.len() != wanted.len() {
        let found: BTreeSet<i32> = tables.iter().map(|table| table.id).collect();
        let missing: Vec<i32> = wanted.difference(&found).copied().collect();
        return Err(AppError::NotFound(format!("Unknown tables: {missing:?}")));
    }

    Ok(tables)
}

/// Ids of `table_ids` that cannot be booked for `window`.
pub async fn check_unavailable(
    conn: &mut AsyncPgConnection,
    window: &ReservationWindow,
    table_ids: &[i32],
    exclude_order: Option<i32>,
) -> Result<BTreeSet<i32>, AppError> {
    if table_ids.is_empty() {
        return Err(AppError::BadRequest("At least one table is required".into()));
    }

    let booked = booked_slots(conn, window, Some(table_ids)).await?;
    Ok(unavailable_tables(&booked, window, exclude_order))
}

/// Every live table that is free for the whole of `window`.
pub async fn get_available(
    conn: &mut AsyncPgConnection,
    window: &ReservationWindow,
) -> Result<Vec<DiningTableEntity>, AppError> {
    let booked = booked_slots(conn, window, None).await?;
    let taken = unavailable_tables(&booked, window, None);

    let tables: Vec<DiningTableEntity> = dining_tables::table
        .filter(dining_tables::deleted_at.is_null())
        .order_by(dining_tables::number.asc())
        .select(DiningTableEntity::as_select())
        .get_results(conn)
        .await?;

    Ok(tables
        .into_iter()
        .filter(|table| !taken.contains(&table.id))
        .collect())
}

/// Writes the given reservations. Every referenced table must exist, or
/// nothing is written.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    entries: Vec<CreateReservationEntity>,
) -> Result<Vec<ReservationEntity>, AppError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let table_ids: Vec<i32> = entries.iter().map(|entry| entry.table_id).collect();
    lock_tables(conn, &table_ids).await?;
    insert_reservations(conn, &entries).await
}

async fn insert_reservations(
    conn: &mut AsyncPgConnection,
    entries: &[CreateReservationEntity],
) -> Result<Vec<ReservationEntity>, AppError> {
    Ok(diesel::insert_into(reservations::table)
        .values(entries)
        .returning(ReservationEntity::as_returning())
        .get_results(conn)
        .await?)
}

/// Locks, checks and reserves `table_ids` for `order_id` over `window`.
/// On conflict nothing is written and the error lists the table numbers.
pub async fn book_tables(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    window: &ReservationWindow,
    table_ids: &[i32],
) -> Result<Vec<ReservationEntity>, AppError> {
    let tables = lock_tables(conn, table_ids).await?;

    let unavailable = check_unavailable(conn, window, table_ids, Some(order_id)).await?;
    if !unavailable.is_empty() {
        let numbers: HashMap<i32, i32> = tables.iter().map(|table| (table.id, table.number)).collect();
        let mut taken: Vec<i32> = unavailable
            .iter()
            .filter_map(|id| numbers.get(id).copied())
            .collect();
        taken.sort_unstable();
        return Err(AppError::TablesUnavailable(taken));
    }

    let entries: Vec<CreateReservationEntity> = tables
        .iter()
        .map(|table| CreateReservationEntity {
            order_id,
            table_id: table.id,
            start_time: window.start,
            end_time: window.end,
        })
        .collect();

    insert_reservations(conn, &entries).await
}

/// Ends the reservation at `now`. Releasing twice leaves the first release intact.
pub async fn release(
    conn: &mut AsyncPgConnection,
    reservation_id: i32,
    table_id: i32,
    now: DateTime<Utc>,
) -> Result<ReservationEntity, AppError> {
    let reservation: ReservationEntity = reservations::table
        .find(reservation_id)
        .filter(reservations::table_id.eq(table_id))
        .select(ReservationEntity::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Reservation #{reservation_id} on table #{table_id} not found"
            ))
        })?;

    if reservation.released_at.is_some() {
        return Ok(reservation);
    }

    let end_time = released_end(reservation.start_time, reservation.end_time, now);
    let released = diesel::update(reservations::table.find(reservation_id))
        .set((
            reservations::end_time.eq(end_time),
            reservations::released_at.eq(now),
        ))
        .returning(ReservationEntity::as_returning())
        .get_result(conn)
        .await?;

    Ok(released)
}

pub async fn for_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<Vec<ReservationEntity>, AppError> {
    Ok(reservations::table
        .filter(reservations::order_id.eq(order_id))
        .order_by(reservations::id.asc())
        .select(ReservationEntity::as_select())
        .get_results(conn)
        .await?)
}

/// Drops every reservation of the order, freeing its tables entirely.
pub async fn delete_for_order(conn: &mut AsyncPgConnection, order_id: i32) -> Result<usize, AppError> {
    Ok(
        diesel::delete(reservations::table.filter(reservations::order_id.eq(order_id)))
            .execute(conn)
            .await?,
    )
}

/// Keeps the history of a finished order's bookings without letting them block.
pub async fn deactivate_for_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<usize, AppError> {
    Ok(diesel::update(
        reservations::table
            .filter(reservations::order_id.eq(order_id))
            .filter(reservations::active.eq(true)),
    )
    .set(reservations::active.eq(false))
    .execute(conn)
    .await?)
}

/// Whether an open order holds `table_id` now or in the future.
pub async fn table_in_use(
    conn: &mut AsyncPgConnection,
    table_id: i32,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let held: i64 = reservations::table
        .inner_join(orders::table)
        .filter(reservations::table_id.eq(table_id))
        .filter(reservations::active.eq(true))
        .filter(reservations::end_time.gt(now))
        .filter(
            orders::status
                .eq(OrderStatus::Pending)
                .or(orders::status.eq(OrderStatus::Confirmed)),
        )
        .count()
        .get_result(conn)
        .await?;

    Ok(held > 0)
}

/// The order currently sitting at table `number`: its reservation covers
/// `now` and the order is still open.
pub async fn live_order_at_table(
    conn: &mut AsyncPgConnection,
    number: i32,
    now: DateTime<Utc>,
) -> Result<i32, AppError> {
    let order_id: Option<i32> = reservations::table
        .inner_join(dining_tables::table)
        .inner_join(orders::table)
        .filter(dining_tables::number.eq(number))
        .filter(dining_tables::deleted_at.is_null())
        .filter(reservations::active.eq(true))
        .filter(reservations::start_time.le(now))
        .filter(reservations::end_time.gt(now))
        .filter(
            orders::status
                .eq(OrderStatus::Pending)
                .or(orders::status.eq(OrderStatus::Confirmed)),
        )
        .order_by(reservations::start_time.desc())
        .select(reservations::order_id)
        .first(conn)
        .await
        .optional()?;

    order_id.ok_or_else(|| AppError::NotFound(format!("Table {number} is not actively reserved")))
}
