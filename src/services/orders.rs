//! Order composition: every operation that writes an order together with its
//! lines and table reservations runs as one transaction. A failure at any
//! step rolls everything back, so callers never observe a half-built order.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    prelude::AsChangeset,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    auth::Actor,
    catalog,
    models::{
        CanceledOrderLineEntity, CreateCanceledOrderLineEntity, CreateOrderEntity,
        CreateOrderLineEntity, OrderEntity, OrderLineEntity, ReservationEntity,
    },
    schema::{canceled_order_lines, order_lines, orders, reservations},
    services::{
        order_lines::{LineDraft, LineInput, merge_lines, plan_split, subtotal, validate_lines},
        order_status::{OrderEvent, OrderStatus, OrderType},
        reservations::{self as ledger, ReservationWindow},
        vouchers,
    },
};

/// An order with everything it owns, priced against the current menu.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OrderDetails {
    pub order: OrderEntity,
    pub lines: Vec<OrderLineEntity>,
    pub reservations: Vec<ReservationEntity>,
    pub subtotal: f64,
    pub total: f64,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CreateOrderReq {
    pub order_type: OrderType,
    /// Staff may place an order for a customer. Defaults to the caller.
    pub customer_id: Option<i32>,
    /// `pending` (default) or `confirmed`; the latter is staff-only.
    pub status: Option<OrderStatus>,
    pub party_size: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tables: Vec<i32>,
    #[serde(default)]
    pub items: Vec<LineInput>,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct UpdateOrderReq {
    pub status: Option<OrderStatus>,
    pub party_size: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Replaces the table set. An empty list frees every table.
    pub tables: Option<Vec<i32>>,
    /// Replaces every line.
    pub items: Option<Vec<LineInput>>,
}

impl UpdateOrderReq {
    fn edits_order(&self) -> bool {
        self.party_size.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.tables.is_some()
            || self.items.is_some()
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = orders)]
struct OrderChanges {
    status: Option<OrderStatus>,
    staff_id: Option<Option<i32>>,
    party_size: Option<Option<i32>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// How a request points at an existing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRef {
    /// The order currently seated at this table number.
    Table(i32),
    Id(i32),
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SplitOrderReq {
    pub table_number: Option<i32>,
    pub order_id: Option<i32>,
    pub items: Vec<LineInput>,
}

impl SplitOrderReq {
    pub fn source(&self) -> Result<OrderRef, AppError> {
        match (self.table_number, self.order_id) {
            (Some(number), None) => Ok(OrderRef::Table(number)),
            (None, Some(id)) => Ok(OrderRef::Id(id)),
            _ => Err(AppError::BadRequest(
                "Provide either table_number or order_id".into(),
            )),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SplitOutcome {
    pub source: OrderDetails,
    pub created: OrderDetails,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct MergeOrderReq {
    pub source_table: Option<i32>,
    pub target_table: Option<i32>,
    pub source_order_id: Option<i32>,
    pub target_order_id: Option<i32>,
}

/// The source order is folded into the target order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeAddressing {
    pub source: OrderRef,
    pub target: OrderRef,
}

impl TryFrom<&MergeOrderReq> for MergeAddressing {
    type Error = AppError;

    fn try_from(req: &MergeOrderReq) -> Result<Self, Self::Error> {
        let by_table = req.source_table.is_some() || req.target_table.is_some();
        let by_id = req.source_order_id.is_some() || req.target_order_id.is_some();

        let (source, target) = match (by_table, by_id) {
            (true, true) => {
                return Err(AppError::BadRequest(
                    "Address orders either by table numbers or by order ids, not both".into(),
                ));
            }
            (true, false) => match (req.source_table, req.target_table) {
                (Some(source), Some(target)) => (OrderRef::Table(source), OrderRef::Table(target)),
                _ => {
                    return Err(AppError::BadRequest(
                        "Both source_table and target_table are required".into(),
                    ));
                }
            },
            (false, true) => match (req.source_order_id, req.target_order_id) {
                (Some(source), Some(target)) => (OrderRef::Id(source), OrderRef::Id(target)),
                _ => {
                    return Err(AppError::BadRequest(
                        "Both source_order_id and target_order_id are required".into(),
                    ));
                }
            },
            (false, false) => {
                return Err(AppError::BadRequest(
                    "Provide the orders to merge by table numbers or by order ids".into(),
                ));
            }
        };

        if source == target {
            return Err(AppError::BadRequest("Cannot merge an order into itself".into()));
        }

        Ok(MergeAddressing { source, target })
    }
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CancelLineReq {
    pub reason: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct UpdateCanceledLineReq {
    pub reason: Option<String>,
    pub note: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = canceled_order_lines)]
struct CanceledLineChanges {
    reason: Option<String>,
    note: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RateOrderReq {
    pub star: i32,
    pub comment: Option<String>,
}

fn ensure_owner_or_admin(actor: &Actor, order: &OrderEntity) -> Result<(), AppError> {
    if actor.is_admin() || order.customer_id == actor.id {
        Ok(())
    } else {
        Err(AppError::ForbiddenResource(
            "Only the customer who placed the order or an admin may change it".into(),
        ))
    }
}

fn ensure_owner_or_staff(actor: &Actor, order: &OrderEntity) -> Result<(), AppError> {
    if actor.is_staff() || order.customer_id == actor.id {
        Ok(())
    } else {
        Err(AppError::ForbiddenResource("This order belongs to another customer".into()))
    }
}

/// Customers may cancel their own orders; confirming and completing belong to staff.
fn ensure_may_apply(actor: &Actor, event: OrderEvent) -> Result<(), AppError> {
    match event {
        OrderEvent::Cancel => Ok(()),
        OrderEvent::Confirm | OrderEvent::Complete => actor.require_staff(),
    }
}

fn ensure_open(order: &OrderEntity) -> Result<(), AppError> {
    if order.status.is_open() {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "Order #{} is {} and can no longer be changed",
            order.id, order.status
        )))
    }
}

fn item_ids(lines: &[LineInput]) -> Vec<i32> {
    lines
        .iter()
        .map(|line| line.item_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn check_order_shape(
    order_type: OrderType,
    party_size: Option<i32>,
    tables: &[i32],
) -> Result<(), AppError> {
    match order_type {
        OrderType::Reservation => {
            if tables.is_empty() {
                return Err(AppError::BadRequest(
                    "A reservation needs at least one table".into(),
                ));
            }
            match party_size {
                Some(size) if size > 0 => Ok(()),
                Some(_) => Err(AppError::BadRequest("party_size must be positive".into())),
                None => Err(AppError::BadRequest(
                    "party_size is required for reservations".into(),
                )),
            }
        }
        OrderType::Ship => {
            if !tables.is_empty() {
                return Err(AppError::BadRequest("Takeaway orders cannot reserve tables".into()));
            }
            if party_size.is_some() {
                return Err(AppError::BadRequest(
                    "party_size only applies to reservations".into(),
                ));
            }
            Ok(())
        }
    }
}

pub async fn lock_order(conn: &mut AsyncPgConnection, order_id: i32) -> Result<OrderEntity, AppError> {
    orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))
}

async fn lines_of(conn: &mut AsyncPgConnection, order_id: i32) -> Result<Vec<OrderLineEntity>, AppError> {
    Ok(order_lines::table
        .filter(order_lines::order_id.eq(order_id))
        .order_by(order_lines::id.asc())
        .select(OrderLineEntity::as_select())
        .get_results(conn)
        .await?)
}

async fn replace_lines(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    lines: Vec<LineDraft>,
) -> Result<(), AppError> {
    diesel::delete(order_lines::table.filter(order_lines::order_id.eq(order_id)))
        .execute(conn)
        .await?;
    insert_lines(conn, order_id, lines).await
}

async fn insert_lines(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    lines: Vec<LineDraft>,
) -> Result<(), AppError> {
    if lines.is_empty() {
        return Ok(());
    }

    let rows: Vec<CreateOrderLineEntity> = lines
        .into_iter()
        .map(|line| line.into_entity(order_id))
        .collect();

    diesel::insert_into(order_lines::table)
        .values(&rows)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn load_details(
    conn: &mut AsyncPgConnection,
    order: OrderEntity,
) -> Result<OrderDetails, AppError> {
    let lines = lines_of(conn, order.id).await?;
    let reservations = ledger::for_order(conn, order.id).await?;

    let ids: Vec<i32> = lines
        .iter()
        .map(|line| line.item_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let catalog = catalog::load_items(conn, &ids).await?;
    let drafts: Vec<LineDraft> = lines.iter().map(LineDraft::from).collect();
    let subtotal = subtotal(&drafts, &catalog);
    let total = (subtotal - order.discount).max(0.0);

    Ok(OrderDetails {
        order,
        lines,
        reservations,
        subtotal,
        total,
    })
}

pub async fn get_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
) -> Result<OrderDetails, AppError> {
    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))?;

    ensure_owner_or_staff(&actor, &order)?;
    load_details(conn, order).await
}

pub async fn list_orders(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    status: Option<OrderStatus>,
) -> Result<Vec<OrderEntity>, AppError> {
    let mut query = orders::table
        .order_by(orders::updated_at.desc())
        .select(OrderEntity::as_select())
        .into_boxed();

    if !actor.is_staff() {
        query = query.filter(orders::customer_id.eq(actor.id));
    }
    if let Some(status) = status {
        query = query.filter(orders::status.eq(status));
    }

    Ok(query.get_results(conn).await?)
}

pub async fn create_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    req: CreateOrderReq,
) -> Result<OrderDetails, AppError> {
    let window = ReservationWindow::from_parts(req.start_time, req.end_time)?;
    check_order_shape(req.order_type, req.party_size, &req.tables)?;

    let customer_id = match req.customer_id {
        Some(customer_id) if customer_id != actor.id => {
            actor.require_staff()?;
            customer_id
        }
        _ => actor.id,
    };

    let (status, staff_id) = match req.status.unwrap_or(OrderStatus::Pending) {
        OrderStatus::Pending => (OrderStatus::Pending, None),
        OrderStatus::Confirmed => {
            actor.require_staff()?;
            (OrderStatus::Confirmed, Some(actor.id))
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "A new order cannot start as {other}"
            )));
        }
    };

    let ids = item_ids(&req.items);

    conn.transaction(move |conn| {
        Box::pin(async move {
            let catalog = catalog::load_items(conn, &ids).await?;
            validate_lines(&req.items, &catalog)?;

            let order: OrderEntity = diesel::insert_into(orders::table)
                .values(CreateOrderEntity {
                    customer_id,
                    staff_id,
                    order_type: req.order_type,
                    status,
                    party_size: req.party_size,
                    start_time: window.start,
                    end_time: window.end,
                })
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;

            if req.order_type == OrderType::Reservation {
                ledger::book_tables(conn, order.id, &window, &req.tables).await?;
            }

            insert_lines(conn, order.id, req.items.into_iter().map(LineDraft::from).collect()).await?;

            tracing::info!(order_id = order.id, customer_id, "Order #{} created", order.id);
            let details = load_details(conn, order).await?;
            Ok::<OrderDetails, AppError>(details)
        })
    })
    .await
}

pub async fn update_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
    req: UpdateOrderReq,
) -> Result<OrderDetails, AppError> {
    let ids = req.items.as_deref().map(item_ids).unwrap_or_default();

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            ensure_owner_or_admin(&actor, &order)?;

            if req.edits_order() {
                ensure_open(&order)?;
            }

            let now = Utc::now();
            let mut changes = OrderChanges {
                updated_at: Some(now),
                ..Default::default()
            };

            let event = match req.status {
                Some(target) => order.status.event_towards(target)?,
                None => None,
            };
            if let Some(event) = event {
                ensure_may_apply(&actor, event)?;
                let next = order.status.transition(event)?;
                changes.status = Some(next);
                if event == OrderEvent::Confirm {
                    changes.staff_id = Some(Some(actor.id));
                }
            }

            if let Some(party_size) = req.party_size {
                if order.order_type != OrderType::Reservation {
                    return Err(AppError::BadRequest(
                        "party_size only applies to reservations".into(),
                    ));
                }
                if party_size < 1 {
                    return Err(AppError::BadRequest("party_size must be positive".into()));
                }
                changes.party_size = Some(Some(party_size));
            }

            match &req.tables {
                Some(tables) if tables.is_empty() => {
                    let released = ledger::delete_for_order(conn, order.id).await?;
                    tracing::info!(order_id, released, "Released every table of order #{}", order_id);
                    if req.start_time.is_some() || req.end_time.is_some() {
                        let window = ReservationWindow::new(
                            req.start_time.unwrap_or(order.start_time),
                            req.end_time.unwrap_or(order.end_time),
                        )?;
                        changes.start_time = Some(window.start);
                        changes.end_time = Some(window.end);
                    }
                }
                Some(tables) => {
                    if order.order_type != OrderType::Reservation {
                        return Err(AppError::BadRequest(
                            "Takeaway orders cannot reserve tables".into(),
                        ));
                    }
                    let window = ReservationWindow::from_parts(req.start_time, req.end_time)?;
                    ledger::delete_for_order(conn, order.id).await?;
                    ledger::book_tables(conn, order.id, &window, tables).await?;
                    changes.start_time = Some(window.start);
                    changes.end_time = Some(window.end);
                }
                None if req.start_time.is_some() || req.end_time.is_some() => {
                    let window = ReservationWindow::new(
                        req.start_time.unwrap_or(order.start_time),
                        req.end_time.unwrap_or(order.end_time),
                    )?;
                    let held: Vec<i32> = ledger::for_order(conn, order.id)
                        .await?
                        .into_iter()
                        .filter(|reservation| reservation.active)
                        .map(|reservation| reservation.table_id)
                        .collect();
                    if !held.is_empty() {
                        ledger::delete_for_order(conn, order.id).await?;
                        ledger::book_tables(conn, order.id, &window, &held).await?;
                    }
                    changes.start_time = Some(window.start);
                    changes.end_time = Some(window.end);
                }
                None => {}
            }

            let lines_changed = req.items.is_some();
            if let Some(items) = req.items {
                let catalog = catalog::load_items(conn, &ids).await?;
                validate_lines(&items, &catalog)?;
                replace_lines(conn, order.id, items.into_iter().map(LineDraft::from).collect()).await?;
            }

            if changes.status.is_some_and(OrderStatus::is_terminal) {
                ledger::deactivate_for_order(conn, order.id).await?;
            }

            let mut updated: OrderEntity = diesel::update(orders::table.find(order.id))
                .set(&changes)
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;
            if lines_changed {
                updated = vouchers::reprice(conn, updated, now).await?;
            }

            let details = load_details(conn, updated).await?;
            Ok::<OrderDetails, AppError>(details)
        })
    })
    .await
}

/// Applies one lifecycle event. Confirm and complete are staff actions;
/// customers may cancel their own orders.
pub async fn transition_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
    event: OrderEvent,
) -> Result<OrderDetails, AppError> {
    ensure_may_apply(&actor, event)?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            ensure_owner_or_staff(&actor, &order)?;

            let next = order.status.transition(event)?;
            let changes = OrderChanges {
                status: Some(next),
                staff_id: (event == OrderEvent::Confirm).then_some(Some(actor.id)),
                updated_at: Some(Utc::now()),
                ..Default::default()
            };

            if next.is_terminal() {
                ledger::deactivate_for_order(conn, order.id).await?;
            }

            let updated: OrderEntity = diesel::update(orders::table.find(order.id))
                .set(&changes)
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;

            tracing::info!(order_id, from = %order.status, to = %next, "Order status changed");
            let details = load_details(conn, updated).await?;
            Ok::<OrderDetails, AppError>(details)
        })
    })
    .await
}

/// Takes one line off an open order and keeps a record of why.
pub async fn cancel_line(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
    line_id: i32,
    req: CancelLineReq,
) -> Result<CanceledOrderLineEntity, AppError> {
    if req.reason.trim().is_empty() {
        return Err(AppError::BadRequest("A cancel reason is required".into()));
    }

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            ensure_owner_or_staff(&actor, &order)?;
            ensure_open(&order)?;

            let line: OrderLineEntity = order_lines::table
                .find(line_id)
                .filter(order_lines::order_id.eq(order_id))
                .select(OrderLineEntity::as_select())
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Line #{line_id} is not part of order #{order_id}"))
                })?;

            let record: CanceledOrderLineEntity = diesel::insert_into(canceled_order_lines::table)
                .values(CreateCanceledOrderLineEntity {
                    order_id,
                    item_id: line.item_id,
                    quantity: line.quantity,
                    size: line.size,
                    note: line.note,
                    reason: req.reason,
                    canceled_by: actor.id,
                })
                .returning(CanceledOrderLineEntity::as_returning())
                .get_result(conn)
                .await?;

            diesel::delete(order_lines::table.find(line_id))
                .execute(conn)
                .await?;
            vouchers::reprice(conn, order, Utc::now()).await?;

            Ok::<CanceledOrderLineEntity, AppError>(record)
        })
    })
    .await
}

pub async fn canceled_lines(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
) -> Result<Vec<CanceledOrderLineEntity>, AppError> {
    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Order #{order_id} not found")))?;
    ensure_owner_or_staff(&actor, &order)?;

    Ok(canceled_order_lines::table
        .filter(canceled_order_lines::order_id.eq(order_id))
        .order_by(canceled_order_lines::canceled_at.asc())
        .select(CanceledOrderLineEntity::as_select())
        .get_results(conn)
        .await?)
}

/// Only the reason and the note of a cancel record may be edited.
pub async fn update_canceled_line(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    record_id: i32,
    req: UpdateCanceledLineReq,
) -> Result<CanceledOrderLineEntity, AppError> {
    actor.require_staff()?;
    if req.reason.is_none() && req.note.is_none() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }
    if req.reason.as_deref().is_some_and(|reason| reason.trim().is_empty()) {
        return Err(AppError::BadRequest("A cancel reason cannot be empty".into()));
    }

    diesel::update(canceled_order_lines::table.find(record_id))
        .set(CanceledLineChanges {
            reason: req.reason,
            note: req.note,
        })
        .returning(CanceledOrderLineEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Cancel record #{record_id} not found")))
}

async fn resolve(
    conn: &mut AsyncPgConnection,
    reference: OrderRef,
    now: DateTime<Utc>,
) -> Result<i32, AppError> {
    match reference {
        OrderRef::Id(id) => Ok(id),
        OrderRef::Table(number) => ledger::live_order_at_table(conn, number, now).await,
    }
}

/// Moves part of an order's quantities into a new sibling order. The tables
/// stay with the original order.
pub async fn split_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    source_ref: OrderRef,
    items: Vec<LineInput>,
    now: DateTime<Utc>,
) -> Result<SplitOutcome, AppError> {
    actor.require_staff()?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let source_id = resolve(conn, source_ref, now).await?;
            let source = lock_order(conn, source_id).await?;
            ensure_open(&source)?;

            let current: Vec<LineDraft> = lines_of(conn, source.id)
                .await?
                .iter()
                .map(LineDraft::from)
                .collect();
            let plan = plan_split(&current, &items)?;

            let created: OrderEntity = diesel::insert_into(orders::table)
                .values(CreateOrderEntity {
                    customer_id: source.customer_id,
                    staff_id: source.staff_id,
                    order_type: source.order_type,
                    status: source.status,
                    party_size: source.party_size,
                    start_time: source.start_time,
                    end_time: source.end_time,
                })
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;

            insert_lines(conn, created.id, plan.moved).await?;
            replace_lines(conn, source.id, plan.remaining).await?;

            let source: OrderEntity = diesel::update(orders::table.find(source.id))
                .set(orders::updated_at.eq(now))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;
            let source = vouchers::reprice(conn, source, now).await?;

            tracing::info!(source_id, created_id = created.id, "Order #{} split", source_id);
            let outcome = SplitOutcome {
                source: load_details(conn, source).await?,
                created: load_details(conn, created).await?,
            };
            Ok::<SplitOutcome, AppError>(outcome)
        })
    })
    .await
}

/// Folds the source order into the target: lines are combined, the source's
/// reservations and cancel records move over, and the source order is deleted.
pub async fn merge_orders(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    addressing: MergeAddressing,
    now: DateTime<Utc>,
) -> Result<OrderDetails, AppError> {
    actor.require_staff()?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let source_id = resolve(conn, addressing.source, now).await?;
            let target_id = resolve(conn, addressing.target, now).await?;
            if source_id == target_id {
                return Err(AppError::BadRequest(format!(
                    "Both tables belong to order #{source_id}"
                )));
            }

            // Lock in id order so two opposite merges cannot deadlock.
            let (first, second) = (source_id.min(target_id), source_id.max(target_id));
            let first = lock_order(conn, first).await?;
            let second = lock_order(conn, second).await?;
            let (source, target) = if first.id == source_id {
                (first, second)
            } else {
                (second, first)
            };
            ensure_open(&source)?;
            ensure_open(&target)?;

            let source_lines: Vec<LineDraft> =
                lines_of(conn, source.id).await?.iter().map(LineDraft::from).collect();
            let target_lines: Vec<LineDraft> =
                lines_of(conn, target.id).await?.iter().map(LineDraft::from).collect();

            replace_lines(conn, target.id, merge_lines(&target_lines, &source_lines)?).await?;

            let moved = diesel::update(reservations::table.filter(reservations::order_id.eq(source.id)))
                .set(reservations::order_id.eq(target.id))
                .execute(conn)
                .await?;

            diesel::update(
                canceled_order_lines::table.filter(canceled_order_lines::order_id.eq(source.id)),
            )
            .set(canceled_order_lines::order_id.eq(target.id))
            .execute(conn)
            .await?;

            diesel::delete(order_lines::table.filter(order_lines::order_id.eq(source.id)))
                .execute(conn)
                .await?;
            diesel::delete(orders::table.find(source.id))
                .execute(conn)
                .await?;

            let target: OrderEntity = diesel::update(orders::table.find(target.id))
                .set(orders::updated_at.eq(now))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;
            let target = vouchers::reprice(conn, target, now).await?;

            tracing::info!(
                source_id,
                target_id,
                reservations = moved,
                "Order #{} merged into #{}",
                source_id,
                target_id
            );
            let details = load_details(conn, target).await?;
            Ok::<OrderDetails, AppError>(details)
        })
    })
    .await
}

pub async fn rate_order(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
    req: RateOrderReq,
) -> Result<OrderEntity, AppError> {
    if !(1..=5).contains(&req.star) {
        return Err(AppError::BadRequest("star must be between 1 and 5".into()));
    }

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            if order.customer_id != actor.id {
                return Err(AppError::ForbiddenResource(
                    "Only the customer can rate an order".into(),
                ));
            }
            if order.status != OrderStatus::Completed {
                return Err(AppError::Conflict("Only completed orders can be rated".into()));
            }

            let rated: OrderEntity = diesel::update(orders::table.find(order_id))
                .set((
                    orders::star_.eq(req.star),
                    orders::comment.eq(req.comment),
                    orders::updated_at.eq(Utc::now()),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;
            Ok::<OrderEntity, AppError>(rated)
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use chrono::TimeZone;

    fn order(customer_id: i32, status: OrderStatus) -> OrderEntity {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 18, 0, 0).unwrap();
        OrderEntity {
            id: 1,
            customer_id,
            staff_id: None,
            order_type: OrderType::Reservation,
            status,
            party_size: Some(2),
            start_time: at,
            end_time: at + chrono::Duration::hours(2),
            star: None,
            comment: None,
            voucher_id: None,
            discount: 0.0,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn merge_requires_exactly_one_addressing_mode() {
        let both = MergeOrderReq {
            source_table: Some(1),
            target_table: Some(2),
            source_order_id: Some(3),
            target_order_id: Some(4),
        };
        assert!(matches!(MergeAddressing::try_from(&both), Err(AppError::BadRequest(_))));

        let mixed = MergeOrderReq {
            source_table: Some(1),
            target_order_id: Some(4),
            ..Default::default()
        };
        assert!(MergeAddressing::try_from(&mixed).is_err());

        assert!(MergeAddressing::try_from(&MergeOrderReq::default()).is_err());

        let half = MergeOrderReq {
            source_table: Some(1),
            ..Default::default()
        };
        assert!(MergeAddressing::try_from(&half).is_err());
    }

    #[test]
    fn merge_addressing_by_tables_or_ids() {
        let by_tables = MergeOrderReq {
            source_table: Some(1),
            target_table: Some(2),
            ..Default::default()
        };
        assert_eq!(
            MergeAddressing::try_from(&by_tables).unwrap(),
            MergeAddressing {
                source: OrderRef::Table(1),
                target: OrderRef::Table(2)
            }
        );

        let by_ids = MergeOrderReq {
            source_order_id: Some(8),
            target_order_id: Some(9),
            ..Default::default()
        };
        assert_eq!(MergeAddressing::try_from(&by_ids).unwrap().target, OrderRef::Id(9));

        let same = MergeOrderReq {
            source_order_id: Some(8),
            target_order_id: Some(8),
            ..Default::default()
        };
        assert!(MergeAddressing::try_from(&same).is_err());
    }

    #[test]
    fn split_source_is_a_table_or_an_order() {
        let req = |table_number, order_id| SplitOrderReq {
            table_number,
            order_id,
            items: vec![],
        };
        assert_eq!(req(Some(4), None).source().unwrap(), OrderRef::Table(4));
        assert_eq!(req(None, Some(7)).source().unwrap(), OrderRef::Id(7));
        assert!(req(Some(4), Some(7)).source().is_err());
        assert!(req(None, None).source().is_err());
    }

    #[test]
    fn reservation_shape_rules() {
        assert!(check_order_shape(OrderType::Reservation, Some(2), &[1]).is_ok());
        assert!(check_order_shape(OrderType::Reservation, Some(2), &[]).is_err());
        assert!(check_order_shape(OrderType::Reservation, None, &[1]).is_err());
        assert!(check_order_shape(OrderType::Reservation, Some(0), &[1]).is_err());
        assert!(check_order_shape(OrderType::Ship, None, &[]).is_ok());
        assert!(check_order_shape(OrderType::Ship, None, &[1]).is_err());
        assert!(check_order_shape(OrderType::Ship, Some(2), &[]).is_err());
    }

    #[test]
    fn only_owner_or_admin_may_update() {
        let placed = order(10, OrderStatus::Pending);
        let owner = Actor { id: 10, role: Role::Customer };
        let stranger = Actor { id: 11, role: Role::Customer };
        let staff = Actor { id: 12, role: Role::Staff };
        let admin = Actor { id: 13, role: Role::Admin };

        assert!(ensure_owner_or_admin(&owner, &placed).is_ok());
        assert!(ensure_owner_or_admin(&admin, &placed).is_ok());
        assert!(matches!(
            ensure_owner_or_admin(&stranger, &placed),
            Err(AppError::ForbiddenResource(_))
        ));
        assert!(ensure_owner_or_admin(&staff, &placed).is_err());
        assert!(ensure_owner_or_staff(&staff, &placed).is_ok());
    }

    #[test]
    fn customers_may_only_cancel() {
        let owner = Actor { id: 10, role: Role::Customer };
        let waiter = Actor { id: 12, role: Role::Staff };

        assert!(ensure_may_apply(&owner, OrderEvent::Cancel).is_ok());
        assert!(matches!(
            ensure_may_apply(&owner, OrderEvent::Confirm),
            Err(AppError::ForbiddenResource(_))
        ));
        assert!(ensure_may_apply(&owner, OrderEvent::Complete).is_err());
        assert!(ensure_may_apply(&waiter, OrderEvent::Confirm).is_ok());
        assert!(ensure_may_apply(&waiter, OrderEvent::Complete).is_ok());
    }

    #[test]
    fn closed_orders_cannot_be_edited() {
        assert!(ensure_open(&order(1, OrderStatus::Confirmed)).is_ok());
        assert!(matches!(
            ensure_open(&order(1, OrderStatus::Canceled)),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn item_ids_are_deduplicated() {
        let line = |item_id| LineInput {
            item_id,
            quantity: 1,
            size: None,
            note: None,
        };
        assert_eq!(item_ids(&[line(3), line(1), line(3)]), vec![1, 3]);
    }
}
