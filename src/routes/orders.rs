use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth::Actor,
    db,
    models::{CanceledOrderLineEntity, DiningTableEntity, OrderEntity},
    notifications::{ADMIN_ROOM, notify_customer},
    services::{
        order_status::{OrderEvent, OrderStatus},
        orders::{
            self, CancelLineReq, CreateOrderReq, MergeAddressing, MergeOrderReq, OrderDetails,
            RateOrderReq, SplitOrderReq, SplitOutcome, UpdateCanceledLineReq, UpdateOrderReq,
        },
        reservations::{self, ReservationWindow},
        vouchers::{self, ApplyVoucherReq},
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_orders))
            .routes(utoipa_axum::routes!(create_order))
            .routes(utoipa_axum::routes!(get_available_tables))
            .routes(utoipa_axum::routes!(split_order))
            .routes(utoipa_axum::routes!(merge_orders))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(update_order))
            .routes(utoipa_axum::routes!(confirm_order))
            .routes(utoipa_axum::routes!(complete_order))
            .routes(utoipa_axum::routes!(cancel_order))
            .routes(utoipa_axum::routes!(cancel_order_line))
            .routes(utoipa_axum::routes!(get_canceled_lines))
            .routes(utoipa_axum::routes!(update_canceled_line))
            .routes(utoipa_axum::routes!(apply_voucher))
            .routes(utoipa_axum::routes!(rate_order)),
    )
}

#[derive(Deserialize, IntoParams)]
struct ListOrdersQuery {
    status: Option<OrderStatus>,
}

/// List orders. Staff see every order, customers only their own.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "List orders", body = StdResponse<Vec<OrderEntity>, String>)
    )
)]
async fn get_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders = orders::list_orders(conn, actor, query.status).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

/// Fetch one order with its lines, reservations and totals.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderDetails, String>)
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let details = orders::get_order(conn, actor, id).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Get order successfully"),
    })
}

/// Create an order together with its lines and, for reservations, its tables.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = CreateOrderReq,
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<OrderDetails, String>),
        (status = 400, description = "Validation failed or tables unavailable")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let details = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::create_order(conn, actor, body).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_created", &details);
    notify_customer(&state, details.clone());

    Ok(StdResponse {
        data: Some(details),
        message: Some("Create order successfully"),
    })
}

/// Update status, timing, tables or lines of an order.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to update")
    ),
    request_body = UpdateOrderReq,
    responses(
        (status = 200, description = "Updated order successfully", body = StdResponse<OrderDetails, String>)
    )
)]
async fn update_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<UpdateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let status_requested = body.status.is_some();
    let details = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::update_order(conn, actor, id, body).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_updated", &details);
    if status_requested {
        state
            .broadcaster
            .broadcast(ADMIN_ROOM, "order_status_changed", &details.order);
    }

    Ok(StdResponse {
        data: Some(details),
        message: Some("Update order successfully"),
    })
}

async fn transition(
    state: &AppState,
    actor: Actor,
    id: i32,
    event: OrderEvent,
) -> Result<OrderDetails, AppError> {
    let details = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::transition_order(conn, actor, id, event).await
    })
    .await?;

    state
        .broadcaster
        .broadcast(ADMIN_ROOM, "order_status_changed", &details.order);
    Ok(details)
}

/// Confirm a pending order.
#[utoipa::path(
    post,
    path = "/{id}/confirm",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to confirm")
    ),
    responses(
        (status = 200, description = "Confirmed order successfully", body = StdResponse<OrderDetails, String>),
        (status = 409, description = "Order is not pending")
    )
)]
async fn confirm_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    let details = transition(&state, actor, id, OrderEvent::Confirm).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Confirmed order successfully"),
    })
}

/// Complete a confirmed order, freeing its tables.
#[utoipa::path(
    post,
    path = "/{id}/complete",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to complete")
    ),
    responses(
        (status = 200, description = "Completed order successfully", body = StdResponse<OrderDetails, String>),
        (status = 409, description = "Order is not confirmed")
    )
)]
async fn complete_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    let details = transition(&state, actor, id, OrderEvent::Complete).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Completed order successfully"),
    })
}

/// Cancel an order, freeing its tables.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to cancel")
    ),
    responses(
        (status = 200, description = "Cancelled order successfully", body = StdResponse<OrderDetails, String>),
        (status = 409, description = "Order already finished")
    )
)]
async fn cancel_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    let details = transition(&state, actor, id, OrderEvent::Cancel).await?;

    Ok(StdResponse {
        data: Some(details),
        message: Some("Cancelled order successfully"),
    })
}

/// Cancel a single line of an order and keep a record of it.
#[utoipa::path(
    post,
    path = "/{id}/lines/{line_id}/cancel",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID"),
        ("line_id" = i32, Path, description = "Line ID to cancel")
    ),
    request_body = CancelLineReq,
    responses(
        (status = 200, description = "Cancelled line successfully", body = StdResponse<CanceledOrderLineEntity, String>)
    )
)]
async fn cancel_order_line(
    Path((id, line_id)): Path<(i32, i32)>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CancelLineReq>,
) -> Result<impl IntoResponse, AppError> {
    let record = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::cancel_line(conn, actor, id, line_id, body).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_updated", &record);

    Ok(StdResponse {
        data: Some(record),
        message: Some("Cancelled order line successfully"),
    })
}

/// List the cancelled lines of an order.
#[utoipa::path(
    get,
    path = "/{id}/canceled-lines",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "List cancelled lines", body = StdResponse<Vec<CanceledOrderLineEntity>, String>)
    )
)]
async fn get_canceled_lines(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let records = orders::canceled_lines(conn, actor, id).await?;

    Ok(StdResponse {
        data: Some(records),
        message: Some("Get cancelled lines successfully"),
    })
}

/// Edit the reason or note of a cancel record.
#[utoipa::path(
    patch,
    path = "/canceled-lines/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Cancel record ID")
    ),
    request_body = UpdateCanceledLineReq,
    responses(
        (status = 200, description = "Updated cancel record successfully", body = StdResponse<CanceledOrderLineEntity, String>)
    )
)]
async fn update_canceled_line(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<UpdateCanceledLineReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let record = orders::update_canceled_line(conn, actor, id, body).await?;

    Ok(StdResponse {
        data: Some(record),
        message: Some("Update cancel record successfully"),
    })
}

/// Apply a voucher code to a pending order.
#[utoipa::path(
    post,
    path = "/{id}/voucher",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    request_body = ApplyVoucherReq,
    responses(
        (status = 200, description = "Applied voucher successfully", body = StdResponse<OrderDetails, String>)
    )
)]
async fn apply_voucher(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<ApplyVoucherReq>,
) -> Result<impl IntoResponse, AppError> {
    let details = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        vouchers::apply_voucher(conn, actor, id, body, Utc::now()).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_updated", &details);

    Ok(StdResponse {
        data: Some(details),
        message: Some("Applied voucher successfully"),
    })
}

/// Rate a completed order.
#[utoipa::path(
    post,
    path = "/{id}/rating",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    request_body = RateOrderReq,
    responses(
        (status = 200, description = "Rated order successfully", body = StdResponse<OrderEntity, String>)
    )
)]
async fn rate_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<RateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = orders::rate_order(conn, actor, id, body).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Rated order successfully"),
    })
}

/// Move part of an order's quantities into a new order.
#[utoipa::path(
    post,
    path = "/split",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = SplitOrderReq,
    responses(
        (status = 200, description = "Split order successfully", body = StdResponse<SplitOutcome, String>),
        (status = 400, description = "Requested quantities exceed the source order")
    )
)]
async fn split_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<SplitOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let source = body.source()?;
    let outcome = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::split_order(conn, actor, source, body.items, Utc::now()).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_split", &outcome);

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Split order successfully"),
    })
}

/// Merge one order into another, by table numbers or by order ids.
#[utoipa::path(
    post,
    path = "/merge",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = MergeOrderReq,
    responses(
        (status = 200, description = "Merged orders successfully", body = StdResponse<OrderDetails, String>)
    )
)]
async fn merge_orders(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<MergeOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let addressing = MergeAddressing::try_from(&body)?;
    let details = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;
        orders::merge_orders(conn, actor, addressing, Utc::now()).await
    })
    .await?;

    state.broadcaster.broadcast(ADMIN_ROOM, "order_merged", &details);
    notify_customer(&state, details.clone());

    Ok(StdResponse {
        data: Some(details),
        message: Some("Merged orders successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
struct AvailabilityQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// Tables free for the whole of `[start, end)`.
#[utoipa::path(
    get,
    path = "/available-tables",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "List available tables", body = StdResponse<Vec<DiningTableEntity>, String>)
    )
)]
async fn get_available_tables(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, AppError> {
    let window = ReservationWindow::from_parts(query.start, query.end)?;
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let tables = reservations::get_available(conn, &window).await?;

    Ok(StdResponse {
        data: Some(tables),
        message: Some("Get available tables successfully"),
    })
}
