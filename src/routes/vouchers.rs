use anyhow::Context;
use axum::{Json, extract::State, response::IntoResponse};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth::Actor,
    models::{CreateVoucherEntity, VoucherEntity},
    services::vouchers,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/vouchers",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_vouchers))
            .routes(utoipa_axum::routes!(create_voucher)),
    )
}

/// List all vouchers.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Vouchers"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List vouchers", body = StdResponse<Vec<VoucherEntity>, String>)
    )
)]
async fn get_vouchers(State(state): State<AppState>, actor: Actor) -> Result<impl IntoResponse, AppError> {
    actor.require_staff()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vouchers = vouchers::list_vouchers(conn).await?;

    Ok(StdResponse {
        data: Some(vouchers),
        message: Some("Get vouchers successfully"),
    })
}

/// Create a voucher.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Vouchers"],
    security(("bearerAuth" = [])),
    request_body = CreateVoucherEntity,
    responses(
        (status = 200, description = "Created voucher successfully", body = StdResponse<VoucherEntity, String>),
        (status = 409, description = "Voucher code already exists")
    )
)]
async fn create_voucher(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateVoucherEntity>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let voucher = vouchers::create_voucher(conn, body).await?;

    Ok(StdResponse {
        data: Some(voucher),
        message: Some("Create voucher successfully"),
    })
}
