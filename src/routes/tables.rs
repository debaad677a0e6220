use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth::Actor,
    db,
    models::{CreateDiningTableEntity, DiningTableEntity, ReservationEntity, UpdateDiningTableEntity},
    notifications::ADMIN_ROOM,
    schema::dining_tables,
    services::reservations,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/tables",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_tables))
            .routes(utoipa_axum::routes!(create_table))
            .routes(utoipa_axum::routes!(release_table))
            .routes(utoipa_axum::routes!(update_table))
            .routes(utoipa_axum::routes!(delete_table)),
    )
}

fn check_table_shape(number: Option<i32>, capacity: Option<i32>) -> Result<(), AppError> {
    if number.is_some_and(|number| number < 1) {
        return Err(AppError::BadRequest("Table number must be positive".into()));
    }
    if capacity.is_some_and(|capacity| capacity < 1) {
        return Err(AppError::BadRequest("Table capacity must be positive".into()));
    }
    Ok(())
}

/// List every table that has not been removed.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Tables"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List tables", body = StdResponse<Vec<DiningTableEntity>, String>)
    )
)]
async fn get_tables(State(state): State<AppState>, _actor: Actor) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let tables: Vec<DiningTableEntity> = dining_tables::table
        .filter(dining_tables::deleted_at.is_null())
        .order_by(dining_tables::number.asc())
        .select(DiningTableEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get tables")?;

    Ok(StdResponse {
        data: Some(tables),
        message: Some("Get tables successfully"),
    })
}

/// Add a table to the floor plan.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Tables"],
    security(("bearerAuth" = [])),
    request_body = CreateDiningTableEntity,
    responses(
        (status = 200, description = "Created table successfully", body = StdResponse<DiningTableEntity, String>),
        (status = 409, description = "Table number already in use")
    )
)]
async fn create_table(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateDiningTableEntity>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;
    check_table_shape(Some(body.number), Some(body.capacity))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let table: DiningTableEntity = diesel::insert_into(dining_tables::table)
        .values(&body)
        .returning(DiningTableEntity::as_returning())
        .get_result(conn)
        .await?;

    Ok(StdResponse {
        data: Some(table),
        message: Some("Create table successfully"),
    })
}

/// Change a table's number, capacity or area.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Tables"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Table ID to update")
    ),
    request_body = UpdateDiningTableEntity,
    responses(
        (status = 200, description = "Updated table successfully", body = StdResponse<DiningTableEntity, String>)
    )
)]
async fn update_table(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<UpdateDiningTableEntity>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;
    check_table_shape(body.number, body.capacity)?;
    if body.number.is_none() && body.capacity.is_none() && body.area.is_none() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let table: DiningTableEntity = diesel::update(dining_tables::table.find(id))
        .filter(dining_tables::deleted_at.is_null())
        .set((&body, dining_tables::updated_at.eq(Utc::now())))
        .returning(DiningTableEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Table #{id} not found")))?;

    Ok(StdResponse {
        data: Some(table),
        message: Some("Update table successfully"),
    })
}

/// Remove a table. Refused while an open order still holds it.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Tables"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Table ID to remove")
    ),
    responses(
        (status = 200, description = "Removed table successfully", body = StdResponse<DiningTableEntity, String>),
        (status = 409, description = "Table still reserved")
    )
)]
async fn delete_table(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;

    let table = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        conn.transaction(move |conn| {
            Box::pin(async move {
                let now = Utc::now();
                reservations::lock_tables(conn, &[id]).await?;
                if reservations::table_in_use(conn, id, now).await? {
                    return Err(AppError::Conflict(format!(
                        "Table #{id} is still reserved by an open order"
                    )));
                }

                let table: DiningTableEntity = diesel::update(dining_tables::table.find(id))
                    .set((
                        dining_tables::deleted_at.eq(now),
                        dining_tables::updated_at.eq(now),
                    ))
                    .returning(DiningTableEntity::as_returning())
                    .get_result(conn)
                    .await?;
                Ok::<DiningTableEntity, AppError>(table)
            })
        })
        .await
    })
    .await?;

    tracing::info!(table_id = id, number = table.number, "Table removed");

    Ok(StdResponse {
        data: Some(table),
        message: Some("Removed table successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ReleaseTableReq {
    reservation_id: i32,
    table_id: i32,
}

/// End a reservation now so the table can be seated again.
#[utoipa::path(
    post,
    path = "/release",
    tags = ["Tables"],
    security(("bearerAuth" = [])),
    request_body = ReleaseTableReq,
    responses(
        (status = 200, description = "Released table successfully", body = StdResponse<ReservationEntity, String>)
    )
)]
async fn release_table(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<ReleaseTableReq>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_staff()?;

    let reservation = db::with_deadline(state.transaction_timeout, async {
        let conn = &mut state
            .db_pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?;

        conn.transaction(move |conn| {
            Box::pin(async move {
                reservations::release(conn, body.reservation_id, body.table_id, Utc::now()).await
            })
        })
        .await
    })
    .await?;

    state
        .broadcaster
        .broadcast(ADMIN_ROOM, "table_released", &reservation);

    Ok(StdResponse {
        data: Some(reservation),
        message: Some("Released table successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_numbers_and_capacity_are_positive() {
        assert!(check_table_shape(Some(4), Some(2)).is_ok());
        assert!(check_table_shape(None, None).is_ok());
        assert!(check_table_shape(Some(0), None).is_err());
        assert!(check_table_shape(None, Some(-1)).is_err());
    }
}
