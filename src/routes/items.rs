use anyhow::Context;
use axum::{Json, extract::State, response::IntoResponse};
use diesel::SelectableHelper;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    auth::Actor,
    catalog::{self, CatalogItem, ItemSize},
    models::{CreateItemEntity, ItemEntity},
    schema::items,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/items",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_items))
            .routes(utoipa_axum::routes!(create_item)),
    )
}

/// List the menu.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Items"],
    responses(
        (status = 200, description = "List menu items", body = StdResponse<Vec<CatalogItem>, String>)
    )
)]
async fn get_items(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let items = catalog::list_items(conn).await?;

    Ok(StdResponse {
        data: Some(items),
        message: Some("Get items successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CreateItemReq {
    name: String,
    price: f64,
    #[serde(default)]
    sizes: Vec<ItemSize>,
}

impl CreateItemReq {
    fn into_entity(self) -> Result<CreateItemEntity, AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Item name cannot be empty".into()));
        }
        if self.price < 0.0 || self.sizes.iter().any(|size| size.price < 0.0) {
            return Err(AppError::BadRequest("Prices cannot be negative".into()));
        }
        for (i, size) in self.sizes.iter().enumerate() {
            if self.sizes[..i].iter().any(|other| other.name == size.name) {
                return Err(AppError::BadRequest(format!("Size {:?} is listed twice", size.name)));
            }
        }

        Ok(CreateItemEntity {
            name: self.name,
            price: self.price,
            sizes: serde_json::to_value(&self.sizes).context("Failed to encode sizes")?,
        })
    }
}

/// Add an item to the menu.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Items"],
    security(("bearerAuth" = [])),
    request_body = CreateItemReq,
    responses(
        (status = 200, description = "Created item successfully", body = StdResponse<CatalogItem, String>)
    )
)]
async fn create_item(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateItemReq>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_admin()?;
    let entity = body.into_entity()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: ItemEntity = diesel::insert_into(items::table)
        .values(&entity)
        .returning(ItemEntity::as_returning())
        .get_result(conn)
        .await?;
    let item = CatalogItem::try_from(item).context("Stored item has malformed sizes")?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Create item successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(sizes: Vec<ItemSize>) -> CreateItemReq {
        CreateItemReq {
            name: "Pho".into(),
            price: 9.0,
            sizes,
        }
    }

    #[test]
    fn sizes_are_stored_as_json() {
        let entity = req(vec![ItemSize { name: "large".into(), price: 12.0 }])
            .into_entity()
            .unwrap();
        assert_eq!(entity.sizes, serde_json::json!([{ "name": "large", "price": 12.0 }]));
    }

    #[test]
    fn duplicate_sizes_are_rejected() {
        let small = || ItemSize { name: "small".into(), price: 7.0 };
        assert!(matches!(
            req(vec![small(), small()]).into_entity(),
            Err(AppError::BadRequest(_))
        ));
    }
}
