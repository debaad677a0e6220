use utoipa_axum::router::OpenApiRouter;

use crate::app_state::AppState;

pub mod events;
pub mod items;
pub mod orders;
pub mod tables;
pub mod vouchers;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    orders::routes_with_openapi()
        .merge(tables::routes_with_openapi())
        .merge(items::routes_with_openapi())
        .merge(vouchers::routes_with_openapi())
        .merge(events::routes_with_openapi())
}
