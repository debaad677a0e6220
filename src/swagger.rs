use axum::Router;
use utoipa::openapi::{
    InfoBuilder, OpenApi,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

/// Serves the docs at `/swagger-ui` with the bearer scheme the handlers refer to.
pub fn create_swagger_ui<S>(mut openapi: OpenApi) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    openapi.info = InfoBuilder::new()
        .title("Restaurant OrderService API")
        .version(env!("CARGO_PKG_VERSION"))
        .build();

    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", openapi)
        .into()
}
