use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Name of the exclusion constraint that forbids overlapping active reservations.
pub const NO_OVERLAP_CONSTRAINT: &str = "reservations_no_overlap";

/// Standard response body returned by every handler.
///
/// Serialized as `{ "status": <http code>, "message": ..., "data": ... }`.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

#[derive(Serialize)]
struct Envelope<'a, T, M> {
    status: u16,
    message: Option<&'a M>,
    data: Option<&'a T>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: StatusCode::OK.as_u16(),
            message: self.message.as_ref(),
            data: self.data.as_ref(),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

#[derive(Serialize, ToSchema)]
pub struct UnavailableTables {
    pub unavailable_tables: Vec<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    /// Holds the table numbers that are already booked for the requested window.
    #[error("tables already reserved for this time window: {0:?}")]
    TablesUnavailable(Vec<i32>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    ForbiddenResource(String),

    #[error("the database did not answer in time, please retry")]
    Timeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::TablesUnavailable(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => AppError::NotFound("Record not found".into()),
            DieselError::DatabaseError(_, ref info)
                if info.constraint_name() == Some(NO_OVERLAP_CONSTRAINT) =>
            {
                AppError::Conflict("A table was booked concurrently for an overlapping window".into())
            }
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                AppError::Conflict(info.message().to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                AppError::BadRequest(info.details().unwrap_or(info.message()).to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                AppError::Timeout
            }
            other => AppError::Other(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::Other(err) = &self {
            tracing::error!("Unhandled error: {:#}", err);
        }

        let message = match &self {
            AppError::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let data = match self {
            AppError::TablesUnavailable(tables) => serde_json::to_value(UnavailableTables {
                unavailable_tables: tables,
            })
            .ok(),
            _ => None,
        };

        let body = Envelope {
            status: status.as_u16(),
            message: Some(&message),
            data: data.as_ref(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_envelope_carries_status_message_and_data() {
        let response = StdResponse {
            data: Some(vec![1, 2]),
            message: Some("ok"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], 200);
        assert_eq!(body["message"], "ok");
        assert_eq!(body["data"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn unavailable_tables_are_listed_in_data() {
        let response = AppError::TablesUnavailable(vec![1, 4]).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert_eq!(body["data"]["unavailable_tables"], serde_json::json!([1, 4]));
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response = AppError::Other(anyhow::anyhow!("connection refused")).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert!(body["data"].is_null());
    }

    #[test]
    fn timeout_is_retryable() {
        let response = AppError::Timeout.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let err: AppError = DieselError::NotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
