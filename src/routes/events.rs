use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, stream};
use tokio::sync::broadcast::error::RecvError;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::AppError,
    app_state::AppState,
    auth::Actor,
    notifications::{ADMIN_ROOM, RealtimeEvent},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().routes(utoipa_axum::routes!(get_events))
}

fn to_sse(event: &RealtimeEvent) -> Option<Event> {
    Event::default()
        .event(event.event.as_str())
        .json_data(&event.payload)
        .inspect_err(|err| tracing::warn!(event = %event.event, "Failed to encode live event: {}", err))
        .ok()
}

/// Live feed of order and table events for the floor staff.
#[utoipa::path(
    get,
    path = "/events",
    tags = ["Events"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream", body = String)
    )
)]
async fn get_events(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    actor.require_staff()?;

    let rx = state.broadcaster.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.room == ADMIN_ROOM => {
                    if let Some(sse) = to_sse(&event) {
                        return Some((Ok(sse), rx));
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Live feed subscriber fell behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_keep_their_name() {
        let event = RealtimeEvent {
            room: ADMIN_ROOM.into(),
            event: "order_created".into(),
            payload: serde_json::json!({ "id": 1 }),
        };
        assert!(to_sse(&event).is_some());
    }
}
