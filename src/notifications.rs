//! Best-effort side effects: customer notifications and the live feed for staff.
//!
//! Nothing here may fail a request. Errors are logged and dropped.

use anyhow::{Context, Result};
use diesel::{QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{app_state::AppState, models::UserEntity, schema::users, services::orders::OrderDetails};

pub const ADMIN_ROOM: &str = "admin";

#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

pub trait Notifier: Send + Sync {
    fn order_placed(&self, recipient: Recipient, order: OrderDetails) -> BoxFuture<'static, Result<()>>;
}

/// Hands confirmations to the mail service, which owns templating and delivery.
pub struct MailServiceNotifier {
    client: Client,
    base_url: String,
}

impl MailServiceNotifier {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct OrderConfirmationMail {
    email: String,
    name: String,
    order: OrderDetails,
}

impl Notifier for MailServiceNotifier {
    fn order_placed(&self, recipient: Recipient, order: OrderDetails) -> BoxFuture<'static, Result<()>> {
        let client = self.client.clone();
        let url = format!("{}/emails/order-confirmation", self.base_url.trim_end_matches('/'));
        Box::pin(async move {
            client
                .post(url)
                .json(&OrderConfirmationMail {
                    email: recipient.email,
                    name: recipient.name,
                    order,
                })
                .send()
                .await
                .context("Mail service unreachable")?
                .error_for_status()
                .context("Mail service rejected the confirmation")?;
            Ok(())
        })
    }
}

/// Used when no mail service is configured, and in tests.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn order_placed(&self, recipient: Recipient, order: OrderDetails) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            tracing::info!(
                email = %recipient.email,
                order_id = order.order.id,
                "Order confirmation (log only)"
            );
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub room: String,
    pub event: String,
    pub payload: Value,
}

/// In-process fan-out of live events. Slow subscribers lose events.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn broadcast(&self, room: &str, event: &str, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(event, "Failed to serialize realtime payload: {}", err);
                return;
            }
        };

        // Sending only fails when nobody is listening.
        let _ = self.tx.send(RealtimeEvent {
            room: room.to_string(),
            event: event.to_string(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Sends the order confirmation in the background once the order is committed.
pub fn notify_customer(state: &AppState, order: OrderDetails) {
    let pool = state.db_pool.clone();
    let notifier = state.notifier.clone();
    let customer_id = order.order.customer_id;
    let order_id = order.order.id;

    tokio::spawn(async move {
        let outcome = async {
            let conn = &mut pool.get().await.context("Failed to obtain a DB connection")?;
            let customer: UserEntity = users::table
                .find(customer_id)
                .select(UserEntity::as_select())
                .get_result(conn)
                .await
                .context("Failed to load customer")?;

            notifier
                .order_placed(
                    Recipient {
                        email: customer.email,
                        name: customer.name,
                    },
                    order,
                )
                .await
        }
        .await;

        if let Err(err) = outcome {
            tracing::warn!(order_id, customer_id, "Order notification failed: {:#}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_broadcast_events() {
        let broadcaster = Broadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.broadcast(ADMIN_ROOM, "order_created", serde_json::json!({ "id": 9 }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.room, "admin");
        assert_eq!(event.event, "order_created");
        assert_eq!(event.payload["id"], 9);
    }

    #[test]
    fn broadcasting_without_subscribers_is_a_no_op() {
        Broadcaster::default().broadcast(ADMIN_ROOM, "order_updated", 1);
    }
}
