//! Order lifecycle.
//!
//! ```text
//! pending ──confirm──▶ confirmed ──complete──▶ completed
//!    │                     │
//!    └──────cancel─────────┴──────▶ canceled
//! ```
//!
//! `completed` and `canceled` are terminal. Every status change, whether it
//! comes from a dedicated endpoint or from a plain order update, goes through
//! [`OrderStatus::transition`].

use std::{fmt, str::FromStr};

use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_error::AppError;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownVariant {
    pub(crate) kind: &'static str,
    pub(crate) value: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Confirm,
    Complete,
    Cancel,
}

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Reservations held by an order in a terminal state no longer block tables.
    pub const fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    /// Only these states can still be edited, split or merged.
    pub const fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn transition(self, event: OrderEvent) -> Result<OrderStatus, AppError> {
        use OrderEvent::*;
        use OrderStatus::*;

        match (self, event) {
            (Pending, Confirm) => Ok(Confirmed),
            (Confirmed, Complete) => Ok(Completed),
            (Pending | Confirmed, Cancel) => Ok(Canceled),
            (from, event) => Err(AppError::Conflict(format!(
                "Cannot {} an order that is {}",
                event.verb(),
                from
            ))),
        }
    }

    /// Resolves a requested target status into the event that reaches it.
    /// Asking for the current status is a no-op.
    pub fn event_towards(self, target: OrderStatus) -> Result<Option<OrderEvent>, AppError> {
        if self == target {
            return Ok(None);
        }

        let event = match target {
            OrderStatus::Confirmed => OrderEvent::Confirm,
            OrderStatus::Completed => OrderEvent::Complete,
            OrderStatus::Canceled => OrderEvent::Cancel,
            OrderStatus::Pending => {
                return Err(AppError::Conflict(format!(
                    "Cannot move an order that is {} back to pending",
                    self
                )));
            }
        };

        self.transition(event).map(|_| Some(event))
    }
}

impl OrderEvent {
    fn verb(self) -> &'static str {
        match self {
            OrderEvent::Confirm => "confirm",
            OrderEvent::Complete => "complete",
            OrderEvent::Cancel => "cancel",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "completed" => Ok(OrderStatus::Completed),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(UnknownVariant {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

impl ToSql<Text, Pg> for OrderStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for OrderStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Dine-in with one or more reserved tables.
    Reservation,
    /// Takeaway.
    Ship,
}

impl OrderType {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderType::Reservation => "reservation",
            OrderType::Ship => "ship",
        }
    }
}

impl FromStr for OrderType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(OrderType::Reservation),
            "ship" => Ok(OrderType::Ship),
            other => Err(UnknownVariant {
                kind: "order type",
                value: other.to_string(),
            }),
        }
    }
}

impl ToSql<Text, Pg> for OrderType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for OrderType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::OrderEvent::*;
    use super::OrderStatus::*;
    use super::*;

    #[test]
    fn legal_transitions() {
        assert_eq!(Pending.transition(Confirm).unwrap(), Confirmed);
        assert_eq!(Confirmed.transition(Complete).unwrap(), Completed);
        assert_eq!(Pending.transition(Cancel).unwrap(), Canceled);
        assert_eq!(Confirmed.transition(Cancel).unwrap(), Canceled);
    }

    #[test]
    fn terminal_states_have_no_way_out() {
        for from in [Completed, Canceled] {
            for event in [Confirm, Complete, Cancel] {
                assert!(matches!(from.transition(event), Err(AppError::Conflict(_))));
            }
        }
    }

    #[test]
    fn confirming_twice_is_a_conflict() {
        let err = Confirmed.transition(Confirm).unwrap_err();
        assert_eq!(err.to_string(), "Cannot confirm an order that is confirmed");
    }

    #[test]
    fn pending_cannot_skip_to_completed() {
        assert!(Pending.transition(Complete).is_err());
    }

    #[test]
    fn status_writes_resolve_to_events() {
        assert_eq!(Pending.event_towards(Pending).unwrap(), None);
        assert_eq!(Pending.event_towards(Confirmed).unwrap(), Some(Confirm));
        assert_eq!(Confirmed.event_towards(Canceled).unwrap(), Some(Cancel));
        assert!(Confirmed.event_towards(Pending).is_err());
        assert!(Canceled.event_towards(Confirmed).is_err());
    }

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for status in [Pending, Confirmed, Completed, Canceled] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("done".parse::<OrderStatus>().is_err());
        assert_eq!("ship".parse::<OrderType>().unwrap(), OrderType::Ship);
    }
}
