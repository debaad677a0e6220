use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    auth::Actor,
    models::{CreateVoucherEntity, OrderEntity, VoucherEntity},
    schema::{orders, vouchers},
    services::{
        order_status::{OrderStatus, UnknownVariant},
        orders::{OrderDetails, load_details, lock_order},
    },
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` percent of the subtotal, at most 100.
    Percentage,
    /// A flat amount, never more than the subtotal.
    Fixed,
}

impl DiscountType {
    pub const fn as_str(self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed" => Ok(DiscountType::Fixed),
            other => Err(UnknownVariant {
                kind: "discount type",
                value: other.to_string(),
            }),
        }
    }
}

impl ToSql<Text, Pg> for DiscountType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for DiscountType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(raw.parse()?)
    }
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ApplyVoucherReq {
    pub code: String,
}

/// Checks a voucher against an order and returns the discount it grants.
pub fn evaluate_voucher(
    voucher: &VoucherEntity,
    customer_id: i32,
    subtotal: f64,
    now: DateTime<Utc>,
) -> Result<f64, AppError> {
    if now < voucher.valid_from || now > voucher.valid_until {
        return Err(AppError::Conflict(format!(
            "Voucher {} is not valid at this time",
            voucher.code
        )));
    }

    if let Some(eligible) = &voucher.eligible_customer_ids
        && !eligible.contains(&customer_id)
    {
        return Err(AppError::Conflict(format!(
            "Voucher {} is not available to this customer",
            voucher.code
        )));
    }

    if voucher.used_count >= voucher.usage_limit {
        return Err(AppError::Conflict(format!(
            "Voucher {} has been used up",
            voucher.code
        )));
    }

    discount_for(voucher, subtotal).ok_or_else(|| {
        AppError::Conflict(format!(
            "Voucher {} needs an order of at least {:.2}",
            voucher.code, voucher.min_order_value
        ))
    })
}

/// The discount a voucher grants on `subtotal`, or `None` below its minimum.
fn discount_for(voucher: &VoucherEntity, subtotal: f64) -> Option<f64> {
    if subtotal < voucher.min_order_value {
        return None;
    }

    let discount = match voucher.discount_type {
        DiscountType::Percentage => subtotal * voucher.discount_value.min(100.0) / 100.0,
        DiscountType::Fixed => voucher.discount_value.min(subtotal),
    };
    Some(discount.max(0.0))
}

fn check_new_voucher(voucher: &CreateVoucherEntity) -> Result<(), AppError> {
    if voucher.code.trim().is_empty() {
        return Err(AppError::BadRequest("Voucher code cannot be empty".into()));
    }
    if voucher.discount_value <= 0.0 {
        return Err(AppError::BadRequest("discount_value must be positive".into()));
    }
    if voucher.discount_type == DiscountType::Percentage && voucher.discount_value > 100.0 {
        return Err(AppError::BadRequest(
            "A percentage discount cannot exceed 100".into(),
        ));
    }
    if voucher.valid_from >= voucher.valid_until {
        return Err(AppError::BadRequest(
            "valid_from must be before valid_until".into(),
        ));
    }
    if voucher.usage_limit < 1 || voucher.min_order_value < 0.0 {
        return Err(AppError::BadRequest(
            "usage_limit must be positive and min_order_value not negative".into(),
        ));
    }
    Ok(())
}

pub async fn create_voucher(
    conn: &mut AsyncPgConnection,
    voucher: CreateVoucherEntity,
) -> Result<VoucherEntity, AppError> {
    check_new_voucher(&voucher)?;

    Ok(diesel::insert_into(vouchers::table)
        .values(&voucher)
        .returning(VoucherEntity::as_returning())
        .get_result(conn)
        .await?)
}

pub async fn list_vouchers(conn: &mut AsyncPgConnection) -> Result<Vec<VoucherEntity>, AppError> {
    Ok(vouchers::table
        .order_by(vouchers::valid_until.desc())
        .select(VoucherEntity::as_select())
        .get_results(conn)
        .await?)
}

/// Applies a voucher to a pending order and consumes one use of it.
pub async fn apply_voucher(
    conn: &mut AsyncPgConnection,
    actor: Actor,
    order_id: i32,
    req: ApplyVoucherReq,
    now: DateTime<Utc>,
) -> Result<OrderDetails, AppError> {
    let code = req.code.trim().to_string();
    if code.is_empty() {
        return Err(AppError::BadRequest("A voucher code is required".into()));
    }

    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            if !(actor.is_staff() || order.customer_id == actor.id) {
                return Err(AppError::ForbiddenResource(
                    "This order belongs to another customer".into(),
                ));
            }
            if order.status != OrderStatus::Pending {
                return Err(AppError::Conflict(format!(
                    "Vouchers can only be applied to pending orders, order #{order_id} is {}",
                    order.status
                )));
            }
            if order.voucher_id.is_some() {
                return Err(AppError::Conflict(format!(
                    "Order #{order_id} already has a voucher"
                )));
            }

            let voucher: VoucherEntity = vouchers::table
                .filter(vouchers::code.eq(&code))
                .select(VoucherEntity::as_select())
                .for_update()
                .first(conn)
                .await
                .optional()?
                .ok_or_else(|| AppError::NotFound(format!("Voucher {code} not found")))?;

            let customer_id = order.customer_id;
            let priced = load_details(conn, order).await?;
            let discount = evaluate_voucher(&voucher, customer_id, priced.subtotal, now)?;

            let consumed = diesel::update(
                vouchers::table
                    .find(voucher.id)
                    .filter(vouchers::used_count.lt(vouchers::usage_limit)),
            )
            .set((
                vouchers::used_count.eq(vouchers::used_count + 1),
                vouchers::updated_at.eq(now),
            ))
            .execute(conn)
            .await?;
            if consumed == 0 {
                return Err(AppError::Conflict(format!("Voucher {code} has been used up")));
            }

            let updated: OrderEntity = diesel::update(orders::table.find(order_id))
                .set((
                    orders::voucher_id.eq(voucher.id),
                    orders::discount.eq(discount),
                    orders::updated_at.eq(now),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?;

            tracing::info!(order_id, voucher_id = voucher.id, discount, "Voucher applied");
            let details = load_details(conn, updated).await?;
            Ok::<OrderDetails, AppError>(details)
        })
    })
    .await
}

/// Recomputes the discount after an order's lines changed. A voucher the
/// order no longer qualifies for is detached and its use is given back.
pub async fn reprice(
    conn: &mut AsyncPgConnection,
    order: OrderEntity,
    now: DateTime<Utc>,
) -> Result<OrderEntity, AppError> {
    let Some(voucher_id) = order.voucher_id else {
        return Ok(order);
    };

    let voucher: VoucherEntity = vouchers::table
        .find(voucher_id)
        .select(VoucherEntity::as_select())
        .for_update()
        .first(conn)
        .await?;
    let order_id = order.id;
    let subtotal = load_details(conn, order).await?.subtotal;

    match discount_for(&voucher, subtotal) {
        Some(discount) => Ok(diesel::update(orders::table.find(order_id))
            .set((orders::discount.eq(discount), orders::updated_at.eq(now)))
            .returning(OrderEntity::as_returning())
            .get_result(conn)
            .await?),
        None => {
            diesel::update(
                vouchers::table
                    .find(voucher_id)
                    .filter(vouchers::used_count.gt(0)),
            )
            .set((
                vouchers::used_count.eq(vouchers::used_count - 1),
                vouchers::updated_at.eq(now),
            ))
            .execute(conn)
            .await?;

            tracing::info!(order_id, voucher_id, subtotal, "Voucher detached, order fell below its minimum");
            Ok(diesel::update(orders::table.find(order_id))
                .set((
                    orders::voucher_id.eq(None::<i32>),
                    orders::discount.eq(0.0),
                    orders::updated_at.eq(now),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn voucher(discount_type: DiscountType, value: f64) -> VoucherEntity {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        VoucherEntity {
            id: 1,
            code: "WELCOME".into(),
            discount_value: value,
            discount_type,
            valid_from: at,
            valid_until: at + Duration::days(30),
            min_order_value: 20.0,
            usage_limit: 2,
            used_count: 0,
            eligible_customer_ids: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn mid_january() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn percentage_and_fixed_discounts() {
        let now = mid_january();
        assert_eq!(evaluate_voucher(&voucher(DiscountType::Percentage, 10.0), 1, 50.0, now).unwrap(), 5.0);
        assert_eq!(evaluate_voucher(&voucher(DiscountType::Fixed, 15.0), 1, 50.0, now).unwrap(), 15.0);
    }

    #[test]
    fn discount_follows_the_subtotal() {
        let mut half = voucher(DiscountType::Percentage, 50.0);
        half.min_order_value = 80.0;
        assert_eq!(discount_for(&half, 100.0), Some(50.0));
        assert_eq!(discount_for(&half, 120.0), Some(60.0));
        assert_eq!(discount_for(&half, 50.0), None);
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let mut big = voucher(DiscountType::Fixed, 500.0);
        big.min_order_value = 0.0;
        assert_eq!(evaluate_voucher(&big, 1, 30.0, mid_january()).unwrap(), 30.0);
    }

    #[test]
    fn rejects_outside_validity_window() {
        let late = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            evaluate_voucher(&voucher(DiscountType::Fixed, 5.0), 1, 50.0, late),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn rejects_small_orders_used_up_vouchers_and_strangers() {
        let now = mid_january();
        assert!(evaluate_voucher(&voucher(DiscountType::Fixed, 5.0), 1, 10.0, now).is_err());

        let mut used = voucher(DiscountType::Fixed, 5.0);
        used.used_count = 2;
        assert!(evaluate_voucher(&used, 1, 50.0, now).is_err());

        let mut private = voucher(DiscountType::Fixed, 5.0);
        private.eligible_customer_ids = Some(vec![7, 8]);
        assert!(evaluate_voucher(&private, 1, 50.0, now).is_err());
        assert!(evaluate_voucher(&private, 7, 50.0, now).is_ok());
    }

    #[test]
    fn discount_type_round_trips_through_its_wire_name() {
        assert_eq!("percentage".parse::<DiscountType>().unwrap(), DiscountType::Percentage);
        assert_eq!(DiscountType::Fixed.to_string(), "fixed");
        assert!("coupon".parse::<DiscountType>().is_err());
        assert!(serde_json::from_str::<DiscountType>(r#""coupon""#).is_err());
    }

    #[test]
    fn new_voucher_checks() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let draft = |discount_type, discount_value: f64| CreateVoucherEntity {
            code: "SPRING".into(),
            discount_value,
            discount_type,
            valid_from: at,
            valid_until: at + Duration::days(10),
            min_order_value: 0.0,
            usage_limit: 10,
            eligible_customer_ids: None,
        };
        assert!(check_new_voucher(&draft(DiscountType::Percentage, 20.0)).is_ok());
        assert!(check_new_voucher(&draft(DiscountType::Percentage, 120.0)).is_err());
        assert!(check_new_voucher(&draft(DiscountType::Fixed, 0.0)).is_err());
        assert!(check_new_voucher(&draft(DiscountType::Fixed, 150.0)).is_ok());
    }
}
