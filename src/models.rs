use chrono::{DateTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::services::{
    order_status::{OrderStatus, OrderType},
    vouchers::DiscountType,
};

// Users

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// Dining tables

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::dining_tables)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiningTableEntity {
    pub id: i32,
    pub number: i32,
    pub capacity: i32,
    pub area: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::dining_tables)]
pub struct CreateDiningTableEntity {
    pub number: i32,
    pub capacity: i32,
    pub area: String,
}

#[derive(AsChangeset, Deserialize, Debug, Default, ToSchema)]
#[diesel(table_name = crate::schema::dining_tables)]
pub struct UpdateDiningTableEntity {
    pub number: Option<i32>,
    pub capacity: Option<i32>,
    pub area: Option<String>,
}

// Menu items

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ItemEntity {
    pub id: i32,
    pub name: String,
    pub price: f64,
    /// `[{ "name": "large", "price": 12.5 }, ...]`
    pub sizes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::items)]
pub struct CreateItemEntity {
    pub name: String,
    pub price: f64,
    pub sizes: Value,
}

// Orders

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub customer_id: i32,
    pub staff_id: Option<i32>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub party_size: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[diesel(column_name = star_)]
    pub star: Option<i32>,
    pub comment: Option<String>,
    pub voucher_id: Option<i32>,
    pub discount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub customer_id: i32,
    pub staff_id: Option<i32>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub party_size: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::order_lines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderLineEntity {
    pub id: i32,
    pub order_id: i32,
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::order_lines)]
pub struct CreateOrderLineEntity {
    pub order_id: i32,
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::canceled_order_lines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CanceledOrderLineEntity {
    pub id: i32,
    pub order_id: i32,
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
    pub reason: String,
    pub canceled_by: i32,
    pub canceled_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::canceled_order_lines)]
pub struct CreateCanceledOrderLineEntity {
    pub order_id: i32,
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
    pub reason: String,
    pub canceled_by: i32,
}

// Reservations

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::reservations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReservationEntity {
    pub id: i32,
    pub order_id: i32,
    pub table_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub active: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::reservations)]
pub struct CreateReservationEntity {
    pub order_id: i32,
    pub table_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// Vouchers

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::vouchers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VoucherEntity {
    pub id: i32,
    pub code: String,
    pub discount_value: f64,
    pub discount_type: DiscountType,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub min_order_value: f64,
    pub usage_limit: i32,
    pub used_count: i32,
    pub eligible_customer_ids: Option<Vec<i32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::vouchers)]
pub struct CreateVoucherEntity {
    pub code: String,
    pub discount_value: f64,
    pub discount_type: DiscountType,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub min_order_value: f64,
    pub usage_limit: i32,
    pub eligible_customer_ids: Option<Vec<i32>>,
}
