//! Read-only view of the menu used to validate and price order lines.

use std::collections::HashMap;

use anyhow::Context;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{app_error::AppError, models::ItemEntity, schema::items};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ItemSize {
    pub name: String,
    pub price: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct CatalogItem {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub sizes: Vec<ItemSize>,
}

impl CatalogItem {
    pub fn size(&self, name: &str) -> Option<&ItemSize> {
        self.sizes.iter().find(|size| size.name == name)
    }

    /// Price of one unit, taking the size's own price when a size is chosen.
    pub fn unit_price(&self, size: Option<&str>) -> f64 {
        size.and_then(|name| self.size(name))
            .map_or(self.price, |size| size.price)
    }
}

impl TryFrom<ItemEntity> for CatalogItem {
    type Error = serde_json::Error;

    fn try_from(item: ItemEntity) -> Result<Self, Self::Error> {
        Ok(CatalogItem {
            id: item.id,
            name: item.name,
            price: item.price,
            sizes: serde_json::from_value(item.sizes)?,
        })
    }
}

pub type Catalog = HashMap<i32, CatalogItem>;

/// Loads the given items. Unknown ids are simply absent from the result.
pub async fn load_items(conn: &mut AsyncPgConnection, ids: &[i32]) -> Result<Catalog, AppError> {
    if ids.is_empty() {
        return Ok(Catalog::new());
    }

    let rows: Vec<ItemEntity> = items::table
        .filter(items::id.eq_any(ids))
        .select(ItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to load menu items")?;

    rows.into_iter()
        .map(|row| {
            let id = row.id;
            CatalogItem::try_from(row)
                .map(|item| (id, item))
                .with_context(|| format!("Item #{id} has malformed sizes"))
                .map_err(AppError::from)
        })
        .collect()
}

pub async fn list_items(conn: &mut AsyncPgConnection) -> Result<Vec<CatalogItem>, AppError> {
    let rows: Vec<ItemEntity> = items::table
        .order_by(items::id.asc())
        .select(ItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to list menu items")?;

    rows.into_iter()
        .map(|row| {
            CatalogItem::try_from(row)
                .context("Menu item has malformed sizes")
                .map_err(AppError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn pizza() -> CatalogItem {
        CatalogItem {
            id: 1,
            name: "Pizza".into(),
            price: 10.0,
            sizes: vec![
                ItemSize { name: "small".into(), price: 8.0 },
                ItemSize { name: "large".into(), price: 14.0 },
            ],
        }
    }

    #[test]
    fn unit_price_prefers_the_size_price() {
        let item = pizza();
        assert_eq!(item.unit_price(None), 10.0);
        assert_eq!(item.unit_price(Some("large")), 14.0);
        assert_eq!(item.unit_price(Some("unknown")), 10.0);
    }

    #[test]
    fn sizes_are_read_from_json() {
        let now = chrono::Utc::now();
        let item = CatalogItem::try_from(ItemEntity {
            id: 5,
            name: "Tea".into(),
            price: 2.0,
            sizes: serde_json::json!([{ "name": "pot", "price": 6.5 }]),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
        assert_eq!(item.size("pot").map(|s| s.price), Some(6.5));
    }
}
