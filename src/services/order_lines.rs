//! Order lines: catalog validation, pricing, and the quantity bookkeeping
//! behind split and merge. Everything here is pure; persistence lives in
//! [`crate::services::orders`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    app_error::AppError,
    catalog::Catalog,
    models::{CreateOrderLineEntity, OrderLineEntity},
};

/// Size name that is treated as "no size" when matching lines.
pub const DEFAULT_SIZE: &str = "default";

/// Upper bound for the quantity of a single line, also after a merge.
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Identity of a line for split/merge matching: the item and its size.
///
/// A line without a size and a line with the size `"default"` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineKey {
    pub item_id: i32,
    pub size: Option<String>,
}

impl LineKey {
    pub fn new(item_id: i32, size: Option<&str>) -> Self {
        LineKey {
            item_id,
            size: size.filter(|size| *size != DEFAULT_SIZE).map(str::to_owned),
        }
    }
}

impl std::fmt::Display for LineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "item #{} ({})", self.item_id, self.size.as_deref().unwrap_or(DEFAULT_SIZE))
    }
}

/// One requested line as sent by clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct LineInput {
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
}

/// A line ready to be written under some order.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LineDraft {
    pub item_id: i32,
    pub quantity: i32,
    pub size: Option<String>,
    pub note: Option<String>,
}

impl LineDraft {
    pub fn key(&self) -> LineKey {
        LineKey::new(self.item_id, self.size.as_deref())
    }

    pub fn into_entity(self, order_id: i32) -> CreateOrderLineEntity {
        CreateOrderLineEntity {
            order_id,
            item_id: self.item_id,
            quantity: self.quantity,
            size: self.size,
            note: self.note,
        }
    }
}

impl From<LineInput> for LineDraft {
    fn from(line: LineInput) -> Self {
        LineDraft {
            item_id: line.item_id,
            quantity: line.quantity,
            size: line.size,
            note: line.note,
        }
    }
}

impl From<&OrderLineEntity> for LineDraft {
    fn from(line: &OrderLineEntity) -> Self {
        LineDraft {
            item_id: line.item_id,
            quantity: line.quantity,
            size: line.size.clone(),
            note: line.note.clone(),
        }
    }
}

/// Checks every line against the catalog and stops at the first bad one.
pub fn validate_lines(lines: &[LineInput], catalog: &Catalog) -> Result<(), AppError> {
    for line in lines {
        let Some(item) = catalog.get(&line.item_id) else {
            return Err(AppError::BadRequest(format!(
                "Item #{} does not exist",
                line.item_id
            )));
        };

        if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
            return Err(AppError::BadRequest(format!(
                "Quantity for item #{} must be between 1 and {MAX_LINE_QUANTITY}",
                line.item_id
            )));
        }

        if let Some(size) = line.size.as_deref()
            && item.size(size).is_none()
        {
            return Err(AppError::BadRequest(format!(
                "Item #{} ({}) has no size {:?}",
                item.id, item.name, size
            )));
        }
    }
    Ok(())
}

pub fn subtotal(lines: &[LineDraft], catalog: &Catalog) -> f64 {
    lines
        .iter()
        .map(|line| {
            let unit_price = catalog
                .get(&line.item_id)
                .map_or(0.0, |item| item.unit_price(line.size.as_deref()));
            unit_price * f64::from(line.quantity)
        })
        .sum()
}

pub fn quantities(lines: &[LineDraft]) -> HashMap<LineKey, i64> {
    let mut totals = HashMap::new();
    for line in lines {
        *totals.entry(line.key()).or_insert(0) += i64::from(line.quantity);
    }
    totals
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    /// Lines for the new order.
    pub moved: Vec<LineDraft>,
    /// What stays on the source order, replacing its current lines.
    pub remaining: Vec<LineDraft>,
}

/// Works out how `requested` quantities come off `source`.
///
/// Requests may only name keys present on the source, and the running total
/// per key may not exceed what the source holds. Source lines keep their
/// order; fully moved lines disappear, partially moved ones shrink.
pub fn plan_split(source: &[LineDraft], requested: &[LineInput]) -> Result<SplitPlan, AppError> {
    if requested.is_empty() {
        return Err(AppError::BadRequest("Nothing to split off".into()));
    }

    let available = quantities(source);
    let mut taking: HashMap<LineKey, i64> = HashMap::new();
    let mut moved = Vec::with_capacity(requested.len());

    for line in requested {
        let key = LineKey::new(line.item_id, line.size.as_deref());

        if line.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Quantity to move for {key} must be at least 1"
            )));
        }

        let Some(&held) = available.get(&key) else {
            return Err(AppError::BadRequest(format!("{key} is not on the source order")));
        };

        let total = taking.entry(key.clone()).or_insert(0);
        *total += i64::from(line.quantity);
        if *total > held {
            return Err(AppError::BadRequest(format!(
                "Cannot move {} of {key}, the source order only holds {held}",
                *total
            )));
        }

        let note = line.note.clone().or_else(|| {
            source
                .iter()
                .find(|src| src.key() == key)
                .and_then(|src| src.note.clone())
        });

        moved.push(LineDraft {
            item_id: line.item_id,
            quantity: line.quantity,
            size: line.size.clone(),
            note,
        });
    }

    let mut remaining = Vec::with_capacity(source.len());
    for line in source {
        let key = line.key();
        let take = taking
            .get_mut(&key)
            .map(|left| {
                let take = (*left).min(i64::from(line.quantity));
                *left -= take;
                take
            })
            .unwrap_or(0);

        let left_on_line = i64::from(line.quantity) - take;
        if left_on_line > 0 {
            remaining.push(LineDraft {
                quantity: left_on_line as i32,
                ..line.clone()
            });
        }
    }

    Ok(SplitPlan { moved, remaining })
}

/// Folds `source` into `target`. Lines with the same key add up and keep
/// every distinct note, joined with `"; "`. A combined quantity above
/// [`MAX_LINE_QUANTITY`] rejects the whole merge.
pub fn merge_lines(target: &[LineDraft], source: &[LineDraft]) -> Result<Vec<LineDraft>, AppError> {
    let mut merged: Vec<LineDraft> = Vec::with_capacity(target.len() + source.len());
    let mut index: HashMap<LineKey, usize> = HashMap::new();

    for line in target.iter().chain(source) {
        match index.get(&line.key()) {
            Some(&at) => {
                let existing = &mut merged[at];
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .filter(|quantity| *quantity <= MAX_LINE_QUANTITY)
                    .ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Merged quantity for {} would exceed {MAX_LINE_QUANTITY}",
                            line.key()
                        ))
                    })?;
                existing.note = join_notes(existing.note.take(), line.note.as_deref());
            }
            None => {
                index.insert(line.key(), merged.len());
                merged.push(line.clone());
            }
        }
    }

    Ok(merged)
}

fn join_notes(current: Option<String>, incoming: Option<&str>) -> Option<String> {
    let incoming = incoming.map(str::trim).filter(|note| !note.is_empty());
    match (current, incoming) {
        (None, incoming) => incoming.map(str::to_owned),
        (Some(current), None) => Some(current),
        (Some(current), Some(incoming)) => {
            if current.split("; ").any(|part| part == incoming) {
                Some(current)
            } else {
                Some(format!("{current}; {incoming}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, ItemSize};
    use proptest::prelude::*;

    fn draft(item_id: i32, quantity: i32, size: Option<&str>, note: Option<&str>) -> LineDraft {
        LineDraft {
            item_id,
            quantity,
            size: size.map(str::to_owned),
            note: note.map(str::to_owned),
        }
    }

    fn input(item_id: i32, quantity: i32, size: Option<&str>) -> LineInput {
        LineInput {
            item_id,
            quantity,
            size: size.map(str::to_owned),
            note: None,
        }
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert(
            1,
            CatalogItem {
                id: 1,
                name: "Pho".into(),
                price: 5.0,
                sizes: vec![ItemSize { name: "large".into(), price: 7.0 }],
            },
        );
        catalog.insert(
            2,
            CatalogItem {
                id: 2,
                name: "Iced tea".into(),
                price: 1.5,
                sizes: vec![],
            },
        );
        catalog
    }

    #[test]
    fn default_size_and_no_size_share_a_key() {
        assert_eq!(LineKey::new(3, None), LineKey::new(3, Some("default")));
        assert_ne!(LineKey::new(3, None), LineKey::new(3, Some("large")));
    }

    #[test]
    fn validation_accepts_known_items_and_sizes() {
        let lines = vec![input(1, 2, Some("large")), input(2, 1, None)];
        assert!(validate_lines(&lines, &catalog()).is_ok());
    }

    #[test]
    fn validation_names_the_offending_item() {
        let err = validate_lines(&[input(9, 1, None)], &catalog()).unwrap_err();
        assert_eq!(err.to_string(), "Item #9 does not exist");

        let err = validate_lines(&[input(1, 0, None)], &catalog()).unwrap_err();
        assert!(err.to_string().contains("item #1"));

        let err = validate_lines(&[input(2, 1, Some("large"))], &catalog()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("Iced tea")));
    }

    #[test]
    fn subtotal_uses_size_prices() {
        let lines = vec![draft(1, 2, Some("large"), None), draft(2, 2, None, None)];
        assert_eq!(subtotal(&lines, &catalog()), 17.0);
    }

    #[test]
    fn split_moves_part_of_a_line() {
        let source = vec![draft(1, 3, None, Some("no onions")), draft(2, 2, None, None)];
        let plan = plan_split(&source, &[input(1, 1, None)]).unwrap();

        assert_eq!(plan.moved, vec![draft(1, 1, None, Some("no onions"))]);
        assert_eq!(
            plan.remaining,
            vec![draft(1, 2, None, Some("no onions")), draft(2, 2, None, None)]
        );
    }

    #[test]
    fn split_drops_fully_moved_lines() {
        let source = vec![draft(1, 1, None, None), draft(2, 2, None, None)];
        let plan = plan_split(&source, &[input(2, 2, None)]).unwrap();
        assert_eq!(plan.remaining, vec![draft(1, 1, None, None)]);
    }

    #[test]
    fn split_matches_default_size_against_no_size() {
        let source = vec![draft(1, 2, None, None)];
        let plan = plan_split(&source, &[input(1, 2, Some("default"))]).unwrap();
        assert!(plan.remaining.is_empty());
    }

    #[test]
    fn split_rejects_overdraft_and_unknown_keys() {
        let source = vec![draft(1, 2, None, None)];

        let err = plan_split(&source, &[input(1, 3, None)]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // Two requests for the same key add up.
        assert!(plan_split(&source, &[input(1, 1, None), input(1, 2, None)]).is_err());

        assert!(plan_split(&source, &[input(1, 1, Some("large"))]).is_err());
        assert!(plan_split(&source, &[]).is_err());
        assert!(plan_split(&source, &[input(1, 0, None)]).is_err());
    }

    #[test]
    fn merge_sums_collisions_and_joins_distinct_notes() {
        let target = vec![draft(1, 1, None, Some("spicy")), draft(2, 1, None, None)];
        let source = vec![
            draft(1, 2, Some("default"), Some("no cilantro")),
            draft(1, 1, None, Some("spicy")),
            draft(3, 4, None, None),
        ];

        let merged = merge_lines(&target, &source).unwrap();

        assert_eq!(
            merged,
            vec![
                draft(1, 4, None, Some("spicy; no cilantro")),
                draft(2, 1, None, None),
                draft(3, 4, None, None),
            ]
        );
    }

    #[test]
    fn merge_rejects_quantities_past_the_line_limit() {
        let huge = vec![draft(1, 2_000_000_000, None, None)];
        assert!(matches!(merge_lines(&huge, &huge), Err(AppError::BadRequest(_))));

        let full = vec![draft(1, MAX_LINE_QUANTITY, None, None)];
        let one = vec![draft(1, 1, None, None)];
        assert!(merge_lines(&full, &one).is_err());
        assert_eq!(merge_lines(&full, &[]).unwrap(), full);
    }

    #[test]
    fn validation_caps_line_quantity() {
        let catalog = catalog();
        assert!(validate_lines(&[input(1, MAX_LINE_QUANTITY, None)], &catalog).is_ok());
        assert!(validate_lines(&[input(1, MAX_LINE_QUANTITY + 1, None)], &catalog).is_err());
    }

    fn lines_strategy() -> impl Strategy<Value = Vec<LineDraft>> {
        prop::collection::vec(
            (1..5i32, 1..6i32, prop::option::of(prop::sample::select(vec!["large", "default"]))),
            0..8,
        )
        .prop_map(|lines| {
            lines
                .into_iter()
                .map(|(item, qty, size)| draft(item, qty, size, None))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn split_conserves_quantities(
            source in lines_strategy().prop_filter("non-empty", |l| !l.is_empty()),
            fractions in prop::collection::vec(0.0f64..=1.0, 8),
        ) {
            let held = quantities(&source);
            let mut keys: Vec<_> = held.keys().cloned().collect();
            keys.sort();

            let requested: Vec<LineInput> = keys
                .iter()
                .zip(fractions.iter())
                .filter_map(|(key, fraction)| {
                    let qty = (held[key] as f64 * fraction).floor() as i32;
                    (qty > 0).then(|| LineInput {
                        item_id: key.item_id,
                        quantity: qty,
                        size: key.size.clone(),
                        note: None,
                    })
                })
                .collect();
            prop_assume!(!requested.is_empty());

            let plan = plan_split(&source, &requested).unwrap();
            let moved = quantities(&plan.moved);
            let remaining = quantities(&plan.remaining);

            for (key, original) in &held {
                let m = moved.get(key).copied().unwrap_or(0);
                let r = remaining.get(key).copied().unwrap_or(0);
                prop_assert_eq!(m + r, *original);
            }
            prop_assert!(plan.remaining.iter().all(|line| line.quantity >= 1));
        }

        #[test]
        fn split_overdraft_is_always_rejected(
            source in lines_strategy().prop_filter("non-empty", |l| !l.is_empty()),
            extra in 1..4i32,
        ) {
            let held = quantities(&source);
            let (key, qty) = held.iter().next().unwrap();
            let request = LineInput {
                item_id: key.item_id,
                quantity: *qty as i32 + extra,
                size: key.size.clone(),
                note: None,
            };
            prop_assert!(plan_split(&source, &[request]).is_err());
        }

        #[test]
        fn merge_conserves_quantities(target in lines_strategy(), source in lines_strategy()) {
            let merged = merge_lines(&target, &source).unwrap();
            let t = quantities(&target);
            let s = quantities(&source);
            let m = quantities(&merged);

            for key in t.keys().chain(s.keys()) {
                let expected = t.get(key).copied().unwrap_or(0) + s.get(key).copied().unwrap_or(0);
                prop_assert_eq!(m[key], expected);
            }
            prop_assert_eq!(m.len(), merged.len());
        }
    }
}
