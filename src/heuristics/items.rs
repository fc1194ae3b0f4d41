// src/heuristics/items.rs

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{Amount, ItemCandidate, LineClass, NormalizedLine};
use super::rules::{RuleKind, RuleTable};
use super::totals::{ReviewKind, ReviewReason};
use super::{Category, CategorySource, ItemOrigin, LineItem, OtherSubcategory, round_currency};

pub const MAX_ITEM_QUANTITY: f64 = 25.0;
const MAX_INFERRED_QUANTITY: f64 = 20.0;
const MIN_ITEM_COST: f64 = 0.5;
const MIN_NAME_CHARS: usize = 2;
const SUSPICIOUS_QUANTITY: f64 = 12.0;
const SUSPICIOUS_UNIT_PRICE: f64 = 15.0;

// ----------------------------------------------------------------------------
// Category vocabulary
// ----------------------------------------------------------------------------

const DRINK_WORDS: &[&str] = &[
    "water", "coffee", "tea", "chai", "lassi", "juice", "soda", "cola", "coke", "sprite", "pepsi",
    "beer", "wine", "whisky", "whiskey", "rum", "vodka", "cocktail", "mocktail", "mojito",
    "panna", "shake", "milkshake", "buttermilk",
];

const NON_VEG_WORDS: &[&str] = &[
    "non veg", "nonveg", "chicken", "mutton", "lamb", "fish", "prawn", "prawns", "crab", "egg",
    "keema", "tikka", "kebab", "kabab", "seafood", "maas", "chx",
];

const VEG_WORDS: &[&str] = &[
    "paneer", "veg", "vegetable", "dal", "roti", "naan", "chapati", "paratha", "idli", "dosa",
    "vada", "poori", "pulao", "rice", "mushroom", "gobi", "aloo", "chana", "rajma", "kofta",
];

const SUBCATEGORY_HINTS: &[(OtherSubcategory, &[&str])] = &[
    (
        OtherSubcategory::Starter,
        &["roll", "soup", "tikka", "kebab", "pakora", "chilli", "manchow", "manchurian"],
    ),
    (
        OtherSubcategory::MainCourse,
        &["curry", "masala", "gravy", "kofta", "biryani", "meal", "thali", "paneer"],
    ),
    (
        OtherSubcategory::Bread,
        &["naan", "roti", "chapati", "paratha", "kulcha"],
    ),
    (
        OtherSubcategory::Rice,
        &["rice", "pulao", "biryani", "fried rice"],
    ),
    (
        OtherSubcategory::Dessert,
        &["halwa", "gulab", "jamun", "ice cream", "kheer", "rabdi", "sweet"],
    ),
    (
        OtherSubcategory::Snack,
        &["vada", "idli", "dosa", "bhel", "poori", "chaat"],
    ),
    (
        OtherSubcategory::Side,
        &["water", "papad", "salad", "pickle", "curd", "raita"],
    ),
];

fn word_haystack(name: &str) -> String {
    let spaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", spaced.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn mentions_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(&format!(" {w} ")))
}

/// Drinks first, then non-veg, then veg.
pub fn categorize(name: &str) -> Category {
    let haystack = word_haystack(name);
    if mentions_any(&haystack, DRINK_WORDS) {
        Category::Drinks
    } else if mentions_any(&haystack, NON_VEG_WORDS) {
        Category::NonVeg
    } else if mentions_any(&haystack, VEG_WORDS) {
        Category::Veg
    } else {
        Category::Other
    }
}

/// Subcategories worth offering for an `other` item, in display order.
pub fn suggest_other_subcategories(name: &str) -> Vec<OtherSubcategory> {
    let haystack = word_haystack(name);
    SUBCATEGORY_HINTS
        .iter()
        .filter(|(_, hints)| mentions_any(&haystack, hints))
        .map(|(sub, _)| *sub)
        .collect()
}

// ----------------------------------------------------------------------------
// Quantity / price resolution
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolved {
    quantity: f64,
    unit_price: f64,
    cost: f64,
    cost_mismatch: bool,
}

fn near_integer(value: f64) -> bool {
    (value - value.round()).abs() <= 0.02
}

fn cost_tolerance(cost: f64) -> f64 {
    f64::max(1.0, 0.05 * cost.abs())
}

fn resolve_candidate(candidate: &ItemCandidate) -> Option<Resolved> {
    match candidate.numbers.as_slice() {
        [a, b, c] => Some(resolve_three(*a, *b, *c)),
        [a, c] => Some(resolve_two(*a, *c)),
        [c] => {
            let quantity = candidate.quantity_hint.unwrap_or(1.0);
            Some(Resolved {
                quantity,
                unit_price: c.value / quantity,
                cost: c.value,
                cost_mismatch: false,
            })
        }
        _ => None,
    }
}

/// `qty rate amount` or `rate qty amount`. The product of quantity and unit
/// price is authoritative; the printed amount only cross-checks it.
fn resolve_three(a: Amount, b: Amount, c: Amount) -> Resolved {
    let fits = |x: &Amount| x.value > 0.0 && x.value <= MAX_ITEM_QUANTITY;
    let (qty, unit) = if a.is_count_like() && fits(&a) {
        (a, b)
    } else if b.is_count_like() && fits(&b) {
        (b, a)
    } else if a.is_whole() && fits(&a) {
        (a, b)
    } else if b.is_whole() && fits(&b) {
        (b, a)
    } else {
        (a, b)
    };

    let cost = round_currency(qty.value * unit.value);
    Resolved {
        quantity: qty.value,
        unit_price: unit.value,
        cost,
        cost_mismatch: (cost - c.value).abs() > cost_tolerance(c.value),
    }
}

/// `qty amount` or `rate amount`.
fn resolve_two(a: Amount, c: Amount) -> Resolved {
    let cost = c.value;
    let ratio = if a.value > 0.0 { cost / a.value } else { 0.0 };
    let ratio_is_count =
        near_integer(ratio) && ratio.round() >= 1.0 && ratio.round() <= MAX_INFERRED_QUANTITY;

    // "Chai 10 20" reads as two at ten, not ten at two.
    if a.is_count_like()
        && a.value <= MAX_ITEM_QUANTITY
        && !(ratio_is_count && ratio.round() < a.value)
    {
        return Resolved {
            quantity: a.value,
            unit_price: cost / a.value,
            cost,
            cost_mismatch: false,
        };
    }

    if ratio_is_count {
        let quantity = ratio.round();
        Resolved {
            quantity,
            unit_price: cost / quantity,
            cost,
            cost_mismatch: false,
        }
    } else {
        Resolved {
            quantity: 1.0,
            unit_price: cost,
            cost,
            cost_mismatch: true,
        }
    }
}

fn implausibility(name: &str, r: &Resolved) -> Option<&'static str> {
    if name.trim().chars().count() < MIN_NAME_CHARS {
        Some("name too short")
    } else if !r.cost.is_finite() || r.cost < MIN_ITEM_COST {
        Some("cost below minimum")
    } else if !(r.quantity > 0.0) || r.quantity > MAX_ITEM_QUANTITY {
        Some("quantity out of range")
    } else if r.quantity > 15.0 && r.unit_price < 10.0 {
        Some("large quantity at a very low price")
    } else {
        None
    }
}

fn build_item(index: usize, name: &str, r: &Resolved) -> LineItem {
    LineItem {
        id: format!("itm_{index}"),
        name: name.to_string(),
        quantity: r.quantity,
        unit_price: r.unit_price,
        cost: round_currency(r.cost),
        category: categorize(name),
        category_source: CategorySource::Inferred,
        other_subcategory: None,
        origin: ItemOrigin::Receipt,
    }
}

// ----------------------------------------------------------------------------
// Extraction
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ItemExtraction {
    pub items: Vec<LineItem>,
    pub reasons: Vec<ReviewReason>,
}

impl ItemExtraction {
    fn accept(&mut self, line: Option<&str>, name: &str, resolved: Resolved) {
        if resolved.cost_mismatch {
            self.reasons.push(ReviewReason::new(
                ReviewKind::ItemCostMismatch,
                line.map(str::to_string),
                format!(
                    "{name}: quantity and unit price do not agree with the printed amount"
                ),
            ));
        }
        if resolved.quantity > SUSPICIOUS_QUANTITY && resolved.unit_price < SUSPICIOUS_UNIT_PRICE {
            self.reasons.push(ReviewReason::new(
                ReviewKind::SuspiciousQuantity,
                line.map(str::to_string),
                format!("{name}: quantity {} at {:.2} each", resolved.quantity, resolved.unit_price),
            ));
        }
        let item = build_item(self.items.len() + 1, name, &resolved);
        debug!(id = %item.id, name = %item.name, qty = item.quantity, cost = item.cost, "Item extracted");
        self.items.push(item);
    }

    fn reject(&mut self, kind: ReviewKind, line: Option<&str>, detail: String) {
        debug!(?kind, detail = %detail, "Item candidate rejected");
        self.reasons.push(ReviewReason::new(kind, line.map(str::to_string), detail));
    }
}

/// Resolve every item candidate into a `LineItem`, in order of appearance.
pub fn extract_items(lines: &[(NormalizedLine, LineClass)], rules: &RuleTable) -> ItemExtraction {
    let mut out = ItemExtraction::default();
    let mut totals_seen = false;

    for (line, class) in lines {
        let candidate = match class {
            LineClass::Totals(t) => {
                if matches!(t.kind, RuleKind::Subtotal | RuleKind::GrandTotal) {
                    totals_seen = true;
                }
                continue;
            }
            LineClass::Item(candidate) => candidate,
            LineClass::Noise(_) => continue,
        };

        if rules.mentions_totals(&candidate.name) {
            debug!(name = %candidate.name, "Dropping totals wording from items");
            continue;
        }
        let Some(resolved) = resolve_candidate(candidate) else {
            continue;
        };
        if let Some(why) = implausibility(&candidate.name, &resolved) {
            out.reject(
                ReviewKind::ItemRejected,
                Some(&line.text),
                format!("{}: {why}", candidate.name),
            );
            continue;
        }
        if totals_seen {
            out.reject(
                ReviewKind::ItemAfterTotals,
                Some(&line.text),
                format!("{} appears after the totals section", candidate.name),
            );
            continue;
        }
        out.accept(Some(&line.text), &candidate.name, resolved);
    }
    out
}

/// An item as reported by an external extractor, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalItem {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Apply the same resolution and plausibility rules to externally extracted items.
pub fn normalize_external_items(raw: &[ExternalItem], rules: &RuleTable) -> ItemExtraction {
    let mut out = ItemExtraction::default();
    for item in raw {
        let name = super::classifier::clean_item_name(&item.name);
        if rules.mentions_totals(&name) {
            continue;
        }
        let quantity = item.quantity.filter(|q| *q > 0.0).unwrap_or(1.0);
        let unit = item.unit_price.filter(|u| *u > 0.0);
        let printed = item.cost.filter(|c| *c > 0.0);

        let resolved = match (unit, printed) {
            (Some(u), printed) => {
                let cost = round_currency(quantity * u);
                Resolved {
                    quantity,
                    unit_price: u,
                    cost,
                    cost_mismatch: printed.is_some_and(|p| (cost - p).abs() > cost_tolerance(p)),
                }
            }
            (None, Some(cost)) => Resolved {
                quantity,
                unit_price: cost / quantity,
                cost,
                cost_mismatch: false,
            },
            (None, None) => {
                out.reject(
                    ReviewKind::ItemRejected,
                    None,
                    format!("{name}: no price"),
                );
                continue;
            }
        };
        if let Some(why) = implausibility(&name, &resolved) {
            out.reject(ReviewKind::ItemRejected, None, format!("{name}: {why}"));
            continue;
        }
        out.accept(None, &name, resolved);
    }
    out
}

// ----------------------------------------------------------------------------
// Identity, ordering, merging
// ----------------------------------------------------------------------------

fn numeric_suffix(id: &str) -> Option<u64> {
    let digits: String = id
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Newest first: larger numeric suffix first; ids with a suffix before ids
/// without one; the rest reverse-lexicographic.
pub fn compare_ids_newest_first(a: &str, b: &str) -> Ordering {
    match (numeric_suffix(a), numeric_suffix(b)) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

pub fn sort_newest_first(items: &mut [LineItem]) {
    items.sort_by(|a, b| compare_ids_newest_first(&a.id, &b.id));
}

pub fn next_item_id(items: &[LineItem]) -> String {
    let max = items
        .iter()
        .filter_map(|i| numeric_suffix(&i.id))
        .max()
        .unwrap_or(0);
    format!("itm_{}", max + 1)
}

/// Merge by id; a later record for the same id replaces the earlier one.
pub fn merge_items(existing: &[LineItem], incoming: &[LineItem]) -> Vec<LineItem> {
    let mut by_id: BTreeMap<&str, &LineItem> = BTreeMap::new();
    for item in existing.iter().chain(incoming) {
        by_id.insert(item.id.as_str(), item);
    }
    let mut merged: Vec<LineItem> = by_id.into_values().cloned().collect();
    sort_newest_first(&mut merged);
    merged
}

fn name_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// `base` plus every `extra` item whose name is not already present, renumbered
/// after the highest id in `base`.
pub fn merge_unique_by_name(base: &[LineItem], extra: &[LineItem]) -> Vec<LineItem> {
    let mut seen: HashSet<String> = base.iter().map(|i| name_key(&i.name)).collect();
    let mut merged = base.to_vec();
    for item in extra {
        let key = name_key(&item.name);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        let mut added = item.clone();
        added.id = next_item_id(&merged);
        merged.push(added);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::classifier::{classify, normalize_line};

    fn classified(raw: &[&str]) -> Vec<(NormalizedLine, LineClass)> {
        let rules = RuleTable::defaults();
        raw.iter()
            .enumerate()
            .filter_map(|(i, l)| normalize_line(i, l))
            .map(|l| {
                let class = classify(&l, &rules);
                (l, class)
            })
            .collect()
    }

    fn extract(raw: &[&str]) -> ItemExtraction {
        extract_items(&classified(raw), &RuleTable::defaults())
    }

    fn item(id: &str, name: &str) -> LineItem {
        LineItem {
            id: id.to_string(),
            name: name.to_string(),
            quantity: 1.0,
            unit_price: 10.0,
            cost: 10.0,
            category: Category::Other,
            category_source: CategorySource::Inferred,
            other_subcategory: None,
            origin: ItemOrigin::Receipt,
        }
    }

    #[test]
    fn test_three_column_item() {
        let out = extract(&["Paneer Masala 2 180.00 360.00"]);
        assert_eq!(out.items.len(), 1);
        let it = &out.items[0];
        assert_eq!(it.id, "itm_1");
        assert_eq!(it.quantity, 2.0);
        assert_eq!(it.unit_price, 180.0);
        assert_eq!(it.cost, 360.0);
        assert_eq!(it.category, Category::Veg);
        assert!(out.reasons.is_empty());
    }

    #[test]
    fn test_rate_before_quantity() {
        let out = extract(&["Butter Naan 45.00 3 135.00"]);
        let it = &out.items[0];
        assert_eq!(it.quantity, 3.0);
        assert_eq!(it.unit_price, 45.0);
        assert_eq!(it.cost, 135.0);
    }

    #[test]
    fn test_product_is_authoritative_and_mismatch_flagged() {
        let out = extract(&["Masala Dosa 2 90.00 150.00"]);
        assert_eq!(out.items[0].cost, 180.0);
        assert!(out.reasons.iter().any(|r| r.kind == ReviewKind::ItemCostMismatch));
    }

    #[test]
    fn test_two_numbers_quantity_and_cost() {
        let out = extract(&["Veg Pulao 2 300.00"]);
        let it = &out.items[0];
        assert_eq!(it.quantity, 2.0);
        assert_eq!(it.unit_price, 150.0);
        assert_eq!(it.cost, 300.0);
    }

    #[test]
    fn test_two_numbers_price_and_cost_infers_quantity() {
        let out = extract(&["Fresh Lime Soda 60.00 120.00"]);
        let it = &out.items[0];
        assert_eq!(it.quantity, 2.0);
        assert_eq!(it.unit_price, 60.0);
        assert_eq!(it.category, Category::Drinks);

        let out = extract(&["Chai 10 20"]);
        assert_eq!(out.items[0].quantity, 2.0);
        assert_eq!(out.items[0].unit_price, 10.0);
    }

    #[test]
    fn test_glued_quantity_and_price() {
        let out = extract(&["Veg Biryani 260.00 120.00"]);
        let it = &out.items[0];
        assert_eq!(it.quantity, 2.0);
        assert_eq!(it.unit_price, 60.0);
        assert_eq!(it.cost, 120.0);
    }

    #[test]
    fn test_single_amount_uses_quantity_hint() {
        let out = extract(&["2 x Coke 120.00"]);
        let it = &out.items[0];
        assert_eq!(it.name, "Coke");
        assert_eq!(it.quantity, 2.0);
        assert_eq!(it.unit_price, 60.0);
        assert_eq!(it.cost, 120.0);
    }

    #[test]
    fn test_implausible_rows_rejected() {
        let out = extract(&["Napkins 30 0.20 6.00", "X 1 50.00 50.00", "Mint 0.30"]);
        assert!(out.items.is_empty());
        assert_eq!(
            out.reasons.iter().filter(|r| r.kind == ReviewKind::ItemRejected).count(),
            3
        );
    }

    #[test]
    fn test_suspicious_quantity_is_reported_not_rejected() {
        let out = extract(&["Mineral Water 14 12.00 168.00"]);
        assert_eq!(out.items.len(), 1);
        assert!(out.reasons.iter().any(|r| r.kind == ReviewKind::SuspiciousQuantity));
    }

    #[test]
    fn test_items_after_totals_are_unresolved() {
        let out = extract(&[
            "Gulab Jamun 2 40.00 80.00",
            "Sub Total 80.00",
            "Kulfi 1 60.00 60.00",
        ]);
        assert_eq!(out.items.len(), 1);
        assert!(out.reasons.iter().any(|r| r.kind == ReviewKind::ItemAfterTotals));
    }

    #[test]
    fn test_ids_follow_appearance_order() {
        let out = extract(&["Tea 1 20.00 20.00", "Coffee 1 30.00 30.00", "Samosa 2 15.00 30.00"]);
        let ids: Vec<&str> = out.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["itm_1", "itm_2", "itm_3"]);
    }

    #[test]
    fn test_categorize_uses_whole_words() {
        assert_eq!(categorize("Chicken Biryani"), Category::NonVeg);
        assert_eq!(categorize("Masala Chai"), Category::Drinks);
        assert_eq!(categorize("Steak Sandwich"), Category::Other);
        assert_eq!(categorize("Non Veg Platter"), Category::NonVeg);
        assert_eq!(categorize("Dal Makhani"), Category::Veg);
    }

    #[test]
    fn test_subcategory_suggestions() {
        assert_eq!(
            suggest_other_subcategories("Veg Fried Rice"),
            vec![OtherSubcategory::Rice]
        );
        assert_eq!(
            suggest_other_subcategories("Chicken Biryani"),
            vec![OtherSubcategory::MainCourse, OtherSubcategory::Rice]
        );
        assert!(suggest_other_subcategories("Garlic Bread").is_empty());
    }

    #[test]
    fn test_newest_first_ordering() {
        let mut items = vec![
            item("itm_2", "a"),
            item("custom", "b"),
            item("itm_10", "c"),
            item("extra", "d"),
            item("itm_1", "e"),
        ];
        sort_newest_first(&mut items);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["itm_10", "itm_2", "itm_1", "extra", "custom"]);
    }

    #[test]
    fn test_merge_last_record_wins() {
        let existing = vec![item("itm_1", "Tea"), item("itm_2", "Coffee")];
        let mut updated = item("itm_1", "Masala Tea");
        updated.cost = 25.0;
        let merged = merge_items(&existing, &[updated, item("itm_3", "Lassi")]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "itm_3");
        let tea = merged.iter().find(|i| i.id == "itm_1").unwrap();
        assert_eq!(tea.name, "Masala Tea");
        assert_eq!(tea.cost, 25.0);
    }

    #[test]
    fn test_next_item_id_follows_highest_suffix() {
        let items = vec![item("itm_3", "a"), item("itm_11", "b"), item("custom", "c")];
        assert_eq!(next_item_id(&items), "itm_12");
        assert_eq!(next_item_id(&[]), "itm_1");
    }

    #[test]
    fn test_merge_unique_by_name_skips_duplicates() {
        let base = vec![item("itm_1", "Veg Pulao"), item("itm_2", "Raita")];
        let extra = vec![item("itm_1", "veg pulao"), item("itm_2", "Papad")];
        let merged = merge_unique_by_name(&base, &extra);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].name, "Papad");
        assert_eq!(merged[2].id, "itm_3");
    }

    #[test]
    fn test_external_items_follow_same_rules() {
        let raw = vec![
            ExternalItem {
                name: "Paneer Butter Masala".into(),
                quantity: Some(2.0),
                unit_price: Some(220.0),
                cost: Some(440.0),
            },
            ExternalItem {
                name: "Sub Total".into(),
                quantity: None,
                unit_price: None,
                cost: Some(440.0),
            },
            ExternalItem {
                name: "Jeera Rice".into(),
                quantity: None,
                unit_price: None,
                cost: Some(150.0),
            },
        ];
        let out = normalize_external_items(&raw, &RuleTable::defaults());
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].cost, 440.0);
        assert_eq!(out.items[1].quantity, 1.0);
        assert_eq!(out.items[1].unit_price, 150.0);
    }
}
