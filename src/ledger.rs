// src/ledger.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult, NotFound};
use crate::heuristics::items::{categorize, merge_items, next_item_id, sort_newest_first};
use crate::heuristics::{
    Category, CategorySource, ItemOrigin, LineItem, OtherSubcategory, ReceiptTotals,
    round_currency,
};
use crate::settlement::{self, SettlementInput, Summary};

/// Slack for floating-point claim arithmetic.
pub const QUANTITY_EPSILON: f64 = 1e-6;
const MIN_NAME_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub joined_at: String,
}

/// Claims on one item: participant id -> claimed quantity.
pub type ItemClaims = BTreeMap<String, f64>;

/// One shared bill. All mutation goes through the methods below, each of
/// which validates fully before changing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: String,
    pub name: String,
    pub passcode_hash: String,
    pub host_id: Option<String>,
    /// Newest first.
    pub items: Vec<LineItem>,
    pub participants: BTreeMap<String, Participant>,
    /// item id -> participant id -> quantity. Zero claims are never stored.
    pub claims: BTreeMap<String, ItemClaims>,
    pub totals: ReceiptTotals,
    pub version: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimState {
    pub item_id: String,
    pub quantity: f64,
    pub claimed: f64,
    pub remaining: f64,
    pub claims: ItemClaims,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub cost: Option<f64>,
    pub category: Option<Category>,
    pub other_subcategory: Option<OtherSubcategory>,
}

/// Partial update; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemEdit {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub cost: Option<f64>,
    pub category: Option<Category>,
    pub other_subcategory: Option<OtherSubcategory>,
}

/// A claim reduced because its item's quantity shrank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimAdjustment {
    pub participant_id: String,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditOutcome {
    pub item: LineItem,
    pub adjustments: Vec<ClaimAdjustment>,
}

fn cost_tolerance(expected: f64) -> f64 {
    f64::max(1.0, 0.05 * expected.abs())
}

fn check_name(name: &str) -> LedgerResult<String> {
    let trimmed = name.trim();
    if trimmed.chars().count() < MIN_NAME_CHARS {
        return Err(LedgerError::InvalidItem(format!(
            "item name must have at least {MIN_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn check_non_negative(field: &str, value: f64) -> LedgerResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(LedgerError::InvalidItem(format!("{field} must be a non-negative number")));
    }
    Ok(value)
}

fn check_positive(field: &str, value: f64) -> LedgerResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LedgerError::InvalidItem(format!("{field} must be greater than zero")));
    }
    Ok(value)
}

fn check_positive_quantity(quantity: f64) -> LedgerResult<f64> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(LedgerError::InvalidItem("quantity must be greater than zero".into()));
    }
    Ok(quantity)
}

fn resolve_subcategory(
    category: Category,
    requested: Option<OtherSubcategory>,
) -> LedgerResult<Option<OtherSubcategory>> {
    match (category, requested) {
        (Category::Other, sub) => Ok(sub),
        (_, None) => Ok(None),
        (_, Some(_)) => Err(LedgerError::InvalidItem(
            "a subcategory can only be set on items in the other category".into(),
        )),
    }
}

impl Lobby {
    /// A new lobby over the valid subset of `items`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        passcode_hash: impl Into<String>,
        items: Vec<LineItem>,
        totals: ReceiptTotals,
        created_at: impl Into<String>,
    ) -> LedgerResult<Self> {
        let id = id.into();
        let (valid, invalid): (Vec<LineItem>, Vec<LineItem>) =
            items.into_iter().partition(LineItem::is_valid);
        for item in &invalid {
            warn!(lobby_id = %id, item_id = %item.id, cost = item.cost, "Skipping invalid item");
        }
        let items = merge_items(&[], &valid);
        if items.is_empty() {
            return Err(LedgerError::InvalidItem(
                "a lobby needs at least one item with a positive cost".into(),
            ));
        }

        Ok(Self {
            id,
            name: name.into(),
            passcode_hash: passcode_hash.into(),
            host_id: None,
            items,
            participants: BTreeMap::new(),
            claims: BTreeMap::new(),
            totals,
            version: 1,
            created_at: created_at.into(),
        })
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    pub fn item(&self, item_id: &str) -> LedgerResult<&LineItem> {
        self.items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| NotFound::Item(item_id.to_string()).into())
    }

    fn item_index(&self, item_id: &str) -> LedgerResult<usize> {
        self.items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| NotFound::Item(item_id.to_string()).into())
    }

    pub fn participant(&self, participant_id: &str) -> LedgerResult<&Participant> {
        self.participants
            .get(participant_id)
            .ok_or_else(|| NotFound::Participant(participant_id.to_string()).into())
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.host_id.as_deref() == Some(participant_id)
    }

    /// The participant must exist and be the lobby host.
    pub fn require_host(&self, participant_id: &str) -> LedgerResult<()> {
        self.participant(participant_id)?;
        if !self.is_host(participant_id) {
            return Err(LedgerError::Unauthorized {
                participant_id: participant_id.to_string(),
            });
        }
        Ok(())
    }

    /// Register a participant. The first one to join becomes the host.
    pub fn add_participant(
        &mut self,
        participant_id: impl Into<String>,
        name: &str,
        joined_at: impl Into<String>,
    ) -> bool {
        let id = participant_id.into();
        let name = match name.trim() {
            "" => format!("Guest {}", self.participants.len() + 1),
            trimmed => trimmed.to_string(),
        };
        let is_host = self.host_id.is_none();
        if is_host {
            self.host_id = Some(id.clone());
        }
        self.participants.insert(
            id.clone(),
            Participant {
                id,
                name,
                joined_at: joined_at.into(),
            },
        );
        self.touch();
        is_host
    }

    pub fn claimed_quantity(&self, item_id: &str) -> f64 {
        self.claims
            .get(item_id)
            .map(|c| c.values().sum())
            .unwrap_or(0.0)
    }

    pub fn claim_state(&self, item_id: &str) -> LedgerResult<ClaimState> {
        let item = self.item(item_id)?;
        let claims = self.claims.get(item_id).cloned().unwrap_or_default();
        let claimed: f64 = claims.values().sum();
        Ok(ClaimState {
            item_id: item_id.to_string(),
            quantity: item.quantity,
            claimed,
            remaining: (item.quantity - claimed).max(0.0),
            claims,
        })
    }

    /// Set (not add to) a participant's claim on an item. Zero removes it.
    pub fn set_claim(
        &mut self,
        participant_id: &str,
        item_id: &str,
        quantity: f64,
    ) -> LedgerResult<ClaimState> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(LedgerError::InvalidQuantity {
                item_id: item_id.to_string(),
                quantity,
                reason: "must be a finite, non-negative number",
            });
        }
        let item = self.item(item_id)?;
        self.participant(participant_id)?;

        if item.has_whole_quantity() && (quantity - quantity.round()).abs() > QUANTITY_EPSILON {
            return Err(LedgerError::InvalidQuantity {
                item_id: item_id.to_string(),
                quantity,
                reason: "item is sold in whole units",
            });
        }

        let existing = self
            .claims
            .get(item_id)
            .and_then(|c| c.get(participant_id))
            .copied();
        let others: f64 = self
            .claims
            .get(item_id)
            .map(|c| {
                c.iter()
                    .filter(|(pid, _)| pid.as_str() != participant_id)
                    .map(|(_, q)| *q)
                    .sum()
            })
            .unwrap_or(0.0);

        if others + quantity > item.quantity + QUANTITY_EPSILON {
            return Err(LedgerError::OverClaim {
                item_id: item_id.to_string(),
                requested: quantity,
                available: (item.quantity - others).max(0.0),
            });
        }

        let unchanged = match existing {
            Some(current) => (current - quantity).abs() <= QUANTITY_EPSILON,
            None => quantity <= QUANTITY_EPSILON,
        };
        if unchanged {
            debug!(lobby_id = %self.id, item_id, participant_id, "Claim unchanged");
            return self.claim_state(item_id);
        }

        let entry = self.claims.entry(item_id.to_string()).or_default();
        if quantity <= QUANTITY_EPSILON {
            entry.remove(participant_id);
        } else {
            entry.insert(participant_id.to_string(), quantity);
        }
        if entry.is_empty() {
            self.claims.remove(item_id);
        }
        self.touch();
        self.claim_state(item_id)
    }

    /// Clear every claim on an item, or only one participant's.
    pub fn reset_claims(
        &mut self,
        item_id: &str,
        participant_id: Option<&str>,
    ) -> LedgerResult<ClaimState> {
        self.item(item_id)?;
        if let Some(pid) = participant_id {
            self.participant(pid)?;
        }

        let changed = match participant_id {
            None => self.claims.remove(item_id).is_some(),
            Some(pid) => {
                let removed = self
                    .claims
                    .get_mut(item_id)
                    .is_some_and(|claims| claims.remove(pid).is_some());
                if self.claims.get(item_id).is_some_and(BTreeMap::is_empty) {
                    self.claims.remove(item_id);
                }
                removed
            }
        };
        if changed {
            self.touch();
        }
        self.claim_state(item_id)
    }

    /// Add an item by hand. An explicit cost is authoritative.
    pub fn add_item(&mut self, new: NewItem) -> LedgerResult<LineItem> {
        let name = check_name(&new.name)?;
        let quantity = check_positive_quantity(new.quantity.unwrap_or(1.0))?;
        let unit = new
            .unit_price
            .map(|u| check_non_negative("unit price", u))
            .transpose()?
            .unwrap_or(0.0);

        let (unit_price, cost) = match new.cost {
            Some(cost) => {
                let cost = check_non_negative("cost", cost)?;
                if cost <= 0.0 {
                    return Err(LedgerError::InvalidItem("cost must be greater than zero".into()));
                }
                let derived = cost / quantity;
                let unit = if unit <= 0.0 || (quantity * unit - cost).abs() > cost_tolerance(cost)
                {
                    derived
                } else {
                    unit
                };
                (unit, cost)
            }
            None => {
                if unit <= 0.0 {
                    return Err(LedgerError::InvalidItem(
                        "either a cost or a positive unit price is required".into(),
                    ));
                }
                (unit, round_currency(quantity * unit))
            }
        };

        let (category, category_source) = match new.category {
            Some(c) => (c, CategorySource::UserSelected),
            None => (categorize(&name), CategorySource::Inferred),
        };
        let other_subcategory = resolve_subcategory(category, new.other_subcategory)?;

        let item = LineItem {
            id: next_item_id(&self.items),
            name,
            quantity,
            unit_price,
            cost: round_currency(cost),
            category,
            category_source,
            other_subcategory,
            origin: ItemOrigin::Manual,
        };
        self.items.push(item.clone());
        sort_newest_first(&mut self.items);
        self.touch();
        Ok(item)
    }

    /// Edit an item. Shrinking its quantity below what is claimed trims the
    /// largest claims first (ties by participant id) and reports each change.
    pub fn edit_item(&mut self, item_id: &str, edit: ItemEdit) -> LedgerResult<EditOutcome> {
        let index = self.item_index(item_id)?;
        let current = &self.items[index];

        let name = edit.name.as_deref().map(check_name).transpose()?;
        let quantity = edit
            .quantity
            .map(check_positive_quantity)
            .transpose()?
            .unwrap_or(current.quantity);
        let unit = edit
            .unit_price
            .map(|u| check_positive("unit price", u))
            .transpose()?;
        let cost = edit.cost.map(|c| check_positive("cost", c)).transpose()?;

        let whole = (quantity - quantity.round()).abs() < QUANTITY_EPSILON;
        if whole
            && self
                .claims
                .get(item_id)
                .is_some_and(|c| c.values().any(|q| (q - q.round()).abs() > QUANTITY_EPSILON))
        {
            return Err(LedgerError::InvalidQuantity {
                item_id: item_id.to_string(),
                quantity,
                reason: "fractional claims must be reset before the item becomes whole-unit",
            });
        }

        let (unit_price, cost) = match (unit, cost) {
            (Some(u), Some(c)) => {
                let expected = quantity * u;
                if (c - expected).abs() > cost_tolerance(expected) {
                    return Err(LedgerError::InvalidItem(format!(
                        "cost {c:.2} does not match quantity x unit price ({expected:.2})"
                    )));
                }
                (u, c)
            }
            (Some(u), None) => (u, round_currency(quantity * u)),
            (None, Some(c)) => (c / quantity, c),
            (None, None) if edit.quantity.is_some() && current.unit_price > 0.0 => (
                current.unit_price,
                round_currency(quantity * current.unit_price),
            ),
            (None, None) => (current.unit_price, current.cost),
        };
        if round_currency(cost) <= 0.0 {
            return Err(LedgerError::InvalidItem("cost must be greater than zero".into()));
        }

        let (category, category_source) = match edit.category {
            Some(c) => (c, CategorySource::UserSelected),
            None => (current.category, current.category_source),
        };
        let other_subcategory = match edit.other_subcategory {
            Some(sub) => resolve_subcategory(category, Some(sub))?,
            None if category == Category::Other => current.other_subcategory,
            None => None,
        };

        let mut item = current.clone();
        if let Some(name) = name {
            item.name = name;
        }
        item.quantity = quantity;
        item.unit_price = unit_price;
        item.cost = round_currency(cost);
        item.category = category;
        item.category_source = category_source;
        item.other_subcategory = other_subcategory;

        let adjustments = self.clamp_claims(item_id, quantity);
        for adj in &adjustments {
            warn!(
                lobby_id = %self.id,
                item_id,
                participant_id = %adj.participant_id,
                from = adj.previous,
                to = adj.current,
                "Claim reduced by quantity edit"
            );
        }
        self.items[index] = item.clone();
        self.touch();
        Ok(EditOutcome { item, adjustments })
    }

    fn clamp_claims(&mut self, item_id: &str, quantity: f64) -> Vec<ClaimAdjustment> {
        let Some(claims) = self.claims.get_mut(item_id) else {
            return Vec::new();
        };
        let claimed: f64 = claims.values().sum();
        let mut excess = claimed - quantity;
        if excess <= QUANTITY_EPSILON {
            return Vec::new();
        }

        let mut order: Vec<(String, f64)> = claims.iter().map(|(p, q)| (p.clone(), *q)).collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut adjustments = Vec::new();
        for (pid, previous) in order {
            if excess <= QUANTITY_EPSILON {
                break;
            }
            let take = f64::min(excess, previous);
            let current = previous - take;
            excess -= take;
            if current <= QUANTITY_EPSILON {
                claims.remove(&pid);
            } else {
                claims.insert(pid.clone(), current);
            }
            adjustments.push(ClaimAdjustment {
                participant_id: pid,
                previous,
                current: current.max(0.0),
            });
        }
        if claims.is_empty() {
            self.claims.remove(item_id);
        }
        adjustments
    }

    pub fn settlement_input(&self) -> SettlementInput<'_> {
        SettlementInput {
            lobby_id: &self.id,
            lobby_name: &self.name,
            items: &self.items,
            totals: &self.totals,
            participants: &self.participants,
            claims: &self.claims,
        }
    }

    pub fn summary(&self) -> Summary {
        settlement::compute_summary(&self.settlement_input())
    }
}
