// src/settlement.rs
//
// Per-participant amounts owed. Pure: reads a lobby snapshot, never mutates.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::heuristics::items::compare_ids_newest_first;
use crate::heuristics::totals::ReviewTolerances;
use crate::heuristics::{ItemOrigin, LineItem, ReceiptTotals, TaxLine, round_currency};
use crate::ledger::{ItemClaims, Participant};

/// How a claimed quantity is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// Every item carries a unit price; amounts are quantity x unit price.
    UnitPrice,
    /// Some item lacks one; amounts are the claimed fraction of the line cost.
    LineCost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedLine {
    pub item_id: String,
    pub name: String,
    pub quantity: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantShare {
    pub participant_id: String,
    pub name: String,
    pub base_total: f64,
    pub extra_share: f64,
    pub total: f64,
    pub lines: Vec<ClaimedLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub lobby_id: String,
    pub lobby_name: String,
    pub pricing_mode: PricingMode,
    pub item_subtotal: f64,
    /// Tax, service and round-off less any discount, spread by base share.
    pub extra_charges: f64,
    pub grand_total: f64,
    pub claimed_base_total: f64,
    pub claimed_total: f64,
    pub unclaimed_item_total: f64,
    pub unclaimed_total: f64,
    pub claim_progress_pct: f64,
    pub tax_breakdown: Vec<TaxLine>,
    pub participants: Vec<ParticipantShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactShare {
    pub name: String,
    pub total: f64,
}

/// Just the numbers a phone screen needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactSummary {
    pub lobby_id: String,
    pub grand_total: f64,
    pub claimed_total: f64,
    pub unclaimed_total: f64,
    pub claim_progress_pct: f64,
    pub participants: Vec<CompactShare>,
}

/// Borrowed view of everything a settlement needs.
#[derive(Debug, Clone, Copy)]
pub struct SettlementInput<'a> {
    pub lobby_id: &'a str,
    pub lobby_name: &'a str,
    pub items: &'a [LineItem],
    pub totals: &'a ReceiptTotals,
    pub participants: &'a BTreeMap<String, Participant>,
    pub claims: &'a BTreeMap<String, ItemClaims>,
}

fn pricing_mode(items: &[&LineItem]) -> PricingMode {
    if !items.is_empty() && items.iter().all(|i| i.unit_price > 0.0) {
        PricingMode::UnitPrice
    } else {
        PricingMode::LineCost
    }
}

fn unit_value(item: &LineItem, mode: PricingMode) -> f64 {
    match mode {
        PricingMode::UnitPrice => item.unit_price,
        PricingMode::LineCost => item.cost / item.quantity,
    }
}

/// Charges on top of the items, negative when a discount outweighs them.
/// A detected grand total (plus anything added by hand, which the printed
/// receipt never saw) wins unless it falls below the subtotal by more than
/// the detected discount and the grand-total band; such a total is a review
/// matter, so the detected components are used instead.
fn extra_charges(input: &SettlementInput<'_>, valid: &[&LineItem], mode: PricingMode, subtotal: f64) -> f64 {
    let manual: f64 = valid
        .iter()
        .filter(|i| i.origin == ItemOrigin::Manual)
        .map(|i| i.quantity * unit_value(i, mode))
        .sum();
    let discount = input.totals.detected_discount.unwrap_or(0.0);
    let floor = subtotal - discount - ReviewTolerances::default().grand_total_band(subtotal);
    match input.totals.detected_grand_total {
        Some(grand) if grand + manual >= floor => grand + manual - subtotal,
        _ => input.totals.charge_components() - discount,
    }
}

pub fn compute_summary(input: &SettlementInput<'_>) -> Summary {
    let valid: Vec<&LineItem> = input.items.iter().filter(|i| i.is_valid()).collect();
    let mode = pricing_mode(&valid);
    let by_id: BTreeMap<&str, &LineItem> = valid.iter().map(|i| (i.id.as_str(), *i)).collect();

    let item_subtotal: f64 = valid.iter().map(|i| i.quantity * unit_value(i, mode)).sum();
    let extra = extra_charges(input, &valid, mode, item_subtotal);
    let grand_total = item_subtotal + extra;

    let mut bases: BTreeMap<&str, (f64, Vec<ClaimedLine>)> = input
        .participants
        .keys()
        .map(|id| (id.as_str(), (0.0, Vec::new())))
        .collect();
    for (item_id, claims) in input.claims {
        let Some(item) = by_id.get(item_id.as_str()) else {
            continue;
        };
        let unit = unit_value(item, mode);
        for (pid, quantity) in claims {
            let Some((base, lines)) = bases.get_mut(pid.as_str()) else {
                continue;
            };
            let amount = quantity * unit;
            *base += amount;
            lines.push(ClaimedLine {
                item_id: item.id.clone(),
                name: item.name.clone(),
                quantity: *quantity,
                amount,
            });
        }
    }

    let participants: Vec<ParticipantShare> = bases
        .into_iter()
        .map(|(pid, (base_total, mut lines))| {
            lines.sort_by(|a, b| compare_ids_newest_first(&a.item_id, &b.item_id));
            let extra_share = if item_subtotal > 0.0 {
                extra * base_total / item_subtotal
            } else {
                0.0
            };
            ParticipantShare {
                participant_id: pid.to_string(),
                name: input
                    .participants
                    .get(pid)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                base_total,
                extra_share,
                total: base_total + extra_share,
                lines,
            }
        })
        .collect();

    let claimed_base_total: f64 = participants.iter().map(|p| p.base_total).sum();
    let claimed_total: f64 = participants.iter().map(|p| p.total).sum();
    let claim_progress_pct = if item_subtotal > 0.0 {
        100.0 * claimed_base_total / item_subtotal
    } else {
        0.0
    };

    Summary {
        lobby_id: input.lobby_id.to_string(),
        lobby_name: input.lobby_name.to_string(),
        pricing_mode: mode,
        item_subtotal,
        extra_charges: extra,
        grand_total,
        claimed_base_total,
        claimed_total,
        unclaimed_item_total: item_subtotal - claimed_base_total,
        unclaimed_total: grand_total - claimed_total,
        claim_progress_pct,
        tax_breakdown: input.totals.detected_tax_breakdown.clone(),
        participants,
    }
}

impl Summary {
    /// Currency-rounded copy for display. Computation never uses it.
    pub fn rounded(&self) -> Summary {
        let mut out = self.clone();
        for v in [
            &mut out.item_subtotal,
            &mut out.extra_charges,
            &mut out.grand_total,
            &mut out.claimed_base_total,
            &mut out.claimed_total,
            &mut out.unclaimed_item_total,
            &mut out.unclaimed_total,
            &mut out.claim_progress_pct,
        ] {
            *v = round_currency(*v);
        }
        for tax in &mut out.tax_breakdown {
            tax.amount = round_currency(tax.amount);
        }
        for p in &mut out.participants {
            p.base_total = round_currency(p.base_total);
            p.extra_share = round_currency(p.extra_share);
            p.total = round_currency(p.total);
            for line in &mut p.lines {
                line.amount = round_currency(line.amount);
            }
        }
        out
    }

    pub fn compact(&self) -> CompactSummary {
        CompactSummary {
            lobby_id: self.lobby_id.clone(),
            grand_total: round_currency(self.grand_total),
            claimed_total: round_currency(self.claimed_total),
            unclaimed_total: round_currency(self.unclaimed_total),
            claim_progress_pct: round_currency(self.claim_progress_pct),
            participants: self
                .participants
                .iter()
                .map(|p| CompactShare {
                    name: p.name.clone(),
                    total: round_currency(p.total),
                })
                .collect(),
        }
    }

    pub fn share(&self, participant_id: &str) -> Option<&ParticipantShare> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }
}
