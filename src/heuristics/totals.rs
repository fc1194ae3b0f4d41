// src/heuristics/totals.rs

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::classifier::{LineClass, NormalizedLine};
use super::rules::RuleKind;
use super::{LineItem, ReceiptTotals, TaxLine, round_currency};

const EPSILON: f64 = 0.005;

// ----------------------------------------------------------------------------
// Review signal
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    UnparsedLine,
    LowConfidenceLine,
    ItemAfterTotals,
    ItemRejected,
    ItemCostMismatch,
    SuspiciousQuantity,
    AmbiguousTotals,
    SubtotalMismatch,
    GrandTotalMismatch,
    GrandTotalBelowSubtotal,
    SubtotalExceedsGrandTotal,
    TooManyUnresolvedLines,
    /// Informational: nothing to split, but the totals may still be valid.
    NoItems,
}

impl ReviewKind {
    /// Any of these sets `needs_review`.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousTotals
                | Self::SubtotalMismatch
                | Self::GrandTotalMismatch
                | Self::GrandTotalBelowSubtotal
                | Self::SubtotalExceedsGrandTotal
                | Self::TooManyUnresolvedLines
        )
    }

    /// Lines the extractor could not turn into anything trustworthy.
    pub fn is_unresolved_line(&self) -> bool {
        matches!(
            self,
            Self::UnparsedLine
                | Self::LowConfidenceLine
                | Self::ItemAfterTotals
                | Self::ItemRejected
                | Self::ItemCostMismatch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReason {
    pub kind: ReviewKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    pub detail: String,
}

impl ReviewReason {
    pub fn new(kind: ReviewKind, line: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub needs_review: bool,
    /// 0.0 to 1.0, a rough measure of how much of the receipt was understood.
    pub confidence: f64,
    pub reasons: Vec<ReviewReason>,
}

/// Tolerance bands are `max(abs, rel * max(1, reference))`; only a difference
/// strictly larger than the band is a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewTolerances {
    pub subtotal_abs_tolerance: f64,
    pub subtotal_rel_tolerance: f64,
    pub grand_total_abs_tolerance: f64,
    pub grand_total_rel_tolerance: f64,
    pub max_unresolved_lines: usize,
    pub min_line_confidence: f32,
}

impl Default for ReviewTolerances {
    fn default() -> Self {
        Self {
            subtotal_abs_tolerance: 2.0,
            subtotal_rel_tolerance: 0.02,
            grand_total_abs_tolerance: 1.0,
            grand_total_rel_tolerance: 0.005,
            max_unresolved_lines: 3,
            min_line_confidence: 0.35,
        }
    }
}

impl ReviewTolerances {
    pub fn subtotal_band(&self, reference: f64) -> f64 {
        f64::max(
            self.subtotal_abs_tolerance,
            self.subtotal_rel_tolerance * f64::max(1.0, reference.abs()),
        )
    }

    pub fn grand_total_band(&self, reference: f64) -> f64 {
        f64::max(
            self.grand_total_abs_tolerance,
            self.grand_total_rel_tolerance * f64::max(1.0, reference.abs()),
        )
    }
}

fn confidence_score(item_count: usize, reason_count: usize) -> f64 {
    if item_count == 0 {
        return 0.0;
    }
    let mut score: f64 = 0.75;
    if item_count >= 3 {
        score += 0.10;
    }
    if item_count >= 6 {
        score += 0.05;
    }
    score -= f64::min(0.45, 0.06 * reason_count as f64);
    round_currency(score.clamp(0.0, 1.0))
}

// ----------------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Detected {
    subtotal: Option<f64>,
    grand_total: Option<f64>,
    tax_total: Option<f64>,
    service_charge: Option<f64>,
    round_off: Option<f64>,
    discount: Option<f64>,
    breakdown: Vec<TaxLine>,
    /// Bare "total" lines, with their line index.
    generic: Vec<(usize, f64)>,
    first_charge_line: Option<usize>,
}

fn collect(lines: &[(NormalizedLine, LineClass)]) -> Detected {
    let mut d = Detected::default();
    for (line, class) in lines {
        let LineClass::Totals(candidate) = class else {
            continue;
        };
        let amount = candidate.amount;
        let label = |fallback: &str| {
            if candidate.label.is_empty() {
                fallback.to_string()
            } else {
                candidate.label.clone()
            }
        };
        match candidate.kind {
            RuleKind::Subtotal => d.subtotal = Some(amount),
            RuleKind::GrandTotal => d.grand_total = Some(amount),
            RuleKind::RoundOff => d.round_off = Some(amount),
            RuleKind::Discount => d.discount = Some(amount.abs()),
            RuleKind::Total => d.generic.push((line.index, amount)),
            RuleKind::Tax => {
                d.tax_total = Some(d.tax_total.unwrap_or(0.0) + amount);
                d.breakdown.push(TaxLine {
                    name: label("Tax"),
                    amount,
                });
                d.first_charge_line.get_or_insert(line.index);
            }
            RuleKind::ServiceCharge => {
                d.service_charge = Some(amount);
                d.breakdown.push(TaxLine {
                    name: label("Service Charge"),
                    amount,
                });
                d.first_charge_line.get_or_insert(line.index);
            }
            RuleKind::Ignore => {}
        }
        debug!(kind = candidate.kind.as_str(), amount, line = %line.text, "Totals line");
    }
    d.tax_total = d.tax_total.map(round_currency);
    d
}

/// Decide what the bare "total" lines mean, given what was labelled explicitly.
fn resolve_generic(d: &mut Detected, reasons: &mut Vec<ReviewReason>) {
    if d.generic.is_empty() {
        return;
    }
    let before_charges: Vec<f64> = match d.first_charge_line {
        Some(first) => d
            .generic
            .iter()
            .filter(|(i, _)| *i < first)
            .map(|(_, v)| *v)
            .collect(),
        None => Vec::new(),
    };
    let after_charges: Vec<f64> = match d.first_charge_line {
        Some(first) => d
            .generic
            .iter()
            .filter(|(i, _)| *i > first)
            .map(|(_, v)| *v)
            .collect(),
        None => d.generic.iter().map(|(_, v)| *v).collect(),
    };
    let largest = |values: &[f64]| values.iter().copied().reduce(f64::max);

    match (d.subtotal, d.grand_total) {
        (Some(_), Some(_)) => {}
        (Some(sub), None) => {
            // Waterfall: the largest total below a subtotal is the amount payable.
            let all: Vec<f64> = d.generic.iter().map(|(_, v)| *v).collect();
            d.grand_total = largest(&all).filter(|g| *g > sub + EPSILON);
        }
        (None, Some(grand)) => {
            d.subtotal = before_charges
                .iter()
                .rev()
                .copied()
                .find(|v| *v < grand - EPSILON);
        }
        (None, None) if d.first_charge_line.is_some() => {
            d.subtotal = before_charges.last().copied();
            d.grand_total = largest(&after_charges)
                .filter(|g| d.subtotal.is_none_or(|s| *g > s + EPSILON));
        }
        (None, None) => {
            let mut distinct: Vec<f64> = Vec::new();
            for (_, v) in &d.generic {
                if !distinct.iter().any(|x| (x - v).abs() < EPSILON) {
                    distinct.push(*v);
                }
            }
            distinct.sort_by(f64::total_cmp);
            match distinct.as_slice() {
                [only] => d.grand_total = Some(*only),
                [low, .., high] => {
                    d.subtotal = Some(*low);
                    d.grand_total = Some(*high);
                    reasons.push(ReviewReason::new(
                        ReviewKind::AmbiguousTotals,
                        None,
                        format!(
                            "unlabelled totals resolved by size: subtotal {low:.2}, grand total {high:.2}"
                        ),
                    ));
                }
                [] => {}
            }
        }
    }
}

/// Detected totals from classified lines, before reconciliation.
pub fn detect_totals(
    lines: &[(NormalizedLine, LineClass)],
    reasons: &mut Vec<ReviewReason>,
) -> ReceiptTotals {
    let mut d = collect(lines);
    resolve_generic(&mut d, reasons);
    ReceiptTotals {
        computed_subtotal: None,
        detected_subtotal: d.subtotal,
        detected_grand_total: d.grand_total,
        detected_tax_total: d.tax_total,
        detected_service_charge: d.service_charge,
        detected_round_off: d.round_off,
        detected_discount: d.discount,
        detected_tax_breakdown: d.breakdown,
    }
}

// ----------------------------------------------------------------------------
// Reconciliation
// ----------------------------------------------------------------------------

/// Fill in derivable totals and check them against each other and the items.
///
/// With a printed subtotal and grand total but no round-off line, the
/// round-off is inferred from the gap; an exact match infers `Some(0.0)`.
pub fn reconcile(
    mut totals: ReceiptTotals,
    items: &[LineItem],
    mut reasons: Vec<ReviewReason>,
    tolerances: &ReviewTolerances,
) -> (ReceiptTotals, ReviewReport) {
    let valid: Vec<&LineItem> = items.iter().filter(|i| i.is_valid()).collect();
    totals.computed_subtotal =
        (!valid.is_empty()).then(|| round_currency(valid.iter().map(|i| i.cost).sum()));

    let tax = totals.detected_tax_total.unwrap_or(0.0);
    let service = totals.detected_service_charge.unwrap_or(0.0);
    let discount = totals.detected_discount.unwrap_or(0.0);
    let explicit_round_off = totals.detected_round_off;

    let mut synthesized = false;
    if totals.detected_grand_total.is_none()
        && let Some(sub) = totals.detected_subtotal
        && (totals.detected_tax_total.is_some()
            || totals.detected_service_charge.is_some()
            || totals.detected_round_off.is_some()
            || totals.detected_discount.is_some())
    {
        let grand = sub + tax + service + explicit_round_off.unwrap_or(0.0) - discount;
        debug!(grand, "Synthesized grand total from components");
        totals.detected_grand_total = Some(round_currency(grand));
        synthesized = true;
    }

    let grand_below_subtotal = match (totals.detected_subtotal, totals.detected_grand_total) {
        (Some(sub), Some(grand)) if !synthesized => {
            grand < sub - discount - tolerances.grand_total_band(sub)
        }
        _ => false,
    };

    if !synthesized
        && !grand_below_subtotal
        && explicit_round_off.is_none()
        && let (Some(sub), Some(grand)) = (totals.detected_subtotal, totals.detected_grand_total)
    {
        let inferred = grand - sub - tax - service + discount;
        totals.detected_round_off = Some(if inferred.abs() >= EPSILON {
            round_currency(inferred)
        } else {
            0.0
        });
    }

    if let (Some(sub), Some(computed)) = (totals.detected_subtotal, totals.computed_subtotal) {
        let diff = (sub - computed).abs();
        if diff > tolerances.subtotal_band(sub) {
            reasons.push(ReviewReason::new(
                ReviewKind::SubtotalMismatch,
                None,
                format!(
                    "detected subtotal {sub:.2} differs from item sum {computed:.2} by {diff:.2}"
                ),
            ));
        }
    }

    if !synthesized
        && let (Some(sub), Some(grand)) = (totals.detected_subtotal, totals.detected_grand_total)
    {
        if grand_below_subtotal {
            reasons.push(ReviewReason::new(
                ReviewKind::GrandTotalBelowSubtotal,
                None,
                format!("grand total {grand:.2} is below subtotal {sub:.2}"),
            ));
        } else {
            let residue =
                grand - (sub + tax + service + explicit_round_off.unwrap_or(0.0) - discount);
            if residue.abs() > tolerances.grand_total_band(grand) {
                reasons.push(ReviewReason::new(
                    ReviewKind::GrandTotalMismatch,
                    None,
                    format!(
                        "grand total {grand:.2} leaves {residue:.2} unexplained by subtotal and charges"
                    ),
                ));
            }
        }
    }

    if totals.detected_subtotal.is_none()
        && let (Some(grand), Some(computed)) =
            (totals.detected_grand_total, totals.computed_subtotal)
        && computed - discount > grand + tolerances.grand_total_band(grand)
    {
        reasons.push(ReviewReason::new(
            ReviewKind::SubtotalExceedsGrandTotal,
            None,
            format!("item sum {computed:.2} exceeds grand total {grand:.2}"),
        ));
    }

    if valid.is_empty() {
        reasons.push(ReviewReason::new(
            ReviewKind::NoItems,
            None,
            "no purchasable items were found",
        ));
    }

    let unresolved = reasons.iter().filter(|r| r.kind.is_unresolved_line()).count();
    if unresolved > tolerances.max_unresolved_lines {
        reasons.push(ReviewReason::new(
            ReviewKind::TooManyUnresolvedLines,
            None,
            format!(
                "{unresolved} lines could not be resolved (limit {})",
                tolerances.max_unresolved_lines
            ),
        ));
    }

    let needs_review = reasons.iter().any(|r| r.kind.is_blocking());
    for reason in reasons.iter().filter(|r| r.kind.is_blocking()) {
        warn!(kind = ?reason.kind, detail = %reason.detail, "Receipt needs review");
    }

    let report = ReviewReport {
        needs_review,
        confidence: confidence_score(valid.len(), reasons.len()),
        reasons,
    };
    (totals, report)
}

/// Detect, then reconcile.
pub fn resolve_totals(
    lines: &[(NormalizedLine, LineClass)],
    items: &[LineItem],
    mut reasons: Vec<ReviewReason>,
    tolerances: &ReviewTolerances,
) -> (ReceiptTotals, ReviewReport) {
    let totals = detect_totals(lines, &mut reasons);
    reconcile(totals, items, reasons, tolerances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::classifier::{classify, normalize_line};
    use crate::heuristics::rules::RuleTable;
    use crate::heuristics::{Category, CategorySource, ItemOrigin};

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

    fn totals_only(raw: &[&str]) -> (ReceiptTotals, ReviewReport) {
        resolve_totals(&classified(raw), &[], Vec::new(), &ReviewTolerances::default())
    }

    fn item(cost: f64) -> LineItem {
        LineItem {
            id: "itm_1".into(),
            name: "Thali".into(),
            quantity: 1.0,
            unit_price: cost,
            cost,
            category: Category::Other,
            category_source: CategorySource::Inferred,
            other_subcategory: None,
            origin: ItemOrigin::Receipt,
        }
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let value = actual.expect("value present");
        assert!((value - expected).abs() < 1e-6, "{value} != {expected}");
    }

    #[test]
    fn test_bill_total_net_to_pay_reconciles() {
        let (totals, review) = totals_only(&[
            "Bill Total 300.00",
            "CGST 9.00",
            "SGST 9.00",
            "Net To Pay 318.00",
        ]);
        assert_close(totals.detected_subtotal, 300.0);
        assert_close(totals.detected_grand_total, 318.0);
        assert_close(totals.detected_tax_total, 18.0);
        assert_eq!(totals.detected_tax_breakdown.len(), 2);
        assert_eq!(totals.detected_tax_breakdown[0].name, "CGST");
        assert_eq!(totals.detected_round_off, Some(0.0));
        assert!(!review.needs_review);
        assert!(review.reasons.iter().any(|r| r.kind == ReviewKind::NoItems));
        assert_eq!(review.confidence, 0.0);
    }

    #[test]
    fn test_little_china_pattern() {
        let (totals, review) = totals_only(&[
            "Items 5 Bill Total : 610.00",
            "Service Tax @4.94% : 30.16",
            "*VAT @ 12.50% : 71.26",
            "**VAT @ 20.00% : 8.00",
            "R. Off: -0.42",
            "Net To Pay 719.00",
        ]);
        assert_close(totals.detected_subtotal, 610.0);
        assert_close(totals.detected_grand_total, 719.0);
        assert_close(totals.detected_tax_total, 109.42);
        assert_close(totals.detected_round_off, -0.42);
        assert!(totals.detected_tax_breakdown.len() >= 3);
        assert!(!review.needs_review, "{:?}", review.reasons);
    }

    #[test]
    fn test_amount_payable_pattern() {
        let (totals, _) = totals_only(&[
            "Sub Total 450.00",
            "CGST 9% 40.50",
            "SGST 9% 40.50",
            "Amount Payable 531.00",
        ]);
        assert_close(totals.detected_subtotal, 450.0);
        assert_close(totals.detected_tax_total, 81.0);
        assert_close(totals.detected_grand_total, 531.0);
    }

    #[test]
    fn test_grand_total_synthesized_when_missing() {
        let (totals, review) = totals_only(&["Bill Total 300.00", "GST 18% 54.00", "Round Off 1.00"]);
        assert_close(totals.detected_subtotal, 300.0);
        assert_close(totals.detected_tax_total, 54.0);
        assert_close(totals.detected_round_off, 1.0);
        assert_close(totals.detected_grand_total, 355.0);
        assert!(!review.needs_review);
    }

    #[test]
    fn test_footer_tax_declarations_ignored() {
        let (totals, _) = totals_only(&[
            "Bill Total : 610.00",
            "Service Tax @4.94% : 30.16",
            "*VAT @ 12.50% : 71.26",
            "**VAT @ 20.00% : 8.00",
            "VAT ON FOOD @ 12.5%",
            "VAT ON BEVERAGES @ 20%",
            "SERVICE TAX @ 4.944% PAID",
            "Net To Pay 719.00",
        ]);
        assert_close(totals.detected_tax_total, 109.42);
        assert_eq!(totals.detected_tax_breakdown.len(), 3);
    }

    #[test]
    fn test_gross_amount_and_service_charge() {
        let (totals, review) = totals_only(&[
            "Sub Total 3750.00",
            "SERVICE CHARGE 10 % 375.00",
            "SGST 2.5% 103.13",
            "CGST 2.5% 103.13",
            "Gross Amount 4331.00",
        ]);
        assert_close(totals.detected_subtotal, 3750.0);
        assert_close(totals.detected_service_charge, 375.0);
        assert_close(totals.detected_tax_total, 206.26);
        assert_close(totals.detected_grand_total, 4331.0);
        assert_close(totals.detected_round_off, -0.26);
        assert!(!review.needs_review);
    }

    #[test]
    fn test_gstin_line_not_counted_as_tax() {
        let (totals, _) = totals_only(&[
            "Sub Total (RS) : 1523.0",
            "SGST 9.00% (RS) : 137.1",
            "CGST 9.00% (RS) : 137.1",
            "Total (RS) : 1797.1",
            "GST:27AABCC1926B1Z8",
            "Gr.Total (RS) : 1797",
        ]);
        assert_close(totals.detected_tax_total, 274.2);
        assert_eq!(totals.detected_tax_breakdown.len(), 2);
        assert_close(totals.detected_grand_total, 1797.0);
    }

    #[test]
    fn test_total_amount_and_bill_amount() {
        let (totals, _) = totals_only(&[
            "Total Amount 1315.00",
            "CGST 2.5% 32.88",
            "SGST 2.5% 32.88",
            "Bill Amount 1381.00",
        ]);
        assert_close(totals.detected_subtotal, 1315.0);
        assert_close(totals.detected_tax_total, 65.76);
        assert_close(totals.detected_grand_total, 1381.0);
    }

    #[test]
    fn test_waterfall_explicit_grand_total_wins() {
        let (totals, _) = totals_only(&[
            "Sub Total : 235.00",
            "CGST 2.5% : 5.88",
            "SGST 2.5% : 5.88",
            "Total : 246.76",
            "Grand Total : 247.00",
        ]);
        assert_close(totals.detected_subtotal, 235.0);
        assert_close(totals.detected_grand_total, 247.0);
    }

    #[test]
    fn test_waterfall_largest_generic_total_below_subtotal() {
        let (totals, _) = totals_only(&[
            "Sub Total : 235.00",
            "CGST 2.5% : 5.88",
            "SGST 2.5% : 5.88",
            "Total : 246.76",
            "Total : 247.00",
        ]);
        assert_close(totals.detected_grand_total, 247.0);
    }

    #[test]
    fn test_generic_total_before_taxes_is_subtotal() {
        let (totals, review) = totals_only(&["Total 300.00", "CGST 9.00", "SGST 9.00", "Total 318.00"]);
        assert_close(totals.detected_subtotal, 300.0);
        assert_close(totals.detected_grand_total, 318.0);
        assert!(!review.needs_review);
    }

    #[test]
    fn test_unlabelled_totals_are_ambiguous() {
        let (totals, review) = totals_only(&["Total 300.00", "Total 318.00"]);
        assert_close(totals.detected_subtotal, 300.0);
        assert_close(totals.detected_grand_total, 318.0);
        assert!(review.needs_review);
        assert!(review.reasons.iter().any(|r| r.kind == ReviewKind::AmbiguousTotals));
    }

    #[test]
    fn test_subtotal_mismatch_needs_review() {
        let lines = classified(&["Sub Total 300.00"]);
        let (_, review) =
            resolve_totals(&lines, &[item(200.0)], Vec::new(), &ReviewTolerances::default());
        assert!(review.needs_review);
        let reason = review
            .reasons
            .iter()
            .find(|r| r.kind == ReviewKind::SubtotalMismatch)
            .expect("subtotal mismatch reason");
        assert!(reason.detail.contains("300.00"));
        assert!(reason.detail.contains("200.00"));
    }

    #[test]
    fn test_subtotal_within_band_is_accepted() {
        // Band is max(2.0, 0.02 * 306) = 6.12.
        let lines = classified(&["Sub Total 306.00"]);
        let (_, review) =
            resolve_totals(&lines, &[item(300.0)], Vec::new(), &ReviewTolerances::default());
        assert!(!review.needs_review, "{:?}", review.reasons);
    }

    #[test]
    fn test_grand_total_below_subtotal_is_flagged() {
        let (totals, review) = totals_only(&["Sub Total 500.00", "Grand Total 300.00"]);
        assert_close(totals.detected_grand_total, 300.0);
        assert_eq!(totals.detected_round_off, None);
        assert!(review
            .reasons
            .iter()
            .any(|r| r.kind == ReviewKind::GrandTotalBelowSubtotal));
        assert!(review.needs_review);
    }

    #[test]
    fn test_unexplained_grand_total_residue_is_flagged() {
        let (_, review) = totals_only(&[
            "Sub Total 300.00",
            "CGST 9.00",
            "SGST 9.00",
            "Round Off 0.50",
            "Grand Total 340.00",
        ]);
        assert!(review.reasons.iter().any(|r| r.kind == ReviewKind::GrandTotalMismatch));
    }

    #[test]
    fn test_discount_is_subtracted() {
        let (totals, review) = totals_only(&[
            "Sub Total 500.00",
            "Discount -50.00",
            "GST 5% 22.50",
            "Net Payable 472.50",
        ]);
        assert_close(totals.detected_discount, 50.0);
        assert_eq!(totals.detected_round_off, Some(0.0));
        assert!(!review.needs_review, "{:?}", review.reasons);
    }

    #[test]
    fn test_items_exceeding_grand_total_without_subtotal() {
        let lines = classified(&["Net To Pay 150.00"]);
        let (_, review) =
            resolve_totals(&lines, &[item(300.0)], Vec::new(), &ReviewTolerances::default());
        assert!(review
            .reasons
            .iter()
            .any(|r| r.kind == ReviewKind::SubtotalExceedsGrandTotal));
    }

    #[test]
    fn test_confidence_score() {
        assert_eq!(confidence_score(0, 0), 0.0);
        assert_eq!(confidence_score(2, 0), 0.75);
        assert_eq!(confidence_score(6, 1), 0.84);
        assert_eq!(confidence_score(3, 20), 0.4);
    }

    #[test]
    fn test_tolerance_bands() {
        let t = ReviewTolerances::default();
        assert_eq!(t.subtotal_band(50.0), 2.0);
        assert_eq!(t.subtotal_band(1000.0), 20.0);
        assert_eq!(t.grand_total_band(100.0), 1.0);
        assert_eq!(t.grand_total_band(4000.0), 20.0);
    }
}
