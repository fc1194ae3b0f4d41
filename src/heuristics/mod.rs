// src/heuristics/mod.rs

pub mod classifier;
pub mod items;
pub mod rules;
pub mod totals;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use self::classifier::LineClass;
use self::rules::RuleTable;
use self::totals::{ReviewKind, ReviewReason, ReviewReport, ReviewTolerances};

/// One line of text as delivered by the OCR engine, top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl OcrLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: Some(confidence),
        }
    }
}

impl From<&str> for OcrLine {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Veg,
    NonVeg,
    Drinks,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Veg,
        Category::NonVeg,
        Category::Drinks,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Veg => "veg",
            Self::NonVeg => "non_veg",
            Self::Drinks => "drinks",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

/// Who decided an item's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    #[default]
    Inferred,
    UserSelected,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inferred => "inferred",
            Self::UserSelected => "user_selected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inferred" => Some(Self::Inferred),
            "user_selected" => Some(Self::UserSelected),
            _ => None,
        }
    }
}

/// Finer grouping for items in the `other` category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtherSubcategory {
    Starter,
    MainCourse,
    Bread,
    Rice,
    Dessert,
    Snack,
    Side,
}

impl OtherSubcategory {
    pub const ALL: [OtherSubcategory; 7] = [
        OtherSubcategory::Starter,
        OtherSubcategory::MainCourse,
        OtherSubcategory::Bread,
        OtherSubcategory::Rice,
        OtherSubcategory::Dessert,
        OtherSubcategory::Snack,
        OtherSubcategory::Side,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::MainCourse => "main_course",
            Self::Bread => "bread",
            Self::Rice => "rice",
            Self::Dessert => "dessert",
            Self::Snack => "snack",
            Self::Side => "side",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

/// Whether an item came from the scanned receipt or was added to the lobby later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    #[default]
    Receipt,
    Manual,
}

impl ItemOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "receipt" => Some(Self::Receipt),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A single purchasable receipt line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    /// Authoritative line total.
    pub cost: f64,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub category_source: CategorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_subcategory: Option<OtherSubcategory>,
    #[serde(default)]
    pub origin: ItemOrigin,
}

impl LineItem {
    /// Items with a non-positive cost or quantity never reach any total.
    pub fn is_valid(&self) -> bool {
        self.cost.is_finite()
            && self.cost > 0.0
            && self.quantity.is_finite()
            && self.quantity > 0.0
    }

    /// Price of one unit, derived from the line cost when no unit price was read.
    pub fn effective_unit_price(&self) -> f64 {
        if self.unit_price > 0.0 {
            self.unit_price
        } else if self.quantity > 0.0 {
            self.cost / self.quantity
        } else {
            self.cost
        }
    }

    /// Fractional quantities only make sense for weighed goods.
    pub fn has_whole_quantity(&self) -> bool {
        (self.quantity - self.quantity.round()).abs() < 1e-6
    }
}

/// A labelled tax (or charge) amount, in the order it was printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub name: String,
    pub amount: f64,
}

/// Receipt-level totals. Absent fields were not found, which is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptTotals {
    #[serde(default)]
    pub computed_subtotal: Option<f64>,
    #[serde(default)]
    pub detected_subtotal: Option<f64>,
    #[serde(default)]
    pub detected_grand_total: Option<f64>,
    #[serde(default)]
    pub detected_tax_total: Option<f64>,
    #[serde(default)]
    pub detected_service_charge: Option<f64>,
    /// Signed.
    #[serde(default)]
    pub detected_round_off: Option<f64>,
    /// Magnitude of any discount line.
    #[serde(default)]
    pub detected_discount: Option<f64>,
    #[serde(default)]
    pub detected_tax_breakdown: Vec<TaxLine>,
}

impl ReceiptTotals {
    /// How many of the detected scalar fields were found.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 6;
        let filled = [
            self.detected_subtotal.is_some(),
            self.detected_grand_total.is_some(),
            self.detected_tax_total.is_some(),
            self.detected_service_charge.is_some(),
            self.detected_round_off.is_some(),
            self.detected_discount.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }

    /// Tax + service + round-off, absent parts counting as zero.
    pub fn charge_components(&self) -> f64 {
        self.detected_tax_total.unwrap_or(0.0)
            + self.detected_service_charge.unwrap_or(0.0)
            + self.detected_round_off.unwrap_or(0.0)
    }
}

/// Everything a receipt interpretation produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub items: Vec<LineItem>,
    pub totals: ReceiptTotals,
    pub review: ReviewReport,
    pub line_count: usize,
}

impl Interpretation {
    pub fn needs_review(&self) -> bool {
        self.review.needs_review
    }
}

/// Round to currency precision. Only used when a value is shown or stored.
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Turn OCR lines into typed items and reconciled totals.
pub fn interpret_receipt(
    lines: &[OcrLine],
    rules: &RuleTable,
    tolerances: &ReviewTolerances,
) -> Interpretation {
    let span = info_span!("interpret", lines = lines.len());
    let _guard = span.enter();

    let mut reasons = Vec::new();
    let mut classified = Vec::with_capacity(lines.len());

    for (index, line) in lines.iter().enumerate() {
        if let Some(confidence) = line.confidence
            && confidence < tolerances.min_line_confidence
        {
            debug!(index, confidence, "Dropping low-confidence OCR line");
            reasons.push(ReviewReason::new(
                ReviewKind::LowConfidenceLine,
                Some(line.text.trim().to_string()),
                format!("OCR confidence {confidence:.2} below threshold"),
            ));
            continue;
        }

        let Some(normalized) = classifier::normalize_line(index, &line.text) else {
            continue;
        };
        let class = classifier::classify(&normalized, rules);
        if let LineClass::Noise(reason) = &class
            && reason.is_unresolved()
        {
            debug!(index, line = %normalized.text, ?reason, "Unparsed line");
            reasons.push(ReviewReason::new(
                ReviewKind::UnparsedLine,
                Some(normalized.text.clone()),
                reason.describe().to_string(),
            ));
        }
        classified.push((normalized, class));
    }

    let extraction = items::extract_items(&classified, rules);
    reasons.extend(extraction.reasons);

    let (totals, review) =
        totals::resolve_totals(&classified, &extraction.items, reasons, tolerances);

    let (filled, total) = totals.coverage();
    info!(
        items = extraction.items.len(),
        totals_found = filled,
        totals_possible = total,
        needs_review = review.needs_review,
        confidence = review.confidence,
        "Receipt interpreted"
    );

    Interpretation {
        items: extraction.items,
        totals,
        review,
        line_count: lines.len(),
    }
}
