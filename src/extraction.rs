// src/extraction.rs
//
// The boundary with the outside world before a lobby exists: where OCR text
// comes from, the optional higher-accuracy fallback, and the explicit choice
// between candidates. Everything here is bounded by one timeout and either
// yields a complete interpretation or fails as a whole.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::InterpretError;
use crate::heuristics::items::{ExternalItem, merge_unique_by_name, normalize_external_items};
use crate::heuristics::rules::RuleTable;
use crate::heuristics::totals::{ReviewKind, ReviewTolerances, reconcile};
use crate::heuristics::{Interpretation, OcrLine, ReceiptTotals, TaxLine, interpret_receipt};

/// Produces the ordered OCR lines of one receipt.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn read_lines(&self) -> Result<Vec<OcrLine>, InterpretError>;
}

/// Produces an independent `(items, totals)` candidate for the same receipt.
#[async_trait]
pub trait FallbackExtractor: Send + Sync {
    async fn extract(&self, lines: &[OcrLine]) -> Result<ExternalReceipt, InterpretError>;
}

/// A text file of OCR output, one line per row. A row may end in a tab
/// followed by the engine's confidence for that line.
pub struct FileTextSource {
    path: PathBuf,
}

impl FileTextSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

fn parse_ocr_row(row: &str) -> OcrLine {
    if let Some((text, score)) = row.rsplit_once('\t')
        && let Ok(confidence) = score.trim().parse::<f32>()
        && (0.0..=1.0).contains(&confidence)
    {
        return OcrLine::with_confidence(text, confidence);
    }
    OcrLine::new(row)
}

#[async_trait]
impl TextSource for FileTextSource {
    async fn read_lines(&self) -> Result<Vec<OcrLine>, InterpretError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(content.lines().map(parse_ocr_row).collect())
    }
}

// ----------------------------------------------------------------------------
// External candidate
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalTotals {
    pub subtotal: Option<f64>,
    pub grand_total: Option<f64>,
    pub tax_total: Option<f64>,
    pub service_charge: Option<f64>,
    pub round_off: Option<f64>,
    pub discount: Option<f64>,
    pub taxes: Vec<TaxLine>,
}

impl ExternalTotals {
    fn into_receipt_totals(self) -> ReceiptTotals {
        let tax_total = self.tax_total.or_else(|| {
            (!self.taxes.is_empty()).then(|| self.taxes.iter().map(|t| t.amount).sum())
        });
        ReceiptTotals {
            computed_subtotal: None,
            detected_subtotal: self.subtotal,
            detected_grand_total: self.grand_total,
            detected_tax_total: tax_total,
            detected_service_charge: self.service_charge,
            detected_round_off: self.round_off,
            detected_discount: self.discount.map(f64::abs),
            detected_tax_breakdown: self.taxes,
        }
    }
}

/// What a fallback extractor returns, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalReceipt {
    pub items: Vec<ExternalItem>,
    pub totals: ExternalTotals,
}

/// Run an external candidate through the same item rules and reconciliation
/// as OCR output, so both candidates carry comparable review reports.
pub fn interpret_external(
    receipt: ExternalReceipt,
    rules: &RuleTable,
    tolerances: &ReviewTolerances,
    line_count: usize,
) -> Interpretation {
    let extraction = normalize_external_items(&receipt.items, rules);
    let (totals, review) = reconcile(
        receipt.totals.into_receipt_totals(),
        &extraction.items,
        extraction.reasons,
        tolerances,
    );
    Interpretation {
        items: extraction.items,
        totals,
        review,
        line_count,
    }
}

// ----------------------------------------------------------------------------
// Interpreter
// ----------------------------------------------------------------------------

/// Which candidate the caller wants a lobby built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateChoice {
    Primary,
    Fallback,
    /// Primary items plus fallback items whose name is not already present.
    Hybrid,
}

impl CandidateChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "fallback" => Some(Self::Fallback),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

async fn bounded<T, F>(after: Duration, what: &str, fut: F) -> Result<T, InterpretError>
where
    F: Future<Output = Result<T, InterpretError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?after, what, "External call timed out");
            Err(InterpretError::ExternalExtractionTimeout { after })
        }
    }
}

pub struct Interpreter {
    rules: RuleTable,
    tolerances: ReviewTolerances,
    timeout: Duration,
    fallback: Option<Arc<dyn FallbackExtractor>>,
}

impl Interpreter {
    pub fn new(rules: RuleTable, tolerances: ReviewTolerances, timeout: Duration) -> Self {
        Self {
            rules,
            tolerances,
            timeout,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackExtractor>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn interpret_lines(&self, lines: &[OcrLine]) -> Interpretation {
        interpret_receipt(lines, &self.rules, &self.tolerances)
    }

    /// Read from `source` within the timeout and interpret the result.
    pub async fn interpret_source(
        &self,
        source: &dyn TextSource,
    ) -> Result<(Vec<OcrLine>, Interpretation), InterpretError> {
        let lines = bounded(self.timeout, "text source", source.read_lines()).await?;
        let interpretation = self.interpret_lines(&lines);
        Ok((lines, interpretation))
    }

    /// Ask the fallback extractor for its own candidate.
    pub async fn fallback_candidate(
        &self,
        lines: &[OcrLine],
    ) -> Result<Interpretation, InterpretError> {
        let Some(fallback) = &self.fallback else {
            return Err(InterpretError::ExternalExtraction(
                "no fallback extractor configured".into(),
            ));
        };
        let receipt = bounded(self.timeout, "fallback extractor", fallback.extract(lines)).await?;
        let candidate = interpret_external(receipt, &self.rules, &self.tolerances, lines.len());
        info!(
            items = candidate.items.len(),
            needs_review = candidate.needs_review(),
            "Fallback candidate ready"
        );
        Ok(candidate)
    }

    /// The candidate the caller selected. Nothing here picks on their behalf.
    pub fn choose(
        &self,
        choice: CandidateChoice,
        primary: Interpretation,
        fallback: Option<Interpretation>,
    ) -> Result<Interpretation, InterpretError> {
        let missing =
            || InterpretError::ExternalExtraction("no fallback candidate to choose from".into());
        match choice {
            CandidateChoice::Primary => Ok(primary),
            CandidateChoice::Fallback => fallback.ok_or_else(missing),
            CandidateChoice::Hybrid => {
                let fallback = fallback.ok_or_else(missing)?;
                Ok(self.hybrid(primary, fallback))
            }
        }
    }

    fn hybrid(&self, primary: Interpretation, fallback: Interpretation) -> Interpretation {
        let items = merge_unique_by_name(&primary.items, &fallback.items);
        let p = primary.totals;
        let f = fallback.totals;
        let breakdown = if p.detected_tax_breakdown.is_empty() {
            f.detected_tax_breakdown
        } else {
            p.detected_tax_breakdown
        };
        let totals = ReceiptTotals {
            computed_subtotal: None,
            detected_subtotal: p.detected_subtotal.or(f.detected_subtotal),
            detected_grand_total: p.detected_grand_total.or(f.detected_grand_total),
            detected_tax_total: p.detected_tax_total.or(f.detected_tax_total),
            detected_service_charge: p.detected_service_charge.or(f.detected_service_charge),
            detected_round_off: p.detected_round_off.or(f.detected_round_off),
            detected_discount: p.detected_discount.or(f.detected_discount),
            detected_tax_breakdown: breakdown,
        };
        // Line-level findings carry over; totals checks are redone on the merged set.
        let reasons = primary
            .review
            .reasons
            .into_iter()
            .filter(|r| r.kind.is_unresolved_line() || r.kind == ReviewKind::SuspiciousQuantity)
            .collect();
        let (totals, review) = reconcile(totals, &items, reasons, &self.tolerances);
        info!(items = items.len(), needs_review = review.needs_review, "Hybrid candidate built");
        Interpretation {
            items,
            totals,
            review,
            line_count: primary.line_count,
        }
    }
}
