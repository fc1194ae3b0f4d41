// src/heuristics/rules.rs

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What a matching rule says a line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Subtotal,
    GrandTotal,
    Tax,
    ServiceCharge,
    RoundOff,
    Discount,
    /// A bare "total" whose role depends on its neighbours.
    Total,
    /// Headers, footers, contact details and payment noise.
    Ignore,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subtotal => "subtotal",
            Self::GrandTotal => "grand_total",
            Self::Tax => "tax",
            Self::ServiceCharge => "service_charge",
            Self::RoundOff => "round_off",
            Self::Discount => "discount",
            Self::Total => "total",
            Self::Ignore => "ignore",
        }
    }
}

/// A rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    pub kind: RuleKind,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    50
}

#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    pub kind: RuleKind,
    pub priority: u8,
}

impl Rule {
    pub fn compile(spec: &RuleSpec) -> Result<Self, ConfigError> {
        let pattern = RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidRule {
                pattern: spec.pattern.clone(),
                source,
            })?;
        Ok(Self {
            pattern,
            kind: spec.kind,
            priority: spec.priority,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

// ----------------------------------------------------------------------------
// Built-in vocabulary
// ----------------------------------------------------------------------------

const DEFAULT_RULES: &[(&str, RuleKind, u8)] = &[
    // Registration numbers and footer declarations carry digits but never amounts.
    (r"\bgstin\b", RuleKind::Ignore, 100),
    (r"\btax\s*id\b", RuleKind::Ignore, 100),
    (r"\btin\b", RuleKind::Ignore, 100),
    (r"\bgst\s*(?:no|num|number|reg)\b", RuleKind::Ignore, 100),
    (r"\bgst\s*[:#-]?\s*[a-z0-9]{10,}\b", RuleKind::Ignore, 100),
    (r"\bvat\s+on\s+(?:food|beverages?|drinks|liquor)\b", RuleKind::Ignore, 100),
    (r"\bpaid\b", RuleKind::Ignore, 100),
    (
        r"\b(?:cash|change|tendered|balance|visa|mastercard|amex|upi|card)\b",
        RuleKind::Ignore,
        100,
    ),
    (r"\btotal\s+(?:qty|quantity)\b", RuleKind::Ignore, 100),
    (r"\bno\.?\s*of\s+items\b", RuleKind::Ignore, 100),
    (r"\b(?:total\s+)?items?\s*[:=]?\s*\d{1,3}\s*$", RuleKind::Ignore, 100),
    // Contact details, bill metadata and greetings.
    (
        r"\b(?:tel|ph|phone|mobile|mob|email|e-mail|www|http|https|fssai|invoice|kot|token|table|cashier|steward|waiter|guests?|covers?|thank|thanks|visit|address|date)\b",
        RuleKind::Ignore,
        95,
    ),
    (r"\b(?:bill|receipt|order|check)\s*(?:no\b|#)", RuleKind::Ignore, 95),
    (r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b", RuleKind::Ignore, 95),
    (r"\b\d{1,2}\.\d{1,2}\.\d{4}\b", RuleKind::Ignore, 95),
    (r"\b\d{1,2}:\d{2}(?::\d{2})?\b", RuleKind::Ignore, 95),
    // Final payable amount.
    (r"\bnet\s*to\s*pay\b", RuleKind::GrandTotal, 90),
    (r"\bamount\s+payable\b", RuleKind::GrandTotal, 90),
    (r"\bpayable\s+amount\b", RuleKind::GrandTotal, 90),
    (r"\btotal\s+payable\b", RuleKind::GrandTotal, 90),
    (r"\bnet\s+payable\b", RuleKind::GrandTotal, 90),
    (r"\bamount\s+due\b", RuleKind::GrandTotal, 90),
    (r"\bgrand\s*total\b", RuleKind::GrandTotal, 90),
    (r"\bgr\.?\s*total\b", RuleKind::GrandTotal, 90),
    (r"\bgross\s+amount\b", RuleKind::GrandTotal, 90),
    (r"\bbil+\s+amount\b", RuleKind::GrandTotal, 90),
    (r"\bnet\s+amount\b", RuleKind::GrandTotal, 90),
    (r"\bpay\s+amount\b", RuleKind::GrandTotal, 90),
    (r"\bpayable\b", RuleKind::GrandTotal, 88),
    (r"\bround(?:ed)?\s*-?\s*off\b", RuleKind::RoundOff, 85),
    (r"\broundof+\b", RuleKind::RoundOff, 85),
    (r"\br\.?\s*off\b", RuleKind::RoundOff, 85),
    (r"\brounding\b", RuleKind::RoundOff, 85),
    (r"\bsub\s*-?\s*total\b", RuleKind::Subtotal, 80),
    (r"\bitem\s+total\b", RuleKind::Subtotal, 80),
    (r"\bbill\s+total\b", RuleKind::Subtotal, 80),
    (r"\btotal\s+amount\b", RuleKind::Subtotal, 80),
    (r"\bfood\s+total\b", RuleKind::Subtotal, 80),
    (r"\bgross\s+total\b", RuleKind::Subtotal, 80),
    (r"\bservice\s*(?:charges?|chg)\b", RuleKind::ServiceCharge, 70),
    (r"\bdisc(?:ount)?\b", RuleKind::Discount, 65),
    (r"\b(?:coupon|promo)\b", RuleKind::Discount, 65),
    (r"^less\b", RuleKind::Discount, 65),
    (r"\b[csiu]?gst\b", RuleKind::Tax, 60),
    (r"\bvat\b", RuleKind::Tax, 60),
    (r"\bservice\s+tax\b", RuleKind::Tax, 60),
    (r"\btax(?:es)?\b", RuleKind::Tax, 60),
    (r"\bcess\b", RuleKind::Tax, 60),
    (r"\btota?l\b", RuleKind::Total, 40),
    (r"\b(?:amount|amt)\b", RuleKind::Total, 40),
];

/// Ordered keyword/pattern table. The highest priority match wins; ties go
/// to the rule that was added first.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::defaults()
    }
}

impl RuleTable {
    pub fn defaults() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(pattern, kind, priority)| {
                Rule::compile(&RuleSpec {
                    pattern: (*pattern).to_string(),
                    kind: *kind,
                    priority: *priority,
                })
                .expect("built-in classifier rule compiles")
            })
            .collect();
        Self { rules }
    }

    pub fn from_specs(specs: &[RuleSpec]) -> Result<Self, ConfigError> {
        let rules = specs.iter().map(Rule::compile).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Built-in rules followed by `extra`, or only `extra` when replacing.
    pub fn with_overrides(extra: &[RuleSpec], replace_defaults: bool) -> Result<Self, ConfigError> {
        let mut table = if replace_defaults {
            Self { rules: Vec::new() }
        } else {
            Self::defaults()
        };
        for spec in extra {
            table.rules.push(Rule::compile(spec)?);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn best_match(&self, text: &str) -> Option<&Rule> {
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if !rule.is_match(text) {
                continue;
            }
            match best {
                Some(current) if current.priority >= rule.priority => {}
                _ => best = Some(rule),
            }
        }
        best
    }

    pub fn classify_kind(&self, text: &str) -> Option<RuleKind> {
        self.best_match(text).map(|r| r.kind)
    }

    /// True when any totals rule (anything but `Ignore`) matches. Used to keep
    /// totals wording from ever becoming an item name.
    pub fn mentions_totals(&self, text: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.kind != RuleKind::Ignore && r.is_match(text))
    }
}
