// src/heuristics/classifier.rs

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::rules::{RuleKind, RuleTable};

// ----------------------------------------------------------------------------
// Patterns
// ----------------------------------------------------------------------------

/// Two prices printed without a gap, e.g. `340.002.000`.
static GLUED_DECIMALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d{2})(\d+\.\d{2,3})\b").expect("glued decimals regex"));

/// A single-digit quantity fused to a unit price, e.g. `260.00` for `2 60.00`.
static GLUED_QTY_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9])(\d{2,4}\.\d{1,2})$").expect("glued quantity regex"));

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d{1,3}))?$").expect("number regex")
});

static DECIMALISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[.,]\d{1,2}").expect("decimal regex"));

static QTY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:qty|quantity)\s*[:=-]?\s*(\d+(?:\.\d+)?)\b").expect("qty label regex")
});

static QTY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)(\d{1,2})\s*[x×*](?:\s|$)").expect("qty prefix regex")
});

static QTY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)[x×*]\s*(\d{1,2})\b").expect("qty suffix regex")
});

static SERIAL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}[.)]?$").expect("serial regex"));

const CURRENCY_MARKERS: &[&str] = &["rs", "rs.", "(rs)", "(rs.)", "inr", "₹", "$", "/-"];
const CURRENCY_PREFIXES: &[&str] = &["₹", "$", "rs.", "rs", "inr"];

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

/// A cleaned OCR line. `folded` is the lowercase copy rules match against.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLine {
    pub index: usize,
    pub text: String,
    pub folded: String,
}

/// A numeric token together with how many decimals it was printed with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amount {
    pub value: f64,
    pub decimals: usize,
}

impl Amount {
    pub fn is_whole(&self) -> bool {
        (self.value - self.value.round()).abs() < 1e-9
    }

    /// Printed like a count (`2`) or a weight (`0.750`).
    pub fn is_count_like(&self) -> bool {
        self.value > 0.0 && (self.decimals == 0 || self.decimals == 3)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Number(Amount, &'a str),
    Rate(&'a str),
    Filler(&'a str),
}

impl<'a> Token<'a> {
    fn raw(&self) -> &'a str {
        match self {
            Token::Word(s) | Token::Number(_, s) | Token::Rate(s) | Token::Filler(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemCandidate {
    pub name: String,
    /// Trailing numeric run, at most three values, in printed order.
    pub numbers: Vec<Amount>,
    pub quantity_hint: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TotalsCandidate {
    pub kind: RuleKind,
    pub amount: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseReason {
    Comment,
    Vocabulary,
    /// Totals wording with digits but no readable trailing amount.
    MissingAmount,
    /// Looks like it carries a price, but no amount could be read.
    Malformed,
    Text,
}

impl NoiseReason {
    /// Noise that may have hidden a real item or total.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::MissingAmount | Self::Malformed)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Comment => "comment line",
            Self::Vocabulary => "header or footer vocabulary",
            Self::MissingAmount => "totals wording without a readable amount",
            Self::Malformed => "price-like text that could not be read as an item",
            Self::Text => "text without an amount",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    Item(ItemCandidate),
    Totals(TotalsCandidate),
    Noise(NoiseReason),
}

// ----------------------------------------------------------------------------
// Normalisation
// ----------------------------------------------------------------------------

/// Clean up OCR artefacts. Returns `None` for blank lines.
pub fn normalize_line(index: usize, raw: &str) -> Option<NormalizedLine> {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '|' | '\t' => ' ',
            '−' | '–' => '-',
            other => other,
        })
        .collect();

    let mut text = collapse_whitespace(&replaced);
    for _ in 0..4 {
        let split = GLUED_DECIMALS.replace_all(&text, "$1 $2").into_owned();
        if split == text {
            break;
        }
        text = split;
    }
    let text = split_glued_quantities(&text);

    if text.is_empty() {
        return None;
    }
    Some(NormalizedLine {
        index,
        folded: text.to_lowercase(),
        text,
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Veg Biryani 260.00 120.00` becomes `Veg Biryani 2 60.00 120.00` when the
/// split makes quantity times price agree with the next value.
fn split_glued_quantities(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len() + 1);
    for (i, word) in words.iter().enumerate() {
        let next = words.get(i + 1).and_then(|w| parse_number(w));
        if let (Some(caps), Some(next)) = (GLUED_QTY_PRICE.captures(word), next) {
            let qty: f64 = caps[1].parse().unwrap_or(0.0);
            let unit: f64 = caps[2].parse().unwrap_or(0.0);
            if (qty * unit - next.value).abs() <= 1.0 {
                out.push(caps[1].to_string());
                out.push(caps[2].to_string());
                continue;
            }
        }
        out.push((*word).to_string());
    }
    out.join(" ")
}

// ----------------------------------------------------------------------------
// Tokens
// ----------------------------------------------------------------------------

fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.split_whitespace().map(classify_token).collect()
}

fn classify_token(raw: &str) -> Token<'_> {
    let lower = raw.to_lowercase();
    if CURRENCY_MARKERS.contains(&lower.as_str()) || !raw.chars().any(char::is_alphanumeric) {
        return Token::Filler(raw);
    }
    if let Some(rate) = lower.strip_suffix('%')
        && parse_number(rate).is_some()
    {
        return Token::Rate(raw);
    }
    match parse_number(raw) {
        // Long bare integers are phone or bill numbers, not prices.
        Some(amount) if amount.decimals == 0 && amount.value.abs() >= 1_000_000.0 && !raw.contains(',') => {
            Token::Word(raw)
        }
        Some(amount) => Token::Number(amount, raw),
        None => Token::Word(raw),
    }
}

/// Parse a price-like token, tolerating currency prefixes, separators and the
/// usual OCR letter/digit confusions.
pub fn parse_number(raw: &str) -> Option<Amount> {
    let mut token = raw
        .trim_start_matches(['(', '*', ':'])
        .trim_end_matches("/-")
        .trim_end_matches([':', ',', ';', ')', '*'])
        .to_string();

    let lower = token.to_lowercase();
    for prefix in CURRENCY_PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix)
            && rest.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        {
            token = token[prefix.len()..].to_string();
            break;
        }
    }

    let candidate = if NUMBER.is_match(&token) {
        token
    } else {
        let repaired = repair_ocr_digits(&token)?;
        if !NUMBER.is_match(&repaired) {
            return None;
        }
        trace!(raw, repaired = %repaired, "Repaired OCR digits");
        repaired
    };

    let decimals = NUMBER
        .captures(&candidate)
        .and_then(|c| c.get(1))
        .map_or(0, |m| m.as_str().len());
    let value: f64 = candidate.replace(',', "").parse().ok()?;
    value.is_finite().then_some(Amount { value, decimals })
}

/// `12O.5O` -> `120.50`. Only applied to tokens that already look like a
/// decimal price and carry at least as many digits as confusable letters.
fn repair_ocr_digits(token: &str) -> Option<String> {
    const CONFUSABLE: &[char] = &['O', 'o', 'D', 'I', 'l', 'S', 'B'];
    if !token.contains('.') {
        return None;
    }
    let digits = token.chars().filter(char::is_ascii_digit).count();
    let confusable = token.chars().filter(|c| CONFUSABLE.contains(c)).count();
    if digits == 0 || confusable == 0 || digits < confusable {
        return None;
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-') || CONFUSABLE.contains(&c))
    {
        return None;
    }
    Some(
        token
            .chars()
            .map(|c| match c {
                'O' | 'o' | 'D' => '0',
                'I' | 'l' => '1',
                'S' => '5',
                'B' => '8',
                other => other,
            })
            .collect(),
    )
}

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

pub fn classify(line: &NormalizedLine, rules: &RuleTable) -> LineClass {
    if line.text.starts_with('#') {
        return LineClass::Noise(NoiseReason::Comment);
    }

    let tokens = tokenize(&line.text);
    let has_digit = line.text.chars().any(|c| c.is_ascii_digit());

    match rules.classify_kind(&line.folded) {
        Some(RuleKind::Ignore) => LineClass::Noise(NoiseReason::Vocabulary),
        Some(kind) => match last_amount(&tokens) {
            Some((pos, amount)) => LineClass::Totals(TotalsCandidate {
                kind,
                amount: amount.value,
                label: totals_label(&tokens[..pos]),
            }),
            None if has_digit => LineClass::Noise(NoiseReason::MissingAmount),
            None => LineClass::Noise(NoiseReason::Text),
        },
        None => match item_candidate(&tokens) {
            Some(candidate) => LineClass::Item(candidate),
            None => {
                let has_alpha = line.text.chars().any(char::is_alphabetic);
                if has_alpha && DECIMALISH.is_match(&line.text) {
                    LineClass::Noise(NoiseReason::Malformed)
                } else {
                    LineClass::Noise(NoiseReason::Text)
                }
            }
        },
    }
}

/// Last meaningful token, if it is a number. Rates and fillers are skipped.
fn last_amount(tokens: &[Token<'_>]) -> Option<(usize, Amount)> {
    for (pos, token) in tokens.iter().enumerate().rev() {
        match token {
            Token::Filler(_) | Token::Rate(_) => continue,
            Token::Number(amount, _) => return Some((pos, *amount)),
            Token::Word(_) => return None,
        }
    }
    None
}

fn totals_label(tokens: &[Token<'_>]) -> String {
    let joined = tokens.iter().map(Token::raw).collect::<Vec<_>>().join(" ");
    joined
        .trim_matches(|c: char| matches!(c, ':' | '*' | '-' | '=' | '.') || c.is_whitespace())
        .to_string()
}

fn item_candidate(tokens: &[Token<'_>]) -> Option<ItemCandidate> {
    let mut numbers = Vec::new();
    let mut name_end = 0;
    for (pos, token) in tokens.iter().enumerate().rev() {
        match token {
            Token::Filler(_) => continue,
            Token::Number(amount, _) => numbers.push((pos, *amount)),
            _ => {
                name_end = pos + 1;
                break;
            }
        }
    }
    if numbers.is_empty() {
        return None;
    }
    numbers.reverse();

    // Anything beyond three trailing numbers belongs to the name ("Chicken 65").
    if numbers.len() > 3 {
        let keep_from = numbers.len() - 3;
        name_end = numbers[keep_from - 1].0 + 1;
        numbers.drain(..keep_from);
    }

    let raw_name = tokens[..name_end]
        .iter()
        .map(Token::raw)
        .collect::<Vec<_>>()
        .join(" ");
    if !raw_name.chars().any(char::is_alphabetic) {
        return None;
    }

    Some(ItemCandidate {
        name: clean_item_name(&raw_name),
        numbers: numbers.into_iter().map(|(_, a)| a).collect(),
        quantity_hint: quantity_hint(&raw_name),
    })
}

fn quantity_hint(name: &str) -> Option<f64> {
    [&*QTY_LABEL, &*QTY_PREFIX, &*QTY_SUFFIX]
        .iter()
        .find_map(|re| re.captures(name))
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|q| *q > 0.0)
}

/// Strip quantity markers, serial numbers and stray symbols from a name.
pub fn clean_item_name(raw: &str) -> String {
    let mut name = QTY_LABEL.replace_all(raw, " ").into_owned();
    name = QTY_PREFIX.replace_all(&name, " ").into_owned();
    name = QTY_SUFFIX.replace_all(&name, " ").into_owned();

    let words: Vec<&str> = name
        .split_whitespace()
        .enumerate()
        .filter(|(i, w)| !(*i == 0 && SERIAL_NUMBER.is_match(w)))
        .map(|(_, w)| w)
        .filter(|w| !CURRENCY_MARKERS.contains(&w.to_lowercase().as_str()))
        .collect();

    let kept: String = words
        .join(" ")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '&' | '(' | ')' | '/' | '+' | '-' | '\'' | '.'))
        .collect();
    collapse_whitespace(&kept)
        .trim_matches(|c: char| matches!(c, '-' | '.' | '/' | '+'))
        .trim()
        .to_string()
}
