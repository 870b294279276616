use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::prompts::{CONTINUE_SENTINEL, NONE_SENTINEL};
use crate::records::types::{EntityKind, IdentifierSet, LookupMode};

// Any digit count: a malformed identifier is still grounded (as not found).
static INVOICE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFAC-\d+\b").unwrap());
static ORDER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOM-\d+\b").unwrap());

/// Decoded extractor output.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// New identifiers named by the question.
    Identifiers(IdentifierSet),
    /// The question refers to the previous turn's items.
    Continue,
    /// No identifier in the question.
    None,
    /// The model's reply did not follow the output contract.
    ParseError(String),
}

/// JSON shape requested by the invoice + order extraction prompt.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    invoices: Vec<String>,
    #[serde(default)]
    orders: Vec<String>,
    #[serde(default, rename = "continue")]
    continue_previous: bool,
}

impl Extraction {
    /// Decode a raw extractor reply according to the protocol of `mode`.
    pub fn decode(mode: LookupMode, raw: &str) -> Self {
        match mode {
            LookupMode::InvoicesOnly => decode_sentinel(raw),
            LookupMode::InvoicesAndOrders => decode_json(raw),
        }
    }

    pub fn identifiers(&self) -> Option<&IdentifierSet> {
        match self {
            Extraction::Identifiers(set) => Some(set),
            _ => None,
        }
    }
}

fn decode_sentinel(raw: &str) -> Extraction {
    let trimmed = raw.trim().trim_matches(|c: char| c == '\'' || c == '"' || c == '.');
    if trimmed.eq_ignore_ascii_case(NONE_SENTINEL) {
        return Extraction::None;
    }
    if trimmed.eq_ignore_ascii_case(CONTINUE_SENTINEL) {
        return Extraction::Continue;
    }

    let ids = scan_ids(EntityKind::Invoice, trimmed);
    if ids.is_empty() {
        return Extraction::ParseError(format!("réponse d'extraction inattendue: '{}'", raw.trim()));
    }
    Extraction::Identifiers(IdentifierSet::new(ids, Vec::<String>::new()))
}

fn decode_json(raw: &str) -> Extraction {
    let body = strip_code_fence(raw);
    let parsed: RawExtraction = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => return Extraction::ParseError(e.to_string()),
    };

    if parsed.continue_previous {
        return Extraction::Continue;
    }

    let set = IdentifierSet::new(parsed.invoices, parsed.orders);
    if set.is_empty() {
        Extraction::None
    } else {
        Extraction::Identifiers(set)
    }
}

/// All `PREFIX-<digits>` occurrences in `text`, upper-cased.
fn scan_ids(kind: EntityKind, text: &str) -> Vec<String> {
    let re = match kind {
        EntityKind::Invoice => &INVOICE_ID_RE,
        EntityKind::Order => &ORDER_ID_RE,
    };
    re.find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

/// Unwrap a reply wrapped in a Markdown code fence (```json ... ```).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json") on the opening fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
