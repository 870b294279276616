use std::fmt::Write;

use tracing::debug;

use super::continuation::{Notice, Resolution};
use crate::records::types::{EntityKind, LookupMode};
use crate::records::{Dataset, RecordTable};

pub const NO_PRIOR_CONTEXT: &str = "Pas de contexte précédent disponible.";
const NOTHING_FOUND_INVOICES: &str = "Aucun numéro de facture trouvé dans la question.";
const NOTHING_FOUND_BOTH: &str = "Aucun numéro de facture ou de commande trouvé dans la question.";
const PARSE_FAILURE_PREFIX: &str = "Erreur lors de l'extraction des numéros";

/// Fact block for one kind: a data block per found identifier, a warning
/// line per missing one, in the order given.
pub fn ground_kind(ids: &[String], table: &RecordTable) -> String {
    let noun = table.kind().noun();
    let mut out = String::new();

    for id in ids {
        match table.lookup(id) {
            Some(record) => {
                debug!(key = %record.key, fields = record.fields.len(), "record grounded");
                let _ = writeln!(out, "Données de {} numéro: {} ", noun, id);
                for (column, value) in &record.fields {
                    let _ = writeln!(out, "  {}: {}", column, value);
                }
            }
            None => {
                let _ = writeln!(
                    out,
                    "Avertissement : Le numéro de {} '{}' n'a pas été trouvé.",
                    noun, id
                );
            }
        }
    }

    out
}

/// Text handed to the answer generator for a resolved turn. Never empty.
pub fn fact_text(resolution: &Resolution, dataset: &Dataset) -> String {
    match &resolution.notice {
        Some(Notice::ParseFailure(reason)) => return format!("{}: {}", PARSE_FAILURE_PREFIX, reason),
        Some(Notice::NoPriorContext) => return NO_PRIOR_CONTEXT.to_string(),
        None => {}
    }

    let blocks: Vec<String> = [EntityKind::Invoice, EntityKind::Order]
        .into_iter()
        .filter_map(|kind| {
            let ids = resolution.effective.get(kind);
            let table = dataset.table(kind)?;
            (!ids.is_empty()).then(|| ground_kind(ids, table))
        })
        .filter(|block| !block.is_empty())
        .collect();

    if blocks.is_empty() {
        return match dataset.mode() {
            LookupMode::InvoicesOnly => NOTHING_FOUND_INVOICES.to_string(),
            LookupMode::InvoicesAndOrders => NOTHING_FOUND_BOTH.to_string(),
        };
    }
    blocks.join("\n")
}
