use serde::{Deserialize, Serialize};

/// Kind of record a table holds. Each kind has its own identifier syntax
/// (`PREFIX-NNNN`) and key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Invoice,
    Order,
}

impl EntityKind {
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Invoice => "FAC",
            EntityKind::Order => "COM",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            EntityKind::Invoice => "Numéro de Facture",
            EntityKind::Order => "Numéro de Commande",
        }
    }

    /// French noun used in fact text ("facture", "commande").
    pub fn noun(self) -> &'static str {
        match self {
            EntityKind::Invoice => "facture",
            EntityKind::Order => "commande",
        }
    }

    /// Format a numeric suffix as an identifier, e.g. `7` -> `FAC-0007`.
    pub fn format_id(self, n: u32) -> String {
        format!("{}-{:04}", self.prefix(), n)
    }

    /// Numeric suffix of a well-formed identifier of this kind.
    pub fn parse_id(self, id: &str) -> Option<u32> {
        let id = id.trim();
        let (prefix, digits) = id.split_once('-')?;
        if !prefix.eq_ignore_ascii_case(self.prefix())
            || digits.len() != 4
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        digits.parse().ok()
    }
}

/// Which datasets are available to the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Invoices only. The extractor uses the sentinel output protocol.
    InvoicesOnly,
    /// Invoices and their linked orders. The extractor answers in JSON.
    InvoicesAndOrders,
}

/// One table row reduced to its non-null fields, key column excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub fields: Vec<(String, String)>,
}

/// Identifiers resolved for one turn, partitioned by entity kind.
/// Insertion order is kept and duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSet {
    pub invoices: Vec<String>,
    pub orders: Vec<String>,
}

impl IdentifierSet {
    pub fn new<I, O>(invoices: I, orders: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let mut set = Self::default();
        for id in invoices {
            set.insert(EntityKind::Invoice, id.into());
        }
        for id in orders {
            set.insert(EntityKind::Order, id.into());
        }
        set
    }

    /// Add an identifier. Blank and repeated (case-insensitive) entries are skipped.
    pub fn insert(&mut self, kind: EntityKind, id: String) {
        let id = id.trim().to_string();
        if id.is_empty() {
            return;
        }
        let list = match kind {
            EntityKind::Invoice => &mut self.invoices,
            EntityKind::Order => &mut self.orders,
        };
        if !list.iter().any(|existing| existing.eq_ignore_ascii_case(&id)) {
            list.push(id);
        }
    }

    pub fn get(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Invoice => &self.invoices,
            EntityKind::Order => &self.orders,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty() && self.orders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.invoices.len() + self.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse_id() {
        assert_eq!(EntityKind::Invoice.format_id(7), "FAC-0007");
        assert_eq!(EntityKind::Order.parse_id("com-0042"), Some(42));
        assert_eq!(EntityKind::Invoice.parse_id("COM-0042"), None);
        assert_eq!(EntityKind::Invoice.parse_id("FAC-42"), None);
        assert_eq!(EntityKind::Invoice.parse_id("FAC-00a1"), None);
    }

    #[test]
    fn test_identifier_set_dedup_keeps_order() {
        let set = IdentifierSet::new(["FAC-0003", "fac-0003", " FAC-0001 ", ""], ["COM-0003"]);
        assert_eq!(set.invoices, vec!["FAC-0003", "FAC-0001"]);
        assert_eq!(set.orders, vec!["COM-0003"]);
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
        assert!(IdentifierSet::default().is_empty());
    }
}
