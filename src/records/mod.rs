pub mod types;

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use types::{EntityKind, LookupMode, Record};

/// Identifier range assumed when a table has no well-formed keys.
const DEFAULT_ID_RANGE: (u32, u32) = (1, 1000);

/// In-memory, read-only table of records keyed by identifier.
pub struct RecordTable {
    kind: EntityKind,
    headers: Vec<String>,
    key_index: usize,
    /// Cells per row; `None` is an empty (null) cell.
    rows: Vec<Vec<Option<String>>>,
    /// Upper-cased key -> row position.
    index: HashMap<String, usize>,
}

impl RecordTable {
    pub fn from_path(kind: EntityKind, path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        let table = Self::from_reader(kind, file)
            .with_context(|| format!("Failed to load {:?}", path))?;
        info!(
            kind = ?kind,
            rows = table.len(),
            columns = table.headers.len(),
            "record table loaded from {:?}",
            path
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(kind: EntityKind, reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let key_index = headers
            .iter()
            .position(|h| h == kind.key_column())
            .ok_or_else(|| anyhow::anyhow!("missing key column '{}'", kind.key_column()))?;

        let mut rows = Vec::new();
        let mut index = HashMap::new();

        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Malformed CSV row {}", line + 1))?;
            let cells: Vec<Option<String>> = (0..headers.len())
                .map(|i| {
                    record
                        .get(i)
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                })
                .collect();

            let Some(key) = cells[key_index].clone() else {
                warn!(row = line + 1, "skipping row without key");
                continue;
            };
            let key = key.to_uppercase();
            if index.contains_key(&key) {
                warn!(key, row = line + 1, "duplicate key, keeping first row");
                continue;
            }
            index.insert(key, rows.len());
            rows.push(cells);
        }

        debug!(kind = ?kind, rows = rows.len(), "CSV parsed");
        Ok(Self {
            kind,
            headers,
            key_index,
            rows,
            index,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive lookup by identifier.
    pub fn lookup(&self, id: &str) -> Option<Record> {
        let row = &self.rows[*self.index.get(&id.trim().to_uppercase())?];
        let fields = self
            .headers
            .iter()
            .zip(row)
            .enumerate()
            .filter(|(i, _)| *i != self.key_index)
            .filter_map(|(_, (column, value))| {
                value.as_ref().map(|v| (column.clone(), v.clone()))
            })
            .collect();

        Some(Record {
            key: row[self.key_index].clone().unwrap_or_default(),
            fields,
        })
    }

    /// Lowest and highest numeric suffix among well-formed keys.
    pub fn id_range(&self) -> (u32, u32) {
        let mut numbers = self.index.keys().filter_map(|k| self.kind.parse_id(k));
        let Some(first) = numbers.next() else {
            return DEFAULT_ID_RANGE;
        };
        numbers.fold((first, first), |(lo, hi), n| (lo.min(n), hi.max(n)))
    }
}

/// All tables available to the assistant. Loaded once, shared read-only.
pub struct Dataset {
    pub invoices: RecordTable,
    pub orders: Option<RecordTable>,
}

impl Dataset {
    pub fn new(invoices: RecordTable, orders: Option<RecordTable>) -> Self {
        Self { invoices, orders }
    }

    /// Load the invoice table, plus the order table when its file exists.
    pub fn load(invoice_path: &Path, order_path: Option<&Path>) -> Result<Self> {
        let invoices = RecordTable::from_path(EntityKind::Invoice, invoice_path)?;
        if invoices.is_empty() {
            warn!("invoice dataset {:?} has no rows", invoice_path);
        }
        let orders = match order_path {
            Some(path) if path.exists() => Some(RecordTable::from_path(EntityKind::Order, path)?),
            Some(path) => {
                warn!("order dataset {:?} not found, answering about invoices only", path);
                None
            }
            None => None,
        };
        Ok(Self::new(invoices, orders))
    }

    pub fn mode(&self) -> LookupMode {
        if self.orders.is_some() {
            LookupMode::InvoicesAndOrders
        } else {
            LookupMode::InvoicesOnly
        }
    }

    pub fn table(&self, kind: EntityKind) -> Option<&RecordTable> {
        match kind {
            EntityKind::Invoice => Some(&self.invoices),
            EntityKind::Order => self.orders.as_ref(),
        }
    }
}
