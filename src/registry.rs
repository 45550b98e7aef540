//! Materialized view results and the export registry they are stored in.

use crate::charts::Figure;
use serde::{Deserialize, Serialize};

/// A single materialized cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Number(f64),
    Count(u64),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Count(c) => Some(*c as f64),
            Value::Text(_) => None,
        }
    }

    /// Display form used in HTML and CSV: two decimals for amounts.
    pub fn display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => format!("{:.2}", n),
            Value::Count(c) => c.to_string(),
        }
    }
}

/// A fully materialized table: header row plus data rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Row whose first cell is the text `key`.
    pub fn row_by_key(&self, key: &str) -> Option<&Vec<Value>> {
        self.rows
            .iter()
            .find(|r| matches!(r.first(), Some(Value::Text(k)) if k == key))
    }

    /// Numeric cell at (`key` row, `column`).
    pub fn number(&self, key: &str, column: &str) -> Option<f64> {
        let col = self.column(column)?;
        self.row_by_key(key)?.get(col)?.as_f64()
    }
}

/// A headline figure shown next to a view's table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub label: String,
    pub value: Value,
}

/// One view's materialized output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub title: String,
    pub table: Table,
    pub figures: Vec<Figure>,
    pub metrics: Vec<Metric>,
}

/// Insertion-ordered map from a stable view key to its latest output.
///
/// Re-registering a key replaces its contents in place, keeping its
/// original position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportRegistry {
    entries: Vec<(String, RegistryEntry)>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, entry: RegistryEntry) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((key.to_string(), entry)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn remove(&mut self, key: &str) -> Option<RegistryEntry> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
