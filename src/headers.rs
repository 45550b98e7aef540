//! Header canonicalization.
//!
//! Labels are normalized so that period columns and the fixed attribute
//! columns can be found by exact match, whatever spacing the source office
//! suite produced.

use crate::table::{RawCell, RawTable};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

pub const ESTADO: &str = "Estado";

/// Whitespace cleanup shared by headers and `Estado` values: NBSP to space,
/// NFC composition, whitespace runs collapsed, ends trimmed.
pub fn clean_label(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '\u{a0}' | '\u{202f}' | '\u{2007}' => ' ',
            other => other,
        })
        .nfc()
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form of an `Estado` value.
pub fn canonical_estado(raw: &str) -> String {
    clean_label(raw).to_uppercase()
}

/// Normalizes a header row.
///
/// Blank labels become `UNNAMED_<index>`; a repeated label becomes
/// `<label>_<index>` from its second occurrence on. Output labels are
/// pairwise distinct, so applying this twice is a no-op.
pub fn normalize_headers(raw: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());
    let mut out = Vec::with_capacity(raw.len());

    for (index, label) in raw.iter().enumerate() {
        let cleaned = clean_label(label);
        let mut candidate = if cleaned.is_empty() {
            format!("UNNAMED_{}", index)
        } else {
            cleaned
        };
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", candidate, index);
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

/// Normalizes the header row of a table and canonicalizes its `Estado`
/// column, if any. A missing `Estado` is tolerated.
pub fn normalize_table(mut table: RawTable) -> RawTable {
    table.headers = normalize_headers(&table.headers);

    if let Some(col) = table.headers.iter().position(|h| h == ESTADO) {
        for row in table.rows.iter_mut() {
            if let Some(cell) = row.get_mut(col) {
                let text = cell.as_text();
                *cell = if text.trim().is_empty() {
                    RawCell::Empty
                } else {
                    RawCell::Text(canonical_estado(&text))
                };
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn whitespace_and_nbsp_are_cleaned() {
        let out = normalize_headers(&labels(&["  Forma\u{a0}\u{a0}Pago ", "Total\t2020"]));
        assert_eq!(out, labels(&["Forma Pago", "Total 2020"]));
    }

    #[test]
    fn blank_and_duplicate_labels_are_renamed() {
        let out = normalize_headers(&labels(&["Cliente", "", "Cliente", "  "]));
        assert_eq!(out, labels(&["Cliente", "UNNAMED_1", "Cliente_2", "UNNAMED_3"]));
    }

    #[test]
    fn generated_names_do_not_collide() {
        let out = normalize_headers(&labels(&["A", "A", "A_1"]));
        assert_eq!(out, labels(&["A", "A_1", "A_1_2"]));
    }

    #[test]
    fn normalizing_twice_is_a_fixed_point() {
        let raw = labels(&["A", "A", "A_1", "", "UNNAMED_3", " Estado ", "Enero\u{a0}2024"]);
        let once = normalize_headers(&raw);
        let twice = normalize_headers(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn composed_and_decomposed_accents_match() {
        let decomposed = "Gestio\u{301}n";
        assert_eq!(clean_label(decomposed), "Gestión");
    }

    #[test]
    fn estado_values_are_upper_cased() {
        let mut table = RawTable::new(labels(&["Cliente", " Estado"]));
        table.push_row(vec![
            RawCell::Text("A".into()),
            RawCell::Text("  pendiente ".into()),
        ]);
        table.push_row(vec![
            RawCell::Text("B".into()),
            RawCell::Text("Domiciliación  confirmada".into()),
        ]);
        let table = normalize_table(table);
        assert_eq!(table.cell(0, 1), &RawCell::Text("PENDIENTE".into()));
        assert_eq!(
            table.cell(1, 1),
            &RawCell::Text("DOMICILIACIÓN CONFIRMADA".into())
        );
    }
}
