//! Row predicates. Every axis builds a boolean mask over the ledger and the
//! masks are intersected; string comparisons run on trimmed, upper-cased
//! values on both sides.

use crate::headers::clean_label;
use crate::ledger::{Column, Installment, Ledger, BECAS_ISA, PENDIENTE};
use std::collections::BTreeSet;

/// Canonical comparison form of a filter token or cell value.
pub fn normalize_token(s: &str) -> String {
    clean_label(s).to_uppercase()
}

#[derive(Clone, Debug, PartialEq)]
enum Predicate {
    OneOf {
        column: Column,
        values: BTreeSet<String>,
    },
    Contains {
        columns: Vec<Column>,
        needle: String,
    },
}

impl Predicate {
    fn matches(&self, row: &Installment) -> bool {
        match self {
            Predicate::OneOf { column, values } => {
                values.contains(&normalize_token(&row.text(*column)))
            }
            Predicate::Contains { columns, needle } => columns
                .iter()
                .any(|c| normalize_token(&row.text(*c)).contains(needle.as_str())),
        }
    }
}

/// A conjunction of row predicates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowFilter {
    predicates: Vec<Predicate>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps rows whose `column` equals one of `values`. An empty value list
    /// places no constraint.
    pub fn one_of<I, S>(mut self, column: Column, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: BTreeSet<String> = values
            .into_iter()
            .map(|v| normalize_token(v.as_ref()))
            .collect();
        if !values.is_empty() {
            self.predicates.push(Predicate::OneOf { column, values });
        }
        self
    }

    pub fn equals(self, column: Column, value: &str) -> Self {
        self.one_of(column, [value])
    }

    /// `Estado = PENDIENTE`.
    pub fn pending(self) -> Self {
        self.equals(Column::Estado, PENDIENTE)
    }

    /// `Forma Pago = BECAS ISA`, the ISA-scholarship rows.
    pub fn becas_isa(self) -> Self {
        self.equals(Column::FormaPago, BECAS_ISA)
    }

    /// Free-text search across several columns; blank needles are ignored.
    pub fn contains_text(mut self, columns: &[Column], needle: &str) -> Self {
        let needle = normalize_token(needle);
        if !needle.is_empty() {
            self.predicates.push(Predicate::Contains {
                columns: columns.to_vec(),
                needle,
            });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, row: &Installment) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Row-level mask for the whole ledger.
    pub fn mask(&self, ledger: &Ledger) -> Vec<bool> {
        ledger.rows.iter().map(|r| self.matches(r)).collect()
    }

    pub fn apply<'a>(&self, ledger: &'a Ledger) -> Selection<'a> {
        let rows = self
            .mask(ledger)
            .into_iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        Selection { ledger, rows }
    }
}

/// Rows of a ledger that survived a filter, by position.
#[derive(Clone, Debug)]
pub struct Selection<'a> {
    pub ledger: &'a Ledger,
    pub rows: Vec<usize>,
}

impl<'a> Selection<'a> {
    pub fn all(ledger: &'a Ledger) -> Self {
        Selection {
            ledger,
            rows: (0..ledger.rows.len()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a Installment)> + '_ {
        let ledger = self.ledger;
        self.rows.iter().map(move |&i| (i, &ledger.rows[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cliente: &str, estado: &str, forma: &str, curso: &str) -> Installment {
        Installment {
            cliente: cliente.into(),
            estado: estado.into(),
            forma_pago: forma.into(),
            curso: curso.into(),
            ..Default::default()
        }
    }

    fn ledger() -> Ledger {
        Ledger {
            rows: vec![
                row("A", "PENDIENTE", "Becas ISA", "Máster Data"),
                row("B", "COBRADO", "Transferencia", "Grado"),
                row("C", "PENDIENTE", " becas  isa ", "Grado"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn masks_intersect() {
        let l = ledger();
        let sel = RowFilter::new().pending().becas_isa().apply(&l);
        assert_eq!(sel.rows, vec![0, 2]);
    }

    #[test]
    fn empty_value_list_keeps_everything() {
        let l = ledger();
        let sel = RowFilter::new()
            .one_of(Column::Estado, Vec::<String>::new())
            .apply(&l);
        assert_eq!(sel.len(), 3);
    }

    #[test]
    fn comparisons_ignore_case_and_spacing() {
        let l = ledger();
        let sel = RowFilter::new().one_of(Column::Cliente, [" b "]).apply(&l);
        assert_eq!(sel.rows, vec![1]);
    }

    #[test]
    fn free_text_searches_several_columns() {
        let l = ledger();
        let sel = RowFilter::new()
            .contains_text(&[Column::Proyecto, Column::Curso], "máster")
            .apply(&l);
        assert_eq!(sel.rows, vec![0]);
    }
}
