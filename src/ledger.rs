//! Typed receivables rows.
//!
//! An installment carries the fixed attributes plus one amount per period
//! column, aligned with [`Ledger::periods`]. Period labels are parsed once
//! here and carried as [`PeriodLabel`] values from then on.

use crate::headers::{canonical_estado, clean_label, normalize_table};
use crate::periods::PeriodLabel;
use crate::table::{coerce_amount, coerce_date, RawTable};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The enumerated collection states.
pub const KNOWN_STATES: [&str; 7] = [
    "COBRADO",
    "DOMICILIACIÓN CONFIRMADA",
    "DOMICILIACIÓN EMITIDA",
    "DUDOSO COBRO",
    "INCOBRABLE",
    "NO COBRADO",
    "PENDIENTE",
];

pub const PENDIENTE: &str = "PENDIENTE";
pub const BECAS_ISA: &str = "BECAS ISA";

/// Fixed (non-period) columns of the receivables sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Column {
    Cliente,
    Proyecto,
    Curso,
    Comercial,
    Estado,
    FormaPago,
    FechaInicio,
    FechaFactura,
    ImporteTotalFactura,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::Cliente,
        Column::Proyecto,
        Column::Curso,
        Column::Comercial,
        Column::Estado,
        Column::FormaPago,
        Column::FechaInicio,
        Column::FechaFactura,
        Column::ImporteTotalFactura,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Column::Cliente => "Cliente",
            Column::Proyecto => "Proyecto",
            Column::Curso => "Curso",
            Column::Comercial => "Comercial",
            Column::Estado => "Estado",
            Column::FormaPago => "Forma Pago",
            Column::FechaInicio => "Fecha Inicio",
            Column::FechaFactura => "Fecha Factura",
            Column::ImporteTotalFactura => "Importe Total Factura",
        }
    }
}

/// One billed installment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub cliente: String,
    pub proyecto: String,
    pub curso: String,
    pub comercial: String,
    pub estado: String,
    pub forma_pago: String,
    pub fecha_inicio: Option<NaiveDate>,
    pub fecha_factura: Option<NaiveDate>,
    pub importe_total_factura: f64,
    /// One amount per entry of `Ledger::periods`.
    pub amounts: Vec<f64>,
}

impl Installment {
    pub fn text(&self, column: Column) -> String {
        match column {
            Column::Cliente => self.cliente.clone(),
            Column::Proyecto => self.proyecto.clone(),
            Column::Curso => self.curso.clone(),
            Column::Comercial => self.comercial.clone(),
            Column::Estado => self.estado.clone(),
            Column::FormaPago => self.forma_pago.clone(),
            Column::FechaInicio => fmt_date(self.fecha_inicio),
            Column::FechaFactura => fmt_date(self.fecha_factura),
            Column::ImporteTotalFactura => self.importe_total_factura.to_string(),
        }
    }
}

fn fmt_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default()
}

/// A period column present in the uploaded sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodColumn {
    pub label: PeriodLabel,
    /// Header text as it appears after normalization.
    pub header: String,
}

/// The whole uploaded receivables sheet in typed form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    /// Normalized header row, in upload order.
    pub headers: Vec<String>,
    pub columns: BTreeSet<Column>,
    pub periods: Vec<PeriodColumn>,
    pub rows: Vec<Installment>,
}

impl Ledger {
    /// Builds the typed ledger from a raw upload: normalizes headers,
    /// canonicalizes `Estado`, parses period labels and coerces amounts.
    pub fn from_table(table: RawTable) -> Self {
        let table = normalize_table(table);

        let mut fixed: HashMap<Column, usize> = HashMap::new();
        for column in Column::ALL {
            if let Some(idx) = table.column_index(column.header()) {
                fixed.insert(column, idx);
            }
        }

        // Only the first column for a given period counts. Identical headers
        // were renamed by the normalizer; differently spelled ones
        // (`TOTAL 2020` after `Total 2020`) are ignored with a warning.
        let mut periods: Vec<(usize, PeriodColumn)> = Vec::new();
        for (idx, header) in table.headers.iter().enumerate() {
            let Some(label) = PeriodLabel::parse(header) else {
                continue;
            };
            match periods.iter().find(|(_, p)| p.label == label) {
                Some((_, first)) => warn!(
                    "column {:?} repeats period {} of column {:?}; ignored",
                    header, label, first.header
                ),
                None => periods.push((
                    idx,
                    PeriodColumn {
                        label,
                        header: header.clone(),
                    },
                )),
            }
        }

        let text = |row: usize, column: Column| -> String {
            fixed
                .get(&column)
                .map(|&c| clean_label(&table.cell(row, c).as_text()))
                .unwrap_or_default()
        };

        let mut rows = Vec::with_capacity(table.height());
        for r in 0..table.height() {
            let amounts = periods
                .iter()
                .map(|(c, _)| coerce_amount(table.cell(r, *c)))
                .collect();
            rows.push(Installment {
                cliente: text(r, Column::Cliente),
                proyecto: text(r, Column::Proyecto),
                curso: text(r, Column::Curso),
                comercial: text(r, Column::Comercial),
                estado: canonical_estado(&text(r, Column::Estado)),
                forma_pago: text(r, Column::FormaPago),
                fecha_inicio: fixed
                    .get(&Column::FechaInicio)
                    .and_then(|&c| coerce_date(table.cell(r, c))),
                fecha_factura: fixed
                    .get(&Column::FechaFactura)
                    .and_then(|&c| coerce_date(table.cell(r, c))),
                importe_total_factura: fixed
                    .get(&Column::ImporteTotalFactura)
                    .map(|&c| coerce_amount(table.cell(r, c)))
                    .unwrap_or(0.0),
                amounts,
            });
        }

        Ledger {
            headers: table.headers,
            columns: fixed.keys().copied().collect(),
            periods: periods.into_iter().map(|(_, p)| p).collect(),
            rows,
        }
    }

    pub fn has(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Columns from `required` that the sheet lacks, as header names.
    pub fn missing(&self, required: &[Column]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has(**c))
            .map(|c| c.header().to_string())
            .collect()
    }

    pub fn period_labels(&self) -> Vec<PeriodLabel> {
        self.periods.iter().map(|p| p.label).collect()
    }

    pub fn period_index(&self, label: &PeriodLabel) -> Option<usize> {
        self.periods.iter().position(|p| p.label == *label)
    }

    pub fn amount(&self, row: usize, period: usize) -> f64 {
        self.rows
            .get(row)
            .and_then(|r| r.amounts.get(period))
            .copied()
            .unwrap_or(0.0)
    }

    /// Distinct non-blank values of a text column, sorted.
    pub fn distinct_values(&self, column: Column) -> Vec<String> {
        let set: BTreeSet<String> = self
            .rows
            .iter()
            .map(|r| r.text(column))
            .filter(|v| !v.is_empty())
            .collect();
        set.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RawCell;

    fn sample() -> RawTable {
        let mut t = RawTable::new(
            ["Cliente", "Estado ", "Forma\u{a0}Pago", "Total 2020", "Enero 2024", "Notas", "Fecha Inicio"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        t.push_row(vec![
            RawCell::Text(" A ".into()),
            RawCell::Text("pendiente".into()),
            RawCell::Text("Becas ISA".into()),
            RawCell::Number(100.0),
            RawCell::Text("50,5".into()),
            RawCell::Text("x".into()),
            RawCell::Text("01/03/2024".into()),
        ]);
        t.push_row(vec![
            RawCell::Text("B".into()),
            RawCell::Text("Cobrado".into()),
            RawCell::Empty,
            RawCell::Text("n/a".into()),
        ]);
        t
    }

    #[test]
    fn builds_typed_rows() {
        let ledger = Ledger::from_table(sample());
        assert_eq!(ledger.periods.len(), 2);
        assert_eq!(ledger.rows[0].cliente, "A");
        assert_eq!(ledger.rows[0].estado, "PENDIENTE");
        assert_eq!(ledger.rows[0].forma_pago, "Becas ISA");
        assert_eq!(ledger.rows[0].amounts, vec![100.0, 50.5]);
        assert_eq!(ledger.rows[1].amounts, vec![0.0, 0.0]);
        assert_eq!(
            ledger.rows[0].fecha_inicio,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(ledger.has(Column::FormaPago));
        assert_eq!(ledger.missing(&[Column::Cliente, Column::Curso]), vec!["Curso"]);
    }

    #[test]
    fn distinct_values_skip_blanks() {
        let ledger = Ledger::from_table(sample());
        assert_eq!(ledger.distinct_values(Column::FormaPago), vec!["Becas ISA"]);
        assert_eq!(ledger.distinct_values(Column::Estado), vec!["COBRADO", "PENDIENTE"]);
    }

    #[test]
    fn repeated_period_keeps_first_column() {
        let mut t = RawTable::new(
            ["Cliente", "Total 2020", "TOTAL 2020", "Enero 2024"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        t.push_row(vec![
            RawCell::Text("A".into()),
            RawCell::Number(10.0),
            RawCell::Number(99.0),
            RawCell::Number(5.0),
        ]);
        let ledger = Ledger::from_table(t);
        assert_eq!(ledger.periods.len(), 2);
        assert_eq!(ledger.periods[0].header, "Total 2020");
        assert_eq!(ledger.rows[0].amounts, vec![10.0, 5.0]);
    }
}
