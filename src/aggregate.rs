//! Group-and-sum over period columns.
//!
//! All receivables arithmetic goes through here so that the per-state totals
//! of the Global view reconcile with every other projection of the same rows.

use crate::filter::Selection;
use crate::ledger::Column;
use crate::periods::PeriodLabel;
use crate::registry::{Table, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const TOTAL_GENERAL: &str = "TOTAL GENERAL";
pub const TOTAL_FILA: &str = "Total fila";
pub const CLIENTES_UNICOS: &str = "Clientes únicos";

/// What to compute besides the per-group sums.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregateFlags {
    /// Append a `TOTAL GENERAL` row.
    pub grand_total: bool,
    /// Add a `Total fila` column summing across the periods.
    pub row_total: bool,
    /// Compute per-period distinct-client counts.
    pub client_counts: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupRow {
    pub key: String,
    pub values: Vec<f64>,
}

impl GroupRow {
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// Result of grouping a selection by one column.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    pub group_header: String,
    /// Requested periods that exist in the ledger, in request order.
    pub periods: Vec<PeriodLabel>,
    pub rows: Vec<GroupRow>,
    pub grand_total: Option<GroupRow>,
    pub client_counts: Option<Vec<usize>>,
    pub row_total: bool,
}

impl Aggregate {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &str) -> Option<&GroupRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn period_position(&self, label: &PeriodLabel) -> Option<usize> {
        self.periods.iter().position(|p| p == label)
    }

    /// Materializes the aggregate as a flat table: group column, one column
    /// per period, optional `Total fila`, then the grand-total row and the
    /// distinct-client row.
    pub fn to_table(&self) -> Table {
        let mut columns = vec![self.group_header.clone()];
        columns.extend(self.periods.iter().map(|p| p.to_string()));
        if self.row_total {
            columns.push(TOTAL_FILA.to_string());
        }

        let mut table = Table::new(columns);
        let render = |row: &GroupRow| {
            let mut cells = vec![Value::Text(row.key.clone())];
            cells.extend(row.values.iter().map(|v| Value::Number(*v)));
            if self.row_total {
                cells.push(Value::Number(row.total()));
            }
            cells
        };

        for row in &self.rows {
            table.push(render(row));
        }
        if let Some(total) = &self.grand_total {
            table.push(render(total));
        }
        if let Some(counts) = &self.client_counts {
            if !self.rows.is_empty() {
                let mut cells = vec![Value::Text(CLIENTES_UNICOS.to_string())];
                cells.extend(counts.iter().map(|c| Value::Count(*c as u64)));
                if self.row_total {
                    cells.push(Value::Text(String::new()));
                }
                table.push(cells);
            }
        }
        table
    }
}

/// Label used for rows whose group value is blank.
pub fn blank_label(column: Column) -> String {
    format!("SIN {}", column.header().to_uppercase())
}

/// Resolves requested periods to ledger positions; absent ones are skipped.
pub fn resolve_periods(sel: &Selection, periods: &[PeriodLabel]) -> Vec<(PeriodLabel, usize)> {
    let mut out: Vec<(PeriodLabel, usize)> = Vec::with_capacity(periods.len());
    for p in periods {
        if let Some(idx) = sel.ledger.period_index(p) {
            if out.iter().all(|(q, _)| q != p) {
                out.push((*p, idx));
            }
        }
    }
    out
}

/// Groups `sel` by `group` and sums each requested period.
pub fn aggregate(
    sel: &Selection,
    group: Column,
    periods: &[PeriodLabel],
    flags: AggregateFlags,
) -> Aggregate {
    let resolved = resolve_periods(sel, periods);
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for (row_idx, row) in sel.iter() {
        let mut key = row.text(group);
        if key.is_empty() {
            key = blank_label(group);
        }
        let sums = groups
            .entry(key)
            .or_insert_with(|| vec![0.0; resolved.len()]);
        for (slot, (_, p)) in resolved.iter().enumerate() {
            sums[slot] += sel.ledger.amount(row_idx, *p);
        }
    }

    let rows: Vec<GroupRow> = groups
        .into_iter()
        .map(|(key, values)| GroupRow { key, values })
        .collect();

    let grand_total = (flags.grand_total && !rows.is_empty()).then(|| GroupRow {
        key: TOTAL_GENERAL.to_string(),
        values: (0..resolved.len())
            .map(|i| rows.iter().map(|r| r.values[i]).sum())
            .collect(),
    });

    let client_counts = flags.client_counts.then(|| {
        resolved
            .iter()
            .map(|(_, p)| distinct_clients(sel, &[*p]))
            .collect()
    });

    Aggregate {
        group_header: group.header().to_string(),
        periods: resolved.into_iter().map(|(p, _)| p).collect(),
        rows,
        grand_total,
        client_counts,
        row_total: flags.row_total,
    }
}

/// Per-client sums over the given ledger period positions, keyed by client.
/// Blank client identifiers are ignored.
pub fn client_sums(sel: &Selection, period_idx: &[usize]) -> BTreeMap<String, Vec<f64>> {
    let mut out: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (row_idx, row) in sel.iter() {
        if row.cliente.is_empty() {
            continue;
        }
        let sums = out
            .entry(row.cliente.clone())
            .or_insert_with(|| vec![0.0; period_idx.len()]);
        for (slot, p) in period_idx.iter().enumerate() {
            sums[slot] += sel.ledger.amount(row_idx, *p);
        }
    }
    out
}

/// Clients whose summed value across `period_idx` is strictly positive.
pub fn positive_clients(sel: &Selection, period_idx: &[usize]) -> BTreeSet<String> {
    client_sums(sel, period_idx)
        .into_iter()
        .filter(|(_, sums)| sums.iter().sum::<f64>() > 0.0)
        .map(|(c, _)| c)
        .collect()
}

/// Number of clients whose summed value across `period_idx` is strictly positive.
pub fn distinct_clients(sel: &Selection, period_idx: &[usize]) -> usize {
    positive_clients(sel, period_idx).len()
}

/// One row of a column-sum aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodSum {
    pub label: String,
    pub amount: f64,
    pub clients: Option<usize>,
}

/// Column sums for views without a group key: one entry per present period.
pub fn column_sums(
    sel: &Selection,
    periods: &[PeriodLabel],
    flags: AggregateFlags,
) -> (Vec<PeriodSum>, Option<PeriodSum>) {
    let resolved = resolve_periods(sel, periods);
    if sel.is_empty() {
        return (Vec::new(), None);
    }

    let rows: Vec<PeriodSum> = resolved
        .iter()
        .map(|(label, p)| PeriodSum {
            label: label.to_string(),
            amount: sel.iter().map(|(i, _)| sel.ledger.amount(i, *p)).sum(),
            clients: flags.client_counts.then(|| distinct_clients(sel, &[*p])),
        })
        .collect();

    let total = flags.grand_total.then(|| {
        let idx: Vec<usize> = resolved.iter().map(|(_, p)| *p).collect();
        PeriodSum {
            label: TOTAL_GENERAL.to_string(),
            amount: rows.iter().map(|r| r.amount).sum(),
            clients: flags.client_counts.then(|| distinct_clients(sel, &idx)),
        }
    });

    (rows, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RowFilter;
    use crate::ledger::{Installment, Ledger, PeriodColumn};

    fn ledger() -> Ledger {
        let periods = ["Total 2020", "Enero 2024"]
            .iter()
            .map(|l| PeriodColumn {
                label: PeriodLabel::parse(l).unwrap(),
                header: l.to_string(),
            })
            .collect();
        let row = |c: &str, e: &str, a: Vec<f64>| Installment {
            cliente: c.into(),
            estado: e.into(),
            amounts: a,
            ..Default::default()
        };
        Ledger {
            periods,
            rows: vec![
                row("A", "PENDIENTE", vec![100.0, 50.0]),
                row("B", "COBRADO", vec![200.0, 0.0]),
                row("A", "PENDIENTE", vec![-20.0, 0.0]),
                row("C", "", vec![1.0, 1.0]),
            ],
            ..Default::default()
        }
    }

    fn labels(v: &[&str]) -> Vec<PeriodLabel> {
        v.iter().filter_map(|l| PeriodLabel::parse(l)).collect()
    }

    #[test]
    fn groups_and_totals() {
        let l = ledger();
        let sel = Selection::all(&l);
        let flags = AggregateFlags {
            grand_total: true,
            row_total: true,
            client_counts: true,
        };
        let agg = aggregate(&sel, Column::Estado, &labels(&["Total 2020", "Enero 2024"]), flags);
        assert_eq!(agg.row("PENDIENTE").unwrap().values, vec![80.0, 50.0]);
        assert_eq!(agg.row("COBRADO").unwrap().values, vec![200.0, 0.0]);
        assert_eq!(agg.row("SIN ESTADO").unwrap().values, vec![1.0, 1.0]);
        assert_eq!(agg.grand_total.as_ref().unwrap().values, vec![281.0, 51.0]);
        assert_eq!(agg.client_counts, Some(vec![3, 2]));
    }

    #[test]
    fn absent_periods_are_skipped() {
        let l = ledger();
        let sel = Selection::all(&l);
        let agg = aggregate(
            &sel,
            Column::Estado,
            &labels(&["Total 2019", "Enero 2024"]),
            AggregateFlags::default(),
        );
        assert_eq!(agg.periods, labels(&["Enero 2024"]));
        assert_eq!(agg.to_table().columns, vec!["Estado", "Enero 2024"]);
    }

    #[test]
    fn empty_selection_has_no_total_row() {
        let l = ledger();
        let sel = RowFilter::new().equals(Column::Estado, "INCOBRABLE").apply(&l);
        let flags = AggregateFlags {
            grand_total: true,
            ..Default::default()
        };
        let agg = aggregate(&sel, Column::Estado, &labels(&["Total 2020"]), flags);
        assert!(agg.is_empty());
        assert!(agg.grand_total.is_none());
        assert_eq!(agg.to_table().rows.len(), 0);
        assert_eq!(agg.to_table().columns, vec!["Estado", "Total 2020"]);
    }

    #[test]
    fn distinct_clients_use_net_sums() {
        let l = ledger();
        let sel = Selection::all(&l);
        // A nets 80 in Total 2020, B 200, C 1
        assert_eq!(distinct_clients(&sel, &[0]), 3);
        // only A and C are positive in Enero 2024
        assert_eq!(distinct_clients(&sel, &[1]), 2);
    }

    #[test]
    fn column_sums_per_period() {
        let l = ledger();
        let sel = RowFilter::new().pending().apply(&l);
        let flags = AggregateFlags {
            grand_total: true,
            row_total: false,
            client_counts: true,
        };
        let (rows, total) = column_sums(&sel, &labels(&["Total 2020", "Enero 2024"]), flags);
        assert_eq!(rows[0].amount, 80.0);
        assert_eq!(rows[1].amount, 50.0);
        assert_eq!(rows[0].clients, Some(1));
        let total = total.unwrap();
        assert_eq!(total.amount, 130.0);
        assert_eq!(total.clients, Some(1));
    }
}
