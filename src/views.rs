//! Receivables views.
//!
//! Every view follows the same skeleton: choose period columns, apply the
//! state filter, aggregate, derive charts and table, and hand back a
//! [`ViewState`] the session turns into a registry entry.

use crate::aggregate::{
    aggregate, client_sums, column_sums, distinct_clients, positive_clients, resolve_periods,
    AggregateFlags, PeriodSum, CLIENTES_UNICOS, TOTAL_FILA, TOTAL_GENERAL,
};
use crate::charts::{bars_by_group, pie_by_group, ChartKind, Figure};
use crate::filter::{RowFilter, Selection};
use crate::ledger::{Column, Ledger};
use crate::periods::{all_totals, month_bucket, partition, PeriodLabel, FIRST_YEAR};
use crate::registry::{Metric, RegistryEntry, Table, Value};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable keys of the receivables views, in canonical report order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViewKey {
    Global,
    PendienteAnioMes,
    PendienteClientes,
    BecasIsaTotal,
    BecasIsaMes,
    BecasIsaFuturo,
    PendienteCobroIsa,
}

impl ViewKey {
    pub const ALL: [ViewKey; 7] = [
        ViewKey::Global,
        ViewKey::PendienteAnioMes,
        ViewKey::PendienteClientes,
        ViewKey::BecasIsaTotal,
        ViewKey::BecasIsaMes,
        ViewKey::BecasIsaFuturo,
        ViewKey::PendienteCobroIsa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKey::Global => "Global",
            ViewKey::PendienteAnioMes => "Pendiente_Anio_Mes",
            ViewKey::PendienteClientes => "Pendiente_Clientes",
            ViewKey::BecasIsaTotal => "Becas_ISA_Total",
            ViewKey::BecasIsaMes => "Becas_ISA_Mes",
            ViewKey::BecasIsaFuturo => "Becas_ISA_Futuro",
            ViewKey::PendienteCobroIsa => "Pendiente_Cobro_ISA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    pub fn title(&self) -> &'static str {
        match self {
            ViewKey::Global => "Visión global por estado",
            ViewKey::PendienteAnioMes => "Pendiente por año y mes",
            ViewKey::PendienteClientes => "Clientes con deuda pendiente",
            ViewKey::BecasIsaTotal => "Becas ISA: totales anuales",
            ViewKey::BecasIsaMes => "Becas ISA: meses del año en curso",
            ViewKey::BecasIsaFuturo => "Becas ISA: cobro futuro",
            ViewKey::PendienteCobroIsa => "Pendiente de cobro ISA por mes de inicio",
        }
    }

    /// Columns the view cannot run without.
    pub fn required_columns(&self) -> &'static [Column] {
        match self {
            ViewKey::Global => &[Column::Estado],
            ViewKey::PendienteAnioMes | ViewKey::PendienteClientes => {
                &[Column::Cliente, Column::Estado]
            }
            ViewKey::BecasIsaTotal | ViewKey::BecasIsaMes | ViewKey::BecasIsaFuturo => {
                &[Column::Cliente, Column::FormaPago]
            }
            ViewKey::PendienteCobroIsa => &[
                Column::Cliente,
                Column::Estado,
                Column::FormaPago,
                Column::FechaInicio,
                Column::ImporteTotalFactura,
            ],
        }
    }

    /// Filter axes the view exposes.
    pub fn axes(&self) -> &'static [Axis] {
        match self {
            ViewKey::Global => &[
                Axis::Estado,
                Axis::FormaPago,
                Axis::Cliente,
                Axis::Periodos,
                Axis::Texto,
            ],
            ViewKey::PendienteAnioMes | ViewKey::PendienteClientes => {
                &[Axis::FormaPago, Axis::Cliente, Axis::Periodos, Axis::Texto]
            }
            ViewKey::BecasIsaTotal | ViewKey::BecasIsaMes | ViewKey::BecasIsaFuturo => {
                &[Axis::Estado, Axis::Cliente, Axis::Periodos, Axis::Texto]
            }
            ViewKey::PendienteCobroIsa => &[Axis::Cliente, Axis::Periodos, Axis::Texto],
        }
    }

    fn uses_period_columns(&self) -> bool {
        !matches!(self, ViewKey::PendienteCobroIsa)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named filter axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Estado,
    FormaPago,
    Cliente,
    Periodos,
    Texto,
}

impl Axis {
    pub const ALL: [Axis; 5] = [
        Axis::Estado,
        Axis::FormaPago,
        Axis::Cliente,
        Axis::Periodos,
        Axis::Texto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Estado => "estado",
            Axis::FormaPago => "forma_pago",
            Axis::Cliente => "cliente",
            Axis::Periodos => "periodos",
            Axis::Texto => "texto",
        }
    }
}

/// Columns searched by the free-text axis.
pub const TEXT_COLUMNS: [Column; 3] = [Column::Proyecto, Column::Curso, Column::Comercial];

/// User selections for one view. Empty lists mean "no constraint".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilters {
    pub estados: Vec<String>,
    pub formas_pago: Vec<String>,
    pub clientes: Vec<String>,
    pub periodos: Vec<String>,
    pub texto: String,
}

impl ViewFilters {
    pub fn axis(&self, axis: Axis) -> Vec<String> {
        match axis {
            Axis::Estado => self.estados.clone(),
            Axis::FormaPago => self.formas_pago.clone(),
            Axis::Cliente => self.clientes.clone(),
            Axis::Periodos => self.periodos.clone(),
            Axis::Texto if self.texto.trim().is_empty() => Vec::new(),
            Axis::Texto => vec![self.texto.clone()],
        }
    }

    pub fn set_axis(&mut self, axis: Axis, values: Vec<String>) {
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        match axis {
            Axis::Estado => self.estados = values,
            Axis::FormaPago => self.formas_pago = values,
            Axis::Cliente => self.clientes = values,
            Axis::Periodos => self.periodos = values,
            Axis::Texto => self.texto = values.join(" "),
        }
    }

    /// Period labels requested explicitly, parsed; unknown labels dropped.
    fn period_override(&self) -> Vec<PeriodLabel> {
        let mut out: Vec<PeriodLabel> = self
            .periodos
            .iter()
            .filter_map(|p| PeriodLabel::parse(p))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Where a view ended up after one render.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewState {
    /// No workbook loaded.
    NoInput,
    /// Required columns or period windows absent.
    MissingColumns { missing: Vec<String> },
    /// Filters left zero rows; the empty table keeps its declared columns.
    EmptyResult { table: Table, notice: String },
    /// Aggregation succeeded; not yet stored.
    Ready(RegistryEntry),
    /// Stored in the export registry.
    Registered(RegistryEntry),
}

impl ViewState {
    pub fn entry(&self) -> Option<&RegistryEntry> {
        match self {
            ViewState::Ready(e) | ViewState::Registered(e) => Some(e),
            _ => None,
        }
    }

    pub fn to_error(&self, view: ViewKey) -> Option<crate::DashboardError> {
        match self {
            ViewState::NoInput => Some(crate::DashboardError::MissingInput),
            ViewState::MissingColumns { missing } => Some(crate::DashboardError::SchemaMismatch {
                view: view.to_string(),
                missing: missing.clone(),
            }),
            ViewState::EmptyResult { .. } => Some(crate::DashboardError::EmptyResult {
                view: view.to_string(),
            }),
            _ => None,
        }
    }
}

/// Distinct values available to the filter selectors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub estados: Vec<String>,
    pub formas_pago: Vec<String>,
    pub clientes: Vec<String>,
    pub periodos: Vec<String>,
}

pub fn filter_options(ledger: &Ledger) -> FilterOptions {
    let mut periodos: Vec<PeriodLabel> = ledger.period_labels();
    periodos.sort();
    FilterOptions {
        estados: ledger.distinct_values(Column::Estado),
        formas_pago: ledger.distinct_values(Column::FormaPago),
        clientes: ledger.distinct_values(Column::Cliente),
        periodos: periodos.iter().map(|p| p.to_string()).collect(),
    }
}

/// Selector values for one view. Pendiente_Cobro_ISA buckets by the month of
/// `Fecha Inicio`, so its period choices are those buckets rather than the
/// workbook's period columns.
pub fn filter_options_for(ledger: &Ledger, view: ViewKey) -> FilterOptions {
    let mut options = filter_options(ledger);
    if view == ViewKey::PendienteCobroIsa {
        let buckets: BTreeSet<PeriodLabel> = ledger
            .rows
            .iter()
            .filter_map(|r| r.fecha_inicio.map(month_bucket))
            .collect();
        options.periodos = buckets.iter().map(|p| p.to_string()).collect();
    }
    options
}

/// Default period window of a view for `today`.
pub fn default_periods(ledger: &Ledger, view: ViewKey, today: NaiveDate) -> Vec<PeriodLabel> {
    let present = ledger.period_labels();
    let parts = partition(&present, today);
    let mut out = match view {
        ViewKey::Global | ViewKey::PendienteAnioMes => {
            [parts.historic_totals, parts.current_months].concat()
        }
        ViewKey::BecasIsaTotal => all_totals(&present),
        ViewKey::BecasIsaMes => parts.current_months,
        ViewKey::BecasIsaFuturo => [parts.future_totals, parts.remaining_months].concat(),
        ViewKey::PendienteClientes => {
            let mut v = [parts.historic_totals, parts.current_months, parts.future_totals].concat();
            v.extend(
                present
                    .iter()
                    .filter(|p| matches!(p, PeriodLabel::Month { year, .. } if *year > today.year())),
            );
            v
        }
        ViewKey::PendienteCobroIsa => Vec::new(),
    };
    out.sort();
    out.dedup();
    out
}

/// Periods a view will aggregate: the explicit selection when given
/// (restricted to present columns), the default window otherwise.
pub fn choose_periods(
    ledger: &Ledger,
    view: ViewKey,
    filters: &ViewFilters,
    today: NaiveDate,
) -> Vec<PeriodLabel> {
    let requested = filters.period_override();
    if requested.is_empty() || !view.axes().contains(&Axis::Periodos) {
        return default_periods(ledger, view, today);
    }
    let present: BTreeSet<PeriodLabel> = ledger.period_labels().into_iter().collect();
    requested.into_iter().filter(|p| present.contains(p)).collect()
}

/// Row filter of a view: its fixed state predicate intersected with the
/// user's selections on the axes it exposes.
pub fn row_filter(ledger: &Ledger, view: ViewKey, filters: &ViewFilters) -> RowFilter {
    let mut f = RowFilter::new();
    f = match view {
        ViewKey::Global => f,
        ViewKey::PendienteAnioMes | ViewKey::PendienteClientes => f.pending(),
        ViewKey::BecasIsaTotal | ViewKey::BecasIsaMes | ViewKey::BecasIsaFuturo => f.becas_isa(),
        ViewKey::PendienteCobroIsa => f.pending().becas_isa(),
    };

    for axis in view.axes() {
        let values = filters.axis(*axis);
        f = match axis {
            Axis::Estado if ledger.has(Column::Estado) => f.one_of(Column::Estado, values),
            Axis::FormaPago if ledger.has(Column::FormaPago) => f.one_of(Column::FormaPago, values),
            Axis::Cliente if ledger.has(Column::Cliente) => f.one_of(Column::Cliente, values),
            Axis::Texto => match values.first() {
                Some(needle) => f.contains_text(&TEXT_COLUMNS, needle),
                None => f,
            },
            _ => f,
        };
    }
    f
}

/// Renders one view against the loaded ledger.
pub fn render_view(
    ledger: Option<&Ledger>,
    view: ViewKey,
    filters: &ViewFilters,
    today: NaiveDate,
) -> ViewState {
    let Some(ledger) = ledger else {
        return ViewState::NoInput;
    };

    let mut missing = ledger.missing(view.required_columns());
    if view.uses_period_columns() && ledger.periods.is_empty() {
        missing.push("columnas de periodo (Total AAAA / Mes AAAA)".to_string());
    }
    if !missing.is_empty() {
        return ViewState::MissingColumns { missing };
    }

    let sel = row_filter(ledger, view, filters).apply(ledger);

    match view {
        ViewKey::Global => render_global(&sel, view, filters, today),
        ViewKey::PendienteAnioMes
        | ViewKey::BecasIsaTotal
        | ViewKey::BecasIsaMes
        | ViewKey::BecasIsaFuturo => render_period_sums(&sel, view, filters, today),
        ViewKey::PendienteClientes => render_clients(&sel, view, filters, today),
        ViewKey::PendienteCobroIsa => render_cobro_isa(&sel, filters),
    }
}

fn missing_window(view: ViewKey, today: NaiveDate) -> ViewState {
    let what = match view {
        ViewKey::Global | ViewKey::PendienteAnioMes => format!(
            "Total {}..Total {} o meses de {}",
            FIRST_YEAR,
            today.year() - 1,
            today.year()
        ),
        ViewKey::BecasIsaTotal => "Total AAAA".to_string(),
        ViewKey::BecasIsaMes => format!("meses de {}", today.year()),
        ViewKey::BecasIsaFuturo => format!(
            "Total {}+ o meses restantes de {}",
            today.year() + 1,
            today.year()
        ),
        _ => "columnas de periodo seleccionadas".to_string(),
    };
    ViewState::MissingColumns {
        missing: vec![what],
    }
}

fn empty_result(table: Table) -> ViewState {
    ViewState::EmptyResult {
        table,
        notice: "No hay datos para los filtros seleccionados.".to_string(),
    }
}

fn entry(view: ViewKey, table: Table, figures: Vec<Figure>, metrics: Vec<Metric>) -> ViewState {
    ViewState::Ready(RegistryEntry {
        title: view.title().to_string(),
        table,
        figures: figures.into_iter().filter(|f| !f.is_empty()).collect(),
        metrics,
    })
}

fn metric(label: &str, value: Value) -> Metric {
    Metric {
        label: label.to_string(),
        value,
    }
}

fn render_global(
    sel: &Selection,
    view: ViewKey,
    filters: &ViewFilters,
    today: NaiveDate,
) -> ViewState {
    let periods = choose_periods(sel.ledger, view, filters, today);
    if periods.is_empty() {
        return missing_window(view, today);
    }

    let flags = AggregateFlags {
        grand_total: true,
        row_total: true,
        client_counts: false,
    };
    let agg = aggregate(sel, Column::Estado, &periods, flags);
    if agg.is_empty() {
        return empty_result(agg.to_table());
    }

    let idx: Vec<usize> = resolve_periods(sel, &periods).into_iter().map(|(_, i)| i).collect();
    let total = agg.grand_total.as_ref().map(|t| t.total()).unwrap_or(0.0);
    let metrics = vec![
        metric("Importe total", Value::Number(total)),
        metric("Filas", Value::Count(sel.len() as u64)),
        metric("Clientes con saldo", Value::Count(distinct_clients(sel, &idx) as u64)),
    ];
    let figures = vec![
        bars_by_group("Importe por estado y periodo", &agg),
        pie_by_group("Reparto por estado", &agg),
    ];
    entry(view, agg.to_table(), figures, metrics)
}

fn period_sums_table(rows: &[PeriodSum], extra: &[PeriodSum], total: Option<&PeriodSum>) -> Table {
    let mut table = Table::new(vec![
        "Periodo".to_string(),
        "Importe".to_string(),
        CLIENTES_UNICOS.to_string(),
    ]);
    for r in rows.iter().chain(extra.iter()).chain(total) {
        table.push(vec![
            Value::Text(r.label.clone()),
            Value::Number(r.amount),
            Value::Count(r.clients.unwrap_or(0) as u64),
        ]);
    }
    table
}

/// Pendiente_Anio_Mes and the three Becas_ISA views: column sums with
/// per-period distinct clients.
fn render_period_sums(
    sel: &Selection,
    view: ViewKey,
    filters: &ViewFilters,
    today: NaiveDate,
) -> ViewState {
    let periods = choose_periods(sel.ledger, view, filters, today);
    if periods.is_empty() {
        return missing_window(view, today);
    }

    let flags = AggregateFlags {
        grand_total: true,
        row_total: false,
        client_counts: true,
    };
    let (rows, total) = column_sums(sel, &periods, flags);
    if rows.is_empty() {
        return empty_result(period_sums_table(&[], &[], None));
    }

    // Becas_ISA_Futuro reports future years and remaining months separately.
    let mut extra = Vec::new();
    let mut metrics = Vec::new();
    if view == ViewKey::BecasIsaFuturo {
        let resolved = resolve_periods(sel, &periods);
        let years: Vec<usize> = resolved.iter().filter(|(p, _)| p.is_total()).map(|(_, i)| *i).collect();
        let months: Vec<usize> = resolved.iter().filter(|(p, _)| !p.is_total()).map(|(_, i)| *i).collect();
        let sum_of = |idx: &[usize]| -> f64 {
            sel.iter()
                .map(|(r, _)| idx.iter().map(|p| sel.ledger.amount(r, *p)).sum::<f64>())
                .sum()
        };
        let future_years = PeriodSum {
            label: "Total años futuros".to_string(),
            amount: sum_of(&years),
            clients: Some(distinct_clients(sel, &years)),
        };
        let remaining = PeriodSum {
            label: "Total meses restantes".to_string(),
            amount: sum_of(&months),
            clients: Some(distinct_clients(sel, &months)),
        };
        metrics.push(metric("Años futuros", Value::Number(future_years.amount)));
        metrics.push(metric("Meses restantes", Value::Number(remaining.amount)));
        extra.push(future_years);
        extra.push(remaining);
    }

    if let Some(t) = &total {
        metrics.push(metric("Importe total", Value::Number(t.amount)));
        metrics.push(metric("Clientes únicos", Value::Count(t.clients.unwrap_or(0) as u64)));
    }
    metrics.push(metric("Filas", Value::Count(sel.len() as u64)));

    let labels: Vec<String> = rows.iter().map(|r| r.label.clone()).collect();
    let kind = if view == ViewKey::BecasIsaMes {
        ChartKind::Line
    } else {
        ChartKind::Bar
    };
    let figures = vec![
        Figure::new(view.title(), kind, "Periodo", "Importe").with_series(
            "Importe",
            labels.clone(),
            rows.iter().map(|r| r.amount).collect(),
        ),
        Figure::new("Clientes únicos por periodo", ChartKind::Line, "Periodo", "Clientes")
            .with_series(
                CLIENTES_UNICOS,
                labels,
                rows.iter().map(|r| r.clients.unwrap_or(0) as f64).collect(),
            ),
    ];

    entry(view, period_sums_table(&rows, &extra, total.as_ref()), figures, metrics)
}

/// A calendar window of Pendiente_Clientes.
struct Window {
    label: String,
    periods: Vec<usize>,
}

fn client_windows(resolved: &[(PeriodLabel, usize)], year: i32) -> Vec<Window> {
    let mut windows = vec![
        Window {
            label: format!("{}-2021", FIRST_YEAR),
            periods: Vec::new(),
        },
        Window {
            label: format!("2022-{}", year - 1),
            periods: Vec::new(),
        },
        Window {
            label: format!("Meses {}", year),
            periods: Vec::new(),
        },
        Window {
            label: "Futuro".to_string(),
            periods: Vec::new(),
        },
    ];
    for (label, idx) in resolved {
        let slot = match label {
            PeriodLabel::YearTotal(y) if (FIRST_YEAR..=2021).contains(y) => Some(0),
            PeriodLabel::YearTotal(y) if (2022..year).contains(y) => Some(1),
            PeriodLabel::Month { year: y, .. } if *y == year => Some(2),
            PeriodLabel::YearTotal(y) | PeriodLabel::Month { year: y, .. } if *y > year => Some(3),
            _ => None,
        };
        if let Some(slot) = slot {
            windows[slot].periods.push(*idx);
        }
    }
    windows.retain(|w| !w.periods.is_empty());
    windows
}

/// Pendiente_Clientes: one row per client that is a distinct client in at
/// least one selected period, with its debt per calendar window.
fn render_clients(
    sel: &Selection,
    view: ViewKey,
    filters: &ViewFilters,
    today: NaiveDate,
) -> ViewState {
    let periods = choose_periods(sel.ledger, view, filters, today);
    let resolved = resolve_periods(sel, &periods);
    let windows = client_windows(&resolved, today.year());
    if windows.is_empty() {
        return missing_window(view, today);
    }

    let mut columns = vec![Column::Cliente.header().to_string()];
    columns.extend(windows.iter().map(|w| w.label.clone()));
    columns.push(TOTAL_FILA.to_string());
    let mut table = Table::new(columns);

    if sel.is_empty() {
        return empty_result(table);
    }

    // Per-client, per-period sums over every windowed period.
    let all_idx: Vec<usize> = windows.iter().flat_map(|w| w.periods.iter().copied()).collect();
    let sums = client_sums(sel, &all_idx);
    let position = |p: usize| all_idx.iter().position(|q| *q == p).unwrap_or(0);

    let mut rows: Vec<(String, Vec<f64>)> = sums
        .iter()
        .filter(|(_, per_period)| per_period.iter().any(|v| *v > 0.0))
        .map(|(client, per_period)| {
            let by_window = windows
                .iter()
                .map(|w| w.periods.iter().map(|p| per_period[position(*p)]).sum::<f64>())
                .collect();
            (client.clone(), by_window)
        })
        .collect();
    if rows.is_empty() {
        return empty_result(table);
    }
    rows.sort_by(|a, b| {
        let ta: f64 = a.1.iter().sum();
        let tb: f64 = b.1.iter().sum();
        tb.total_cmp(&ta).then_with(|| a.0.cmp(&b.0))
    });

    let mut totals = vec![0.0; windows.len()];
    for (client, by_window) in &rows {
        let mut cells = vec![Value::Text(client.clone())];
        cells.extend(by_window.iter().map(|v| Value::Number(*v)));
        cells.push(Value::Number(by_window.iter().sum()));
        table.push(cells);
        for (t, v) in totals.iter_mut().zip(by_window) {
            *t += v;
        }
    }

    let mut total_cells = vec![Value::Text(TOTAL_GENERAL.to_string())];
    total_cells.extend(totals.iter().map(|v| Value::Number(*v)));
    total_cells.push(Value::Number(totals.iter().sum()));
    table.push(total_cells);

    let window_counts: Vec<usize> = windows
        .iter()
        .map(|w| positive_clients(sel, &w.periods).len())
        .collect();
    let mut count_cells = vec![Value::Text(CLIENTES_UNICOS.to_string())];
    count_cells.extend(window_counts.iter().map(|c| Value::Count(*c as u64)));
    count_cells.push(Value::Count(rows.len() as u64));
    table.push(count_cells);

    let labels: Vec<String> = windows.iter().map(|w| w.label.clone()).collect();
    let top: Vec<&(String, Vec<f64>)> = rows.iter().take(15).collect();
    let figures = vec![
        Figure::new("Clientes con deuda por ventana", ChartKind::Bar, "Ventana", "Clientes")
            .with_series(
                CLIENTES_UNICOS,
                labels.clone(),
                window_counts.iter().map(|c| *c as f64).collect(),
            ),
        Figure::new("Mayores deudores", ChartKind::Bar, "Cliente", "Importe").with_series(
            "Deuda",
            top.iter().map(|(c, _)| c.clone()).collect(),
            top.iter().map(|(_, v)| v.iter().sum()).collect(),
        ),
    ];
    let metrics = vec![
        metric("Clientes con deuda", Value::Count(rows.len() as u64)),
        metric("Deuda total", Value::Number(totals.iter().sum())),
    ];

    entry(view, table, figures, metrics)
}

fn cobro_isa_table() -> Table {
    Table::new(vec![
        "Mes Año".to_string(),
        Column::ImporteTotalFactura.header().to_string(),
        CLIENTES_UNICOS.to_string(),
    ])
}

/// Pendiente_Cobro_ISA: `Importe Total Factura` bucketed by the month of
/// `Fecha Inicio`. Rows without a readable start date are dropped here only.
fn render_cobro_isa(sel: &Selection, filters: &ViewFilters) -> ViewState {
    let view = ViewKey::PendienteCobroIsa;
    let wanted: BTreeSet<PeriodLabel> = filters.period_override().into_iter().collect();

    let mut buckets: BTreeMap<PeriodLabel, (f64, BTreeMap<String, f64>)> = BTreeMap::new();
    let mut overall: BTreeMap<String, f64> = BTreeMap::new();
    let mut dropped = 0usize;

    for (_, row) in sel.iter() {
        let Some(date) = row.fecha_inicio else {
            dropped += 1;
            continue;
        };
        let bucket = month_bucket(date);
        if !wanted.is_empty() && !wanted.contains(&bucket) {
            continue;
        }
        let (amount, clients) = buckets.entry(bucket).or_insert_with(|| (0.0, BTreeMap::new()));
        *amount += row.importe_total_factura;
        if !row.cliente.is_empty() {
            *clients.entry(row.cliente.clone()).or_insert(0.0) += row.importe_total_factura;
            *overall.entry(row.cliente.clone()).or_insert(0.0) += row.importe_total_factura;
        }
    }

    let mut table = cobro_isa_table();
    if buckets.is_empty() {
        return empty_result(table);
    }

    let positive = |m: &BTreeMap<String, f64>| m.values().filter(|v| **v > 0.0).count();
    let mut total = 0.0;
    let mut labels = Vec::with_capacity(buckets.len());
    let mut amounts = Vec::with_capacity(buckets.len());
    let mut counts = Vec::with_capacity(buckets.len());
    for (bucket, (amount, clients)) in &buckets {
        let count = positive(clients);
        table.push(vec![
            Value::Text(bucket.to_string()),
            Value::Number(*amount),
            Value::Count(count as u64),
        ]);
        total += amount;
        labels.push(bucket.to_string());
        amounts.push(*amount);
        counts.push(count as f64);
    }
    let overall_clients = positive(&overall);
    table.push(vec![
        Value::Text(TOTAL_GENERAL.to_string()),
        Value::Number(total),
        Value::Count(overall_clients as u64),
    ]);

    let figures = vec![
        Figure::new(view.title(), ChartKind::Bar, "Mes de inicio", "Importe").with_series(
            "Importe",
            labels.clone(),
            amounts,
        ),
        Figure::new("Clientes únicos por mes de inicio", ChartKind::Line, "Mes de inicio", "Clientes")
            .with_series(CLIENTES_UNICOS, labels, counts),
    ];
    let metrics = vec![
        metric("Importe total", Value::Number(total)),
        metric("Clientes únicos", Value::Count(overall_clients as u64)),
        metric("Filas sin fecha de inicio válida", Value::Count(dropped as u64)),
    ];

    entry(view, table, figures, metrics)
}

/// Canonical ordering of registry keys for the HTML report; unknown keys
/// keep their relative order after the known ones.
pub fn canonical_order(a: &str, b: &str) -> Ordering {
    let rank = |k: &str| {
        ViewKey::parse(k)
            .map(|v| v as usize)
            .unwrap_or(ViewKey::ALL.len())
    };
    rank(a).cmp(&rank(b))
}
