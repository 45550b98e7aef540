use chrono::NaiveDate;
use gestion::aggregate::TOTAL_GENERAL;
use gestion::downloader::{plan, sheet_name, to_html, to_xlsx};
use gestion::headers::normalize_headers;
use gestion::ledger::Ledger;
use gestion::loader::load_bytes;
use gestion::login::{Principal, Role};
use gestion::periods::sort_labels;
use gestion::registry::{ExportRegistry, RegistryEntry, Table, Value};
use gestion::saving::{WorkbookStore, RAW_FILE, TIMESTAMP_FILE};
use gestion::session::DashboardSession;
use gestion::table::{RawCell, RawTable};
use gestion::views::{render_view, Axis, ViewFilters, ViewKey, ViewState};
use gestion::DashboardError;
use rust_xlsxwriter::Workbook;

const HEADERS: [&str; 13] = [
    "Cliente",
    "Proyecto",
    "Curso",
    "Comercial",
    "Estado",
    "Forma Pago",
    "Fecha Inicio",
    "Importe Total Factura",
    "Total 2020",
    "Total 2022",
    "Enero 2024",
    "Agosto 2024",
    "Total 2025",
];

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
}

fn text(s: &str) -> RawCell {
    RawCell::Text(s.to_string())
}

fn num(n: f64) -> RawCell {
    RawCell::Number(n)
}

/// A row with the given client, state, payment method and period amounts
/// (in `HEADERS` order from `Total 2020` on).
fn row(cliente: &str, estado: &str, forma: &str, amounts: [f64; 5]) -> Vec<RawCell> {
    let mut cells = vec![
        text(cliente),
        text("Proyecto X"),
        text("Curso Y"),
        text("Comercial Z"),
        text(estado),
        text(forma),
        text("01/03/2024"),
        num(amounts.iter().sum()),
    ];
    cells.extend(amounts.iter().map(|a| num(*a)));
    cells
}

fn table(rows: Vec<Vec<RawCell>>) -> RawTable {
    let mut t = RawTable::new(HEADERS.iter().map(|h| h.to_string()).collect());
    for r in rows {
        t.push_row(r);
    }
    t
}

fn sample() -> Ledger {
    Ledger::from_table(table(vec![
        row("A", "PENDIENTE", "TRANSFERENCIA", [100.0, 10.0, 50.0, 0.0, 0.0]),
        row("B", "COBRADO", "TRANSFERENCIA", [200.0, 0.0, 0.0, 0.0, 0.0]),
        row("C", "pendiente ", "BECAS ISA", [0.0, 30.0, 20.0, 40.0, 300.0]),
        row("D", "IMPAGADO", "Becas ISA", [5.0, -5.0, 0.0, 15.0, 0.0]),
        row("A", "PENDIENTE", "TRANSFERENCIA", [0.0, -4.0, 0.0, 0.0, 25.0]),
    ]))
}

fn render(ledger: &Ledger, view: ViewKey, filters: &ViewFilters) -> RegistryEntry {
    match render_view(Some(ledger), view, filters, today()) {
        ViewState::Ready(entry) => entry,
        other => panic!("{} did not render: {:?}", view, other),
    }
}

fn periods(labels: &[&str]) -> ViewFilters {
    let mut f = ViewFilters::default();
    f.set_axis(Axis::Periodos, labels.iter().map(|l| l.to_string()).collect());
    f
}

fn principal() -> Principal {
    Principal {
        username: "ana".into(),
        role: Role::Admin,
    }
}

#[test]
fn headers_only_workbook_renders_empty_everywhere() {
    let ledger = Ledger::from_table(table(Vec::new()));
    let registry = ExportRegistry::new();

    for view in ViewKey::ALL {
        match render_view(Some(&ledger), view, &ViewFilters::default(), today()) {
            ViewState::EmptyResult { table, .. } => assert!(table.rows.is_empty(), "{}", view),
            other => panic!("{} should be empty, got {:?}", view, other),
        }
    }

    assert!(plan(&registry).unwrap().is_empty());
    assert!(matches!(to_xlsx(&registry), Err(DashboardError::ExportFailure(_))));
    assert!(!to_html(&registry, "15/07/2024 10:00:00").contains("<section"));
}

#[test]
fn global_reconciles_two_rows() {
    let ledger = Ledger::from_table(table(vec![
        row("A", "PENDIENTE", "TRANSFERENCIA", [100.0, 0.0, 50.0, 0.0, 0.0]),
        row("B", "COBRADO", "TRANSFERENCIA", [200.0, 0.0, 0.0, 0.0, 0.0]),
    ]));
    let entry = render(&ledger, ViewKey::Global, &periods(&["Total 2020", "Enero 2024"]));
    let t = &entry.table;

    assert_eq!(t.columns[1..3], ["Total 2020".to_string(), "Enero 2024".to_string()]);
    assert_eq!(t.number("PENDIENTE", "Total 2020"), Some(100.0));
    assert_eq!(t.number("PENDIENTE", "Enero 2024"), Some(50.0));
    assert_eq!(t.number("COBRADO", "Total 2020"), Some(200.0));
    assert_eq!(t.number("COBRADO", "Enero 2024"), Some(0.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Total 2020"), Some(300.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Enero 2024"), Some(50.0));
}

#[test]
fn net_positive_client_counts_once() {
    let ledger = Ledger::from_table(table(vec![
        row("A", "PENDIENTE", "TRANSFERENCIA", [0.0, 10.0, 0.0, 0.0, 0.0]),
        row("A", "PENDIENTE", "TRANSFERENCIA", [0.0, 0.0, 0.0, 0.0, 0.0]),
        row("A", "PENDIENTE", "TRANSFERENCIA", [0.0, -5.0, 0.0, 0.0, 0.0]),
        row("B", "PENDIENTE", "TRANSFERENCIA", [0.0, 0.0, 0.0, 0.0, 0.0]),
        row("B", "PENDIENTE", "TRANSFERENCIA", [0.0, 0.0, 0.0, 0.0, 0.0]),
    ]));
    let entry = render(&ledger, ViewKey::PendienteClientes, &periods(&["Total 2022"]));
    let t = &entry.table;

    assert_eq!(t.columns, vec!["Cliente", "2022-2023", "Total fila"]);
    assert_eq!(t.number("A", "2022-2023"), Some(5.0));
    assert!(t.row_by_key("B").is_none());
    assert_eq!(t.number("Clientes únicos", "2022-2023"), Some(1.0));
}

#[test]
fn becas_isa_futuro_splits_years_and_months() {
    let mut headers: Vec<String> = HEADERS[..8].iter().map(|h| h.to_string()).collect();
    headers.extend(["Total 2025", "Agosto 2024", "Junio 2024"].map(String::from));
    let mut raw = RawTable::new(headers);
    let mut cells = row("C", "PENDIENTE", "BECAS ISA", [0.0; 5])[..8].to_vec();
    cells.extend([num(300.0), num(40.0), num(20.0)]);
    raw.push_row(cells);
    let ledger = Ledger::from_table(raw);

    let entry = render(&ledger, ViewKey::BecasIsaFuturo, &ViewFilters::default());
    let t = &entry.table;
    let labels: Vec<String> = t
        .rows
        .iter()
        .filter_map(|r| match r.first() {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(
        labels,
        vec![
            "Agosto 2024",
            "Total 2025",
            "Total años futuros",
            "Total meses restantes",
            TOTAL_GENERAL
        ]
    );
    assert_eq!(t.number("Total años futuros", "Importe"), Some(300.0));
    assert_eq!(t.number("Total meses restantes", "Importe"), Some(40.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Importe"), Some(340.0));
}

#[test]
fn long_keys_keep_their_prefix_as_sheet_name() {
    let key = "Pendiente_Clientes_por_ventana_ext";
    assert_eq!(key.len(), 34);
    assert_eq!(sheet_name(key), &key[..31]);

    let mut registry = ExportRegistry::new();
    let mut table = Table::new(vec!["Periodo".into(), "Importe".into()]);
    table.push(vec![Value::Text("Total 2020".into()), Value::Number(1.0)]);
    registry.register(
        key,
        RegistryEntry {
            title: "Larga".into(),
            table,
            figures: Vec::new(),
            metrics: Vec::new(),
        },
    );
    assert_eq!(plan(&registry).unwrap().names(), vec![&key[..31]]);
}

#[test]
fn reset_discards_workbook_and_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let store = WorkbookStore::new(dir.path()).unwrap();
    let t = table(vec![row("A", "PENDIENTE", "TRANSFERENCIA", [100.0, 0.0, 0.0, 0.0, 0.0])]);
    store.publish(b"raw", "cobros.xlsx", t).unwrap();

    let mut session = DashboardSession::new("s1", principal());
    assert!(session.sync(&store).unwrap());
    assert!(matches!(session.render(ViewKey::Global, today()), ViewState::Registered(_)));
    assert_eq!(session.export_registry.len(), 1);

    store.reset().unwrap();
    assert!(!dir.path().join(RAW_FILE).exists());
    assert!(!dir.path().join(TIMESTAMP_FILE).exists());

    assert!(session.sync(&store).unwrap());
    assert!(session.export_registry.is_empty());
    assert!(session.html(ViewKey::Global).is_none());
    let state = session.render(ViewKey::Global, today());
    assert!(matches!(state.to_error(ViewKey::Global), Some(DashboardError::MissingInput)));
}

#[test]
fn global_state_totals_match_unfiltered_grand_total() {
    let ledger = sample();
    let labels = ["Total 2020", "Total 2022", "Enero 2024", "Agosto 2024"];
    let entry = render(&ledger, ViewKey::Global, &periods(&labels));

    for (p, label) in labels.iter().enumerate() {
        let direct: f64 = ledger.rows.iter().map(|r| r.amounts[p]).sum();
        let by_state: f64 = entry
            .table
            .rows
            .iter()
            .filter(|r| !matches!(r.first(), Some(Value::Text(k)) if k == TOTAL_GENERAL))
            .filter_map(|r| r.get(entry.table.column(label).unwrap()).and_then(Value::as_f64))
            .sum();
        let grand = entry.table.number(TOTAL_GENERAL, label).unwrap();
        assert!((by_state - direct).abs() < 1e-6, "{}", label);
        assert!((grand - direct).abs() < 1e-6, "{}", label);
    }
}

#[test]
fn adding_periods_never_drops_clients() {
    let ledger = sample();
    let client_rows = |labels: &[&str]| {
        match render_view(Some(&ledger), ViewKey::PendienteClientes, &periods(labels), today()) {
            ViewState::Ready(e) => e.table.rows.len(),
            _ => 0,
        }
    };
    let mut selected: Vec<&str> = Vec::new();
    let mut previous = 0;
    for label in ["Total 2022", "Total 2020", "Enero 2024", "Agosto 2024", "Total 2025"] {
        selected.push(label);
        let n = client_rows(&selected);
        assert!(n >= previous, "{:?}: {} < {}", selected, n, previous);
        previous = n;
    }
}

#[test]
fn rendering_twice_gives_identical_entries() {
    let ledger = sample();
    for view in ViewKey::ALL {
        let a = render_view(Some(&ledger), view, &ViewFilters::default(), today());
        let b = render_view(Some(&ledger), view, &ViewFilters::default(), today());
        assert_eq!(a, b, "{}", view);
    }

    let dir = tempfile::tempdir().unwrap();
    let store = WorkbookStore::new(dir.path()).unwrap();
    store.publish(b"raw", "cobros.xlsx", table(vec![row("A", "PENDIENTE", "BECAS ISA", [1.0; 5])])).unwrap();
    let mut session = DashboardSession::new("s2", principal());
    session.sync(&store).unwrap();
    session.render(ViewKey::BecasIsaTotal, today());
    let first = session.html(ViewKey::BecasIsaTotal).map(str::to_string);
    session.render(ViewKey::BecasIsaTotal, today());
    assert_eq!(first.as_deref(), session.html(ViewKey::BecasIsaTotal));
    assert_eq!(session.export_registry.len(), 1);
}

#[test]
fn header_normalization_and_period_order() {
    let raw: Vec<String> = ["Cliente", " Cliente", "", "Total\u{a0}2020", "Estado "]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let once = normalize_headers(&raw);
    assert_eq!(normalize_headers(&once), once);

    let mut labels: Vec<String> = ["Total 2020", "Febrero 2019", "Total 2019", "Enero 2019"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    sort_labels(&mut labels);
    assert_eq!(labels, vec!["Total 2019", "Enero 2019", "Febrero 2019", "Total 2020"]);
}

#[test]
fn xlsx_upload_feeds_cobro_isa_buckets() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let headers = [
        "Cliente",
        "Estado",
        "Forma Pago",
        "Fecha Inicio",
        "Importe Total Factura",
        "Enero 2024",
    ];
    for (c, h) in headers.iter().enumerate() {
        sheet.write_string(0, c as u16, *h).unwrap();
    }
    // 45352 and 45383 are 01/03/2024 and 01/04/2024.
    let rows: [(&str, &str, &str, Option<f64>, f64); 4] = [
        ("A", "PENDIENTE", "BECAS ISA", Some(45352.0), 100.0),
        ("B", "PENDIENTE", "BECAS ISA", Some(45352.0), 50.0),
        ("C", "PENDIENTE", "BECAS ISA", Some(45383.0), 70.0),
        ("D", "PENDIENTE", "BECAS ISA", None, 999.0),
    ];
    for (r, (cliente, estado, forma, inicio, importe)) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        sheet.write_string(r, 0, *cliente).unwrap();
        sheet.write_string(r, 1, *estado).unwrap();
        sheet.write_string(r, 2, *forma).unwrap();
        match inicio {
            Some(serial) => sheet.write_number(r, 3, *serial).unwrap(),
            None => sheet.write_string(r, 3, "sin fecha").unwrap(),
        };
        sheet.write_number(r, 4, *importe).unwrap();
        sheet.write_number(r, 5, 0.0).unwrap();
    }
    let bytes = workbook.save_to_buffer().unwrap();

    let ledger = Ledger::from_table(load_bytes(&bytes, "cobros.xlsx").unwrap());
    let entry = render(&ledger, ViewKey::PendienteCobroIsa, &ViewFilters::default());
    let t = &entry.table;

    assert_eq!(t.number("Marzo 2024", "Importe Total Factura"), Some(150.0));
    assert_eq!(t.number("Marzo 2024", "Clientes únicos"), Some(2.0));
    assert_eq!(t.number("Abril 2024", "Importe Total Factura"), Some(70.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Importe Total Factura"), Some(220.0));
    let dropped = entry
        .metrics
        .iter()
        .find(|m| m.label == "Filas sin fecha de inicio válida")
        .map(|m| m.value.clone());
    assert_eq!(dropped, Some(Value::Count(1)));
}

const CALENDAR: [&str; 7] = [
    "Total 2017",
    "Total 2020",
    "Total 2023",
    "Total 2024",
    "Enero 2024",
    "Julio 2024",
    "Total 2025",
];

/// A workbook whose period columns straddle the 2024 calendar: an old total,
/// the current year's total and months, and a future total.
fn calendar() -> Ledger {
    let mut headers: Vec<String> = ["Cliente", "Proyecto", "Curso", "Comercial", "Estado", "Forma Pago"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    headers.extend(CALENDAR.iter().map(|h| h.to_string()));
    let mut t = RawTable::new(headers);

    let rows: [(&str, &str, &str, &str, [f64; 7]); 6] = [
        ("A", "Máster Datos", "PENDIENTE", "TRANSFERENCIA", [1.0, 10.0, 20.0, 30.0, 5.0, 6.0, 7.0]),
        ("B", "Grado Diseño", "PENDIENTE", "TRANSFERENCIA", [1.0, 1.0, 2.0, -8.0, 3.0, 0.0, 0.0]),
        ("C", "Grado Diseño", "COBRADO", "TRANSFERENCIA", [100.0; 7]),
        ("A", "Máster Datos", "PENDIENTE", "TRANSFERENCIA", [0.0, -10.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ("E", "Curso Libre", "PENDIENTE", "becas isa", [10.0, 0.0, 0.0, 5.0, 1.0, 1.0, 50.0]),
        ("F", "Curso Libre", "COBRADO", "Becas Isa", [0.0, 3.0, 0.0, 0.0, 2.0, 0.0, 0.0]),
    ];
    for (cliente, proyecto, estado, forma, amounts) in rows {
        let mut cells = vec![
            text(cliente),
            text(proyecto),
            text("Curso Y"),
            text("Comercial Z"),
            text(estado),
            text(forma),
        ];
        cells.extend(amounts.iter().map(|a| num(*a)));
        t.push_row(cells);
    }
    Ledger::from_table(t)
}

fn keys(t: &Table) -> Vec<String> {
    t.rows
        .iter()
        .filter_map(|r| match r.first() {
            Some(Value::Text(k)) => Some(k.clone()),
            _ => None,
        })
        .collect()
}

fn with_axis(axis: Axis, values: &[&str]) -> ViewFilters {
    let mut f = ViewFilters::default();
    f.set_axis(axis, values.iter().map(|v| v.to_string()).collect());
    f
}

#[test]
fn pending_by_period_uses_history_and_current_months() {
    let e = render(&calendar(), ViewKey::PendienteAnioMes, &ViewFilters::default());
    let t = &e.table;
    assert_eq!(t.columns, vec!["Periodo", "Importe", "Clientes únicos"]);
    assert_eq!(
        keys(t),
        vec!["Total 2020", "Total 2023", "Enero 2024", "Julio 2024", TOTAL_GENERAL]
    );

    assert_eq!(t.number("Total 2020", "Importe"), Some(1.0));
    assert_eq!(t.number("Total 2023", "Importe"), Some(22.0));
    assert_eq!(t.number("Enero 2024", "Importe"), Some(9.0));
    assert_eq!(t.number("Julio 2024", "Importe"), Some(7.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Importe"), Some(39.0));

    // A nets to zero in Total 2020
    assert_eq!(t.number("Total 2020", "Clientes únicos"), Some(1.0));
    assert_eq!(t.number("Total 2023", "Clientes únicos"), Some(2.0));
    assert_eq!(t.number("Enero 2024", "Clientes únicos"), Some(3.0));
    assert_eq!(t.number("Julio 2024", "Clientes únicos"), Some(2.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Clientes únicos"), Some(3.0));
}

#[test]
fn pending_by_period_honours_client_and_text_axes() {
    let ledger = calendar();

    let b = render(&ledger, ViewKey::PendienteAnioMes, &with_axis(Axis::Cliente, &["b "]));
    assert_eq!(b.table.number("Total 2023", "Importe"), Some(2.0));
    assert_eq!(b.table.number("Julio 2024", "Importe"), Some(0.0));
    assert_eq!(b.table.number("Julio 2024", "Clientes únicos"), Some(0.0));
    assert_eq!(b.table.number(TOTAL_GENERAL, "Importe"), Some(6.0));
    assert_eq!(b.table.number(TOTAL_GENERAL, "Clientes únicos"), Some(1.0));

    let datos = render(&ledger, ViewKey::PendienteAnioMes, &with_axis(Axis::Texto, &["datos"]));
    assert_eq!(datos.table.number("Total 2020", "Importe"), Some(0.0));
    assert_eq!(datos.table.number("Total 2020", "Clientes únicos"), Some(0.0));
    assert_eq!(datos.table.number(TOTAL_GENERAL, "Importe"), Some(31.0));
    assert_eq!(datos.table.number(TOTAL_GENERAL, "Clientes únicos"), Some(1.0));

    assert!(matches!(
        render_view(Some(&ledger), ViewKey::PendienteAnioMes, &with_axis(Axis::Texto, &["nada"]), today()),
        ViewState::EmptyResult { .. }
    ));
}

#[test]
fn becas_total_matches_payment_method_in_any_case() {
    let e = render(&calendar(), ViewKey::BecasIsaTotal, &ViewFilters::default());
    let t = &e.table;
    assert_eq!(
        keys(t),
        vec!["Total 2017", "Total 2020", "Total 2023", "Total 2024", "Total 2025", TOTAL_GENERAL]
    );
    assert_eq!(t.number("Total 2017", "Importe"), Some(10.0));
    assert_eq!(t.number("Total 2020", "Importe"), Some(3.0));
    assert_eq!(t.number("Total 2023", "Importe"), Some(0.0));
    assert_eq!(t.number("Total 2024", "Importe"), Some(5.0));
    assert_eq!(t.number("Total 2025", "Importe"), Some(50.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Importe"), Some(68.0));

    assert_eq!(t.number("Total 2020", "Clientes únicos"), Some(1.0));
    assert_eq!(t.number("Total 2023", "Clientes únicos"), Some(0.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Clientes únicos"), Some(2.0));

    let pending = render(&calendar(), ViewKey::BecasIsaTotal, &with_axis(Axis::Estado, &["pendiente"]));
    assert_eq!(pending.table.number(TOTAL_GENERAL, "Importe"), Some(65.0));
    assert_eq!(pending.table.number(TOTAL_GENERAL, "Clientes únicos"), Some(1.0));
}

#[test]
fn becas_by_month_covers_current_year_months() {
    let ledger = calendar();
    let e = render(&ledger, ViewKey::BecasIsaMes, &ViewFilters::default());
    let t = &e.table;
    assert_eq!(keys(t), vec!["Enero 2024", "Julio 2024", TOTAL_GENERAL]);
    assert_eq!(t.number("Enero 2024", "Importe"), Some(3.0));
    assert_eq!(t.number("Julio 2024", "Importe"), Some(1.0));
    assert_eq!(t.number(TOTAL_GENERAL, "Importe"), Some(4.0));
    assert_eq!(t.number("Enero 2024", "Clientes únicos"), Some(2.0));
    assert_eq!(t.number("Julio 2024", "Clientes únicos"), Some(1.0));

    let cobrado = render(&ledger, ViewKey::BecasIsaMes, &with_axis(Axis::Estado, &["Cobrado"]));
    assert_eq!(cobrado.table.number("Enero 2024", "Importe"), Some(2.0));
    assert_eq!(cobrado.table.number("Julio 2024", "Importe"), Some(0.0));
    assert_eq!(cobrado.table.number(TOTAL_GENERAL, "Importe"), Some(2.0));
    assert_eq!(cobrado.table.number(TOTAL_GENERAL, "Clientes únicos"), Some(1.0));
}
