#![cfg(not(tarpaulin_include))]

//! Offline report generator: renders every view of a workbook with default
//! filters and writes the consolidated workbook and HTML report.

use chrono::{Local, NaiveDate};
use gestion::downloader::{to_html, to_xlsx};
use gestion::ledger::Ledger;
use gestion::loader::{from_csv, from_excel, UploadFormat};
use gestion::registry::ExportRegistry;
use gestion::saving::format_timestamp;
use gestion::table::parse_date;
use gestion::views::{render_view, ViewFilters, ViewKey, ViewState};
use log::{info, warn};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

struct Args {
    workbook: PathBuf,
    out_dir: PathBuf,
    today: NaiveDate,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} <workbook.xlsx|.csv> [--fecha DD/MM/YYYY] [--salida <dir>]",
        program
    )
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let program = args.first().map(String::as_str).unwrap_or("gestion-cli");
    let mut workbook = None;
    let mut out_dir = PathBuf::from(".");
    let mut today = Local::now().date_naive();

    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--fecha" => {
                let value = it.next().ok_or_else(|| usage(program))?;
                today = parse_date(value).ok_or_else(|| format!("invalid date: {}", value))?;
            }
            "--salida" => {
                out_dir = PathBuf::from(it.next().ok_or_else(|| usage(program))?);
            }
            "-h" | "--help" => return Err(usage(program)),
            other if workbook.is_none() => workbook = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument: {}\n{}", other, usage(program))),
        }
    }

    Ok(Args {
        workbook: workbook.ok_or_else(|| usage(program))?,
        out_dir,
        today,
    })
}

/// Outcome of each report file, kept apart so one failure never hides the
/// other.
struct Written {
    html: gestion::Result<PathBuf>,
    xlsx: gestion::Result<PathBuf>,
}

fn write_reports(registry: &ExportRegistry, out_dir: &Path, generated_at: &str) -> Written {
    let html_path = out_dir.join("informe_cobros.html");
    let html = fs::write(&html_path, to_html(registry, generated_at))
        .map(|_| html_path)
        .map_err(gestion::DashboardError::from);

    let xlsx_path = out_dir.join("informe_cobros.xlsx");
    let xlsx = to_xlsx(registry).and_then(|bytes| {
        fs::write(&xlsx_path, bytes)?;
        Ok(xlsx_path)
    });

    Written { html, xlsx }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };

    let name = args.workbook.to_string_lossy().to_string();
    let table = match UploadFormat::from_filename(&name) {
        UploadFormat::Csv => from_csv(&args.workbook)?,
        UploadFormat::Excel => from_excel(&args.workbook)?,
    };
    let ledger = Ledger::from_table(table);
    info!(
        "{}: {} rows, {} period columns",
        name,
        ledger.rows.len(),
        ledger.periods.len()
    );

    let mut registry = ExportRegistry::new();
    for view in ViewKey::ALL {
        let state = render_view(Some(&ledger), view, &ViewFilters::default(), args.today);
        match state {
            ViewState::Ready(entry) | ViewState::Registered(entry) => {
                info!("{}: {} rows", view.as_str(), entry.table.rows.len());
                registry.register(view.as_str(), entry);
            }
            other => {
                if let Some(e) = other.to_error(view) {
                    warn!("{}: {}", view.as_str(), e);
                }
            }
        }
    }

    fs::create_dir_all(&args.out_dir)?;
    let written = write_reports(&registry, &args.out_dir, &format_timestamp(Local::now()));

    let mut failed = false;
    for (kind, outcome) in [("HTML", written.html), ("Excel", written.xlsx)] {
        match outcome {
            Ok(path) => println!(
                "{} report with {} views written to {}",
                kind,
                registry.len(),
                path.display()
            ),
            Err(e) => {
                eprintln!("{} report not written: {}", kind, e);
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
