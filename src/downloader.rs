//! Consolidated exports of the session's registered views: one xlsx workbook
//! with a sheet per view, one standalone HTML report, and per-view CSV.

use crate::aggregate::{CLIENTES_UNICOS, TOTAL_GENERAL};
use crate::error::{DashboardError, Result};
use crate::registry::{ExportRegistry, RegistryEntry, Table, Value};
use crate::views::canonical_order;
use log::{info, warn};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::HashMap;

/// Excel's sheet-name length limit.
pub const MAX_SHEET_NAME: usize = 31;

/// Plotly bundle referenced once from the report head.
pub const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

/// Sheet name for a registry key: characters Excel rejects are dropped and
/// the result is cut to [`MAX_SHEET_NAME`] characters.
pub fn sheet_name(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect();
    let cleaned = cleaned.trim_matches('\'');
    let cut: String = cleaned.chars().take(MAX_SHEET_NAME).collect();
    if cut.is_empty() {
        "Hoja".to_string()
    } else {
        cut
    }
}

/// One sheet of the consolidated workbook.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedSheet {
    pub key: String,
    pub name: String,
    pub table: Table,
}

/// Sheets to write, in registry insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkbookPlan {
    pub sheets: Vec<PlannedSheet>,
}

impl WorkbookPlan {
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Build the sheet plan for a registry
///
/// Sheet names must be unique ignoring case once truncated; a collision is
/// reported before anything is serialized.
///
/// # Arguments
/// * `registry` - The session's export registry
///
/// # Returns
/// * `Result<WorkbookPlan>` - One planned sheet per entry, or `ExportFailure`
pub fn plan(registry: &ExportRegistry) -> Result<WorkbookPlan> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut sheets = Vec::with_capacity(registry.len());

    for (key, entry) in registry.iter() {
        let name = sheet_name(key);
        if let Some(previous) = seen.insert(name.to_lowercase(), key.to_string()) {
            return Err(DashboardError::ExportFailure(format!(
                "views '{}' and '{}' map to the same sheet name '{}'",
                previous, key, name
            )));
        }
        sheets.push(PlannedSheet {
            key: key.to_string(),
            name,
            table: entry.table.clone(),
        });
    }

    Ok(WorkbookPlan { sheets })
}

/// Serialize the registry to an xlsx workbook
///
/// # Arguments
/// * `registry` - The session's export registry
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes, `ExportFailure` when the
///   registry is empty or the writer rejects the workbook
pub fn to_xlsx(registry: &ExportRegistry) -> Result<Vec<u8>> {
    let plan = plan(registry)?;
    write_plan(&plan)
}

pub fn write_plan(plan: &WorkbookPlan) -> Result<Vec<u8>> {
    if plan.is_empty() {
        warn!("export requested with no registered views");
        return Err(DashboardError::ExportFailure(
            "no views have been registered yet".to_string(),
        ));
    }

    let header = Format::new().set_bold();
    let amount = Format::new().set_num_format("#,##0.00");
    let mut workbook = Workbook::new();

    for sheet in &plan.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        for (c, name) in sheet.table.columns.iter().enumerate() {
            worksheet.write_string_with_format(0, c as u16, name, &header)?;
            worksheet.set_column_width(c as u16, if c == 0 { 28 } else { 16 })?;
        }
        for (r, row) in sheet.table.rows.iter().enumerate() {
            let r = (r + 1) as u32;
            for (c, value) in row.iter().enumerate() {
                let c = c as u16;
                match value {
                    Value::Text(s) => {
                        worksheet.write_string(r, c, s)?;
                    }
                    Value::Number(n) => {
                        worksheet.write_number_with_format(r, c, *n, &amount)?;
                    }
                    Value::Count(n) => {
                        worksheet.write_number(r, c, *n as f64)?;
                    }
                }
            }
        }
        worksheet.set_freeze_panes(1, 0)?;
    }

    let buffer = workbook.save_to_buffer()?;
    info!("xlsx export: {} sheets, {} bytes", plan.sheets.len(), buffer.len());
    Ok(buffer)
}

/// Convert one view table to CSV
///
/// Values use the same rendering as the HTML report (two decimals for amounts).
pub fn to_csv(table: &Table) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Value::display))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| DashboardError::ExportFailure(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DashboardError::ExportFailure(e.to_string()))
}

/// Escapes text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// JSON safe to embed inside a `<script>` element.
fn script_json(v: &serde_json::Value) -> String {
    v.to_string().replace("</", "<\\/")
}

/// Renders a table as an HTML `<table>`. Totals rows are highlighted.
pub fn table_html(table: &Table) -> String {
    let mut html = String::from("<table class=\"data\">\n<thead><tr>");
    for c in &table.columns {
        html.push_str(&format!("<th>{}</th>", escape_html(c)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for row in &table.rows {
        let is_total = matches!(row.first(), Some(Value::Text(k)) if k == TOTAL_GENERAL || k == CLIENTES_UNICOS);
        html.push_str(if is_total { "<tr class=\"total\">" } else { "<tr>" });
        for v in row {
            let class = if matches!(v, Value::Text(_)) { "" } else { " class=\"num\"" };
            html.push_str(&format!("<td{}>{}</td>", class, escape_html(&v.display())));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

/// One view's section: title, headline metrics, table, and one chart
/// container per figure with its plotly call.
pub fn view_fragment(key: &str, entry: &RegistryEntry) -> String {
    let mut html = format!(
        "<section class=\"view\" id=\"{}\">\n<h2>{}</h2>\n",
        escape_html(key),
        escape_html(&entry.title)
    );

    if !entry.metrics.is_empty() {
        html.push_str("<ul class=\"metrics\">");
        for m in &entry.metrics {
            html.push_str(&format!(
                "<li><span>{}</span><strong>{}</strong></li>",
                escape_html(&m.label),
                escape_html(&m.value.display())
            ));
        }
        html.push_str("</ul>\n");
    }

    html.push_str(&table_html(&entry.table));

    for (i, fig) in entry.figures.iter().enumerate() {
        let div = format!("fig-{}-{}", key, i);
        let spec = fig.to_plotly();
        html.push_str(&format!(
            "<div class=\"chart\" id=\"{id}\"></div>\n<script>Plotly.newPlot(\"{id}\", {data}, {layout}, {{responsive: true}});</script>\n",
            id = escape_html(&div),
            data = script_json(&spec["data"]),
            layout = script_json(&spec["layout"]),
        ));
    }

    html.push_str("</section>\n");
    html
}

const REPORT_STYLE: &str = "body{font-family:Arial,Helvetica,sans-serif;margin:24px;color:#222}\
h1{font-size:22px}h2{font-size:18px;margin-top:32px;border-bottom:1px solid #ccc}\
table.data{border-collapse:collapse;margin:12px 0}\
table.data th,table.data td{border:1px solid #ddd;padding:4px 8px}\
table.data th{background:#f0f0f0}td.num{text-align:right}tr.total td{font-weight:bold}\
ul.metrics{list-style:none;padding:0;display:flex;gap:16px}\
ul.metrics li{border:1px solid #ddd;padding:8px}ul.metrics span{display:block;font-size:12px}\
div.chart{width:100%;max-width:960px;height:420px}";

/// Serialize the registry to a standalone HTML report
///
/// Sections follow the canonical view order regardless of registration
/// order; keys that are not known views come last. The plotting library is
/// referenced once in the document head.
///
/// # Arguments
/// * `registry` - The session's export registry
/// * `generated_at` - Timestamp shown in the header
pub fn to_html(registry: &ExportRegistry, generated_at: &str) -> String {
    let mut entries: Vec<(&str, &RegistryEntry)> = registry.iter().collect();
    entries.sort_by(|a, b| canonical_order(a.0, b.0));

    let mut html = String::from("<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Informe de gestión de cobro</title>\n");
    html.push_str(&format!("<script src=\"{}\"></script>\n", PLOTLY_CDN));
    html.push_str(&format!("<style>{}</style>\n</head>\n<body>\n", REPORT_STYLE));
    html.push_str(&format!(
        "<h1>Informe de gestión de cobro</h1>\n<p>Generado: {}</p>\n",
        escape_html(generated_at)
    ));

    if entries.is_empty() {
        html.push_str("<p>No hay vistas registradas.</p>\n");
    }
    for (key, entry) in entries {
        html.push_str(&view_fragment(key, entry));
    }

    html.push_str("</body>\n</html>\n");
    html
}
