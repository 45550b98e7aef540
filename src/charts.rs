//! Chart-ready figures derived from aggregates.
//!
//! A figure is a plain description (kind, axis titles, series) that the HTML
//! report serializes as a plotly spec and the web surface rasterizes.

use crate::aggregate::Aggregate;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartKind {
    /// Grouped vertical bars, one trace per series.
    Bar,
    Line,
    Pie,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub x: Vec<String>,
    pub y: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub title: String,
    pub kind: ChartKind,
    pub x_title: String,
    pub y_title: String,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: &str, kind: ChartKind, x_title: &str, y_title: &str) -> Self {
        Figure {
            title: title.to_string(),
            kind,
            x_title: x_title.to_string(),
            y_title: y_title.to_string(),
            series: Vec::new(),
        }
    }

    pub fn with_series(mut self, name: &str, x: Vec<String>, y: Vec<f64>) -> Self {
        self.series.push(Series {
            name: name.to_string(),
            x,
            y,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.y.is_empty())
    }

    /// `{ "data": [...], "layout": {...} }` in plotly's figure schema.
    pub fn to_plotly(&self) -> serde_json::Value {
        let data: Vec<serde_json::Value> = self
            .series
            .iter()
            .map(|s| match self.kind {
                ChartKind::Bar => json!({"type": "bar", "name": s.name, "x": s.x, "y": s.y}),
                ChartKind::Line => json!({
                    "type": "scatter",
                    "mode": "lines+markers",
                    "name": s.name,
                    "x": s.x,
                    "y": s.y,
                }),
                ChartKind::Pie => json!({"type": "pie", "name": s.name, "labels": s.x, "values": s.y}),
            })
            .collect();

        let mut layout = json!({
            "title": {"text": self.title},
            "barmode": "group",
            "margin": {"t": 60, "l": 60, "r": 20, "b": 120},
        });
        if self.kind != ChartKind::Pie {
            layout["xaxis"] = json!({"title": {"text": self.x_title}});
            layout["yaxis"] = json!({"title": {"text": self.y_title}});
        }

        json!({"data": data, "layout": layout})
    }
}

/// One bar trace per group (grand total excluded), periods on the x axis.
pub fn bars_by_group(title: &str, agg: &Aggregate) -> Figure {
    let x: Vec<String> = agg.periods.iter().map(|p| p.to_string()).collect();
    agg.rows.iter().fold(
        Figure::new(title, ChartKind::Bar, "Periodo", "Importe"),
        |fig, row| fig.with_series(&row.key, x.clone(), row.values.clone()),
    )
}

/// Share of each group's row total.
pub fn pie_by_group(title: &str, agg: &Aggregate) -> Figure {
    let labels = agg.rows.iter().map(|r| r.key.clone()).collect();
    let values = agg.rows.iter().map(|r| r.total()).collect();
    Figure::new(title, ChartKind::Pie, "", "").with_series(&agg.group_header, labels, values)
}
