#![cfg(not(tarpaulin_include))]
#![cfg(feature = "web")]

//! PNG rendering of view figures for the dashboard pages.

use crate::charts::{ChartKind, Figure};
use crate::error::{DashboardError, Result};
use plotters::prelude::*;
use std::io::Read;

/// Colors assigned to series (and pie slices) in order.
const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

fn color(i: usize) -> RGBColor {
    PALETTE[i % PALETTE.len()]
}

/// Image size for rendered figures
#[derive(Clone, Copy, Debug)]
pub struct GraphOptions {
    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            width: 960,
            height: 480,
        }
    }
}

fn draw_err(e: impl std::fmt::Display) -> DashboardError {
    DashboardError::ExportFailure(format!("chart rendering failed: {}", e))
}

/// Renders a figure to PNG bytes
///
/// The bitmap backend only writes encoded images to a path, so the figure is
/// drawn into a temporary file which is read back and removed.
///
/// # Arguments
/// * `figure` - Figure to draw
/// * `options` - Image size
///
/// # Returns
/// * `Result<Vec<u8>>` - PNG data
pub fn render_png(figure: &Figure, options: GraphOptions) -> Result<Vec<u8>> {
    let tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
    let path = tmp.path().to_path_buf();
    {
        let root = BitMapBackend::new(&path, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        match figure.kind {
            ChartKind::Pie => draw_pie(&root, figure, options)?,
            ChartKind::Bar | ChartKind::Line => draw_cartesian(&root, figure)?,
        }
        root.present().map_err(draw_err)?;
    }

    let mut buffer = Vec::new();
    std::fs::File::open(&path)?.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn draw_cartesian(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    figure: &Figure,
) -> Result<()> {
    let labels: Vec<String> = figure
        .series
        .first()
        .map(|s| s.x.clone())
        .unwrap_or_default();
    let n = labels.len().max(1);

    let values = figure.series.iter().flat_map(|s| s.y.iter().copied());
    let (min_y, max_y) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((max_y - min_y) * 0.05).max(1.0);

    let mut chart = ChartBuilder::on(root)
        .caption(&figure.title, ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), (min_y - pad)..(max_y + pad))
        .map_err(draw_err)?;

    let label_at = |x: &f64| {
        let i = x.round();
        if (x - i).abs() < 1e-6 && i >= 0.0 {
            labels.get(i as usize).cloned().unwrap_or_default()
        } else {
            String::new()
        }
    };
    chart
        .configure_mesh()
        .x_labels(n)
        .x_label_formatter(&label_at)
        .x_desc(&figure.x_title)
        .y_desc(&figure.y_title)
        .disable_x_mesh()
        .draw()
        .map_err(draw_err)?;

    let groups = figure.series.len().max(1) as f64;
    let width = 0.8 / groups;
    for (si, series) in figure.series.iter().enumerate() {
        let c = color(si);
        match figure.kind {
            ChartKind::Bar => {
                let left = -0.4 + si as f64 * width;
                chart
                    .draw_series(series.y.iter().enumerate().map(|(i, y)| {
                        let x0 = i as f64 + left;
                        Rectangle::new([(x0, 0.0), (x0 + width, *y)], c.filled())
                    }))
                    .map_err(draw_err)?
                    .label(series.name.clone())
                    .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], c.filled()));
            }
            _ => {
                chart
                    .draw_series(LineSeries::new(
                        series.y.iter().enumerate().map(|(i, y)| (i as f64, *y)),
                        c.stroke_width(2),
                    ))
                    .map_err(draw_err)?
                    .label(series.name.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], c));
                chart
                    .draw_series(
                        series
                            .y
                            .iter()
                            .enumerate()
                            .map(|(i, y)| Circle::new((i as f64, *y), 3, c.filled())),
                    )
                    .map_err(draw_err)?;
            }
        }
    }

    if figure.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(draw_err)?;
    }
    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    figure: &Figure,
    options: GraphOptions,
) -> Result<()> {
    let root = root
        .titled(&figure.title, ("sans-serif", 24).into_font())
        .map_err(draw_err)?;
    let Some(series) = figure.series.first() else {
        return Ok(());
    };

    // Slices need positive sizes.
    let (labels, sizes): (Vec<String>, Vec<f64>) = series
        .x
        .iter()
        .cloned()
        .zip(series.y.iter().copied())
        .filter(|(_, v)| *v > 0.0)
        .unzip();
    if sizes.is_empty() {
        return Ok(());
    }
    let colors: Vec<RGBColor> = (0..sizes.len()).map(color).collect();

    let center = ((options.width / 2) as i32, (options.height / 2) as i32);
    let radius = (options.width.min(options.height) as f64) * 0.35;
    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
    pie.label_style(("sans-serif", 14).into_font());
    pie.percentages(("sans-serif", 12).into_font().color(&WHITE));
    root.draw(&pie).map_err(draw_err)?;
    Ok(())
}
