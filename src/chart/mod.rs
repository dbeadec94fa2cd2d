//! Chart rendering
//!
//! Charts are drawn with plotters into an in-memory RGB bitmap: optional
//! title, labelled axes with tick values, category names under bars. The data
//! comes from the table itself or from a SQL query over it.

pub mod sink;

pub use sink::ChartSink;

use crate::table::{Table, format_number, is_numeric, query};
use anyhow::{Result, anyhow, bail};
use image::RgbImage;
use plotters::prelude::*;
use plotters::style::register_font;
use polars::prelude::{DataFrame, DataType, IntoLazy, Series, col, len};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 500;
const MAX_BARS: usize = 60;
const MAX_LABEL_CHARS: usize = 14;
const VALUE_COLUMN: &str = "__plot_value";

const FONT_FAMILY: &str = "sans-serif";
static DEJAVU_SANS: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");
static FONTS: OnceLock<Result<(), String>> = OnceLock::new();

const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Bar,
    Line,
    Scatter,
    Histogram,
}

/// What the model asked to plot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub bins: Option<usize>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
    /// Plot the result of this query instead of the raw table.
    #[serde(default)]
    pub sql: Option<String>,
}

enum ChartData {
    Bars {
        labels: Vec<String>,
        values: Vec<f64>,
    },
    Histogram {
        lo: f64,
        width: f64,
        counts: Vec<f64>,
    },
    Points {
        points: Vec<(f64, f64)>,
        categories: Option<Vec<String>>,
        joined: bool,
    },
}

struct Axes {
    x: String,
    y: String,
}

/// Render a chart of the table.
pub fn render(table: &Table, spec: &ChartSpec) -> Result<RgbImage> {
    let kind = spec.kind;
    let frame = match spec.sql.as_deref().map(str::trim) {
        Some(sql) if !sql.is_empty() => query::run_sql(table, sql)?,
        _ => table.frame().clone(),
    };

    let x = spec.x.as_deref().filter(|v| !v.is_empty());
    let y = spec.y.as_deref().filter(|v| !v.is_empty());
    let (data, default_axes) = match kind {
        ChartKind::Bar => {
            let x = required(x, "x")?;
            let (labels, values) = bar_values(&frame, x, y)?;
            let axes = Axes {
                x: x.to_string(),
                y: y.map_or_else(|| "count".to_string(), |y| format!("sum of {}", y)),
            };
            (ChartData::Bars { labels, values }, axes)
        }
        ChartKind::Histogram => {
            let x = required(x, "x")?;
            let bins = spec.bins.unwrap_or(10).clamp(1, MAX_BARS);
            let (lo, width, counts) = histogram(&frame, x, bins)?;
            let axes = Axes {
                x: x.to_string(),
                y: "count".to_string(),
            };
            (ChartData::Histogram { lo, width, counts }, axes)
        }
        ChartKind::Line | ChartKind::Scatter => {
            let y = required(y, "y")?;
            let joined = kind == ChartKind::Line;
            let (points, categories) = xy_points(&frame, x, y, joined)?;
            let axes = Axes {
                x: x.unwrap_or("row").to_string(),
                y: y.to_string(),
            };
            let data = ChartData::Points {
                points,
                categories,
                joined,
            };
            (data, axes)
        }
    };
    let axes = Axes {
        x: spec.x_label.clone().unwrap_or(default_axes.x),
        y: spec.y_label.clone().unwrap_or(default_axes.y),
    };
    let title = spec.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

    ensure_fonts()?;
    let mut buffer = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    draw(&mut buffer, title, &axes, &data)?;
    tracing::debug!(kind = ?kind, title = ?title, "Rendered chart");
    RgbImage::from_raw(WIDTH, HEIGHT, buffer)
        .ok_or_else(|| anyhow!("Chart buffer has the wrong size"))
}

fn required<'a>(field: Option<&'a str>, name: &str) -> Result<&'a str> {
    match field {
        Some(v) => Ok(v),
        None => bail!("This chart kind needs the '{}' column", name),
    }
}

fn ensure_fonts() -> Result<()> {
    FONTS
        .get_or_init(|| {
            register_font(FONT_FAMILY, FontStyle::Normal, DEJAVU_SANS).map_err(|_| "invalid font data".to_string())
        })
        .clone()
        .map_err(|e| anyhow!("Failed to load chart font: {}", e))
}

fn series<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a Series> {
    frame
        .column(name)
        .map(|c| c.as_materialized_series())
        .map_err(|_| {
            let names: Vec<&str> = frame
                .get_column_names()
                .into_iter()
                .map(|n| n.as_str())
                .collect();
            anyhow!(
                "Unknown column '{}'. Available columns: {}",
                name,
                names.join(", ")
            )
        })
}

fn numeric(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = series(frame, name)?;
    if !is_numeric(column.dtype()) {
        bail!("Column '{}' is not numeric ({})", name, column.dtype());
    }
    floats(column)
}

fn floats(column: &Series) -> Result<Vec<Option<f64>>> {
    let values = column.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

fn labels(column: &Series) -> Result<Vec<String>> {
    let text = column.cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Sum of `y` per distinct `x` label (row count when `y` is absent), in
/// first-seen label order.
fn bar_values(frame: &DataFrame, x: &str, y: Option<&str>) -> Result<(Vec<String>, Vec<f64>)> {
    series(frame, x)?;
    let value = match y {
        Some(y) => {
            numeric(frame, y)?;
            col(y).sum()
        }
        None => len(),
    };
    let grouped = frame
        .clone()
        .lazy()
        .filter(col(x).is_not_null())
        .group_by_stable([col(x)])
        .agg([value.alias(VALUE_COLUMN)])
        .collect()?;

    if grouped.height() == 0 {
        bail!("Column '{}' has no values to plot", x);
    }
    if grouped.height() > MAX_BARS {
        bail!(
            "Column '{}' has {} distinct values; at most {} bars can be drawn",
            x,
            grouped.height(),
            MAX_BARS
        );
    }
    let names = labels(series(&grouped, x)?)?;
    let values = floats(series(&grouped, VALUE_COLUMN)?)?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    Ok((names, values))
}

/// Equal-width bins over the column's range: (lower edge, bin width, counts).
fn histogram(frame: &DataFrame, x: &str, bins: usize) -> Result<(f64, f64, Vec<f64>)> {
    let values: Vec<f64> = numeric(frame, x)?
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        bail!("Column '{}' has no values to plot", x);
    }
    let (mut lo, mut hi) = bounds(values.iter().copied());
    if hi <= lo {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0.0; bins];
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1.0;
    }
    Ok((lo, width, counts))
}

/// Points for line and scatter charts. Without `x` the row number is used; a
/// text `x` is placed at evenly spaced category positions.
fn xy_points(
    frame: &DataFrame,
    x: Option<&str>,
    y: &str,
    sort: bool,
) -> Result<(Vec<(f64, f64)>, Option<Vec<String>>)> {
    let ys = numeric(frame, y)?;
    let (xs, categories) = match x {
        None => ((0..ys.len()).map(|i| Some(i as f64)).collect(), None),
        Some(x) => {
            let column = series(frame, x)?;
            if is_numeric(column.dtype()) {
                (floats(column)?, None)
            } else {
                let names = labels(column)?;
                ((0..names.len()).map(|i| Some(i as f64)).collect(), Some(names))
            }
        }
    };

    let mut points: Vec<(f64, f64)> = xs
        .into_iter()
        .zip(ys)
        .filter_map(|(x, y)| Some((x?, y?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if points.is_empty() {
        bail!("No complete (x, y) pairs to plot");
    }
    if sort && categories.is_none() {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    Ok((points, categories))
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Axis range with a little headroom; never empty.
fn padded(lo: f64, hi: f64) -> (f64, f64) {
    if hi - lo < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn short_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_CHARS {
        return label.to_string();
    }
    let mut cut: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn category_at(categories: &[String], position: f64) -> String {
    let index = position.round();
    if (position - index).abs() > 1e-6 || index < 0.0 {
        return String::new();
    }
    categories
        .get(index as usize)
        .map(|l| short_label(l))
        .unwrap_or_default()
}

fn draw_error(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("Failed to draw chart: {}", e)
}

fn draw(buffer: &mut [u8], title: Option<&str>, axes: &Axes, data: &ChartData) -> Result<()> {
    let root = BitMapBackend::with_buffer(buffer, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_error)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20).x_label_area_size(50).y_label_area_size(70);
    if let Some(title) = title {
        builder.caption(title, (FONT_FAMILY, 26));
    }

    match data {
        ChartData::Bars { labels, values } => draw_bars(&mut builder, axes, labels, values)?,
        ChartData::Histogram { lo, width, counts } => {
            draw_histogram(&mut builder, axes, *lo, *width, counts)?
        }
        ChartData::Points {
            points,
            categories,
            joined,
        } => draw_points(&mut builder, axes, points, categories.as_deref(), *joined)?,
    }

    root.present().map_err(draw_error)?;
    Ok(())
}

fn draw_bars<DB: DrawingBackend>(
    builder: &mut ChartBuilder<'_, '_, DB>,
    axes: &Axes,
    labels: &[String],
    values: &[f64],
) -> Result<()> {
    let (lo, hi) = bounds(values.iter().copied().chain([0.0]));
    let (pad_lo, pad_hi) = padded(lo, hi);
    let y_range = (if lo < 0.0 { pad_lo } else { 0.0 })..(if hi > 0.0 { pad_hi } else { 0.0 });
    let y_range = if y_range.end > y_range.start {
        y_range
    } else {
        0.0..1.0
    };

    let mut chart = builder
        .build_cartesian_2d((0..labels.len()).into_segmented(), y_range)
        .map_err(draw_error)?;

    let x_format = |v: &SegmentValue<usize>| match v {
        SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
            labels.get(*i).map(|l| short_label(l)).unwrap_or_default()
        }
        SegmentValue::Last => String::new(),
    };
    let y_format = |v: &f64| format_number(*v);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&x_format)
        .y_label_formatter(&y_format)
        .x_desc(axes.x.clone())
        .y_desc(axes.y.clone())
        .draw()
        .map_err(draw_error)?;

    chart
        .draw_series(values.iter().enumerate().map(|(i, v)| {
            let mut bar = Rectangle::new(
                [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), *v)],
                PALETTE[i % PALETTE.len()].filled(),
            );
            bar.set_margin(0, 0, 6, 6);
            bar
        }))
        .map_err(draw_error)?;
    Ok(())
}

fn draw_histogram<DB: DrawingBackend>(
    builder: &mut ChartBuilder<'_, '_, DB>,
    axes: &Axes,
    lo: f64,
    width: f64,
    counts: &[f64],
) -> Result<()> {
    let hi = lo + width * counts.len() as f64;
    let top = counts.iter().copied().fold(1.0, f64::max) * 1.1;
    let mut chart = builder
        .build_cartesian_2d(lo..hi, 0.0..top)
        .map_err(draw_error)?;

    let format = |v: &f64| format_number(*v);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_label_formatter(&format)
        .y_label_formatter(&format)
        .x_desc(axes.x.clone())
        .y_desc(axes.y.clone())
        .draw()
        .map_err(draw_error)?;

    chart
        .draw_series(counts.iter().enumerate().map(|(i, count)| {
            let x0 = lo + width * i as f64;
            let mut bar = Rectangle::new([(x0, 0.0), (x0 + width, *count)], PALETTE[0].filled());
            bar.set_margin(0, 0, 1, 1);
            bar
        }))
        .map_err(draw_error)?;
    Ok(())
}

fn draw_points<DB: DrawingBackend>(
    builder: &mut ChartBuilder<'_, '_, DB>,
    axes: &Axes,
    points: &[(f64, f64)],
    categories: Option<&[String]>,
    joined: bool,
) -> Result<()> {
    let (x_lo, x_hi) = match categories {
        Some(names) => (-0.5, names.len() as f64 - 0.5),
        None => {
            let (lo, hi) = bounds(points.iter().map(|p| p.0));
            padded(lo, hi)
        }
    };
    let (y_lo, y_hi) = bounds(points.iter().map(|p| p.1));
    let (y_lo, y_hi) = padded(y_lo, y_hi);
    let mut chart = builder
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(draw_error)?;

    let x_format = |v: &f64| match categories {
        Some(names) => category_at(names, *v),
        None => format_number(*v),
    };
    let y_format = |v: &f64| format_number(*v);
    let mut mesh = chart.configure_mesh();
    mesh.x_label_formatter(&x_format)
        .y_label_formatter(&y_format)
        .x_desc(axes.x.clone())
        .y_desc(axes.y.clone());
    if let Some(names) = categories {
        mesh.x_labels(names.len().min(MAX_BARS)).disable_x_mesh();
    }
    mesh.draw().map_err(draw_error)?;

    let color = PALETTE[0];
    if joined {
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
            .map_err(draw_error)?;
    }
    if !joined || points.len() <= MAX_BARS {
        chart
            .draw_series(
                points
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 3, color.filled())),
            )
            .map_err(draw_error)?;
    }
    Ok(())
}
