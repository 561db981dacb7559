//! SVG chart generation for training reports
//!
//! Produces the training-history curves and the confusion-matrix heatmap
//! written next to a trained model. Plain SVG strings, no rendering crate.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::training::TrainingHistory;
use crate::utils::metrics::ConfusionMatrix;

const PANEL_WIDTH: f64 = 560.0;
const PANEL_HEIGHT: f64 = 420.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_LEFT: f64 = 70.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VAL: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";
const FONT: &str = "Arial, sans-serif";

/// A named line on a chart
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, values: Vec<f64>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            values,
            color: color.to_string(),
        }
    }
}

/// Write accuracy and loss curves side by side, one point per epoch
pub fn generate_history_chart(history: &TrainingHistory, output_path: &Path) -> std::io::Result<()> {
    let pct = |v: &[f64]| v.iter().map(|x| x * 100.0).collect::<Vec<_>>();
    let accuracy = [
        DataSeries::new("Training", pct(&history.accuracy), COLOR_TRAIN),
        DataSeries::new("Validation", pct(&history.val_accuracy), COLOR_VAL),
    ];
    let loss = [
        DataSeries::new("Training", history.loss.clone(), COLOR_TRAIN),
        DataSeries::new("Validation", history.val_loss.clone(), COLOR_VAL),
    ];

    let width = PANEL_WIDTH * 2.0;
    let mut svg = svg_open(width, PANEL_HEIGHT);
    line_panel(&mut svg, 0.0, "Model Accuracy", "Accuracy (%)", &accuracy, Some((0.0, 100.0)));
    line_panel(&mut svg, PANEL_WIDTH, "Model Loss", "Loss", &loss, None);
    svg.push_str("</svg>");

    fs::write(output_path, svg)
}

/// Write a confusion-matrix heatmap with counts in each cell
pub fn generate_confusion_heatmap(
    cm: &ConfusionMatrix,
    class_names: &[String],
    output_path: &Path,
) -> std::io::Result<()> {
    let n = cm.num_classes.max(1);
    let cell = (480.0 / n as f64).clamp(24.0, 120.0);
    let left = 170.0;
    let top = 70.0;
    let width = left + cell * n as f64 + 40.0;
    let height = top + cell * n as f64 + 150.0;
    let max = cm.max_count().max(1) as f64;

    let mut svg = svg_open(width, height);
    title(&mut svg, width / 2.0, "Confusion Matrix");

    for row in 0..cm.num_classes {
        for col in 0..cm.num_classes {
            let count = cm.get(row, col);
            let intensity = count as f64 / max;
            let x = left + col as f64 * cell;
            let y = top + row as f64 * cell;
            let _ = write!(
                svg,
                r#"<rect x="{x}" y="{y}" width="{cell}" height="{cell}" fill="{}" stroke="white"/>"#,
                blue_scale(intensity)
            );
            let text_color = if intensity > 0.5 { "white" } else { COLOR_TEXT };
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="13" fill="{text_color}">{count}</text>"#,
                x + cell / 2.0,
                y + cell / 2.0 + 4.0
            );
        }
    }

    for (i, name) in class_names.iter().enumerate().take(cm.num_classes) {
        let center = i as f64 * cell + cell / 2.0;
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{FONT}" font-size="12" fill="{COLOR_TEXT}">{}</text>"#,
            left - 8.0,
            top + center + 4.0,
            escape_xml(name)
        );
        let lx = left + center;
        let ly = top + cell * cm.num_classes as f64 + 12.0;
        let _ = write!(
            svg,
            r#"<text x="{lx}" y="{ly}" text-anchor="end" font-family="{FONT}" font-size="12" fill="{COLOR_TEXT}" transform="rotate(-45 {lx} {ly})">{}</text>"#,
            escape_xml(name)
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="14" fill="{COLOR_TEXT}">Predicted Label</text>"#,
        left + cell * n as f64 / 2.0,
        height - 15.0
    );
    let _ = write!(
        svg,
        r#"<text x="18" y="{mid}" text-anchor="middle" font-family="{FONT}" font-size="14" fill="{COLOR_TEXT}" transform="rotate(-90 18 {mid})">True Label</text>"#,
        mid = top + cell * n as f64 / 2.0
    );

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

fn svg_open(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}"><rect width="{width}" height="{height}" fill="white"/>"#
    )
}

fn title(svg: &mut String, x: f64, text: &str) {
    let _ = write!(
        svg,
        r#"<text x="{x}" y="35" text-anchor="middle" font-family="{FONT}" font-size="18" font-weight="bold" fill="{COLOR_TEXT}">{}</text>"#,
        escape_xml(text)
    );
}

/// One line chart panel at horizontal offset `x0`
fn line_panel(
    svg: &mut String,
    x0: f64,
    chart_title: &str,
    y_label: &str,
    series: &[DataSeries],
    y_range: Option<(f64, f64)>,
) {
    let plot_width = PANEL_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let left = x0 + MARGIN_LEFT;
    let bottom = MARGIN_TOP + plot_height;

    let points = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let (y_min, y_max) = y_range.unwrap_or_else(|| find_range(series));
    let x_span = (points.saturating_sub(1)).max(1) as f64;

    let px = |i: usize| left + (i as f64 / x_span) * plot_width;
    let py = |v: f64| bottom - ((v - y_min) / (y_max - y_min)) * plot_height;

    title(svg, x0 + PANEL_WIDTH / 2.0, chart_title);

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = py(value);
        let _ = write!(
            svg,
            r#"<line x1="{left}" y1="{y}" x2="{}" y2="{y}" stroke="{COLOR_GRID}" stroke-width="1"/><text x="{}" y="{}" text-anchor="end" font-family="{FONT}" font-size="11" fill="{COLOR_TEXT}">{:.2}</text>"#,
            left + plot_width,
            left - 8.0,
            y + 4.0,
            value
        );
    }

    let _ = write!(
        svg,
        r#"<line x1="{left}" y1="{bottom}" x2="{}" y2="{bottom}" stroke="{COLOR_AXIS}" stroke-width="2"/><line x1="{left}" y1="{MARGIN_TOP}" x2="{left}" y2="{bottom}" stroke="{COLOR_AXIS}" stroke-width="2"/>"#,
        left + plot_width
    );

    for i in 0..points {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="11" fill="{COLOR_TEXT}">{}</text>"#,
            px(i),
            bottom + 18.0,
            i + 1
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{FONT}" font-size="13" fill="{COLOR_TEXT}">Epoch</text>"#,
        left + plot_width / 2.0,
        PANEL_HEIGHT - 20.0
    );
    let ylx = x0 + 18.0;
    let yly = PANEL_HEIGHT / 2.0;
    let _ = write!(
        svg,
        r#"<text x="{ylx}" y="{yly}" text-anchor="middle" font-family="{FONT}" font-size="13" fill="{COLOR_TEXT}" transform="rotate(-90 {ylx} {yly})">{}</text>"#,
        escape_xml(y_label)
    );

    let mut legend_y = MARGIN_TOP + 8.0;
    for s in series {
        if !s.values.is_empty() {
            let path: Vec<String> = s
                .values
                .iter()
                .enumerate()
                .map(|(i, &v)| format!("{} {:.2} {:.2}", if i == 0 { "M" } else { "L" }, px(i), py(v)))
                .collect();
            let _ = write!(
                svg,
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
                path.join(" "),
                s.color
            );
            for (i, &v) in s.values.iter().enumerate() {
                let _ = write!(
                    svg,
                    r#"<circle cx="{:.2}" cy="{:.2}" r="3.5" fill="{}"/>"#,
                    px(i),
                    py(v),
                    s.color
                );
            }
        }

        let lx = left + plot_width - 110.0;
        let _ = write!(
            svg,
            r#"<rect x="{lx}" y="{legend_y}" width="14" height="14" fill="{}"/><text x="{}" y="{}" font-family="{FONT}" font-size="12" fill="{COLOR_TEXT}">{}</text>"#,
            s.color,
            lx + 20.0,
            legend_y + 11.0,
            escape_xml(&s.name)
        );
        legend_y += 22.0;
    }
}

/// Y range over all series with a little headroom
fn find_range(series: &[DataSeries]) -> (f64, f64) {
    let values = series.iter().flat_map(|s| s.values.iter().copied());
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let min = min.min(0.0);
    if (max - min).abs() < f64::EPSILON {
        (min, min + 1.0)
    } else {
        (min, max * 1.05)
    }
}

/// White to dark blue
fn blue_scale(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_blue_scale_endpoints() {
        assert_eq!(blue_scale(0.0), "#f7fbff");
        assert_eq!(blue_scale(1.0), "#08306b");
    }

    #[test]
    fn test_find_range_flat_series() {
        let series = [DataSeries::new("flat", vec![0.5, 0.5], "#000")];
        let (lo, hi) = find_range(&series);
        assert!(hi > lo);
    }

    #[test]
    fn test_history_chart_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.svg");
        let history = TrainingHistory {
            loss: vec![1.2, 0.9, 0.7],
            accuracy: vec![0.4, 0.6, 0.7],
            val_loss: vec![1.1, 1.0, 0.95],
            val_accuracy: vec![0.45, 0.55, 0.6],
            lr: vec![1e-4; 3],
            ..Default::default()
        };

        generate_history_chart(&history, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Model Accuracy"));
        assert!(svg.contains("Model Loss"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_confusion_heatmap_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.svg");
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 1, 0], 2);
        let names = vec!["glaucoma".to_string(), "normal".to_string()];

        generate_confusion_heatmap(&cm, &names, &path).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("glaucoma"));
        assert!(svg.contains("True Label"));
    }
}
