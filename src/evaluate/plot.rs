use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

const WIDTH: f32 = 800.0;
const HEIGHT: f32 = 600.0;
const MARGIN: f32 = 50.0;
const LEGEND_WIDTH: f32 = 120.0;
const RADIUS: f32 = 3.0;

// matplotlib's tab10
const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn bounds(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (lo, hi) = values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if hi > lo {
        (lo, hi)
    } else {
        (lo - 1.0, lo + 1.0)
    }
}

/// Render a 2D scatter plot of `coords`, one color per cluster in `labels`,
/// as a standalone SVG file.
pub fn write_scatter_svg(path: &Path, coords: &Array2<f32>, labels: &[usize], title: &str) -> Result<()> {
    let (n, ndims) = coords.dim();
    if ndims != 2 || labels.len() != n {
        return Err(Error::shape_mismatch((labels.len(), 2), (n, ndims)));
    }

    let (xmin, xmax) = bounds(coords.column(0).iter().copied());
    let (ymin, ymax) = bounds(coords.column(1).iter().copied());
    let plot_width = WIDTH - 2.0 * MARGIN - LEGEND_WIDTH;
    let plot_height = HEIGHT - 2.0 * MARGIN;
    let sx = |x: f32| MARGIN + (x - xmin) / (xmax - xmin) * plot_width;
    let sy = |y: f32| HEIGHT - MARGIN - (y - ymin) / (ymax - ymin) * plot_height;

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
        WIDTH, HEIGHT, WIDTH, HEIGHT
    )?;
    writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        out,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="sans-serif" font-size="18">{}</text>"#,
        (WIDTH - LEGEND_WIDTH) / 2.0,
        MARGIN / 2.0 + 6.0,
        escape(title)
    )?;
    writeln!(
        out,
        r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="black"/>"#,
        MARGIN, MARGIN, plot_width, plot_height
    )?;

    writeln!(out, "<g fill-opacity=\"0.7\">")?;
    for (row, &label) in coords.outer_iter().zip(labels) {
        writeln!(
            out,
            r#"<circle cx="{:.2}" cy="{:.2}" r="{}" fill="{}"/>"#,
            sx(row[0]),
            sy(row[1]),
            RADIUS,
            PALETTE[label % PALETTE.len()]
        )?;
    }
    writeln!(out, "</g>")?;

    let nclusters = labels.iter().max().map_or(0, |&l| l + 1);
    let legend_x = WIDTH - MARGIN - LEGEND_WIDTH + 20.0;
    for k in 0..nclusters {
        let y = MARGIN + 10.0 + 20.0 * k as f32;
        writeln!(
            out,
            r#"<circle cx="{}" cy="{}" r="5" fill="{}"/>"#,
            legend_x,
            y,
            PALETTE[k % PALETTE.len()]
        )?;
        writeln!(
            out,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="12">cluster {}</text>"#,
            legend_x + 12.0,
            y + 4.0,
            k
        )?;
    }

    writeln!(out, "</svg>")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scatter_svg_has_a_point_per_row_and_legend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.svg");
        let coords = array![[0.0_f32, 0.0], [1.0, 2.0], [-3.0, 0.5]];
        write_scatter_svg(&path, &coords, &[0, 1, 1], "News <clusters> & more").unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 3 + 2);
        assert!(svg.contains("News &lt;clusters&gt; &amp; more"));
        assert!(svg.contains("cluster 1"));
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_scatter_svg_handles_identical_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.svg");
        let coords = Array2::<f32>::zeros((4, 2));
        write_scatter_svg(&path, &coords, &[0, 0, 1, 1], "flat").unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_scatter_svg_rejects_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let coords = Array2::<f32>::zeros((3, 3));
        assert!(write_scatter_svg(&dir.path().join("x.svg"), &coords, &[0, 0, 0], "x").is_err());
    }
}
