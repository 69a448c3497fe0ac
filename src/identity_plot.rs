/*!
Quality-review output for a flat consensus: the per-position identity track as a table and as an SVG curve.
*/

use std::path::Path;

use plotters::prelude::*;

/// Rolling mean over a fixed window; position `i` of the output covers inputs `i..i+window`.
/// Returns an empty Vec if there are fewer values than the window.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return vec![];
    }
    let mut ret = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    ret.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        ret.push(sum / window as f64);
    }
    ret
}

#[derive(serde::Serialize)]
struct IdentityRow {
    position: usize,
    identity: f64,
    rolling_mean: Option<f64>
}

/// Writes the identity track as a TSV with `position`, `identity` and `rolling_mean` (empty until a full window is available).
/// # Arguments
/// * `path` - the output file
/// * `identity` - per-position identity values
/// * `window` - the rolling window size
pub fn write_identity_table(path: &Path, identity: &[f64], window: usize) -> Result<(), Box<dyn std::error::Error>> {
    let rolling = rolling_mean(identity, window);
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for (i, &value) in identity.iter().enumerate() {
        // the first full window ends at index window - 1
        let rolling_mean = (i + 1).checked_sub(window)
            .and_then(|r| rolling.get(r).copied());
        csv_writer.serialize(IdentityRow {
            position: i + 1,
            identity: value,
            rolling_mean
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

const PLOT_WIDTH: u32 = 1200;
const PLOT_HEIGHT: u32 = 400;
const PLOT_MARGIN: i32 = 20;

/// Draws the raw identity (light) and its rolling mean (dark) as an SVG.
/// Identity is plotted on a fixed 0..1 axis so plots of different organisms are comparable.
/// # Arguments
/// * `path` - the output SVG
/// * `identity` - per-position identity values
/// * `window` - the rolling window size
pub fn plot_identity(path: &Path, identity: &[f64], window: usize) -> Result<(), Box<dyn std::error::Error>> {
    let root = SVGBackend::new(path, (PLOT_WIDTH, PLOT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let plot_w = PLOT_WIDTH as i32 - 2 * PLOT_MARGIN;
    let plot_h = PLOT_HEIGHT as i32 - 2 * PLOT_MARGIN;
    let n = identity.len().max(2);
    let to_point = |index: usize, value: f64| -> (i32, i32) {
        let x = PLOT_MARGIN + ((index as f64 / (n - 1) as f64) * plot_w as f64).round() as i32;
        let y = PLOT_MARGIN + ((1.0 - value.clamp(0.0, 1.0)) * plot_h as f64).round() as i32;
        (x, y)
    };

    // axes
    root.draw(&Rectangle::new(
        [(PLOT_MARGIN, PLOT_MARGIN + plot_h), (PLOT_MARGIN + plot_w, PLOT_MARGIN + plot_h + 1)],
        BLACK.filled()
    ))?;
    root.draw(&Rectangle::new(
        [(PLOT_MARGIN - 1, PLOT_MARGIN), (PLOT_MARGIN, PLOT_MARGIN + plot_h)],
        BLACK.filled()
    ))?;

    if identity.len() > 1 {
        let raw: Vec<(i32, i32)> = identity.iter().enumerate()
            .map(|(i, &v)| to_point(i, v))
            .collect();
        root.draw(&PathElement::new(raw, RGBColor(170, 190, 230).stroke_width(1)))?;
    }

    let rolling = rolling_mean(identity, window);
    if rolling.len() > 1 {
        // align each mean with the last position of its window
        let smooth: Vec<(i32, i32)> = rolling.iter().enumerate()
            .map(|(i, &v)| to_point(i + window - 1, v))
            .collect();
        root.draw(&PathElement::new(smooth, RGBColor(20, 60, 150).stroke_width(2)))?;
    }

    root.present()?;
    Ok(())
}
