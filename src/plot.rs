use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::error::SweepError;
use crate::sweep::ResponseDataset;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub gain_color: RGBColor,
    pub phase_color: RGBColor,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            background: RGBColor(10, 10, 10),
            gain_color: CYAN,
            phase_color: MAGENTA,
        }
    }
}

/// Renders a Bode plot (gain in dB, phase in degrees, log frequency axis)
/// of a finished sweep into PNG bytes.
pub fn render_bode_png(dataset: &ResponseDataset, style: PlotStyle) -> Result<Vec<u8>, SweepError> {
    if dataset.is_empty() {
        return Err(SweepError::Plot("dataset has no points".into()));
    }
    let points: Vec<(f64, f64, f64)> = dataset
        .iter()
        .map(|r| (r.frequency_hz, r.gain_db(), r.phase_deg()))
        .filter(|(f, g, p)| f.is_finite() && g.is_finite() && p.is_finite())
        .collect();
    if points.is_empty() {
        return Err(SweepError::Plot("no finite transfer values to plot".into()));
    }

    // Sweep order is caller-supplied and may be descending; the axis span
    // has to come from a fold, not from the endpoints.
    let (f_min, f_max) = frequency_span(points.iter().map(|p| p.0));
    let (g_min, g_max) = bounds(points.iter().map(|p| p.1), 1.0);
    let (p_min, p_max) = bounds(points.iter().map(|p| p.2), 5.0);

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let (upper, lower) = root.split_vertically(style.height / 2);

        let mut gain_chart = ChartBuilder::on(&upper)
            .margin(10)
            .caption("Gain", ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 55)
            .set_label_area_size(LabelAreaPosition::Bottom, 35)
            .build_cartesian_2d((f_min..f_max).log_scale(), g_min..g_max)?;
        gain_chart
            .configure_mesh()
            .light_line_style(WHITE.mix(0.1))
            .x_desc("Hz")
            .y_desc("dB")
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .draw()?;
        gain_chart.draw_series(LineSeries::new(
            points.iter().map(|&(f, g, _)| (f, g)),
            &style.gain_color,
        ))?;

        let mut phase_chart = ChartBuilder::on(&lower)
            .margin(10)
            .caption("Phase", ("sans-serif", 20).into_font().color(&WHITE))
            .set_label_area_size(LabelAreaPosition::Left, 55)
            .set_label_area_size(LabelAreaPosition::Bottom, 35)
            .build_cartesian_2d((f_min..f_max).log_scale(), p_min..p_max)?;
        phase_chart
            .configure_mesh()
            .light_line_style(WHITE.mix(0.1))
            .x_desc("Hz")
            .y_desc("deg")
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .draw()?;
        phase_chart.draw_series(LineSeries::new(
            points.iter().map(|&(f, _, p)| (f, p)),
            &style.phase_color,
        ))?;

        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn frequency_span(frequencies: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for f in frequencies {
        min = min.min(f);
        max = max.max(f);
    }
    // Keep the log axis well-formed for a single-point dataset.
    if max <= min {
        max = min * 1.01;
    }
    (min, max)
}

fn bounds(values: impl Iterator<Item = f64>, pad: f64) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() {
        return (-pad, pad);
    }
    if (max - min).abs() < f64::EPSILON {
        (min - pad, max + pad)
    } else {
        (min, max)
    }
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, SweepError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| SweepError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::session::{CancelToken, NullProgress};
    use crate::sim::{DutModel, SimInstrument};
    use crate::sweep::FrequencySweep;

    #[test]
    fn bode_plot_renders_png() {
        let config = SweepConfig::new(vec![100.0, 1000.0, 10_000.0], 1.0, "gen", "scope");
        let sweep = FrequencySweep::new(config).unwrap();
        let instrument = SimInstrument::new(DutModel::low_pass(1.0, 1000.0));
        let dataset = sweep
            .run(&instrument, &mut NullProgress, &CancelToken::new())
            .unwrap();
        let png = render_bode_png(&dataset, PlotStyle::default()).unwrap();
        assert!(!png.is_empty());
        // PNG signature
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn frequency_span_covers_descending_tables() {
        let (lo, hi) = frequency_span([10_000.0, 1_000.0, 100.0].into_iter());
        assert_eq!(lo, 100.0);
        assert_eq!(hi, 10_000.0);
    }

    #[test]
    fn frequency_span_widens_a_single_point() {
        let (lo, hi) = frequency_span(std::iter::once(1000.0));
        assert_eq!(lo, 1000.0);
        assert!(hi > lo);
    }

    #[test]
    fn descending_sweep_renders_every_point_in_range() {
        let config = SweepConfig::new(vec![10_000.0, 1_000.0, 100.0], 1.0, "gen", "scope");
        let sweep = FrequencySweep::new(config).unwrap();
        let instrument = SimInstrument::new(DutModel::low_pass(1.0, 1000.0));
        let dataset = sweep
            .run(&instrument, &mut NullProgress, &CancelToken::new())
            .unwrap();
        let png = render_bode_png(&dataset, PlotStyle::default()).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }
}
