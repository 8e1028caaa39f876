//! Engineering-prefix frequency labels for progress reporting.

/// Formats a frequency with a metric prefix and three decimals, e.g.
/// `"999.000 Hz"`, `"1.000 kHz"`, `"2.500 MHz"`.
pub fn format_hz(frequency_hz: f64) -> String {
    let (scaled, unit) = if frequency_hz >= 1e9 {
        (frequency_hz / 1e9, "GHz")
    } else if frequency_hz >= 1e6 {
        (frequency_hz / 1e6, "MHz")
    } else if frequency_hz >= 1e3 {
        (frequency_hz / 1e3, "kHz")
    } else if frequency_hz >= 1.0 {
        (frequency_hz, "Hz")
    } else {
        (frequency_hz * 1e3, "mHz")
    };
    format!("{scaled:.3} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_boundaries() {
        assert_eq!(format_hz(999.0), "999.000 Hz");
        assert_eq!(format_hz(1000.0), "1.000 kHz");
        assert_eq!(format_hz(2_500_000.0), "2.500 MHz");
        assert_eq!(format_hz(1.5e9), "1.500 GHz");
        assert_eq!(format_hz(0.25), "250.000 mHz");
    }
}
