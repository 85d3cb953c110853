//! Per-access latency figures and their output lines.
use crate::traverse::RawMeasurement;
use std::fmt;
use std::io::{self, Write};

/// Header line printed once before CSV rows.
pub const CSV_HEADER: &str = "size,cycles,ns";

/// Output line style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Fixed-width `size  cycles  ns` line.
    #[default]
    Human,
    /// `size,cycles,ns` row.
    Csv,
}

/// Average cost of one load for a region size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub size: usize,
    pub cycles_per_access: f64,
    pub ns_per_access: f64,
}

impl Measurement {
    /// Derive per-access figures. `multiplier` converts counter ticks to processor cycles and
    /// `slots` is the number of loads per lap.
    pub fn new(size: usize, raw: &RawMeasurement, multiplier: f64, slots: usize) -> Self {
        let laps = raw.laps.max(1) as f64;
        let slots = slots.max(1) as f64;
        Measurement {
            size,
            cycles_per_access: raw.elapsed_ticks as f64 * multiplier / laps / slots,
            ns_per_access: raw.elapsed_ns as f64 / laps / slots,
        }
    }

    /// Borrow as a displayable line in `format`.
    pub fn line(&self, format: OutputFormat) -> Line<'_> {
        Line { measurement: self, format }
    }

    /// Write one line (with newline) in `format`.
    pub fn write_to(&self, out: &mut impl Write, format: OutputFormat) -> io::Result<()> {
        writeln!(out, "{}", self.line(format))
    }
}

/// A [`Measurement`] rendered in a given [`OutputFormat`].
pub struct Line<'a> {
    measurement: &'a Measurement,
    format: OutputFormat,
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.measurement;
        match self.format {
            OutputFormat::Human => write!(
                f,
                "{:>11} {:>9.2} cycles {:>9.2} ns",
                m.size, m.cycles_per_access, m.ns_per_access
            ),
            OutputFormat::Csv => {
                write!(f, "{},{:.2},{:.2}", m.size, m.cycles_per_access, m.ns_per_access)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawMeasurement {
        RawMeasurement { elapsed_ns: 1_000_000_000, elapsed_ticks: 2_000_000_000, laps: 1000 }
    }

    #[test]
    fn per_access_figures() {
        let m = Measurement::new(8192, &raw(), 1.5, 64);
        assert!((m.cycles_per_access - 46875.0).abs() < 1e-9);
        assert!((m.ns_per_access - 15625.0).abs() < 1e-9);
    }

    #[test]
    fn figures_positive_and_finite() {
        let tiny = RawMeasurement { elapsed_ns: 1, elapsed_ticks: 1, laps: 1 };
        for raw in [raw(), tiny] {
            let m = Measurement::new(4096, &raw, 1.0, 8);
            assert!(m.cycles_per_access.is_finite() && m.cycles_per_access > 0.0);
            assert!(m.ns_per_access.is_finite() && m.ns_per_access > 0.0);
        }
    }

    #[test]
    fn csv_row() {
        let m = Measurement { size: 16384, cycles_per_access: 4.0, ns_per_access: 1.234 };
        assert_eq!(m.line(OutputFormat::Csv).to_string(), "16384,4.00,1.23");
    }

    #[test]
    fn human_line() {
        let m = Measurement { size: 16384, cycles_per_access: 4.0, ns_per_access: 1.234 };
        assert_eq!(
            m.line(OutputFormat::Human).to_string(),
            "      16384      4.00 cycles      1.23 ns"
        );
    }

    #[test]
    fn write_appends_newline() {
        let m = Measurement { size: 1024, cycles_per_access: 3.0, ns_per_access: 1.0 };
        let mut out = Vec::new();
        m.write_to(&mut out, OutputFormat::Csv).unwrap();
        assert_eq!(out, b"1024,3.00,1.00\n");
    }
}
