//! # Sweep
//!
//! Latency over a range of region sizes. A first pass doubles the size from `min` to `max`; later
//! rounds bisect every neighbouring pair whose latency differs by more than `threshold`, so the
//! cache and TLB transitions end up densely sampled while the flat stretches stay sparse.
use crate::error::Result;
use log::info;

/// Sweep bounds and refinement settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    pub min: usize,
    pub max: usize,
    /// Relative change between neighbours that triggers a bisection.
    pub threshold: f64,
    /// Refinement rounds after the first pass.
    pub rounds: usize,
    /// Bisected sizes must be multiples of this.
    pub granule: usize,
}

impl Default for Sweep {
    fn default() -> Self {
        Sweep { min: 1024, max: 256 * 1024 * 1024, threshold: 0.1, rounds: 20, granule: 1024 }
    }
}

impl Sweep {
    /// Run the sweep, calling `measure` once per sampled size. Samples come back sorted by size.
    pub fn run<F>(&self, mut measure: F) -> Result<Vec<(usize, f64)>>
    where
        F: FnMut(usize) -> Result<f64>,
    {
        let mut samples = Vec::new();
        let mut size = self.min.max(1);
        while size <= self.max {
            info!("Measuring {}", crate::format_size_fixed_int(size as u64));
            samples.push((size, measure(size)?));
            size = match size.checked_mul(2) {
                Some(next) => next,
                None => break,
            };
        }

        for round in 0..self.rounds {
            let added = self.refine(&mut samples, &mut measure)?;
            info!("Refinement round {round}: {added} new sizes");
            if added == 0 {
                break;
            }
        }
        samples.sort_by_key(|&(size, _)| size);
        Ok(samples)
    }

    /// One bisection round. Returns the number of sizes added.
    fn refine<F>(&self, samples: &mut Vec<(usize, f64)>, measure: &mut F) -> Result<usize>
    where
        F: FnMut(usize) -> Result<f64>,
    {
        samples.sort_by_key(|&(size, _)| size);
        let mut fresh = Vec::new();
        for pair in samples.windows(2) {
            let ((lo, lo_value), (hi, hi_value)) = (pair[0], pair[1]);
            if lo_value == 0.0 {
                continue;
            }
            let change = (hi_value - lo_value) / lo_value;
            if change.abs() <= self.threshold {
                continue;
            }
            let mid = lo + (hi - lo) / 2;
            if mid == lo || mid % self.granule != 0 {
                continue;
            }
            info!("Measuring {}", crate::format_size_fixed_int(mid as u64));
            fresh.push((mid, measure(mid)?));
        }
        let added = fresh.len();
        samples.extend(fresh);
        Ok(added)
    }
}
