//! One measurement end to end: validate, place, allocate, build, traverse, report.
use crate::affinity;
use crate::config::RunParams;
use crate::error::Result;
use crate::pagemap;
use crate::region::{self, PageKind, Region};
use crate::report::Measurement;
use crate::traverse::Traversal;
use log::{info, warn};

/// Where and how the region for each measurement is set up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setup {
    pub pages: PageKind,
    /// CPU to run on while the region is allocated and zeroed (first-touch placement).
    pub alloc_cpu: Option<usize>,
    /// CPU to run the traversal on.
    pub run_cpu: Option<usize>,
    /// Log the physical address of every page before measuring.
    pub verbose: bool,
    /// Counter ticks to processor cycles.
    pub multiplier: f64,
}

impl Default for Setup {
    fn default() -> Self {
        Setup { pages: PageKind::Small, alloc_cpu: None, run_cpu: None, verbose: false, multiplier: 1.0 }
    }
}

/// Build the chain for `params` in `words` (zero-filled) and time it.
pub fn measure_in(params: &RunParams, words: &mut [usize], multiplier: f64) -> Result<Measurement> {
    let layout = params.validate()?;
    let chain = params.pattern.build(words, &layout)?;
    let raw = Traversal::new().run(&chain, params.duration)?;
    Ok(Measurement::new(params.size, &raw, multiplier, chain.slots()))
}

/// Measure `params` in a freshly mapped region. The configuration is checked before any memory is
/// mapped, and the region is unmapped before returning.
pub fn measure(params: &RunParams, setup: &Setup) -> Result<Measurement> {
    params.validate()?;

    affinity::pin_if_requested(setup.alloc_cpu);
    let mut region = Region::allocate(params.size, setup.pages)?;
    region.fill_zero();

    if setup.verbose {
        let page = region::page_size_for(setup.pages)?;
        if let Err(e) = pagemap::log_real_addresses(&region, page) {
            warn!("Couldn't read physical addresses: {e}");
        }
    }

    affinity::pin_if_requested(setup.run_cpu);
    info!(
        "{} chain over {} with {}-byte stride",
        params.pattern,
        crate::format_size(params.size as f32),
        params.stride
    );
    measure_in(params, region.words_mut(), setup.multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Pattern;
    use crate::error::{ConfigError, Error};
    use std::time::Duration;

    fn quick(size: usize, pattern: Pattern) -> RunParams {
        RunParams {
            duration: Duration::from_millis(20),
            ..RunParams::new(size, None, pattern, region::page_size())
        }
    }

    #[test]
    fn measures_every_pattern() {
        let setup = Setup::default();
        for pattern in [Pattern::Random, Pattern::Tlb, Pattern::Sequential] {
            let size = 64 * region::page_size();
            let m = measure(&quick(size, pattern), &setup).unwrap();
            assert_eq!(m.size, size);
            assert!(m.ns_per_access > 0.0 && m.ns_per_access.is_finite(), "{pattern}");
            assert!(m.cycles_per_access > 0.0 && m.cycles_per_access.is_finite(), "{pattern}");
        }
    }

    #[test]
    fn config_error_before_allocation() {
        let setup = Setup::default();
        let params = RunParams { stride: 8, ..quick(1000, Pattern::Random) };
        match measure(&params, &setup) {
            Err(Error::Config(ConfigError::SizeNotMultiple { size: 1000, stride: 8 })) => {}
            other => panic!("expected size error, got {other:?}"),
        }
    }

    #[test]
    fn dirty_buffer_is_reported_as_chain_error() {
        let params = RunParams { stride: 64, ..quick(4096, Pattern::Sequential) };
        let mut words = vec![0usize; 4096 / crate::chain::WORD];
        words[8] = 1;
        assert!(matches!(measure_in(&params, &mut words, 1.0), Err(Error::Chain(_))));
    }
}
