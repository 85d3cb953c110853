//! Run parameters for one measurement, their defaults and validation.
pub use crate::chain::UNROLL;
use crate::chain::{Layout, Pattern, WORD};
use crate::error::ConfigError;
use std::time::Duration;

/// Cache line size assumed when none is given (POWER7/8 line size).
pub const DEFAULT_CACHELINE: usize = 128;

/// Below this size the default stride drops to one word, so even tiny regions hold enough links
/// that consecutive laps don't overlap in the pipeline.
pub const SMALL_REGION: usize = 16 * 1024;

/// Parameters for one core invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// Region size in bytes.
    pub size: usize,
    /// Bytes between slots.
    pub stride: usize,
    pub pattern: Pattern,
    /// Minimum time to keep lapping.
    pub duration: Duration,
    /// Put links in the last word of each stride region.
    pub end_of_line: bool,
    pub cacheline: usize,
}

impl RunParams {
    /// Parameters for `size` with the stride picked by [`default_stride`] unless given.
    pub fn new(size: usize, stride: Option<usize>, pattern: Pattern, page_size: usize) -> Self {
        let cacheline = DEFAULT_CACHELINE;
        RunParams {
            size,
            stride: stride.unwrap_or_else(|| default_stride(pattern, size, page_size, cacheline)),
            pattern,
            duration: Duration::from_secs(1),
            end_of_line: false,
            cacheline,
        }
    }

    /// Check the parameters and derive the chain geometry. Runs before any memory is touched.
    pub fn validate(&self) -> Result<Layout, ConfigError> {
        if self.stride < WORD || self.stride % WORD != 0 {
            return Err(ConfigError::BadStride { stride: self.stride, word: WORD });
        }
        if self.cacheline < WORD || self.cacheline % WORD != 0 {
            return Err(ConfigError::BadCacheline(self.cacheline));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        let granule = self
            .stride
            .checked_mul(UNROLL)
            .ok_or(ConfigError::SizeNotMultiple { size: self.size, stride: self.stride })?;
        if self.size == 0 || self.size % granule != 0 {
            return Err(ConfigError::SizeNotMultiple { size: self.size, stride: self.stride });
        }
        Ok(Layout {
            slots: self.size / self.stride,
            stride: self.stride,
            cacheline: self.cacheline,
            end_of_line: self.end_of_line,
        })
    }
}

/// Stride used when none is given: one page per link for the TLB pattern, otherwise one word for
/// small regions and one cache line for the rest.
pub fn default_stride(pattern: Pattern, size: usize, page_size: usize, cacheline: usize) -> usize {
    match pattern {
        Pattern::Tlb => page_size,
        _ if size < SMALL_REGION => WORD,
        _ => cacheline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, stride: usize) -> RunParams {
        RunParams { stride, ..RunParams::new(size, None, Pattern::Random, 4096) }
    }

    #[test]
    fn size_must_be_multiple_of_eight_strides() {
        assert_eq!(
            params(1000, 8).validate(),
            Err(ConfigError::SizeNotMultiple { size: 1000, stride: 8 })
        );
        assert_eq!(
            params(0, 8).validate(),
            Err(ConfigError::SizeNotMultiple { size: 0, stride: 8 })
        );
        let layout = params(4096, 512).validate().unwrap();
        assert_eq!(layout.slots, 8);
    }

    #[test]
    fn stride_must_hold_a_word() {
        assert!(matches!(params(4096, 4).validate(), Err(ConfigError::BadStride { .. })));
        assert!(matches!(params(4800, 12).validate(), Err(ConfigError::BadStride { .. })));
    }

    #[test]
    fn zero_duration_rejected() {
        let p = RunParams { duration: Duration::ZERO, ..params(4096, 64) };
        assert_eq!(p.validate(), Err(ConfigError::ZeroDuration));
    }

    #[test]
    fn default_strides() {
        assert_eq!(default_stride(Pattern::Tlb, 1 << 20, 65536, 128), 65536);
        assert_eq!(default_stride(Pattern::Random, 8192, 4096, 128), WORD);
        assert_eq!(default_stride(Pattern::Sequential, 16384, 4096, 128), 128);
        assert_eq!(RunParams::new(1 << 20, Some(256), Pattern::Tlb, 4096).stride, 256);
    }

    #[test]
    fn layout_carries_flags() {
        let p = RunParams { end_of_line: true, cacheline: 64, ..params(4096, 128) };
        let layout = p.validate().unwrap();
        assert!(layout.end_of_line);
        assert_eq!(layout.cacheline, 64);
        assert_eq!(layout.slots, 32);
    }
}
