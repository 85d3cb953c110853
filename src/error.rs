use crate::chain::ChainError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Invalid run parameters. Always reported to the user, never corrected silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("size {size} must be a nonzero multiple of 8x stride {stride}")]
    SizeNotMultiple { size: usize, stride: usize },
    #[error("stride {stride} must be a nonzero multiple of {word} bytes")]
    BadStride { stride: usize, word: usize },
    #[error("cacheline size {0} must be a nonzero multiple of the word size")]
    BadCacheline(usize),
    #[error("duration must be nonzero")]
    ZeroDuration,
    #[error("can't parse size '{0}'")]
    BadSize(String),
}

/// Errors produced while setting up or running a measurement.
#[derive(Debug, Error)]
pub enum Error {
    /// Run parameters rejected before any memory was touched.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Region allocation failed.
    #[error("failed to allocate {size} bytes ({kind}): {source}")]
    Alloc {
        size: usize,
        kind: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// Huge pages were requested on a platform or system without them.
    #[error("huge pages unavailable: {0}")]
    HugePagesUnavailable(String),
    /// Chain construction broke its write-once invariant. Not recoverable.
    #[error("chain invariant violated: {0}")]
    Chain(#[from] ChainError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
