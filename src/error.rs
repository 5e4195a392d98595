//! Error types for the lfukit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned by [`CacheBuilder::try_build`](crate::builder::CacheBuilder::try_build)
//!   when construction parameters are invalid (e.g. a non-power-of-two shard
//!   count).
//! - [`PatternError`]: Returned by [`Pattern::compile`](crate::glob::Pattern::compile)
//!   for malformed glob patterns. A scanner built from a bad pattern carries
//!   this error in a terminal state rather than panicking.
//!
//! ## Example Usage
//!
//! ```
//! use lfukit::builder::CacheBuilder;
//! use lfukit::error::ConfigError;
//!
//! // Shard counts must be powers of two; rejected without panicking.
//! let bad = CacheBuilder::<String, i32>::new().shard_count(5).try_build();
//! assert!(matches!(bad, Err(ConfigError::ShardCountNotPowerOfTwo(5))));
//! ```

use thiserror::Error;

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`CacheBuilder::try_build`](crate::builder::CacheBuilder::try_build).
/// Invalid shard counts are an error rather than a panic; ring and counter
/// widths are rounded up silently instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The configured shard count is not a power of two.
    #[error("shard count must be a power of two, got {0}")]
    ShardCountNotPowerOfTwo(usize),

    /// The configured shard count exceeds the cursor encoding range.
    ///
    /// Scan cursors pack the shard index into 32 bits.
    #[error("shard count {0} exceeds the maximum of 2^31")]
    ShardCountTooLarge(usize),
}

/// Error produced when compiling a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("empty pattern")]
    Empty,

    /// A `[` character class was never closed.
    #[error("unmatched '[' at byte {0}")]
    UnmatchedBracket(usize),

    /// The pattern ended with a dangling `\` escape.
    #[error("trailing escape at end of pattern")]
    TrailingEscape,
}
