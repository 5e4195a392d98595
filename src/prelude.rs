//! Convenience re-exports for the common surface.

pub use crate::builder::CacheBuilder;
pub use crate::cache::{Cache, Item};
pub use crate::error::{ConfigError, PatternError};
pub use crate::hash::FnvBuildHasher;
pub use crate::metrics::MetricsSnapshot;
pub use crate::scan::Scanner;
