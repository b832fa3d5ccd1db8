//! Configuration errors.

use thiserror::Error;

/// Cross-field validation failures.
///
/// File and parse failures surface through `anyhow` at the loader boundary;
/// only semantic validation has a dedicated variant callers match on.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
