use thiserror::Error;

/// Failures the data layer distinguishes between.
///
/// `Throttled` is a control-flow signal rather than a failure: the caller should
/// serve whatever it already holds and must not report it as an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
  /// Transient transport or server failure; retryable.
  #[error("network error: {0}")]
  Network(String),

  #[error("request throttled, serve cached data")]
  Throttled,

  /// Terminal for single-item lookups.
  #[error("listing {0} not found")]
  NotFound(String),

  /// Persisted state could not be read or parsed.
  #[error("corrupted persisted state: {0}")]
  CorruptedState(String),
}

impl CatalogError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, CatalogError::Network(_))
  }
}

impl From<reqwest::Error> for CatalogError {
  fn from(e: reqwest::Error) -> Self {
    CatalogError::Network(e.to_string())
  }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
