use thiserror::Error;

#[derive(Debug, Error)]
pub enum DlnaError {
  /// UDP-level failure (bind, join, send).
  #[error("transport error: {0}")]
  Transport(String),

  /// HTTP-level failure (description fetch, probe).
  #[error("communication error: {0}")]
  Communication(String),

  #[error("parse error: {0}")]
  Parse(String),

  /// The device has no usable AVTransport control binding.
  #[error("device not playable: {0}")]
  NotPlayable(String),
}

impl From<std::io::Error> for DlnaError {
  fn from(e: std::io::Error) -> Self {
    DlnaError::Transport(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, DlnaError>;
