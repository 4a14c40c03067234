use crate::LabelType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  #[error("label not found: {0}")]
  LabelNotFound(LabelType),

  #[error("index is full (max_elements={max_elements})")]
  IndexFull { max_elements: usize },

  #[error("element with label {0} is already deleted")]
  AlreadyDeleted(LabelType),

  #[error("element with label {0} is not deleted")]
  NotDeleted(LabelType),

  #[error("cannot resize to {requested} elements, index already holds {current}")]
  ResizeBelowCount { requested: usize, current: usize },

  #[error("capacity {0} exceeds the internal id range")]
  CapacityOverflow(usize),

  #[error("out of memory while allocating {what}")]
  OutOfMemory { what: &'static str },

  #[error("invalid index format: {0}")]
  InvalidIndexFormat(String),

  #[error("index is corrupted: {0}")]
  Corrupted(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}
