use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag telling a long running render to give up.
///
/// Only raised when the pool is torn down. Pausing never cancels a render.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}
