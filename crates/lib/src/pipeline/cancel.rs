//! Cooperative cancellation between steps.

use tokio::sync::watch;

/// Raises the cancel flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }
}

/// Observed by the pipeline before each step.
///
/// A step already running is never interrupted.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  rx: watch::Receiver<bool>,
}

impl CancelSignal {
  pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
  }

  /// A signal nobody can raise.
  pub fn never() -> Self {
    Self::channel().1
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }
}
