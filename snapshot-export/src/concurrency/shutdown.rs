//! Cooperative cancellation shared by every table export of a run.
//!
//! The signal is level triggered: once [`ShutdownTx::shutdown`] has been called, every
//! receiver, including ones subscribed afterwards, observes it.

use tokio::sync::watch;

/// Sending side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests every subscribed export to stop at its next cancellation point.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver observing this signal.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns whether shutdown was requested, without waiting.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested.
    ///
    /// Never resolves if the sender is dropped without requesting shutdown.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new shutdown signal in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
