//! Cooperative shutdown signal shared by ticks and queue workers.
//!
//! A signaled component finishes the transition it is in the middle of and
//! then stops; it never starts new work.

use std::future::Future;
use std::io;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    /// Signal once `listener` resolves (e.g. `tokio::signal::ctrl_c()`).
    ///
    /// If the listener cannot be installed the trigger is kept alive and
    /// nothing is signaled; dropping it would release every waiter.
    pub fn signal_on<F>(self, listener: F) -> JoinHandle<()>
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            match listener.await {
                Ok(()) => {
                    info!("Received interrupt, shutting down");
                    self.signal();
                }
                Err(e) => {
                    error!("Failed to listen for interrupt, running without it: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
    }
}

impl Shutdown {
    pub fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is signaled or the trigger is dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|signaled| *signaled).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_signal_wakes_waiters() {
        let (trigger, shutdown) = channel();
        assert!(!shutdown.is_signaled());

        let mut waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        trigger.signal();
        handle.await.unwrap();
        assert!(shutdown.is_signaled());
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn test_signal_on_listener_signals() {
        let (trigger, mut shutdown) = channel();
        trigger.signal_on(async { Ok(()) });

        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("shutdown should be signaled");
        assert!(shutdown.is_signaled());
    }

    #[tokio::test]
    async fn test_signal_on_listener_error_keeps_running() {
        let (trigger, mut shutdown) = channel();
        let handle = trigger.signal_on(async {
            Err(io::Error::new(io::ErrorKind::Other, "no signal handler"))
        });

        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown.wait()).await;
        assert!(waited.is_err());
        assert!(!shutdown.is_signaled());
        assert!(!handle.is_finished());
        handle.abort();
    }
}
