//! Process-wide shutdown signal, passed around explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    shutting_down: AtomicBool,
    notify: Notify,
}

/// Clonable handle; every clone observes the same shutdown request.
#[derive(Clone, Default)]
pub struct SessionLifecycle {
    inner: Arc<Inner>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call from any thread, including signal handlers.
    pub fn request_shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_shutting_down() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_request_from_another_thread() {
        let lifecycle = SessionLifecycle::new();
        let signal = lifecycle.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signal.request_shutdown();
        });
        tokio::time::timeout(Duration::from_secs(2), lifecycle.wait())
            .await
            .unwrap();
        assert!(lifecycle.is_shutting_down());
    }

    #[tokio::test]
    async fn wait_is_immediate_once_requested() {
        let lifecycle = SessionLifecycle::new();
        assert!(!lifecycle.is_shutting_down());
        lifecycle.request_shutdown();
        lifecycle.request_shutdown();
        tokio::time::timeout(Duration::from_millis(100), lifecycle.wait())
            .await
            .unwrap();
    }
}
