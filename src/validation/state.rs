//! Per-call validation state and cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ValidationSettings;

/// State threaded through one validation call.
///
/// The reference chain records every `(schema reference, instance location)`
/// pair currently being evaluated, so re-entering the same pair or nesting
/// deeper than `max_depth` can be reported instead of looping.
#[derive(Debug, Clone)]
pub struct ValidationState {
    settings: Arc<ValidationSettings>,
    chain: Vec<(String, String)>,
}

impl ValidationState {
    pub fn new(settings: Arc<ValidationSettings>) -> Self {
        Self {
            settings,
            chain: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Number of schema references entered so far.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    pub fn is_active(&self, reference: &str, location: &str) -> bool {
        self.chain
            .iter()
            .any(|(r, l)| r == reference && l == location)
    }

    /// State for evaluating `reference` at `location`.
    pub fn enter(&self, reference: impl Into<String>, location: impl Into<String>) -> Self {
        let mut chain = self.chain.clone();
        chain.push((reference.into(), location.into()));
        Self {
            settings: Arc::clone(&self.settings),
            chain,
        }
    }
}

/// Receiving side of a cancellation request.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

/// Sending side of a cancellation request.
#[derive(Debug)]
pub struct CancellationHandle {
    sender: watch::Sender<bool>,
}

impl CancellationSignal {
    /// A connected handle/signal pair.
    pub fn channel() -> (CancellationHandle, CancellationSignal) {
        let (sender, receiver) = watch::channel(false);
        (CancellationHandle { sender }, CancellationSignal { receiver })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancellation is requested. Never completes if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_tracks_reference_chain() {
        let state = ValidationState::new(Arc::new(ValidationSettings::default()));
        let inner = state.enter("http://example.org/a", "Patient");
        assert_eq!(state.depth(), 0);
        assert_eq!(inner.depth(), 1);
        assert!(inner.is_active("http://example.org/a", "Patient"));
        assert!(!inner.is_active("http://example.org/a", "Patient.link[0]"));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, signal) = CancellationSignal::channel();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_cancels() {
        let (handle, signal) = CancellationSignal::channel();
        drop(handle);
        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
