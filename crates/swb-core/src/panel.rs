//! Details panel collapse rule
//!
//! The basic-details panel collapses a fixed delay after both title and
//! description become non-empty. The rule is re-evaluated on every change of
//! either field; each evaluation cancels the pending timer and rearms it only
//! while the precondition holds. A manual toggle cancels the timer and stays
//! in effect until the fields change again.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Auto-collapsing details panel state
#[derive(Debug)]
pub struct DetailsPanel {
    delay: Duration,
    expanded: Arc<watch::Sender<bool>>,
    timer: Mutex<Option<CancellationToken>>,
}

impl DetailsPanel {
    /// Create new panel, expanded
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        let (expanded, _) = watch::channel(true);
        Self {
            delay,
            expanded: Arc::new(expanded),
            timer: Mutex::new(None),
        }
    }

    /// Check if the panel is expanded
    #[inline]
    #[must_use]
    pub fn is_expanded(&self) -> bool {
        *self.expanded.borrow()
    }

    /// Watch expansion changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.expanded.subscribe()
    }

    /// Check if a collapse is pending
    #[must_use]
    pub fn collapse_pending(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Re-evaluate the rule after a title or description change
    pub fn evaluate(&self, title: &str, description: &str) {
        let mut slot = self.timer.lock();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let ready = !title.trim().is_empty() && !description.trim().is_empty();
        if !ready || !self.is_expanded() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime; details panel collapse not scheduled");
            return;
        };

        let token = CancellationToken::new();
        let expanded = Arc::clone(&self.expanded);
        let delay = self.delay;
        let armed = token.clone();
        runtime.spawn(async move {
            tokio::select! {
                () = armed.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if !armed.is_cancelled() {
                        expanded.send_replace(false);
                        armed.cancel();
                        tracing::trace!("details panel collapsed");
                    }
                }
            }
        });
        *slot = Some(token);
    }

    /// Expand manually; cancels any pending collapse
    pub fn expand(&self) {
        self.cancel_timer();
        self.expanded.send_replace(true);
    }

    /// Collapse manually
    pub fn collapse(&self) {
        self.cancel_timer();
        self.expanded.send_replace(false);
    }

    /// Flip the manual state
    pub fn toggle(&self) {
        if self.is_expanded() {
            self.collapse();
        } else {
            self.expand();
        }
    }

    fn cancel_timer(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for DetailsPanel {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
