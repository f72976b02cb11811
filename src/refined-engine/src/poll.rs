//! Bounded element polling for behaviors.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::document::Document;

/// Result of waiting for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The element appeared after this many attempts.
    Found { attempts: u32 },
    /// The owning feature was stopped before the element appeared.
    Cancelled,
    /// The element never appeared within the attempt budget.
    TimedOut,
}

impl PollOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

/// Wait until `selector` matches, retrying with exponential backoff.
///
/// `cancel` is checked before every attempt and while sleeping, so a stopped
/// feature never observes a late match.
pub async fn wait_for_element(
    document: &Arc<dyn Document>,
    selector: &str,
    poll: PollConfig,
    cancel: &CancellationToken,
) -> PollOutcome {
    for attempt in 0..poll.max_attempts {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if document.has_element(selector) {
            debug!(selector, attempts = attempt + 1, "Element found");
            return PollOutcome::Found {
                attempts: attempt + 1,
            };
        }
        if attempt + 1 == poll.max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(poll.delay_after(attempt)) => {}
        }
    }

    warn!(selector, attempts = poll.max_attempts, "Gave up waiting for element");
    PollOutcome::TimedOut
}

/// Wait for `selector` and run `apply` on success, unless cancelled first.
/// Returns the outcome so callers can log or record it.
pub async fn when_element<F>(
    document: Arc<dyn Document>,
    selector: String,
    poll: PollConfig,
    cancel: CancellationToken,
    apply: F,
) -> PollOutcome
where
    F: FnOnce(&dyn Document),
{
    let outcome = wait_for_element(&document, &selector, poll, &cancel).await;
    if outcome.is_found() && !cancel.is_cancelled() {
        apply(document.as_ref());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use std::time::Duration;

    fn config() -> PollConfig {
        PollConfig {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_immediately() {
        let doc = Arc::new(MemoryDocument::default());
        doc.insert_element("nav");
        let doc: Arc<dyn Document> = doc;
        let outcome = wait_for_element(&doc, "nav", config(), &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::Found { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_after_retries() {
        let memory = Arc::new(MemoryDocument::default());
        let doc: Arc<dyn Document> = memory.clone();
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { wait_for_element(&doc, "nav", config(), &cancel).await }
        });

        // attempts at t=0, 100, 300
        tokio::time::sleep(Duration::from_millis(250)).await;
        memory.insert_element("nav");

        assert_eq!(task.await.unwrap(), PollOutcome::Found { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_budget() {
        let doc: Arc<dyn Document> = Arc::new(MemoryDocument::default());
        let outcome = wait_for_element(&doc, "nav", config(), &CancellationToken::new()).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_poll_never_applies() {
        let memory = Arc::new(MemoryDocument::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(when_element(
            memory.clone(),
            "nav".to_string(),
            config(),
            cancel.clone(),
            |doc| {
                doc.set_element_attribute("nav", "data-muted", "true");
            },
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        memory.insert_element("nav");

        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(memory.element_attribute("nav", "data-muted"), None);
    }
}
