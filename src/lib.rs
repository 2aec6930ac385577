//! stocktake caption-intake core
//!
//! Turns free-text product captions from a messaging platform into
//! structured, confidence-scored data and keeps every message of a media
//! group converged on the same analysis result. The caption parser and the
//! media-group synchronizer do the real work, with the processing state
//! machine guarding the lifecycle between them and the retry executor
//! wrapping every fallible write. Message fetch, binary media storage and
//! authentication live in the host and reach this crate only through the
//! [`store`] seams.

pub mod captions;
pub mod config;
pub mod error;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod store;
pub mod sync;
pub mod time;

pub use captions::{AnalyzedContent, CaptionParser, FallbackReason, ParsingMetadata};
pub use config::IngestConfig;
pub use error::{FailureKind, OperationError};
pub use messages::{
    transition, Message, MessageId, MessageUpdate, ProcessingState, TransitionError,
    TransitionRequest,
};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use store::{AuditSink, MessageStore, StoreError};
pub use sync::{MediaGroupSynchronizer, SyncError, SyncOptions, SyncReport};

use std::future::Future;

/// Parse one caption with a system-clock [`CaptionParser`].
///
/// Hosts parsing in a loop should construct a parser once and reuse it; this
/// recompiles the stage regexes per call.
pub fn parse_caption(caption: &str) -> AnalyzedContent {
    CaptionParser::new().parse(caption)
}

/// Run one fallible async operation under a [`RetryPolicy`].
pub async fn with_retry<T, F, Fut>(operation: &str, policy: RetryPolicy, op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    RetryExecutor::new(policy).execute(operation, op).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_caption_facade() {
        let result = parse_caption("Blue Widget #AB022524 x5 (fragile)");
        assert_eq!(result.product_name, "Blue Widget");
        assert_eq!(result.vendor_uid.as_deref(), Some("AB"));
    }

    #[tokio::test]
    async fn test_with_retry_facade() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        let outcome = with_retry("noop", policy, || async { Ok::<_, OperationError>(1) }).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
    }
}
