//! Media-group synchronization.
//!
//! A media group arrives as separate messages with only one member carrying
//! the caption. Once that member's analysis completes, the synchronizer
//! propagates it so every member converges on the same structured content.
//! Sibling writes fan out concurrently, each under the retry policy, and
//! failures are collected per sibling rather than aborting the group.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::captions::{AnalyzedContent, SyncMetadata};
use crate::error::OperationError;
use crate::messages::{Message, MessageId, MessageUpdate, ProcessingState};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::store::{AuditEvent, AuditEventType, AuditSink, MessageStore, StoreError};
use crate::time::{Clock, SystemClock};

/// Per-call synchronization options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Use this member as the canonical source instead of selecting one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_source: Option<MessageId>,
    /// Rewrite every sibling even when it already matches the source.
    #[serde(default)]
    pub force_sync: bool,
    /// Also copy the source's edit history and mark siblings as edited.
    #[serde(default)]
    pub sync_edit_history: bool,
}

/// What happened to one sibling during a sync.
#[derive(Debug, Clone, PartialEq)]
pub enum SiblingOutcome {
    /// The sibling was written with the canonical content.
    Updated,
    /// The sibling already carried equivalent completed content.
    Skipped,
    /// The write failed after retries; the sibling keeps its old state.
    Failed(OperationError),
}

/// Per-sibling result entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SiblingSync {
    pub message_id: MessageId,
    pub outcome: SiblingOutcome,
}

/// Outcome of one group synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub group_id: String,
    /// The canonical source whose content was propagated.
    pub source_id: MessageId,
    /// Siblings actually written. Partial success is valid: this can be
    /// smaller than the group when writes failed or were skipped.
    pub updated_count: usize,
    pub results: Vec<SiblingSync>,
}

/// Why a synchronization could not run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("media group id must not be empty")]
    MissingGroupId,
    #[error("no synchronization source available for group {group_id}")]
    NoSourceAvailable { group_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Propagates one member's analysis across its media group.
pub struct MediaGroupSynchronizer {
    store: Arc<dyn MessageStore>,
    audit: Arc<dyn AuditSink>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
    /// Serializes concurrent syncs of the same group within this process.
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MediaGroupSynchronizer {
    /// Synchronizer with the default retry policy and system clock.
    pub fn new(store: Arc<dyn MessageStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            retry: RetryExecutor::new(RetryPolicy::default()),
            clock: Arc::new(SystemClock),
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Override the retry policy applied to each sibling write.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// Override the retry executor wholesale (injected sleeper/observer).
    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Override the clock used for sync timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Converge every member of `group_id` on one canonical analysis.
    ///
    /// Calling this twice with no intervening changes is a no-op the second
    /// time unless `force_sync` is set.
    pub async fn sync(&self, group_id: &str, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        if group_id.is_empty() {
            return Err(SyncError::MissingGroupId);
        }

        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let correlation_id = Uuid::new_v4().to_string();
        let members = self.store.list_by_group(group_id).await?;

        let source = match self.select_source(&members, options) {
            Some(source) => source.clone(),
            None => {
                self.record_audit(AuditEvent {
                    event_type: AuditEventType::SyncFailed,
                    entity_id: group_id.to_string(),
                    correlation_id: correlation_id.clone(),
                    metadata: serde_json::json!({ "members": members.len() }),
                    error_message: Some("no source available".to_string()),
                })
                .await;
                return Err(SyncError::NoSourceAvailable {
                    group_id: group_id.to_string(),
                });
            }
        };
        let canonical = source
            .analyzed_content
            .clone()
            .expect("selected source always carries content");

        self.record_audit(AuditEvent {
            event_type: AuditEventType::SyncStarted,
            entity_id: group_id.to_string(),
            correlation_id: correlation_id.clone(),
            metadata: serde_json::json!({
                "source_id": source.id.as_ref(),
                "members": members.len(),
            }),
            error_message: None,
        })
        .await;

        let group_size = members.len();
        let siblings: Vec<Message> = members
            .into_iter()
            .filter(|m| m.id != source.id)
            .collect();

        let results = join_all(siblings.into_iter().map(|sibling| {
            self.sync_sibling(
                sibling,
                &source,
                &canonical,
                group_size,
                options,
                &correlation_id,
            )
        }))
        .await;

        let updated_count = results
            .iter()
            .filter(|r| r.outcome == SiblingOutcome::Updated)
            .count();
        let failed_count = results
            .iter()
            .filter(|r| matches!(r.outcome, SiblingOutcome::Failed(_)))
            .count();

        info!(
            group_id,
            correlation_id = %correlation_id,
            source_id = %source.id,
            updated_count,
            failed_count,
            "media group sync finished"
        );
        self.record_audit(AuditEvent {
            event_type: AuditEventType::SyncCompleted,
            entity_id: group_id.to_string(),
            correlation_id,
            metadata: serde_json::json!({
                "source_id": source.id.as_ref(),
                "updated_count": updated_count,
                "failed_count": failed_count,
            }),
            error_message: None,
        })
        .await;

        Ok(SyncReport {
            group_id: group_id.to_string(),
            source_id: source.id.clone(),
            updated_count,
            results,
        })
    }

    /// Write the canonical content to one sibling, or skip it when it is
    /// already converged.
    async fn sync_sibling(
        &self,
        sibling: Message,
        source: &Message,
        canonical: &AnalyzedContent,
        group_size: usize,
        options: &SyncOptions,
        correlation_id: &str,
    ) -> SiblingSync {
        let already_converged = sibling.processing_state == ProcessingState::Completed
            && sibling
                .analyzed_content
                .as_ref()
                .is_some_and(|content| content.same_extraction(canonical));
        if already_converged && !options.force_sync {
            return SiblingSync {
                message_id: sibling.id,
                outcome: SiblingOutcome::Skipped,
            };
        }

        let mut content = canonical.clone();
        content.sync_metadata = Some(SyncMetadata {
            group_message_count: group_size,
            source_message_id: source.id.clone(),
            sync_timestamp: self.clock.now(),
            is_original_caption: sibling.is_original_caption,
        });

        let mut update = MessageUpdate::new()
            .content(content)
            .state(ProcessingState::Completed)
            .clear_error();
        if options.sync_edit_history {
            update = update
                .edit_history(source.edit_history.clone())
                .edited(true);
        }

        let sibling_id = sibling.id.clone();
        let outcome = self
            .retry
            .execute("sync_sibling_write", || {
                let update = update.clone();
                let id = sibling_id.clone();
                async move { self.store.update(&id, update).await.map_err(OperationError::from) }
            })
            .await;

        match outcome.result {
            Ok(()) => SiblingSync {
                message_id: sibling.id,
                outcome: SiblingOutcome::Updated,
            },
            Err(err) => {
                warn!(
                    sibling_id = %sibling.id,
                    correlation_id,
                    attempts = outcome.attempts,
                    kind = %err.kind,
                    error = %err.message,
                    "sibling write failed after retries"
                );
                self.record_audit(AuditEvent {
                    event_type: AuditEventType::SiblingWriteFailed,
                    entity_id: sibling.id.as_ref().to_string(),
                    correlation_id: correlation_id.to_string(),
                    metadata: serde_json::json!({
                        "attempts": outcome.attempts,
                        "kind": err.kind.as_str(),
                    }),
                    error_message: Some(err.message.clone()),
                })
                .await;
                SiblingSync {
                    message_id: sibling.id,
                    outcome: SiblingOutcome::Failed(err),
                }
            }
        }
    }

    /// Pick the canonical source: the explicitly requested member, or the
    /// earliest-created completed member with non-empty content, preferring
    /// the original caption carrier among creation-time ties.
    fn select_source<'a>(
        &self,
        members: &'a [Message],
        options: &SyncOptions,
    ) -> Option<&'a Message> {
        if let Some(wanted) = &options.explicit_source {
            return members
                .iter()
                .find(|m| &m.id == wanted && m.analyzed_content.is_some());
        }

        members
            .iter()
            .filter(|m| {
                m.processing_state == ProcessingState::Completed
                    && m.analyzed_content.as_ref().is_some_and(|c| !c.is_empty())
            })
            .min_by_key(|m| (m.created_at, !m.is_original_caption))
    }

    fn group_lock(&self, group_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .clone()
    }

    /// Audit failures are logged and dropped; they never abort a sync.
    async fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event).await {
            warn!(error = %err, "audit sink rejected event");
        }
    }
}
