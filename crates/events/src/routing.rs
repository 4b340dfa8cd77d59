//! Declarative routing of status events to handlers.
//!
//! The table is a plain value: evaluating it needs no transport, so the
//! single-enqueue and single-cleanup guarantees can be checked directly.

use serde::{Deserialize, Serialize};

use uploader_core::SourceId;

use crate::envelope::{DETAIL_TYPE, EventEnvelope, QueueMessageRef};
use crate::status::ApiStatus;

/// Handler a rule dispatches to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerTarget {
    InvokeApi,
    DeleteMessage,
    DeleteObject,
    SendToRetryQueue,
}

impl HandlerTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerTarget::InvokeApi => "invoke_api",
            HandlerTarget::DeleteMessage => "delete_message",
            HandlerTarget::DeleteObject => "delete_object",
            HandlerTarget::SendToRetryQueue => "send_to_retry_queue",
        }
    }
}

impl core::fmt::Display for HandlerTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint on the `message` field of the detail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePresence {
    Any,
    Present,
    Absent,
}

impl MessagePresence {
    pub fn admits(&self, message: Option<&QueueMessageRef>) -> bool {
        match self {
            MessagePresence::Any => true,
            MessagePresence::Present => message.is_some(),
            MessagePresence::Absent => message.is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    name: String,
    sources: Vec<SourceId>,
    kind: String,
    bucket: Option<String>,
    status: ApiStatus,
    message: MessagePresence,
    target: HandlerTarget,
}

impl RoutingRule {
    pub fn new(
        name: impl Into<String>,
        sources: Vec<SourceId>,
        status: ApiStatus,
        message: MessagePresence,
        target: HandlerTarget,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            kind: DETAIL_TYPE.to_string(),
            bucket: None,
            status,
            message,
            target,
        }
    }

    /// Restrict the rule to events about one bucket.
    pub fn for_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn target(&self) -> HandlerTarget {
        self.target
    }

    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        let detail = envelope.detail();
        self.sources.iter().any(|s| s == envelope.source())
            && envelope.kind() == self.kind
            && self
                .bucket
                .as_deref()
                .is_none_or(|bucket| bucket == envelope.object().bucket())
            && detail.status() == self.status
            && self.message.admits(detail.message())
    }
}

/// Source identities of the handlers that publish status events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSources {
    pub ingestion: SourceId,
    pub invoke_api: SourceId,
    pub drain: SourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// The four pipeline rules.
    ///
    /// `rejected` is deliberately absent: it is terminal and nothing consumes it.
    pub fn standard(sources: &RoutingSources, inbound_bucket: Option<&str>) -> Self {
        let rules = vec![
            RoutingRule::new(
                "ready-for-api",
                vec![sources.ingestion.clone(), sources.drain.clone()],
                ApiStatus::ReadyForApi,
                MessagePresence::Any,
                HandlerTarget::InvokeApi,
            ),
            RoutingRule::new(
                "succeeded-delete-message",
                vec![sources.invoke_api.clone()],
                ApiStatus::Succeeded,
                MessagePresence::Present,
                HandlerTarget::DeleteMessage,
            ),
            RoutingRule::new(
                "succeeded-delete-object",
                vec![sources.invoke_api.clone()],
                ApiStatus::Succeeded,
                MessagePresence::Any,
                HandlerTarget::DeleteObject,
            ),
            RoutingRule::new(
                "failed-enqueue-retry",
                vec![sources.invoke_api.clone()],
                ApiStatus::Failed,
                MessagePresence::Absent,
                HandlerTarget::SendToRetryQueue,
            ),
        ];

        let rules = match inbound_bucket {
            Some(bucket) => rules.into_iter().map(|r| r.for_bucket(bucket)).collect(),
            None => rules,
        };
        Self::new(rules)
    }

    /// Targets for `envelope`, in rule order, each at most once.
    pub fn targets_for(&self, envelope: &EventEnvelope) -> Vec<HandlerTarget> {
        let mut targets = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(envelope)) {
            if !targets.contains(&rule.target) {
                targets.push(rule.target);
            }
        }
        targets
    }
}
