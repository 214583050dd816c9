use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// One captured change from a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: Id,
    /// Object or row identifier the change touches.
    pub identifier: Id,
    /// Class used to pick a strategy, e.g. the table name.
    pub object_class: String,
    pub operation: ChangeOperation,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_clock: Option<u64>,
    /// Parent identifier declared by a foreign key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
}

impl ChangeEvent {
    pub fn new(identifier: &str, object_class: &str, operation: ChangeOperation, source: &str) -> Self {
        Self {
            event_id: crate::model::generate_id(),
            identifier: identifier.to_string(),
            object_class: object_class.to_string(),
            operation,
            payload: serde_json::Value::Null,
            source: source.to_string(),
            timestamp: Utc::now(),
            logical_clock: None,
            parent: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_clock(mut self, clock: u64) -> Self {
        self.logical_clock = Some(clock);
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Last change applied to an identifier since it last converged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub event_id: Id,
    pub source: String,
    pub operation: ChangeOperation,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_clock: Option<u64>,
}

impl From<&ChangeEvent> for AppliedChange {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            source: event.source.clone(),
            operation: event.operation,
            timestamp: event.timestamp,
            logical_clock: event.logical_clock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum RulePredicate {
    Always,
    OperationIs(ChangeOperation),
    ExistingOperationIs(ChangeOperation),
    SourceIs(String),
    ClassIs(String),
    PayloadFieldEquals { field: String, value: serde_json::Value },
    All(Vec<RulePredicate>),
    Any(Vec<RulePredicate>),
    Not(Box<RulePredicate>),
}

impl RulePredicate {
    pub fn matches(&self, incoming: &ChangeEvent, existing: &AppliedChange) -> bool {
        match self {
            RulePredicate::Always => true,
            RulePredicate::OperationIs(op) => incoming.operation == *op,
            RulePredicate::ExistingOperationIs(op) => existing.operation == *op,
            RulePredicate::SourceIs(source) => incoming.source == *source,
            RulePredicate::ClassIs(class) => incoming.object_class == *class,
            RulePredicate::PayloadFieldEquals { field, value } => {
                incoming.payload.get(field) == Some(value)
            }
            RulePredicate::All(preds) => preds.iter().all(|p| p.matches(incoming, existing)),
            RulePredicate::Any(preds) => preds.iter().any(|p| p.matches(incoming, existing)),
            RulePredicate::Not(pred) => !pred.matches(incoming, existing),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "snake_case")]
pub enum RuleAction {
    Apply,
    Reject,
    /// Hand the event back as `Defer(ManualReview)`. It is not queued: the
    /// caller owns the held event and later events for the identifier are
    /// decided without waiting for it.
    Defer,
    LatestWins,
    PreferSource(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRule {
    pub predicate: RulePredicate,
    pub action: RuleAction,
}

impl ConflictRule {
    pub fn new(predicate: RulePredicate, action: RuleAction) -> Self {
        Self { predicate, action }
    }
}

/// How simultaneous divergent changes to one identifier are settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SyncStrategy {
    LatestTimestampWins,
    SourceAlwaysWins { source: String },
    /// First matching rule decides; no match falls back to latest-wins.
    RuleBased { rules: Vec<ConflictRule> },
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::LatestTimestampWins
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// The change already applied from the other side wins.
    LostConflict { winner_event_id: Id, winner_source: String },
    RuleRejected { rule_index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeferReason {
    AwaitingParent { parent: Id },
    /// Waiting behind earlier deferred events for the same identifier.
    QueuedBehind { parent: Id },
    /// Held by a `RuleAction::Defer` rule; not queued by the resolver.
    ManualReview { rule_index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    TimedOut,
    QueueFull,
}

/// Explicit per-event decision consumed by the caller's apply loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SyncDecision {
    Apply,
    Reject(RejectReason),
    Defer(DeferReason),
    UnresolvedOrphan { parent: Id, reason: OrphanReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub event: ChangeEvent,
    pub decision: SyncDecision,
    /// True when the decision was taken while replaying a deferred event.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        self.decision == SyncDecision::Apply
    }

    /// `UnresolvedOrphan` error for orphan outcomes, for callers that fail fast.
    pub fn orphan_error(&self) -> Option<EngineError> {
        match &self.decision {
            SyncDecision::UnresolvedOrphan { parent, .. } => Some(EngineError::UnresolvedOrphan {
                event_id: self.event.event_id.clone(),
                identifier: self.event.identifier.clone(),
                parent: parent.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicates_compose() {
        let incoming = ChangeEvent::new("orders:1", "orders", ChangeOperation::Update, "east")
            .with_payload(json!({"status": "shipped"}));
        let existing = AppliedChange::from(&ChangeEvent::new("orders:1", "orders", ChangeOperation::Delete, "west"));

        let pred = RulePredicate::All(vec![
            RulePredicate::ClassIs("orders".to_string()),
            RulePredicate::ExistingOperationIs(ChangeOperation::Delete),
            RulePredicate::PayloadFieldEquals {
                field: "status".to_string(),
                value: json!("shipped"),
            },
        ]);
        assert!(pred.matches(&incoming, &existing));
        assert!(!RulePredicate::Not(Box::new(pred)).matches(&incoming, &existing));
        assert!(!RulePredicate::SourceIs("west".to_string()).matches(&incoming, &existing));
    }
}
