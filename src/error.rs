//! Error taxonomy for graph construction, planning, script application,
//! synchronization and version history.

use thiserror::Error;

use crate::model::merge::ConflictReport;
use crate::model::plan::BreakStrategy;
use crate::model::Id;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine.
///
/// Structural errors (`InvalidGraph`) abort the whole operation. Per-object
/// conditions are normally collected into results; the variants below exist so
/// callers that want to fail fast can convert a collected condition into an
/// error carrying the same context.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The extractor supplied a malformed graph.
    #[error("invalid graph: {reason} (objects: {})", identifiers.join(", "))]
    InvalidGraph {
        reason: String,
        identifiers: Vec<Id>,
    },

    /// A dependency cycle that the caller asked to treat as fatal.
    #[error("dependency cycle among {} ({break_strategy:?})", members.join(", "))]
    CycleDetected {
        members: Vec<Id>,
        break_strategy: BreakStrategy,
    },

    /// Live state drifted from what a script unit expects.
    #[error(
        "precondition failed for unit {unit_id} on {identifier}: expected {}, found {}",
        expected.as_deref().unwrap_or("<absent>"),
        actual.as_deref().unwrap_or("<absent>")
    )]
    PreconditionFailed {
        unit_id: String,
        identifier: Id,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A sync event whose parent never arrived.
    #[error("event {event_id} on {identifier} is waiting on missing parent {parent}")]
    UnresolvedOrphan {
        event_id: Id,
        identifier: Id,
        parent: Id,
    },

    /// Divergent history on two branches.
    #[error("merge conflict on {}", .0.identifier)]
    MergeConflict(Box<ConflictReport>),

    /// Cooperative cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_graph(reason: impl Into<String>, identifiers: Vec<Id>) -> Self {
        EngineError::InvalidGraph {
            reason: reason.into(),
            identifiers,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound { what: what.into() }
    }

    /// The identifiers this error is about, for reporting.
    pub fn identifiers(&self) -> Vec<Id> {
        match self {
            EngineError::InvalidGraph { identifiers, .. } => identifiers.clone(),
            EngineError::CycleDetected { members, .. } => members.clone(),
            EngineError::PreconditionFailed { identifier, .. } => vec![identifier.clone()],
            EngineError::UnresolvedOrphan {
                identifier, parent, ..
            } => vec![identifier.clone(), parent.clone()],
            EngineError::MergeConflict(report) => vec![report.identifier.clone()],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_names_both_states() {
        let err = EngineError::PreconditionFailed {
            unit_id: "0003-deploy".to_string(),
            identifier: "dbo.orders".to_string(),
            expected: Some("abc".to_string()),
            actual: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("dbo.orders"));
        assert!(msg.contains("expected abc"));
        assert!(msg.contains("<absent>"));
        assert_eq!(err.identifiers(), vec!["dbo.orders".to_string()]);
    }

    #[test]
    fn test_invalid_graph_lists_objects() {
        let err = EngineError::invalid_graph(
            "dangling edge",
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(err.to_string(), "invalid graph: dangling edge (objects: a, b)");
    }
}
