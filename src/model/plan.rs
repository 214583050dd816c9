use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::model::diff::DiffSet;
use crate::model::graph::DependencyEdge;
use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStrategy {
    /// Foreign keys only: deploy without the constraints, add them afterwards.
    DeferConstraint,
    /// Involves view/routine logic; a person has to decide.
    ManualReview,
}

/// A strongly connected group of objects found while ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub members: Vec<Id>,
    pub break_strategy: BreakStrategy,
    /// Edges between members that form the cycle.
    pub edges: Vec<DependencyEdge>,
}

impl CycleReport {
    pub fn contains(&self, identifier: &str) -> bool {
        self.members.iter().any(|m| m == identifier)
    }

    pub fn to_error(&self) -> EngineError {
        EngineError::CycleDetected {
            members: self.members.clone(),
            break_strategy: self.break_strategy,
        }
    }
}

/// Output of the dependency resolver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedOrder {
    /// Dependencies before dependents.
    pub order: Vec<Id>,
    pub cycles: Vec<CycleReport>,
}

impl ResolvedOrder {
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.order.iter().position(|id| id == identifier)
    }

    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Fails with `CycleDetected` for the first reported cycle.
    pub fn require_acyclic(self) -> Result<Vec<Id>> {
        match self.cycles.first() {
            Some(cycle) => Err(cycle.to_error()),
            None => Ok(self.order),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralPhase {
    /// Constraint is dropped before the deploy phase.
    DropFirst,
    /// Constraint is added after the deploy phase.
    AddAfter,
}

/// A foreign key split out of its table's unit to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeferredConstraint {
    pub table: Id,
    pub constraint: String,
    pub references: Id,
    pub phase: DeferralPhase,
}

/// A diff together with the order it must be applied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub diff: DiffSet,
    /// Permutation of the changed identifiers.
    pub order: Vec<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<CycleReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<DeferredConstraint>,
}

impl DeploymentPlan {
    pub fn is_deferred(&self, identifier: &str) -> bool {
        self.deferred.iter().any(|d| d.table == identifier)
    }

    pub fn deferred_for(&self, table: &str, phase: DeferralPhase) -> BTreeSet<String> {
        self.deferred
            .iter()
            .filter(|d| d.table == table && d.phase == phase)
            .map(|d| d.constraint.clone())
            .collect()
    }

    /// True when some cycle needs a person to look at it before deploying.
    pub fn requires_review(&self, identifier: &str) -> bool {
        self.cycles
            .iter()
            .any(|c| c.break_strategy == BreakStrategy::ManualReview && c.contains(identifier))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
