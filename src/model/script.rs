use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::diff::AttributeChange;
use crate::model::graph::{ObjectKind, ObjectNode, TableConstraint};
use crate::model::plan::CycleReport;
use crate::model::Id;

/// Structural operation against a database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        node: ObjectNode,
    },
    Drop {
        node: ObjectNode,
    },
    Modify {
        identifier: Id,
        kind: ObjectKind,
        changes: Vec<AttributeChange>,
    },
    Rename {
        from: Id,
        to: Id,
        kind: ObjectKind,
    },
    AddConstraint {
        table: Id,
        constraint: TableConstraint,
    },
    DropConstraint {
        table: Id,
        constraint: TableConstraint,
    },
    Sequence {
        steps: Vec<Operation>,
    },
}

impl Operation {
    /// Structural inverse. Drops carry the full node so they invert to a
    /// recreation; modifications invert attribute by attribute.
    pub fn inverse(&self) -> Operation {
        match self {
            Operation::Create { node } => Operation::Drop { node: node.clone() },
            Operation::Drop { node } => Operation::Create { node: node.clone() },
            Operation::Modify {
                identifier,
                kind,
                changes,
            } => Operation::Modify {
                identifier: identifier.clone(),
                kind: *kind,
                changes: changes.iter().rev().map(AttributeChange::inverse).collect(),
            },
            Operation::Rename { from, to, kind } => Operation::Rename {
                from: to.clone(),
                to: from.clone(),
                kind: *kind,
            },
            Operation::AddConstraint { table, constraint } => Operation::DropConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Operation::DropConstraint { table, constraint } => Operation::AddConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Operation::Sequence { steps } => Operation::Sequence {
                steps: steps.iter().rev().map(Operation::inverse).collect(),
            },
        }
    }

    /// Identifiers whose state this operation reads or writes.
    pub fn touched(&self) -> Vec<Id> {
        let mut ids = match self {
            Operation::Create { node } | Operation::Drop { node } => vec![node.identifier.clone()],
            Operation::Modify { identifier, .. } => vec![identifier.clone()],
            Operation::Rename { from, to, .. } => vec![from.clone(), to.clone()],
            Operation::AddConstraint { table, .. } | Operation::DropConstraint { table, .. } => {
                vec![table.clone()]
            }
            Operation::Sequence { steps } => steps.iter().flat_map(Operation::touched).collect(),
        };
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::Create { node } => format!("create {} {}", node.kind.as_str(), node.identifier),
            Operation::Drop { node } => format!("drop {} {}", node.kind.as_str(), node.identifier),
            Operation::Modify {
                identifier,
                kind,
                changes,
            } => format!("modify {} {} ({} changes)", kind.as_str(), identifier, changes.len()),
            Operation::Rename { from, to, kind } => format!("rename {} {} to {}", kind.as_str(), from, to),
            Operation::AddConstraint { table, constraint } => {
                format!("add constraint {} on {}", constraint.name, table)
            }
            Operation::DropConstraint { table, constraint } => {
                format!("drop constraint {} on {}", constraint.name, table)
            }
            Operation::Sequence { steps } => steps
                .iter()
                .map(Operation::describe)
                .join(", then "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreDeploy,
    Deploy,
    PostDeploy,
}

/// Fingerprint an object must have (`None` = must not exist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedState {
    pub identifier: Id,
    pub fingerprint: Option<String>,
}

/// One atomic forward/rollback pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptUnit {
    pub unit_id: String,
    pub identifier: Id,
    pub phase: Phase,
    pub forward: Operation,
    pub rollback: Operation,
    /// State the forward operation expects to find.
    pub expected_precondition: Vec<ExpectedState>,
    /// State the forward operation leaves behind; the rollback's precondition.
    pub expected_postcondition: Vec<ExpectedState>,
    pub forward_sql: Vec<String>,
    pub rollback_sql: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sequence: usize,
    pub unit_id: String,
    pub identifier: Id,
    pub phase: Phase,
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_review: bool,
}

/// Master ordering of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<CycleReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptBundle {
    /// Units in forward application order.
    pub units: Vec<ScriptUnit>,
    pub manifest: Manifest,
}

impl ScriptBundle {
    pub fn forward_sequence(&self) -> impl Iterator<Item = &ScriptUnit> {
        self.units.iter()
    }

    /// Rollback runs the same units backwards.
    pub fn rollback_sequence(&self) -> impl Iterator<Item = &ScriptUnit> {
        self.units.iter().rev()
    }

    pub fn unit(&self, unit_id: &str) -> Option<&ScriptUnit> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    pub fn position_of(&self, identifier: &str, phase: Phase) -> Option<usize> {
        self.units
            .iter()
            .position(|u| u.identifier == identifier && u.phase == phase)
    }

    pub fn forward_sql(&self) -> Vec<String> {
        self.units.iter().flat_map(|u| u.forward_sql.iter().cloned()).collect()
    }

    pub fn rollback_sql(&self) -> Vec<String> {
        self.rollback_sequence()
            .flat_map(|u| u.rollback_sql.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}
