use serde::{Deserialize, Serialize};

use crate::model::graph::ObjectNode;
use crate::model::version::VersionRecord;
use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both branches created the identifier independently with different content.
    AddAdd,
    /// One side deleted, the other side modified.
    DeleteModify,
    /// Both sides modified the definition differently.
    ModifyModify,
}

/// Divergent history for one identifier on two branches. Resolution is left
/// to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub identifier: Id,
    pub conflict_type: ConflictType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<VersionRecord>,
    pub ours: VersionRecord,
    pub theirs: VersionRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor_definition: Option<ObjectNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ours_definition: Option<ObjectNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theirs_definition: Option<ObjectNode>,
    pub description: String,
}

impl ConflictReport {
    pub fn classify(ancestor: Option<&VersionRecord>, ours: &VersionRecord, theirs: &VersionRecord) -> ConflictType {
        if ancestor.is_none() {
            ConflictType::AddAdd
        } else if ours.is_tombstone() || theirs.is_tombstone() {
            ConflictType::DeleteModify
        } else {
            ConflictType::ModifyModify
        }
    }
}
