use serde::{Deserialize, Serialize};

use crate::model::graph::{Column, ObjectKind, ObjectNode, Parameter, TableConstraint};
use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Renamed,
    Unchanged,
}

/// Which part of a definition changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "attribute", content = "name", rename_all = "snake_case")]
pub enum Attribute {
    Column(String),
    ColumnOrder,
    Constraint(String),
    OrdinalSensitive,
    Body,
    Parameters,
    Returns,
    Target,
    References,
    IndexTable,
    IndexColumns,
    Unique,
    Predicate,
    ConstraintBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Column(Column),
    Constraint(TableConstraint),
    Text(String),
    Names(Vec<String>),
    Flag(bool),
    Parameters(Vec<Parameter>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeChangeKind {
    Added,
    Removed,
    Changed,
}

/// One structural difference inside a modified object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: Attribute,
    pub change: AttributeChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<AttributeValue>,
}

impl AttributeChange {
    pub fn new(attribute: Attribute, before: Option<AttributeValue>, after: Option<AttributeValue>) -> Self {
        let change = match (&before, &after) {
            (None, Some(_)) => AttributeChangeKind::Added,
            (Some(_), None) => AttributeChangeKind::Removed,
            _ => AttributeChangeKind::Changed,
        };
        Self {
            attribute,
            change,
            before,
            after,
        }
    }

    /// The change that undoes this one.
    pub fn inverse(&self) -> AttributeChange {
        AttributeChange::new(self.attribute.clone(), self.after.clone(), self.before.clone())
    }
}

/// Classification of one identifier across two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub identifier: Id,
    pub change_kind: ChangeKind,
    pub object_kind: ObjectKind,
    /// Previous identifier, for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<ObjectNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<ObjectNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified_attributes: Vec<AttributeChange>,
    /// Rename similarity in per-mille.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u16>,
}

impl DiffEntry {
    pub fn is_change(&self) -> bool {
        self.change_kind != ChangeKind::Unchanged
    }

    /// The identifier this entry occupied in the `before` snapshot.
    pub fn before_identifier(&self) -> Option<&Id> {
        match self.change_kind {
            ChangeKind::Added => None,
            ChangeKind::Renamed => self.renamed_from.as_ref(),
            _ => Some(&self.identifier),
        }
    }

    pub fn before_fingerprint(&self) -> Option<&str> {
        self.before.as_ref().map(|n| n.fingerprint.as_str())
    }

    pub fn after_fingerprint(&self) -> Option<&str> {
        self.after.as_ref().map(|n| n.fingerprint.as_str())
    }
}

/// All entries of one comparison, ordered by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSet {
    entries: Vec<DiffEntry>,
}

impl DiffSet {
    pub fn new(mut entries: Vec<DiffEntry>) -> Self {
        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Self { entries }
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn entry(&self, identifier: &str) -> Option<&DiffEntry> {
        self.entries
            .binary_search_by(|e| e.identifier.as_str().cmp(identifier))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn changes(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(|e| e.is_change())
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &DiffEntry> {
        self.entries.iter().filter(move |e| e.change_kind == kind)
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_swaps_sides() {
        let added = AttributeChange::new(
            Attribute::Column("email".to_string()),
            None,
            Some(AttributeValue::Column(Column::new("email", "text"))),
        );
        assert_eq!(added.change, AttributeChangeKind::Added);
        let inverse = added.inverse();
        assert_eq!(inverse.change, AttributeChangeKind::Removed);
        assert_eq!(inverse.before, added.after);
        assert_eq!(inverse.inverse(), added);
    }

    #[test]
    fn test_attribute_serializes_with_name() {
        let json = serde_json::to_string(&Attribute::Column("email".to_string())).unwrap();
        assert_eq!(json, r#"{"attribute":"column","name":"email"}"#);
        let json = serde_json::to_string(&Attribute::Body).unwrap();
        assert_eq!(json, r#"{"attribute":"body"}"#);
    }
}
