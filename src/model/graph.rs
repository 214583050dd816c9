use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, Result};
use crate::model::common::{fingerprint_of, normalize_text};
use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Procedure,
    Function,
    Trigger,
    Index,
    Constraint,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Function => "function",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Index => "index",
            ObjectKind::Constraint => "constraint",
        }
    }

    /// Kinds whose definition is a body of procedural or query logic.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            ObjectKind::View | ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger
        )
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Index => "INDEX",
            ObjectKind::Constraint => "CONSTRAINT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Expression for computed/generated columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<String>,
}

impl Column {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            computed: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expression: &str) -> Self {
        self.default = Some(expression.to_string());
        self
    }

    pub fn computed(mut self, expression: &str) -> Self {
        self.computed = Some(expression.to_string());
        self
    }

    pub(crate) fn canonical(&self) -> Column {
        Column {
            name: self.name.clone(),
            data_type: normalize_text(&self.data_type).to_lowercase(),
            nullable: self.nullable,
            default: self.default.as_deref().map(normalize_text),
            computed: self.computed.as_deref().map(normalize_text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Referenced table, for foreign keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_columns: Vec<String>,
    /// Check expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl TableConstraint {
    pub fn primary_key(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::PrimaryKey,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references: None,
            referenced_columns: Vec::new(),
            expression: None,
        }
    }

    pub fn unique(name: &str, columns: &[&str]) -> Self {
        Self {
            kind: ConstraintKind::Unique,
            ..Self::primary_key(name, columns)
        }
    }

    pub fn foreign_key(name: &str, columns: &[&str], references: &str, referenced: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::ForeignKey,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references: Some(references.to_string()),
            referenced_columns: referenced.iter().map(|c| c.to_string()).collect(),
            expression: None,
        }
    }

    pub fn check(name: &str, expression: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ConstraintKind::Check,
            columns: Vec::new(),
            references: None,
            referenced_columns: Vec::new(),
            expression: Some(expression.to_string()),
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind == ConstraintKind::ForeignKey
    }

    pub(crate) fn canonical(&self) -> TableConstraint {
        TableConstraint {
            expression: self.expression.as_deref().map(normalize_text),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<TableConstraint>,
    /// Set when consumers depend on column position (positional inserts,
    /// `SELECT *` snapshots); column order then becomes part of the definition.
    #[serde(default)]
    pub ordinal_sensitive: bool,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn constraint(&self, name: &str) -> Option<&TableConstraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &TableConstraint> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub data_type: String,
}

/// Body of a view, procedure, function or trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineDefinition {
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    /// Table a trigger is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Id>,
    /// Objects referenced from the body, as reported by the extractor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table: Id,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

/// A constraint extracted as a standalone object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub table: Id,
    pub constraint: TableConstraint,
}

/// Definition payload, one variant per family of object kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum ObjectDefinition {
    Table(TableDefinition),
    Routine(RoutineDefinition),
    Index(IndexDefinition),
    Constraint(ConstraintDefinition),
}

impl ObjectDefinition {
    pub fn accepts(&self, kind: ObjectKind) -> bool {
        match self {
            ObjectDefinition::Table(_) => kind == ObjectKind::Table,
            ObjectDefinition::Routine(_) => kind.is_routine(),
            ObjectDefinition::Index(_) => kind == ObjectKind::Index,
            ObjectDefinition::Constraint(_) => kind == ObjectKind::Constraint,
        }
    }

    pub fn as_table(&self) -> Option<&TableDefinition> {
        match self {
            ObjectDefinition::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Normalized form that the fingerprint is computed over.
    pub fn canonical(&self) -> ObjectDefinition {
        match self {
            ObjectDefinition::Table(table) => {
                let mut columns: Vec<Column> = table.columns.iter().map(Column::canonical).collect();
                if !table.ordinal_sensitive {
                    columns.sort_by(|a, b| a.name.cmp(&b.name));
                }
                let mut constraints: Vec<TableConstraint> =
                    table.constraints.iter().map(TableConstraint::canonical).collect();
                constraints.sort();
                ObjectDefinition::Table(TableDefinition {
                    columns,
                    constraints,
                    ordinal_sensitive: table.ordinal_sensitive,
                })
            }
            ObjectDefinition::Routine(routine) => {
                let references: BTreeSet<Id> = routine.references.iter().cloned().collect();
                ObjectDefinition::Routine(RoutineDefinition {
                    body: normalize_text(&routine.body),
                    parameters: routine
                        .parameters
                        .iter()
                        .map(|p| Parameter {
                            name: p.name.clone(),
                            data_type: normalize_text(&p.data_type).to_lowercase(),
                        })
                        .collect(),
                    returns: routine.returns.as_deref().map(|r| normalize_text(r).to_lowercase()),
                    target: routine.target.clone(),
                    references: references.into_iter().collect(),
                })
            }
            ObjectDefinition::Index(index) => ObjectDefinition::Index(IndexDefinition {
                predicate: index.predicate.as_deref().map(normalize_text),
                ..index.clone()
            }),
            ObjectDefinition::Constraint(constraint) => {
                ObjectDefinition::Constraint(ConstraintDefinition {
                    table: constraint.table.clone(),
                    constraint: constraint.constraint.canonical(),
                })
            }
        }
    }

    /// Dependencies implied by the definition: `(target, source, label)`.
    pub fn referenced_objects(&self, kind: ObjectKind) -> Vec<(Id, EdgeSource, Option<String>)> {
        let mut refs = Vec::new();
        match self {
            ObjectDefinition::Table(table) => {
                for fk in table.foreign_keys() {
                    if let Some(target) = &fk.references {
                        refs.push((target.clone(), EdgeSource::ForeignKey, Some(fk.name.clone())));
                    }
                }
            }
            ObjectDefinition::Routine(routine) => {
                if let Some(target) = &routine.target {
                    let source = if kind == ObjectKind::Trigger {
                        EdgeSource::TriggerTarget
                    } else {
                        EdgeSource::BodyReference
                    };
                    refs.push((target.clone(), source, None));
                }
                for reference in &routine.references {
                    refs.push((reference.clone(), EdgeSource::BodyReference, None));
                }
            }
            ObjectDefinition::Index(index) => {
                refs.push((index.table.clone(), EdgeSource::IndexTarget, None));
            }
            ObjectDefinition::Constraint(constraint) => {
                refs.push((constraint.table.clone(), EdgeSource::ConstraintTarget, None));
                if let Some(target) = &constraint.constraint.references {
                    refs.push((
                        target.clone(),
                        EdgeSource::ForeignKey,
                        Some(constraint.constraint.name.clone()),
                    ));
                }
            }
        }
        refs
    }

    /// Line-oriented rendering used for attribution.
    pub fn lines(&self) -> Vec<String> {
        match self {
            ObjectDefinition::Table(table) => {
                let mut lines: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| {
                        let mut line = format!("{} {}", c.name, c.data_type);
                        if !c.nullable {
                            line.push_str(" NOT NULL");
                        }
                        if let Some(default) = &c.default {
                            line.push_str(&format!(" DEFAULT {}", default));
                        }
                        if let Some(expr) = &c.computed {
                            line.push_str(&format!(" AS ({})", expr));
                        }
                        line
                    })
                    .collect();
                lines.extend(table.constraints.iter().map(|c| format!("CONSTRAINT {} {:?}", c.name, c.kind)));
                lines
            }
            ObjectDefinition::Routine(routine) => routine
                .body
                .lines()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.trim().is_empty())
                .collect(),
            ObjectDefinition::Index(index) => vec![format!(
                "{}INDEX ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                index.table,
                index.columns.join(", ")
            )],
            ObjectDefinition::Constraint(constraint) => vec![format!(
                "CONSTRAINT {} ON {}",
                constraint.constraint.name, constraint.table
            )],
        }
    }
}

/// One database object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub identifier: Id,
    pub kind: ObjectKind,
    pub fingerprint: String,
    pub definition: ObjectDefinition,
}

impl ObjectNode {
    pub fn new(identifier: &str, kind: ObjectKind, definition: ObjectDefinition) -> Self {
        let fingerprint = Self::compute_fingerprint(kind, &definition);
        Self {
            identifier: identifier.to_string(),
            kind,
            fingerprint,
            definition,
        }
    }

    pub fn table(identifier: &str, columns: Vec<Column>, constraints: Vec<TableConstraint>) -> Self {
        Self::new(
            identifier,
            ObjectKind::Table,
            ObjectDefinition::Table(TableDefinition {
                columns,
                constraints,
                ordinal_sensitive: false,
            }),
        )
    }

    pub fn routine(identifier: &str, kind: ObjectKind, body: &str, references: &[&str]) -> Self {
        Self::new(
            identifier,
            kind,
            ObjectDefinition::Routine(RoutineDefinition {
                body: body.to_string(),
                parameters: Vec::new(),
                returns: None,
                target: None,
                references: references.iter().map(|r| r.to_string()).collect(),
            }),
        )
    }

    pub fn index(identifier: &str, table: &str, columns: &[&str], unique: bool) -> Self {
        Self::new(
            identifier,
            ObjectKind::Index,
            ObjectDefinition::Index(IndexDefinition {
                table: table.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                unique,
                predicate: None,
            }),
        )
    }

    pub fn compute_fingerprint(kind: ObjectKind, definition: &ObjectDefinition) -> String {
        fingerprint_of(kind.as_str(), &definition.canonical())
    }

    /// Same object with a new definition; the fingerprint follows.
    pub fn with_definition(&self, definition: ObjectDefinition) -> ObjectNode {
        ObjectNode::new(&self.identifier, self.kind, definition)
    }

    pub fn renamed(&self, identifier: &str) -> ObjectNode {
        ObjectNode {
            identifier: identifier.to_string(),
            ..self.clone()
        }
    }

    pub fn has_current_fingerprint(&self) -> bool {
        self.fingerprint == Self::compute_fingerprint(self.kind, &self.definition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    ForeignKey,
    BodyReference,
    IndexTarget,
    TriggerTarget,
    ConstraintTarget,
}

/// `from` depends on `to`: `to` is deployed first and removed last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: Id,
    pub to: Id,
    pub source: EdgeSource,
    /// Owning constraint name for foreign key edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
}

impl DependencyEdge {
    pub fn new(from: &str, to: &str, source: EdgeSource) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            source,
            label: None,
            deferred: false,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn is_self_edge(&self) -> bool {
        self.from == self.to
    }
}

/// Serialized shape of a graph; deserialization re-validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphParts {
    nodes: Vec<ObjectNode>,
    #[serde(default)]
    edges: Vec<DependencyEdge>,
}

/// Full node and edge set of one database at one instant. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphParts", into = "GraphParts")]
pub struct SchemaGraph {
    nodes: BTreeMap<Id, ObjectNode>,
    edges: Vec<DependencyEdge>,
}

impl TryFrom<GraphParts> for SchemaGraph {
    type Error = EngineError;

    fn try_from(parts: GraphParts) -> Result<Self> {
        SchemaGraph::new(parts.nodes, parts.edges)
    }
}

impl From<SchemaGraph> for GraphParts {
    fn from(graph: SchemaGraph) -> Self {
        GraphParts {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges,
        }
    }
}

impl Default for SchemaGraph {
    fn default() -> Self {
        Self::empty()
    }
}

impl SchemaGraph {
    pub fn empty() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Validate and build a graph from extractor output.
    pub fn new(nodes: Vec<ObjectNode>, mut edges: Vec<DependencyEdge>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for node in nodes {
            if !node.definition.accepts(node.kind) {
                return Err(EngineError::invalid_graph(
                    format!("definition does not match kind {}", node.kind.as_str()),
                    vec![node.identifier],
                ));
            }
            if !node.has_current_fingerprint() {
                return Err(EngineError::invalid_graph(
                    "fingerprint does not match definition",
                    vec![node.identifier],
                ));
            }
            if map.contains_key(&node.identifier) {
                return Err(EngineError::invalid_graph(
                    "duplicate identifier",
                    vec![node.identifier],
                ));
            }
            map.insert(node.identifier.clone(), node);
        }

        for edge in &edges {
            let missing: Vec<Id> = [&edge.from, &edge.to]
                .into_iter()
                .filter(|id| !map.contains_key(*id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::invalid_graph(
                    format!("edge {} -> {} references unknown objects", edge.from, edge.to),
                    missing,
                ));
            }
            if edge.is_self_edge() && !edge.deferred {
                return Err(EngineError::invalid_graph(
                    "self dependency must be marked deferred",
                    vec![edge.from.clone()],
                ));
            }
        }

        edges.sort();
        edges.dedup();

        Ok(Self { nodes: map, edges })
    }

    /// Build a graph whose edges are derived from the node definitions.
    pub fn with_derived_edges(nodes: Vec<ObjectNode>) -> Result<Self> {
        let mut edges = Vec::new();
        for node in &nodes {
            for (target, source, label) in node.definition.referenced_objects(node.kind) {
                if target == node.identifier && source != EdgeSource::ForeignKey {
                    // recursive routines do not constrain ordering
                    continue;
                }
                let mut edge = DependencyEdge::new(&node.identifier, &target, source);
                edge.label = label;
                if edge.is_self_edge() {
                    edge = edge.deferred();
                }
                edges.push(edge);
            }
        }
        Self::new(nodes, edges)
    }

    pub fn node(&self, identifier: &str) -> Option<&ObjectNode> {
        self.nodes.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.nodes.contains_key(identifier)
    }

    /// Nodes in identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> {
        self.nodes.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Id> {
        self.nodes.keys()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Edges leaving `identifier` (what it depends on).
    pub fn dependencies_of<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.from == identifier)
    }

    /// Edges entering `identifier` (what depends on it).
    pub fn dependents_of<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.to == identifier)
    }

    pub fn kinds(&self) -> BTreeMap<Id, ObjectKind> {
        self.nodes.iter().map(|(id, n)| (id.clone(), n.kind)).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> ObjectNode {
        ObjectNode::table(
            "dbo.customers",
            vec![Column::new("id", "int").not_null(), Column::new("name", "varchar(100)")],
            vec![TableConstraint::primary_key("pk_customers", &["id"])],
        )
    }

    fn orders() -> ObjectNode {
        ObjectNode::table(
            "dbo.orders",
            vec![Column::new("id", "int").not_null(), Column::new("customer_id", "int")],
            vec![
                TableConstraint::primary_key("pk_orders", &["id"]),
                TableConstraint::foreign_key("fk_orders_customer", &["customer_id"], "dbo.customers", &["id"]),
            ],
        )
    }

    #[test]
    fn test_derived_edges_follow_foreign_keys() {
        let graph = SchemaGraph::with_derived_edges(vec![customers(), orders()]).unwrap();
        assert_eq!(graph.edges().len(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.from, "dbo.orders");
        assert_eq!(edge.to, "dbo.customers");
        assert_eq!(edge.source, EdgeSource::ForeignKey);
        assert_eq!(edge.label.as_deref(), Some("fk_orders_customer"));
        assert_eq!(graph.dependents_of("dbo.customers").count(), 1);
    }

    #[test]
    fn test_dangling_edge_is_invalid() {
        let result = SchemaGraph::with_derived_edges(vec![orders()]);
        match result {
            Err(EngineError::InvalidGraph { identifiers, .. }) => {
                assert_eq!(identifiers, vec!["dbo.customers".to_string()]);
            }
            other => panic!("expected InvalidGraph, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_identifier_is_invalid() {
        let result = SchemaGraph::new(vec![customers(), customers()], vec![]);
        assert!(matches!(result, Err(EngineError::InvalidGraph { .. })));
    }

    #[test]
    fn test_self_edge_requires_deferred_marker() {
        let employees = ObjectNode::table(
            "hr.employees",
            vec![Column::new("id", "int"), Column::new("manager_id", "int")],
            vec![TableConstraint::foreign_key("fk_manager", &["manager_id"], "hr.employees", &["id"])],
        );
        let plain = SchemaGraph::new(
            vec![employees.clone()],
            vec![DependencyEdge::new("hr.employees", "hr.employees", EdgeSource::ForeignKey)],
        );
        assert!(matches!(plain, Err(EngineError::InvalidGraph { .. })));

        let derived = SchemaGraph::with_derived_edges(vec![employees]).unwrap();
        assert!(derived.edges()[0].deferred);
    }

    #[test]
    fn test_kind_must_match_definition() {
        let mut node = customers();
        node.kind = ObjectKind::View;
        node.fingerprint = ObjectNode::compute_fingerprint(node.kind, &node.definition);
        assert!(matches!(
            SchemaGraph::new(vec![node], vec![]),
            Err(EngineError::InvalidGraph { .. })
        ));
    }

    #[test]
    fn test_column_reorder_keeps_fingerprint_unless_ordinal_sensitive() {
        let a = ObjectNode::table("t", vec![Column::new("id", "int"), Column::new("name", "text")], vec![]);
        let b = ObjectNode::table("t", vec![Column::new("name", "text"), Column::new("id", "int")], vec![]);
        assert_eq!(a.fingerprint, b.fingerprint);

        let sensitive = |node: &ObjectNode| {
            let mut table = node.definition.as_table().unwrap().clone();
            table.ordinal_sensitive = true;
            node.with_definition(ObjectDefinition::Table(table))
        };
        assert_ne!(sensitive(&a).fingerprint, sensitive(&b).fingerprint);
    }

    #[test]
    fn test_whitespace_only_body_edit_keeps_fingerprint() {
        let a = ObjectNode::routine("v", ObjectKind::View, "SELECT id FROM t", &["t"]);
        let b = ObjectNode::routine("v", ObjectKind::View, "SELECT  id\n  FROM t", &["t"]);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_serialization_round_trip_is_byte_identical() {
        let graph = SchemaGraph::with_derived_edges(vec![orders(), customers()]).unwrap();
        let first = serde_json::to_string(&graph).unwrap();
        let parsed: SchemaGraph = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&parsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(parsed, graph);
    }

    #[test]
    fn test_deserialization_rejects_tampered_fingerprint() {
        let graph = SchemaGraph::with_derived_edges(vec![customers()]).unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        let tampered = json.replace(&graph.nodes().next().unwrap().fingerprint, "deadbeef");
        assert!(serde_json::from_str::<SchemaGraph>(&tampered).is_err());
    }
}
