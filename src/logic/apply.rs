//! In-memory catalog that script units are applied to. The generator uses it
//! to simulate a bundle when computing expected states; callers use it as a
//! reference executor and for dry runs.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{EngineError, Result};
use crate::logic::strategy::strategy_for;
use crate::model::{
    ExpectedState, Id, ObjectDefinition, ObjectNode, Operation, SchemaGraph, ScriptBundle, ScriptUnit,
    TableDefinition,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogState {
    objects: BTreeMap<Id, ObjectNode>,
}

impl CatalogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: &SchemaGraph) -> Self {
        Self::from_nodes(graph.nodes().cloned())
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = ObjectNode>) -> Self {
        Self {
            objects: nodes.into_iter().map(|n| (n.identifier.clone(), n)).collect(),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&ObjectNode> {
        self.objects.get(identifier)
    }

    pub fn fingerprint(&self, identifier: &str) -> Option<&str> {
        self.objects.get(identifier).map(|n| n.fingerprint.as_str())
    }

    pub fn fingerprints(&self) -> BTreeMap<Id, String> {
        self.objects
            .iter()
            .map(|(id, n)| (id.clone(), n.fingerprint.clone()))
            .collect()
    }

    pub fn objects(&self) -> &BTreeMap<Id, ObjectNode> {
        &self.objects
    }

    /// Copy of the catalog restricted to `identifiers`.
    pub fn subset(&self, identifiers: &[Id]) -> CatalogState {
        CatalogState {
            objects: identifiers
                .iter()
                .filter_map(|id| self.objects.get(id).map(|n| (id.clone(), n.clone())))
                .collect(),
        }
    }

    pub fn expected(&self, identifiers: &[Id]) -> Vec<ExpectedState> {
        identifiers
            .iter()
            .map(|id| ExpectedState {
                identifier: id.clone(),
                fingerprint: self.fingerprint(id).map(str::to_string),
            })
            .collect()
    }

    /// Fails with `PreconditionFailed` on the first object that drifted.
    pub fn verify(&self, unit_id: &str, expected: &[ExpectedState]) -> Result<()> {
        for state in expected {
            let actual = self.fingerprint(&state.identifier);
            if actual != state.fingerprint.as_deref() {
                return Err(EngineError::PreconditionFailed {
                    unit_id: unit_id.to_string(),
                    identifier: state.identifier.clone(),
                    expected: state.fingerprint.clone(),
                    actual: actual.map(str::to_string),
                });
            }
        }
        Ok(())
    }

    pub fn apply_unit(&mut self, unit: &ScriptUnit) -> Result<()> {
        self.verify(&unit.unit_id, &unit.expected_precondition)?;
        self.apply(&unit.unit_id, &unit.forward)?;
        debug!("applied {}", unit.unit_id);
        Ok(())
    }

    /// The rollback's precondition is the forward postcondition.
    pub fn rollback_unit(&mut self, unit: &ScriptUnit) -> Result<()> {
        self.verify(&unit.unit_id, &unit.expected_postcondition)?;
        self.apply(&unit.unit_id, &unit.rollback)?;
        debug!("rolled back {}", unit.unit_id);
        Ok(())
    }

    pub fn apply_bundle(&mut self, bundle: &ScriptBundle) -> Result<()> {
        for unit in bundle.forward_sequence() {
            self.apply_unit(unit)?;
        }
        Ok(())
    }

    pub fn rollback_bundle(&mut self, bundle: &ScriptBundle) -> Result<()> {
        for unit in bundle.rollback_sequence() {
            self.rollback_unit(unit)?;
        }
        Ok(())
    }

    /// Apply one structural operation. `unit_id` only labels errors.
    pub fn apply(&mut self, unit_id: &str, op: &Operation) -> Result<()> {
        let drift = |identifier: &str, expected: Option<&str>, actual: Option<&str>| EngineError::PreconditionFailed {
            unit_id: unit_id.to_string(),
            identifier: identifier.to_string(),
            expected: expected.map(str::to_string),
            actual: actual.map(str::to_string),
        };

        match op {
            Operation::Create { node } => {
                if let Some(existing) = self.fingerprint(&node.identifier) {
                    return Err(drift(&node.identifier, None, Some(existing)));
                }
                self.objects.insert(node.identifier.clone(), node.clone());
            }
            Operation::Drop { node } => {
                let actual = self.fingerprint(&node.identifier);
                if actual != Some(node.fingerprint.as_str()) {
                    return Err(drift(&node.identifier, Some(&node.fingerprint), actual));
                }
                self.objects.remove(&node.identifier);
            }
            Operation::Modify {
                identifier,
                kind,
                changes,
            } => {
                let existing = self.objects.get(identifier).ok_or_else(|| drift(identifier, None, None))?;
                let definition = strategy_for(*kind).apply(&existing.definition, changes)?;
                let updated = existing.with_definition(definition);
                self.objects.insert(identifier.clone(), updated);
            }
            Operation::Rename { from, to, .. } => {
                if let Some(existing) = self.fingerprint(to) {
                    return Err(drift(to, None, Some(existing)));
                }
                let node = self.objects.remove(from).ok_or_else(|| drift(from, None, None))?;
                self.objects.insert(to.clone(), node.renamed(to));
            }
            Operation::AddConstraint { table, constraint } => {
                let mut definition = self.table_definition(unit_id, table)?;
                if definition.constraint(&constraint.name).is_some() {
                    return Err(drift(table, None, self.fingerprint(table)));
                }
                definition.constraints.push(constraint.clone());
                self.replace_table(table, definition);
            }
            Operation::DropConstraint { table, constraint } => {
                let mut definition = self.table_definition(unit_id, table)?;
                let before = definition.constraints.len();
                definition.constraints.retain(|c| c.name != constraint.name);
                if definition.constraints.len() == before {
                    return Err(drift(table, None, self.fingerprint(table)));
                }
                self.replace_table(table, definition);
            }
            Operation::Sequence { steps } => {
                for step in steps {
                    self.apply(unit_id, step)?;
                }
            }
        }
        Ok(())
    }

    fn table_definition(&self, unit_id: &str, table: &str) -> Result<TableDefinition> {
        self.objects
            .get(table)
            .and_then(|n| n.definition.as_table())
            .cloned()
            .ok_or_else(|| EngineError::PreconditionFailed {
                unit_id: unit_id.to_string(),
                identifier: table.to_string(),
                expected: None,
                actual: self.fingerprint(table).map(str::to_string),
            })
    }

    fn replace_table(&mut self, table: &str, definition: TableDefinition) {
        if let Some(node) = self.objects.get(table) {
            let updated = node.with_definition(ObjectDefinition::Table(definition));
            self.objects.insert(table.to_string(), updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, TableConstraint};

    fn orders() -> ObjectNode {
        ObjectNode::table(
            "dbo.orders",
            vec![Column::new("id", "int").not_null()],
            vec![TableConstraint::primary_key("pk_orders", &["id"])],
        )
    }

    #[test]
    fn test_create_on_existing_object_reports_drift() {
        let mut state = CatalogState::from_nodes(vec![orders()]);
        let result = state.apply("u1", &Operation::Create { node: orders() });
        match result {
            Err(EngineError::PreconditionFailed {
                unit_id,
                identifier,
                expected,
                actual,
            }) => {
                assert_eq!(unit_id, "u1");
                assert_eq!(identifier, "dbo.orders");
                assert_eq!(expected, None);
                assert_eq!(actual, Some(orders().fingerprint));
            }
            other => panic!("expected drift, got {:?}", other),
        }
    }

    #[test]
    fn test_constraint_round_trip_restores_fingerprint() {
        let mut state = CatalogState::from_nodes(vec![orders()]);
        let original = state.fingerprints();
        let check = TableConstraint::check("ck_positive", "id > 0");
        let add = Operation::AddConstraint {
            table: "dbo.orders".to_string(),
            constraint: check,
        };
        state.apply("u1", &add).unwrap();
        assert_ne!(state.fingerprints(), original);
        state.apply("u1", &add.inverse()).unwrap();
        assert_eq!(state.fingerprints(), original);
    }

    #[test]
    fn test_rename_moves_object() {
        let mut state = CatalogState::from_nodes(vec![orders()]);
        let op = Operation::Rename {
            from: "dbo.orders".to_string(),
            to: "sales.orders".to_string(),
            kind: crate::model::ObjectKind::Table,
        };
        state.apply("u1", &op).unwrap();
        assert!(state.get("dbo.orders").is_none());
        assert_eq!(state.fingerprint("sales.orders"), Some(orders().fingerprint.as_str()));
    }
}
