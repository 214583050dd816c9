use log::info;

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::logic::apply::CatalogState;
use crate::logic::sql;
use crate::model::{
    Attribute, ChangeKind, DeferralPhase, DeploymentPlan, DiffEntry, Id, Manifest, ManifestEntry, ObjectDefinition,
    ObjectNode, Operation, Phase, ScriptBundle, ScriptUnit,
};

/// Turns a deployment plan into reversible script units.
///
/// Expected states are computed by simulating the bundle on the source
/// versions of the changed objects, with the same catalog logic an executor
/// uses, so a unit's postcondition is exactly the next unit's view of the
/// objects it touches.
pub struct ScriptGenerator;

impl ScriptGenerator {
    pub fn generate(plan: &DeploymentPlan) -> Result<ScriptBundle> {
        Self::generate_with_cancel(plan, &CancellationToken::new())
    }

    pub fn generate_with_cancel(plan: &DeploymentPlan, cancel: &CancellationToken) -> Result<ScriptBundle> {
        let mut state = CatalogState::from_nodes(plan.diff.changes().filter_map(|e| e.before.clone()));
        let mut builder = BundleBuilder::default();

        for deferral in plan.deferred.iter().filter(|d| d.phase == DeferralPhase::DropFirst) {
            cancel.check()?;
            let entry = Self::entry(plan, &deferral.table)?;
            let table = entry.before_identifier().cloned().unwrap_or_else(|| entry.identifier.clone());
            let constraint = entry
                .before
                .as_ref()
                .and_then(|n| n.definition.as_table())
                .and_then(|t| t.constraint(&deferral.constraint))
                .cloned()
                .ok_or_else(|| EngineError::not_found(format!("constraint {} on {}", deferral.constraint, table)))?;
            builder.push(
                &mut state,
                &entry.identifier,
                Phase::PreDeploy,
                Operation::DropConstraint { table, constraint },
                false,
            )?;
        }

        for identifier in &plan.order {
            cancel.check()?;
            let entry = Self::entry(plan, identifier)?;
            let forward = Self::forward_operation(plan, entry, &state)?;
            builder.push(&mut state, identifier, Phase::Deploy, forward, plan.requires_review(identifier))?;
        }

        for deferral in plan.deferred.iter().filter(|d| d.phase == DeferralPhase::AddAfter) {
            cancel.check()?;
            let entry = Self::entry(plan, &deferral.table)?;
            let constraint = entry
                .after
                .as_ref()
                .and_then(|n| n.definition.as_table())
                .and_then(|t| t.constraint(&deferral.constraint))
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found(format!("constraint {} on {}", deferral.constraint, entry.identifier))
                })?;
            builder.push(
                &mut state,
                &entry.identifier,
                Phase::PostDeploy,
                Operation::AddConstraint {
                    table: entry.identifier.clone(),
                    constraint,
                },
                false,
            )?;
        }

        let bundle = builder.finish(plan);
        info!("generated {} script units", bundle.len());
        Ok(bundle)
    }

    fn entry<'a>(plan: &'a DeploymentPlan, identifier: &str) -> Result<&'a DiffEntry> {
        plan.diff
            .entry(identifier)
            .ok_or_else(|| EngineError::not_found(format!("diff entry {}", identifier)))
    }

    fn missing_side(entry: &DiffEntry) -> EngineError {
        EngineError::invalid_graph("diff entry is missing a snapshot side", vec![entry.identifier.clone()])
    }

    /// `node` without the foreign keys that are split into their own units.
    fn without_deferred(plan: &DeploymentPlan, owner: &str, node: &ObjectNode) -> ObjectNode {
        let deferred = plan.deferred_for(owner, DeferralPhase::AddAfter);
        match &node.definition {
            ObjectDefinition::Table(table) if !deferred.is_empty() => {
                let mut table = table.clone();
                table.constraints.retain(|c| !deferred.contains(&c.name));
                node.with_definition(ObjectDefinition::Table(table))
            }
            _ => node.clone(),
        }
    }

    fn forward_operation(plan: &DeploymentPlan, entry: &DiffEntry, state: &CatalogState) -> Result<Operation> {
        let before_id = entry.before_identifier();
        let current = before_id.and_then(|id| state.get(id)).cloned();

        let deferred: Vec<String> = plan
            .deferred
            .iter()
            .filter(|d| d.table == entry.identifier)
            .map(|d| d.constraint.clone())
            .collect();
        let changes: Vec<_> = entry
            .modified_attributes
            .iter()
            .filter(|c| !matches!(&c.attribute, Attribute::Constraint(name) if deferred.contains(name)))
            .cloned()
            .collect();

        let op = match entry.change_kind {
            ChangeKind::Added => {
                let node = entry.after.as_ref().ok_or_else(|| Self::missing_side(entry))?;
                Operation::Create {
                    node: Self::without_deferred(plan, &entry.identifier, node),
                }
            }
            ChangeKind::Removed => Operation::Drop {
                node: current.ok_or_else(|| Self::missing_side(entry))?,
            },
            ChangeKind::Modified if entry.modified_attributes.is_empty() => {
                // kind changed, or nothing attribute-level to go on: replace
                let after = entry.after.as_ref().ok_or_else(|| Self::missing_side(entry))?;
                Operation::Sequence {
                    steps: vec![
                        Operation::Drop {
                            node: current.ok_or_else(|| Self::missing_side(entry))?,
                        },
                        Operation::Create {
                            node: Self::without_deferred(plan, &entry.identifier, after),
                        },
                    ],
                }
            }
            ChangeKind::Modified => Operation::Modify {
                identifier: entry.identifier.clone(),
                kind: entry.object_kind,
                changes,
            },
            ChangeKind::Renamed => {
                let from = entry.renamed_from.clone().ok_or_else(|| Self::missing_side(entry))?;
                let rename = Operation::Rename {
                    from,
                    to: entry.identifier.clone(),
                    kind: entry.object_kind,
                };
                if changes.is_empty() {
                    rename
                } else {
                    Operation::Sequence {
                        steps: vec![
                            rename,
                            Operation::Modify {
                                identifier: entry.identifier.clone(),
                                kind: entry.object_kind,
                                changes,
                            },
                        ],
                    }
                }
            }
            ChangeKind::Unchanged => {
                return Err(EngineError::invalid_graph(
                    "unchanged object in deployment order",
                    vec![entry.identifier.clone()],
                ))
            }
        };
        Ok(op)
    }

    /// SQL for `op`, rendered step by step against a scratch copy of the
    /// objects it touches.
    fn render(op: &Operation, state: &CatalogState) -> Result<Vec<String>> {
        let mut scratch = state.subset(&op.touched());
        let steps: Vec<&Operation> = match op {
            Operation::Sequence { steps } => steps.iter().collect(),
            other => vec![other],
        };
        let mut statements = Vec::new();
        for step in steps {
            scratch.apply("render", step)?;
            statements.extend(sql::render(step, scratch.objects()));
        }
        Ok(statements)
    }
}

#[derive(Default)]
struct BundleBuilder {
    units: Vec<ScriptUnit>,
}

impl BundleBuilder {
    fn push(
        &mut self,
        state: &mut CatalogState,
        identifier: &Id,
        phase: Phase,
        forward: Operation,
        requires_review: bool,
    ) -> Result<()> {
        let sequence = self.units.len() + 1;
        let unit_id = format!("{:04}-{}-{}", sequence, phase_slug(phase), identifier);
        let touched = forward.touched();

        let expected_precondition = state.expected(&touched);
        let forward_sql = ScriptGenerator::render(&forward, state)?;
        state.apply(&unit_id, &forward)?;
        let expected_postcondition = state.expected(&touched);

        let rollback = forward.inverse();
        let rollback_sql = ScriptGenerator::render(&rollback, state)?;

        self.units.push(ScriptUnit {
            unit_id,
            identifier: identifier.clone(),
            phase,
            forward,
            rollback,
            expected_precondition,
            expected_postcondition,
            forward_sql,
            rollback_sql,
            requires_review,
        });
        Ok(())
    }

    fn finish(self, plan: &DeploymentPlan) -> ScriptBundle {
        let entries = self
            .units
            .iter()
            .enumerate()
            .map(|(i, unit)| ManifestEntry {
                sequence: i + 1,
                unit_id: unit.unit_id.clone(),
                identifier: unit.identifier.clone(),
                phase: unit.phase,
                description: unit.forward.describe(),
                requires_review: unit.requires_review,
            })
            .collect();
        ScriptBundle {
            units: self.units,
            manifest: Manifest {
                entries,
                cycles: plan.cycles.clone(),
            },
        }
    }
}

fn phase_slug(phase: Phase) -> &'static str {
    match phase {
        Phase::PreDeploy => "pre",
        Phase::Deploy => "deploy",
        Phase::PostDeploy => "post",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::diff::DiffEngine;
    use crate::logic::planner::DeploymentPlanner;
    use crate::model::{Column, ObjectKind, SchemaGraph, TableConstraint};

    fn bundle(before: &SchemaGraph, after: &SchemaGraph) -> ScriptBundle {
        let diff = DiffEngine::default().compare(before, after).unwrap();
        let plan = DeploymentPlanner::plan(before, after, diff).unwrap();
        ScriptGenerator::generate(&plan).unwrap()
    }

    fn customers(columns: Vec<Column>) -> ObjectNode {
        ObjectNode::table("dbo.customers", columns, vec![TableConstraint::primary_key("pk_customers", &["id"])])
    }

    #[test]
    fn test_add_column_unit_and_rollback() {
        let before = SchemaGraph::with_derived_edges(vec![customers(vec![Column::new("id", "int").not_null()])]).unwrap();
        let after = SchemaGraph::with_derived_edges(vec![customers(vec![
            Column::new("id", "int").not_null(),
            Column::new("email", "varchar(255)"),
        ])])
        .unwrap();
        let bundle = bundle(&before, &after);
        assert_eq!(bundle.len(), 1);
        let unit = &bundle.units[0];
        assert_eq!(unit.unit_id, "0001-deploy-dbo.customers");
        assert_eq!(unit.forward_sql, vec!["ALTER TABLE dbo.customers ADD COLUMN email varchar(255);".to_string()]);
        assert_eq!(unit.rollback_sql, vec!["ALTER TABLE dbo.customers DROP COLUMN email;".to_string()]);
        assert_eq!(
            unit.expected_precondition[0].fingerprint.as_deref(),
            Some(before.node("dbo.customers").unwrap().fingerprint.as_str())
        );
        assert_eq!(
            unit.expected_postcondition[0].fingerprint.as_deref(),
            Some(after.node("dbo.customers").unwrap().fingerprint.as_str())
        );

        let mut state = CatalogState::from_graph(&before);
        state.apply_bundle(&bundle).unwrap();
        assert_eq!(state, CatalogState::from_graph(&after));
        state.rollback_bundle(&bundle).unwrap();
        assert_eq!(state.fingerprints(), CatalogState::from_graph(&before).fingerprints());
    }

    #[test]
    fn test_mutual_foreign_keys_split_into_phases() {
        let a = ObjectNode::table(
            "a",
            vec![Column::new("id", "int"), Column::new("b_id", "int")],
            vec![TableConstraint::foreign_key("fk_a_b", &["b_id"], "b", &["id"])],
        );
        let b = ObjectNode::table(
            "b",
            vec![Column::new("id", "int"), Column::new("a_id", "int")],
            vec![TableConstraint::foreign_key("fk_b_a", &["a_id"], "a", &["id"])],
        );
        let before = SchemaGraph::empty();
        let after = SchemaGraph::with_derived_edges(vec![a, b]).unwrap();
        let bundle = bundle(&before, &after);

        let phases: Vec<Phase> = bundle.units.iter().map(|u| u.phase).collect();
        assert_eq!(phases, vec![Phase::Deploy, Phase::Deploy, Phase::PostDeploy, Phase::PostDeploy]);
        assert!(bundle.units[0].forward_sql[0].starts_with("CREATE TABLE a"));
        assert!(!bundle.units[0].forward_sql[0].contains("FOREIGN KEY"));
        assert_eq!(bundle.manifest.cycles.len(), 1);

        let mut state = CatalogState::new();
        state.apply_bundle(&bundle).unwrap();
        assert_eq!(state, CatalogState::from_graph(&after));
        state.rollback_bundle(&bundle).unwrap();
        assert!(state.objects().is_empty());
    }

    #[test]
    fn test_rename_with_body_change_renders_both_directions() {
        let old = ObjectNode::routine("dbo.active_customers", ObjectKind::View, "SELECT id, name FROM dbo.customers WHERE active = 1", &[]);
        let new = ObjectNode::routine("dbo.current_customers", ObjectKind::View, "SELECT id, name FROM dbo.customers WHERE active = 1 AND deleted = 0", &[]);
        let before = SchemaGraph::with_derived_edges(vec![old]).unwrap();
        let after = SchemaGraph::with_derived_edges(vec![new]).unwrap();
        let diff = DiffEngine::new(crate::logic::diff::DiffOptions::with_threshold(0.5))
            .compare(&before, &after)
            .unwrap();
        let plan = DeploymentPlanner::plan(&before, &after, diff).unwrap();
        let bundle = ScriptGenerator::generate(&plan).unwrap();

        let unit = &bundle.units[0];
        assert!(matches!(unit.forward, Operation::Sequence { .. }));
        assert_eq!(unit.forward_sql.len(), 2);
        assert!(unit.forward_sql[0].starts_with("ALTER VIEW dbo.active_customers RENAME TO"));
        assert!(unit.forward_sql[1].contains("deleted = 0"));
        assert_eq!(unit.rollback_sql.len(), 2);
        assert!(!unit.rollback_sql[0].contains("deleted"));
        assert!(unit.rollback_sql[1].starts_with("ALTER VIEW dbo.current_customers RENAME TO"));
    }
}
