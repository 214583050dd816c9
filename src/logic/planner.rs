use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::logic::resolve::DependencyResolver;
use crate::model::{
    Attribute, AttributeChangeKind, BreakStrategy, ChangeKind, DeferralPhase, DeferredConstraint, DependencyEdge,
    DeploymentPlan, DiffEntry, DiffSet, EdgeSource, Id, ObjectKind, SchemaGraph,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeOrigin {
    /// Taken from the target snapshot: dependency deploys first.
    After,
    /// Reversed from the source snapshot: dependent is removed or detached first.
    Before,
}

/// Turns a diff into an ordered deployment plan.
///
/// Ordering runs over a transition graph whose nodes are the changed
/// identifiers: target-snapshot edges between objects that exist afterwards,
/// plus source-snapshot edges touching removed objects, reversed, so that a
/// dependent is dropped or detached before what it depended on goes away.
pub struct DeploymentPlanner;

impl DeploymentPlanner {
    pub fn plan(before: &SchemaGraph, after: &SchemaGraph, diff: DiffSet) -> Result<DeploymentPlan> {
        Self::plan_with_cancel(before, after, diff, &CancellationToken::new())
    }

    pub fn plan_with_cancel(
        before: &SchemaGraph,
        after: &SchemaGraph,
        diff: DiffSet,
        cancel: &CancellationToken,
    ) -> Result<DeploymentPlan> {
        let changed: BTreeMap<&str, &DiffEntry> = diff.changes().map(|e| (e.identifier.as_str(), e)).collect();
        // identifiers as they were before, mapped to the entry that now owns them
        let by_before_id: BTreeMap<&str, &DiffEntry> = diff
            .changes()
            .filter_map(|e| e.before_identifier().map(|id| (id.as_str(), e)))
            .collect();

        let mut origins: BTreeMap<DependencyEdge, EdgeOrigin> = BTreeMap::new();
        for edge in after.edges() {
            cancel.check()?;
            if edge.is_self_edge() {
                continue;
            }
            let (Some(from), Some(to)) = (changed.get(edge.from.as_str()), changed.get(edge.to.as_str())) else {
                continue;
            };
            if from.change_kind == ChangeKind::Removed || to.change_kind == ChangeKind::Removed {
                continue;
            }
            origins.entry(edge.clone()).or_insert(EdgeOrigin::After);
        }
        for edge in before.edges() {
            cancel.check()?;
            if edge.is_self_edge() {
                continue;
            }
            let (Some(from), Some(to)) = (by_before_id.get(edge.from.as_str()), by_before_id.get(edge.to.as_str()))
            else {
                continue;
            };
            if from.change_kind != ChangeKind::Removed && to.change_kind != ChangeKind::Removed {
                continue;
            }
            let reversed = DependencyEdge {
                from: to.identifier.clone(),
                to: from.identifier.clone(),
                source: edge.source,
                label: edge.label.clone(),
                deferred: false,
            };
            origins.entry(reversed).or_insert(EdgeOrigin::Before);
        }

        let nodes: Vec<Id> = changed.keys().map(|id| id.to_string()).collect();
        let edges: Vec<DependencyEdge> = origins.keys().cloned().collect();
        let resolved = DependencyResolver::order_edges(&nodes, &edges, cancel)?;

        let mut deferred = BTreeSet::new();
        for cycle in &resolved.cycles {
            if cycle.break_strategy != BreakStrategy::DeferConstraint {
                continue;
            }
            for edge in &cycle.edges {
                let origin = origins.get(edge).copied().unwrap_or(EdgeOrigin::After);
                deferred.extend(Self::deferral_for(edge, origin, &changed));
            }
        }
        let deferred: Vec<DeferredConstraint> = deferred.into_iter().collect();
        for d in &deferred {
            debug!("deferring {} on {} ({:?})", d.constraint, d.table, d.phase);
        }

        info!(
            "planned {} changes, {} cycles, {} deferred constraints",
            resolved.order.len(),
            resolved.cycles.len(),
            deferred.len()
        );
        Ok(DeploymentPlan {
            diff,
            order: resolved.order,
            cycles: resolved.cycles,
            deferred,
        })
    }

    /// Which constraint operations to split out of the owner's unit so the
    /// cycle edge no longer constrains ordering.
    fn deferral_for(
        edge: &DependencyEdge,
        origin: EdgeOrigin,
        changed: &BTreeMap<&str, &DiffEntry>,
    ) -> Vec<DeferredConstraint> {
        if edge.source != EdgeSource::ForeignKey {
            return Vec::new();
        }
        let Some(constraint) = edge.label.clone() else {
            return Vec::new();
        };
        // after-origin edges point owner -> referenced; before-origin edges were reversed
        let (owner_id, referenced_id) = match origin {
            EdgeOrigin::After => (&edge.from, &edge.to),
            EdgeOrigin::Before => (&edge.to, &edge.from),
        };
        let Some(owner) = changed.get(owner_id.as_str()) else {
            return Vec::new();
        };
        if owner.object_kind != ObjectKind::Table {
            return Vec::new();
        }

        let constraint_change = owner
            .modified_attributes
            .iter()
            .find(|c| c.attribute == Attribute::Constraint(constraint.clone()))
            .map(|c| c.change);
        let phases: Vec<DeferralPhase> = match (origin, owner.change_kind, constraint_change) {
            (EdgeOrigin::After, ChangeKind::Added, _) => vec![DeferralPhase::AddAfter],
            (EdgeOrigin::After, _, Some(AttributeChangeKind::Added)) => vec![DeferralPhase::AddAfter],
            (EdgeOrigin::Before, ChangeKind::Removed, _) => vec![DeferralPhase::DropFirst],
            (EdgeOrigin::Before, _, Some(AttributeChangeKind::Removed)) => vec![DeferralPhase::DropFirst],
            (_, _, Some(AttributeChangeKind::Changed)) => vec![DeferralPhase::DropFirst, DeferralPhase::AddAfter],
            _ => Vec::new(),
        };
        phases
            .into_iter()
            .map(|phase| DeferredConstraint {
                table: owner.identifier.clone(),
                constraint: constraint.clone(),
                references: referenced_id.clone(),
                phase,
            })
            .collect()
    }
}
