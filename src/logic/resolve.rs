use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use log::debug;

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::model::{BreakStrategy, CycleReport, DependencyEdge, EdgeSource, Id, ResolvedOrder, SchemaGraph};

const UNVISITED: usize = usize::MAX;

/// Orders objects so that every dependency comes before its dependents.
///
/// Strongly connected components are found first (Tarjan, iterative); the
/// condensation is then emitted with Kahn's algorithm, always taking the
/// ready component whose smallest identifier sorts first. The output is a
/// pure function of the node and edge sets.
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn order(graph: &SchemaGraph) -> Result<ResolvedOrder> {
        Self::order_with_cancel(graph, &CancellationToken::new())
    }

    pub fn order_with_cancel(graph: &SchemaGraph, cancel: &CancellationToken) -> Result<ResolvedOrder> {
        let nodes: Vec<Id> = graph.identifiers().cloned().collect();
        Self::order_edges(&nodes, graph.edges(), cancel)
    }

    /// Order an arbitrary node and edge set. Every edge endpoint must be in
    /// `nodes`.
    pub fn order_edges(nodes: &[Id], edges: &[DependencyEdge], cancel: &CancellationToken) -> Result<ResolvedOrder> {
        let ids: Vec<&Id> = nodes.iter().collect::<BTreeSet<_>>().into_iter().collect();
        let position: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        let mut edges: Vec<&DependencyEdge> = edges.iter().filter(|e| !(e.is_self_edge() && e.deferred)).collect();
        edges.sort();
        edges.dedup();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut endpoints = Vec::with_capacity(edges.len());
        for edge in &edges {
            let (Some(&from), Some(&to)) = (position.get(edge.from.as_str()), position.get(edge.to.as_str())) else {
                return Err(EngineError::invalid_graph(
                    format!("edge {} -> {} references unknown objects", edge.from, edge.to),
                    vec![edge.from.clone(), edge.to.clone()],
                ));
            };
            adjacency[from].push(to);
            endpoints.push((from, to));
        }
        for targets in adjacency.iter_mut() {
            targets.sort_unstable();
            targets.dedup();
        }

        let components = Self::strongly_connected(&adjacency, cancel)?;
        let mut component_of = vec![0usize; ids.len()];
        for (c, members) in components.iter().enumerate() {
            for &member in members {
                component_of[member] = c;
            }
        }

        // `to` is emitted before `from`
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
        let mut cyclic = vec![false; components.len()];
        for &(from, to) in &endpoints {
            let (cf, ct) = (component_of[from], component_of[to]);
            if cf == ct {
                cyclic[cf] = true;
            } else {
                successors[ct].insert(cf);
            }
        }
        let mut in_degree = vec![0usize; components.len()];
        for targets in &successors {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        // members are sorted, so the first one is the smallest identifier
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(c, _)| Reverse((components[c][0], c)))
            .collect();

        let mut order = Vec::with_capacity(ids.len());
        let mut cycles = Vec::new();
        while let Some(Reverse((_, c))) = ready.pop() {
            cancel.check()?;
            let members: Vec<Id> = components[c].iter().map(|&m| ids[m].clone()).collect();
            if cyclic[c] {
                let cycle_edges: Vec<DependencyEdge> = edges
                    .iter()
                    .filter(|e| members.contains(&e.from) && members.contains(&e.to))
                    .map(|e| (*e).clone())
                    .collect();
                let break_strategy = if cycle_edges.iter().all(|e| e.source == EdgeSource::ForeignKey) {
                    BreakStrategy::DeferConstraint
                } else {
                    BreakStrategy::ManualReview
                };
                debug!("cycle among {} ({:?})", members.join(", "), break_strategy);
                cycles.push(CycleReport {
                    members: members.clone(),
                    break_strategy,
                    edges: cycle_edges,
                });
            }
            order.extend(members);
            for &next in &successors[c] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse((components[next][0], next)));
                }
            }
        }

        Ok(ResolvedOrder { order, cycles })
    }

    /// Tarjan's algorithm with an explicit call stack. Each component's
    /// members are returned sorted.
    fn strongly_connected(adjacency: &[Vec<usize>], cancel: &CancellationToken) -> Result<Vec<Vec<usize>>> {
        let n = adjacency.len();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut components = Vec::new();
        let mut next = 0usize;

        for root in 0..n {
            cancel.check()?;
            if index[root] != UNVISITED {
                continue;
            }
            index[root] = next;
            lowlink[root] = next;
            next += 1;
            stack.push(root);
            on_stack[root] = true;
            let mut call: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if frame.1 < adjacency[v].len() {
                    let w = adjacency[v][frame.1];
                    frame.1 += 1;
                    if index[w] == UNVISITED {
                        index[w] = next;
                        lowlink[w] = next;
                        next += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                    continue;
                }

                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ObjectKind, ObjectNode, TableConstraint};

    fn ids(list: &[&str]) -> Vec<Id> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn edge(from: &str, to: &str) -> DependencyEdge {
        DependencyEdge::new(from, to, EdgeSource::BodyReference)
    }

    #[test]
    fn test_dependencies_come_first() {
        let nodes = ids(&["c", "b", "a"]);
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let resolved = DependencyResolver::order_edges(&nodes, &edges, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.order, ids(&["c", "b", "a"]));
        assert!(resolved.is_acyclic());
    }

    #[test]
    fn test_ties_break_by_identifier() {
        let nodes = ids(&["z", "m", "a"]);
        let resolved = DependencyResolver::order_edges(&nodes, &[], &CancellationToken::new()).unwrap();
        assert_eq!(resolved.order, ids(&["a", "m", "z"]));
    }

    #[test]
    fn test_view_cycle_needs_review() {
        let nodes = ids(&["v1", "v2", "t"]);
        let edges = vec![edge("v1", "v2"), edge("v2", "v1"), edge("v1", "t")];
        let resolved = DependencyResolver::order_edges(&nodes, &edges, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.order, ids(&["t", "v1", "v2"]));
        assert_eq!(resolved.cycles.len(), 1);
        assert_eq!(resolved.cycles[0].members, ids(&["v1", "v2"]));
        assert_eq!(resolved.cycles[0].break_strategy, BreakStrategy::ManualReview);
        assert!(matches!(
            resolved.require_acyclic(),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_foreign_key_cycle_can_be_deferred() {
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
        let graph = SchemaGraph::with_derived_edges(vec![a, b]).unwrap();
        let resolved = DependencyResolver::order(&graph).unwrap();
        assert_eq!(resolved.order, ids(&["a", "b"]));
        assert_eq!(resolved.cycles[0].break_strategy, BreakStrategy::DeferConstraint);
        assert_eq!(resolved.cycles[0].edges.len(), 2);
    }

    #[test]
    fn test_deferred_self_reference_is_not_a_cycle() {
        let employees = ObjectNode::table(
            "hr.employees",
            vec![Column::new("id", "int"), Column::new("manager_id", "int")],
            vec![TableConstraint::foreign_key("fk_manager", &["manager_id"], "hr.employees", &["id"])],
        );
        let view = ObjectNode::routine("hr.org_chart", ObjectKind::View, "SELECT * FROM hr.employees", &["hr.employees"]);
        let graph = SchemaGraph::with_derived_edges(vec![view, employees]).unwrap();
        let resolved = DependencyResolver::order(&graph).unwrap();
        assert!(resolved.is_acyclic());
        assert_eq!(resolved.order, ids(&["hr.employees", "hr.org_chart"]));
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let nodes: Vec<Id> = (0..20_000).map(|i| format!("n{:05}", i)).collect();
        let edges: Vec<DependencyEdge> = (1..nodes.len()).map(|i| edge(&nodes[i - 1], &nodes[i])).collect();
        let resolved = DependencyResolver::order_edges(&nodes, &edges, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.order.first(), nodes.last());
        assert_eq!(resolved.order.len(), nodes.len());
    }

    #[test]
    fn test_cancelled_order_returns_no_partial_result() {
        let token = CancellationToken::new();
        token.cancel();
        let result = DependencyResolver::order_edges(&ids(&["a"]), &[], &token);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
