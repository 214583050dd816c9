use schema_sync_engine::{
    Attribute, AttributeChangeKind, BreakStrategy, CatalogState, ChangeKind, Column, DependencyResolver,
    DeploymentPlanner, DiffEngine, ObjectKind, ObjectNode, Phase, PlanPipeline, SchemaGraph, ScriptBundle,
    ScriptGenerator, TableConstraint,
};
use std::collections::BTreeSet;

fn table(id: &str, columns: &[(&str, &str)], constraints: Vec<TableConstraint>) -> ObjectNode {
    ObjectNode::table(
        id,
        columns.iter().map(|(name, ty)| Column::new(name, ty)).collect(),
        constraints,
    )
}

fn fk(name: &str, column: &str, target: &str) -> TableConstraint {
    TableConstraint::foreign_key(name, &[column], target, &["id"])
}

fn graph(nodes: Vec<ObjectNode>) -> SchemaGraph {
    SchemaGraph::with_derived_edges(nodes).unwrap()
}

fn bundle_for(before: &SchemaGraph, after: &SchemaGraph) -> ScriptBundle {
    PlanPipeline::default().run(before, after).unwrap().bundle
}

/// Store schema used by several scenarios.
fn store_schema() -> Vec<ObjectNode> {
    vec![
        table("dbo.Customers", &[("id", "int"), ("name", "varchar(100)")], vec![]),
        table("dbo.Products", &[("id", "int"), ("sku", "varchar(32)")], vec![]),
        table(
            "dbo.Orders",
            &[("id", "int"), ("customer_id", "int")],
            vec![fk("fk_orders_customers", "customer_id", "dbo.Customers")],
        ),
        table(
            "dbo.OrderItems",
            &[("id", "int"), ("order_id", "int"), ("product_id", "int")],
            vec![
                fk("fk_items_orders", "order_id", "dbo.Orders"),
                fk("fk_items_products", "product_id", "dbo.Products"),
            ],
        ),
    ]
}

#[test]
fn test_store_schema_orders_parents_first() {
    let resolved = DependencyResolver::order(&graph(store_schema())).unwrap();
    assert!(resolved.cycles.is_empty());

    let pos = |id: &str| resolved.position(id).unwrap();
    assert!(pos("dbo.Customers") < pos("dbo.Orders"));
    assert!(pos("dbo.Products") < pos("dbo.Orders"));
    assert!(pos("dbo.Orders") < pos("dbo.OrderItems"));
    println!("✓ Order: {}", resolved.order.join(" → "));
}

#[test]
fn test_added_column_is_one_modified_entry_with_scripts() {
    let before = graph(vec![table("T", &[("id", "int"), ("name", "varchar(50)")], vec![])]);
    let after = graph(vec![table(
        "T",
        &[("id", "int"), ("name", "varchar(50)"), ("email", "varchar(255)")],
        vec![],
    )]);

    let diff = DiffEngine::default().compare(&before, &after).unwrap();
    assert_eq!(diff.len(), 1);
    let entry = diff.entry("T").unwrap();
    assert_eq!(entry.change_kind, ChangeKind::Modified);
    assert_eq!(entry.modified_attributes.len(), 1);
    assert_eq!(entry.modified_attributes[0].attribute, Attribute::Column("email".to_string()));
    assert_eq!(entry.modified_attributes[0].change, AttributeChangeKind::Added);

    let plan = DeploymentPlanner::plan(&before, &after, diff).unwrap();
    let bundle = ScriptGenerator::generate(&plan).unwrap();
    assert_eq!(bundle.forward_sql(), vec!["ALTER TABLE T ADD COLUMN email varchar(255);".to_string()]);
    assert_eq!(bundle.rollback_sql(), vec!["ALTER TABLE T DROP COLUMN email;".to_string()]);
}

#[test]
fn test_mutual_foreign_keys_report_deferrable_cycle() {
    let g = graph(vec![
        table("A", &[("id", "int"), ("bId", "int")], vec![fk("fk_a_b", "bId", "B")]),
        table("B", &[("id", "int"), ("aId", "int")], vec![fk("fk_b_a", "aId", "A")]),
    ]);
    let resolved = DependencyResolver::order(&g).unwrap();
    assert_eq!(resolved.order.len(), 2);
    assert_eq!(resolved.cycles.len(), 1);
    assert_eq!(resolved.cycles[0].members, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(resolved.cycles[0].break_strategy, BreakStrategy::DeferConstraint);

    // and the deployment still round-trips
    let bundle = bundle_for(&SchemaGraph::empty(), &g);
    let mut state = CatalogState::new();
    state.apply_bundle(&bundle).unwrap();
    assert_eq!(state.fingerprints(), CatalogState::from_graph(&g).fingerprints());
    state.rollback_bundle(&bundle).unwrap();
    assert!(state.objects().is_empty());
}

#[test]
fn test_view_cycle_terminates_with_manual_review() {
    let g = graph(vec![
        ObjectNode::routine("dbo.v_left", ObjectKind::View, "SELECT * FROM dbo.v_right", &["dbo.v_right"]),
        ObjectNode::routine("dbo.v_right", ObjectKind::View, "SELECT * FROM dbo.v_left", &["dbo.v_left"]),
    ]);
    let resolved = DependencyResolver::order(&g).unwrap();
    assert_eq!(resolved.cycles.len(), 1);
    assert_eq!(resolved.cycles[0].break_strategy, BreakStrategy::ManualReview);
    assert!(resolved.clone().require_acyclic().is_err());

    let bundle = bundle_for(&SchemaGraph::empty(), &g);
    assert_eq!(bundle.len(), 2);
    assert!(bundle.units.iter().all(|u| u.requires_review));
}

/// A migration touching every change kind the planner distinguishes.
fn mixed_migration() -> (SchemaGraph, SchemaGraph) {
    let before = graph(vec![
        table("dbo.customers", &[("id", "int"), ("name", "varchar(100)")], vec![]),
        table(
            "dbo.legacy_orders",
            &[("legacy_id", "bigint"), ("customer_ref", "int"), ("note", "text")],
            vec![fk("fk_legacy_customers", "customer_ref", "dbo.customers")],
        ),
        ObjectNode::routine(
            "dbo.v_legacy",
            ObjectKind::View,
            "SELECT legacy_id, note FROM dbo.legacy_orders",
            &["dbo.legacy_orders"],
        ),
    ]);
    let after = graph(vec![
        table(
            "dbo.customers",
            &[("id", "int"), ("name", "varchar(100)"), ("email", "varchar(255)")],
            vec![],
        ),
        table("dbo.products", &[("id", "int"), ("sku", "varchar(32)")], vec![]),
        table(
            "dbo.orders",
            &[("id", "int"), ("customer_id", "int"), ("placed_at", "timestamp"), ("total", "decimal(10,2)")],
            vec![fk("fk_orders_customers", "customer_id", "dbo.customers")],
        ),
        table(
            "dbo.order_items",
            &[("id", "int"), ("order_id", "int"), ("product_id", "int")],
            vec![
                fk("fk_items_orders", "order_id", "dbo.orders"),
                fk("fk_items_products", "product_id", "dbo.products"),
            ],
        ),
        ObjectNode::index("dbo.ix_orders_customer", "dbo.orders", &["customer_id"], false),
    ]);
    (before, after)
}

#[test]
fn test_every_identifier_appears_once_in_the_diff() {
    let (before, after) = mixed_migration();
    let diff = DiffEngine::default().compare(&before, &after).unwrap();

    let mut seen = Vec::new();
    for entry in diff.entries() {
        seen.push(entry.identifier.clone());
        if let Some(from) = &entry.renamed_from {
            seen.push(from.clone());
        }
    }
    let unique: BTreeSet<_> = seen.iter().cloned().collect();
    let expected: BTreeSet<_> = before.identifiers().chain(after.identifiers()).cloned().collect();
    assert_eq!(seen.len(), unique.len());
    assert_eq!(unique, expected);
}

#[test]
fn test_forward_sequence_respects_dependencies() {
    let (before, after) = mixed_migration();
    let bundle = bundle_for(&before, &after);
    let changed: BTreeSet<&str> = bundle.units.iter().map(|u| u.identifier.as_str()).collect();
    let pos = |id: &str| bundle.position_of(id, Phase::Deploy).unwrap();

    // new or changed dependents come after what they depend on
    for edge in after.edges() {
        if changed.contains(edge.from.as_str()) && changed.contains(edge.to.as_str()) {
            assert!(pos(&edge.from) > pos(&edge.to), "{} must follow {}", edge.from, edge.to);
        }
    }

    // dependents being removed go before what they depend on
    for edge in before.edges().iter().filter(|e| !after.edges().contains(*e)) {
        if !after.contains(&edge.from) && changed.contains(edge.to.as_str()) {
            assert!(pos(&edge.from) < pos(&edge.to), "{} must be removed before {}", edge.from, edge.to);
        }
    }
    println!("✓ {} units in dependency-safe order", bundle.len());
}

#[test]
fn test_forward_then_rollback_restores_fingerprints() {
    let (before, after) = mixed_migration();
    let bundle = bundle_for(&before, &after);

    let mut state = CatalogState::from_graph(&before);
    state.apply_bundle(&bundle).unwrap();
    assert_eq!(state.fingerprints(), CatalogState::from_graph(&after).fingerprints());

    state.rollback_bundle(&bundle).unwrap();
    assert_eq!(state.fingerprints(), CatalogState::from_graph(&before).fingerprints());
}

#[test]
fn test_drifted_catalog_stops_the_bundle() {
    let (before, after) = mixed_migration();
    let bundle = bundle_for(&before, &after);

    // someone already added the column by hand
    let mut drifted: Vec<ObjectNode> = before.nodes().cloned().collect();
    drifted.retain(|n| n.identifier != "dbo.customers");
    drifted.push(after.node("dbo.customers").unwrap().clone());
    let mut state = CatalogState::from_nodes(drifted);

    let err = state.apply_bundle(&bundle).unwrap_err();
    assert!(err.to_string().contains("dbo.customers"), "{}", err);
}

#[test]
fn test_planning_is_deterministic_and_serialization_is_stable() {
    let (before, after) = mixed_migration();
    let first = PlanPipeline::default().run(&before, &after).unwrap();
    let second = PlanPipeline::default().run(&before, &after).unwrap();
    assert_eq!(first.plan, second.plan);
    assert_eq!(first.bundle, second.bundle);

    let order_a = DependencyResolver::order(&after).unwrap();
    let order_b = DependencyResolver::order(&after).unwrap();
    assert_eq!(order_a.order, order_b.order);

    let json = serde_json::to_string(&first.plan).unwrap();
    let reparsed: schema_sync_engine::DeploymentPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(serde_json::to_string(&reparsed).unwrap(), json);

    let graph_json = serde_json::to_string(&after).unwrap();
    let graph_back: SchemaGraph = serde_json::from_str(&graph_json).unwrap();
    assert_eq!(serde_json::to_string(&graph_back).unwrap(), graph_json);
}
