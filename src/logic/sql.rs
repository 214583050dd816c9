//! Generic ANSI-flavored SQL text for script units. The structural
//! operations remain the source of truth; this is for human review and for
//! executors that run plain SQL.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::logic::strategy::strategy_for;
use crate::model::{
    Column, ConstraintKind, Id, IndexDefinition, ObjectKind, ObjectNode, Operation, RoutineDefinition,
    TableConstraint, TableDefinition,
};

pub fn column(column: &Column) -> String {
    let mut sql = format!("{} {}", column.name, column.data_type);
    if let Some(expression) = &column.computed {
        sql.push_str(&format!(" GENERATED ALWAYS AS ({})", expression));
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    sql
}

pub fn constraint(constraint: &TableConstraint) -> String {
    let body = match constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", constraint.columns.join(", ")),
        ConstraintKind::Unique => format!("UNIQUE ({})", constraint.columns.join(", ")),
        ConstraintKind::ForeignKey => format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            constraint.columns.join(", "),
            constraint.references.as_deref().unwrap_or(""),
            constraint.referenced_columns.join(", ")
        ),
        ConstraintKind::Check => format!("CHECK ({})", constraint.expression.as_deref().unwrap_or("")),
    };
    format!("CONSTRAINT {} {}", constraint.name, body)
}

pub fn create_table(identifier: &str, table: &TableDefinition) -> String {
    let lines: Vec<String> = table
        .columns
        .iter()
        .map(column)
        .chain(table.constraints.iter().map(constraint))
        .map(|line| format!("    {}", line))
        .collect();
    format!("CREATE TABLE {} (\n{}\n);", identifier, lines.join(",\n"))
}

pub fn create_routine(kind: ObjectKind, identifier: &str, routine: &RoutineDefinition, replace: bool) -> String {
    let verb = if replace { "CREATE OR REPLACE" } else { "CREATE" };
    let params = routine
        .parameters
        .iter()
        .map(|p| format!("{} {}", p.name, p.data_type))
        .join(", ");
    match kind {
        ObjectKind::View => format!("{} VIEW {} AS\n{};", verb, identifier, routine.body.trim()),
        ObjectKind::Trigger => format!(
            "{} TRIGGER {} ON {}\n{};",
            verb,
            identifier,
            routine.target.as_deref().unwrap_or(""),
            routine.body.trim()
        ),
        ObjectKind::Function => format!(
            "{} FUNCTION {}({}) RETURNS {} AS\n{};",
            verb,
            identifier,
            params,
            routine.returns.as_deref().unwrap_or("void"),
            routine.body.trim()
        ),
        _ => format!(
            "{} {} {}({}) AS\n{};",
            verb,
            kind.sql_keyword(),
            identifier,
            params,
            routine.body.trim()
        ),
    }
}

pub fn create_index(identifier: &str, index: &IndexDefinition) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        identifier,
        index.table,
        index.columns.join(", ")
    );
    if let Some(predicate) = &index.predicate {
        sql.push_str(&format!(" WHERE {}", predicate));
    }
    sql.push(';');
    sql
}

pub fn drop_object(kind: ObjectKind, identifier: &str) -> String {
    format!("DROP {} {};", kind.sql_keyword(), identifier)
}

pub fn alter_table(identifier: &str, clause: &str) -> String {
    format!("ALTER TABLE {} {};", identifier, clause)
}

pub fn add_constraint(table: &str, definition: &TableConstraint) -> String {
    alter_table(table, &format!("ADD {}", constraint(definition)))
}

pub fn drop_constraint(table: &str, name: &str) -> String {
    alter_table(table, &format!("DROP CONSTRAINT {}", name))
}

pub fn rename(kind: ObjectKind, from: &str, to: &str) -> String {
    format!("ALTER {} {} RENAME TO {};", kind.sql_keyword(), from, to)
}

/// Statements for `op`; `state_after` is the catalog once `op` has run.
pub fn render(op: &Operation, state_after: &BTreeMap<Id, ObjectNode>) -> Vec<String> {
    match op {
        Operation::Create { node } => strategy_for(node.kind).render_create(node),
        Operation::Drop { node } => strategy_for(node.kind).render_drop(node),
        Operation::Modify {
            identifier,
            kind,
            changes,
        } => strategy_for(*kind).render_modify(identifier, changes, state_after.get(identifier)),
        Operation::Rename { from, to, kind } => vec![rename(*kind, from, to)],
        Operation::AddConstraint { table, constraint } => vec![add_constraint(table, constraint)],
        Operation::DropConstraint { table, constraint } => vec![drop_constraint(table, &constraint.name)],
        Operation::Sequence { steps } => steps.iter().flat_map(|s| render(s, state_after)).collect(),
    }
}
