//! Per-kind structural comparison, change application and SQL rendering.
//!
//! Every kind-specific behavior goes through [`strategy_for`]; adding a new
//! definition family means one new strategy and one new match arm there.

use crate::error::{EngineError, Result};
use crate::logic::sql;
use crate::model::common::{jaccard_per_mille, normalize_text, tokens};
use crate::model::{
    Attribute, AttributeChange, AttributeValue, Column, ConstraintDefinition, IndexDefinition,
    ObjectDefinition, ObjectKind, ObjectNode, RoutineDefinition, TableConstraint, TableDefinition,
};

pub trait KindStrategy: Send + Sync {
    /// Attribute-level differences, in a stable order.
    fn diff(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> Result<Vec<AttributeChange>>;

    /// Apply changes to a definition. Changes are applied in a canonical order
    /// (removals, in-place changes, additions, reordering) regardless of the
    /// order they are listed in.
    fn apply(&self, definition: &ObjectDefinition, changes: &[AttributeChange]) -> Result<ObjectDefinition>;

    /// Structural similarity in per-mille, used for rename detection.
    fn similarity(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> u16;

    fn render_create(&self, node: &ObjectNode) -> Vec<String>;

    fn render_drop(&self, node: &ObjectNode) -> Vec<String>;

    /// SQL for a modification; `result` is the object after the change.
    fn render_modify(&self, identifier: &str, changes: &[AttributeChange], result: Option<&ObjectNode>) -> Vec<String>;
}

pub struct TableStrategy;
pub struct RoutineStrategy;
pub struct IndexStrategy;
pub struct ConstraintStrategy;

pub fn strategy_for(kind: ObjectKind) -> &'static dyn KindStrategy {
    match kind {
        ObjectKind::Table => &TableStrategy,
        ObjectKind::View | ObjectKind::Procedure | ObjectKind::Function | ObjectKind::Trigger => {
            &RoutineStrategy
        }
        ObjectKind::Index => &IndexStrategy,
        ObjectKind::Constraint => &ConstraintStrategy,
    }
}

fn mismatch(expected: &str) -> EngineError {
    EngineError::invalid_graph(format!("expected a {} definition", expected), Vec::new())
}

fn malformed(change: &AttributeChange) -> EngineError {
    EngineError::invalid_graph(
        format!("malformed change for attribute {:?}", change.attribute),
        Vec::new(),
    )
}

fn text(value: &Option<AttributeValue>) -> Option<String> {
    value.as_ref().and_then(|v| v.as_text()).map(str::to_string)
}

fn names(value: &Option<AttributeValue>) -> Vec<String> {
    match value {
        Some(AttributeValue::Names(names)) => names.clone(),
        _ => Vec::new(),
    }
}

fn flag(value: &Option<AttributeValue>) -> bool {
    matches!(value, Some(AttributeValue::Flag(true)))
}

fn changed_text(attribute: Attribute, before: &Option<String>, after: &Option<String>) -> Option<AttributeChange> {
    let normalized = |v: &Option<String>| v.as_deref().map(normalize_text);
    if normalized(before) == normalized(after) {
        return None;
    }
    Some(AttributeChange::new(
        attribute,
        before.clone().map(AttributeValue::Text),
        after.clone().map(AttributeValue::Text),
    ))
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn as_table(definition: &ObjectDefinition) -> Result<&TableDefinition> {
    match definition {
        ObjectDefinition::Table(table) => Ok(table),
        _ => Err(mismatch("table")),
    }
}

impl TableStrategy {
    fn column_changes(before: &TableDefinition, after: &TableDefinition) -> Vec<AttributeChange> {
        let mut removed = Vec::new();
        let mut changed = Vec::new();
        let mut added = Vec::new();

        for column in &before.columns {
            if after.column(&column.name).is_none() {
                removed.push(AttributeChange::new(
                    Attribute::Column(column.name.clone()),
                    Some(AttributeValue::Column(column.clone())),
                    None,
                ));
            }
        }
        for column in &after.columns {
            match before.column(&column.name) {
                None => added.push(AttributeChange::new(
                    Attribute::Column(column.name.clone()),
                    None,
                    Some(AttributeValue::Column(column.clone())),
                )),
                Some(previous) if previous.canonical() != column.canonical() => {
                    changed.push(AttributeChange::new(
                        Attribute::Column(column.name.clone()),
                        Some(AttributeValue::Column(previous.clone())),
                        Some(AttributeValue::Column(column.clone())),
                    ))
                }
                Some(_) => {}
            }
        }

        removed.into_iter().chain(changed).chain(added).collect()
    }

    fn constraint_changes(before: &TableDefinition, after: &TableDefinition) -> Vec<AttributeChange> {
        let mut removed = Vec::new();
        let mut changed = Vec::new();
        let mut added = Vec::new();

        for constraint in &before.constraints {
            if after.constraint(&constraint.name).is_none() {
                removed.push(AttributeChange::new(
                    Attribute::Constraint(constraint.name.clone()),
                    Some(AttributeValue::Constraint(constraint.clone())),
                    None,
                ));
            }
        }
        for constraint in &after.constraints {
            match before.constraint(&constraint.name) {
                None => added.push(AttributeChange::new(
                    Attribute::Constraint(constraint.name.clone()),
                    None,
                    Some(AttributeValue::Constraint(constraint.clone())),
                )),
                Some(previous) if previous.canonical() != constraint.canonical() => {
                    changed.push(AttributeChange::new(
                        Attribute::Constraint(constraint.name.clone()),
                        Some(AttributeValue::Constraint(previous.clone())),
                        Some(AttributeValue::Constraint(constraint.clone())),
                    ))
                }
                Some(_) => {}
            }
        }

        removed.into_iter().chain(changed).chain(added).collect()
    }

    fn apply_columns(columns: &mut Vec<Column>, changes: &[AttributeChange]) -> Result<()> {
        let column_changes: Vec<&AttributeChange> = changes
            .iter()
            .filter(|c| matches!(c.attribute, Attribute::Column(_)))
            .collect();

        for change in column_changes.iter().filter(|c| c.after.is_none()) {
            let Attribute::Column(name) = &change.attribute else { continue };
            let position = columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| malformed(change))?;
            columns.remove(position);
        }
        for change in column_changes.iter().filter(|c| c.before.is_some()) {
            let Some(AttributeValue::Column(column)) = &change.after else { continue };
            let slot = columns
                .iter_mut()
                .find(|c| c.name == column.name)
                .ok_or_else(|| malformed(change))?;
            *slot = column.clone();
        }
        for change in column_changes.iter().filter(|c| c.before.is_none()) {
            let Some(AttributeValue::Column(column)) = &change.after else {
                return Err(malformed(change));
            };
            if columns.iter().any(|c| c.name == column.name) {
                return Err(malformed(change));
            }
            columns.push(column.clone());
        }

        if let Some(change) = changes.iter().find(|c| c.attribute == Attribute::ColumnOrder) {
            let order = names(&change.after);
            let mut reordered = Vec::with_capacity(columns.len());
            for name in &order {
                if let Some(position) = columns.iter().position(|c| &c.name == name) {
                    reordered.push(columns.remove(position));
                }
            }
            reordered.append(columns);
            *columns = reordered;
        }
        Ok(())
    }

    fn apply_constraints(constraints: &mut Vec<TableConstraint>, changes: &[AttributeChange]) -> Result<()> {
        let constraint_changes: Vec<&AttributeChange> = changes
            .iter()
            .filter(|c| matches!(c.attribute, Attribute::Constraint(_)))
            .collect();

        for change in constraint_changes.iter().filter(|c| c.after.is_none()) {
            let Attribute::Constraint(name) = &change.attribute else { continue };
            let position = constraints
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| malformed(change))?;
            constraints.remove(position);
        }
        for change in constraint_changes.iter().filter(|c| c.before.is_some()) {
            let Some(AttributeValue::Constraint(constraint)) = &change.after else { continue };
            let slot = constraints
                .iter_mut()
                .find(|c| c.name == constraint.name)
                .ok_or_else(|| malformed(change))?;
            *slot = constraint.clone();
        }
        for change in constraint_changes.iter().filter(|c| c.before.is_none()) {
            let Some(AttributeValue::Constraint(constraint)) = &change.after else {
                return Err(malformed(change));
            };
            constraints.push(constraint.clone());
        }
        Ok(())
    }

    fn signature_tokens(table: &TableDefinition) -> Vec<String> {
        let columns = table.columns.iter().map(|c| {
            let c = c.canonical();
            format!("col:{}:{}:{}", c.name, c.data_type, c.nullable)
        });
        let constraints = table.constraints.iter().map(|c| {
            format!(
                "con:{:?}:{}:{}",
                c.kind,
                c.columns.join(","),
                c.references.as_deref().unwrap_or("")
            )
        });
        columns.chain(constraints).collect()
    }
}

impl KindStrategy for TableStrategy {
    fn diff(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> Result<Vec<AttributeChange>> {
        let (before, after) = (as_table(before)?, as_table(after)?);
        let mut changes = Self::column_changes(before, after);

        if before.ordinal_sensitive || after.ordinal_sensitive {
            let before_names = before.column_names();
            let after_names = after.column_names();

            let mut forward = before.columns.clone();
            Self::apply_columns(&mut forward, &changes)?;
            let inverse: Vec<AttributeChange> = changes.iter().map(AttributeChange::inverse).collect();
            let mut backward = after.columns.clone();
            Self::apply_columns(&mut backward, &inverse)?;

            let forward_names: Vec<String> = forward.iter().map(|c| c.name.clone()).collect();
            let backward_names: Vec<String> = backward.iter().map(|c| c.name.clone()).collect();
            if forward_names != after_names || backward_names != before_names {
                changes.push(AttributeChange::new(
                    Attribute::ColumnOrder,
                    Some(AttributeValue::Names(before_names)),
                    Some(AttributeValue::Names(after_names)),
                ));
            }
        }

        changes.extend(Self::constraint_changes(before, after));

        if before.ordinal_sensitive != after.ordinal_sensitive {
            changes.push(AttributeChange::new(
                Attribute::OrdinalSensitive,
                Some(AttributeValue::Flag(before.ordinal_sensitive)),
                Some(AttributeValue::Flag(after.ordinal_sensitive)),
            ));
        }
        Ok(changes)
    }

    fn apply(&self, definition: &ObjectDefinition, changes: &[AttributeChange]) -> Result<ObjectDefinition> {
        let mut table = as_table(definition)?.clone();
        Self::apply_columns(&mut table.columns, changes)?;
        Self::apply_constraints(&mut table.constraints, changes)?;
        if let Some(change) = changes.iter().find(|c| c.attribute == Attribute::OrdinalSensitive) {
            table.ordinal_sensitive = flag(&change.after);
        }
        Ok(ObjectDefinition::Table(table))
    }

    fn similarity(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> u16 {
        match (before, after) {
            (ObjectDefinition::Table(a), ObjectDefinition::Table(b)) => {
                jaccard_per_mille(Self::signature_tokens(a), Self::signature_tokens(b))
            }
            _ => 0,
        }
    }

    fn render_create(&self, node: &ObjectNode) -> Vec<String> {
        match &node.definition {
            ObjectDefinition::Table(table) => vec![sql::create_table(&node.identifier, table)],
            _ => Vec::new(),
        }
    }

    fn render_drop(&self, node: &ObjectNode) -> Vec<String> {
        vec![sql::drop_object(node.kind, &node.identifier)]
    }

    fn render_modify(&self, identifier: &str, changes: &[AttributeChange], result: Option<&ObjectNode>) -> Vec<String> {
        let mut statements = Vec::new();
        for change in changes {
            match (&change.attribute, &change.before, &change.after) {
                (Attribute::Column(name), Some(_), None) => {
                    statements.push(sql::alter_table(identifier, &format!("DROP COLUMN {}", name)))
                }
                (Attribute::Column(_), None, Some(AttributeValue::Column(column))) => statements.push(
                    sql::alter_table(identifier, &format!("ADD COLUMN {}", sql::column(column))),
                ),
                (Attribute::Column(_), Some(_), Some(AttributeValue::Column(column))) => statements.push(
                    sql::alter_table(identifier, &format!("ALTER COLUMN {}", sql::column(column))),
                ),
                (Attribute::Constraint(name), Some(_), None) => {
                    statements.push(sql::drop_constraint(identifier, name))
                }
                (Attribute::Constraint(_), None, Some(AttributeValue::Constraint(constraint))) => {
                    statements.push(sql::add_constraint(identifier, constraint))
                }
                (Attribute::Constraint(name), Some(_), Some(AttributeValue::Constraint(constraint))) => {
                    statements.push(sql::drop_constraint(identifier, name));
                    statements.push(sql::add_constraint(identifier, constraint));
                }
                (Attribute::ColumnOrder, _, _) => {
                    // no portable ALTER for column position; rebuild the table
                    if let Some(node) = result {
                        statements.push(format!("-- rebuild {} to reorder columns", identifier));
                        statements.extend(self.render_drop(node));
                        statements.extend(self.render_create(node));
                    }
                }
                (Attribute::OrdinalSensitive, _, _) => {}
                _ => statements.push(format!("-- unsupported change {:?}", change.attribute)),
            }
        }
        statements
    }
}

// ---------------------------------------------------------------------------
// Views, procedures, functions, triggers
// ---------------------------------------------------------------------------

fn as_routine(definition: &ObjectDefinition) -> Result<&RoutineDefinition> {
    match definition {
        ObjectDefinition::Routine(routine) => Ok(routine),
        _ => Err(mismatch("routine")),
    }
}

impl KindStrategy for RoutineStrategy {
    fn diff(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> Result<Vec<AttributeChange>> {
        let (before, after) = (as_routine(before)?, as_routine(after)?);
        let mut changes = Vec::new();

        if normalize_text(&before.body) != normalize_text(&after.body) {
            changes.push(AttributeChange::new(
                Attribute::Body,
                Some(AttributeValue::Text(before.body.clone())),
                Some(AttributeValue::Text(after.body.clone())),
            ));
        }
        let canonical_params = |r: &RoutineDefinition| match ObjectDefinition::Routine(r.clone()).canonical() {
            ObjectDefinition::Routine(c) => c.parameters,
            _ => Vec::new(),
        };
        if canonical_params(before) != canonical_params(after) {
            changes.push(AttributeChange::new(
                Attribute::Parameters,
                Some(AttributeValue::Parameters(before.parameters.clone())),
                Some(AttributeValue::Parameters(after.parameters.clone())),
            ));
        }
        let lower = |v: &Option<String>| v.as_deref().map(|s| normalize_text(s).to_lowercase());
        if lower(&before.returns) != lower(&after.returns) {
            changes.push(AttributeChange::new(
                Attribute::Returns,
                before.returns.clone().map(AttributeValue::Text),
                after.returns.clone().map(AttributeValue::Text),
            ));
        }
        if before.target != after.target {
            changes.push(AttributeChange::new(
                Attribute::Target,
                before.target.clone().map(AttributeValue::Text),
                after.target.clone().map(AttributeValue::Text),
            ));
        }

        let mut before_refs = before.references.clone();
        let mut after_refs = after.references.clone();
        before_refs.sort();
        before_refs.dedup();
        after_refs.sort();
        after_refs.dedup();
        if before_refs != after_refs {
            changes.push(AttributeChange::new(
                Attribute::References,
                Some(AttributeValue::Names(before.references.clone())),
                Some(AttributeValue::Names(after.references.clone())),
            ));
        }
        Ok(changes)
    }

    fn apply(&self, definition: &ObjectDefinition, changes: &[AttributeChange]) -> Result<ObjectDefinition> {
        let mut routine = as_routine(definition)?.clone();
        for change in changes {
            match change.attribute {
                Attribute::Body => routine.body = text(&change.after).ok_or_else(|| malformed(change))?,
                Attribute::Parameters => {
                    routine.parameters = match &change.after {
                        Some(AttributeValue::Parameters(params)) => params.clone(),
                        None => Vec::new(),
                        _ => return Err(malformed(change)),
                    }
                }
                Attribute::Returns => routine.returns = text(&change.after),
                Attribute::Target => routine.target = text(&change.after),
                Attribute::References => routine.references = names(&change.after),
                _ => return Err(malformed(change)),
            }
        }
        Ok(ObjectDefinition::Routine(routine))
    }

    fn similarity(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> u16 {
        let signature = |r: &RoutineDefinition| {
            let mut all = tokens(&normalize_text(&r.body));
            all.extend(r.parameters.iter().map(|p| format!("param:{}:{}", p.name, p.data_type.to_lowercase())));
            all
        };
        match (before, after) {
            (ObjectDefinition::Routine(a), ObjectDefinition::Routine(b)) => {
                jaccard_per_mille(signature(a), signature(b))
            }
            _ => 0,
        }
    }

    fn render_create(&self, node: &ObjectNode) -> Vec<String> {
        match &node.definition {
            ObjectDefinition::Routine(routine) => {
                vec![sql::create_routine(node.kind, &node.identifier, routine, false)]
            }
            _ => Vec::new(),
        }
    }

    fn render_drop(&self, node: &ObjectNode) -> Vec<String> {
        vec![sql::drop_object(node.kind, &node.identifier)]
    }

    fn render_modify(&self, identifier: &str, _changes: &[AttributeChange], result: Option<&ObjectNode>) -> Vec<String> {
        match result {
            Some(ObjectNode {
                kind,
                definition: ObjectDefinition::Routine(routine),
                ..
            }) => vec![sql::create_routine(*kind, identifier, routine, true)],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

fn as_index(definition: &ObjectDefinition) -> Result<&IndexDefinition> {
    match definition {
        ObjectDefinition::Index(index) => Ok(index),
        _ => Err(mismatch("index")),
    }
}

impl KindStrategy for IndexStrategy {
    fn diff(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> Result<Vec<AttributeChange>> {
        let (before, after) = (as_index(before)?, as_index(after)?);
        let mut changes = Vec::new();
        if before.table != after.table {
            changes.push(AttributeChange::new(
                Attribute::IndexTable,
                Some(AttributeValue::Text(before.table.clone())),
                Some(AttributeValue::Text(after.table.clone())),
            ));
        }
        if before.columns != after.columns {
            changes.push(AttributeChange::new(
                Attribute::IndexColumns,
                Some(AttributeValue::Names(before.columns.clone())),
                Some(AttributeValue::Names(after.columns.clone())),
            ));
        }
        if before.unique != after.unique {
            changes.push(AttributeChange::new(
                Attribute::Unique,
                Some(AttributeValue::Flag(before.unique)),
                Some(AttributeValue::Flag(after.unique)),
            ));
        }
        changes.extend(changed_text(Attribute::Predicate, &before.predicate, &after.predicate));
        Ok(changes)
    }

    fn apply(&self, definition: &ObjectDefinition, changes: &[AttributeChange]) -> Result<ObjectDefinition> {
        let mut index = as_index(definition)?.clone();
        for change in changes {
            match change.attribute {
                Attribute::IndexTable => index.table = text(&change.after).ok_or_else(|| malformed(change))?,
                Attribute::IndexColumns => index.columns = names(&change.after),
                Attribute::Unique => index.unique = flag(&change.after),
                Attribute::Predicate => index.predicate = text(&change.after),
                _ => return Err(malformed(change)),
            }
        }
        Ok(ObjectDefinition::Index(index))
    }

    fn similarity(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> u16 {
        let signature = |i: &IndexDefinition| {
            let mut all = vec![format!("table:{}", i.table), format!("unique:{}", i.unique)];
            all.extend(i.columns.iter().enumerate().map(|(n, c)| format!("col:{}:{}", n, c)));
            if let Some(predicate) = &i.predicate {
                all.extend(tokens(predicate));
            }
            all
        };
        match (before, after) {
            (ObjectDefinition::Index(a), ObjectDefinition::Index(b)) => {
                jaccard_per_mille(signature(a), signature(b))
            }
            _ => 0,
        }
    }

    fn render_create(&self, node: &ObjectNode) -> Vec<String> {
        match &node.definition {
            ObjectDefinition::Index(index) => vec![sql::create_index(&node.identifier, index)],
            _ => Vec::new(),
        }
    }

    fn render_drop(&self, node: &ObjectNode) -> Vec<String> {
        vec![sql::drop_object(node.kind, &node.identifier)]
    }

    fn render_modify(&self, identifier: &str, _changes: &[AttributeChange], result: Option<&ObjectNode>) -> Vec<String> {
        let mut statements = vec![sql::drop_object(ObjectKind::Index, identifier)];
        if let Some(node) = result {
            statements.extend(self.render_create(node));
        }
        statements
    }
}

// ---------------------------------------------------------------------------
// Standalone constraints
// ---------------------------------------------------------------------------

fn as_constraint(definition: &ObjectDefinition) -> Result<&ConstraintDefinition> {
    match definition {
        ObjectDefinition::Constraint(constraint) => Ok(constraint),
        _ => Err(mismatch("constraint")),
    }
}

impl KindStrategy for ConstraintStrategy {
    fn diff(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> Result<Vec<AttributeChange>> {
        let (before, after) = (as_constraint(before)?, as_constraint(after)?);
        let mut changes = Vec::new();
        if before.table != after.table {
            changes.push(AttributeChange::new(
                Attribute::Target,
                Some(AttributeValue::Text(before.table.clone())),
                Some(AttributeValue::Text(after.table.clone())),
            ));
        }
        if before.constraint.canonical() != after.constraint.canonical() {
            changes.push(AttributeChange::new(
                Attribute::ConstraintBody,
                Some(AttributeValue::Constraint(before.constraint.clone())),
                Some(AttributeValue::Constraint(after.constraint.clone())),
            ));
        }
        Ok(changes)
    }

    fn apply(&self, definition: &ObjectDefinition, changes: &[AttributeChange]) -> Result<ObjectDefinition> {
        let mut constraint = as_constraint(definition)?.clone();
        for change in changes {
            match (&change.attribute, &change.after) {
                (Attribute::Target, Some(AttributeValue::Text(table))) => constraint.table = table.clone(),
                (Attribute::ConstraintBody, Some(AttributeValue::Constraint(body))) => {
                    constraint.constraint = body.clone()
                }
                _ => return Err(malformed(change)),
            }
        }
        Ok(ObjectDefinition::Constraint(constraint))
    }

    fn similarity(&self, before: &ObjectDefinition, after: &ObjectDefinition) -> u16 {
        let signature = |c: &ConstraintDefinition| {
            let mut all = vec![
                format!("table:{}", c.table),
                format!("kind:{:?}", c.constraint.kind),
                format!("ref:{}", c.constraint.references.as_deref().unwrap_or("")),
            ];
            all.extend(c.constraint.columns.iter().map(|col| format!("col:{}", col)));
            if let Some(expression) = &c.constraint.expression {
                all.extend(tokens(expression));
            }
            all
        };
        match (before, after) {
            (ObjectDefinition::Constraint(a), ObjectDefinition::Constraint(b)) => {
                jaccard_per_mille(signature(a), signature(b))
            }
            _ => 0,
        }
    }

    fn render_create(&self, node: &ObjectNode) -> Vec<String> {
        match &node.definition {
            ObjectDefinition::Constraint(c) => vec![sql::add_constraint(&c.table, &c.constraint)],
            _ => Vec::new(),
        }
    }

    fn render_drop(&self, node: &ObjectNode) -> Vec<String> {
        match &node.definition {
            ObjectDefinition::Constraint(c) => vec![sql::drop_constraint(&c.table, &c.constraint.name)],
            _ => Vec::new(),
        }
    }

    fn render_modify(&self, _identifier: &str, changes: &[AttributeChange], result: Option<&ObjectNode>) -> Vec<String> {
        let mut statements = Vec::new();
        let previous = changes.iter().find_map(|c| match (&c.attribute, &c.before) {
            (Attribute::ConstraintBody, Some(AttributeValue::Constraint(body))) => Some(body.name.clone()),
            _ => None,
        });
        let previous_table = changes.iter().find_map(|c| match (&c.attribute, &c.before) {
            (Attribute::Target, Some(AttributeValue::Text(table))) => Some(table.clone()),
            _ => None,
        });
        if let Some(node) = result {
            if let ObjectDefinition::Constraint(c) = &node.definition {
                let table = previous_table.unwrap_or_else(|| c.table.clone());
                let name = previous.unwrap_or_else(|| c.constraint.name.clone());
                statements.push(sql::drop_constraint(&table, &name));
                statements.extend(self.render_create(node));
            }
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: Vec<Column>, ordinal_sensitive: bool) -> ObjectDefinition {
        ObjectDefinition::Table(TableDefinition {
            columns,
            constraints: Vec::new(),
            ordinal_sensitive,
        })
    }

    #[test]
    fn test_table_diff_reports_added_and_changed_columns() {
        let before = table(vec![Column::new("id", "int"), Column::new("name", "varchar(50)")], false);
        let after = table(
            vec![
                Column::new("id", "int"),
                Column::new("name", "varchar(100)"),
                Column::new("email", "text"),
            ],
            false,
        );
        let strategy = strategy_for(ObjectKind::Table);
        let changes = strategy.diff(&before, &after).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].attribute, Attribute::Column("name".to_string()));
        assert_eq!(changes[1].attribute, Attribute::Column("email".to_string()));

        let applied = strategy.apply(&before, &changes).unwrap();
        assert_eq!(applied, after);
        let inverse: Vec<_> = changes.iter().rev().map(AttributeChange::inverse).collect();
        assert_eq!(strategy.apply(&after, &inverse).unwrap(), before);
    }

    #[test]
    fn test_reorder_only_reported_when_ordinal_sensitive() {
        let a = vec![Column::new("id", "int"), Column::new("name", "text")];
        let b = vec![Column::new("name", "text"), Column::new("id", "int")];
        let strategy = strategy_for(ObjectKind::Table);

        assert!(strategy.diff(&table(a.clone(), false), &table(b.clone(), false)).unwrap().is_empty());

        let changes = strategy.diff(&table(a.clone(), true), &table(b.clone(), true)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attribute, Attribute::ColumnOrder);
        assert_eq!(strategy.apply(&table(a, true), &changes).unwrap(), table(b, true));
    }

    #[test]
    fn test_dropping_middle_column_restores_position_on_rollback() {
        let before = table(
            vec![Column::new("id", "int"), Column::new("legacy", "int"), Column::new("name", "text")],
            true,
        );
        let after = table(vec![Column::new("id", "int"), Column::new("name", "text")], true);
        let strategy = strategy_for(ObjectKind::Table);
        let changes = strategy.diff(&before, &after).unwrap();
        assert!(changes.iter().any(|c| c.attribute == Attribute::ColumnOrder));

        let inverse: Vec<_> = changes.iter().rev().map(AttributeChange::inverse).collect();
        assert_eq!(strategy.apply(&after, &inverse).unwrap(), before);
    }

    #[test]
    fn test_routine_whitespace_is_not_a_change() {
        let a = ObjectNode::routine("v", ObjectKind::View, "SELECT id FROM t", &["t"]);
        let b = ObjectNode::routine("v", ObjectKind::View, "SELECT id\n   FROM t", &["t"]);
        let strategy = strategy_for(ObjectKind::View);
        assert!(strategy.diff(&a.definition, &b.definition).unwrap().is_empty());
        assert_eq!(strategy.similarity(&a.definition, &b.definition), 1000);
    }

    #[test]
    fn test_index_change_renders_drop_and_create() {
        let before = ObjectNode::index("ix_orders_customer", "dbo.orders", &["customer_id"], false);
        let after = ObjectNode::index("ix_orders_customer", "dbo.orders", &["customer_id"], true);
        let strategy = strategy_for(ObjectKind::Index);
        let changes = strategy.diff(&before.definition, &after.definition).unwrap();
        assert_eq!(changes.len(), 1);
        let sql = strategy.render_modify("ix_orders_customer", &changes, Some(&after));
        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("DROP INDEX"));
        assert!(sql[1].starts_with("CREATE UNIQUE INDEX"));
    }

    #[test]
    fn test_mismatched_variant_is_rejected() {
        let view = ObjectNode::routine("v", ObjectKind::View, "SELECT 1", &[]);
        let t = table(vec![Column::new("id", "int")], false);
        assert!(strategy_for(ObjectKind::Table).diff(&t, &view.definition).is_err());
    }
}
