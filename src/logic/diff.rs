use std::cmp::Reverse;
use std::collections::BTreeSet;

use log::debug;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::logic::strategy::strategy_for;
use crate::model::{ChangeKind, DiffEntry, DiffSet, Id, ObjectNode, SchemaGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOptions {
    pub detect_renames: bool,
    /// Minimum similarity, per-mille, for a removed/added pair to count as a rename.
    pub rename_threshold: u16,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_renames: true,
            rename_threshold: 800,
        }
    }
}

impl DiffOptions {
    pub fn with_threshold(ratio: f64) -> Self {
        Self {
            detect_renames: true,
            rename_threshold: (ratio.clamp(0.0, 1.0) * 1000.0).round() as u16,
        }
    }
}

/// Compares two snapshots object by object.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    options: DiffOptions,
}

impl DiffEngine {
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    pub fn compare(&self, before: &SchemaGraph, after: &SchemaGraph) -> Result<DiffSet> {
        self.compare_with_cancel(before, after, &CancellationToken::new())
    }

    /// Every identifier of either snapshot ends up in exactly one entry,
    /// either as the entry's identifier or as a rename's `renamed_from`.
    pub fn compare_with_cancel(
        &self,
        before: &SchemaGraph,
        after: &SchemaGraph,
        cancel: &CancellationToken,
    ) -> Result<DiffSet> {
        let identifiers: BTreeSet<&Id> = before.identifiers().chain(after.identifiers()).collect();

        let mut entries = Vec::with_capacity(identifiers.len());
        let mut removed = Vec::new();
        let mut added = Vec::new();
        for identifier in identifiers {
            cancel.check()?;
            match (before.node(identifier), after.node(identifier)) {
                (Some(old), Some(new)) => entries.push(Self::classify(old, new)?),
                (Some(old), None) => removed.push(old),
                (None, Some(new)) => added.push(new),
                (None, None) => {}
            }
        }

        let renames = if self.options.detect_renames {
            self.match_renames(&removed, &added, cancel)?
        } else {
            Vec::new()
        };
        let renamed_old: BTreeSet<&str> = renames.iter().map(|(old, _, _)| old.identifier.as_str()).collect();
        let renamed_new: BTreeSet<&str> = renames.iter().map(|(_, new, _)| new.identifier.as_str()).collect();

        for (old, new, similarity) in &renames {
            debug!("{} renamed to {} ({}‰)", old.identifier, new.identifier, similarity);
            let mut entry = Self::classify(old, new)?;
            entry.change_kind = ChangeKind::Renamed;
            entry.identifier = new.identifier.clone();
            entry.renamed_from = Some(old.identifier.clone());
            entry.similarity = Some(*similarity);
            entries.push(entry);
        }
        for old in removed.into_iter().filter(|n| !renamed_old.contains(n.identifier.as_str())) {
            entries.push(DiffEntry {
                identifier: old.identifier.clone(),
                change_kind: ChangeKind::Removed,
                object_kind: old.kind,
                renamed_from: None,
                before: Some(old.clone()),
                after: None,
                modified_attributes: Vec::new(),
                similarity: None,
            });
        }
        for new in added.into_iter().filter(|n| !renamed_new.contains(n.identifier.as_str())) {
            entries.push(DiffEntry {
                identifier: new.identifier.clone(),
                change_kind: ChangeKind::Added,
                object_kind: new.kind,
                renamed_from: None,
                before: None,
                after: Some(new.clone()),
                modified_attributes: Vec::new(),
                similarity: None,
            });
        }

        Ok(DiffSet::new(entries))
    }

    /// Classify two versions of one object. Differing identifiers are
    /// reported as a rename.
    pub fn compare_nodes(&self, before: &ObjectNode, after: &ObjectNode) -> Result<DiffEntry> {
        let mut entry = Self::classify(before, after)?;
        if before.identifier != after.identifier {
            entry.change_kind = ChangeKind::Renamed;
            entry.renamed_from = Some(before.identifier.clone());
            entry.similarity = Some(Self::similarity(before, after));
        }
        Ok(entry)
    }

    /// Per-mille similarity; identical fingerprints always score 1000.
    pub fn similarity(before: &ObjectNode, after: &ObjectNode) -> u16 {
        if before.kind != after.kind {
            0
        } else if before.fingerprint == after.fingerprint {
            1000
        } else {
            strategy_for(before.kind).similarity(&before.definition, &after.definition)
        }
    }

    fn classify(before: &ObjectNode, after: &ObjectNode) -> Result<DiffEntry> {
        let (change_kind, modified_attributes) = if before.fingerprint == after.fingerprint && before.kind == after.kind {
            (ChangeKind::Unchanged, Vec::new())
        } else if before.kind != after.kind {
            // a kind change is a replacement and has no attribute-level diff
            (ChangeKind::Modified, Vec::new())
        } else {
            (
                ChangeKind::Modified,
                strategy_for(before.kind).diff(&before.definition, &after.definition)?,
            )
        };
        Ok(DiffEntry {
            identifier: after.identifier.clone(),
            change_kind,
            object_kind: after.kind,
            renamed_from: None,
            before: Some(before.clone()),
            after: Some(after.clone()),
            modified_attributes,
            similarity: None,
        })
    }

    /// Greedy one-to-one matching, highest similarity first, ties broken by
    /// the old and then the new identifier.
    fn match_renames<'a>(
        &self,
        removed: &[&'a ObjectNode],
        added: &[&'a ObjectNode],
        cancel: &CancellationToken,
    ) -> Result<Vec<(&'a ObjectNode, &'a ObjectNode, u16)>> {
        let mut candidates = Vec::new();
        for old in removed {
            cancel.check()?;
            for new in added.iter().filter(|n| n.kind == old.kind) {
                let similarity = Self::similarity(old, new);
                if similarity >= self.options.rename_threshold {
                    candidates.push((Reverse(similarity), *old, *new));
                }
            }
        }
        candidates.sort_by(|a, b| {
            (a.0, &a.1.identifier, &a.2.identifier).cmp(&(b.0, &b.1.identifier, &b.2.identifier))
        });

        let mut used_old = BTreeSet::new();
        let mut used_new = BTreeSet::new();
        let mut matches = Vec::new();
        for (Reverse(similarity), old, new) in candidates {
            if used_old.contains(&old.identifier) || used_new.contains(&new.identifier) {
                continue;
            }
            used_old.insert(&old.identifier);
            used_new.insert(&new.identifier);
            matches.push((old, new, similarity));
        }
        Ok(matches)
    }
}
