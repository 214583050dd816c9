//! Append-only version history for schema objects, with branches, lineage
//! across renames, merge conflict detection and line attribution.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::logic::diff::DiffEngine;
use crate::model::{
    generate_id, BlameLine, BranchRecord, ChangeKind, ConflictReport, DefinitionBlob, DependencyEdge, DiffEntry, EdgeSource,
    Id, ObjectKind, ObjectNode, RecordChange, SchemaGraph, VersionRecord, DEFAULT_BRANCH,
};
use crate::store::VersionLog;

/// Which records a branch sees: its own, plus each ancestor's up to the
/// sequence the branch forked at.
struct BranchView {
    scopes: Vec<(String, u64)>,
}

impl BranchView {
    fn sees(&self, record: &VersionRecord) -> bool {
        self.scopes
            .iter()
            .any(|(branch, limit)| record.branch == *branch && record.sequence <= *limit)
    }
}

/// Shared fields of the records written by one capture.
struct Stamp<'a> {
    author: &'a str,
    message: &'a str,
    branch: &'a str,
    timestamp: DateTime<Utc>,
    next_sequence: u64,
}

impl Stamp<'_> {
    fn record(
        &mut self,
        node: (&str, ObjectKind, Option<String>),
        version_number: u64,
        parent: Option<&VersionRecord>,
        change: RecordChange,
    ) -> VersionRecord {
        let (identifier, kind, definition_hash) = node;
        let id = generate_id();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        VersionRecord {
            lineage: parent.map(|p| p.lineage.clone()).unwrap_or_else(|| id.clone()),
            id,
            identifier: identifier.to_string(),
            version_number,
            kind,
            definition_hash,
            author: self.author.to_string(),
            message: self.message.to_string(),
            branch: self.branch.to_string(),
            parent_version_id: parent.map(|p| p.id.clone()),
            timestamp: self.timestamp,
            sequence,
            change,
        }
    }
}

pub struct VersionStore<L: VersionLog> {
    log: L,
    engine: DiffEngine,
    /// Serializes sequence allocation and branch creation.
    writer: Mutex<()>,
}

impl<L: VersionLog> VersionStore<L> {
    pub fn new(log: L) -> Self {
        Self::with_engine(log, DiffEngine::default())
    }

    /// Use `engine` for capture-time rename detection and version diffs.
    pub fn with_engine(log: L, engine: DiffEngine) -> Self {
        Self {
            log,
            engine,
            writer: Mutex::new(()),
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Record `graph` as the new state of `branch`. Objects missing from the
    /// graph are recorded as deleted; renames continue their lineage.
    /// Returns the appended records in append order.
    pub async fn capture(
        &self,
        graph: &SchemaGraph,
        author: &str,
        message: &str,
        branch: &str,
    ) -> Result<Vec<VersionRecord>> {
        let _guard = self.writer.lock().await;
        self.ensure_branch(branch).await?;

        let heads = self.heads(branch).await?;
        let mut live = Vec::new();
        for head in heads.values().filter(|r| !r.is_tombstone()) {
            if let Some(node) = self.load_node(head).await? {
                live.push(node);
            }
        }
        let before = SchemaGraph::new(live, Vec::new())?;
        let diff = self.engine.compare(&before, graph)?;

        let mut stamp = Stamp {
            author,
            message,
            branch,
            timestamp: Utc::now(),
            next_sequence: self.log.last_sequence().await? + 1,
        };
        let next_version = |identifier: &str| heads.get(identifier).map(|r| r.version_number + 1).unwrap_or(1);

        let mut records = Vec::new();
        for entry in diff.changes() {
            let head = heads.get(&entry.identifier);
            match entry.change_kind {
                ChangeKind::Added => {
                    let node = self.stored(entry.after.as_ref(), &entry.identifier)?;
                    self.put(node).await?;
                    // a re-created identifier starts a new lineage
                    records.push(stamp.record(
                        (&entry.identifier, node.kind, Some(node.fingerprint.clone())),
                        next_version(&entry.identifier),
                        None,
                        RecordChange::Tracked,
                    ));
                }
                ChangeKind::Modified => {
                    let node = self.stored(entry.after.as_ref(), &entry.identifier)?;
                    self.put(node).await?;
                    records.push(stamp.record(
                        (&entry.identifier, node.kind, Some(node.fingerprint.clone())),
                        next_version(&entry.identifier),
                        head,
                        RecordChange::Modified,
                    ));
                }
                ChangeKind::Removed => {
                    records.push(stamp.record(
                        (&entry.identifier, entry.object_kind, None),
                        next_version(&entry.identifier),
                        head,
                        RecordChange::Deleted,
                    ));
                }
                ChangeKind::Renamed => {
                    let from = entry.renamed_from.clone().unwrap_or_default();
                    let old_head = heads.get(&from);
                    let old_kind = entry.before.as_ref().map(|n| n.kind).unwrap_or(entry.object_kind);
                    let tombstone = stamp.record(
                        (&from, old_kind, None),
                        next_version(&from),
                        old_head,
                        RecordChange::RenamedTo {
                            to: entry.identifier.clone(),
                        },
                    );
                    let node = self.stored(entry.after.as_ref(), &entry.identifier)?;
                    self.put(node).await?;
                    let renamed = stamp.record(
                        (&entry.identifier, node.kind, Some(node.fingerprint.clone())),
                        next_version(&from).max(next_version(&entry.identifier)),
                        old_head,
                        RecordChange::Renamed { from },
                    );
                    records.push(tombstone);
                    records.push(renamed);
                }
                ChangeKind::Unchanged => {}
            }
        }

        self.log.append_records(&records).await?;
        info!("captured {} records on {}", records.len(), branch);
        Ok(records)
    }

    /// Every record for `identifier` on every branch, in append order.
    pub async fn history(&self, identifier: &str) -> Result<Vec<VersionRecord>> {
        Ok(self.log.records_for(identifier).await?)
    }

    /// Latest record for `identifier` visible on `branch`; may be a tombstone.
    pub async fn head(&self, identifier: &str, branch: &str) -> Result<Option<VersionRecord>> {
        let view = self.view(branch).await?;
        let records = self.log.records_for(identifier).await?;
        Ok(records.into_iter().filter(|r| view.sees(r)).last())
    }

    /// All records of the object lifetime currently (or last) held by
    /// `identifier` on `branch`, including its records under earlier names.
    pub async fn lineage(&self, identifier: &str, branch: &str) -> Result<Vec<VersionRecord>> {
        let Some(head) = self.head(identifier, branch).await? else {
            return Ok(Vec::new());
        };
        let view = self.view(branch).await?;
        Ok(self
            .log
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.lineage == head.lineage && view.sees(r))
            .collect())
    }

    /// Classify the change between two versions. Tombstones count as absent.
    pub async fn diff(&self, v1: &Id, v2: &Id) -> Result<DiffEntry> {
        let first = self.record(v1).await?;
        let second = self.record(v2).await?;
        let before = self.load_node(&first).await?;
        let after = self.load_node(&second).await?;

        let entry = match (before, after) {
            (Some(before), Some(after)) => self.engine.compare_nodes(&before, &after)?,
            (before, after) => DiffEntry {
                identifier: second.identifier.clone(),
                change_kind: match (&before, &after) {
                    (Some(_), None) => ChangeKind::Removed,
                    (None, Some(_)) => ChangeKind::Added,
                    _ => ChangeKind::Unchanged,
                },
                object_kind: second.kind,
                renamed_from: None,
                before,
                after,
                modified_attributes: Vec::new(),
                similarity: None,
            },
        };
        Ok(entry)
    }

    /// Divergent history of `identifier` between two branches since their
    /// most recent common version. A branch that is simply ahead of the
    /// other, or both branches arriving at the same definition, is not a
    /// conflict.
    pub async fn detect_merge_conflict(
        &self,
        branch_a: &str,
        branch_b: &str,
        identifier: &str,
    ) -> Result<Option<ConflictReport>> {
        let (Some(ours), Some(theirs)) = (
            self.head(identifier, branch_a).await?,
            self.head(identifier, branch_b).await?,
        ) else {
            return Ok(None);
        };
        if ours.id == theirs.id
            || (ours.definition_hash == theirs.definition_hash && ours.is_tombstone() == theirs.is_tombstone())
        {
            return Ok(None);
        }

        let our_chain = self.ancestor_chain(&ours).await?;
        let their_chain = self.ancestor_chain(&theirs).await?;
        let their_ids: HashSet<&Id> = their_chain.iter().map(|r| &r.id).collect();
        let ancestor = our_chain.iter().find(|r| their_ids.contains(&r.id)).cloned();

        match &ancestor {
            Some(common) if common.id == ours.id || common.id == theirs.id => return Ok(None),
            None if ours.is_tombstone() || theirs.is_tombstone() => return Ok(None),
            _ => {}
        }

        let conflict_type = ConflictReport::classify(ancestor.as_ref(), &ours, &theirs);
        let description = match &ancestor {
            Some(common) => format!(
                "{} diverged since version {}: {} has version {}, {} has version {}",
                identifier, common.version_number, branch_a, ours.version_number, branch_b, theirs.version_number
            ),
            None => format!("{} was created independently on {} and {}", identifier, branch_a, branch_b),
        };
        debug!("merge conflict: {}", description);

        let ancestor_definition = match &ancestor {
            Some(common) => self.load_node(common).await?,
            None => None,
        };
        Ok(Some(ConflictReport {
            identifier: identifier.to_string(),
            conflict_type,
            ours_definition: self.load_node(&ours).await?,
            theirs_definition: self.load_node(&theirs).await?,
            ancestor_definition,
            ancestor,
            ours,
            theirs,
            description,
        }))
    }

    /// Conflicts for every identifier either branch has seen, by identifier.
    pub async fn detect_merge_conflicts(&self, branch_a: &str, branch_b: &str) -> Result<Vec<ConflictReport>> {
        let view_a = self.view(branch_a).await?;
        let view_b = self.view(branch_b).await?;
        let identifiers: BTreeSet<Id> = self
            .log
            .list_records()
            .await?
            .into_iter()
            .filter(|r| view_a.sees(r) || view_b.sees(r))
            .map(|r| r.identifier)
            .collect();

        let mut conflicts = Vec::new();
        for identifier in identifiers {
            if let Some(report) = self.detect_merge_conflict(branch_a, branch_b, &identifier).await? {
                conflicts.push(report);
            }
        }
        Ok(conflicts)
    }

    /// Fail with the first conflict between two branches, if any.
    pub async fn ensure_mergeable(&self, branch_a: &str, branch_b: &str) -> Result<()> {
        match self.detect_merge_conflicts(branch_a, branch_b).await?.into_iter().next() {
            Some(report) => Err(EngineError::MergeConflict(Box::new(report))),
            None => Ok(()),
        }
    }

    /// Fork `name` from the current end of `from`.
    pub async fn create_branch(&self, name: &str, from: &str) -> Result<BranchRecord> {
        let _guard = self.writer.lock().await;
        if self.log.get_branch(name).await?.is_some() {
            return Err(EngineError::Store(anyhow::anyhow!("branch {} already exists", name)));
        }
        self.ensure_branch(from).await?;
        let branch = BranchRecord::fork(name, from, self.log.last_sequence().await?);
        self.log.upsert_branch(branch.clone()).await?;
        info!("created branch {} from {} at {}", name, from, branch.forked_at);
        Ok(branch)
    }

    /// Capture the definition of an old version again as the newest version
    /// of its identifier. History is never rewritten.
    pub async fn restore(&self, version_id: &Id, author: &str, branch: &str) -> Result<VersionRecord> {
        let source = self.record(version_id).await?;
        let node = self.load_node(&source).await?.ok_or_else(|| EngineError::NotFound {
            what: format!("definition of version {}", version_id),
        })?;

        let _guard = self.writer.lock().await;
        self.ensure_branch(branch).await?;
        let head = self.head(&source.identifier, branch).await?;
        let parent = head.as_ref().filter(|h| !h.is_tombstone());
        let message = format!("restore {} version {}", source.identifier, source.version_number);
        let mut stamp = Stamp {
            author,
            message: &message,
            branch,
            timestamp: Utc::now(),
            next_sequence: self.log.last_sequence().await? + 1,
        };
        let record = stamp.record(
            (&source.identifier, node.kind, Some(node.fingerprint.clone())),
            head.as_ref().map(|h| h.version_number + 1).unwrap_or(1),
            parent,
            RecordChange::Restored {
                from_version: version_id.clone(),
            },
        );
        self.log.append_record(record.clone()).await?;
        info!("restored {} from {}", source.identifier, version_id);
        Ok(record)
    }

    /// Attribute each line of the current definition to the version of the
    /// object's lineage that introduced it.
    pub async fn blame(&self, identifier: &str, branch: &str) -> Result<Vec<BlameLine>> {
        let not_found = || EngineError::NotFound {
            what: format!("{} on branch {}", identifier, branch),
        };
        let head = self.head(identifier, branch).await?.ok_or_else(not_found)?;
        if head.is_tombstone() {
            return Err(not_found());
        }

        let mut attributed: Vec<(String, VersionRecord)> = Vec::new();
        for record in self.lineage(identifier, branch).await? {
            let Some(node) = self.load_node(&record).await? else {
                continue;
            };
            let lines = node.definition.lines();
            let previous: Vec<String> = attributed.iter().map(|(text, _)| text.clone()).collect();
            let matches = matching_lines(&previous, &lines);
            attributed = lines
                .into_iter()
                .zip(matches)
                .map(|(text, matched)| {
                    let origin = matched.map(|i| attributed[i].1.clone()).unwrap_or_else(|| record.clone());
                    (text, origin)
                })
                .collect();
        }

        Ok(attributed
            .into_iter()
            .enumerate()
            .map(|(i, (text, origin))| BlameLine {
                line_number: i + 1,
                text,
                version_id: origin.id,
                version_number: origin.version_number,
                author: origin.author,
                timestamp: origin.timestamp,
            })
            .collect())
    }

    /// The live objects of `branch`, with edges derived from their
    /// definitions. References to objects outside the snapshot are dropped.
    pub async fn snapshot(&self, branch: &str) -> Result<SchemaGraph> {
        let mut nodes = Vec::new();
        for head in self.heads(branch).await?.values() {
            if let Some(node) = self.load_node(head).await? {
                nodes.push(node);
            }
        }

        let known: HashSet<&Id> = nodes.iter().map(|n| &n.identifier).collect();
        let mut edges = Vec::new();
        for node in &nodes {
            for (target, source, label) in node.definition.referenced_objects(node.kind) {
                if !known.contains(&target) || (target == node.identifier && source != EdgeSource::ForeignKey) {
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
        SchemaGraph::new(nodes, edges)
    }

    async fn record(&self, id: &Id) -> Result<VersionRecord> {
        self.log.get_record(id).await?.ok_or_else(|| EngineError::NotFound {
            what: format!("version {}", id),
        })
    }

    async fn load_node(&self, record: &VersionRecord) -> Result<Option<ObjectNode>> {
        let Some(hash) = record.definition_hash.as_deref() else {
            return Ok(None);
        };
        let blob = self.log.get_definition(hash).await?.ok_or_else(|| EngineError::NotFound {
            what: format!("definition {}", hash),
        })?;
        Ok(Some(blob.into_node(&record.identifier)))
    }

    async fn put(&self, node: &ObjectNode) -> Result<()> {
        self.log
            .put_definition(&node.fingerprint, &DefinitionBlob::from_node(node))
            .await?;
        Ok(())
    }

    fn stored<'a>(&self, node: Option<&'a ObjectNode>, identifier: &str) -> Result<&'a ObjectNode> {
        node.ok_or_else(|| EngineError::invalid_graph("diff entry without its definition", vec![identifier.to_string()]))
    }

    /// Follow `parent_version_id` links back to the start of the lineage.
    async fn ancestor_chain(&self, record: &VersionRecord) -> Result<Vec<VersionRecord>> {
        let mut chain = vec![record.clone()];
        let mut seen = HashSet::from([record.id.clone()]);
        let mut current = record.parent_version_id.clone();
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                break;
            }
            match self.log.get_record(&parent_id).await? {
                Some(parent) => {
                    current = parent.parent_version_id.clone();
                    chain.push(parent);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    /// Latest visible record per identifier.
    async fn heads(&self, branch: &str) -> Result<BTreeMap<Id, VersionRecord>> {
        let view = self.view(branch).await?;
        let mut heads = BTreeMap::new();
        for record in self.log.list_records().await? {
            if view.sees(&record) {
                heads.insert(record.identifier.clone(), record);
            }
        }
        Ok(heads)
    }

    async fn branch_record(&self, name: &str) -> Result<BranchRecord> {
        match self.log.get_branch(name).await? {
            Some(branch) => Ok(branch),
            None if name == DEFAULT_BRANCH => Ok(BranchRecord::root(DEFAULT_BRANCH)),
            None => Err(EngineError::NotFound {
                what: format!("branch {}", name),
            }),
        }
    }

    /// The default branch is created on first use; others must be forked.
    async fn ensure_branch(&self, name: &str) -> Result<()> {
        if self.log.get_branch(name).await?.is_none() {
            let branch = self.branch_record(name).await?;
            self.log.upsert_branch(branch).await?;
        }
        Ok(())
    }

    async fn view(&self, branch: &str) -> Result<BranchView> {
        let mut scopes = Vec::new();
        let mut seen = HashSet::new();
        let mut limit = u64::MAX;
        let mut current = Some(branch.to_string());
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                break;
            }
            let record = self.branch_record(&name).await?;
            scopes.push((name, limit));
            limit = limit.min(record.forked_at);
            current = record.parent;
        }
        Ok(BranchView { scopes })
    }
}

/// Longest-common-subsequence match: for each line of `new`, the index of
/// the line of `old` it was carried over from.
fn matching_lines(old: &[String], new: &[String]) -> Vec<Option<usize>> {
    let (n, m) = (old.len(), new.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut matches = vec![None; m];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            matches[j] = Some(i);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ConflictType};
    use crate::store::{BranchStore, DefinitionStore, MemoryVersionLog, RecordStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory log whose record appends can be made to fail.
    #[derive(Default)]
    struct FlakyLog {
        inner: MemoryVersionLog,
        fail_appends: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RecordStore for FlakyLog {
        async fn append_records(&self, records: &[VersionRecord]) -> anyhow::Result<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.append_records(records).await
        }
        async fn get_record(&self, id: &Id) -> anyhow::Result<Option<VersionRecord>> {
            self.inner.get_record(id).await
        }
        async fn records_for(&self, identifier: &str) -> anyhow::Result<Vec<VersionRecord>> {
            self.inner.records_for(identifier).await
        }
        async fn list_records(&self) -> anyhow::Result<Vec<VersionRecord>> {
            self.inner.list_records().await
        }
        async fn last_sequence(&self) -> anyhow::Result<u64> {
            self.inner.last_sequence().await
        }
    }

    #[async_trait::async_trait]
    impl DefinitionStore for FlakyLog {
        async fn put_definition(&self, hash: &str, blob: &DefinitionBlob) -> anyhow::Result<()> {
            self.inner.put_definition(hash, blob).await
        }
        async fn get_definition(&self, hash: &str) -> anyhow::Result<Option<DefinitionBlob>> {
            self.inner.get_definition(hash).await
        }
    }

    #[async_trait::async_trait]
    impl BranchStore for FlakyLog {
        async fn get_branch(&self, name: &str) -> anyhow::Result<Option<BranchRecord>> {
            self.inner.get_branch(name).await
        }
        async fn list_branches(&self) -> anyhow::Result<Vec<BranchRecord>> {
            self.inner.list_branches().await
        }
        async fn upsert_branch(&self, branch: BranchRecord) -> anyhow::Result<()> {
            self.inner.upsert_branch(branch).await
        }
    }

    fn customers(columns: &[&str]) -> ObjectNode {
        ObjectNode::table(
            "dbo.customers",
            columns.iter().map(|c| Column::new(c, "int")).collect(),
            vec![],
        )
    }

    fn graph(nodes: Vec<ObjectNode>) -> SchemaGraph {
        SchemaGraph::new(nodes, vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_capture_tracks_modifies_and_deletes() {
        let store = VersionStore::new(MemoryVersionLog::new());

        let first = store.capture(&graph(vec![customers(&["id"])]), "ana", "init", "main").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].change, RecordChange::Tracked);
        assert_eq!(first[0].version_number, 1);

        let unchanged = store.capture(&graph(vec![customers(&["id"])]), "ana", "noop", "main").await.unwrap();
        assert!(unchanged.is_empty());

        let second = store
            .capture(&graph(vec![customers(&["id", "email"])]), "ana", "email", "main")
            .await
            .unwrap();
        assert_eq!(second[0].change, RecordChange::Modified);
        assert_eq!(second[0].version_number, 2);
        assert_eq!(second[0].lineage, first[0].lineage);
        assert_eq!(second[0].parent_version_id.as_ref(), Some(&first[0].id));

        let deleted = store.capture(&SchemaGraph::empty(), "ana", "drop", "main").await.unwrap();
        assert_eq!(deleted[0].change, RecordChange::Deleted);
        assert!(deleted[0].definition_hash.is_none());

        let recreated = store.capture(&graph(vec![customers(&["id"])]), "ana", "again", "main").await.unwrap();
        assert_eq!(recreated[0].change, RecordChange::Tracked);
        assert_ne!(recreated[0].lineage, first[0].lineage);
        assert_eq!(recreated[0].version_number, 4);

        assert_eq!(store.history("dbo.customers").await.unwrap().len(), 4);
        assert_eq!(store.lineage("dbo.customers", "main").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diff_between_versions() {
        let store = VersionStore::new(MemoryVersionLog::new());
        let v1 = store.capture(&graph(vec![customers(&["id"])]), "ana", "", "main").await.unwrap();
        let v2 = store
            .capture(&graph(vec![customers(&["id", "email"])]), "ana", "", "main")
            .await
            .unwrap();

        let entry = store.diff(&v1[0].id, &v2[0].id).await.unwrap();
        assert_eq!(entry.change_kind, ChangeKind::Modified);
        assert_eq!(entry.modified_attributes.len(), 1);
    }

    #[tokio::test]
    async fn test_fast_forward_is_not_a_conflict() {
        let store = VersionStore::new(MemoryVersionLog::new());
        store.capture(&graph(vec![customers(&["id"])]), "ana", "", "main").await.unwrap();
        store.create_branch("feature", "main").await.unwrap();
        store
            .capture(&graph(vec![customers(&["id", "email"])]), "bo", "", "feature")
            .await
            .unwrap();

        assert!(store
            .detect_merge_conflict("main", "feature", "dbo.customers")
            .await
            .unwrap()
            .is_none());
        // main does not see the feature change
        let head = store.head("dbo.customers", "main").await.unwrap().unwrap();
        assert_eq!(head.version_number, 1);
    }

    #[tokio::test]
    async fn test_delete_against_modify_conflicts() {
        let store = VersionStore::new(MemoryVersionLog::new());
        store.capture(&graph(vec![customers(&["id"])]), "ana", "", "main").await.unwrap();
        store.create_branch("feature", "main").await.unwrap();
        store.capture(&SchemaGraph::empty(), "ana", "", "main").await.unwrap();
        store
            .capture(&graph(vec![customers(&["id", "email"])]), "bo", "", "feature")
            .await
            .unwrap();

        let report = store
            .detect_merge_conflict("main", "feature", "dbo.customers")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.conflict_type, ConflictType::DeleteModify);
        assert!(report.ours_definition.is_none());
        assert!(report.theirs_definition.is_some());
        assert!(matches!(
            store.ensure_mergeable("main", "feature").await,
            Err(EngineError::MergeConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_appends_old_definition() {
        let store = VersionStore::new(MemoryVersionLog::new());
        let v1 = store.capture(&graph(vec![customers(&["id"])]), "ana", "", "main").await.unwrap();
        store
            .capture(&graph(vec![customers(&["id", "email"])]), "ana", "", "main")
            .await
            .unwrap();

        let restored = store.restore(&v1[0].id, "bo", "main").await.unwrap();
        assert_eq!(restored.version_number, 3);
        assert_eq!(restored.definition_hash, v1[0].definition_hash);
        assert_eq!(restored.change, RecordChange::Restored { from_version: v1[0].id.clone() });
        assert_eq!(store.history("dbo.customers").await.unwrap().len(), 3);

        let snapshot = store.snapshot("main").await.unwrap();
        assert_eq!(snapshot.node("dbo.customers").unwrap().kind, ObjectKind::Table);
        assert_eq!(snapshot.node("dbo.customers").unwrap().fingerprint, customers(&["id"]).fingerprint);
    }

    #[tokio::test]
    async fn test_unknown_branch_is_not_found() {
        let store = VersionStore::new(MemoryVersionLog::new());
        let result = store.capture(&SchemaGraph::empty(), "ana", "", "nope").await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_matching_lines_keeps_common_subsequence() {
        let old: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let new: Vec<String> = ["a", "x", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(matching_lines(&old, &new), vec![Some(0), None, Some(2), None]);
    }

    #[tokio::test]
    async fn test_failed_capture_leaves_history_unchanged() {
        let clients = |columns: &[&str]| {
            ObjectNode::table(
                "dbo.clients",
                columns.iter().map(|c| Column::new(c, "int")).collect(),
                vec![],
            )
        };
        let store = VersionStore::new(FlakyLog::default());
        let first = store.capture(&graph(vec![clients(&["id", "name"])]), "ana", "init", "main").await.unwrap();

        store.log().fail_appends.store(true, Ordering::SeqCst);
        let renamed = graph(vec![ObjectNode::table(
            "dbo.customers",
            vec![Column::new("id", "int"), Column::new("name", "int")],
            vec![],
        )]);
        let err = store.capture(&renamed, "bo", "rename", "main").await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)), "{}", err);

        assert_eq!(store.log().list_records().await.unwrap().len(), 1);
        assert!(store.history("dbo.customers").await.unwrap().is_empty());
        let head = store.head("dbo.clients", "main").await.unwrap().unwrap();
        assert_eq!(head.id, first[0].id);
        assert!(!head.is_tombstone());

        store.log().fail_appends.store(false, Ordering::SeqCst);
        let retried = store.capture(&renamed, "bo", "rename", "main").await.unwrap();
        assert_eq!(retried.len(), 2);
        assert_eq!(retried[1].lineage, first[0].lineage);
    }
}
