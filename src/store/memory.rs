use crate::model::{BranchRecord, DefinitionBlob, Id, VersionRecord};
use crate::store::traits::{BranchStore, DefinitionStore, RecordStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Version log held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryVersionLog {
    /// Records in append order
    records: Arc<RwLock<Vec<VersionRecord>>>,
    /// Positions into `records` keyed by identifier
    by_identifier: Arc<RwLock<HashMap<Id, Vec<usize>>>>,
    /// Definition payloads keyed by fingerprint
    definitions: Arc<RwLock<HashMap<String, DefinitionBlob>>>,
    branches: Arc<RwLock<HashMap<String, BranchRecord>>>,
}

impl MemoryVersionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Every record of `batch` must follow `last` and the record before it.
pub(crate) fn check_sequences(mut last: u64, batch: &[VersionRecord]) -> Result<()> {
    for record in batch {
        if record.sequence <= last {
            anyhow::bail!("record sequence {} does not follow {}", record.sequence, last);
        }
        last = record.sequence;
    }
    Ok(())
}

#[async_trait::async_trait]
impl RecordStore for MemoryVersionLog {
    async fn append_records(&self, batch: &[VersionRecord]) -> Result<()> {
        let mut records = self.records.write().await;
        let mut by_identifier = self.by_identifier.write().await;

        check_sequences(records.last().map(|r| r.sequence).unwrap_or(0), batch)?;
        for record in batch {
            by_identifier
                .entry(record.identifier.clone())
                .or_default()
                .push(records.len());
            records.push(record.clone());
        }
        Ok(())
    }

    async fn get_record(&self, id: &Id) -> Result<Option<VersionRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| &r.id == id).cloned())
    }

    async fn records_for(&self, identifier: &str) -> Result<Vec<VersionRecord>> {
        let records = self.records.read().await;
        let by_identifier = self.by_identifier.read().await;
        Ok(by_identifier
            .get(identifier)
            .map(|positions| positions.iter().map(|&i| records[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn list_records(&self) -> Result<Vec<VersionRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn last_sequence(&self) -> Result<u64> {
        Ok(self.records.read().await.last().map(|r| r.sequence).unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl DefinitionStore for MemoryVersionLog {
    async fn put_definition(&self, hash: &str, blob: &DefinitionBlob) -> Result<()> {
        let mut definitions = self.definitions.write().await;
        definitions
            .entry(hash.to_string())
            .or_insert_with(|| blob.clone());
        Ok(())
    }

    async fn get_definition(&self, hash: &str) -> Result<Option<DefinitionBlob>> {
        Ok(self.definitions.read().await.get(hash).cloned())
    }
}

#[async_trait::async_trait]
impl BranchStore for MemoryVersionLog {
    async fn get_branch(&self, name: &str) -> Result<Option<BranchRecord>> {
        Ok(self.branches.read().await.get(name).cloned())
    }

    async fn list_branches(&self) -> Result<Vec<BranchRecord>> {
        let branches = self.branches.read().await;
        let mut list: Vec<BranchRecord> = branches.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn upsert_branch(&self, branch: BranchRecord) -> Result<()> {
        self.branches.write().await.insert(branch.name.clone(), branch);
        Ok(())
    }
}
