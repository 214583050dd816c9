use crate::model::{BranchRecord, DefinitionBlob, Id, VersionRecord};
use anyhow::Result;

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a batch of records with increasing sequences. Either every
    /// record lands or none does. Records are never updated or removed.
    async fn append_records(&self, records: &[VersionRecord]) -> Result<()>;
    async fn append_record(&self, record: VersionRecord) -> Result<()> {
        self.append_records(std::slice::from_ref(&record)).await
    }
    /// Get a record by its version id
    async fn get_record(&self, id: &Id) -> Result<Option<VersionRecord>>;
    /// All records for an identifier, on every branch, in append order
    async fn records_for(&self, identifier: &str) -> Result<Vec<VersionRecord>>;
    /// All records in append order
    async fn list_records(&self) -> Result<Vec<VersionRecord>>;
    /// Sequence of the last appended record, 0 when empty
    async fn last_sequence(&self) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Store a definition under its fingerprint; storing it twice is a no-op
    async fn put_definition(&self, hash: &str, blob: &DefinitionBlob) -> Result<()>;
    async fn get_definition(&self, hash: &str) -> Result<Option<DefinitionBlob>>;
}

#[async_trait::async_trait]
pub trait BranchStore: Send + Sync {
    async fn get_branch(&self, name: &str) -> Result<Option<BranchRecord>>;
    async fn list_branches(&self) -> Result<Vec<BranchRecord>>;
    async fn upsert_branch(&self, branch: BranchRecord) -> Result<()>;
}

/// Everything the version store needs from persistence.
pub trait VersionLog: RecordStore + DefinitionStore + BranchStore + Send + Sync {}
impl<T: RecordStore + DefinitionStore + BranchStore + Send + Sync> VersionLog for T {}
