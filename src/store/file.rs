//! Version log persisted to a directory:
//!
//! ```text
//! <root>/records.jsonl       one VersionRecord per line, append-only
//! <root>/branches.jsonl      one BranchRecord per line, the last line per name wins
//! <root>/blobs/<hash>.json.gz
//! ```
//!
//! Everything is loaded into a [`MemoryVersionLog`] on open; reads are served
//! from memory and writes go to disk first.

use crate::model::{BranchRecord, DefinitionBlob, Id, VersionRecord};
use crate::store::memory::{check_sequences, MemoryVersionLog};
use crate::store::traits::{BranchStore, DefinitionStore, RecordStore};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RECORDS_FILE: &str = "records.jsonl";
const BRANCHES_FILE: &str = "branches.jsonl";
const BLOBS_DIR: &str = "blobs";

pub struct FileVersionLog {
    root: PathBuf,
    index: MemoryVersionLog,
    write_lock: Mutex<()>,
}

impl FileVersionLog {
    /// Open the log at `root`, creating the directory layout if missing.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR))
            .await
            .with_context(|| format!("creating version log at {}", root.display()))?;

        let index = MemoryVersionLog::new();
        let records: Vec<VersionRecord> = read_lines(&root.join(RECORDS_FILE)).await?;
        let record_count = records.len();
        index.append_records(&records).await?;
        let branches: Vec<BranchRecord> = read_lines(&root.join(BRANCHES_FILE)).await?;
        for branch in branches {
            index.upsert_branch(branch).await?;
        }

        info!("opened version log at {} ({} records)", root.display(), record_count);
        Ok(Self {
            root,
            index,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(format!("{}.json.gz", hash))
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{} line {} is not valid", path.display(), n + 1))
        })
        .collect()
}

/// Append `values` as one chunk of lines. On a failed write the file is cut
/// back to its previous length.
async fn append_lines<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let mut chunk = String::new();
    for value in values {
        chunk.push_str(&serde_json::to_string(value)?);
        chunk.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let previous_len = file.metadata().await?.len();

    let written = async {
        file.write_all(chunk.as_bytes()).await?;
        file.sync_data().await
    }
    .await;
    if let Err(e) = written {
        warn!("append to {} failed, truncating to {} bytes", path.display(), previous_len);
        file.set_len(previous_len)
            .await
            .with_context(|| format!("rolling back {}", path.display()))?;
        return Err(e).with_context(|| format!("appending to {}", path.display()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl RecordStore for FileVersionLog {
    async fn append_records(&self, records: &[VersionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        check_sequences(self.index.last_sequence().await?, records)?;
        append_lines(&self.root.join(RECORDS_FILE), records).await?;
        debug!("appended {} records", records.len());
        self.index.append_records(records).await
    }

    async fn get_record(&self, id: &Id) -> Result<Option<VersionRecord>> {
        self.index.get_record(id).await
    }

    async fn records_for(&self, identifier: &str) -> Result<Vec<VersionRecord>> {
        self.index.records_for(identifier).await
    }

    async fn list_records(&self) -> Result<Vec<VersionRecord>> {
        self.index.list_records().await
    }

    async fn last_sequence(&self) -> Result<u64> {
        self.index.last_sequence().await
    }
}

#[async_trait::async_trait]
impl DefinitionStore for FileVersionLog {
    async fn put_definition(&self, hash: &str, blob: &DefinitionBlob) -> Result<()> {
        let path = self.blob_path(hash);
        if fs::try_exists(&path).await? {
            return Ok(());
        }
        let compressed = blob.compress()?;
        // Write then rename so a crash never leaves a truncated blob.
        let partial = path.with_extension("partial");
        fs::write(&partial, compressed).await?;
        fs::rename(&partial, &path).await?;
        self.index.put_definition(hash, blob).await
    }

    async fn get_definition(&self, hash: &str) -> Result<Option<DefinitionBlob>> {
        if let Some(blob) = self.index.get_definition(hash).await? {
            return Ok(Some(blob));
        }
        let path = self.blob_path(hash);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let blob = DefinitionBlob::decompress(&data)
            .with_context(|| format!("decoding blob {}", hash))?;
        self.index.put_definition(hash, &blob).await?;
        Ok(Some(blob))
    }
}

#[async_trait::async_trait]
impl BranchStore for FileVersionLog {
    async fn get_branch(&self, name: &str) -> Result<Option<BranchRecord>> {
        self.index.get_branch(name).await
    }

    async fn list_branches(&self) -> Result<Vec<BranchRecord>> {
        self.index.list_branches().await
    }

    async fn upsert_branch(&self, branch: BranchRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        append_lines(&self.root.join(BRANCHES_FILE), std::slice::from_ref(&branch)).await?;
        self.index.upsert_branch(branch).await
    }
}
