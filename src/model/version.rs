use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::graph::{ObjectDefinition, ObjectKind, ObjectNode};
use crate::model::Id;

pub const DEFAULT_BRANCH: &str = "main";

/// How a record relates to the previous state of its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordChange {
    /// First capture of a new lineage.
    Tracked,
    Modified,
    /// Continues the lineage of `from` under a new identifier.
    Renamed { from: Id },
    /// Tombstone left on the old identifier of a rename.
    RenamedTo { to: Id },
    Deleted,
    /// Content copied from an earlier version.
    Restored { from_version: Id },
}

/// One historical definition of one object. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: Id,
    pub identifier: Id,
    pub version_number: u64,
    pub kind: ObjectKind,
    /// Fingerprint of the captured definition; `None` for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_hash: Option<String>,
    pub author: String,
    pub message: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<Id>,
    pub timestamp: DateTime<Utc>,
    /// Store-wide append position.
    pub sequence: u64,
    /// Shared by every version of one object lifetime.
    pub lineage: Id,
    pub change: RecordChange,
}

impl VersionRecord {
    /// Deleted or renamed away: the identifier no longer holds this lineage.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.change, RecordChange::Deleted | RecordChange::RenamedTo { .. })
    }
}

/// A branch of the version history. Records before `forked_at` are inherited
/// from `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub forked_at: u64,
    pub created_at: DateTime<Utc>,
}

impl BranchRecord {
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            forked_at: 0,
            created_at: Utc::now(),
        }
    }

    pub fn fork(name: &str, parent: &str, forked_at: u64) -> Self {
        Self {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            forked_at,
            created_at: Utc::now(),
        }
    }
}

/// Content-addressed definition payload, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionBlob {
    pub kind: ObjectKind,
    pub definition: ObjectDefinition,
}

impl DefinitionBlob {
    pub fn from_node(node: &ObjectNode) -> Self {
        Self {
            kind: node.kind,
            definition: node.definition.clone(),
        }
    }

    pub fn fingerprint(&self) -> String {
        ObjectNode::compute_fingerprint(self.kind, &self.definition)
    }

    pub fn into_node(self, identifier: &str) -> ObjectNode {
        ObjectNode::new(identifier, self.kind, self.definition)
    }

    /// Gzip-compressed JSON encoding.
    pub fn compress(&self) -> std::io::Result<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let serialized = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        encoder.finish()
    }

    /// Accepts both compressed and plain JSON payloads.
    pub fn decompress(data: &[u8]) -> std::io::Result<Self> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let raw = if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            decompressed
        } else {
            data.to_vec()
        };
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// One line of a definition attributed to the version that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameLine {
    pub line_number: usize,
    pub text: String,
    pub version_id: Id,
    pub version_number: u64,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}
