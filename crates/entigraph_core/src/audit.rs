//! Audit trail entries.
//!
//! Every mutating engine operation appends one entry to the audit store.
//! Entries live under purely numeric keys forming a contiguous log index,
//! bounded by the reserved `_min_id` / `_max_id` counters.
//!
//! On the wire an entry is the JSON array
//! `[operation, timestamp_ms, key, post_state]`.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Reserved audit-store key holding the first live log index.
pub const AUDIT_MIN_KEY: &str = "_min_id";

/// Reserved audit-store key holding the next log index to assign.
pub const AUDIT_MAX_KEY: &str = "_max_id";

/// Kind of mutation recorded by an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOp {
    /// A full record was written.
    Save,
    /// A single field was rewritten.
    Update,
    /// A record was removed.
    Delete,
}

impl fmt::Display for AuditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Save => "save",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One audit trail entry.
///
/// `data` is the full record after the mutation; for deletes it is the
/// record as it was just before removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Mutation kind.
    pub op: AuditOp,
    /// Wall-clock time of the mutation, in milliseconds.
    pub timestamp_ms: u64,
    /// Storage key of the mutated record.
    pub key: String,
    /// Record state carried by the entry.
    pub data: Json,
}

impl AuditEntry {
    /// Creates an entry.
    pub fn new(op: AuditOp, timestamp_ms: u64, key: impl Into<String>, data: Json) -> Self {
        Self {
            op,
            timestamp_ms,
            key: key.into(),
            data,
        }
    }

    /// Encodes the entry as the stored 4-tuple.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&(&self.op, self.timestamp_ms, &self.key, &self.data))
    }

    /// Decodes an entry from the stored 4-tuple.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a well-formed entry.
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        let (op, timestamp_ms, key, data): (AuditOp, u64, String, Json) =
            serde_json::from_str(raw)?;
        Ok(Self {
            op,
            timestamp_ms,
            key,
            data,
        })
    }
}

/// An audit entry together with its log index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedAuditEntry {
    /// Position in the audit log.
    pub index: u64,
    /// The entry.
    pub entry: AuditEntry,
}
