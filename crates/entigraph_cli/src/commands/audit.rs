//! Audit command implementation.

use super::open_database;
use entigraph_core::IndexedAuditEntry;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Audit entry representation for output.
#[derive(Debug, Serialize)]
pub struct AuditRecordInfo {
    /// Position in the audit log.
    pub index: u64,
    /// Operation name.
    pub op: String,
    /// Wall-clock time of the operation in milliseconds.
    pub timestamp_ms: u64,
    /// Affected record key.
    pub key: String,
    /// Record snapshot.
    pub data: Value,
}

impl From<IndexedAuditEntry> for AuditRecordInfo {
    fn from(e: IndexedAuditEntry) -> Self {
        Self {
            index: e.index,
            op: e.entry.op.to_string(),
            timestamp_ms: e.entry.timestamp_ms,
            key: e.entry.key,
            data: e.entry.data,
        }
    }
}

/// Runs the audit command.
pub fn run(
    path: &Path,
    audit_path: Option<&Path>,
    from: Option<u64>,
    to: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_entries(path, audit_path, from, to)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

pub(crate) fn read_entries(
    path: &Path,
    audit_path: Option<&Path>,
    from: Option<u64>,
    to: Option<u64>,
) -> Result<Vec<AuditRecordInfo>, Box<dyn std::error::Error>> {
    let audit_path = audit_path.ok_or("Audit path required for audit")?;
    let db = open_database(path, Some(audit_path))?;
    Ok(db
        .get_audit(from, to)?
        .into_iter()
        .map(AuditRecordInfo::from)
        .collect())
}

fn print_text_output(records: &[AuditRecordInfo]) {
    if records.is_empty() {
        println!("No audit entries");
        return;
    }
    for record in records {
        println!(
            "#{:<6} {:<7} {:>15} {}",
            record.index, record.op, record.timestamp_ms, record.key
        );
    }
    println!();
    println!("{} entries", records.len());
}
