//! Inspect command implementation.

use super::{database_over, open_existing};
use entigraph_core::{is_reserved_key, Storage, NEXT_ID_KEY};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Primary store path.
    pub path: String,
    /// Primary store file size in bytes.
    pub file_size: u64,
    /// Number of entity records.
    pub entity_count: usize,
    /// Entity record counts per type name.
    pub types: BTreeMap<String, usize>,
    /// Reserved bookkeeping keys found in the primary store.
    pub reserved_keys: Vec<String>,
    /// Next sequential id, if the counter is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_id: Option<u64>,
    /// Audit log bounds `[first, next)` (if an audit store was given).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditBounds>,
}

/// Audit log index bounds.
#[derive(Debug, Serialize)]
pub struct AuditBounds {
    /// First retained index.
    pub first: u64,
    /// Index the next entry will get.
    pub next: u64,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    audit_path: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, audit_path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

pub(crate) fn inspect(
    path: &Path,
    audit_path: Option<&Path>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let storage = open_existing(path)?;
    let file_size = std::fs::metadata(path)?.len();

    let mut reserved_keys: Vec<String> = storage
        .keys()?
        .into_iter()
        .filter(|k| is_reserved_key(k))
        .collect();
    reserved_keys.sort();
    let next_id = storage
        .get(NEXT_ID_KEY)?
        .and_then(|raw| raw.trim().parse().ok());

    let db = database_over(storage, audit_path)?;
    let keys = db.entity_keys()?;
    let mut types: BTreeMap<String, usize> = BTreeMap::new();
    for key in &keys {
        *types.entry(key.type_name.clone()).or_default() += 1;
    }

    let audit = db
        .audit_bounds()?
        .map(|(first, next)| AuditBounds { first, next });

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size,
        entity_count: keys.len(),
        types,
        reserved_keys,
        next_id,
        audit,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Entigraph Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!();
    println!("Entities: {}", result.entity_count);
    for (type_name, count) in &result.types {
        println!("  {type_name:<20} {count}");
    }
    println!();
    println!("Reserved keys: {}", result.reserved_keys.join(", "));
    if let Some(next_id) = result.next_id {
        println!("Next id:       {next_id}");
    }

    if let Some(audit) = &result.audit {
        println!();
        println!("Audit:");
        println!("  Entries:     {}", audit.next - audit.first);
        println!("  Index range: [{}, {})", audit.first, audit.next);
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
