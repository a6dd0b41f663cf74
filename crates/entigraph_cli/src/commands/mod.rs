//! CLI command implementations.

pub mod audit;
pub mod dump;
pub mod inspect;

use entigraph_core::{Config, Database, FileStorage, Storage};
use std::path::Path;
use tracing::debug;

/// Opens the file-backed database at `path` without writing to it.
///
/// The audit trail is enabled only when an audit file is given. Both files
/// must already exist.
pub(crate) fn open_database(
    path: &Path,
    audit_path: Option<&Path>,
) -> Result<Database, Box<dyn std::error::Error>> {
    debug!(path = %path.display(), "opening database");
    database_over(open_existing(path)?, audit_path)
}

/// Wraps an already opened primary store in a database. Missing counters
/// are left missing.
pub(crate) fn database_over(
    storage: FileStorage,
    audit_path: Option<&Path>,
) -> Result<Database, Box<dyn std::error::Error>> {
    let audit = audit_path.map(open_existing).transpose()?;
    let config = Config::new().audit_enabled(audit.is_some());
    Ok(Database::with_existing_storage(
        config,
        Box::new(storage),
        audit.map(|a| Box::new(a) as Box<dyn Storage>),
    ))
}

/// Opens a store file, refusing to create a new one.
pub(crate) fn open_existing(path: &Path) -> Result<FileStorage, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {}", path.display()).into());
    }
    Ok(FileStorage::open(path)?)
}
