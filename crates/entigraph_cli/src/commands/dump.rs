//! Dump command implementation.

use super::open_database;
use std::path::Path;

/// Runs the dump command.
///
/// Prints the grouped JSON export, or the verbatim primary store with
/// `raw`.
pub fn run(path: &Path, raw: bool, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render(path, raw, pretty)?);
    Ok(())
}

pub(crate) fn render(
    path: &Path,
    raw: bool,
    pretty: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let db = open_database(path, None)?;
    let out = if raw {
        db.raw_dump_json(pretty)?
    } else {
        db.dump_json(pretty)?
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_core::{Config, Database, FileStorage, Record};
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn groups_records_by_type() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data.json");
        {
            let db = Database::with_storage(
                Config::new(),
                Box::new(FileStorage::open(&data).unwrap()),
                None,
            )
            .unwrap();
            let mut record = Record::new();
            record.insert("name".into(), json!("John"));
            db.save("Person", "1", &record).unwrap();
        }

        let grouped: Value = serde_json::from_str(&render(&data, false, false).unwrap()).unwrap();
        assert_eq!(grouped["Person"]["1"]["name"], "John");
        assert!(grouped.get("_next_id").is_none());

        let raw: Value = serde_json::from_str(&render(&data, true, true).unwrap()).unwrap();
        assert!(raw["Person@1"].is_string());
    }
}
