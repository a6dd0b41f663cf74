//! Audit trail behavior through the database and entity layers.

mod common;

use common::create_store;
use entigraph_core::{AuditOp, Config, Database, Record};
use proptest::prelude::*;
use serde_json::json;

fn record(name: &str) -> Record {
    let mut r = Record::new();
    r.insert("name".into(), json!(name));
    r
}

fn audited() -> Database {
    Database::new(Config::new().audit_enabled(true)).unwrap()
}

#[test]
fn save_update_delete_sequence() {
    let db = audited();
    db.save("Person", "1", &record("John")).unwrap();
    db.update("Person", "1", "age", json!(30)).unwrap();
    db.delete("Person", "1").unwrap();

    let log = db.get_audit(None, None).unwrap();
    let indices: Vec<u64> = log.iter().map(|e| e.index).collect();
    assert_eq!(indices, [0, 1, 2]);

    let ops: Vec<AuditOp> = log.iter().map(|e| e.entry.op).collect();
    assert_eq!(ops, [AuditOp::Save, AuditOp::Update, AuditOp::Delete]);
    assert!(log.iter().all(|e| e.entry.key == "Person@1"));

    assert_eq!(log[1].entry.data["age"], 30);
    assert_eq!(log[1].entry.data["name"], "John");
    assert_eq!(log[2].entry.data["age"], 30);
}

#[test]
fn ranged_audit_query() {
    let db = audited();
    for id in ["1", "2", "3", "4"] {
        db.save("Person", id, &record(id)).unwrap();
    }

    let window = db.get_audit(Some(1), Some(3)).unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].entry.key, "Person@2");
    assert_eq!(db.get_audit(Some(2), None).unwrap().len(), 2);
    assert_eq!(db.audit_bounds().unwrap(), Some((0, 4)));
}

#[test]
fn failed_operations_leave_no_entry() {
    let db = audited();
    assert!(db.delete("Person", "9").unwrap_err().is_key_not_found());
    assert!(db
        .update("Person", "9", "age", json!(1))
        .unwrap_err()
        .is_key_not_found());
    assert!(db.get_audit(None, None).unwrap().is_empty());
}

#[test]
fn disabled_audit_records_nothing() {
    let db = Database::new(Config::new()).unwrap();
    db.save("Person", "1", &record("John")).unwrap();
    assert!(!db.audit_enabled());
    assert_eq!(db.audit_bounds().unwrap(), None);
    assert!(db.get_audit(None, None).unwrap().is_empty());
}

#[test]
fn relation_change_audits_both_sides() {
    let store = create_store();
    let d = store.create("Department", [("name", "IT")]).unwrap();
    let e = store.create("Employee", [("name", "Alice")]).unwrap();
    d.add_related("employees", &e).unwrap();

    let log = store.database().get_audit(Some(2), None).unwrap();
    let mut keys: Vec<&str> = log.iter().map(|e| e.entry.key.as_str()).collect();
    keys.sort_unstable();
    assert_eq!(keys, [d.key().to_string(), e.key().to_string()]);
    assert!(log.iter().all(|e| e.entry.op == AuditOp::Save));
}

#[derive(Debug, Clone)]
enum Op {
    Save(u8),
    Update(u8),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Save),
        (0u8..4).prop_map(Op::Update),
        (0u8..4).prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn audit_indices_stay_contiguous(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let db = audited();
        let mut succeeded = 0u64;

        for op in ops {
            let result = match op {
                Op::Save(id) => db.save("Item", &id.to_string(), &record("x")),
                Op::Update(id) => db.update("Item", &id.to_string(), "n", json!(id)),
                Op::Delete(id) => db.delete("Item", &id.to_string()),
            };
            if result.is_ok() {
                succeeded += 1;
            }
        }

        let log = db.get_audit(None, None).unwrap();
        prop_assert_eq!(log.len() as u64, succeeded);
        for (expected, entry) in log.iter().enumerate() {
            prop_assert_eq!(entry.index, expected as u64);
        }
        prop_assert_eq!(db.audit_bounds().unwrap(), Some((0, succeeded)));
    }
}
