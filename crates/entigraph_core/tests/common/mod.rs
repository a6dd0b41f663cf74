//! Shared fixtures for entigraph core integration tests.

#![allow(dead_code)]

use entigraph_core::{
    Clock, Config, Database, EntitySchema, EntityStore, PropertyDescriptor, RelationDescriptor,
};
use std::sync::Arc;

/// Creates a store over a fresh audited in-memory database with the test
/// schemas registered.
pub fn create_store() -> EntityStore {
    let db = Database::new(Config::new().audit_enabled(true)).expect("Failed to open database");
    store_over(Arc::new(db))
}

/// Same as [`create_store`] with a clock pinned at `ms`.
pub fn create_store_with_clock(ms: u64) -> (EntityStore, Arc<Clock>) {
    let clock = Arc::new(Clock::fixed(ms));
    let db = Database::new(Config::new().audit_enabled(true))
        .expect("Failed to open database")
        .with_clock(Arc::clone(&clock));
    (store_over(Arc::new(db)), clock)
}

/// Creates a store over `db` and registers the test schemas.
pub fn store_over(db: Arc<Database>) -> EntityStore {
    let store = EntityStore::new(db);
    register_schemas(&store);
    store
}

fn register_schemas(store: &EntityStore) {
    let schemas = [
        EntitySchema::new("Department")
            .property("name", PropertyDescriptor::string(None, None))
            .relation(
                "employees",
                RelationDescriptor::one_to_many(["Employee"]).reverse("department"),
            ),
        EntitySchema::new("Employee")
            .property("name", PropertyDescriptor::string(None, None))
            .relation(
                "department",
                RelationDescriptor::many_to_one(["Department"]).reverse("employees"),
            ),
        EntitySchema::new("Student")
            .property("name", PropertyDescriptor::string(None, None))
            .relation(
                "courses",
                RelationDescriptor::many_to_many(["Course"]).reverse("students"),
            ),
        EntitySchema::new("Course")
            .property("title", PropertyDescriptor::string(None, None))
            .relation(
                "students",
                RelationDescriptor::many_to_many(["Student"]).reverse("courses"),
            ),
        EntitySchema::new("Person")
            .property("name", PropertyDescriptor::string(Some(1), Some(50)))
            .property("age", PropertyDescriptor::integer(Some(0), Some(150)))
            .property("active", PropertyDescriptor::boolean().default(true))
            .relation(
                "profile",
                RelationDescriptor::one_to_one(["Profile"]).reverse("person"),
            )
            .relation("friends", RelationDescriptor::many_to_many(["Person"])),
        EntitySchema::new("Profile")
            .property("bio", PropertyDescriptor::string(None, None))
            .relation(
                "person",
                RelationDescriptor::one_to_one(["Person"]).reverse("profile"),
            ),
        EntitySchema::new("Badge").relation(
            "holder",
            RelationDescriptor::many_to_one(["Person"]).reverse("badges"),
        ),
        EntitySchema::new("Document")
            .property("title", PropertyDescriptor::string(None, None))
            .timestamped(),
        EntitySchema::new("Team")
            .property("name", PropertyDescriptor::string(None, None))
            .relation(
                "members",
                RelationDescriptor::one_to_many(["Member"]).reverse("team"),
            )
            .timestamped(),
        EntitySchema::new("Member")
            .property("name", PropertyDescriptor::string(None, None))
            .relation(
                "team",
                RelationDescriptor::many_to_one(["Team"]).reverse("members"),
            ),
        EntitySchema::new("Animal").property("name", PropertyDescriptor::string(None, None)),
        EntitySchema::new("Dog")
            .extends("Animal")
            .property("breed", PropertyDescriptor::string(None, None)),
        EntitySchema::new("Puppy").extends("Dog"),
        EntitySchema::new("Cat").extends("Animal"),
    ];
    for schema in schemas {
        store.register(schema).expect("Failed to register schema");
    }
}
