//! # entigraph core
//!
//! Embedded entity-relationship persistence engine.
//!
//! This crate provides:
//! - [`Database`]: keying, sequential ids, the audit trail, bulk export and
//!   the type registry, on top of any [`Storage`] backend
//! - Typed scalar properties with text coercion and validators
//! - Bidirectional relations in four kinds (one-to-one, one-to-many,
//!   many-to-one, many-to-many) kept symmetric on every write
//! - [`Entity`] handles and the [`EntityStore`] that creates, loads and scans
//!   them, with bounded relation hydration and polymorphic instance scans
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use entigraph_core::{
//!     Config, Database, EntitySchema, EntityStore, PropertyDescriptor, RelationDescriptor,
//! };
//!
//! let db = Arc::new(Database::new(Config::new().audit_enabled(true)).unwrap());
//! let store = EntityStore::new(db);
//!
//! store.register(
//!     EntitySchema::new("Department")
//!         .property("name", PropertyDescriptor::string(None, None))
//!         .relation("employees", RelationDescriptor::one_to_many(["Employee"]).reverse("department")),
//! ).unwrap();
//! store.register(
//!     EntitySchema::new("Employee")
//!         .property("name", PropertyDescriptor::string(None, None))
//!         .relation("department", RelationDescriptor::many_to_one(["Department"]).reverse("employees")),
//! ).unwrap();
//!
//! let it = store.create("Department", [("name", "IT")]).unwrap();
//! let alice = store.create("Employee", [("name", "Alice")]).unwrap();
//! it.add_related("employees", &alice).unwrap();
//!
//! assert_eq!(alice.related_one("department").unwrap(), Some(it));
//! ```
//!
//! Every property write and relation change persists immediately. The engine
//! does no locking of its own beyond keeping its types `Send + Sync`; hosts
//! serialize logical operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod clock;
mod config;
mod database;
mod entity;
mod error;
mod property;
mod relation;
mod types;
mod value;

pub use audit::{AuditEntry, AuditOp, IndexedAuditEntry, AUDIT_MAX_KEY, AUDIT_MIN_KEY};
pub use clock::Clock;
pub use config::{Config, DEFAULT_CALLER, DEFAULT_LOAD_DEPTH};
pub use database::{Database, Record, TypeDescriptor, NEXT_ID_KEY};
pub use entity::{
    Entity, EntitySchema, EntityStore, Ownership, ID_FIELD, RELATIONS_FIELD, TYPE_FIELD,
};
pub use error::{CoreError, CoreResult};
pub use property::{PropertyDescriptor, PropertyKind, Validator};
pub use relation::{RelationDescriptor, RelationKind, RelationValue};
pub use types::{is_reserved_key, EntityKey, KEY_SEPARATOR, RESERVED_PREFIX};
pub use value::Value;

pub use entigraph_storage::{FileStorage, InMemoryStorage, Storage, StorageError, StorageResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
