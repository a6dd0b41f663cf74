//! # entigraph storage
//!
//! Storage contract and backends for entigraph.
//!
//! This crate provides the lowest-level storage abstraction. Storage backends
//! are **opaque string stores** - they map keys to values and never interpret
//! what they hold.
//!
//! ## Design Principles
//!
//! - Backends are simple key-value stores (insert, get, remove, enumerate)
//! - No knowledge of record formats, key layouts, or audit bookkeeping
//! - Must be `Send + Sync` so a database can be shared behind an `Arc`
//! - The engine owns all encoding
//!
//! ## Available Backends
//!
//! - [`InMemoryStorage`] - Reference implementation, for tests and ephemeral use
//! - [`FileStorage`] - Whole-map JSON file, rewritten on each mutation
//!
//! ## Example
//!
//! ```rust
//! use entigraph_storage::{InMemoryStorage, Storage};
//!
//! let storage = InMemoryStorage::new();
//! storage.insert("person@1", r#"{"name":"John"}"#).unwrap();
//! assert_eq!(storage.get("person@1").unwrap().as_deref(), Some(r#"{"name":"John"}"#));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::Storage;
pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
