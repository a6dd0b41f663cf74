//! Entities: schemas, handles and the store that creates and loads them.

mod handle;
mod ownership;
mod schema;
mod store;

pub use handle::{Entity, ID_FIELD, TYPE_FIELD};
pub use ownership::Ownership;
pub use schema::{EntitySchema, RELATIONS_FIELD};
pub use store::EntityStore;
