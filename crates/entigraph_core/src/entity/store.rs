//! Entity store: schema registry and entity lifecycle entry points.

use crate::database::{Database, TypeDescriptor};
use crate::entity::handle::{Entity, WeakEntity};
use crate::entity::schema::EntitySchema;
use crate::error::{CoreError, CoreResult};
use crate::types::EntityKey;
use crate::value::Value;
use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

struct StoreInner {
    db: Arc<Database>,
    schemas: RwLock<HashMap<String, Arc<EntitySchema>>>,
    caller: RwLock<String>,
    /// Tracked keys, each with a weak reference to its live handle.
    live: RwLock<BTreeMap<EntityKey, WeakEntity>>,
}

/// Entry point for working with entities.
///
/// The store owns the schema registry and the acting caller identity, and
/// creates, loads and scans entities against one [`Database`]. Cloning is
/// cheap; clones share everything.
///
/// While any handle to an entity is alive, creating, loading or resolving a
/// link to it returns that same handle. A second store over the same
/// database keeps its own handles.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use entigraph_core::{Config, Database, EntitySchema, EntityStore, PropertyDescriptor};
///
/// let db = Arc::new(Database::new(Config::default()).unwrap());
/// let store = EntityStore::new(db);
/// store
///     .register(EntitySchema::new("Person").property("age", PropertyDescriptor::integer(None, None)))
///     .unwrap();
///
/// let john = store.create("Person", [("age", "30")]).unwrap();
/// assert_eq!(john.get_i64("age").unwrap(), Some(30));
///
/// let loaded = store.load("Person", john.id()).unwrap().unwrap();
/// assert_eq!(loaded, john);
/// ```
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    /// Creates a store over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        let caller = db.config().default_caller.clone();
        Self {
            inner: Arc::new(StoreInner {
                db,
                schemas: RwLock::new(HashMap::new()),
                caller: RwLock::new(caller),
                live: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// The underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    // ------------------------------------------------------------------
    // Schemas
    // ------------------------------------------------------------------

    /// Registers an entity type.
    ///
    /// A subtype inherits its parent's declarations; the parent must be
    /// registered first. Re-registering a name replaces the schema.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` for an unregistered parent, or
    /// `ValidationFailure` for reserved or clashing field names.
    pub fn register(&self, schema: EntitySchema) -> CoreResult<Arc<EntitySchema>> {
        let parent = schema.parent().map(str::to_string);
        let schema = match &parent {
            Some(parent) => {
                let parent_schema = self.schema(parent)?;
                schema.inherit(&parent_schema)
            }
            None => schema,
        };
        schema.validate()?;

        self.inner.db.register_type(TypeDescriptor {
            name: schema.name().to_string(),
            parent,
        });
        let schema = Arc::new(schema);
        self.inner
            .schemas
            .write()
            .insert(schema.name().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Looks up a registered schema.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if no schema is registered under `name`.
    pub fn schema(&self, name: &str) -> CoreResult<Arc<EntitySchema>> {
        self.inner
            .schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownType {
                name: name.to_string(),
            })
    }

    /// Returns whether a schema is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.schemas.read().contains_key(name)
    }

    // ------------------------------------------------------------------
    // Caller identity
    // ------------------------------------------------------------------

    /// Sets the caller identity used for ownership checks and stamps.
    pub fn set_caller(&self, caller: impl Into<String>) {
        *self.inner.caller.write() = caller.into();
    }

    /// Returns the acting caller identity.
    pub fn caller(&self) -> String {
        self.inner.caller.read().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Creates and saves an entity with a sequential id.
    ///
    /// Each field goes through the property write path before the single
    /// initial save.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` for an unregistered type, a property error for
    /// a rejected field, or any error raised by the save.
    pub fn create<I, K, V>(&self, type_name: &str, fields: I) -> CoreResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.create_entity(type_name, None, fields)
    }

    /// Creates and saves an entity under an explicit id.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a record is already stored under the id,
    /// plus everything [`EntityStore::create`] can return.
    pub fn create_with_id<I, K, V>(
        &self,
        type_name: &str,
        id: impl Into<String>,
        fields: I,
    ) -> CoreResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.create_entity(type_name, Some(id.into()), fields)
    }

    fn create_entity<I, K, V>(
        &self,
        type_name: &str,
        id: Option<String>,
        fields: I,
    ) -> CoreResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let schema = self.schema(type_name)?;
        let entity = Entity::new(self.clone(), schema, id);
        for (name, value) in fields {
            entity.assign(name.as_ref(), value.into())?;
        }
        entity.save()?;

        self.track(&entity);
        debug!(entity = %entity, "created entity");
        Ok(entity)
    }

    /// Loads an entity, hydrating relations to the configured depth.
    ///
    /// # Errors
    ///
    /// Same as [`EntityStore::load_with_depth`].
    pub fn load(&self, type_name: &str, id: &str) -> CoreResult<Option<Entity>> {
        self.load_with_depth(type_name, id, self.inner.db.config().load_depth)
    }

    /// Loads an entity, hydrating relations up to `depth` levels.
    ///
    /// An entity that already has a live handle in this store is returned
    /// as that handle rather than re-read.
    ///
    /// Returns `Ok(None)` when `depth` is 0 or there is no such record. The
    /// entity itself counts as the first level, so a depth of 1 hydrates
    /// nothing. Hydration walks breadth first and materializes each record
    /// at most once; links beyond the depth stay unresolved and are loaded
    /// on first access.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `type_name` is not registered, or
    /// `InvalidRecord` for a malformed record.
    pub fn load_with_depth(
        &self,
        type_name: &str,
        id: &str,
        depth: usize,
    ) -> CoreResult<Option<Entity>> {
        if depth == 0 {
            return Ok(None);
        }
        let Some((root, _)) = self.materialize(type_name, id)? else {
            return Ok(None);
        };

        let mut seen: HashMap<EntityKey, Entity> = HashMap::new();
        seen.insert(root.key(), root.clone());
        let mut frontier = vec![root.clone()];

        for _ in 1..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for entity in &frontier {
                for key in entity.unresolved_keys() {
                    if let Some(target) = seen.get(&key) {
                        entity.attach(&key, target, false);
                        continue;
                    }
                    if !self.is_registered(&key.type_name) {
                        warn!(from = %entity, to = %key, "skipping link to unregistered type");
                        continue;
                    }
                    if let Some((target, fresh)) = self.materialize(&key.type_name, &key.id)? {
                        // Only handles built here are retained, so ownership
                        // between handles stays acyclic.
                        entity.attach(&key, &target, fresh);
                        seen.insert(key, target.clone());
                        next.push(target);
                    }
                }
            }
            frontier = next;
        }

        debug!(entity = %root, depth, loaded = seen.len(), "loaded entity");
        Ok(Some(root))
    }

    /// Returns the live handle for `type@id`, or builds one from the stored
    /// record. The flag is set for a newly built handle.
    fn materialize(&self, type_name: &str, id: &str) -> CoreResult<Option<(Entity, bool)>> {
        let schema = self.schema(type_name)?;
        if let Some(entity) = self.live(&EntityKey::new(type_name, id)) {
            return Ok(Some((entity, false)));
        }
        let Some(record) = self.inner.db.load(type_name, id)? else {
            return Ok(None);
        };
        let entity = Entity::from_record(self.clone(), schema, id, record)?;
        self.track(&entity);
        Ok(Some((entity, true)))
    }

    /// Returns every stored entity of `type_name` or one of its subtypes.
    ///
    /// Each record is loaded through its own stored type. This is a linear
    /// scan over all keys, in key order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `type_name` is not registered, or any load
    /// error.
    pub fn instances(&self, type_name: &str) -> CoreResult<Vec<Entity>> {
        self.schema(type_name)?;
        let db = &self.inner.db;

        let mut entities = Vec::new();
        for key in db.entity_keys()? {
            if !db.is_subclass(&key.type_name, type_name) || !self.is_registered(&key.type_name) {
                continue;
            }
            if let Some(entity) = self.load(&key.type_name, &key.id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Returns the instances of `type_name` whose record fields equal every
    /// given criterion.
    ///
    /// A `Null` criterion also matches an absent field.
    ///
    /// # Errors
    ///
    /// Same as [`EntityStore::instances`].
    pub fn find<I, K, V>(&self, type_name: &str, criteria: I) -> CoreResult<Vec<Entity>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let criteria: Vec<(String, Json)> = criteria
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.into().to_json()))
            .collect();

        Ok(self
            .instances(type_name)?
            .into_iter()
            .filter(|entity| {
                let record = entity.to_record();
                criteria
                    .iter()
                    .all(|(field, expected)| record.get(field).unwrap_or(&Json::Null) == expected)
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Keys of the entities created or loaded through this store and not
    /// deleted since.
    pub fn tracked(&self) -> Vec<EntityKey> {
        self.inner.live.read().keys().cloned().collect()
    }

    fn live(&self, key: &EntityKey) -> Option<Entity> {
        self.inner.live.read().get(key).and_then(WeakEntity::upgrade)
    }

    fn track(&self, entity: &Entity) {
        self.inner.live.write().insert(entity.key(), entity.downgrade());
    }

    pub(crate) fn untrack(&self, key: &EntityKey) {
        self.inner.live.write().remove(key);
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("caller", &self.caller())
            .field("tracked", &self.inner.live.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::property::PropertyDescriptor;

    fn create_store() -> EntityStore {
        let db = Arc::new(Database::new(Config::new().audit_enabled(true)).unwrap());
        let store = EntityStore::new(db);
        store
            .register(
                EntitySchema::new("Person")
                    .property("name", PropertyDescriptor::string(None, None))
                    .property("age", PropertyDescriptor::integer(None, None)),
            )
            .unwrap();
        store
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let store = create_store();
        let a = store.create("Person", [("name", "A")]).unwrap();
        let b = store.create("Person", [("name", "B")]).unwrap();

        assert_eq!(a.id(), "1");
        assert_eq!(b.id(), "2");
        assert_eq!(store.tracked().len(), 2);
    }

    #[test]
    fn create_unknown_type() {
        let store = create_store();
        let err = store.create("Ghost", Vec::<(&str, Value)>::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownType { .. }));
    }

    #[test]
    fn create_rejects_bad_field_without_saving() {
        let store = create_store();
        let err = store.create("Person", [("age", "abc")]).unwrap_err();

        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert!(store.database().get_all().unwrap().is_empty());
    }

    #[test]
    fn register_requires_parent() {
        let store = create_store();
        let err = store
            .register(EntitySchema::new("Student").extends("Human"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownType { .. }));
    }

    #[test]
    fn caller_defaults_from_config() {
        let store = create_store();
        assert_eq!(store.caller(), "system");
        store.set_caller("alice");
        assert_eq!(store.caller(), "alice");
    }

    #[test]
    fn load_depth_zero_is_none() {
        let store = create_store();
        let a = store.create("Person", [("name", "A")]).unwrap();
        assert!(store.load_with_depth("Person", a.id(), 0).unwrap().is_none());
        assert!(store.load("Person", "999").unwrap().is_none());
    }

    #[test]
    fn delete_untracks() {
        let store = create_store();
        let a = store.create("Person", [("name", "A")]).unwrap();
        a.delete().unwrap();
        assert!(store.tracked().is_empty());
        assert!(store.load("Person", a.id()).unwrap().is_none());
    }
}
