//! Entity handles.
//!
//! An [`Entity`] is a cheap, clonable handle to shared in-memory state.
//! Every property write and every link or unlink persists the affected
//! entities immediately; there is no batching.
//!
//! Relation lists hold the key of each linked entity together with a weak
//! reference to a live handle. Linked handles therefore never keep each
//! other alive, and a link whose handle has been dropped is resolved again
//! on demand. Loads keep the entities they hydrate alive through a separate
//! list of owned handles.
//!
//! The owning [`EntityStore`] hands out at most one live handle per key, so
//! every reader and writer of an entity in that store shares one state.

use crate::database::{Database, Record};
use crate::entity::ownership::Ownership;
use crate::entity::schema::{EntitySchema, RELATIONS_FIELD};
use crate::entity::store::EntityStore;
use crate::error::{CoreError, CoreResult};
use crate::property::PropertyKind;
use crate::relation::{RelationDescriptor, RelationKind, RelationValue};
use crate::types::EntityKey;
use crate::value::Value;
use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, warn};

/// Record field holding the entity type.
pub const TYPE_FIELD: &str = "_type";

/// Record field holding the entity id.
pub const ID_FIELD: &str = "_id";

#[derive(Clone)]
struct Link {
    key: EntityKey,
    handle: Weak<EntityInner>,
}

#[derive(Default)]
struct EntityState {
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, Vec<Link>>,
    /// Handles materialized by the load that produced this entity.
    hydrated: Vec<Entity>,
    loaded: bool,
    ownership: Option<Ownership>,
}

struct EntityInner {
    store: EntityStore,
    schema: Arc<EntitySchema>,
    id: OnceLock<String>,
    state: RwLock<EntityState>,
}

/// Non-owning reference to an entity handle, held by the store's identity map.
#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub(crate) fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(|inner| Entity { inner })
    }
}

/// Handle to a persisted entity.
///
/// Equality and hashing use the `(type, id)` pair only.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    pub(crate) fn new(store: EntityStore, schema: Arc<EntitySchema>, id: Option<String>) -> Self {
        let cell = OnceLock::new();
        if let Some(id) = id {
            let _ = cell.set(id);
        }
        Self {
            inner: Arc::new(EntityInner {
                store,
                schema,
                id: cell,
                state: RwLock::new(EntityState::default()),
            }),
        }
    }

    /// Rebuilds an entity from a stored record. Relations come back as
    /// unresolved links.
    pub(crate) fn from_record(
        store: EntityStore,
        schema: Arc<EntitySchema>,
        id: &str,
        record: Record,
    ) -> CoreResult<Self> {
        let key = Database::key(schema.name(), id);
        let timestamped = schema.is_timestamped();

        let mut state = EntityState {
            loaded: true,
            ..EntityState::default()
        };
        if timestamped {
            state.ownership = Some(Ownership::read_from(&key, &record)?);
        }

        for (field, json) in record {
            match field.as_str() {
                TYPE_FIELD | ID_FIELD => continue,
                RELATIONS_FIELD => {
                    state.relations = decode_relations(&key, json)?;
                    continue;
                }
                f if timestamped && Ownership::FIELDS.contains(&f) => continue,
                _ => {}
            }

            let Some(value) = Value::from_json(&json) else {
                warn!(key = %key, field = %field, "skipping non-scalar field");
                continue;
            };
            let value = match schema.property_descriptor(&field) {
                Some(desc) => desc
                    .decode(&field, value)
                    .map_err(|e| CoreError::invalid_record(key.clone(), e.to_string()))?,
                None => value,
            };
            state.fields.insert(field, value);
        }

        let entity = Self::new(store, schema, Some(id.to_string()));
        *entity.inner.state.write() = state;
        Ok(entity)
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Type name.
    pub fn type_name(&self) -> &str {
        self.inner.schema.name()
    }

    /// Entity id.
    ///
    /// Empty only before the first save, which creation always performs.
    pub fn id(&self) -> &str {
        self.inner.id.get().map_or("", String::as_str)
    }

    /// `(type, id)` key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.type_name(), self.id())
    }

    /// The schema of this entity's type.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.inner.schema
    }

    /// The store this entity belongs to.
    pub fn store(&self) -> &EntityStore {
        &self.inner.store
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Arc::downgrade(&self.inner))
    }

    fn link_to(&self) -> Link {
        Link {
            key: self.key(),
            handle: Arc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Reads a property, falling back to the declared default.
    ///
    /// Undeclared fields found in a loaded record are readable too.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty` if the field is neither declared nor present.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        if let Some(value) = self.inner.state.read().fields.get(name) {
            return Ok(value.clone());
        }
        self.inner
            .schema
            .property_descriptor(name)
            .map(|desc| desc.default_value().clone())
            .ok_or_else(|| self.unknown_property(name))
    }

    /// Reads a string property.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored value is not text.
    pub fn get_str(&self, name: &str) -> CoreResult<Option<String>> {
        self.get_typed(name, PropertyKind::String, |v| v.as_str().map(str::to_string))
    }

    /// Reads an integer property.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored value is not an integer.
    pub fn get_i64(&self, name: &str) -> CoreResult<Option<i64>> {
        self.get_typed(name, PropertyKind::Integer, Value::as_i64)
    }

    /// Reads a float property.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored value is not a float.
    pub fn get_f64(&self, name: &str) -> CoreResult<Option<f64>> {
        self.get_typed(name, PropertyKind::Float, Value::as_f64)
    }

    /// Reads a boolean property.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored value is not a boolean.
    pub fn get_bool(&self, name: &str) -> CoreResult<Option<bool>> {
        self.get_typed(name, PropertyKind::Boolean, Value::as_bool)
    }

    fn get_typed<T>(
        &self,
        name: &str,
        expected: PropertyKind,
        extract: fn(&Value) -> Option<T>,
    ) -> CoreResult<Option<T>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        extract(&value).map(Some).ok_or_else(|| {
            CoreError::type_mismatch(format!(
                "{name} holds a {}, not a {expected}",
                value.kind_name()
            ))
        })
    }

    /// Writes a property and persists the entity.
    ///
    /// The in-memory value is restored if the save fails.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProperty`, `TypeMismatch` or `ValidationFailure` for a
    /// rejected value, or any error raised by the save.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let previous = self.assign(name, value.into())?;
        if let Err(e) = self.save() {
            let mut state = self.inner.state.write();
            match previous {
                Some(p) => state.fields.insert(name.to_string(), p),
                None => state.fields.remove(name),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Checks and stores a property without persisting. Returns the
    /// previous in-memory value.
    pub(crate) fn assign(&self, name: &str, value: Value) -> CoreResult<Option<Value>> {
        let desc = self
            .inner
            .schema
            .property_descriptor(name)
            .ok_or_else(|| self.unknown_property(name))?;
        let value = desc.coerce(name, value)?;
        Ok(self
            .inner
            .state
            .write()
            .fields
            .insert(name.to_string(), value))
    }

    fn unknown_property(&self, name: &str) -> CoreError {
        CoreError::UnknownProperty {
            type_name: self.type_name().to_string(),
            property: name.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Relations: reads
    // ------------------------------------------------------------------

    fn relation_descriptor(&self, name: &str) -> CoreResult<&RelationDescriptor> {
        self.inner
            .schema
            .relation_descriptor(name)
            .ok_or_else(|| self.unknown_relation(name))
    }

    fn unknown_relation(&self, name: &str) -> CoreError {
        CoreError::UnknownRelation {
            type_name: self.type_name().to_string(),
            relation: name.to_string(),
        }
    }

    fn links(&self, name: &str) -> Vec<Link> {
        self.inner
            .state
            .read()
            .relations
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn linked_keys(&self, name: &str) -> Vec<EntityKey> {
        self.links(name).into_iter().map(|l| l.key).collect()
    }

    fn has_link(&self, name: &str, key: &EntityKey) -> bool {
        self.inner
            .state
            .read()
            .relations
            .get(name)
            .is_some_and(|links| links.iter().any(|l| &l.key == key))
    }

    fn resolve(&self, link: &Link) -> CoreResult<Option<Entity>> {
        if let Some(inner) = link.handle.upgrade() {
            return Ok(Some(Entity { inner }));
        }
        let target = self.store().load(&link.key.type_name, &link.key.id)?;
        if let Some(target) = &target {
            self.attach(&link.key, target, false);
        }
        Ok(target)
    }

    /// Resolves `key` through the link under `name`, or through the store
    /// when this handle holds no such link.
    fn resolve_any(&self, name: &str, key: &EntityKey) -> CoreResult<Option<Entity>> {
        match self.resolve_key(name, key)? {
            Some(entity) => Ok(Some(entity)),
            None => self.store().load(&key.type_name, &key.id),
        }
    }

    /// Keys linked under `name` in memory, followed by any further keys the
    /// stored record holds for it.
    fn linked_or_stored_keys(&self, name: &str) -> CoreResult<Vec<EntityKey>> {
        let mut keys = self.linked_keys(name);
        let db = self.store().database();
        let Some(mut record) = db.load(self.type_name(), self.id())? else {
            return Ok(keys);
        };
        let Some(relations) = record.remove(RELATIONS_FIELD) else {
            return Ok(keys);
        };
        let stored = decode_relations(&self.key().to_string(), relations)?;
        for link in stored.get(name).into_iter().flatten() {
            if !keys.contains(&link.key) {
                keys.push(link.key.clone());
            }
        }
        Ok(keys)
    }

    fn resolve_key(&self, name: &str, key: &EntityKey) -> CoreResult<Option<Entity>> {
        let link = self.links(name).into_iter().find(|l| &l.key == key);
        match link {
            Some(link) => self.resolve(&link),
            None => Ok(None),
        }
    }

    /// Returns the entities linked under `name`, in link order.
    ///
    /// A link whose handle is no longer alive is loaded from the database
    /// and skipped if its record is gone.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRelation` if the relation is neither declared nor
    /// present on the entity, or any error raised while loading a target.
    pub fn related(&self, name: &str) -> CoreResult<Vec<Entity>> {
        let known = self.inner.schema.relation_descriptor(name).is_some()
            || self.inner.state.read().relations.contains_key(name);
        if !known {
            return Err(self.unknown_relation(name));
        }
        let mut entities = Vec::new();
        for link in self.links(name) {
            if let Some(entity) = self.resolve(&link)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Returns the first entity linked under `name`, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::related`].
    pub fn related_one(&self, name: &str) -> CoreResult<Option<Entity>> {
        Ok(self.related(name)?.into_iter().next())
    }

    /// Returns the entities of type `type_name` linked under `name`.
    ///
    /// # Errors
    ///
    /// Same as [`Entity::related`].
    pub fn related_of_type(&self, name: &str, type_name: &str) -> CoreResult<Vec<Entity>> {
        Ok(self
            .related(name)?
            .into_iter()
            .filter(|e| e.type_name() == type_name)
            .collect())
    }

    // ------------------------------------------------------------------
    // Relations: link primitives
    // ------------------------------------------------------------------

    fn push_link(&self, name: &str, link: Link) {
        let mut state = self.inner.state.write();
        let links = state.relations.entry(name.to_string()).or_default();
        if !links.iter().any(|l| l.key == link.key) {
            links.push(link);
        }
    }

    fn drop_link(&self, name: &str, key: &EntityKey) {
        let mut state = self.inner.state.write();
        if let Some(links) = state.relations.get_mut(name) {
            links.retain(|l| &l.key != key);
        }
        let still_linked = state
            .relations
            .values()
            .any(|links| links.iter().any(|l| &l.key == key));
        if !still_linked {
            state.hydrated.retain(|e| &e.key() != key);
        }
    }

    /// Links `other` under `relation` and `self` under `other`'s `reverse`,
    /// then persists both sides.
    ///
    /// This is the primitive beneath [`Entity::set_relation`]; it checks no
    /// descriptor rules.
    ///
    /// # Errors
    ///
    /// Returns `RelationConflict` if `other` is already linked under
    /// `relation`, `PermissionDenied` if either side may not be saved, or
    /// any error raised by the saves.
    pub fn link(&self, relation: &str, reverse: &str, other: &Entity) -> CoreResult<()> {
        if self.has_link(relation, &other.key()) {
            return Err(CoreError::relation_conflict(format!(
                "{self} is already linked to {other} under '{relation}'"
            )));
        }
        self.ensure_writable()?;
        other.ensure_writable()?;

        self.push_link(relation, other.link_to());
        other.push_link(reverse, self.link_to());
        debug!(from = %self, to = %other, relation, reverse, "linked");

        self.save()?;
        if other != self {
            other.save()?;
        }
        Ok(())
    }

    /// Removes the link between `self` and `other` on both sides, then
    /// persists both.
    ///
    /// # Errors
    ///
    /// Returns `RelationConflict` if `other` is not linked under `relation`,
    /// `PermissionDenied` if either side may not be saved, or any error
    /// raised by the saves.
    pub fn unlink(&self, relation: &str, reverse: &str, other: &Entity) -> CoreResult<()> {
        let other_key = other.key();
        if !self.has_link(relation, &other_key) {
            return Err(CoreError::relation_conflict(format!(
                "{self} is not linked to {other} under '{relation}'"
            )));
        }
        self.ensure_writable()?;
        other.ensure_writable()?;

        self.drop_link(relation, &other_key);
        other.drop_link(reverse, &self.key());
        debug!(from = %self, to = %other, relation, reverse, "unlinked");

        self.save()?;
        if other != self {
            other.save()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relations: descriptor-level writes
    // ------------------------------------------------------------------

    /// Replaces the targets of relation `name`.
    ///
    /// Every requested target is validated before anything changes. Links
    /// no longer requested are removed first, then new ones are added; each
    /// pair is persisted on both sides before the next one is touched.
    ///
    /// # Errors
    ///
    /// - `UnknownRelation` if the relation is not declared
    /// - `TypeMismatch` for the wrong value shape or a disallowed target type
    /// - `ValidationFailure` for a reverse-kind mismatch or a one-to-one
    ///   target already linked elsewhere
    /// - `PartialUpdate` if a pair fails after earlier pairs were applied
    pub fn set_relation(&self, name: &str, value: impl Into<RelationValue>) -> CoreResult<()> {
        let desc = self.relation_descriptor(name)?.clone();
        let targets = requested_targets(name, &desc, value.into())?;

        let mut requested: Vec<Entity> = Vec::with_capacity(targets.len());
        for target in targets {
            if !requested.contains(&target) {
                requested.push(target);
            }
        }
        for target in &requested {
            self.validate_target(name, &desc, target)?;
        }
        self.ensure_writable()?;
        for target in &requested {
            target.ensure_writable()?;
        }

        let current = self.linked_keys(name);
        let requested_keys: Vec<EntityKey> = requested.iter().map(Entity::key).collect();
        let to_remove: Vec<EntityKey> = current
            .iter()
            .filter(|k| !requested_keys.contains(k))
            .cloned()
            .collect();
        let to_add: Vec<&Entity> = requested
            .iter()
            .filter(|e| !current.contains(&e.key()))
            .collect();

        let mut completed = 0;
        self.apply_pairs(name, &desc, &to_remove, &to_add, &mut completed)
            .map_err(|source| {
                if completed == 0 {
                    source
                } else {
                    CoreError::PartialUpdate {
                        relation: name.to_string(),
                        completed,
                        source: Box::new(source),
                    }
                }
            })
    }

    fn apply_pairs(
        &self,
        name: &str,
        desc: &RelationDescriptor,
        to_remove: &[EntityKey],
        to_add: &[&Entity],
        completed: &mut usize,
    ) -> CoreResult<()> {
        let reverse = desc.reverse_name();
        for key in to_remove {
            match self.resolve_key(name, key)? {
                Some(target) => self.unlink(name, reverse, &target)?,
                None => {
                    // Dangling link to a deleted record.
                    self.drop_link(name, key);
                    self.save()?;
                }
            }
            *completed += 1;
        }
        for target in to_add {
            if desc.kind() == RelationKind::OneToMany {
                self.release_prior_owner(name, desc, target)?;
            }
            self.link(name, reverse, target)?;
            *completed += 1;
        }
        Ok(())
    }

    /// Detaches `child` from any owner other than `self` before it joins
    /// this one-to-many relation.
    fn release_prior_owner(
        &self,
        name: &str,
        desc: &RelationDescriptor,
        child: &Entity,
    ) -> CoreResult<()> {
        let reverse = desc.reverse_name();
        let own_key = self.key();
        let owner_relation = child
            .schema()
            .relation_descriptor(reverse)
            .map_or(name, |d| d.reverse_name())
            .to_string();

        for owner_key in child.linked_or_stored_keys(reverse)? {
            if owner_key == own_key {
                continue;
            }
            match child.resolve_any(reverse, &owner_key)? {
                Some(owner) if owner.has_link(&owner_relation, &child.key()) => {
                    owner.unlink(&owner_relation, reverse, child)?;
                }
                _ => {
                    child.drop_link(reverse, &owner_key);
                    child.save()?;
                }
            }
            debug!(child = %child, prior_owner = %owner_key, "released prior owner");
        }
        Ok(())
    }

    fn validate_target(
        &self,
        name: &str,
        desc: &RelationDescriptor,
        target: &Entity,
    ) -> CoreResult<()> {
        let target_type = target.type_name();
        let db = self.store().database();
        if !desc
            .targets()
            .iter()
            .any(|allowed| db.is_subclass(target_type, allowed))
        {
            return Err(CoreError::type_mismatch(format!(
                "{name} accepts entities of types {:?}, got {target_type}",
                desc.targets()
            )));
        }

        let reverse = desc.reverse_name();
        let required = desc.kind().required_reverse();
        match target.schema().relation_descriptor(reverse) {
            None => {
                return Err(CoreError::validation(format!(
                    "reverse relation '{reverse}' not found on {target_type}"
                )))
            }
            Some(r) if r.kind() != required => {
                return Err(CoreError::validation(format!(
                    "reverse relation '{reverse}' on {target_type} must be {required}, found {}",
                    r.kind()
                )))
            }
            Some(_) => {}
        }

        if desc.kind() == RelationKind::OneToOne {
            let own_key = self.key();
            if target
                .linked_or_stored_keys(reverse)?
                .iter()
                .any(|k| *k != own_key)
            {
                return Err(CoreError::validation(format!(
                    "{target} is already related to another entity"
                )));
            }
        }
        Ok(())
    }

    /// Links one more entity into a many-valued relation.
    ///
    /// For one-to-many relations the entity is first detached from its
    /// previous owner.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the relation is single-valued or the target
    /// type is not allowed, `ValidationFailure` for a reverse-kind mismatch,
    /// and `RelationConflict` if the entity is already linked.
    pub fn add_related(&self, name: &str, target: &Entity) -> CoreResult<()> {
        let desc = self.relation_descriptor(name)?.clone();
        if !desc.kind().is_many() {
            return Err(CoreError::type_mismatch(format!(
                "{name} is {} and holds a single entity",
                desc.kind()
            )));
        }
        self.validate_target(name, &desc, target)?;
        if self.has_link(name, &target.key()) {
            return Err(CoreError::relation_conflict(format!(
                "{self} is already linked to {target} under '{name}'"
            )));
        }
        if desc.kind() == RelationKind::OneToMany {
            self.release_prior_owner(name, &desc, target)?;
        }
        self.link(name, desc.reverse_name(), target)
    }

    /// Unlinks one entity from a relation.
    ///
    /// # Errors
    ///
    /// Returns `RelationConflict` if the entity is not linked.
    pub fn remove_related(&self, name: &str, target: &Entity) -> CoreResult<()> {
        let reverse = self.relation_descriptor(name)?.reverse_name().to_string();
        self.unlink(name, &reverse, target)
    }

    /// Unlinks every relation of this entity on both sides.
    ///
    /// Deleting an entity leaves references to it in place; call this first
    /// to clean them up.
    ///
    /// # Errors
    ///
    /// Returns any error raised while resolving or saving a linked entity.
    pub fn detach_all(&self) -> CoreResult<()> {
        let names: Vec<String> = self.inner.state.read().relations.keys().cloned().collect();
        for name in names {
            let reverse = self
                .inner
                .schema
                .relation_descriptor(&name)
                .map(|d| d.reverse_name().to_string());
            for key in self.linked_keys(&name) {
                let target = match &reverse {
                    Some(_) => self.resolve_key(&name, &key)?,
                    None => None,
                };
                match (target, &reverse) {
                    (Some(target), Some(reverse)) if self.has_link(&name, &key) => {
                        self.unlink(&name, reverse, &target)?;
                    }
                    _ => {
                        self.drop_link(&name, &key);
                        self.save()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Links whose target handle is no longer alive.
    pub(crate) fn unresolved_keys(&self) -> Vec<EntityKey> {
        let state = self.inner.state.read();
        let mut keys: Vec<EntityKey> = Vec::new();
        for link in state.relations.values().flatten() {
            if link.handle.strong_count() == 0 && !keys.contains(&link.key) {
                keys.push(link.key.clone());
            }
        }
        keys
    }

    /// Points every link to `key` at `target`, keeping `target` alive when
    /// `retain` is set.
    pub(crate) fn attach(&self, key: &EntityKey, target: &Entity, retain: bool) {
        let weak = Arc::downgrade(&target.inner);
        let mut state = self.inner.state.write();
        for link in state.relations.values_mut().flatten() {
            if &link.key == key {
                link.handle = weak.clone();
            }
        }
        if retain {
            state.hydrated.push(target.clone());
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn ensure_writable(&self) -> CoreResult<()> {
        if !self.inner.schema.is_timestamped() {
            return Ok(());
        }
        let caller = self.store().caller();
        match &self.inner.state.read().ownership {
            Some(ownership) => ownership.ensure_writable(&caller),
            None => Ok(()),
        }
    }

    /// Persists the entity.
    ///
    /// Allocates a sequential id on first save. For timestamped types the
    /// acting caller is checked against the owner and stamped.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an explicit id collides with a record this
    /// handle did not load, `PermissionDenied` if the caller does not own the
    /// entity, or any engine error.
    pub fn save(&self) -> CoreResult<()> {
        self.persist(true)
    }

    fn persist(&self, check_owner: bool) -> CoreResult<()> {
        let store = self.store();
        let db = store.database();
        let type_name = self.type_name();

        let id = match self.inner.id.get() {
            Some(id) => {
                if !self.inner.state.read().loaded && db.exists(type_name, id)? {
                    return Err(CoreError::AlreadyExists {
                        key: Database::key(type_name, id),
                    });
                }
                id.clone()
            }
            None => {
                let id = db.allocate_id(type_name)?;
                self.inner.id.get_or_init(|| id).clone()
            }
        };

        let ownership = if self.inner.schema.is_timestamped() {
            let caller = store.caller();
            let mut ownership = self
                .inner
                .state
                .read()
                .ownership
                .clone()
                .unwrap_or_default();
            if check_owner {
                ownership.ensure_writable(&caller)?;
            }
            ownership.update_timestamps(&caller, db.clock().now_ms());
            Some(ownership)
        } else {
            None
        };

        let record = self.build_record(ownership.as_ref());
        db.save(type_name, &id, &record)?;

        let mut state = self.inner.state.write();
        state.loaded = true;
        if ownership.is_some() {
            state.ownership = ownership;
        }
        Ok(())
    }

    /// Removes the entity's record.
    ///
    /// References held by other entities are left in place; see
    /// [`Entity::detach_all`].
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` (through [`CoreError::Storage`]) if the record
    /// is already gone.
    pub fn delete(&self) -> CoreResult<()> {
        let store = self.store();
        store.database().delete(self.type_name(), self.id())?;
        store.untrack(&self.key());
        debug!(entity = %self, "deleted entity");
        Ok(())
    }

    /// Serializes the entity into its record form.
    pub fn to_record(&self) -> Record {
        let ownership = self.inner.state.read().ownership.clone();
        self.build_record(ownership.as_ref())
    }

    fn build_record(&self, ownership: Option<&Ownership>) -> Record {
        let state = self.inner.state.read();
        let mut record = Record::new();

        if let Some(ownership) = ownership {
            ownership.write_into(&mut record);
        }
        record.insert(TYPE_FIELD.into(), Json::String(self.type_name().to_string()));
        record.insert(ID_FIELD.into(), Json::String(self.id().to_string()));

        for (name, desc) in self.inner.schema.properties() {
            let value = state.fields.get(name).unwrap_or(desc.default_value());
            record.insert(name.to_string(), value.to_json());
        }
        for (name, value) in &state.fields {
            record
                .entry(name.clone())
                .or_insert_with(|| value.to_json());
        }

        let relations: serde_json::Map<String, Json> = state
            .relations
            .iter()
            .filter(|(_, links)| !links.is_empty())
            .map(|(name, links)| {
                let refs = links
                    .iter()
                    .map(|l| reference_json(&l.key))
                    .collect();
                (name.clone(), Json::Array(refs))
            })
            .collect();
        if !relations.is_empty() {
            record.insert(RELATIONS_FIELD.into(), Json::Object(relations));
        }
        record
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Ownership stamps, for timestamped types.
    pub fn ownership(&self) -> Option<Ownership> {
        self.inner.state.read().ownership.clone()
    }

    /// Hands the entity to a new owner and persists it.
    ///
    /// Only the current owner may do this.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` if the type is not timestamped,
    /// `PermissionDenied` if the caller is not the owner, or any error
    /// raised by the save.
    pub fn set_owner(&self, owner: impl Into<String>) -> CoreResult<()> {
        if !self.inner.schema.is_timestamped() {
            return Err(CoreError::validation(format!(
                "type {} does not track ownership",
                self.type_name()
            )));
        }
        self.ensure_writable()?;

        let previous = {
            let mut state = self.inner.state.write();
            let previous = state.ownership.clone();
            state
                .ownership
                .get_or_insert_with(Ownership::default)
                .set_owner(owner);
            previous
        };
        if let Err(e) = self.persist(false) {
            self.inner.state.write().ownership = previous;
            return Err(e);
        }
        Ok(())
    }
}

fn requested_targets(
    name: &str,
    desc: &RelationDescriptor,
    value: RelationValue,
) -> CoreResult<Vec<Entity>> {
    match (desc.kind(), value) {
        (kind, RelationValue::None) if kind != RelationKind::OneToMany => Ok(Vec::new()),
        (
            RelationKind::OneToOne | RelationKind::ManyToOne | RelationKind::ManyToMany,
            RelationValue::One(entity),
        ) => Ok(vec![entity]),
        (RelationKind::OneToMany | RelationKind::ManyToMany, RelationValue::Many(entities)) => {
            Ok(entities)
        }
        (kind, other) => Err(CoreError::type_mismatch(format!(
            "{name} is {kind} and cannot be set to {}",
            other.shape()
        ))),
    }
}

fn decode_relations(key: &str, json: Json) -> CoreResult<BTreeMap<String, Vec<Link>>> {
    let Json::Object(map) = json else {
        return Err(CoreError::invalid_record(key, "relations must be an object"));
    };

    let mut relations = BTreeMap::new();
    for (name, refs) in map {
        let Json::Array(refs) = refs else {
            return Err(CoreError::invalid_record(
                key,
                format!("relation '{name}' must be a list"),
            ));
        };
        let mut links = Vec::with_capacity(refs.len());
        for reference in &refs {
            let type_name = reference.get(TYPE_FIELD).and_then(Json::as_str);
            let id = reference.get(ID_FIELD).and_then(json_id);
            let (Some(type_name), Some(id)) = (type_name, id) else {
                return Err(CoreError::invalid_record(
                    key,
                    format!("malformed reference in relation '{name}'"),
                ));
            };
            links.push(Link {
                key: EntityKey::new(type_name, id),
                handle: Weak::new(),
            });
        }
        relations.insert(name, links);
    }
    Ok(relations)
}

fn reference_json(key: &EntityKey) -> Json {
    let mut reference = serde_json::Map::new();
    reference.insert(TYPE_FIELD.into(), Json::String(key.type_name.clone()));
    reference.insert(ID_FIELD.into(), Json::String(key.id.clone()));
    Json::Object(reference)
}

fn json_id(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.type_name() == other.type_name()
                && !self.id().is_empty()
                && self.id() == other.id())
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_name().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name())
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}
