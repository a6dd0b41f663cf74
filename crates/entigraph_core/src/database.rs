//! Database engine.
//!
//! Sits directly on [`Storage`] and owns everything the storage layer does
//! not know about: key construction, record encoding, sequential id
//! allocation, the audit trail, bulk export, and the type registry used for
//! polymorphic scans.

use crate::audit::{AuditEntry, AuditOp, IndexedAuditEntry, AUDIT_MAX_KEY, AUDIT_MIN_KEY};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::{is_reserved_key, EntityKey};
use entigraph_storage::{InMemoryStorage, Storage, StorageError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A decoded entity record: a JSON object.
pub type Record = serde_json::Map<String, Json>;

/// Reserved primary-store key holding the next sequential id.
pub const NEXT_ID_KEY: &str = "_next_id";

/// Registry entry describing an entity type and its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type name, as it appears in storage keys.
    pub name: String,
    /// Parent type name, if the type extends another.
    pub parent: Option<String>,
}

impl TypeDescriptor {
    /// Creates a root type descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    /// Sets the parent type.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// The database engine handle.
///
/// `Database` is an explicitly constructed context object: hosts create one
/// and hand it (usually behind an `Arc`) to whatever needs persistence.
/// Several isolated databases can coexist in one process.
///
/// # Example
///
/// ```rust
/// use entigraph_core::{Config, Database};
/// use serde_json::json;
///
/// let db = Database::new(Config::new().audit_enabled(true)).unwrap();
/// let record = json!({"name": "John", "age": 30});
/// db.save("person", "1", record.as_object().unwrap()).unwrap();
///
/// let loaded = db.load("person", "1").unwrap().unwrap();
/// assert_eq!(loaded["age"], 30);
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Primary record store.
    storage: Box<dyn Storage>,
    /// Audit store, present only when auditing is enabled.
    audit: Option<Box<dyn Storage>>,
    /// Time source for audit entries and ownership stamps.
    clock: Arc<Clock>,
    /// Serializes id allocation.
    id_lock: Mutex<()>,
    /// Serializes audit appends.
    audit_lock: Mutex<()>,
    /// Type name -> descriptor.
    types: RwLock<HashMap<String, TypeDescriptor>>,
}

impl Database {
    /// Creates a database over fresh in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeping counters cannot be initialized.
    pub fn new(config: Config) -> CoreResult<Self> {
        let audit: Option<Box<dyn Storage>> = if config.audit_enabled {
            Some(Box::new(InMemoryStorage::new()))
        } else {
            None
        };
        Self::with_storage(config, Box::new(InMemoryStorage::new()), audit)
    }

    /// Creates a database over caller-supplied stores.
    ///
    /// When auditing is enabled and no audit store is given, an in-memory
    /// one is used. An audit store passed while auditing is disabled is
    /// ignored. Existing counters in either store are kept, so reopening a
    /// persistent backend continues its id sequence and audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeping counters cannot be initialized.
    pub fn with_storage(
        config: Config,
        storage: Box<dyn Storage>,
        audit: Option<Box<dyn Storage>>,
    ) -> CoreResult<Self> {
        let db = Self::with_existing_storage(config, storage, audit);

        if let Some(audit) = &db.audit {
            for key in [AUDIT_MIN_KEY, AUDIT_MAX_KEY] {
                if !audit.contains(key)? {
                    audit.insert(key, "0")?;
                }
            }
        }
        if !db.storage.contains(NEXT_ID_KEY)? {
            db.storage.insert(NEXT_ID_KEY, "1")?;
        }
        Ok(db)
    }

    /// Wraps caller-supplied stores as they are, writing nothing.
    ///
    /// Missing bookkeeping counters read as their initial values until the
    /// first mutation writes them. Suited to inspecting a store without
    /// touching it.
    pub fn with_existing_storage(
        config: Config,
        storage: Box<dyn Storage>,
        audit: Option<Box<dyn Storage>>,
    ) -> Self {
        let audit = if config.audit_enabled {
            Some(audit.unwrap_or_else(|| Box::new(InMemoryStorage::new())))
        } else {
            None
        };

        debug!(audit_enabled = config.audit_enabled, "database opened");

        Self {
            config,
            storage,
            audit,
            clock: Arc::new(Clock::new()),
            id_lock: Mutex::new(()),
            audit_lock: Mutex::new(()),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the time source.
    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Returns whether the audit trail is being recorded.
    pub fn audit_enabled(&self) -> bool {
        self.audit.is_some()
    }

    /// Builds the storage key for a record.
    #[must_use]
    pub fn key(type_name: &str, id: &str) -> String {
        EntityKey::new(type_name, id).to_string()
    }

    // ------------------------------------------------------------------
    // Ids
    // ------------------------------------------------------------------

    /// Returns the next sequential id and advances the counter.
    ///
    /// Ids are strictly increasing and never reused, even after deletes or
    /// [`Database::clear`].
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read or written.
    pub fn next_id(&self) -> CoreResult<u64> {
        let _guard = self.id_lock.lock();
        let current = self.read_counter(self.storage.as_ref(), NEXT_ID_KEY, 1)?;
        self.storage
            .insert(NEXT_ID_KEY, &(current + 1).to_string())?;
        Ok(current)
    }

    /// Returns the next sequential id not already occupied by `type_name`.
    ///
    /// Records saved under explicit ids can sit ahead of the counter; those
    /// ids are skipped rather than overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter or the store cannot be accessed.
    pub fn allocate_id(&self, type_name: &str) -> CoreResult<String> {
        loop {
            let id = self.next_id()?.to_string();
            if !self.exists(type_name, &id)? {
                return Ok(id);
            }
            debug!(type_name, id = %id, "skipping occupied id");
        }
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Writes `data` under `type@id`, creating or overwriting the record.
    ///
    /// Appends a `save` audit entry when auditing is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the storage write fails.
    pub fn save(&self, type_name: &str, id: &str, data: &Record) -> CoreResult<()> {
        let key = Self::key(type_name, id);
        self.storage.insert(&key, &serde_json::to_string(data)?)?;
        debug!(key = %key, "saved record");
        self.append_audit(AuditOp::Save, &key, Json::Object(data.clone()))
    }

    /// Loads the record stored under `type@id`.
    ///
    /// Returns `Ok(None)` if there is no such record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored value is not a
    /// JSON object.
    pub fn load(&self, type_name: &str, id: &str) -> CoreResult<Option<Record>> {
        let key = Self::key(type_name, id);
        match self.storage.get(&key)? {
            Some(raw) => Ok(Some(Self::decode_record(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a record is stored under `type@id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn exists(&self, type_name: &str, id: &str) -> CoreResult<bool> {
        Ok(self.storage.contains(&Self::key(type_name, id))?)
    }

    /// Removes the record under `type@id`.
    ///
    /// Appends a `delete` audit entry carrying the pre-deletion record.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` (through [`CoreError::Storage`]) if there is no
    /// such record.
    pub fn delete(&self, type_name: &str, id: &str) -> CoreResult<()> {
        let key = Self::key(type_name, id);
        let previous = self.storage.get(&key)?;
        self.storage.remove(&key)?;
        debug!(key = %key, "deleted record");

        let data = match previous {
            Some(raw) => serde_json::from_str(&raw).unwrap_or(Json::String(raw)),
            None => Json::Null,
        };
        self.append_audit(AuditOp::Delete, &key, data)
    }

    /// Rewrites one field of a stored record.
    ///
    /// Loads the record, replaces `field`, writes it back, and appends a
    /// single `update` audit entry carrying the full post-update record.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` (through [`CoreError::Storage`]) if there is no
    /// such record.
    pub fn update(&self, type_name: &str, id: &str, field: &str, value: Json) -> CoreResult<()> {
        let key = Self::key(type_name, id);
        let mut data = self
            .load(type_name, id)?
            .ok_or_else(|| StorageError::key_not_found(key.clone()))?;
        data.insert(field.to_string(), value);

        self.storage.insert(&key, &serde_json::to_string(&data)?)?;
        debug!(key = %key, field, "updated record");
        self.append_audit(AuditOp::Update, &key, Json::Object(data))
    }

    /// Returns every entity record keyed by `type@id`.
    ///
    /// Reserved keys are skipped, as are values that do not decode to a
    /// JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_all(&self) -> CoreResult<BTreeMap<String, Record>> {
        let mut all = BTreeMap::new();
        for (key, raw) in self.storage.items()? {
            if is_reserved_key(&key) {
                continue;
            }
            match Self::decode_record(&key, &raw) {
                Ok(record) => {
                    all.insert(key, record);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping malformed record"),
            }
        }
        Ok(all)
    }

    /// Returns the keys of every stored entity, skipping reserved and
    /// malformed keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn entity_keys(&self) -> CoreResult<Vec<EntityKey>> {
        let mut keys: Vec<EntityKey> = self
            .storage
            .keys()?
            .iter()
            .filter_map(|k| EntityKey::parse(k))
            .collect();
        keys.sort();
        Ok(keys)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Exports all records grouped by type, then id.
    ///
    /// Reserved keys and entries that cannot be parsed are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn dump_json(&self, pretty: bool) -> CoreResult<String> {
        let mut grouped: BTreeMap<String, BTreeMap<String, Json>> = BTreeMap::new();
        for (key, raw) in self.storage.items()? {
            let Some(entity_key) = EntityKey::parse(&key) else {
                continue;
            };
            match serde_json::from_str::<Json>(&raw) {
                Ok(value) => {
                    grouped
                        .entry(entity_key.type_name)
                        .or_default()
                        .insert(entity_key.id, value);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable record"),
            }
        }
        Self::render(&grouped, pretty)
    }

    /// Exports the primary store verbatim, values left unparsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn raw_dump_json(&self, pretty: bool) -> CoreResult<String> {
        let raw: BTreeMap<String, String> = self.storage.items()?.into_iter().collect();
        Self::render(&raw, pretty)
    }

    fn render<T: serde::Serialize>(value: &T, pretty: bool) -> CoreResult<String> {
        Ok(if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        })
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    fn append_audit(&self, op: AuditOp, key: &str, data: Json) -> CoreResult<()> {
        let Some(audit) = &self.audit else {
            return Ok(());
        };
        let _guard = self.audit_lock.lock();
        let index = self.read_counter(audit.as_ref(), AUDIT_MAX_KEY, 0)?;
        let entry = AuditEntry::new(op, self.clock.now_ms(), key, data);
        audit.insert(&index.to_string(), &entry.encode()?)?;
        audit.insert(AUDIT_MAX_KEY, &(index + 1).to_string())?;
        debug!(index, op = %op, key, "audit entry appended");
        Ok(())
    }

    /// Returns the audit log bounds `(first_index, next_index)`, or `None`
    /// when auditing is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the counters cannot be read.
    pub fn audit_bounds(&self) -> CoreResult<Option<(u64, u64)>> {
        let Some(audit) = &self.audit else {
            return Ok(None);
        };
        let min = self.read_counter(audit.as_ref(), AUDIT_MIN_KEY, 0)?;
        let max = self.read_counter(audit.as_ref(), AUDIT_MAX_KEY, 0)?;
        Ok(Some((min, max)))
    }

    /// Returns audit entries with index in `[from, to)`.
    ///
    /// Missing bounds default to the log's `[_min_id, _max_id)`. Returns an
    /// empty list when auditing is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an entry is malformed.
    pub fn get_audit(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> CoreResult<Vec<IndexedAuditEntry>> {
        let (Some(audit), Some((min, max))) = (&self.audit, self.audit_bounds()?) else {
            return Ok(Vec::new());
        };
        let from = from.unwrap_or(min);
        let to = to.unwrap_or(max);

        let mut entries = Vec::new();
        for index in from..to {
            let key = index.to_string();
            if let Some(raw) = audit.get(&key)? {
                let entry = AuditEntry::decode(&raw)
                    .map_err(|e| CoreError::invalid_record(key.clone(), e.to_string()))?;
                entries.push(IndexedAuditEntry { index, entry });
            }
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Type registry
    // ------------------------------------------------------------------

    /// Registers (or re-registers) an entity type.
    pub fn register_type(&self, descriptor: TypeDescriptor) {
        let mut types = self.types.write();
        if types.get(&descriptor.name) != Some(&descriptor) {
            info!(
                type_name = %descriptor.name,
                parent = ?descriptor.parent,
                "registered entity type"
            );
            types.insert(descriptor.name.clone(), descriptor);
        }
    }

    /// Returns whether `type_name` is `ancestor` or (transitively) extends it.
    ///
    /// Unregistered types are subclasses of nothing but themselves.
    pub fn is_subclass(&self, type_name: &str, ancestor: &str) -> bool {
        if type_name == ancestor {
            return true;
        }
        let types = self.types.read();
        let mut seen = HashSet::new();
        let mut current = types.get(type_name).and_then(|t| t.parent.as_deref());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            if !seen.insert(name) {
                break;
            }
            current = types.get(name).and_then(|t| t.parent.as_deref());
        }
        false
    }

    /// Returns whether a type is registered.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.read().contains_key(type_name)
    }

    /// Returns the names of all registered types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Empties the primary and audit stores and resets the audit counters.
    ///
    /// The id counter survives so ids are never reused.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails.
    pub fn clear(&self) -> CoreResult<()> {
        let _id_guard = self.id_lock.lock();
        let next = self.read_counter(self.storage.as_ref(), NEXT_ID_KEY, 1)?;
        for key in self.storage.keys()? {
            self.storage.remove(&key)?;
        }
        self.storage.insert(NEXT_ID_KEY, &next.to_string())?;

        if let Some(audit) = &self.audit {
            let _audit_guard = self.audit_lock.lock();
            for key in audit.keys()? {
                audit.remove(&key)?;
            }
            audit.insert(AUDIT_MIN_KEY, "0")?;
            audit.insert(AUDIT_MAX_KEY, "0")?;
        }

        info!("database cleared");
        Ok(())
    }

    fn read_counter(&self, store: &dyn Storage, key: &str, default: u64) -> CoreResult<u64> {
        match store.get(key)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| CoreError::invalid_record(key, format!("bad counter value '{raw}'"))),
            None => Ok(default),
        }
    }

    fn decode_record(key: &str, raw: &str) -> CoreResult<Record> {
        match serde_json::from_str::<Json>(raw)? {
            Json::Object(map) => Ok(map),
            other => Err(CoreError::invalid_record(
                key,
                format!("expected an object, found {other}"),
            )),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("audit_enabled", &self.audit_enabled())
            .field("types", &self.registered_types())
            .finish_non_exhaustive()
    }
}
