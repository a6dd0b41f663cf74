//! Creation/update stamps and ownership for timestamped entity types.

use crate::database::Record;
use crate::error::{CoreError, CoreResult};
use serde_json::Value as Json;

const CREATED: &str = "timestamp_created";
const UPDATED: &str = "timestamp_updated";
const CREATOR: &str = "creator";
const UPDATER: &str = "updater";
const OWNER: &str = "owner";

/// Ownership state carried by entities of a timestamped type.
///
/// An absent `created` stamp means the entity was never saved; the first
/// save makes the acting caller creator and owner. Later saves by anyone other
/// than the owner are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    /// Creation time in milliseconds, `None` before the first save.
    pub created: Option<u64>,
    /// Last update time in milliseconds.
    pub updated: u64,
    /// Caller that created the entity.
    pub creator: Option<String>,
    /// Caller that last saved the entity.
    pub updater: Option<String>,
    /// Caller allowed to save the entity.
    pub owner: Option<String>,
}

impl Ownership {
    /// Record fields written by the collaborator.
    pub const FIELDS: [&'static str; 5] = [CREATED, UPDATED, CREATOR, UPDATER, OWNER];

    /// Returns whether the entity has been stamped by a save.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created.is_some()
    }

    /// Stamps a save by `caller` at `now_ms`.
    pub fn update_timestamps(&mut self, caller: &str, now_ms: u64) {
        if !self.is_created() {
            self.created = Some(now_ms);
            self.creator = Some(caller.to_string());
            self.owner = Some(caller.to_string());
        }
        self.updated = now_ms;
        self.updater = Some(caller.to_string());
    }

    /// Returns whether `caller` owns the entity.
    #[must_use]
    pub fn check_ownership(&self, caller: &str) -> bool {
        self.owner.as_deref() == Some(caller)
    }

    /// Fails with `PermissionDenied` if `caller` may not save an already
    /// created entity.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when the entity is owned by someone else.
    pub fn ensure_writable(&self, caller: &str) -> CoreResult<()> {
        if self.is_created() && !self.check_ownership(caller) {
            return Err(CoreError::permission_denied(format!(
                "only the owner can update this entity, current owner: {}",
                self.owner.as_deref().unwrap_or("none")
            )));
        }
        Ok(())
    }

    /// Hands the entity to a new owner.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = Some(owner.into());
    }

    pub(crate) fn write_into(&self, record: &mut Record) {
        let opt = |v: &Option<String>| v.clone().map_or(Json::Null, Json::String);
        record.insert(CREATED.into(), Json::from(self.created));
        record.insert(UPDATED.into(), Json::from(self.updated));
        record.insert(CREATOR.into(), opt(&self.creator));
        record.insert(UPDATER.into(), opt(&self.updater));
        record.insert(OWNER.into(), opt(&self.owner));
    }

    pub(crate) fn read_from(key: &str, record: &Record) -> CoreResult<Self> {
        let stamp = |field: &str| -> CoreResult<Option<u64>> {
            match record.get(field) {
                None | Some(Json::Null) => Ok(None),
                Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                    CoreError::invalid_record(key, format!("{field} must be a non-negative integer"))
                }),
            }
        };
        let caller = |field: &str| -> CoreResult<Option<String>> {
            match record.get(field) {
                None | Some(Json::Null) => Ok(None),
                Some(Json::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(CoreError::invalid_record(
                    key,
                    format!("{field} must be a string"),
                )),
            }
        };

        Ok(Self {
            created: stamp(CREATED)?,
            updated: stamp(UPDATED)?.unwrap_or_default(),
            creator: caller(CREATOR)?,
            updater: caller(UPDATER)?,
            owner: caller(OWNER)?,
        })
    }
}
