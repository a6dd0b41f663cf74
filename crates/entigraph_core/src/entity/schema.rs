//! Per-type entity schemas.

use crate::entity::ownership::Ownership;
use crate::error::{CoreError, CoreResult};
use crate::property::PropertyDescriptor;
use crate::relation::RelationDescriptor;
use std::collections::BTreeMap;

/// Record field holding relation references.
pub const RELATIONS_FIELD: &str = "relations";

/// Declares an entity type: its scalar properties, its relations, and
/// whether saves consult the ownership collaborator.
///
/// # Example
///
/// ```rust
/// use entigraph_core::{EntitySchema, PropertyDescriptor, RelationDescriptor};
///
/// let department = EntitySchema::new("Department")
///     .property("name", PropertyDescriptor::string(Some(1), Some(64)))
///     .relation(
///         "employees",
///         RelationDescriptor::one_to_many(["Employee"]).reverse("department"),
///     );
/// assert!(department.property_descriptor("name").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    parent: Option<String>,
    properties: BTreeMap<String, PropertyDescriptor>,
    relations: BTreeMap<String, RelationDescriptor>,
    timestamped: bool,
}

impl EntitySchema {
    /// Starts a schema for the type `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
            timestamped: false,
        }
    }

    /// Makes this type a subtype of `parent`.
    ///
    /// The parent's properties and relations are inherited at registration,
    /// and the parent's instance scans include this type.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declares a scalar property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, descriptor: PropertyDescriptor) -> Self {
        self.properties.insert(name.into(), descriptor);
        self
    }

    /// Declares a relation. The reverse name defaults to `name`.
    #[must_use]
    pub fn relation(mut self, name: impl Into<String>, mut descriptor: RelationDescriptor) -> Self {
        let name = name.into();
        descriptor.resolve_reverse(&name);
        self.relations.insert(name, descriptor);
        self
    }

    /// Attaches creation/update stamps and owner checks to every save.
    #[must_use]
    pub fn timestamped(mut self) -> Self {
        self.timestamped = true;
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent type name, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Whether saves stamp ownership.
    pub fn is_timestamped(&self) -> bool {
        self.timestamped
    }

    /// Looks up a property descriptor.
    pub fn property_descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// Looks up a relation descriptor.
    pub fn relation_descriptor(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    /// Iterates declared properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyDescriptor)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates declared relations in name order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDescriptor)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Folds the parent's declarations under this schema's own.
    pub(crate) fn inherit(mut self, parent: &EntitySchema) -> Self {
        for (name, desc) in &parent.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| desc.clone());
        }
        for (name, desc) in &parent.relations {
            self.relations
                .entry(name.clone())
                .or_insert_with(|| desc.clone());
        }
        self.timestamped |= parent.timestamped;
        self
    }

    /// Rejects field names that collide with record bookkeeping.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() || self.name.contains(crate::types::KEY_SEPARATOR) {
            return Err(CoreError::validation(format!(
                "invalid entity type name '{}'",
                self.name
            )));
        }
        for name in self.properties.keys().chain(self.relations.keys()) {
            let reserved = name.starts_with(crate::types::RESERVED_PREFIX)
                || name == RELATIONS_FIELD
                || (self.timestamped && Ownership::FIELDS.contains(&name.as_str()));
            if reserved {
                return Err(CoreError::validation(format!(
                    "field name '{name}' is reserved on {}",
                    self.name
                )));
            }
        }
        if let Some(name) = self.properties.keys().find(|k| self.relations.contains_key(*k)) {
            return Err(CoreError::validation(format!(
                "'{name}' is declared as both a property and a relation on {}",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RelationKind;

    #[test]
    fn inherit_keeps_own_declarations() {
        let animal = EntitySchema::new("Animal")
            .property("name", PropertyDescriptor::string(None, None))
            .property("legs", PropertyDescriptor::integer(None, None))
            .timestamped();
        let dog = EntitySchema::new("Dog")
            .extends("Animal")
            .property("legs", PropertyDescriptor::integer(Some(4), Some(4)))
            .inherit(&animal);

        assert_eq!(dog.parent(), Some("Animal"));
        assert!(dog.property_descriptor("name").is_some());
        assert!(dog.is_timestamped());
        assert_eq!(dog.properties().count(), 2);
    }

    #[test]
    fn relation_reverse_defaults() {
        let person = EntitySchema::new("Person")
            .relation("friends", RelationDescriptor::many_to_many(["Person"]));
        let friends = person.relation_descriptor("friends").unwrap();
        assert_eq!(friends.reverse_name(), "friends");
        assert_eq!(friends.kind(), RelationKind::ManyToMany);
    }

    #[test]
    fn reserved_names_rejected() {
        let bad = EntitySchema::new("T").property("_id", PropertyDescriptor::boolean());
        assert!(bad.validate().is_err());

        let bad = EntitySchema::new("T").property("relations", PropertyDescriptor::boolean());
        assert!(bad.validate().is_err());

        let bad = EntitySchema::new("T")
            .timestamped()
            .property("owner", PropertyDescriptor::string(None, None));
        assert!(bad.validate().is_err());

        let ok = EntitySchema::new("T").property("owner", PropertyDescriptor::string(None, None));
        assert!(ok.validate().is_ok());

        assert!(EntitySchema::new("a@b").validate().is_err());
    }

    #[test]
    fn property_relation_clash_rejected() {
        let bad = EntitySchema::new("T")
            .property("x", PropertyDescriptor::boolean())
            .relation("x", RelationDescriptor::one_to_one(["T"]));
        assert!(bad.validate().is_err());
    }
}
