//! Relation descriptors.
//!
//! A relation is declared on one entity schema with its allowed target
//! types, a reverse relation name and a kind. The kind fixes the local
//! cardinality and the kind the reverse side must declare:
//!
//! | kind           | local | reverse must be |
//! |----------------|-------|-----------------|
//! | `OneToOne`     | <= 1  | `OneToOne`      |
//! | `OneToMany`    | many  | `ManyToOne`     |
//! | `ManyToOne`    | <= 1  | `OneToMany`     |
//! | `ManyToMany`   | many  | `ManyToMany`    |
//!
//! The link algorithms themselves live on [`Entity`](crate::Entity).

use crate::entity::Entity;
use std::fmt;

/// Concrete relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Each side holds at most one link.
    OneToOne,
    /// The owner holds many children; each child has one owner.
    OneToMany,
    /// The child side of a one-to-many relation.
    ManyToOne,
    /// Unbounded on both sides.
    ManyToMany,
}

impl RelationKind {
    /// Returns whether this side may hold more than one link.
    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Returns the kind the reverse relation must be declared with.
    #[must_use]
    pub const fn required_reverse(self) -> Self {
        match self {
            Self::OneToOne => Self::OneToOne,
            Self::OneToMany => Self::ManyToOne,
            Self::ManyToOne => Self::OneToMany,
            Self::ManyToMany => Self::ManyToMany,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OneToOne => "one-to-one",
            Self::OneToMany => "one-to-many",
            Self::ManyToOne => "many-to-one",
            Self::ManyToMany => "many-to-many",
        };
        f.write_str(name)
    }
}

/// Schema entry for one relation.
///
/// The reverse name defaults to the relation's own name; it is filled in
/// when the descriptor is attached to a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    kind: RelationKind,
    targets: Vec<String>,
    reverse: Option<String>,
}

impl RelationDescriptor {
    /// Creates a descriptor of the given kind.
    pub fn new<I, S>(kind: RelationKind, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            targets: targets.into_iter().map(Into::into).collect(),
            reverse: None,
        }
    }

    /// One-to-one relation to any of `targets`.
    pub fn one_to_one<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RelationKind::OneToOne, targets)
    }

    /// One-to-many relation owning entities of `targets`.
    pub fn one_to_many<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RelationKind::OneToMany, targets)
    }

    /// Many-to-one relation to an owner among `targets`.
    pub fn many_to_one<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RelationKind::ManyToOne, targets)
    }

    /// Many-to-many relation to entities of `targets`.
    pub fn many_to_many<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RelationKind::ManyToMany, targets)
    }

    /// Sets the name of the relation on the target side.
    #[must_use]
    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = Some(name.into());
        self
    }

    pub(crate) fn resolve_reverse(&mut self, own_name: &str) {
        if self.reverse.is_none() {
            self.reverse = Some(own_name.to_string());
        }
    }

    /// Returns the relation kind.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Returns the allowed target type names.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Returns the reverse relation name.
    pub fn reverse_name(&self) -> &str {
        self.reverse.as_deref().unwrap_or_default()
    }
}

/// The value assigned to a relation.
///
/// Single-valued kinds take `None` or `One`; one-to-many takes `Many`;
/// many-to-many takes any of the three.
#[derive(Debug, Clone, Default)]
pub enum RelationValue {
    /// Clears the relation.
    #[default]
    None,
    /// A single target.
    One(Entity),
    /// A list of targets.
    Many(Vec<Entity>),
}

impl RelationValue {
    pub(crate) fn shape(&self) -> &'static str {
        match self {
            Self::None => "nothing",
            Self::One(_) => "a single entity",
            Self::Many(_) => "a list of entities",
        }
    }
}

impl From<Entity> for RelationValue {
    fn from(entity: Entity) -> Self {
        Self::One(entity)
    }
}

impl From<&Entity> for RelationValue {
    fn from(entity: &Entity) -> Self {
        Self::One(entity.clone())
    }
}

impl From<Option<Entity>> for RelationValue {
    fn from(entity: Option<Entity>) -> Self {
        entity.map_or(Self::None, Self::One)
    }
}

impl From<Option<&Entity>> for RelationValue {
    fn from(entity: Option<&Entity>) -> Self {
        entity.map_or(Self::None, |e| Self::One(e.clone()))
    }
}

impl From<Vec<Entity>> for RelationValue {
    fn from(entities: Vec<Entity>) -> Self {
        Self::Many(entities)
    }
}

impl From<&[Entity]> for RelationValue {
    fn from(entities: &[Entity]) -> Self {
        Self::Many(entities.to_vec())
    }
}

impl<const N: usize> From<[&Entity; N]> for RelationValue {
    fn from(entities: [&Entity; N]) -> Self {
        Self::Many(entities.into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_reverse_pairs() {
        assert_eq!(RelationKind::OneToMany.required_reverse(), RelationKind::ManyToOne);
        assert_eq!(RelationKind::ManyToOne.required_reverse(), RelationKind::OneToMany);
        assert_eq!(RelationKind::OneToOne.required_reverse(), RelationKind::OneToOne);
        assert!(RelationKind::ManyToMany.is_many());
        assert!(!RelationKind::ManyToOne.is_many());
    }

    #[test]
    fn reverse_defaults_to_own_name() {
        let mut friends = RelationDescriptor::many_to_many(["Person"]);
        friends.resolve_reverse("friends");
        assert_eq!(friends.reverse_name(), "friends");

        let mut employees = RelationDescriptor::one_to_many(["Employee"]).reverse("department");
        employees.resolve_reverse("employees");
        assert_eq!(employees.reverse_name(), "department");
        assert_eq!(employees.targets(), ["Employee".to_string()]);
    }

    #[test]
    fn empty_value_is_none() {
        assert!(matches!(RelationValue::default(), RelationValue::None));
        assert!(matches!(RelationValue::from(Vec::new()), RelationValue::Many(v) if v.is_empty()));
    }
}
