//! Typed scalar property descriptors.
//!
//! A descriptor is declared once per field on an entity schema. Every write
//! goes through [`PropertyDescriptor::coerce`], which applies the kind check,
//! text coercion and the optional validator before the entity persists
//! itself.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Validator predicate applied to a (possibly coerced) non-null value.
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Declared scalar kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
}

impl PropertyKind {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::Text(_))
                | (Self::Integer, Value::Integer(_))
                | (Self::Float, Value::Float(_))
                | (Self::Boolean, Value::Bool(_))
        )
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Schema entry for one scalar property.
#[derive(Clone)]
pub struct PropertyDescriptor {
    kind: PropertyKind,
    default: Value,
    validator: Option<Validator>,
}

impl PropertyDescriptor {
    /// Creates a descriptor of the given kind with no default or validator.
    #[must_use]
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            default: Value::Null,
            validator: None,
        }
    }

    /// String property with optional length bounds, counted in characters.
    #[must_use]
    pub fn string(min_len: Option<usize>, max_len: Option<usize>) -> Self {
        let desc = Self::new(PropertyKind::String);
        if min_len.is_none() && max_len.is_none() {
            return desc;
        }
        desc.validator(move |v| {
            let Some(s) = v.as_str() else {
                return false;
            };
            let len = s.chars().count();
            min_len.map_or(true, |min| len >= min) && max_len.map_or(true, |max| len <= max)
        })
    }

    /// Integer property with optional inclusive bounds.
    #[must_use]
    pub fn integer(min: Option<i64>, max: Option<i64>) -> Self {
        let desc = Self::new(PropertyKind::Integer);
        if min.is_none() && max.is_none() {
            return desc;
        }
        desc.validator(move |v| {
            let Some(i) = v.as_i64() else {
                return false;
            };
            min.map_or(true, |m| i >= m) && max.map_or(true, |m| i <= m)
        })
    }

    /// Float property with optional inclusive bounds.
    #[must_use]
    pub fn float(min: Option<f64>, max: Option<f64>) -> Self {
        let desc = Self::new(PropertyKind::Float);
        if min.is_none() && max.is_none() {
            return desc;
        }
        desc.validator(move |v| {
            let Some(x) = v.as_f64() else {
                return false;
            };
            min.map_or(true, |m| x >= m) && max.map_or(true, |m| x <= m)
        })
    }

    /// Boolean property.
    #[must_use]
    pub fn boolean() -> Self {
        Self::new(PropertyKind::Boolean)
    }

    /// Sets the value returned when the field was never written.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Sets the validator, replacing any bound-checking one.
    #[must_use]
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Returns the declared kind.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Returns the default value.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Checks and normalizes a value about to be written to field `name`.
    ///
    /// `Null` is always accepted. A value of the wrong kind is coerced only
    /// from text into integer, float or boolean fields; booleans read
    /// `true`, `1`, `yes` and `on` (any case) as true and anything else as
    /// false.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value cannot be brought to the declared
    /// kind, or `ValidationFailure` if the validator rejects it.
    pub fn coerce(&self, name: &str, value: Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(value);
        }

        let value = if self.kind.matches(&value) {
            value
        } else {
            self.coerce_text(name, value)?
        };

        if let Some(validator) = &self.validator {
            if !validator(&value) {
                return Err(CoreError::validation(format!(
                    "invalid value for {name}: {value}"
                )));
            }
        }
        Ok(value)
    }

    /// Brings a stored value back to the declared kind.
    ///
    /// Unlike [`PropertyDescriptor::coerce`] the validator is not applied,
    /// so records written under looser rules still load.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the value cannot be brought to the kind.
    pub fn decode(&self, name: &str, value: Value) -> CoreResult<Value> {
        if value.is_null() || self.kind.matches(&value) {
            return Ok(value);
        }
        match (self.kind, value) {
            // JSON has one number type; whole floats come back as integers.
            (PropertyKind::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (_, other) => self.coerce_text(name, other),
        }
    }

    fn coerce_text(&self, name: &str, value: Value) -> CoreResult<Value> {
        let mismatch = || {
            CoreError::type_mismatch(format!(
                "{name} must be of type {}, got {}",
                self.kind,
                value.kind_name()
            ))
        };

        let Value::Text(text) = &value else {
            return Err(mismatch());
        };
        let trimmed = text.trim();
        match self.kind {
            PropertyKind::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch()),
            PropertyKind::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch()),
            PropertyKind::Boolean => Ok(Value::Bool(matches!(
                text.to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ))),
            PropertyKind::String => Err(mismatch()),
        }
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn integer_coerces_from_text() {
        let age = PropertyDescriptor::integer(None, None);
        assert_eq!(age.coerce("age", "25".into()).unwrap(), Value::Integer(25));
        assert!(matches!(
            age.coerce("age", "abc".into()),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn no_numeric_widening() {
        let score = PropertyDescriptor::float(None, None);
        assert!(matches!(
            score.coerce("score", Value::Integer(1)),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert_eq!(score.coerce("score", "1".into()).unwrap(), Value::Float(1.0));
    }

    #[test]
    fn string_rejects_numbers() {
        let name = PropertyDescriptor::string(None, None);
        assert!(matches!(
            name.coerce("name", 5.into()),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn boolean_text_forms() {
        let active = PropertyDescriptor::boolean();
        for truthy in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(active.coerce("active", truthy.into()).unwrap(), Value::Bool(true));
        }
        for falsy in ["false", "0", "no", "anything"] {
            assert_eq!(active.coerce("active", falsy.into()).unwrap(), Value::Bool(false));
        }
    }

    #[test]
    fn null_always_accepted() {
        let name = PropertyDescriptor::string(Some(2), None);
        assert_eq!(name.coerce("name", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn string_length_bounds() {
        let name = PropertyDescriptor::string(Some(2), Some(4));
        assert!(name.coerce("name", "ab".into()).is_ok());
        assert!(matches!(
            name.coerce("name", "a".into()),
            Err(CoreError::ValidationFailure { .. })
        ));
        assert!(matches!(
            name.coerce("name", "abcde".into()),
            Err(CoreError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn numeric_bounds_apply_after_coercion() {
        let age = PropertyDescriptor::integer(Some(0), Some(150));
        assert!(age.coerce("age", "150".into()).is_ok());
        assert!(matches!(
            age.coerce("age", "151".into()),
            Err(CoreError::ValidationFailure { .. })
        ));

        let ratio = PropertyDescriptor::float(Some(0.0), Some(1.0));
        assert!(matches!(
            ratio.coerce("ratio", Value::Float(1.5)),
            Err(CoreError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn custom_validator_and_default() {
        let even = PropertyDescriptor::integer(None, None)
            .default(2)
            .validator(|v| v.as_i64().is_some_and(|i| i % 2 == 0));
        assert_eq!(even.default_value(), &Value::Integer(2));
        assert!(even.coerce("n", 4.into()).is_ok());
        assert!(even.coerce("n", 3.into()).is_err());
    }

    #[test]
    fn decode_skips_validator() {
        let age = PropertyDescriptor::integer(Some(0), Some(10));
        assert_eq!(age.decode("age", 99.into()).unwrap(), Value::Integer(99));

        let score = PropertyDescriptor::float(None, None);
        assert_eq!(score.decode("score", 2.into()).unwrap(), Value::Float(2.0));
    }

    proptest! {
        #[test]
        fn integer_text_roundtrip(n in any::<i64>()) {
            let desc = PropertyDescriptor::integer(None, None);
            prop_assert_eq!(desc.coerce("n", Value::Text(n.to_string())).unwrap(), Value::Integer(n));
        }
    }
}
