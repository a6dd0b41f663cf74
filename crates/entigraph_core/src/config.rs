//! Database configuration.

/// Default depth used when hydrating relations on load.
pub const DEFAULT_LOAD_DEPTH: usize = 10;

/// Caller identity used when the host never sets one.
pub const DEFAULT_CALLER: &str = "system";

/// Configuration for constructing a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether mutating operations append to the audit trail.
    pub audit_enabled: bool,

    /// Relation hydration depth used by loads that do not pass one.
    pub load_depth: usize,

    /// Caller identity an entity store starts with.
    pub default_caller: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audit_enabled: false,
            load_depth: DEFAULT_LOAD_DEPTH,
            default_caller: DEFAULT_CALLER.to_string(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the audit trail is recorded.
    #[must_use]
    pub const fn audit_enabled(mut self, value: bool) -> Self {
        self.audit_enabled = value;
        self
    }

    /// Sets the default relation hydration depth.
    #[must_use]
    pub const fn load_depth(mut self, depth: usize) -> Self {
        self.load_depth = depth;
        self
    }

    /// Sets the initial caller identity.
    #[must_use]
    pub fn default_caller(mut self, caller: impl Into<String>) -> Self {
        self.default_caller = caller.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.audit_enabled);
        assert_eq!(config.load_depth, DEFAULT_LOAD_DEPTH);
        assert_eq!(config.default_caller, "system");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .audit_enabled(true)
            .load_depth(3)
            .default_caller("alice");

        assert!(config.audit_enabled);
        assert_eq!(config.load_depth, 3);
        assert_eq!(config.default_caller, "alice");
    }
}
