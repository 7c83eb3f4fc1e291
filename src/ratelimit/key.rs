//! Window key generation.

/// Namespace prefix for window sets in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// The store key of one identifier's window set.
///
/// Rendered as `<prefix>:<identifier>`. The identifier is opaque and is
/// not escaped, so an identifier containing `:` simply extends the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Namespace prefix
    pub prefix: String,
    /// The rate-limited subject
    pub identifier: String,
}

impl WindowKey {
    /// Create a key in the default `rate_limit` namespace.
    pub fn new(identifier: &str) -> Self {
        Self::with_prefix(DEFAULT_KEY_PREFIX, identifier)
    }

    pub fn with_prefix(prefix: &str, identifier: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// The key as stored.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.prefix, self.identifier)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.prefix, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace() {
        let key = WindowKey::new("203.0.113.7");
        assert_eq!(key.to_store_key(), "rate_limit:203.0.113.7");
    }

    #[test]
    fn test_custom_prefix() {
        let key = WindowKey::with_prefix("auth", "user-42");
        assert_eq!(key.to_store_key(), "auth:user-42");
        assert_eq!(key.to_string(), key.to_store_key());
    }

    #[test]
    fn test_identifier_is_opaque() {
        let key = WindowKey::new("10.0.0.1_anonymous:extra");
        assert_eq!(key.to_store_key(), "rate_limit:10.0.0.1_anonymous:extra");

        let empty = WindowKey::new("");
        assert_eq!(empty.to_store_key(), "rate_limit:");
    }
}
