//! Mapping attendee emails to user identifiers.

use std::collections::HashMap;

use async_trait::async_trait;

/// Resolves an email address to an opaque user identifier.
///
/// A lookup failure is not an error: the attendee is simply stored
/// unresolved and retried on a later sync.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, email: &str) -> Option<String>;
}

/// Resolver backed by a fixed email -> id table (the `[identities]`
/// config section). Emails are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    identities: HashMap<String, String>,
}

impl StaticIdentityResolver {
    pub fn new(identities: &HashMap<String, String>) -> Self {
        StaticIdentityResolver {
            identities: identities
                .iter()
                .map(|(email, id)| (email.to_lowercase(), id.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, email: &str) -> Option<String> {
        self.identities.get(&email.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_ignores_case() {
        let table = HashMap::from([("Alice@Example.com".to_string(), "U01".to_string())]);
        let resolver = StaticIdentityResolver::new(&table);

        assert_eq!(resolver.resolve("alice@example.com").await.as_deref(), Some("U01"));
        assert_eq!(resolver.resolve("bob@example.com").await, None);
    }
}
