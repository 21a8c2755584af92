//! Composite cache keys.
//!
//! A key is `resource:identity:` followed by zero or more `:`-separated
//! segments (page, version, entity id). The identity is mandatory, so a key
//! for one user's data cannot be built without naming that user, and every key
//! of one `(resource, identity)` pair shares the prefix returned by
//! [`CacheKey::prefix_for`].

use std::fmt;

/// Separator between key components.
const SEPARATOR: char = ':';

/// A cache key scoped to a resource type and an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    encoded: String,
}

impl CacheKey {
    /// Start building a key for `resource` owned by `identity`.
    pub fn builder(resource: &str, identity: impl fmt::Display) -> CacheKeyBuilder {
        let mut encoded = String::with_capacity(64);
        push_component(&mut encoded, resource);
        encoded.push(SEPARATOR);
        push_component(&mut encoded, &identity.to_string());
        encoded.push(SEPARATOR);
        CacheKeyBuilder {
            encoded,
            has_segment: false,
        }
    }

    /// Prefix shared by every key of `resource` owned by `identity`.
    pub fn prefix_for(resource: &str, identity: impl fmt::Display) -> String {
        CacheKey::builder(resource, identity).encoded
    }

    /// Prefix shared by every key of `resource`, across identities.
    pub fn resource_prefix(resource: &str) -> String {
        let mut prefix = String::with_capacity(resource.len() + 1);
        push_component(&mut prefix, resource);
        prefix.push(SEPARATOR);
        prefix
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.encoded.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

/// Builder returned by [`CacheKey::builder`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    encoded: String,
    has_segment: bool,
}

impl CacheKeyBuilder {
    /// Append a free-form segment.
    pub fn segment(mut self, segment: impl fmt::Display) -> Self {
        if self.has_segment {
            self.encoded.push(SEPARATOR);
        }
        push_component(&mut self.encoded, &segment.to_string());
        self.has_segment = true;
        self
    }

    /// Append a page number segment (`p<n>`).
    pub fn page(self, page: u32) -> Self {
        self.segment(format_args!("p{page}"))
    }

    /// Append a version segment (`v<n>`).
    pub fn version(self, version: u32) -> Self {
        self.segment(format_args!("v{version}"))
    }

    pub fn build(self) -> CacheKey {
        CacheKey {
            encoded: self.encoded,
        }
    }
}

/// Escape the separator so user-supplied components cannot forge a prefix.
fn push_component(out: &mut String, component: &str) {
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Keys for distinct identities never share an identity prefix.
        #[test]
        fn prop_identity_prefix_isolated(
            a in "[a-z0-9:%]{1,12}",
            b in "[a-z0-9:%]{1,12}",
            page in 0u32..50,
        ) {
            prop_assume!(a != b);
            let key = CacheKey::builder("cover_letter", &a).page(page).build();
            prop_assert!(key.starts_with(&CacheKey::prefix_for("cover_letter", &a)));
            prop_assert!(!key.starts_with(&CacheKey::prefix_for("cover_letter", &b)));
        }
    }
}
