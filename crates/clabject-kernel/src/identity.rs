//! Identities of fragments and instances.
//!
//! Three disjoint kinds share one string space and are told apart by shape:
//!
//! ```text
//! #              reference identity: an unbound type template
//! $_<TypeName>   singleton identity: at most one instance per type
//! <token>        instance identity: one top-level instantiation run
//! ```
//!
//! Every fragment and instance produced by the same run shares the run's
//! identity. Singleton instance ids are content-addressed
//! (`identity ":" typeName`) so re-instantiation overwrites instead of
//! accumulating.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity marking an unbound type template.
pub const REFERENCE_IDENTITY: &str = "#";

/// Prefix of every singleton identity.
pub const SINGLETON_PREFIX: &str = "$_";

/// Separator between identity and type name in derived singleton ids.
pub const INSTANCE_ID_SEPARATOR: char = ':';

/// Which of the three identity families a string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Reference,
    Singleton,
    Instance,
}

/// Identity of a fragment or instance run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reference identity (`#`).
    pub fn reference() -> Self {
        Self(REFERENCE_IDENTITY.to_string())
    }

    /// The singleton identity for `type_name`.
    pub fn singleton(type_name: &str) -> Self {
        Self(compose_singleton_identity(type_name))
    }

    /// A fresh opaque instance identity.
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn kind(&self) -> IdentityKind {
        classify(&self.0)
    }

    pub fn is_reference(&self) -> bool {
        self.kind() == IdentityKind::Reference
    }

    pub fn is_singleton(&self) -> bool {
        self.kind() == IdentityKind::Singleton
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Classify a raw identity string.
pub fn classify(raw: &str) -> IdentityKind {
    if raw == REFERENCE_IDENTITY {
        IdentityKind::Reference
    } else if raw.starts_with(SINGLETON_PREFIX) {
        IdentityKind::Singleton
    } else {
        IdentityKind::Instance
    }
}

/// `$_<TypeName>`.
pub fn compose_singleton_identity(type_name: &str) -> String {
    format!("{SINGLETON_PREFIX}{type_name}")
}

/// Content-addressed instance id of the `type_name` level of a singleton run.
pub fn derive_singleton_instance_id(identity: &Identity, type_name: &str) -> String {
    format!("{identity}{INSTANCE_ID_SEPARATOR}{type_name}")
}

/// Instance id of the root level of `type_name`'s own singleton.
pub fn derive_root_singleton_instance_id(type_name: &str) -> String {
    derive_singleton_instance_id(&Identity::singleton(type_name), type_name)
}

/// Redirect a bare singleton-root id (`$_Engine`) to its derived canonical
/// form (`$_Engine:Engine`). Other ids are returned unchanged.
pub fn canonical_instance_id(instance_id: &str) -> String {
    match instance_id.strip_prefix(SINGLETON_PREFIX) {
        Some(type_name) if !type_name.is_empty() && !type_name.contains(INSTANCE_ID_SEPARATOR) => {
            derive_root_singleton_instance_id(type_name)
        }
        _ => instance_id.to_string(),
    }
}

/// Fresh opaque token used for instance identities and technical ids.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_told_apart_by_shape() {
        assert_eq!(Identity::reference().kind(), IdentityKind::Reference);
        assert_eq!(Identity::singleton("Engine").kind(), IdentityKind::Singleton);
        assert_eq!(Identity::generate().kind(), IdentityKind::Instance);
        assert_eq!(classify("$_"), IdentityKind::Singleton);
    }

    #[test]
    fn singleton_ids_are_deterministic() {
        let identity = Identity::new("run-1");
        assert_eq!(
            derive_singleton_instance_id(&identity, "Engine"),
            derive_singleton_instance_id(&identity, "Engine")
        );
        assert_eq!(
            derive_root_singleton_instance_id("Engine"),
            format!("{}:{}", compose_singleton_identity("Engine"), "Engine")
        );
        assert_eq!(derive_root_singleton_instance_id("Engine"), "$_Engine:Engine");
    }

    #[test]
    fn canonical_id_redirects_bare_singleton_roots() {
        assert_eq!(canonical_instance_id("$_Engine"), "$_Engine:Engine");
        assert_eq!(canonical_instance_id("$_Engine:Engine"), "$_Engine:Engine");
        assert_eq!(canonical_instance_id("$_Car:Vehicle"), "$_Car:Vehicle");
        assert_eq!(canonical_instance_id("abc"), "abc");
        assert_eq!(canonical_instance_id("$_"), "$_");
    }

    #[test]
    fn generated_identities_are_unique() {
        assert_ne!(Identity::generate(), Identity::generate());
    }
}
