//! # Clabject Kernel
//!
//! A deep-instantiation engine: type descriptions ("fragments") are
//! themselves instantiable, so a model forms a multi-level hierarchy of
//! clabjects, each both an instance and a type.
//!
//! This crate is **storage-agnostic**. Fragments and instances reach
//! persistence only through the asynchronous [`Registry`] boundary; every
//! other operation is synchronous in-memory computation.
//!
//! ## Architecture
//!
//! ```text
//! Identity / Multiplicity   ← reference `#`, singleton `$_T`, instance tokens
//!     │
//! Rule                      ← attribute / association / extension
//!     │
//! Definition                ← verifier-gated RuleSet + observers
//!     │
//! Fragment ── TypeHandle    ← type graph node, parents, unfold / fork
//!     │
//! InstanceFactory           ← fork + derive + batch persist
//!     │
//! DeepInstance / Shape      ← one instance level per fragment level
//! ```

pub mod config;
pub mod definition;
pub mod digest;
pub mod error;
pub mod factory;
pub mod fragment;
pub mod handle;
pub mod identity;
pub mod instance;
pub mod multiplicity;
pub mod registry;
pub mod rule;
pub mod shape;
pub mod value;
pub mod verifier;

pub use config::{EngineConfig, UnresolvedTargetPolicy};
pub use definition::{Definition, DefinitionEvent, Observer, ObserverError, RuleSet};
pub use digest::ShapeDigest;
pub use error::{ClabjectError, Result, RuleParseError};
pub use factory::InstanceFactory;
pub use fragment::{
    BUILTIN_TYPES, Fragment, FragmentBuilder, FragmentKey, FragmentKind, FragmentState,
    UnfoldReport, UnresolvedTarget, UnresolvedVia, builtin_base_models,
};
pub use handle::TypeHandle;
pub use identity::{
    Identity, IdentityKind, canonical_instance_id, classify, compose_singleton_identity,
    derive_root_singleton_instance_id, derive_singleton_instance_id, generate_token,
};
pub use instance::DeepInstance;
pub use multiplicity::Multiplicity;
pub use registry::{KeyLease, KeyLocks, Registry};
pub use rule::{AssociationRule, AttributeRule, ExtensionRule, Rule, RuleKind, SlotKey, UNKNOWN_ID};
pub use shape::{AssociationData, AttributeData, ExtensionData, Shape};
pub use value::ConcreteValue;
pub use verifier::{AcceptAll, DefinitionVerifier, HandlePredicate, ModelVerifier, RuleSetPredicate};
