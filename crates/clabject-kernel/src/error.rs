//! Error types for clabject kernel operations.

/// Convenience alias used across the kernel.
pub type Result<T, E = ClabjectError> = std::result::Result<T, E>;

/// Errors arising from model misuse, failed lookups, or the storage seam.
///
/// Verifier rejections are not errors: rule mutators report them through
/// their `bool` return and leave the rule set untouched.
#[derive(Debug, thiserror::Error)]
pub enum ClabjectError {
    /// No fragment is registered under the requested name/identity.
    #[error("type not found: {name} ({identity})")]
    TypeNotFound { name: String, identity: String },

    /// Template fragments can only be extended, never instantiated.
    #[error("template type cannot be instantiated: {0}")]
    TemplateInstantiationForbidden(String),

    /// An operation needed the registry but none was attached.
    #[error("no registry attached to {0}")]
    UndefinedRegistry(String),

    /// A fragment was built without a definition or a verifier to create one.
    #[error("no definition supplied for fragment {0}")]
    UndefinedDefinition(String),

    /// Validity was requested without a model verifier attached.
    #[error("no model verifier attached to fragment {0}")]
    UndefinedVerifier(String),

    /// The relation's allowed targets do not meet the target's type closure.
    #[error("association {relation} does not allow any type of {target}")]
    AssociationNotAllowed { relation: String, target: String },

    /// The requested type is not part of the instance's closure.
    #[error("type {type_name} is not in the closure of instance {instance_id}")]
    TypeNotInClosure {
        type_name: String,
        instance_id: String,
    },

    /// A wildcard or ranged multiplicity was asked for an exact count.
    #[error("multiplicity {0} has no exact cardinality")]
    UnsupportedMultiplicityConversion(String),

    #[error(transparent)]
    RuleParse(#[from] RuleParseError),

    /// BaseModel fragments are invariant: no rule or parent mutation.
    #[error("base model {0} is invariant")]
    InvariantModel(String),

    /// Constraint and behaviour rules are declared but not supported.
    #[error("unsupported rule kind: {0}")]
    UnsupportedRuleKind(String),

    /// The attribute was bound at template level and cannot be reassigned.
    #[error("attribute {key} of instance {instance_id} is final")]
    FinalAttribute { key: String, instance_id: String },

    #[error("attribute {key} is not defined on instance {instance_id}")]
    UnknownAttribute { key: String, instance_id: String },

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Storage or I/O failure behind the registry boundary.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Failures while parsing a serialized rule or multiplicity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("{kind} rule expects {expected} fields, got {actual}: {input:?}")]
    FieldCount {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
        input: String,
    },

    #[error("{kind} rule has an empty {field}: {input:?}")]
    EmptyField {
        kind: &'static str,
        field: &'static str,
        input: String,
    },

    /// A field value carries the `:` separator and would not parse back.
    #[error("{kind} rule {field} contains ':': {value:?}")]
    ReservedSeparator {
        kind: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("invalid multiplicity: {0:?}")]
    Multiplicity(String),
}
