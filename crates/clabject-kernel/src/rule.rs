//! Rules: single facts about a type.
//!
//! A rule is immutable once created. Its technical id is [`UNKNOWN_ID`]
//! until a [`Definition`](crate::definition::Definition) accepts it and
//! assigns a fresh one.
//!
//! Serialized form (colon-delimited, id first):
//!
//! ```text
//! attribute    id:name:datatype[:qualifier...]
//! association  id:associationName:targetName:multiplicity
//! extension    id:parentIdentity:parentName
//! ```
//!
//! Field values must not contain `:`.

use crate::error::RuleParseError;
use crate::identity::Identity;
use crate::multiplicity::Multiplicity;
use std::fmt;

/// Sentinel id of a rule not yet accepted by a definition.
pub const UNKNOWN_ID: &str = "unknown";

const FIELD_SEPARATOR: char = ':';

/// Classification of rules.
///
/// Constraint and behaviour rules are part of the vocabulary but have no
/// representation; any request for them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    Attribute,
    Association,
    Extension,
    Constraint,
    Behaviour,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Attribute => "attribute",
            RuleKind::Association => "association",
            RuleKind::Extension => "extension",
            RuleKind::Constraint => "constraint",
            RuleKind::Behaviour => "behaviour",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            RuleKind::Attribute | RuleKind::Association | RuleKind::Extension
        )
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The semantic key of a rule: two rules with equal keys fill the same
/// slot, whatever their ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKey {
    Attribute(String),
    Association {
        association_name: String,
        target_name: String,
        multiplicity: Multiplicity,
    },
    Extension(String),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Attribute(name) => write!(f, "attribute:{name}"),
            SlotKey::Association {
                association_name,
                target_name,
                multiplicity,
            } => write!(
                f,
                "association:{association_name}:{target_name}:{multiplicity}"
            ),
            SlotKey::Extension(parent) => write!(f, "extension:{parent}"),
        }
    }
}

/// An attribute slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRule {
    id: String,
    name: String,
    datatype: String,
    qualifiers: Vec<String>,
}

impl AttributeRule {
    pub fn new(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            name: name.into(),
            datatype: datatype.into(),
            qualifiers: Vec::new(),
        }
    }

    /// Extra variant fields carried verbatim after the datatype.
    pub fn with_qualifiers(mut self, qualifiers: Vec<String>) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &str {
        &self.datatype
    }

    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    pub fn serialise(&self) -> String {
        let mut fields = vec![self.id.as_str(), self.name.as_str(), self.datatype.as_str()];
        fields.extend(self.qualifiers.iter().map(String::as_str));
        fields.join(":")
    }

    pub fn parse(input: &str) -> Result<Self, RuleParseError> {
        let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
        if fields.len() < 3 {
            return Err(RuleParseError::FieldCount {
                kind: "attribute",
                expected: "at least 3",
                actual: fields.len(),
                input: input.to_string(),
            });
        }
        require_nonempty("attribute", "id", fields[0], input)?;
        require_nonempty("attribute", "name", fields[1], input)?;
        Ok(Self {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            datatype: fields[2].to_string(),
            qualifiers: fields[3..].iter().map(|f| f.to_string()).collect(),
        })
    }

    pub fn fork(&self, _identity: &Identity) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            ..self.clone()
        }
    }
}

/// An association slot pointing at a target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRule {
    id: String,
    association_name: String,
    target_name: String,
    multiplicity: Multiplicity,
}

impl AssociationRule {
    pub fn new(
        association_name: impl Into<String>,
        target_name: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            association_name: association_name.into(),
            target_name: target_name.into(),
            multiplicity,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn association_name(&self) -> &str {
        &self.association_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn serialise(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.id, self.association_name, self.target_name, self.multiplicity
        )
    }

    pub fn parse(input: &str) -> Result<Self, RuleParseError> {
        let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
        let [id, association_name, target_name, multiplicity] = fields[..] else {
            return Err(RuleParseError::FieldCount {
                kind: "association",
                expected: "4",
                actual: fields.len(),
                input: input.to_string(),
            });
        };
        require_nonempty("association", "id", id, input)?;
        require_nonempty("association", "association name", association_name, input)?;
        require_nonempty("association", "target name", target_name, input)?;
        Ok(Self {
            id: id.to_string(),
            association_name: association_name.to_string(),
            target_name: target_name.to_string(),
            multiplicity: multiplicity.parse()?,
        })
    }

    pub fn fork(&self, _identity: &Identity) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            ..self.clone()
        }
    }
}

/// An extension link to a parent fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRule {
    id: String,
    parent_identity: Identity,
    parent_name: String,
}

impl ExtensionRule {
    pub fn new(parent_name: impl Into<String>, parent_identity: Identity) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            parent_identity,
            parent_name: parent_name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_identity(&self) -> &Identity {
        &self.parent_identity
    }

    pub fn parent_name(&self) -> &str {
        &self.parent_name
    }

    pub fn serialise(&self) -> String {
        format!("{}:{}:{}", self.id, self.parent_identity, self.parent_name)
    }

    pub fn parse(input: &str) -> Result<Self, RuleParseError> {
        let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
        let [id, parent_identity, parent_name] = fields[..] else {
            return Err(RuleParseError::FieldCount {
                kind: "extension",
                expected: "3",
                actual: fields.len(),
                input: input.to_string(),
            });
        };
        require_nonempty("extension", "id", id, input)?;
        require_nonempty("extension", "parent identity", parent_identity, input)?;
        require_nonempty("extension", "parent name", parent_name, input)?;
        Ok(Self {
            id: id.to_string(),
            parent_identity: Identity::new(parent_identity),
            parent_name: parent_name.to_string(),
        })
    }

    /// The parent of a forked fragment is forked under the same identity.
    pub fn fork(&self, identity: &Identity) -> Self {
        Self {
            id: UNKNOWN_ID.to_string(),
            parent_identity: identity.clone(),
            parent_name: self.parent_name.clone(),
        }
    }
}

/// A rule of any supported kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Attribute(AttributeRule),
    Association(AssociationRule),
    Extension(ExtensionRule),
}

impl Rule {
    pub fn id(&self) -> &str {
        match self {
            Rule::Attribute(r) => r.id(),
            Rule::Association(r) => r.id(),
            Rule::Extension(r) => r.id(),
        }
    }

    pub fn has_known_id(&self) -> bool {
        self.id() != UNKNOWN_ID
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Attribute(_) => RuleKind::Attribute,
            Rule::Association(_) => RuleKind::Association,
            Rule::Extension(_) => RuleKind::Extension,
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        match self {
            Rule::Attribute(r) => SlotKey::Attribute(r.name.clone()),
            Rule::Association(r) => SlotKey::Association {
                association_name: r.association_name.clone(),
                target_name: r.target_name.clone(),
                multiplicity: r.multiplicity,
            },
            Rule::Extension(r) => SlotKey::Extension(r.parent_name.clone()),
        }
    }

    /// Polymorphic equality: same slot regardless of id.
    pub fn same_slot(&self, other: &Rule) -> bool {
        self.kind() == other.kind() && self.slot_key() == other.slot_key()
    }

    pub fn serialise(&self) -> String {
        match self {
            Rule::Attribute(r) => r.serialise(),
            Rule::Association(r) => r.serialise(),
            Rule::Extension(r) => r.serialise(),
        }
    }

    /// Whether the rule survives its own serialized form: required fields
    /// are non-empty and no field carries the separator.
    pub fn validate(&self) -> Result<(), RuleParseError> {
        let fields: Vec<(&'static str, &str, bool)> = match self {
            Rule::Attribute(r) => {
                let mut fields = vec![
                    ("id", r.id.as_str(), true),
                    ("name", r.name.as_str(), true),
                    ("datatype", r.datatype.as_str(), false),
                ];
                fields.extend(r.qualifiers.iter().map(|q| ("qualifier", q.as_str(), false)));
                fields
            }
            Rule::Association(r) => vec![
                ("id", r.id.as_str(), true),
                ("association name", r.association_name.as_str(), true),
                ("target name", r.target_name.as_str(), true),
            ],
            Rule::Extension(r) => vec![
                ("id", r.id.as_str(), true),
                ("parent identity", r.parent_identity.as_str(), true),
                ("parent name", r.parent_name.as_str(), true),
            ],
        };

        let kind = self.kind().as_str();
        let serialised = self.serialise();
        for (field, value, required) in fields {
            if required {
                require_nonempty(kind, field, value, &serialised)?;
            }
            if value.contains(FIELD_SEPARATOR) {
                return Err(RuleParseError::ReservedSeparator {
                    kind,
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Parse a serialized rule of a known kind.
    pub fn parse(kind: RuleKind, input: &str) -> Result<Self, crate::error::ClabjectError> {
        match kind {
            RuleKind::Attribute => Ok(Rule::Attribute(AttributeRule::parse(input)?)),
            RuleKind::Association => Ok(Rule::Association(AssociationRule::parse(input)?)),
            RuleKind::Extension => Ok(Rule::Extension(ExtensionRule::parse(input)?)),
            other => Err(crate::error::ClabjectError::UnsupportedRuleKind(
                other.to_string(),
            )),
        }
    }

    pub fn fork(&self, identity: &Identity) -> Self {
        match self {
            Rule::Attribute(r) => Rule::Attribute(r.fork(identity)),
            Rule::Association(r) => Rule::Association(r.fork(identity)),
            Rule::Extension(r) => Rule::Extension(r.fork(identity)),
        }
    }

    pub(crate) fn with_id(self, id: String) -> Self {
        match self {
            Rule::Attribute(r) => Rule::Attribute(AttributeRule { id, ..r }),
            Rule::Association(r) => Rule::Association(AssociationRule { id, ..r }),
            Rule::Extension(r) => Rule::Extension(ExtensionRule { id, ..r }),
        }
    }
}

impl From<AttributeRule> for Rule {
    fn from(rule: AttributeRule) -> Self {
        Rule::Attribute(rule)
    }
}

impl From<AssociationRule> for Rule {
    fn from(rule: AssociationRule) -> Self {
        Rule::Association(rule)
    }
}

impl From<ExtensionRule> for Rule {
    fn from(rule: ExtensionRule) -> Self {
        Rule::Extension(rule)
    }
}

fn require_nonempty(
    kind: &'static str,
    field: &'static str,
    value: &str,
    input: &str,
) -> Result<(), RuleParseError> {
    if value.is_empty() {
        return Err(RuleParseError::EmptyField {
            kind,
            field,
            input: input.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_round_trip_keeps_qualifiers() {
        let raw = "a1:color:String:required:indexed";
        let rule = AttributeRule::parse(raw).expect("valid attribute");
        assert_eq!(rule.name(), "color");
        assert_eq!(rule.qualifiers(), ["required", "indexed"]);
        assert_eq!(rule.serialise(), raw);
    }

    #[test]
    fn association_round_trip() {
        let raw = "r7:hasWheel:Wheel:4";
        let rule = AssociationRule::parse(raw).expect("valid association");
        assert_eq!(rule.multiplicity(), Multiplicity::Exact(4));
        assert_eq!(rule.serialise(), raw);
        let ranged = AssociationRule::parse("r8:hasSeat:Seat:1...*").expect("ranged");
        assert_eq!(ranged.serialise(), "r8:hasSeat:Seat:1...*");
    }

    #[test]
    fn extension_round_trip_with_singleton_identity() {
        let raw = "e1:$_Car:Vehicle";
        let rule = ExtensionRule::parse(raw).expect("valid extension");
        assert!(rule.parent_identity().is_singleton());
        assert_eq!(rule.parent_name(), "Vehicle");
        assert_eq!(rule.serialise(), raw);
    }

    #[test]
    fn separators_inside_fields_fail_validation() {
        let rule = Rule::from(AttributeRule::new("a:b", "String"));
        assert_eq!(
            rule.validate(),
            Err(RuleParseError::ReservedSeparator {
                kind: "attribute",
                field: "name",
                value: "a:b".into(),
            })
        );

        let qualified =
            Rule::from(AttributeRule::new("color", "String").with_qualifiers(vec!["x:y".into()]));
        assert!(matches!(
            qualified.validate(),
            Err(RuleParseError::ReservedSeparator { field: "qualifier", .. })
        ));

        let extension = Rule::from(ExtensionRule::new("Vehicle", Identity::new("run:1")));
        assert!(matches!(
            extension.validate(),
            Err(RuleParseError::ReservedSeparator { field: "parent identity", .. })
        ));

        let unnamed = Rule::from(AssociationRule::new("", "Wheel", Multiplicity::Any));
        assert!(matches!(
            unnamed.validate(),
            Err(RuleParseError::EmptyField { field: "association name", .. })
        ));

        let fine = Rule::from(AssociationRule::new("hasWheel", "Wheel", Multiplicity::Exact(4)));
        assert_eq!(fine.validate(), Ok(()));
    }

    #[test]
    fn malformed_rules_fail_whole() {
        assert!(matches!(
            AttributeRule::parse("a1:color"),
            Err(RuleParseError::FieldCount { actual: 2, .. })
        ));
        assert!(matches!(
            AttributeRule::parse(":color:String"),
            Err(RuleParseError::EmptyField { field: "id", .. })
        ));
        assert!(AssociationRule::parse("r1:hasWheel:Wheel").is_err());
        assert!(AssociationRule::parse("r1:hasWheel:Wheel:four").is_err());
        assert!(ExtensionRule::parse("e1:#:Vehicle:extra").is_err());
        assert!(matches!(
            Rule::parse(RuleKind::Constraint, "c1:x"),
            Err(crate::error::ClabjectError::UnsupportedRuleKind(_))
        ));
    }

    #[test]
    fn same_slot_ignores_ids() {
        let a = Rule::from(AttributeRule::new("color", "String")).with_id("1".into());
        let b = Rule::from(AttributeRule::new("color", "String")).with_id("2".into());
        let c = Rule::from(AttributeRule::new("wheels", "Integer"));
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));

        let m1 = Rule::from(AssociationRule::new("has", "Wheel", Multiplicity::Exact(4)));
        let m2 = Rule::from(AssociationRule::new("has", "Wheel", Multiplicity::Any));
        assert!(!m1.same_slot(&m2));
    }

    #[test]
    fn fork_rewrites_only_extension_identity() {
        let run = Identity::new("run-9");
        let attribute = Rule::from(AttributeRule::new("color", "String")).with_id("1".into());
        let forked = attribute.fork(&run);
        assert_eq!(forked.id(), UNKNOWN_ID);
        assert!(forked.same_slot(&attribute));

        let extension = ExtensionRule::new("Vehicle", Identity::reference());
        let forked = extension.fork(&run);
        assert_eq!(forked.parent_identity(), &run);
        assert_eq!(forked.parent_name(), "Vehicle");
    }
}
