//! Template-level concrete values.
//!
//! A concrete value fills an attribute or association slot in model space,
//! before any instance exists. Deep instantiation copies them into every
//! derived instance as final data.

use crate::identity::generate_token;
use crate::rule::Rule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConcreteValue {
    Attribute {
        id: String,
        name: String,
        value: String,
    },
    /// Binds one target of an association slot. `target` names the bound
    /// fragment, which may be any subtype of the slot's `target_name`.
    Association {
        id: String,
        association_name: String,
        target_name: String,
        target: String,
    },
}

impl ConcreteValue {
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConcreteValue::Attribute {
            id: generate_token(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn association(
        association_name: impl Into<String>,
        target_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        ConcreteValue::Association {
            id: generate_token(),
            association_name: association_name.into(),
            target_name: target_name.into(),
            target: target.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ConcreteValue::Attribute { id, .. } | ConcreteValue::Association { id, .. } => id,
        }
    }

    /// Whether this value fills `rule`.
    pub fn concrete_of(&self, rule: &Rule) -> bool {
        match (self, rule) {
            (ConcreteValue::Attribute { name, .. }, Rule::Attribute(r)) => name == r.name(),
            (
                ConcreteValue::Association {
                    association_name,
                    target_name,
                    ..
                },
                Rule::Association(r),
            ) => association_name == r.association_name() && target_name == r.target_name(),
            _ => false,
        }
    }

    /// Override equality: attribute values shadow by name, association
    /// bindings only by identical id (they accumulate).
    pub fn same_slot(&self, other: &ConcreteValue) -> bool {
        match (self, other) {
            (
                ConcreteValue::Attribute { name: a, .. },
                ConcreteValue::Attribute { name: b, .. },
            ) => a == b,
            (
                ConcreteValue::Association { id: a, .. },
                ConcreteValue::Association { id: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// Merge `incoming` into `base`, adding only values with no slot-equal
/// entry already present.
pub(crate) fn merge_values(
    base: &mut Vec<ConcreteValue>,
    incoming: impl IntoIterator<Item = ConcreteValue>,
) {
    for value in incoming {
        if !base.iter().any(|existing| existing.same_slot(&value)) {
            base.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplicity::Multiplicity;
    use crate::rule::{AssociationRule, AttributeRule};

    #[test]
    fn concrete_of_matches_slot_not_multiplicity() {
        let rule = Rule::from(AssociationRule::new("hasEngine", "Engine", Multiplicity::Exact(1)));
        let bound = ConcreteValue::association("hasEngine", "Engine", "V8Engine");
        let other = ConcreteValue::association("hasWheel", "Wheel", "Wheel");
        assert!(bound.concrete_of(&rule));
        assert!(!other.concrete_of(&rule));
        assert!(!ConcreteValue::attribute("hasEngine", "x").concrete_of(&rule));

        let attribute = Rule::from(AttributeRule::new("speed", "Integer"));
        assert!(ConcreteValue::attribute("speed", "0").concrete_of(&attribute));
    }

    #[test]
    fn attribute_values_shadow_association_values_accumulate() {
        let mut base = vec![
            ConcreteValue::attribute("color", "red"),
            ConcreteValue::association("hasWheel", "Wheel", "Wheel"),
        ];
        merge_values(
            &mut base,
            vec![
                ConcreteValue::attribute("color", "blue"),
                ConcreteValue::association("hasWheel", "Wheel", "Wheel"),
            ],
        );
        assert_eq!(base.len(), 3);
        assert!(matches!(&base[0], ConcreteValue::Attribute { value, .. } if value == "red"));
    }

    #[test]
    fn values_serialize_with_a_kind_tag() {
        let value = ConcreteValue::Attribute {
            id: "v1".to_string(),
            name: "speed".to_string(),
            value: "0".to_string(),
        };
        let json = serde_json::to_value(&value).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({"kind": "attribute", "id": "v1", "name": "speed", "value": "0"})
        );
    }
}
