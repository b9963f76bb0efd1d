//! Instance data rows.
//!
//! A [`Shape`] is the flat data of one instance level: attribute rows,
//! association rows, and links to the parent-level instances derived from
//! the same run.

use crate::identity::generate_token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeData {
    pub id: String,
    pub instance_id: String,
    pub key: String,
    /// `None` until assigned; template-bound rows always carry a value.
    pub value: Option<String>,
    /// Bound at template level; never reassigned on the instance.
    pub is_final: bool,
}

impl AttributeData {
    pub fn bound(
        instance_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_token(),
            instance_id: instance_id.into(),
            key: key.into(),
            value: Some(value.into()),
            is_final: true,
        }
    }

    pub fn placeholder(instance_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: generate_token(),
            instance_id: instance_id.into(),
            key: key.into(),
            value: None,
            is_final: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationData {
    pub id: String,
    pub instance_id: String,
    pub relation: String,
    pub target_instance_id: String,
    pub is_final: bool,
}

/// Links an instance level to the instance of one of its type's parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionData {
    pub id: String,
    pub instance_id: String,
    pub parent_instance_id: String,
    pub parent_type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(default)]
    pub attributes: Vec<AttributeData>,
    #[serde(default)]
    pub associations: Vec<AssociationData>,
    #[serde(default)]
    pub extensions: Vec<ExtensionData>,
}

impl Shape {
    /// Attribute rows by key. Duplicate keys resolve to the row with the
    /// greatest id.
    pub fn attribute_map(&self) -> BTreeMap<String, AttributeData> {
        let mut map: BTreeMap<String, AttributeData> = BTreeMap::new();
        for row in &self.attributes {
            let newer = map.get(&row.key).is_none_or(|existing| existing.id < row.id);
            if newer {
                map.insert(row.key.clone(), row.clone());
            }
        }
        map
    }

    /// The row `attribute_map` resolves `key` to.
    pub(crate) fn attribute_mut(&mut self, key: &str) -> Option<&mut AttributeData> {
        self.attributes
            .iter_mut()
            .filter(|row| row.key == key)
            .max_by(|a, b| a.id.cmp(&b.id))
    }

    pub fn remove_association(&mut self, id: &str) -> bool {
        let before = self.associations.len();
        self.associations.retain(|row| row.id != id);
        self.associations.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, key: &str, value: &str) -> AttributeData {
        AttributeData {
            id: id.to_string(),
            instance_id: "i".to_string(),
            key: key.to_string(),
            value: Some(value.to_string()),
            is_final: false,
        }
    }

    #[test]
    fn duplicate_keys_resolve_to_greatest_id() {
        let shape = Shape {
            attributes: vec![
                row("b", "color", "blue"),
                row("a", "color", "red"),
                row("c", "size", "1"),
            ],
            ..Shape::default()
        };
        let map = shape.attribute_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["color"].value.as_deref(), Some("blue"));
    }

    #[test]
    fn attribute_mut_agrees_with_the_map() {
        let mut shape = Shape {
            attributes: vec![row("a", "color", "red"), row("b", "color", "blue")],
            ..Shape::default()
        };
        shape.attribute_mut("color").expect("row").value = Some("green".to_string());
        assert_eq!(shape.attribute_map()["color"].value.as_deref(), Some("green"));
        assert!(shape.attribute_mut("missing").is_none());
    }
}
