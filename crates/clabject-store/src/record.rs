//! Serde records: the persisted form of fragments and instance levels.
//!
//! Rules are stored in their colon-delimited serialized form; loading a
//! record parses every rule again.

use clabject_kernel::{
    AssociationRule, AttributeRule, ClabjectError, ConcreteValue, DeepInstance, Definition,
    DefinitionVerifier, ExtensionRule, Fragment, FragmentKey, FragmentKind, Identity, Registry,
    Rule, RuleSet, Shape, TypeHandle,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub name: String,
    pub identity: Identity,
    pub kind: FragmentKind,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub associations: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub values: Vec<ConcreteValue>,
}

impl FragmentRecord {
    pub fn from_fragment(fragment: &Fragment) -> Self {
        let rules = fragment.definition().rules();
        Self {
            name: fragment.name().to_string(),
            identity: fragment.identity().clone(),
            kind: fragment.kind(),
            is_template: fragment.is_template(),
            attributes: rules.attribute_rules().iter().map(AttributeRule::serialise).collect(),
            associations: rules
                .association_rules()
                .iter()
                .map(AssociationRule::serialise)
                .collect(),
            extensions: rules.extension_rules().iter().map(ExtensionRule::serialise).collect(),
            values: fragment.values().to_vec(),
        }
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.name.clone(), self.identity.clone())
    }

    pub fn rules(&self) -> Result<RuleSet, ClabjectError> {
        let mut rules = RuleSet::new();
        for raw in &self.attributes {
            rules = rules.with(Rule::Attribute(AttributeRule::parse(raw)?));
        }
        for raw in &self.associations {
            rules = rules.with(Rule::Association(AssociationRule::parse(raw)?));
        }
        for raw in &self.extensions {
            rules = rules.with(Rule::Extension(ExtensionRule::parse(raw)?));
        }
        Ok(rules)
    }

    /// Rebuild the fragment, folded. Parents are resolved on unfold.
    pub fn to_fragment(
        &self,
        verifier: Arc<dyn DefinitionVerifier>,
        registry: Arc<dyn Registry>,
    ) -> Result<Fragment, ClabjectError> {
        let definition = Definition::restore(self.rules()?, verifier);
        let builder = Fragment::builder(self.name.clone())
            .identity(self.identity.clone())
            .template(self.is_template)
            .definition(definition)
            .values(self.values.clone())
            .registry(registry);
        match self.kind {
            FragmentKind::Node => builder.build(),
            FragmentKind::BaseModel => builder.base_model().build(),
        }
    }
}

/// One instance level. Parent levels are separate records linked through
/// the shape's extension rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub identity: Identity,
    pub type_name: String,
    #[serde(flatten)]
    pub shape: Shape,
}

impl InstanceRecord {
    pub fn from_instance(instance: &DeepInstance) -> Self {
        Self {
            instance_id: instance.instance_id().to_string(),
            identity: instance.identity().clone(),
            type_name: instance.type_name().to_string(),
            shape: instance.shape().clone(),
        }
    }

    pub fn type_key(&self) -> FragmentKey {
        FragmentKey::new(self.type_name.clone(), self.identity.clone())
    }

    pub fn to_instance(
        &self,
        type_handle: TypeHandle,
        registry: Arc<dyn Registry>,
    ) -> DeepInstance {
        DeepInstance::new(
            self.instance_id.clone(),
            self.identity.clone(),
            type_handle,
            self.shape.clone(),
            Some(registry),
        )
    }
}
