//! Fragments: nodes of the composite type graph.
//!
//! A fragment is identified by `(name, identity)`, owns one [`Definition`],
//! and holds its extension parents and (once unfolded) its resolved
//! association targets.
//!
//! ```text
//!            fork(identity)
//! Created ───────────────────▶ new Fragment (Created)
//!    │
//!    │ unfold
//!    ▼        fold
//! Unfolded ◀────────▶ Folded
//!            unfold
//! ```
//!
//! Parents are kept ordered by `(name, identity)`, so every traversal that
//! merges parents (deep rule sets, deep values, closures) visits them
//! alphabetically by type name. A child always wins over its parents; among
//! parents the alphabetically first wins.
//!
//! The extension graph must be acyclic. This is an invariant of model
//! construction and is not checked.

use crate::config::UnresolvedTargetPolicy;
use crate::definition::{Definition, Observer};
use crate::error::{ClabjectError, Result};
use crate::factory::InstanceFactory;
use crate::handle::TypeHandle;
use crate::identity::{Identity, derive_root_singleton_instance_id};
use crate::instance::DeepInstance;
use crate::registry::Registry;
use crate::rule::{AssociationRule, AttributeRule, ExtensionRule, Rule, RuleKind};
use crate::value::{ConcreteValue, merge_values};
use crate::verifier::{DefinitionVerifier, ModelVerifier};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Names of the built-in primitive base models.
pub const BUILTIN_TYPES: [&str; 4] = ["Boolean", "Float", "Integer", "String"];

/// Unique key of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey {
    pub name: String,
    pub identity: Identity,
}

impl FragmentKey {
    pub fn new(name: impl Into<String>, identity: Identity) -> Self {
        Self {
            name: name.into(),
            identity,
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// General, mutable, extensible.
    Node,
    /// Fixed root type: no parents, no rule mutation.
    BaseModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentState {
    Created,
    Unfolded,
    Folded,
}

/// How an unresolved target was reached during unfold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedVia {
    Association(String),
    Extension,
    ExtensionInstance,
}

/// A neighbor the registry could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedTarget {
    pub owner: String,
    pub target: String,
    pub via: UnresolvedVia,
}

/// Non-fatal findings of an unfold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnfoldReport {
    pub unresolved: Vec<UnresolvedTarget>,
}

impl UnfoldReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub(crate) fn merge(&mut self, other: UnfoldReport) {
        self.unresolved.extend(other.unresolved);
    }

    pub(crate) fn record(
        &mut self,
        policy: UnresolvedTargetPolicy,
        target: UnresolvedTarget,
        identity: &Identity,
    ) -> Result<()> {
        match policy {
            UnresolvedTargetPolicy::Warn => {
                tracing::warn!(
                    target: "clabject.fragment",
                    owner = %target.owner,
                    unresolved = %target.target,
                    via = ?target.via,
                    "dropping unresolved target"
                );
                self.unresolved.push(target);
                Ok(())
            }
            UnresolvedTargetPolicy::Fail => Err(ClabjectError::TypeNotFound {
                name: target.target,
                identity: identity.to_string(),
            }),
        }
    }
}

/// A node of the type graph.
#[derive(Clone)]
pub struct Fragment {
    name: String,
    identity: Identity,
    kind: FragmentKind,
    is_template: bool,
    state: FragmentState,
    definition: Definition,
    values: Vec<ConcreteValue>,
    parents: BTreeMap<FragmentKey, Fragment>,
    associations: BTreeMap<String, TypeHandle>,
    registry: Option<Arc<dyn Registry>>,
    model_verifier: Option<Arc<dyn ModelVerifier>>,
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("is_template", &self.is_template)
            .field("state", &self.state)
            .field("definition", &self.definition)
            .field("values", &self.values)
            .field("parents", &self.parents.keys().collect::<Vec<_>>())
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Fragment`].
pub struct FragmentBuilder {
    name: String,
    identity: Identity,
    kind: FragmentKind,
    is_template: bool,
    definition: Option<Definition>,
    verifier: Option<Arc<dyn DefinitionVerifier>>,
    model_verifier: Option<Arc<dyn ModelVerifier>>,
    registry: Option<Arc<dyn Registry>>,
    values: Vec<ConcreteValue>,
}

impl FragmentBuilder {
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn template(mut self, is_template: bool) -> Self {
        self.is_template = is_template;
        self
    }

    pub fn base_model(mut self) -> Self {
        self.kind = FragmentKind::BaseModel;
        self
    }

    pub fn definition(mut self, definition: Definition) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Verifier for a fresh, empty definition.
    pub fn verifier(mut self, verifier: Arc<dyn DefinitionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn model_verifier(mut self, verifier: Arc<dyn ModelVerifier>) -> Self {
        self.model_verifier = Some(verifier);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn values(mut self, values: Vec<ConcreteValue>) -> Self {
        self.values = values;
        self
    }

    pub fn build(self) -> Result<Fragment> {
        let definition = match (self.definition, self.verifier) {
            (Some(definition), _) => definition,
            (None, Some(verifier)) => Definition::new(verifier),
            (None, None) => return Err(ClabjectError::UndefinedDefinition(self.name)),
        };
        if self.kind == FragmentKind::BaseModel
            && (!definition.rules().extension_rules().is_empty() || !self.values.is_empty())
        {
            return Err(ClabjectError::InvariantModel(self.name));
        }

        Ok(Fragment {
            name: self.name,
            identity: self.identity,
            kind: self.kind,
            is_template: self.is_template,
            state: FragmentState::Created,
            definition,
            values: self.values,
            parents: BTreeMap::new(),
            associations: BTreeMap::new(),
            registry: self.registry,
            model_verifier: self.model_verifier,
        })
    }
}

impl Fragment {
    /// A builder for a reference-identity node named `name`.
    pub fn builder(name: impl Into<String>) -> FragmentBuilder {
        FragmentBuilder {
            name: name.into(),
            identity: Identity::reference(),
            kind: FragmentKind::Node,
            is_template: false,
            definition: None,
            verifier: None,
            model_verifier: None,
            registry: None,
            values: Vec::new(),
        }
    }

    /// A reference-identity node with an empty definition.
    pub fn node(name: impl Into<String>, verifier: Arc<dyn DefinitionVerifier>) -> Self {
        Fragment {
            name: name.into(),
            identity: Identity::reference(),
            kind: FragmentKind::Node,
            is_template: false,
            state: FragmentState::Created,
            definition: Definition::new(verifier),
            values: Vec::new(),
            parents: BTreeMap::new(),
            associations: BTreeMap::new(),
            registry: None,
            model_verifier: None,
        }
    }

    /// An invariant base model with the given attribute rules.
    pub fn base_model(
        name: impl Into<String>,
        verifier: Arc<dyn DefinitionVerifier>,
        attributes: Vec<AttributeRule>,
    ) -> Result<Self> {
        let mut definition = Definition::new(verifier);
        for rule in attributes {
            definition.apply_rule(rule);
        }
        Self::builder(name).definition(definition).base_model().build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.name.clone(), self.identity.clone())
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn is_node(&self) -> bool {
        self.kind == FragmentKind::Node
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    pub fn state(&self) -> FragmentState {
        self.state
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn values(&self) -> &[ConcreteValue] {
        &self.values
    }

    /// Extension parents, alphabetically by name.
    pub fn parents(&self) -> impl Iterator<Item = &Fragment> {
        self.parents.values()
    }

    pub fn parent(&self, name: &str) -> Option<&Fragment> {
        self.parents.values().find(|parent| parent.name == name)
    }

    /// Association targets resolved by the last unfold.
    pub fn associations(&self) -> impl Iterator<Item = &TypeHandle> {
        self.associations.values()
    }

    pub fn registry(&self) -> Option<&Arc<dyn Registry>> {
        self.registry.as_ref()
    }

    pub fn attach_registry(&mut self, registry: Arc<dyn Registry>) {
        self.registry = Some(registry);
    }

    pub fn model_verifier(&self) -> Option<&Arc<dyn ModelVerifier>> {
        self.model_verifier.as_ref()
    }

    pub fn attach_model_verifier(&mut self, verifier: Arc<dyn ModelVerifier>) {
        self.model_verifier = Some(verifier);
    }

    pub fn subscribe(&mut self, observer: Observer) {
        self.definition.subscribe(observer);
    }

    pub(crate) fn require_registry(&self) -> Result<Arc<dyn Registry>> {
        self.registry
            .clone()
            .ok_or_else(|| ClabjectError::UndefinedRegistry(self.key().to_string()))
    }

    fn ensure_mutable(&self) -> Result<()> {
        match self.kind {
            FragmentKind::Node => Ok(()),
            FragmentKind::BaseModel => Err(ClabjectError::InvariantModel(self.name.clone())),
        }
    }

    // ── Rule mutation ──

    /// Apply a rule through the definition's verifier.
    ///
    /// An extension rule applied here links its parent on the next unfold;
    /// [`Fragment::extend`] links it immediately.
    pub fn apply_rule(&mut self, rule: impl Into<Rule>) -> Result<bool> {
        self.ensure_mutable()?;
        let rule = rule.into();
        rule.validate()?;
        Ok(self.definition.apply_rule(rule))
    }

    pub fn remove_rule(&mut self, rule: &Rule) -> Result<bool> {
        self.ensure_mutable()?;
        let removed = self.definition.remove_rule(rule);
        if removed && rule.kind() == RuleKind::Extension {
            self.retain_linked_parents();
        }
        Ok(removed)
    }

    pub fn remove_rule_by_id(&mut self, id: &str) -> Result<bool> {
        match self.definition.rules().find(id) {
            Some(rule) => self.remove_rule(&rule),
            None => {
                self.ensure_mutable()?;
                Ok(false)
            }
        }
    }

    /// Extend `parent`: record the extension rule and link the fragment.
    pub fn extend(&mut self, parent: Fragment) -> Result<bool> {
        self.ensure_mutable()?;
        let rule = Rule::Extension(ExtensionRule::new(
            parent.name.clone(),
            parent.identity.clone(),
        ));
        rule.validate()?;
        if !self.definition.apply_rule(rule) {
            return Ok(false);
        }
        self.parents.insert(parent.key(), parent);
        Ok(true)
    }

    pub fn bind_value(&mut self, value: ConcreteValue) -> Result<()> {
        self.ensure_mutable()?;
        self.values.retain(|existing| !existing.same_slot(&value));
        self.values.push(value);
        Ok(())
    }

    pub fn unbind_value(&mut self, id: &str) -> Result<bool> {
        self.ensure_mutable()?;
        let before = self.values.len();
        self.values.retain(|value| value.id() != id);
        Ok(self.values.len() != before)
    }

    fn extension_keys(&self) -> BTreeSet<FragmentKey> {
        self.definition
            .rules()
            .extension_rules()
            .iter()
            .map(|rule| FragmentKey::new(rule.parent_name(), rule.parent_identity().clone()))
            .collect()
    }

    fn retain_linked_parents(&mut self) {
        let linked = self.extension_keys();
        self.parents.retain(|key, _| linked.contains(key));
    }

    // ── Unfold / fold ──

    /// Resolve association targets (as reference handles) and missing
    /// extension parents from the registry, recursively through every
    /// parent. Repeat calls recompute from scratch.
    pub fn unfold(&mut self) -> BoxFuture<'_, Result<UnfoldReport>> {
        self.unfold_with(UnresolvedTargetPolicy::default())
    }

    pub fn unfold_with(
        &mut self,
        policy: UnresolvedTargetPolicy,
    ) -> BoxFuture<'_, Result<UnfoldReport>> {
        Box::pin(async move {
            let mut report = UnfoldReport::default();
            self.associations.clear();
            self.retain_linked_parents();

            let missing_parents: Vec<FragmentKey> = self
                .extension_keys()
                .into_iter()
                .filter(|key| !self.parents.contains_key(key))
                .collect();
            let association_rules: Vec<AssociationRule> =
                self.definition.rules().association_rules().to_vec();

            let registry = if missing_parents.is_empty() && association_rules.is_empty() {
                self.registry.clone()
            } else {
                Some(self.require_registry()?)
            };

            if let Some(registry) = &registry {
                for key in missing_parents {
                    match registry.get_type(&key.name, &key.identity).await? {
                        Some(handle) => {
                            self.parents.insert(key, handle.into_fragment());
                        }
                        None => report.record(
                            policy,
                            UnresolvedTarget {
                                owner: self.name.clone(),
                                target: key.name,
                                via: UnresolvedVia::Extension,
                            },
                            &key.identity,
                        )?,
                    }
                }
            }

            for parent in self.parents.values_mut() {
                if parent.registry.is_none()
                    && let Some(registry) = &registry
                {
                    parent.registry = Some(Arc::clone(registry));
                }
                report.merge(parent.unfold_with(policy).await?);
            }

            if let Some(registry) = &registry {
                let reference = Identity::reference();
                for rule in association_rules {
                    match registry.get_type(rule.target_name(), &reference).await? {
                        Some(handle) => {
                            self.associations
                                .insert(rule.target_name().to_string(), handle);
                        }
                        None => report.record(
                            policy,
                            UnresolvedTarget {
                                owner: self.name.clone(),
                                target: rule.target_name().to_string(),
                                via: UnresolvedVia::Association(
                                    rule.association_name().to_string(),
                                ),
                            },
                            &reference,
                        )?,
                    }
                }
            }

            self.state = FragmentState::Unfolded;
            Ok(report)
        })
    }

    /// Discard resolved association targets.
    pub fn fold(&mut self) {
        self.associations.clear();
        self.state = FragmentState::Folded;
    }

    // ── Fork ──

    /// Copy this fragment and its parent graph under `identity`, registering
    /// every copy. The copy is always a node; forking is the one way to turn
    /// a base model into an extensible type.
    pub fn fork<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<Fragment>> {
        Box::pin(async move {
            let registry = self.require_registry()?;

            let mut parents = BTreeMap::new();
            for parent in self.parents.values() {
                let forked = parent.fork(identity).await?;
                parents.insert(forked.key(), forked);
            }

            let mut forked = Fragment {
                name: self.name.clone(),
                identity: identity.clone(),
                kind: FragmentKind::Node,
                is_template: self.is_template,
                state: FragmentState::Created,
                definition: self.definition.fork(identity),
                values: self.values.clone(),
                parents,
                associations: BTreeMap::new(),
                registry: Some(Arc::clone(&registry)),
                model_verifier: self.model_verifier.clone(),
            };
            forked.retain_linked_parents();

            registry.set_type(&TypeHandle::new(forked.clone())).await?;
            tracing::debug!(
                target: "clabject.fragment",
                source = %self.key(),
                fork = %forked.key(),
                digest = %forked.definition.rules().shape_digest(),
                "forked fragment"
            );
            Ok(forked)
        })
    }

    // ── Graph queries ──

    /// Own name plus the closure of every parent.
    pub fn type_closure(&self) -> BTreeSet<String> {
        let mut closure = BTreeSet::from([self.name.clone()]);
        for parent in self.parents.values() {
            closure.extend(parent.type_closure());
        }
        closure
    }

    fn deep_rule_set(&self, kind: RuleKind) -> Vec<Rule> {
        let mut merged: Vec<Rule> = self
            .definition
            .rules()
            .iter()
            .filter(|rule| rule.kind() == kind)
            .collect();
        for parent in self.parents.values() {
            for rule in parent.deep_rule_set(kind) {
                if !merged.iter().any(|existing| existing.same_slot(&rule)) {
                    merged.push(rule);
                }
            }
        }
        merged
    }

    pub fn deep_attribute_rule_set(&self) -> Vec<AttributeRule> {
        self.deep_rule_set(RuleKind::Attribute)
            .into_iter()
            .filter_map(|rule| match rule {
                Rule::Attribute(rule) => Some(rule),
                _ => None,
            })
            .collect()
    }

    pub fn deep_association_rule_set(&self) -> Vec<AssociationRule> {
        self.deep_rule_set(RuleKind::Association)
            .into_iter()
            .filter_map(|rule| match rule {
                Rule::Association(rule) => Some(rule),
                _ => None,
            })
            .collect()
    }

    pub fn deep_value_set(&self) -> Vec<ConcreteValue> {
        let mut merged = self.values.clone();
        for parent in self.parents.values() {
            merge_values(&mut merged, parent.deep_value_set());
        }
        merged
    }

    /// Every integer-multiplicity association has exactly that many bound
    /// values and every attribute exactly one. Wildcard and ranged
    /// multiplicities are never concrete.
    pub fn is_concrete(&self) -> bool {
        let values = self.deep_value_set();
        let bound = |rule: &Rule| values.iter().filter(|value| value.concrete_of(rule)).count();

        let associations_concrete = self.deep_association_rule_set().into_iter().all(|rule| {
            match rule.multiplicity().exact() {
                Ok(expected) => bound(&Rule::Association(rule)) == expected as usize,
                Err(_) => false,
            }
        });
        let attributes_concrete = self
            .deep_attribute_rule_set()
            .into_iter()
            .all(|rule| bound(&Rule::Attribute(rule)) == 1);

        associations_concrete && attributes_concrete
    }

    /// Local rules accepted, model accepted, and every parent valid. All
    /// parents are visited.
    pub fn is_valid(&self) -> Result<bool> {
        let verifier = self
            .model_verifier
            .clone()
            .ok_or_else(|| ClabjectError::UndefinedVerifier(self.name.clone()))?;
        Ok(self.is_valid_with(verifier.as_ref()))
    }

    pub fn is_valid_with(&self, verifier: &dyn ModelVerifier) -> bool {
        let mut valid = self.definition.is_accepted();
        valid &= verifier.verify(&TypeHandle::new(self.clone()));
        for parent in self.parents.values() {
            valid &= parent.is_valid_with(verifier);
        }
        valid
    }

    // ── Singletons ──

    /// Whether any fragment of this name is registered under a singleton
    /// identity.
    pub async fn has_singleton(&self) -> Result<bool> {
        let registry = self.require_registry()?;
        Ok(!registry.get_singleton_types(&self.name).await?.is_empty())
    }

    /// Whether this type's own singleton instance exists.
    pub async fn has_singleton_root(&self) -> Result<bool> {
        let registry = self.require_registry()?;
        let id = derive_root_singleton_instance_id(&self.name);
        Ok(registry.get(&id).await?.is_some())
    }

    /// Replace this type's singleton instance; a new one is created only if
    /// the type is concrete.
    pub async fn update_singleton_root(&mut self) -> Result<Option<DeepInstance>> {
        let registry = self.require_registry()?;
        InstanceFactory::new(registry)
            .update_singleton_root(self)
            .await
    }
}

/// The built-in primitive base models.
pub fn builtin_base_models(verifier: Arc<dyn DefinitionVerifier>) -> Vec<Fragment> {
    BUILTIN_TYPES
        .iter()
        .map(|name| Fragment::node(*name, Arc::clone(&verifier)))
        .map(|mut fragment| {
            fragment.kind = FragmentKind::BaseModel;
            fragment
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleParseError;
    use crate::multiplicity::Multiplicity;
    use crate::verifier::{AcceptAll, HandlePredicate};

    fn node(name: &str) -> Fragment {
        Fragment::node(name, Arc::new(AcceptAll))
    }

    fn with_attributes(name: &str, attributes: &[&str]) -> Fragment {
        let mut fragment = node(name);
        for attribute in attributes {
            fragment
                .apply_rule(AttributeRule::new(*attribute, "String"))
                .expect("node accepts rules");
        }
        fragment
    }

    #[test]
    fn builder_requires_a_definition_source() {
        let err = Fragment::builder("Car").build().expect_err("no definition");
        assert!(matches!(err, ClabjectError::UndefinedDefinition(name) if name == "Car"));
    }

    #[test]
    fn unserialisable_rules_are_errors() {
        let mut car = node("Car");
        assert!(matches!(
            car.apply_rule(AttributeRule::new("a:b", "String")),
            Err(ClabjectError::RuleParse(RuleParseError::ReservedSeparator { .. }))
        ));

        let vehicle = Fragment::builder("Vehicle")
            .identity(Identity::new("run:1"))
            .verifier(Arc::new(AcceptAll))
            .build()
            .expect("node");
        assert!(matches!(
            car.extend(vehicle),
            Err(ClabjectError::RuleParse(RuleParseError::ReservedSeparator { .. }))
        ));
        assert!(car.definition().rules().is_empty());
        assert_eq!(car.parents().count(), 0);
    }

    #[test]
    fn closure_of_a_chain() {
        let c = node("C");
        let mut b = node("B");
        b.extend(c).expect("extend");
        let mut a = node("A");
        a.extend(b).expect("extend");

        let closure = a.type_closure();
        assert_eq!(
            closure,
            BTreeSet::from(["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn closure_is_diamond_safe() {
        let d = node("D");
        let mut b = node("B");
        b.extend(d.clone()).expect("extend");
        let mut c = node("C");
        c.extend(d).expect("extend");
        let mut a = node("A");
        a.extend(b).expect("extend");
        a.extend(c).expect("extend");

        assert_eq!(a.type_closure().len(), 4);
    }

    #[test]
    fn child_rules_shadow_parent_rules() {
        let vehicle = with_attributes("Vehicle", &["color", "wheels"]);
        let mut car = with_attributes("Car", &["color"]);
        let car_color = car.definition().rules().attribute_rules()[0].id().to_string();
        car.extend(vehicle).expect("extend");

        let deep = car.deep_attribute_rule_set();
        assert_eq!(deep.len(), 2);
        let color = deep.iter().find(|r| r.name() == "color").expect("color");
        assert_eq!(color.id(), car_color);
    }

    #[test]
    fn alphabetically_first_parent_wins() {
        let mut beta = node("Beta");
        beta.apply_rule(AttributeRule::new("size", "Integer"))
            .expect("rule");
        let mut alpha = node("Alpha");
        alpha
            .apply_rule(AttributeRule::new("size", "Float"))
            .expect("rule");

        let mut child = node("Child");
        child.extend(beta).expect("extend");
        child.extend(alpha).expect("extend");

        let deep = child.deep_attribute_rule_set();
        assert_eq!(deep.len(), 1);
        assert_eq!(deep[0].datatype(), "Float");
    }

    #[test]
    fn concreteness_follows_multiplicity() {
        let mut engine_slot = node("Car");
        engine_slot
            .apply_rule(AssociationRule::new("hasEngine", "Engine", Multiplicity::Exact(1)))
            .expect("rule");
        assert!(!engine_slot.is_concrete());

        engine_slot
            .bind_value(ConcreteValue::association("hasEngine", "Engine", "Engine"))
            .expect("bind");
        assert!(engine_slot.is_concrete());

        engine_slot
            .bind_value(ConcreteValue::association("hasEngine", "Engine", "V8Engine"))
            .expect("bind");
        assert!(!engine_slot.is_concrete());

        let mut wildcard = node("Garage");
        wildcard
            .apply_rule(AssociationRule::new("holds", "Car", Multiplicity::Any))
            .expect("rule");
        wildcard
            .bind_value(ConcreteValue::association("holds", "Car", "Car"))
            .expect("bind");
        assert!(!wildcard.is_concrete());
    }

    #[test]
    fn attributes_need_exactly_one_value() {
        let mut fragment = with_attributes("Vehicle", &["speed"]);
        assert!(!fragment.is_concrete());
        fragment
            .bind_value(ConcreteValue::attribute("speed", "0"))
            .expect("bind");
        assert!(fragment.is_concrete());
    }

    #[test]
    fn base_models_are_invariant() {
        let mut string = Fragment::base_model("String", Arc::new(AcceptAll), vec![])
            .expect("base model");
        assert!(!string.is_node());
        assert!(matches!(
            string.apply_rule(AttributeRule::new("length", "Integer")),
            Err(ClabjectError::InvariantModel(_))
        ));
        assert!(matches!(
            string.extend(node("Anything")),
            Err(ClabjectError::InvariantModel(_))
        ));
        assert!(matches!(
            string.bind_value(ConcreteValue::attribute("length", "1")),
            Err(ClabjectError::InvariantModel(_))
        ));
    }

    #[test]
    fn builtins_are_base_models() {
        let builtins = builtin_base_models(Arc::new(AcceptAll));
        assert_eq!(builtins.len(), BUILTIN_TYPES.len());
        assert!(builtins.iter().all(|fragment| !fragment.is_node()));
    }

    #[test]
    fn removing_an_extension_rule_unlinks_the_parent() {
        let mut car = node("Car");
        car.extend(node("Vehicle")).expect("extend");
        let rule = Rule::Extension(car.definition().rules().extension_rules()[0].clone());
        assert!(car.remove_rule(&rule).expect("node"));
        assert_eq!(car.parents().count(), 0);
        assert_eq!(car.type_closure().len(), 1);
    }

    #[test]
    fn validity_visits_every_parent() {
        let visited = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&visited);
        let verifier = HandlePredicate(move |handle: &TypeHandle| {
            sink.lock().expect("lock").push(handle.name().to_string());
            handle.name() != "A"
        });

        let mut root = node("Root");
        root.extend(node("A")).expect("extend");
        root.extend(node("B")).expect("extend");
        root.attach_model_verifier(Arc::new(verifier));

        assert!(!root.is_valid().expect("verifier attached"));
        let mut seen = visited.lock().expect("lock").clone();
        seen.sort();
        assert_eq!(seen, ["A", "B", "Root"]);
    }

    #[test]
    fn validity_requires_a_model_verifier() {
        assert!(matches!(
            node("Car").is_valid(),
            Err(ClabjectError::UndefinedVerifier(_))
        ));
    }

    #[tokio::test]
    async fn unfold_without_registry_fails_only_when_needed() {
        let mut plain = with_attributes("Vehicle", &["speed"]);
        let report = plain.unfold().await.expect("nothing to resolve");
        assert!(report.is_complete());
        assert_eq!(plain.state(), FragmentState::Unfolded);

        let mut linked = node("Car");
        linked
            .apply_rule(AssociationRule::new("hasWheel", "Wheel", Multiplicity::Exact(4)))
            .expect("rule");
        assert!(matches!(
            linked.unfold().await,
            Err(ClabjectError::UndefinedRegistry(_))
        ));
    }

    #[tokio::test]
    async fn fold_clears_state() {
        let mut fragment = node("Vehicle");
        fragment.unfold().await.expect("unfold");
        fragment.fold();
        assert_eq!(fragment.state(), FragmentState::Folded);
        assert_eq!(fragment.associations().count(), 0);
    }

    #[tokio::test]
    async fn fork_requires_registry() {
        let fragment = node("Vehicle");
        assert!(matches!(
            fragment.fork(&Identity::generate()).await,
            Err(ClabjectError::UndefinedRegistry(_))
        ));
    }
}
