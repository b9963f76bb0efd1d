//! Deep instantiation.
//!
//! Instantiating type `T` under identity `I`:
//!
//! 1. resolve the reference fragment of `T` and unfold it
//! 2. fork the whole type graph under `I` (the fork is registered)
//! 3. derive one [`DeepInstance`] per fragment of the graph, top down,
//!    carrying the bound values of descendants into ancestors; an ancestor
//!    shared by several parents is derived once
//! 4. persist every level as one batch
//!
//! Singleton identities (`$_T`) give every level the deterministic id
//! `$_T:<level type>`; any other identity gets fresh ids per level.

use crate::config::EngineConfig;
use crate::error::{ClabjectError, Result};
use crate::fragment::{Fragment, FragmentKey};
use crate::handle::TypeHandle;
use crate::identity::{
    Identity, derive_root_singleton_instance_id, derive_singleton_instance_id, generate_token,
};
use crate::instance::DeepInstance;
use crate::registry::{KeyLease, Registry};
use crate::rule::Rule;
use crate::shape::{AssociationData, AttributeData, ExtensionData, Shape};
use crate::value::{ConcreteValue, merge_values};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct InstanceFactory {
    registry: Arc<dyn Registry>,
    config: EngineConfig,
}

impl InstanceFactory {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<dyn Registry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deep-instantiate `type_name`. Without an identity a fresh one is
    /// generated.
    pub async fn new_instance(
        &self,
        type_name: &str,
        identity: Option<Identity>,
    ) -> Result<DeepInstance> {
        let identity = identity.unwrap_or_else(Identity::generate);
        let _lease = self.singleton_lease(&identity).await?;

        let mut fragment = self.resolve_reference(type_name).await?;
        if fragment.is_template() {
            return Err(ClabjectError::TemplateInstantiationForbidden(
                type_name.to_string(),
            ));
        }
        fragment.unfold_with(self.config.unresolved_targets).await?;
        self.instantiate(&fragment, identity).await
    }

    /// Drop `fragment`'s singleton instance and, if the type is concrete,
    /// derive a fresh one from the fragment as it stands now. A concrete
    /// template is rejected before anything is dropped.
    pub async fn update_singleton_root(
        &self,
        fragment: &mut Fragment,
    ) -> Result<Option<DeepInstance>> {
        let identity = Identity::singleton(fragment.name());
        let _lease = self.singleton_lease(&identity).await?;

        if fragment.registry().is_none() {
            fragment.attach_registry(Arc::clone(&self.registry));
        }
        fragment.unfold_with(self.config.unresolved_targets).await?;

        let concrete = fragment.is_concrete();
        if concrete && fragment.is_template() {
            return Err(ClabjectError::TemplateInstantiationForbidden(
                fragment.name().to_string(),
            ));
        }

        for level in fragment.type_closure() {
            let stale = derive_singleton_instance_id(&identity, &level);
            self.registry.delete_instance(&stale).await?;
        }

        if !concrete {
            tracing::info!(
                target: "clabject.factory",
                type_name = fragment.name(),
                "singleton dropped; type is not concrete"
            );
            return Ok(None);
        }
        self.instantiate(fragment, identity).await.map(Some)
    }

    async fn singleton_lease(&self, identity: &Identity) -> Result<Option<KeyLease>> {
        if identity.is_singleton() && self.config.singleton_locking {
            Ok(Some(self.registry.lease(identity.as_str()).await?))
        } else {
            Ok(None)
        }
    }

    async fn resolve_reference(&self, type_name: &str) -> Result<Fragment> {
        let reference = Identity::reference();
        let handle = self
            .registry
            .get_type(type_name, &reference)
            .await?
            .ok_or_else(|| ClabjectError::TypeNotFound {
                name: type_name.to_string(),
                identity: reference.to_string(),
            })?;
        let mut fragment = handle.into_fragment();
        if fragment.registry().is_none() {
            fragment.attach_registry(Arc::clone(&self.registry));
        }
        Ok(fragment)
    }

    async fn instantiate(&self, fragment: &Fragment, identity: Identity) -> Result<DeepInstance> {
        let forked = fragment.fork(&identity).await?;
        let mut inherited = BTreeMap::new();
        collect_inherited(&forked, &[], &mut inherited);
        let mut derived = BTreeMap::new();
        let root = derive(&forked, &identity, &inherited, &mut derived, &self.registry);

        let levels = root.levels();
        self.registry.set_instances(&levels).await?;
        tracing::info!(
            target: "clabject.factory",
            type_name = fragment.name(),
            identity = %identity,
            root = root.instance_id(),
            levels = levels.len(),
            "deep instance created"
        );
        Ok(root)
    }
}

/// Values handed down to each fragment of the graph, keyed by fragment.
///
/// A fragment reached along several paths (a diamond) collects the values
/// of every path; earlier paths in alphabetical parent order win a slot.
/// Along one path the nearest descendant wins, and a level hands on only
/// its own values, so siblings never see each other's bindings.
fn collect_inherited(
    node: &Fragment,
    inherited: &[ConcreteValue],
    acc: &mut BTreeMap<FragmentKey, Vec<ConcreteValue>>,
) {
    merge_values(acc.entry(node.key()).or_default(), inherited.iter().cloned());

    let mut handed_down = inherited.to_vec();
    merge_values(&mut handed_down, node.values().iter().cloned());
    for parent in node.parents() {
        collect_inherited(parent, &handed_down, acc);
    }
}

/// Derive the instance level for `node` and, recursively, for its parents.
///
/// Each fragment is derived once; a shared ancestor is reused so every
/// child links the same level.
fn derive(
    node: &Fragment,
    identity: &Identity,
    inherited: &BTreeMap<FragmentKey, Vec<ConcreteValue>>,
    derived: &mut BTreeMap<FragmentKey, DeepInstance>,
    registry: &Arc<dyn Registry>,
) -> DeepInstance {
    if let Some(level) = derived.get(&node.key()) {
        return level.clone();
    }

    let instance_id = if identity.is_singleton() {
        derive_singleton_instance_id(identity, node.name())
    } else {
        generate_token()
    };

    let mut effective = inherited.get(&node.key()).cloned().unwrap_or_default();
    merge_values(&mut effective, node.deep_value_set());

    let mut shape = Shape::default();
    for rule in node.definition().rules().attribute_rules() {
        let slot = Rule::Attribute(rule.clone());
        let bound = effective
            .iter()
            .find(|value| value.concrete_of(&slot))
            .and_then(|value| match value {
                ConcreteValue::Attribute { value, .. } => Some(value.clone()),
                ConcreteValue::Association { .. } => None,
            });
        shape.attributes.push(match bound {
            Some(value) => AttributeData::bound(&instance_id, rule.name(), value),
            None => AttributeData::placeholder(&instance_id, rule.name()),
        });
    }

    for rule in node.definition().rules().association_rules() {
        let slot = Rule::Association(rule.clone());
        for value in effective.iter().filter(|value| value.concrete_of(&slot)) {
            if let ConcreteValue::Association { target, .. } = value {
                shape.associations.push(AssociationData {
                    id: generate_token(),
                    instance_id: instance_id.clone(),
                    relation: rule.association_name().to_string(),
                    target_instance_id: derive_root_singleton_instance_id(target),
                    is_final: true,
                });
            }
        }
    }

    let mut parents = BTreeMap::new();
    for parent in node.parents() {
        let level = derive(parent, identity, inherited, derived, registry);
        shape.extensions.push(ExtensionData {
            id: generate_token(),
            instance_id: instance_id.clone(),
            parent_instance_id: level.instance_id().to_string(),
            parent_type_name: parent.name().to_string(),
        });
        parents.insert(parent.name().to_string(), level);
    }

    let level = DeepInstance::new(
        instance_id,
        identity.clone(),
        TypeHandle::new(node.clone()),
        shape,
        Some(Arc::clone(registry)),
    )
    .with_parents(parents);
    derived.insert(node.key(), level.clone());
    level
}
