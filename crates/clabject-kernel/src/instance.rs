//! Deep instances: runtime objects spanning every level of a type graph.
//!
//! One deep instantiation yields one `DeepInstance` per fragment level, all
//! sharing the run identity. Levels are linked through [`ExtensionData`]
//! rows; `unfold` materializes those links into in-memory parents via the
//! registry, `fold` drops them again.
//!
//! [`ExtensionData`]: crate::shape::ExtensionData

use crate::config::UnresolvedTargetPolicy;
use crate::error::{ClabjectError, Result};
use crate::fragment::{UnfoldReport, UnresolvedTarget, UnresolvedVia};
use crate::handle::TypeHandle;
use crate::identity::{Identity, generate_token};
use crate::registry::Registry;
use crate::shape::{AssociationData, AttributeData, Shape};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeepInstance {
    instance_id: String,
    identity: Identity,
    type_handle: TypeHandle,
    shape: Shape,
    parents: BTreeMap<String, DeepInstance>,
    registry: Option<Arc<dyn Registry>>,
}

impl fmt::Debug for DeepInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepInstance")
            .field("instance_id", &self.instance_id)
            .field("identity", &self.identity)
            .field("type_name", &self.type_name())
            .field("shape", &self.shape)
            .field("parents", &self.parents.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DeepInstance {
    /// A folded instance level, as a registry reconstructs it.
    pub fn new(
        instance_id: impl Into<String>,
        identity: Identity,
        type_handle: TypeHandle,
        shape: Shape,
        registry: Option<Arc<dyn Registry>>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            identity,
            type_handle,
            shape,
            parents: BTreeMap::new(),
            registry,
        }
    }

    pub(crate) fn with_parents(mut self, parents: BTreeMap<String, DeepInstance>) -> Self {
        self.parents = parents;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn type_name(&self) -> &str {
        self.type_handle.name()
    }

    pub fn type_handle(&self) -> &TypeHandle {
        &self.type_handle
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Unfolded parent levels, alphabetically by type name.
    pub fn parents(&self) -> impl Iterator<Item = &DeepInstance> {
        self.parents.values()
    }

    pub fn parent(&self, type_name: &str) -> Option<&DeepInstance> {
        self.parents.get(type_name)
    }

    pub fn attach_registry(&mut self, registry: Arc<dyn Registry>) {
        self.registry = Some(registry);
    }

    /// This level followed by every unfolded parent level, depth first.
    /// A level reachable along several paths is listed once.
    pub fn levels(&self) -> Vec<&DeepInstance> {
        let mut seen = BTreeSet::new();
        let mut levels = Vec::new();
        self.collect_levels(&mut seen, &mut levels);
        levels
    }

    fn collect_levels<'a>(
        &'a self,
        seen: &mut BTreeSet<&'a str>,
        levels: &mut Vec<&'a DeepInstance>,
    ) {
        if !seen.insert(self.instance_id.as_str()) {
            return;
        }
        levels.push(self);
        for parent in self.parents.values() {
            parent.collect_levels(seen, levels);
        }
    }

    // ── Unfold / fold ──

    /// Load the parent levels named by this level's extension rows,
    /// recursively. The type fragment of every level is unfolded along the
    /// way, so inherited rules count toward [`is_concrete`](Self::is_concrete).
    pub fn unfold(&mut self) -> BoxFuture<'_, Result<UnfoldReport>> {
        self.unfold_with(UnresolvedTargetPolicy::default())
    }

    pub fn unfold_with(
        &mut self,
        policy: UnresolvedTargetPolicy,
    ) -> BoxFuture<'_, Result<UnfoldReport>> {
        Box::pin(async move {
            let mut report = UnfoldReport::default();
            self.parents.clear();
            let fragment = self.type_handle.fragment_mut();
            if fragment.registry().is_none()
                && let Some(registry) = &self.registry
            {
                fragment.attach_registry(Arc::clone(registry));
            }
            report.merge(fragment.unfold_with(policy).await?);
            if self.shape.extensions.is_empty() {
                return Ok(report);
            }

            let registry = self
                .registry
                .clone()
                .ok_or_else(|| ClabjectError::UndefinedRegistry(self.instance_id.clone()))?;
            for link in self.shape.extensions.clone() {
                match registry.get(&link.parent_instance_id).await? {
                    Some(mut parent) => {
                        if parent.registry.is_none() {
                            parent.registry = Some(Arc::clone(&registry));
                        }
                        report.merge(parent.unfold_with(policy).await?);
                        self.parents.insert(parent.type_name().to_string(), parent);
                    }
                    None => report.record(
                        policy,
                        UnresolvedTarget {
                            owner: self.instance_id.clone(),
                            target: link.parent_instance_id,
                            via: UnresolvedVia::ExtensionInstance,
                        },
                        &self.identity,
                    )?,
                }
            }
            Ok(report)
        })
    }

    pub fn fold(&mut self) {
        self.parents.clear();
    }

    /// Persist this level and every unfolded parent level.
    pub fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let registry = self
                .registry
                .clone()
                .ok_or_else(|| ClabjectError::UndefinedRegistry(self.instance_id.clone()))?;
            registry.set_instance(self).await?;
            for parent in self.parents.values() {
                parent.commit().await?;
            }
            tracing::debug!(
                target: "clabject.instance",
                instance = %self.instance_id,
                type_name = %self.type_name(),
                "committed instance"
            );
            Ok(())
        })
    }

    // ── Attribute views ──

    pub fn attribute_map(&self) -> BTreeMap<String, AttributeData> {
        self.shape.attribute_map()
    }

    /// Attributes across every unfolded level. This level wins; among
    /// parents the alphabetically first type name wins.
    pub fn deep_attribute_map(&self) -> BTreeMap<String, AttributeData> {
        let mut map = self.attribute_map();
        for parent in self.parents.values() {
            for (key, row) in parent.deep_attribute_map() {
                map.entry(key).or_insert(row);
            }
        }
        map
    }

    /// Set a non-final attribute of this level.
    pub fn assign_value(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let instance_id = self.instance_id.clone();
        let row = self
            .shape
            .attribute_mut(key)
            .ok_or_else(|| ClabjectError::UnknownAttribute {
                key: key.to_string(),
                instance_id: instance_id.clone(),
            })?;
        if row.is_final {
            return Err(ClabjectError::FinalAttribute {
                key: key.to_string(),
                instance_id,
            });
        }
        row.value = Some(value.into());
        Ok(())
    }

    /// Set a non-final attribute on whichever level owns it, following
    /// [`deep_attribute_map`](Self::deep_attribute_map) precedence.
    pub fn assign_deep_value(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        if self.shape.attributes.iter().any(|row| row.key == key) {
            return self.assign_value(key, value);
        }
        for parent in self.parents.values_mut() {
            if parent.deep_attribute_map().contains_key(key) {
                return parent.assign_deep_value(key, value);
            }
        }
        Err(ClabjectError::UnknownAttribute {
            key: key.to_string(),
            instance_id: self.instance_id.clone(),
        })
    }

    // ── Association views ──

    /// Relation name to allowed target type names, from this level's type.
    pub fn association_rule_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for rule in self
            .type_handle
            .fragment()
            .definition()
            .rules()
            .association_rules()
        {
            map.entry(rule.association_name().to_string())
                .or_default()
                .insert(rule.target_name().to_string());
        }
        map
    }

    /// Union of allowed targets across every unfolded level.
    pub fn deep_association_rule_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut map = self.association_rule_map();
        for parent in self.parents.values() {
            for (relation, targets) in parent.deep_association_rule_map() {
                map.entry(relation).or_default().extend(targets);
            }
        }
        map
    }

    /// Type names of this level and every unfolded parent level.
    pub fn type_closure(&self) -> BTreeSet<String> {
        let mut closure = BTreeSet::from([self.type_name().to_string()]);
        for parent in self.parents.values() {
            closure.extend(parent.type_closure());
        }
        closure
    }

    /// The level of this instance whose type is `type_name`. Parents are
    /// searched alphabetically; the first match wins.
    pub fn get_polymorph_subtype(&self, type_name: &str) -> Option<&DeepInstance> {
        if self.type_name() == type_name {
            return Some(self);
        }
        self.parents
            .values()
            .find_map(|parent| parent.get_polymorph_subtype(type_name))
    }

    /// Link `target`, viewed as `associate_as`, through `by_relation`.
    /// Returns the id of the new association row.
    pub fn associate(
        &mut self,
        target: &DeepInstance,
        associate_as: &str,
        by_relation: &str,
    ) -> Result<String> {
        let not_in_closure = || ClabjectError::TypeNotInClosure {
            type_name: associate_as.to_string(),
            instance_id: target.instance_id.clone(),
        };

        let closure = target.type_closure();
        if !closure.contains(associate_as) {
            return Err(not_in_closure());
        }
        let allowed = self
            .deep_association_rule_map()
            .remove(by_relation)
            .unwrap_or_default();
        if allowed.is_disjoint(&closure) {
            return Err(ClabjectError::AssociationNotAllowed {
                relation: by_relation.to_string(),
                target: target.type_name().to_string(),
            });
        }
        let level = target
            .get_polymorph_subtype(associate_as)
            .ok_or_else(not_in_closure)?;

        let row = AssociationData {
            id: generate_token(),
            instance_id: self.instance_id.clone(),
            relation: by_relation.to_string(),
            target_instance_id: level.instance_id.clone(),
            is_final: false,
        };
        let id = row.id.clone();
        tracing::debug!(
            target: "clabject.instance",
            instance = %self.instance_id,
            relation = by_relation,
            target_instance = %row.target_instance_id,
            "associated instance"
        );
        self.shape.associations.push(row);
        Ok(id)
    }

    /// Remove the association row `id` from this level and every unfolded
    /// parent level.
    pub fn remove_association(&mut self, id: &str) -> bool {
        let mut removed = self.shape.remove_association(id);
        for parent in self.parents.values_mut() {
            removed |= parent.remove_association(id);
        }
        removed
    }

    /// Concreteness of the instance's type.
    pub fn is_concrete(&self) -> bool {
        self.type_handle.fragment().is_concrete()
    }
}
