//! Definitions: verifier-gated rule sets.
//!
//! A definition is owned by exactly one fragment and is the unit of model
//! evolution. Its only mutators are [`Definition::apply_rule`] and
//! [`Definition::remove_rule`]; each builds the candidate rule set, asks the
//! verifier, and commits only on acceptance. A rejected mutation changes
//! nothing and notifies nobody.

use crate::digest::ShapeDigest;
use crate::error::{ClabjectError, Result};
use crate::identity::{Identity, generate_token};
use crate::rule::{AssociationRule, AttributeRule, ExtensionRule, Rule, RuleKind};
use crate::verifier::DefinitionVerifier;
use std::fmt;
use std::sync::Arc;

/// Disjoint attribute, association and extension rule subsets.
///
/// Each subset keeps insertion order and holds at most one rule per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    attributes: Vec<AttributeRule>,
    associations: Vec<AssociationRule>,
    extensions: Vec<ExtensionRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute_rules(&self) -> &[AttributeRule] {
        &self.attributes
    }

    pub fn association_rules(&self) -> &[AssociationRule] {
        &self.associations
    }

    pub fn extension_rules(&self) -> &[ExtensionRule] {
        &self.extensions
    }

    pub fn len(&self) -> usize {
        self.attributes.len() + self.associations.len() + self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rules, attributes first, then associations, then extensions.
    pub fn iter(&self) -> impl Iterator<Item = Rule> + '_ {
        self.attributes
            .iter()
            .cloned()
            .map(Rule::Attribute)
            .chain(self.associations.iter().cloned().map(Rule::Association))
            .chain(self.extensions.iter().cloned().map(Rule::Extension))
    }

    pub fn find(&self, id: &str) -> Option<Rule> {
        self.iter().find(|rule| rule.id() == id)
    }

    /// The candidate set after adding `rule`; replaces a rule with the same
    /// id or the same slot.
    pub fn with(&self, rule: Rule) -> RuleSet {
        let mut next = self.clone();
        next.retain(|existing| !replaces(&rule, existing));
        match rule {
            Rule::Attribute(r) => next.attributes.push(r),
            Rule::Association(r) => next.associations.push(r),
            Rule::Extension(r) => next.extensions.push(r),
        }
        next
    }

    /// The candidate set after removing `rule`, or `None` when absent.
    ///
    /// Known ids match by id; rules without one match by slot.
    pub fn without(&self, rule: &Rule) -> Option<RuleSet> {
        let mut next = self.clone();
        next.retain(|existing| !matches_for_removal(rule, existing));
        (next.len() != self.len()).then_some(next)
    }

    /// Digest over the sorted slot keys.
    pub fn shape_digest(&self) -> ShapeDigest {
        let mut keys: Vec<String> = self.iter().map(|rule| rule.slot_key().to_string()).collect();
        keys.sort();
        keys.iter()
            .fold(ShapeDigest::builder(), |builder, key| builder.field("slot", key))
            .finish()
    }

    fn retain(&mut self, keep: impl Fn(&Rule) -> bool) {
        self.attributes.retain(|r| keep(&Rule::Attribute(r.clone())));
        self.associations.retain(|r| keep(&Rule::Association(r.clone())));
        self.extensions.retain(|r| keep(&Rule::Extension(r.clone())));
    }
}

fn replaces(incoming: &Rule, existing: &Rule) -> bool {
    (incoming.has_known_id() && incoming.id() == existing.id()) || incoming.same_slot(existing)
}

fn matches_for_removal(target: &Rule, existing: &Rule) -> bool {
    if target.has_known_id() {
        target.id() == existing.id()
    } else {
        target.same_slot(existing)
    }
}

/// A committed change, delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionEvent {
    Applied(Rule),
    Removed(Rule),
}

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked after every committed mutation.
pub type Observer = Arc<dyn Fn(&DefinitionEvent) -> Result<(), ObserverError> + Send + Sync>;

/// A verifier-gated mutable rule set.
#[derive(Clone)]
pub struct Definition {
    rules: RuleSet,
    verifier: Arc<dyn DefinitionVerifier>,
    observers: Vec<Observer>,
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("rules", &self.rules)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Definition {
    pub fn new(verifier: Arc<dyn DefinitionVerifier>) -> Self {
        Self {
            rules: RuleSet::new(),
            verifier,
            observers: Vec::new(),
        }
    }

    /// Rebuild a stored definition. Stored rules were accepted when they
    /// were written, so the verifier is not consulted again.
    pub fn restore(rules: RuleSet, verifier: Arc<dyn DefinitionVerifier>) -> Self {
        Self {
            rules,
            verifier,
            observers: Vec::new(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn verifier(&self) -> &Arc<dyn DefinitionVerifier> {
        &self.verifier
    }

    /// Rules of one kind. Constraint and behaviour rules are unsupported.
    pub fn rules_of(&self, kind: RuleKind) -> Result<Vec<Rule>> {
        if !kind.is_supported() {
            return Err(ClabjectError::UnsupportedRuleKind(kind.to_string()));
        }
        Ok(self.rules.iter().filter(|rule| rule.kind() == kind).collect())
    }

    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    /// Whether the verifier accepts the current rule set.
    pub fn is_accepted(&self) -> bool {
        self.verifier.verify(&self.rules)
    }

    /// Add (or replace) a rule. Returns whether the verifier accepted it;
    /// a rule that fails [`Rule::validate`] is never offered to it.
    pub fn apply_rule(&mut self, rule: impl Into<Rule>) -> bool {
        let mut rule = rule.into();
        if !rule.has_known_id() {
            rule = rule.with_id(generate_token());
        }

        if let Err(error) = rule.validate() {
            tracing::warn!(
                target: "clabject.definition",
                %error,
                "refusing rule that would not parse back"
            );
            return false;
        }

        let candidate = self.rules.with(rule.clone());
        if !self.verifier.verify(&candidate) {
            tracing::debug!(
                target: "clabject.definition",
                rule = %rule.serialise(),
                "verifier rejected rule"
            );
            return false;
        }

        self.rules = candidate;
        self.notify(&DefinitionEvent::Applied(rule));
        true
    }

    /// Remove a rule. Returns whether a rule was removed.
    pub fn remove_rule(&mut self, rule: &Rule) -> bool {
        let Some(candidate) = self.rules.without(rule) else {
            return false;
        };
        if !self.verifier.verify(&candidate) {
            tracing::debug!(
                target: "clabject.definition",
                rule = %rule.serialise(),
                "verifier rejected rule removal"
            );
            return false;
        }

        self.rules = candidate;
        self.notify(&DefinitionEvent::Removed(rule.clone()));
        true
    }

    pub fn remove_rule_by_id(&mut self, id: &str) -> bool {
        match self.rules.find(id) {
            Some(rule) => self.remove_rule(&rule),
            None => false,
        }
    }

    /// Copy every rule under `identity` into a new definition that shares
    /// this definition's verifier. Observers are not carried over.
    pub fn fork(&self, identity: &Identity) -> Definition {
        let mut forked = Definition::new(Arc::clone(&self.verifier));
        for rule in self.rules.iter() {
            forked.apply_rule(rule.fork(identity));
        }
        forked
    }

    fn notify(&self, event: &DefinitionEvent) {
        for observer in &self.observers {
            if let Err(error) = observer(event) {
                tracing::warn!(
                    target: "clabject.definition",
                    %error,
                    "definition observer failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplicity::Multiplicity;
    use crate::rule::UNKNOWN_ID;
    use crate::verifier::{AcceptAll, RuleSetPredicate};
    use std::sync::Mutex;

    fn accept_all() -> Definition {
        Definition::new(Arc::new(AcceptAll))
    }

    fn at_most_attributes(n: usize) -> Definition {
        Definition::new(Arc::new(RuleSetPredicate(move |rules: &RuleSet| {
            rules.attribute_rules().len() <= n
        })))
    }

    #[test]
    fn apply_assigns_ids() {
        let mut def = accept_all();
        assert!(def.apply_rule(AttributeRule::new("color", "String")));
        let rule = &def.rules().attribute_rules()[0];
        assert_ne!(rule.id(), UNKNOWN_ID);
    }

    #[test]
    fn rules_that_would_not_parse_back_are_refused() {
        let mut def = accept_all();
        assert!(!def.apply_rule(AttributeRule::new("a:b", "String")));
        assert!(!def.apply_rule(ExtensionRule::new("Vehicle", Identity::new("x:y"))));
        assert!(def.rules().is_empty());

        assert!(def.apply_rule(AttributeRule::new("color", "String")));
        let stored = def.rules().attribute_rules()[0].serialise();
        assert_eq!(
            AttributeRule::parse(&stored).expect("stored rule parses"),
            def.rules().attribute_rules()[0]
        );
    }

    #[test]
    fn reapplying_a_slot_replaces_it() {
        let mut def = accept_all();
        def.apply_rule(AttributeRule::new("color", "String"));
        def.apply_rule(AttributeRule::new("color", "Integer"));
        assert_eq!(def.rules().attribute_rules().len(), 1);
        assert_eq!(def.rules().attribute_rules()[0].datatype(), "Integer");
    }

    #[test]
    fn verifier_rejection_is_a_silent_no_op() {
        let mut def = at_most_attributes(2);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        def.subscribe(Arc::new(move |event: &DefinitionEvent| -> Result<(), ObserverError> {
            sink.lock().expect("observer lock").push(event.clone());
            Ok(())
        }));

        assert!(def.apply_rule(AttributeRule::new("a", "String")));
        assert!(def.apply_rule(AttributeRule::new("b", "String")));
        let before = def.rules().clone();

        assert!(!def.apply_rule(AttributeRule::new("c", "String")));
        assert_eq!(def.rules(), &before);
        assert_eq!(events.lock().expect("observer lock").len(), 2);
    }

    #[test]
    fn failing_observer_does_not_unwind_or_block_others() {
        let mut def = accept_all();
        let count = Arc::new(Mutex::new(0usize));
        def.subscribe(Arc::new(|_: &DefinitionEvent| -> Result<(), ObserverError> {
            Err("boom".into())
        }));
        let sink = Arc::clone(&count);
        def.subscribe(Arc::new(move |_: &DefinitionEvent| -> Result<(), ObserverError> {
            *sink.lock().expect("observer lock") += 1;
            Ok(())
        }));

        assert!(def.apply_rule(AttributeRule::new("color", "String")));
        assert_eq!(def.rules().len(), 1);
        assert_eq!(*count.lock().expect("observer lock"), 1);
    }

    #[test]
    fn remove_by_id_and_missing_id() {
        let mut def = accept_all();
        def.apply_rule(AssociationRule::new("hasWheel", "Wheel", Multiplicity::Exact(4)));
        let id = def.rules().association_rules()[0].id().to_string();

        assert!(!def.remove_rule_by_id("missing"));
        assert!(def.remove_rule_by_id(&id));
        assert!(def.rules().is_empty());
    }

    #[test]
    fn removal_is_gated_too() {
        let mut def = Definition::new(Arc::new(RuleSetPredicate(|rules: &RuleSet| {
            !rules.attribute_rules().is_empty()
        })));
        assert!(def.apply_rule(AttributeRule::new("color", "String")));
        let rule = Rule::Attribute(def.rules().attribute_rules()[0].clone());
        assert!(!def.remove_rule(&rule));
        assert_eq!(def.rules().len(), 1);
    }

    #[test]
    fn fork_preserves_shape_and_rewrites_extension_identity() {
        let mut def = accept_all();
        def.apply_rule(AttributeRule::new("color", "String"));
        def.apply_rule(AssociationRule::new("hasWheel", "Wheel", Multiplicity::Exact(4)));
        def.apply_rule(ExtensionRule::new("Vehicle", Identity::reference()));
        let source = def.rules().clone();

        let run = Identity::new("run-1");
        let forked = def.fork(&run);

        assert_eq!(def.rules(), &source);
        assert_eq!(forked.rules().len(), source.len());
        for (original, copy) in source.iter().zip(forked.rules().iter()) {
            assert!(original.same_slot(&copy));
            assert_ne!(original.id(), copy.id());
        }
        assert_eq!(forked.rules().extension_rules()[0].parent_identity(), &run);
        assert_eq!(forked.rules().shape_digest(), source.shape_digest());
    }

    #[test]
    fn constraint_rules_are_unsupported() {
        let def = accept_all();
        assert!(def.rules_of(RuleKind::Attribute).is_ok());
        assert!(matches!(
            def.rules_of(RuleKind::Behaviour),
            Err(ClabjectError::UnsupportedRuleKind(kind)) if kind == "behaviour"
        ));
    }
}
