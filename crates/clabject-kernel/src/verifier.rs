//! Verifier boundary: pluggable acceptance policies.
//!
//! Both verifiers are pure, synchronous predicates. A `DefinitionVerifier`
//! gates every rule mutation on the *resulting* rule set; a `ModelVerifier`
//! judges a whole fragment through its type handle.

use crate::definition::RuleSet;
use crate::handle::TypeHandle;

pub trait DefinitionVerifier: Send + Sync {
    fn verify(&self, rules: &RuleSet) -> bool;
}

pub trait ModelVerifier: Send + Sync {
    fn verify(&self, handle: &TypeHandle) -> bool;
}

/// Accepts every rule set and every model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl DefinitionVerifier for AcceptAll {
    fn verify(&self, _rules: &RuleSet) -> bool {
        true
    }
}

impl ModelVerifier for AcceptAll {
    fn verify(&self, _handle: &TypeHandle) -> bool {
        true
    }
}

/// Adapter turning a closure into a definition verifier.
pub struct RuleSetPredicate<F>(pub F);

impl<F> DefinitionVerifier for RuleSetPredicate<F>
where
    F: Fn(&RuleSet) -> bool + Send + Sync,
{
    fn verify(&self, rules: &RuleSet) -> bool {
        (self.0)(rules)
    }
}

/// Adapter turning a closure into a model verifier.
pub struct HandlePredicate<F>(pub F);

impl<F> ModelVerifier for HandlePredicate<F>
where
    F: Fn(&TypeHandle) -> bool + Send + Sync,
{
    fn verify(&self, handle: &TypeHandle) -> bool {
        (self.0)(handle)
    }
}
