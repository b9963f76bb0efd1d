//! Type handles: the unit exchanged at the registry boundary.

use crate::fragment::Fragment;
use crate::identity::Identity;

/// A handle over exactly one fragment.
///
/// `is_static` is true for every fragment bound to a non-reference
/// identity. Handles are stateless beyond delegation and are created fresh
/// on every registry request.
#[derive(Debug, Clone)]
pub struct TypeHandle {
    fragment: Fragment,
    is_static: bool,
}

impl TypeHandle {
    pub fn new(fragment: Fragment) -> Self {
        let is_static = !fragment.identity().is_reference();
        Self {
            fragment,
            is_static,
        }
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn name(&self) -> &str {
        self.fragment.name()
    }

    pub fn identity(&self) -> &Identity {
        self.fragment.identity()
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    pub fn fragment_mut(&mut self) -> &mut Fragment {
        &mut self.fragment
    }

    pub fn into_fragment(self) -> Fragment {
        self.fragment
    }
}
