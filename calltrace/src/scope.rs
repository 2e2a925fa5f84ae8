//! Instrumentation scope predicate.

use std::collections::BTreeSet;

/// Decides which functions receive instrumentation.
///
/// Unrestricted by default; narrowing to a name set turns the tracer from
/// whole-program into selective instrumentation.
#[derive(Debug, Clone, Default)]
pub struct ScopePredicate {
    allowed: Option<BTreeSet<String>>,
}

impl ScopePredicate {
    /// Scope that admits every function.
    #[must_use]
    pub fn allow_all() -> Self {
        Self { allowed: None }
    }

    /// Scope restricted to exactly the given display names.
    #[must_use]
    pub fn from_names(names: BTreeSet<String>) -> Self {
        Self { allowed: Some(names) }
    }

    #[must_use]
    pub fn matches(&self, display_name: &str) -> bool {
        match &self.allowed {
            None => true,
            Some(names) => names.contains(display_name),
        }
    }

    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.allowed.is_some()
    }

    /// Number of admitted functions, if the scope is restricted.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.allowed.as_ref().map(BTreeSet::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed.as_ref().is_some_and(BTreeSet::is_empty)
    }

    /// Iterates admitted names; empty for an unrestricted scope.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().flatten().map(String::as_str)
    }
}
