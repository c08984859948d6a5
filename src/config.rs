//! Configuration for schema compilation, resolution and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::schema::AssertionKind;

/// Complete configuration of a validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub compiler: CompilerOptions,
    pub resolver: ResolverConfig,
    pub validation: ValidationSettings,
}

/// Options applied when compiling profiles into schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Accept instance members that no element definition declares
    pub allow_unknown_elements: bool,
}

impl CompilerOptions {
    pub fn with_unknown_elements_allowed(mut self, allowed: bool) -> Self {
        self.allow_unknown_elements = allowed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of compiled schemas kept in the cache
    pub cache_capacity: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1_000,
        }
    }
}

/// How a failed AnyOf picks the candidate it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnyOfTieBreak {
    /// Candidate with the fewest issues, ties broken by declaration order
    #[default]
    FewestIssues,
    /// Always the first declared candidate
    FirstCandidate,
}

/// Per-call validation settings. Changing them never requires recompiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Assertion kinds that are skipped entirely
    pub excluded_assertions: HashSet<AssertionKind>,
    /// Invariant keys that are skipped (e.g. `ele-1`)
    pub excluded_invariants: HashSet<String>,
    /// Maximum number of nested schema references
    pub max_depth: usize,
    pub warnings_as_errors: bool,
    pub any_of_tie_break: AnyOfTieBreak,
    /// Regex constraints must match the whole value
    pub implicit_regex_anchoring: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            excluded_assertions: HashSet::new(),
            excluded_invariants: HashSet::new(),
            max_depth: 64,
            warnings_as_errors: false,
            any_of_tie_break: AnyOfTieBreak::FewestIssues,
            implicit_regex_anchoring: true,
        }
    }
}

impl ValidationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_excluded_assertion(mut self, kind: AssertionKind) -> Self {
        self.excluded_assertions.insert(kind);
        self
    }

    pub fn with_excluded_invariant(mut self, key: impl Into<String>) -> Self {
        self.excluded_invariants.insert(key.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    pub fn with_any_of_tie_break(mut self, tie_break: AnyOfTieBreak) -> Self {
        self.any_of_tie_break = tie_break;
        self
    }

    pub fn with_implicit_regex_anchoring(mut self, enabled: bool) -> Self {
        self.implicit_regex_anchoring = enabled;
        self
    }

    pub fn is_excluded(&self, kind: AssertionKind) -> bool {
        self.excluded_assertions.contains(&kind)
    }

    pub fn is_invariant_excluded(&self, key: &str) -> bool {
        self.excluded_invariants.contains(key)
    }
}
