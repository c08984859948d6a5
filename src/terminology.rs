//! Terminology capability used by binding assertions.
//!
//! The validator never talks to a terminology server directly. It calls a
//! [`TerminologyService`] for every code it extracts from a bound element and
//! maps the answer to an issue severity according to the binding strength.
//!
//! - [`CachedTerminologyService`] wraps any service with a moka TTL cache
//! - [`InMemoryTerminologyService`] holds value sets in memory (tests, small setups)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_fhirprofile::ProfileValidatorBuilder;
//! use octofhir_fhirprofile::terminology::{CachedTerminologyService, TerminologyCacheConfig};
//!
//! let cached = CachedTerminologyService::new(Arc::new(remote), TerminologyCacheConfig::default());
//! let validator = ProfileValidatorBuilder::new()
//!     .with_source(Arc::new(source))
//!     .with_terminology(Arc::new(cached))
//!     .build()?;
//! ```

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error codes for terminology lookups (rendered as `VS####`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminologyErrorCode {
    ValueSetNotFound = 1001,
    CodeNotInValueSet = 1002,
    ServiceUnavailable = 1008,
    InvalidCodeFormat = 1009,
}

impl std::fmt::Display for TerminologyErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VS{:04}", *self as u32)
    }
}

/// Errors a terminology service may return
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TerminologyError {
    #[error("Value set not found: {url}")]
    ValueSetNotFound { url: String },

    #[error("Invalid code format: {code}")]
    InvalidCodeFormat { code: String },

    #[error("Terminology service unavailable: {message}")]
    ServiceUnavailable { message: String },
}

impl TerminologyError {
    pub fn code(&self) -> TerminologyErrorCode {
        match self {
            TerminologyError::ValueSetNotFound { .. } => TerminologyErrorCode::ValueSetNotFound,
            TerminologyError::InvalidCodeFormat { .. } => TerminologyErrorCode::InvalidCodeFormat,
            TerminologyError::ServiceUnavailable { .. } => {
                TerminologyErrorCode::ServiceUnavailable
            }
        }
    }
}

pub type TerminologyResult<T> = Result<T, TerminologyError>;

/// Answer of a code lookup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeValidationResult {
    pub valid: bool,
    pub display: Option<String>,
    /// Advisory message returned alongside a valid answer
    pub warning: Option<String>,
    /// Explanation returned with an invalid answer
    pub message: Option<String>,
}

impl CodeValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn valid_with_display(display: impl Into<String>) -> Self {
        Self {
            valid: true,
            display: Some(display.into()),
            ..Default::default()
        }
    }

    /// Valid, with an advisory the validator reports as a warning.
    pub fn valid_with_warning(warning: impl Into<String>) -> Self {
        Self {
            valid: true,
            warning: Some(warning.into()),
            ..Default::default()
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn invalid_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Code validation capability.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Check whether `code` (optionally from `system`) is a member of the value set.
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult>;
}

/// FHIR binding strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "required" => Some(BindingStrength::Required),
            "extensible" => Some(BindingStrength::Extensible),
            "preferred" => Some(BindingStrength::Preferred),
            "example" => Some(BindingStrength::Example),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
        }
    }

    /// A miss at this strength is an error
    pub fn is_error_on_failure(self) -> bool {
        matches!(self, BindingStrength::Required)
    }

    /// A miss at this strength is a warning
    pub fn is_warning_on_failure(self) -> bool {
        matches!(self, BindingStrength::Extensible | BindingStrength::Preferred)
    }
}

/// A code extracted from a bound instance value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    pub code: String,
    pub system: Option<String>,
}

/// Extract codes from a `code`, `Coding` or `CodeableConcept` value.
///
/// Returns an empty list for values that carry no code (e.g. a
/// CodeableConcept with text only).
pub fn extract_codes(value: &JsonValue) -> Vec<ExtractedCode> {
    match value {
        JsonValue::String(code) => vec![ExtractedCode {
            code: code.clone(),
            system: None,
        }],
        JsonValue::Object(object) => {
            if let Some(codings) = object.get("coding").and_then(|c| c.as_array()) {
                return codings.iter().flat_map(extract_codes).collect();
            }
            let Some(code) = object.get("code").and_then(|c| c.as_str()) else {
                return Vec::new();
            };
            vec![ExtractedCode {
                code: code.to_string(),
                system: object
                    .get("system")
                    .and_then(|s| s.as_str())
                    .map(str::to_string),
            }]
        }
        _ => Vec::new(),
    }
}

/// Terminology cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminologyCacheConfig {
    pub ttl: Duration,
    pub max_size: u64,
}

impl Default for TerminologyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_size: 10_000,
        }
    }
}

impl TerminologyCacheConfig {
    pub fn new(ttl: Duration, max_size: u64) -> Self {
        Self { ttl, max_size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LookupKey {
    value_set_url: String,
    code: String,
    system: Option<String>,
}

/// Caching decorator over a [`TerminologyService`].
///
/// Only successful answers are cached; errors always reach the inner service
/// again on the next lookup.
pub struct CachedTerminologyService {
    inner: Arc<dyn TerminologyService>,
    cache: Cache<LookupKey, CodeValidationResult>,
}

impl CachedTerminologyService {
    pub fn new(inner: Arc<dyn TerminologyService>, config: TerminologyCacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_size)
            .build();
        Self { inner, cache }
    }

    /// Number of cached answers (approximate until pending tasks run)
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Flush the cache's pending maintenance so `entry_count` is exact.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl TerminologyService for CachedTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let key = LookupKey {
            value_set_url: value_set_url.to_string(),
            code: code.to_string(),
            system: system.map(str::to_string),
        };

        if let Some(result) = self.cache.get(&key).await {
            return Ok(result);
        }

        let result = self
            .inner
            .validate_code(value_set_url, code, system)
            .await?;
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }
}

/// (code, system) -> display
type CodeTable = std::collections::HashMap<(String, Option<String>), Option<String>>;

/// In-memory value sets.
///
/// A code registered without a system matches lookups with any system, and a
/// lookup without a system matches a code registered under any system.
#[derive(Default)]
pub struct InMemoryTerminologyService {
    value_sets: papaya::HashMap<String, CodeTable>,
}

impl InMemoryTerminologyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code to a value set (creating the value set if needed)
    pub fn add_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
        display: Option<&str>,
    ) {
        let guard = self.value_sets.pin();
        let mut table = guard.get(value_set_url).cloned().unwrap_or_default();
        table.insert(
            (code.to_string(), system.map(str::to_string)),
            display.map(str::to_string),
        );
        guard.insert(value_set_url.to_string(), table);
    }

    /// Builder-style variant of [`add_code`](Self::add_code) for codes without display
    pub fn with_codes(self, value_set_url: &str, codes: &[(&str, Option<&str>)]) -> Self {
        for (code, system) in codes {
            self.add_code(value_set_url, code, *system, None);
        }
        self
    }
}

#[async_trait]
impl TerminologyService for InMemoryTerminologyService {
    async fn validate_code(
        &self,
        value_set_url: &str,
        code: &str,
        system: Option<&str>,
    ) -> TerminologyResult<CodeValidationResult> {
        let guard = self.value_sets.pin();
        let Some(table) = guard.get(value_set_url) else {
            return Err(TerminologyError::ValueSetNotFound {
                url: value_set_url.to_string(),
            });
        };

        let found = table.iter().find(|((c, s), _)| {
            c == code && (s.is_none() || system.is_none() || s.as_deref() == system)
        });

        Ok(match found {
            Some((_, Some(display))) => CodeValidationResult::valid_with_display(display.clone()),
            Some((_, None)) => CodeValidationResult::valid(),
            None => CodeValidationResult::invalid(),
        })
    }
}
