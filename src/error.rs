use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile not found: {canonical}")]
    ProfileNotFound { canonical: String },

    #[error("Malformed profile {canonical}: {message}")]
    MalformedProfile { canonical: String, message: String },

    #[error("Invalid regex '{pattern}' at {element}: {source}")]
    InvalidRegex {
        element: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown content reference '{reference}' at {element}")]
    UnknownContentReference { element: String, reference: String },

    #[error("Schema compilation error: {message}")]
    CompilationError { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

impl ProfileError {
    pub fn profile_not_found<S: Into<String>>(canonical: S) -> Self {
        Self::ProfileNotFound {
            canonical: canonical.into(),
        }
    }

    pub fn malformed_profile<S: Into<String>>(canonical: S, message: S) -> Self {
        Self::MalformedProfile {
            canonical: canonical.into(),
            message: message.into(),
        }
    }

    pub fn invalid_regex<S: Into<String>>(element: S, pattern: S, source: regex::Error) -> Self {
        Self::InvalidRegex {
            element: element.into(),
            pattern: pattern.into(),
            source,
        }
    }

    pub fn unknown_content_reference<S: Into<String>>(element: S, reference: S) -> Self {
        Self::UnknownContentReference {
            element: element.into(),
            reference: reference.into(),
        }
    }

    pub fn compilation_error<S: Into<String>>(message: S) -> Self {
        Self::CompilationError {
            message: message.into(),
        }
    }

    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

/// Errors raised by an invariant expression evaluator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Failed to parse expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    #[error("Expression '{expression}' did not produce a boolean")]
    NotBoolean { expression: String },

    #[error("Evaluation failed: {0}")]
    Failed(String),
}
