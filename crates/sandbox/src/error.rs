//! Sandbox error type.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Source could not be parsed.
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    /// An exception raised by the tool code, e.g. `ValueError`.
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },

    /// An operation, time, memory or depth budget was exhausted. Never
    /// catchable by `except` clauses in tool code.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// Syntax or a runtime feature outside the supported subset.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SandboxError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raised("ValueError", message)
    }

    /// Exception kind for raised errors.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Raised { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::ResourceLimit(_))
    }
}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
