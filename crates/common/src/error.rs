//! Error types for SuperMean.
//!
//! Planning, evaluation and meta-planning failures always keep the error
//! that caused them so callers can walk `source()` back to the transport or
//! parse failure.

use thiserror::Error;

/// Boxed cause carried by the component-level failure variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A structurally invalid payload (missing keys, wrong types, empty text).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidStructure(pub String);

#[derive(Error, Debug)]
pub enum SuperMeanError {
    #[error("Planning error: {message}")]
    Planning {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Evaluation error: {message}")]
    Evaluation {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Meta-planning error: {message}")]
    MetaPlanning {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Tool creation error: {0}")]
    ToolCreation(String),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Skill '{skill}' failed: {message}")]
    Skill { skill: String, message: String },

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Model connection error ({model}): {message}")]
    ModelConnection { model: String, message: String },

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SuperMeanError {
    pub fn planning(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Planning {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn evaluation(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Evaluation {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn meta_planning(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::MetaPlanning {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn skill(skill: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Skill {
            skill: skill.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a sandbox or policy violation. These are never
    /// retried.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

pub type Result<T> = std::result::Result<T, SuperMeanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_planning_error_keeps_json_cause() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = SuperMeanError::planning("Failed to parse plan", json_err);

        let source = err.source().expect("planning errors carry a cause");
        assert!(source.downcast_ref::<serde_json::Error>().is_some());
        assert!(err.to_string().contains("Failed to parse plan"));
    }

    #[test]
    fn test_invalid_structure_as_cause() {
        let err = SuperMeanError::evaluation(
            "Evaluation JSON is invalid",
            InvalidStructure("missing key 'score'".into()),
        );
        let source = err.source().unwrap();
        assert_eq!(
            source.downcast_ref::<InvalidStructure>(),
            Some(&InvalidStructure("missing key 'score'".into()))
        );
    }

    #[test]
    fn test_connection_error_as_cause() {
        let inner = SuperMeanError::ModelConnection {
            model: "gemini".into(),
            message: "timeout".into(),
        };
        let err = SuperMeanError::meta_planning("LLM call failed", inner);
        let source = err.source().unwrap();
        assert!(matches!(
            source.downcast_ref::<SuperMeanError>(),
            Some(SuperMeanError::ModelConnection { .. })
        ));
    }

    #[test]
    fn test_skill_error_display() {
        let err = SuperMeanError::skill("text.summarize", "model unavailable");
        assert_eq!(
            err.to_string(),
            "Skill 'text.summarize' failed: model unavailable"
        );
        assert!(!err.is_security_violation());
        assert!(SuperMeanError::Security("x".into()).is_security_violation());
    }
}
