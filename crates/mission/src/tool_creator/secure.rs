//! Call-time policy for generated tools.
//!
//! Every call re-checks its string inputs and its output before anything
//! is returned to the caller. Policy breaches and exhausted sandbox budgets
//! surface as [`SuperMeanError::Security`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use supermean_common::{ContextMap, Result, Skill, SuperMeanError};
use supermean_sandbox::{SandboxError, SandboxedFunction};
use tracing::{debug, warn};

use crate::config::ToolLimits;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

static RESTRICTED_WORDS: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)\b(rm|sudo|wget|curl|eval|exec|system)\b"]));

const RESTRICTED_SUBSTRINGS: &[&str] = &["/etc/", "/usr/", "/var/", "../", "./"];

static SHELL_METACHARACTERS: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"[;&|`$]"]));

static ALLOWED_SCRIPT_LINES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^#!.*(?:bash|sh)$",
        r"^#.*$",
        r#"^echo\s+"[^";&|<>]*"$"#,
        r"^echo\s+'[^';&|<>]*'$",
        r"^echo\s+[^;&|<>]+$",
        r"^date(?:\s+[-+][^\s;&|<>]*)?$",
    ])
});

static DANGEROUS_SCRIPT_LINES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)rm\s+-[rf]*\s*/*",
        r"(?i)sudo",
        r"(?i)chmod\s+(?:[0-7]{3,4}|\+.+)\s+/*",
        r"(?i)chown",
        r"(?i)wget\s+.*\|\s*(?:bash|sh)",
        r"(?i)curl\s+.*\|\s*(?:bash|sh)",
        r"(?i)eval\s+",
        r"\$\(\s*.*\s*\)",
        r"`.*`",
        r"[;&|]",
        r"[<>]",
    ])
});

static DEVICE_WRITE: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r">{1,2}\s*/dev/(\w*)"]));

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)data:",
        r"(?i)vbscript:",
        r"\b(?:SELECT|INSERT|UPDATE|DELETE|DROP|UNION|ALTER)\b.*\bFROM\b|\bOR\b.*=.*",
        r"\{\{.*\}\}|\{%.*%\}",
        r"\$\{.*\}",
    ])
});

/// Input and output checks applied on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    pub max_input_length: usize,
    pub max_output_length: usize,
}

impl From<&ToolLimits> for SecurityPolicy {
    fn from(limits: &ToolLimits) -> Self {
        Self {
            max_input_length: limits.max_input_length,
            max_output_length: limits.max_output_length,
        }
    }
}

impl SecurityPolicy {
    pub fn check_input(&self, value: &Value) -> std::result::Result<(), String> {
        match value {
            Value::String(s) => self.check_input_str(s),
            Value::Array(items) => items.iter().try_for_each(|v| self.check_input(v)),
            Value::Object(map) => map.values().try_for_each(|v| self.check_input(v)),
            _ => Ok(()),
        }
    }

    fn check_input_str(&self, value: &str) -> std::result::Result<(), String> {
        if value.chars().count() > self.max_input_length {
            return Err("Input exceeds maximum length".into());
        }
        if let Some(m) = RESTRICTED_WORDS.iter().find_map(|re| re.find(value)) {
            return Err(format!(
                "Input contains restricted pattern: {} not allowed",
                m.as_str().to_lowercase()
            ));
        }
        let lower = value.to_lowercase();
        if let Some(pattern) = RESTRICTED_SUBSTRINGS.iter().find(|p| lower.contains(*p)) {
            return Err(format!(
                "Input contains restricted pattern: {pattern} not allowed"
            ));
        }
        if SHELL_METACHARACTERS.iter().any(|re| re.is_match(value)) {
            return Err("Input contains invalid characters".into());
        }
        if value.contains("..") || value.starts_with('/') {
            return Err("Invalid path format".into());
        }
        Ok(())
    }

    pub fn check_output(&self, value: &Value) -> std::result::Result<(), String> {
        match value {
            Value::String(s) => self.check_output_str(s),
            Value::Array(items) => items.iter().try_for_each(|v| self.check_output(v)),
            Value::Object(map) => map.iter().try_for_each(|(k, v)| {
                self.check_output_str(k)?;
                self.check_output(v)
            }),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        }
    }

    fn check_output_str(&self, value: &str) -> std::result::Result<(), String> {
        if value.chars().count() > self.max_output_length {
            return Err("Output exceeds maximum length".into());
        }
        let lower = value.to_lowercase();
        if value.starts_with("#!") || lower.contains(".sh") || lower.contains("bash") {
            return value.lines().try_for_each(check_script_line);
        }
        if INJECTION_PATTERNS.iter().any(|re| re.is_match(value)) {
            return Err("Output contains potential injection pattern".into());
        }
        Ok(())
    }
}

fn check_script_line(line: &str) -> std::result::Result<(), String> {
    let line = line.trim();
    if line.is_empty() || ALLOWED_SCRIPT_LINES.iter().any(|re| re.is_match(line)) {
        return Ok(());
    }
    // Redirects into /dev/null are fine; any other device is not.
    let writes_device = DEVICE_WRITE.iter().any(|re| {
        re.captures_iter(line)
            .any(|c| c.get(1).is_some_and(|dev| dev.as_str() != "null"))
    });
    if writes_device || DANGEROUS_SCRIPT_LINES.iter().any(|re| re.is_match(line)) {
        return Err("Output contains potentially dangerous command pattern".into());
    }
    Err(format!(
        "Output contains unrecognized shell command pattern: {line}"
    ))
}

/// A generated tool, registered as a skill.
pub struct SecureTool {
    name: String,
    function: SandboxedFunction,
    policy: SecurityPolicy,
}

impl SecureTool {
    pub fn new(name: impl Into<String>, function: SandboxedFunction, policy: SecurityPolicy) -> Self {
        Self {
            name: name.into(),
            function,
            policy,
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }
}

#[async_trait]
impl Skill for SecureTool {
    async fn call(&self, args: &ContextMap) -> Result<Value> {
        for (param, value) in args {
            if let Err(reason) = self.policy.check_input(value) {
                warn!(tool = %self.name, param = %param, reason = %reason, "Rejected tool input");
                return Err(SuperMeanError::Security(format!(
                    "Invalid input for {param}: {reason}"
                )));
            }
        }

        let function = self.function.clone();
        let call_args = args.clone();
        let outcome = tokio::task::spawn_blocking(move || function.call(&call_args))
            .await
            .map_err(|e| SuperMeanError::skill(&self.name, format!("tool task failed: {e}")))?;

        let value = outcome.map_err(|e| match e {
            SandboxError::ResourceLimit(detail) => {
                warn!(tool = %self.name, detail = %detail, "Tool exceeded its resource limits");
                SuperMeanError::Security(format!("Tool '{}' aborted: {detail}", self.name))
            }
            other => SuperMeanError::skill(&self.name, other.to_string()),
        })?;

        if let Err(reason) = self.policy.check_output(&value) {
            warn!(tool = %self.name, reason = %reason, "Rejected tool output");
            return Err(SuperMeanError::Security(format!("Invalid output: {reason}")));
        }
        debug!(tool = %self.name, "Tool call passed policy checks");
        Ok(value)
    }
}
