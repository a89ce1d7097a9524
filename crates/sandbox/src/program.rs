//! Loading tool source and calling the function it defines.

use crate::ast::{FunctionDef, Module, Stmt};
use crate::error::{SandboxError, SandboxResult};
use crate::interpreter::Interpreter;
use crate::limits::{ResourceLimits, Watchdog};
use crate::parser::parse;
use crate::value::{from_json, to_json};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::debug;

/// Loads tool source under a fixed set of resource limits.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: ResourceLimits,
}

impl Sandbox {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Parse `source`, check that it defines exactly one top-level function,
    /// and run the module body once so bad imports fail here rather than on
    /// the first call.
    pub fn load(&self, source: &str) -> SandboxResult<SandboxedFunction> {
        let module = parse(source)?;
        let mut defs = module.body.iter().filter_map(|stmt| match stmt {
            Stmt::FunctionDef(def) => Some(def.clone()),
            _ => None,
        });
        let (Some(function), None) = (defs.next(), defs.next()) else {
            let count = module.functions().count();
            return Err(SandboxError::syntax(
                0,
                format!("expected exactly one function definition, found {count}"),
            ));
        };

        let loaded = SandboxedFunction {
            module: Arc::new(module),
            function,
            limits: self.limits.clone(),
        };
        loaded.prepare()?;
        Ok(loaded)
    }
}

/// A loaded tool function. Cheap to clone and safe to share across threads;
/// every call runs in a fresh interpreter.
#[derive(Debug, Clone)]
pub struct SandboxedFunction {
    module: Arc<Module>,
    function: Arc<FunctionDef>,
    limits: ResourceLimits,
}

impl SandboxedFunction {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn params(&self) -> Vec<String> {
        self.function.param_names()
    }

    pub fn is_async(&self) -> bool {
        self.function.is_async
    }

    pub fn definition(&self) -> &FunctionDef {
        &self.function
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    fn prepare(&self) -> SandboxResult<()> {
        let abort = Arc::new(AtomicBool::new(false));
        let _watchdog = Watchdog::arm(
            Duration::from_millis(self.limits.max_wall_time_ms),
            abort.clone(),
        );
        Interpreter::new(self.limits.clone(), abort).exec_module(&self.module)
    }

    /// Call the function with keyword arguments taken from `args`.
    ///
    /// Blocks the current thread for up to the wall-time limit; async
    /// callers should run it on a blocking pool.
    pub fn call(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> SandboxResult<serde_json::Value> {
        let abort = Arc::new(AtomicBool::new(false));
        let _watchdog = Watchdog::arm(
            Duration::from_millis(self.limits.max_wall_time_ms),
            abort.clone(),
        );
        let mut interp = Interpreter::new(self.limits.clone(), abort);
        interp.exec_module(&self.module)?;
        let callee = interp.global(&self.function.name).ok_or_else(|| {
            SandboxError::raised(
                "NameError",
                format!("name '{}' is not defined", self.function.name),
            )
        })?;
        let kwargs = args
            .iter()
            .map(|(k, v)| (k.clone(), from_json(v)))
            .collect();

        let outcome = interp.call(&callee, Vec::new(), kwargs);
        debug!(
            function = %self.function.name,
            operations = interp.operations(),
            ok = outcome.is_ok(),
            "Sandboxed call finished"
        );
        to_json(&outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn args(value: serde_json::Value) -> Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_load_requires_exactly_one_function() {
        let sandbox = Sandbox::default();
        assert!(matches!(
            sandbox.load("x = 1\n").unwrap_err(),
            SandboxError::Syntax { .. }
        ));
        assert!(matches!(
            sandbox.load("def a():\n    pass\ndef b():\n    pass\n").unwrap_err(),
            SandboxError::Syntax { .. }
        ));
        let f = sandbox
            .load("import re\n\ndef shout(text: str) -> str:\n    return text.upper()\n")
            .unwrap();
        assert_eq!(f.name(), "shout");
        assert_eq!(f.params(), vec!["text"]);
        assert!(!f.is_async());
    }

    #[test]
    fn test_load_rejects_forbidden_imports() {
        let err = Sandbox::default()
            .load("import os\n\ndef f(x):\n    return x\n")
            .unwrap_err();
        assert_eq!(err.kind(), Some("ImportError"));
    }

    #[test]
    fn test_call_converts_json() {
        let f = Sandbox::default()
            .load("def describe(name, count=2):\n    return {'name': name, 'tags': [name] * count, 'ok': True}\n")
            .unwrap();
        assert_eq!(
            f.call(&args(json!({"name": "x"}))).unwrap(),
            json!({"name": "x", "tags": ["x", "x"], "ok": true})
        );
        let err = f.call(&args(json!({"other": 1}))).unwrap_err();
        assert_eq!(err.kind(), Some("TypeError"));
    }

    #[test]
    fn test_non_serializable_result() {
        let f = Sandbox::default()
            .load("def f():\n    return len\n")
            .unwrap();
        assert_eq!(f.call(&Map::new()).unwrap_err().kind(), Some("TypeError"));
    }
}
