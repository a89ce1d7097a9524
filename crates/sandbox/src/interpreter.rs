//! Tree-walking evaluator.
//!
//! One `Interpreter` serves one call: it owns the global namespace built by
//! running the module body, the resource budget, and the regex cache used
//! by the `re` module.

use crate::ast::{
    BoolOp, Comprehension, Constant, ExceptHandler, Expr, FStringPart, Module, Stmt,
};
use crate::builtins;
use crate::error::{SandboxError, SandboxResult};
use crate::format::format_value;
use crate::limits::{Budget, ResourceLimits};
use crate::ops::{self, VALUE_SIZE};
use crate::value::{Dict, Function, Value, py_repr, py_str};
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Modules tool code may import.
pub(crate) const ALLOWED_MODULES: &[&str] = &["re", "math", "asyncio", "typing"];

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(crate) struct Interpreter {
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    /// Exceptions whose `except` clause is running, for bare `raise`.
    handling: Vec<SandboxError>,
    pub(crate) budget: Budget,
    pub(crate) regexes: HashMap<(String, i64), Rc<Regex>>,
}

impl Interpreter {
    pub(crate) fn new(limits: ResourceLimits, abort: Arc<AtomicBool>) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            handling: Vec::new(),
            budget: Budget::new(limits, abort),
            regexes: HashMap::new(),
        }
    }

    pub(crate) fn operations(&self) -> u64 {
        self.budget.operations()
    }

    /// Run the module body at global scope.
    pub(crate) fn exec_module(&mut self, module: &Module) -> SandboxResult<()> {
        match self.exec_block(&module.body)? {
            Flow::Normal => Ok(()),
            _ => Err(SandboxError::syntax(0, "'return' or loop control outside function")),
        }
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    fn lookup(&self, name: &str) -> SandboxResult<Value> {
        if let Some(v) = self.frames.last().and_then(|f| f.get(name)) {
            return Ok(v.clone());
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        builtins::lookup_builtin(name).ok_or_else(|| {
            SandboxError::raised("NameError", format!("name '{name}' is not defined"))
        })
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn unbind(&mut self, name: &str) -> Option<Value> {
        match self.frames.last_mut() {
            Some(frame) => frame.remove(name),
            None => self.globals.remove(name),
        }
    }

    fn local(&self, name: &str) -> Option<Value> {
        match self.frames.last() {
            Some(frame) => frame.get(name).cloned(),
            None => self.globals.get(name).cloned(),
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> SandboxResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> SandboxResult<Flow> {
        self.budget.tick()?;
        match stmt {
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
            Stmt::Assign { targets, value } => {
                let v = self.eval(value)?;
                for target in targets {
                    self.assign(target, v.clone())?;
                }
            }
            Stmt::AugAssign { target, op, value } => {
                let rhs = self.eval(value)?;
                let current = self.eval(target)?;
                if let (crate::ast::BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra = ops::iterate(&rhs)?;
                    self.budget.charge(extra.len() * VALUE_SIZE)?;
                    items.borrow_mut().extend(extra);
                    return Ok(Flow::Normal);
                }
                let updated = ops::binop(&mut self.budget, *op, &current, &rhs)?;
                self.assign(target, updated)?;
            }
            Stmt::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let items = ops::iterate(&self.eval(iter)?)?;
                for item in items {
                    self.budget.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            Stmt::While { test, body, orelse } => {
                while self.eval(test)?.truthy() {
                    self.budget.tick()?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::Raise(value) => return Err(self.raise(value.as_ref())?),
            Stmt::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(m) => py_str(&self.eval(m)?),
                        None => String::new(),
                    };
                    return Err(SandboxError::raised("AssertionError", message));
                }
            }
            Stmt::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
            Stmt::FunctionDef(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d)).transpose())
                    .collect::<SandboxResult<Vec<_>>>()?;
                let function = Value::Function(Rc::new(Function {
                    def: def.clone(),
                    defaults,
                }));
                self.bind(&def.name, function);
            }
            Stmt::Import(names) => {
                for name in names {
                    let module = allowed_module(&name.name)?;
                    let binding = name.alias.as_deref().unwrap_or(&name.name);
                    self.bind(binding, Value::Module(module));
                }
            }
            Stmt::ImportFrom { module, names } => {
                let module = allowed_module(module)?;
                for name in names {
                    let value = if module == "typing" {
                        Value::None
                    } else {
                        builtins::module_attribute(module, &name.name).map_err(|_| {
                            SandboxError::raised(
                                "ImportError",
                                format!("cannot import name '{}' from '{module}'", name.name),
                            )
                        })?
                    };
                    let binding = name.alias.as_deref().unwrap_or(&name.name);
                    self.bind(binding, value);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> SandboxResult<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(err @ SandboxError::Raised { .. }) => self.handle(err, handlers),
            Err(err) => Err(err),
        };
        if finalbody.is_empty() || matches!(outcome, Err(SandboxError::ResourceLimit(_))) {
            return outcome;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, err: SandboxError, handlers: &[ExceptHandler]) -> SandboxResult<Flow> {
        let Some(kind) = err.kind().map(str::to_string) else {
            return Err(err);
        };
        for handler in handlers {
            if !self.handler_matches(handler, &kind)? {
                continue;
            }
            if let Some(binding) = &handler.binding {
                let message = match &err {
                    SandboxError::Raised { message, .. } => message.clone(),
                    _ => String::new(),
                };
                self.bind(binding, Value::exception(&kind, message));
            }
            self.handling.push(err);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(binding) = &handler.binding {
                self.unbind(binding);
            }
            return result;
        }
        Err(err)
    }

    fn handler_matches(&mut self, handler: &ExceptHandler, kind: &str) -> SandboxResult<bool> {
        if handler.kinds.is_empty() {
            return Ok(true);
        }
        for name in &handler.kinds {
            let caught = self.resolve_exception_type(name)?;
            if exception_matches(&caught, kind) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn resolve_exception_type(&mut self, dotted: &str) -> SandboxResult<String> {
        let mut parts = dotted.split('.');
        let mut value = self.lookup(parts.next().unwrap_or_default())?;
        for attr in parts {
            value = builtins::get_attribute(&value, attr)?;
        }
        match value {
            Value::ExceptionType(kind) => Ok(kind.to_string()),
            _ => Err(SandboxError::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    fn raise(&mut self, value: Option<&Expr>) -> SandboxResult<SandboxError> {
        let Some(expr) = value else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                SandboxError::raised("RuntimeError", "No active exception to reraise")
            }));
        };
        Ok(match self.eval(expr)? {
            Value::ExceptionType(kind) => SandboxError::raised(kind.as_ref(), ""),
            Value::Exception(e) => SandboxError::raised(e.kind.clone(), e.message.clone()),
            _ => SandboxError::type_error("exceptions must derive from BaseException"),
        })
    }

    fn assign(&mut self, target: &Expr, value: Value) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = ops::iterate(&value)?;
                if items.len() < targets.len() {
                    return Err(SandboxError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(SandboxError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
            Expr::Subscript { value: obj, index } => {
                if matches!(index.as_ref(), Expr::Slice { .. }) {
                    return Err(SandboxError::Unsupported("slice assignment".into()));
                }
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                ops::set_item(&container, &key, value)
            }
            Expr::Attribute { attr, .. } => Err(SandboxError::Unsupported(format!(
                "attribute assignment to '{attr}'"
            ))),
            _ => Err(SandboxError::syntax(0, "cannot assign to expression")),
        }
    }

    fn delete(&mut self, target: &Expr) -> SandboxResult<()> {
        match target {
            Expr::Name(name) => self.unbind(name).map(|_| ()).ok_or_else(|| {
                SandboxError::raised("NameError", format!("name '{name}' is not defined"))
            }),
            Expr::Subscript { value, index } => {
                if matches!(index.as_ref(), Expr::Slice { .. }) {
                    return Err(SandboxError::Unsupported("slice deletion".into()));
                }
                let container = self.eval(value)?;
                let key = self.eval(index)?;
                ops::del_item(&container, &key)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                targets.iter().try_for_each(|t| self.delete(t))
            }
            _ => Err(SandboxError::syntax(0, "cannot delete expression")),
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> SandboxResult<Value> {
        self.budget.tick()?;
        match expr {
            Expr::Constant(c) => Ok(match c {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => out.push_str(s),
                        FStringPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let v = self.eval(expr)?;
                            let v = match conversion {
                                Some('r') | Some('a') => Value::str(&py_repr(&v)),
                                Some(_) => Value::str(&py_str(&v)),
                                None => v,
                            };
                            out.push_str(&format_value(&mut self.budget, &v, spec)?);
                        }
                    }
                }
                self.budget.charge(out.len())?;
                Ok(Value::str(&out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                self.budget.charge(items.len() * VALUE_SIZE)?;
                Ok(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                self.budget.charge(items.len() * VALUE_SIZE)?;
                Ok(Value::tuple(items))
            }
            Expr::Set(items) => {
                let items = self.eval_all(items)?;
                builtins::dedup(items).map(Value::list)
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    key.check_hashable()?;
                    let value = self.eval(v)?;
                    dict.insert(key, value);
                }
                self.budget.charge(dict.len() * 2 * VALUE_SIZE)?;
                Ok(Value::dict(dict))
            }
            Expr::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehend(generators, &mut |this| {
                    let v = this.eval(elt)?;
                    this.budget.charge(VALUE_SIZE)?;
                    out.push(v);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut dict = Dict::new();
                self.comprehend(generators, &mut |this| {
                    let k = this.eval(key)?;
                    k.check_hashable()?;
                    let v = this.eval(value)?;
                    this.budget.charge(2 * VALUE_SIZE)?;
                    dict.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Attribute { value, attr } => {
                let v = self.eval(value)?;
                builtins::get_attribute(&v, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_deref())?;
                        let upper = self.slice_bound(upper.as_deref())?;
                        let step = self.slice_bound(step.as_deref())?;
                        let result = ops::get_slice(&container, lower, upper, step)?;
                        self.charge_value(&result)?;
                        Ok(result)
                    }
                    other => {
                        let key = self.eval(other)?;
                        ops::get_item(&container, &key)
                    }
                }
            }
            Expr::Slice { .. } => Err(SandboxError::Unsupported(
                "slice outside of a subscript".into(),
            )),
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func)?;
                let args = self.eval_all(args)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.eval(e)?)))
                    .collect::<SandboxResult<Vec<_>>>()?;
                self.call(&callee, args, kwargs)
            }
            Expr::BinOp { left, op, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                ops::binop(&mut self.budget, *op, &a, &b)
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.eval(operand)?;
                ops::unary(*op, &v)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value)?;
                    let truthy = last.truthy();
                    match op {
                        BoolOp::And if !truthy => return Ok(last),
                        BoolOp::Or if truthy => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut lhs = self.eval(left)?;
                for (op, rhs_expr) in cmp_ops.iter().zip(comparators) {
                    let rhs = self.eval(rhs_expr)?;
                    if !ops::compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            // Coroutines run eagerly when called; awaiting yields their result.
            Expr::Await(inner) => self.eval(inner),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> SandboxResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn charge_value(&mut self, value: &Value) -> SandboxResult<()> {
        match value {
            Value::Str(s) => self.budget.charge(s.len()),
            Value::List(items) => self.budget.charge(items.borrow().len() * VALUE_SIZE),
            Value::Tuple(items) => self.budget.charge(items.len() * VALUE_SIZE),
            _ => Ok(()),
        }
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> SandboxResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                SandboxError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    }

    /// Run `each` for every binding produced by the generators. Loop
    /// variables are restored afterwards so they do not leak.
    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        each: &mut dyn FnMut(&mut Self) -> SandboxResult<()>,
    ) -> SandboxResult<()> {
        let mut names = Vec::new();
        for generator in generators {
            collect_names(&generator.target, &mut names);
        }
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|n| {
                let previous = self.local(&n);
                (n, previous)
            })
            .collect();
        let result = self.comprehend_level(generators, each);
        for (name, previous) in saved {
            match previous {
                Some(v) => self.bind(&name, v),
                None => {
                    self.unbind(&name);
                }
            }
        }
        result
    }

    fn comprehend_level(
        &mut self,
        generators: &[Comprehension],
        each: &mut dyn FnMut(&mut Self) -> SandboxResult<()>,
    ) -> SandboxResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return each(self);
        };
        let items = ops::iterate(&self.eval(&first.iter)?)?;
        'items: for item in items {
            self.budget.tick()?;
            self.assign(&first.target, item)?;
            for condition in &first.ifs {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend_level(rest, each)?;
        }
        Ok(())
    }

    /// Call any callable value.
    pub(crate) fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SandboxResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(name) => builtins::call_builtin(self, name, args, kwargs),
            Value::Method(method) => {
                builtins::call_method(self, &method.receiver, method.name, args, kwargs)
            }
            Value::ExceptionType(kind) => {
                if !kwargs.is_empty() {
                    return Err(SandboxError::type_error(format!(
                        "{kind}() takes no keyword arguments"
                    )));
                }
                let message = match args.as_slice() {
                    [] => String::new(),
                    [single] => py_str(single),
                    many => py_repr(&Value::tuple(many.to_vec())),
                };
                Ok(Value::exception(kind, message))
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SandboxResult<Value> {
        let frame = bind_arguments(function, args, kwargs)?;
        self.budget.enter_call()?;
        self.frames.push(frame);
        let result = self.exec_block(&function.def.body);
        self.frames.pop();
        self.budget.exit_call();
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }
}

fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> SandboxResult<HashMap<String, Value>> {
    let def = &function.def;
    let name = &def.name;
    if args.len() > def.params.len() {
        return Err(SandboxError::type_error(format!(
            "{name}() takes {} positional argument{} but {} {} given",
            def.params.len(),
            if def.params.len() == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }
    let mut frame = HashMap::new();
    for (param, value) in def.params.iter().zip(args) {
        frame.insert(param.name.clone(), value);
    }
    for (key, value) in kwargs {
        if !def.params.iter().any(|p| p.name == key) {
            return Err(SandboxError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
        if frame.contains_key(&key) {
            return Err(SandboxError::type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        frame.insert(key, value);
    }
    let mut missing = Vec::new();
    for (param, default) in def.params.iter().zip(&function.defaults) {
        if frame.contains_key(&param.name) {
            continue;
        }
        match default {
            Some(v) => {
                frame.insert(param.name.clone(), v.clone());
            }
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        return Err(SandboxError::type_error(format!(
            "{name}() missing {} required positional argument{}: {}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(" and ")
        )));
    }
    Ok(frame)
}

fn allowed_module(name: &str) -> SandboxResult<&'static str> {
    ALLOWED_MODULES
        .iter()
        .copied()
        .find(|m| *m == name)
        .ok_or_else(|| {
            SandboxError::raised(
                "ImportError",
                format!("import of '{name}' is not allowed in the sandbox"),
            )
        })
}

/// Whether an `except` clause naming `caught` handles a `raised` exception.
fn exception_matches(caught: &str, raised: &str) -> bool {
    caught == raised
        || caught == "Exception"
        || caught == "BaseException"
        || (caught == "LookupError" && matches!(raised, "KeyError" | "IndexError"))
        || (caught == "ArithmeticError"
            && matches!(raised, "ZeroDivisionError" | "OverflowError"))
}

fn collect_names(target: &Expr, out: &mut Vec<String>) {
    match target {
        Expr::Name(name) => out.push(name.clone()),
        Expr::Tuple(items) | Expr::List(items) => {
            items.iter().for_each(|t| collect_names(t, out));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(source: &str) -> SandboxResult<Interpreter> {
        let module = parse(source)?;
        let mut interp = Interpreter::new(ResourceLimits::default(), Arc::new(AtomicBool::new(false)));
        interp.exec_module(&module)?;
        Ok(interp)
    }

    fn result_of(source: &str) -> String {
        let interp = run(source).unwrap();
        py_repr(&interp.global("result").unwrap())
    }

    #[test]
    fn test_control_flow() {
        let src = "\
total = 0
for x in [1, 2, 3, 4, 5]:
    if x == 4:
        break
    if x % 2 == 0:
        continue
    total += x
else:
    total = -1
result = total
";
        assert_eq!(result_of(src), "4");
    }

    #[test]
    fn test_functions_with_defaults_and_kwargs() {
        let src = "\
def greet(name, greeting='Hello', punct='!'):
    return f'{greeting}, {name}{punct}'
result = [greet('a'), greet('b', punct='?'), greet(greeting='Hi', name='c')]
";
        assert_eq!(result_of(src), "['Hello, a!', 'Hello, b?', 'Hi, c!']");
    }

    #[test]
    fn test_argument_errors() {
        let err = run("def f(a):\n    return a\nf(1, 2)\n").err().unwrap();
        assert_eq!(
            err,
            SandboxError::type_error("f() takes 1 positional argument but 2 were given")
        );
        let err = run("def f(a, b):\n    return a\nf()\n").err().unwrap();
        assert_eq!(
            err,
            SandboxError::type_error("f() missing 2 required positional arguments: 'a' and 'b'")
        );
    }

    #[test]
    fn test_try_except_finally() {
        let src = "\
log = []
def risky(v):
    try:
        if not v:
            raise ValueError('empty')
        log.append('ok')
    except ValueError as e:
        log.append(str(e))
    else:
        log.append('else')
    finally:
        log.append('finally')
risky('')
risky('x')
result = log
";
        assert_eq!(result_of(src), "['empty', 'finally', 'ok', 'else', 'finally']");
    }

    #[test]
    fn test_exception_hierarchy_and_reraise() {
        let src = "\
try:
    {}['missing']
except Exception as e:
    result = str(e)
";
        assert_eq!(result_of(src), "\"'missing'\"");

        let err = run("try:\n    1 / 0\nexcept ValueError:\n    pass\n").err().unwrap();
        assert_eq!(err.kind(), Some("ZeroDivisionError"));

        let err = run("try:\n    raise ValueError('x')\nexcept ValueError:\n    raise\n").err().unwrap();
        assert_eq!(err, SandboxError::value_error("x"));
    }

    #[test]
    fn test_undefined_exception_name_in_handler() {
        let err = run("try:\n    1 / 0\nexcept KeyError:\n    pass\n").err().unwrap();
        assert_eq!(err.kind(), Some("NameError"));
    }

    #[test]
    fn test_resource_limits_are_not_catchable() {
        let module = parse("try:\n    while True:\n        pass\nexcept Exception:\n    result = 1\n").unwrap();
        let mut interp = Interpreter::new(
            ResourceLimits {
                max_operations: 500,
                ..Default::default()
            },
            Arc::new(AtomicBool::new(false)),
        );
        let err = interp.exec_module(&module).unwrap_err();
        assert!(err.is_resource_limit());
        assert!(interp.global("result").is_none());
    }

    #[test]
    fn test_comprehensions_do_not_leak() {
        let src = "\
x = 'outer'
squares = [x * x for x in [1, 2, 3] if x != 2]
pairs = {k: v for k, v in [('a', 1), ('b', 2)]}
result = (x, squares, pairs)
";
        assert_eq!(result_of(src), "('outer', [1, 9], {'a': 1, 'b': 2})");
    }

    #[test]
    fn test_unpacking_and_aug_assign() {
        let src = "\
a, b = 1, 2
a, b = b, a
items = [1]
alias = items
items += [2, 3]
d = {'n': 1}
d['n'] += 5
result = (a, b, alias, d)
";
        assert_eq!(result_of(src), "(2, 1, [1, 2, 3], {'n': 6})");
        let err = run("a, b = [1, 2, 3]\n").err().unwrap();
        assert_eq!(err.kind(), Some("ValueError"));
    }

    #[test]
    fn test_imports_are_restricted() {
        let err = run("import os\n").err().unwrap();
        assert_eq!(
            err,
            SandboxError::raised("ImportError", "import of 'os' is not allowed in the sandbox")
        );
        assert!(run("import re\nimport math as m\nfrom typing import List, Dict\n").is_ok());
        let err = run("from re import nothing\n").err().unwrap();
        assert_eq!(err.kind(), Some("ImportError"));
    }

    #[test]
    fn test_recursion_depth_limit() {
        let err = run("def f(n):\n    return f(n + 1)\nf(0)\n").err().unwrap();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn test_async_functions_run_eagerly() {
        let src = "\
import asyncio
async def fetch(v):
    await asyncio.sleep(0)
    return v * 2
async def main():
    return await fetch(21)
result = main()
";
        assert_eq!(result_of(src), "42");
    }

    #[test]
    fn test_attribute_assignment_is_unsupported() {
        let err = run("x = []\nx.y = 1\n").err().unwrap();
        assert!(matches!(err, SandboxError::Unsupported(_)));
    }
}
