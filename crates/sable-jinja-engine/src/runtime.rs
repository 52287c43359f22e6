// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::ast::{BinOp, CmpOp, Expr, ForTarget, Stmt};
use crate::error::Error;
use crate::telemetry;
use crate::value::{Value, ValueMap};
use crate::Environment;

/// Hard cap on nested `{% include %}` expansion. The registry performs no
/// cycle detection, so a self-including template terminates here.
const MAX_INCLUDE_DEPTH: usize = 64;

/// Filter callback, `value|name(args)`.
pub type FilterFn = dyn Fn(&Value, &[Value]) -> Result<Value, Error> + Send + Sync;
/// Test callback, `value is name(args)`.
pub type TestFn = dyn Fn(&Value, &[Value]) -> Result<bool, Error> + Send + Sync;
/// Global function callback, `name(args)`.
pub type FunctionFn = dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync;

/// Named callables available to templates during evaluation.
///
/// An environment starts with no capabilities at all; the companion crate
/// installs the default set, and hosts may register their own on top.
#[derive(Default, Clone)]
pub struct Capabilities {
    filters: HashMap<String, Arc<FilterFn>>,
    tests: HashMap<String, Arc<TestFn>>,
    functions: HashMap<String, Arc<FunctionFn>>,
}

impl Capabilities {
    /// Registers a filter, replacing any previous one of the same name.
    pub fn add_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(f));
    }

    /// Registers a test, replacing any previous one of the same name.
    pub fn add_test<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<bool, Error> + Send + Sync + 'static,
    {
        self.tests.insert(name.into(), Arc::new(f));
    }

    /// Registers a global function, replacing any previous one of the same
    /// name.
    pub fn add_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    fn filter(&self, name: &str) -> Option<&Arc<FilterFn>> {
        self.filters.get(name)
    }

    fn test(&self, name: &str) -> Option<&Arc<TestFn>> {
        self.tests.get(name)
    }

    fn function(&self, name: &str) -> Option<&Arc<FunctionFn>> {
        self.functions.get(name)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("filters", &self.filters.len())
            .field("tests", &self.tests.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// Renders a statement list against a root context mapping.
pub(crate) fn render(
    env: &Environment,
    body: &[Stmt],
    root: ValueMap,
) -> Result<String, Error> {
    let mut out = String::new();
    let mut renderer = Renderer::new(env, root);
    renderer.render_body(body, &mut out)?;
    Ok(out)
}

struct Renderer<'env> {
    env: &'env Environment,
    scopes: SmallVec<[ValueMap; 4]>,
    include_depth: usize,
}

impl<'env> Renderer<'env> {
    fn new(env: &'env Environment, root: ValueMap) -> Self {
        let mut scopes = SmallVec::new();
        scopes.push(root);
        Self {
            env,
            scopes,
            include_depth: 0,
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    fn render_body(&mut self, body: &[Stmt], out: &mut String) -> Result<(), Error> {
        for stmt in body {
            self.render_stmt(stmt, out)?;
        }
        Ok(())
    }

    fn render_stmt(&mut self, stmt: &Stmt, out: &mut String) -> Result<(), Error> {
        match stmt {
            Stmt::Text(node) => out.push_str(&node.text),
            Stmt::Output(node) => {
                let value = self.eval(&node.expr)?;
                write!(out, "{value}")?;
            }
            Stmt::If(node) => {
                for arm in &node.arms {
                    if self.eval(&arm.cond)?.is_truthy() {
                        return self.render_body(&arm.body, out);
                    }
                }
                if let Some(else_body) = &node.else_body {
                    self.render_body(else_body, out)?;
                }
            }
            Stmt::For(node) => self.render_for(node, out)?,
            Stmt::Set(node) => {
                let value = self.eval(&node.expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(node.name.clone(), value);
                }
            }
            Stmt::Include(node) => self.render_include(node, out)?,
            Stmt::Block(node) => self.render_body(&node.body, out)?,
        }
        Ok(())
    }

    fn render_for(&mut self, node: &crate::ast::ForStmt, out: &mut String) -> Result<(), Error> {
        let iterable = self.eval(&node.iterable)?;
        let items = iteration_items(&iterable)?;

        if items.is_empty() {
            if let Some(else_body) = &node.else_body {
                self.render_body(else_body, out)?;
            }
            return Ok(());
        }

        let parent = self.lookup("loop").unwrap_or(Value::None);
        let length = items.len();
        for (index0, (key, value)) in items.into_iter().enumerate() {
            let mut scope = ValueMap::new();
            match &node.target {
                ForTarget::Single(name) => {
                    scope.insert(name.clone(), value);
                }
                ForTarget::Pair(first, second) => {
                    let (a, b) = unpack_pair(key, value)?;
                    scope.insert(first.clone(), a);
                    scope.insert(second.clone(), b);
                }
            }
            scope.insert(
                "loop".to_string(),
                loop_state(index0, length, parent.clone()),
            );
            self.scopes.push(scope);
            let result = self.render_body(&node.body, out);
            self.scopes.pop();
            result?;
        }
        Ok(())
    }

    fn render_include(
        &mut self,
        node: &crate::ast::IncludeStmt,
        out: &mut String,
    ) -> Result<(), Error> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::bad_include(format!(
                "include depth exceeds {MAX_INCLUDE_DEPTH}, template graph is likely cyclic"
            )));
        }
        let target = self.eval(&node.target)?;
        let Some(name) = target.as_str() else {
            return Err(Error::bad_include(format!(
                "include target must be a string, got {}",
                target.kind()
            )));
        };
        let template = self.env.get_template(name)?;
        self.include_depth += 1;
        let result = self.render_body(template.body(), out);
        self.include_depth -= 1;
        result
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, Error> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Var(name) => match self.lookup(name) {
                Some(value) => Ok(value),
                None if self.env.is_strict() => Err(Error::Undefined { name: name.clone() }),
                None => Ok(Value::None),
            },
            Expr::Attr { base, name } => Ok(self.eval(base)?.get_attr(name)),
            Expr::Index { base, index } => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                Ok(base.get_index(&index))
            }
            Expr::Neg(inner) => negate(&self.eval(inner)?),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::BinOp { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binop(*op, &lhs, &rhs)
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(*op, &lhs, &rhs).map(Value::Bool)
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() {
                    self.eval(rhs)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Filter { base, name, args } => {
                let Some(filter) = self.env.capabilities().filter(name) else {
                    return Err(Error::UnknownFilter { name: name.clone() });
                };
                let filter = Arc::clone(filter);
                let base = self.eval(base)?;
                let args = self.eval_args(args)?;
                telemetry::record_filter_invocation(name);
                filter(&base, &args)
            }
            Expr::Test {
                base,
                name,
                args,
                negated,
            } => {
                let Some(test) = self.env.capabilities().test(name) else {
                    return Err(Error::UnknownTest { name: name.clone() });
                };
                let test = Arc::clone(test);
                let base = self.eval_test_base(base)?;
                let args = self.eval_args(args)?;
                let outcome = test(&base, &args)?;
                Ok(Value::Bool(outcome != *negated))
            }
            Expr::Call { name, args } => {
                let Some(function) = self.env.capabilities().function(name) else {
                    return Err(Error::UnknownFunction { name: name.clone() });
                };
                let function = Arc::clone(function);
                let args = self.eval_args(args)?;
                function(&args)
            }
        }
    }

    /// Resolves the left-hand side of `is`. Name and path misses yield
    /// [`Value::None`] even in strict mode, so `x is defined` can probe
    /// names that are absent instead of failing the render.
    fn eval_test_base(&mut self, expr: &Expr) -> Result<Value, Error> {
        match expr {
            Expr::Var(name) => Ok(self.lookup(name).unwrap_or(Value::None)),
            Expr::Attr { base, name } => Ok(self.eval_test_base(base)?.get_attr(name)),
            Expr::Index { base, index } => {
                let base = self.eval_test_base(base)?;
                let index = self.eval(index)?;
                Ok(base.get_index(&index))
            }
            other => self.eval(other),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<SmallVec<[Value; 4]>, Error> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }
}

/// The `loop` variable bound inside `{% for %}` bodies.
fn loop_state(index0: usize, length: usize, parent: Value) -> Value {
    let mut state = ValueMap::new();
    state.insert("index0".to_string(), Value::from(index0));
    state.insert("index".to_string(), Value::from(index0 + 1));
    state.insert("first".to_string(), Value::Bool(index0 == 0));
    state.insert("last".to_string(), Value::Bool(index0 + 1 == length));
    state.insert("length".to_string(), Value::from(length));
    state.insert("parent".to_string(), parent);
    Value::Map(state)
}

/// Flattens an iterable into `(key, value)` items. Sequences and strings
/// carry no key; mapping iteration keeps insertion order.
fn iteration_items(iterable: &Value) -> Result<Vec<(Option<Value>, Value)>, Error> {
    match iterable {
        Value::Seq(items) => Ok(items.iter().map(|v| (None, v.clone())).collect()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| (Some(Value::from(k.as_str())), v.clone()))
            .collect()),
        Value::String(s) => Ok(s
            .chars()
            .map(|c| (None, Value::String(c.to_string())))
            .collect()),
        other => Err(Error::invalid_operation(format!(
            "cannot iterate over {}",
            other.kind()
        ))),
    }
}

/// Resolves a `for a, b in ...` binding for one item. Mapping entries bind
/// key and value; sequence elements must themselves be two-element
/// sequences.
fn unpack_pair(key: Option<Value>, value: Value) -> Result<(Value, Value), Error> {
    if let Some(key) = key {
        return Ok((key, value));
    }
    match value {
        Value::Seq(mut items) if items.len() == 2 => {
            let second = items.pop().unwrap_or(Value::None);
            let first = items.pop().unwrap_or(Value::None);
            Ok((first, second))
        }
        other => Err(Error::cannot_unpack(format!(
            "expected a pair, got {}",
            other.kind()
        ))),
    }
}

fn negate(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Int(i) => match i.checked_neg() {
            Some(n) => Ok(Value::Int(n)),
            None => Err(Error::invalid_operation("integer overflow in negation")),
        },
        Value::UInt(u) => match i64::try_from(*u).ok().and_then(i64::checked_neg) {
            Some(n) => Ok(Value::Int(n)),
            None => Err(Error::invalid_operation("integer overflow in negation")),
        },
        Value::F32(f) => Ok(Value::F32(-f)),
        Value::F64(f) => Ok(Value::F64(-f)),
        other => Err(Error::invalid_operation(format!(
            "cannot negate {}",
            other.kind()
        ))),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::UInt(u) => i64::try_from(*u).ok(),
        _ => None,
    }
}

fn binop(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    if op == BinOp::Concat {
        return Ok(Value::String(format!("{lhs}{rhs}")));
    }

    // Integer operands stay integral except for `/`, which is always true
    // division.
    if op != BinOp::Div {
        if let (Some(a), Some(b)) = (as_i64(lhs), as_i64(rhs)) {
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Rem => {
                    if b == 0 {
                        return Err(Error::invalid_operation("remainder by zero"));
                    }
                    a.checked_rem(b)
                }
                BinOp::Div | BinOp::Concat => None,
            };
            return match result {
                Some(n) => Ok(Value::Int(n)),
                None => Err(Error::invalid_operation("integer overflow")),
            };
        }
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(Error::invalid_operation(format!(
            "cannot apply arithmetic to {} and {}",
            lhs.kind(),
            rhs.kind()
        )));
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Error::invalid_operation("division by zero"));
            }
            a / b
        }
        BinOp::Rem => {
            if b == 0.0 {
                return Err(Error::invalid_operation("remainder by zero"));
            }
            a % b
        }
        BinOp::Concat => unreachable!("handled above"),
    };
    Ok(Value::F64(result))
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, Error> {
    match op {
        CmpOp::Eq => return Ok(lhs == rhs),
        CmpOp::Ne => return Ok(lhs != rhs),
        _ => {}
    }
    let ordering = if lhs.is_number() && rhs.is_number() {
        let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(Error::invalid_operation(format!(
                    "cannot order {} and {}",
                    lhs.kind(),
                    rhs.kind()
                )))
            }
        };
        a.partial_cmp(&b)
    } else if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
        Some(a.cmp(b))
    } else {
        return Err(Error::invalid_operation(format!(
            "cannot order {} and {}",
            lhs.kind(),
            rhs.kind()
        )));
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
    })
}
