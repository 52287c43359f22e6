// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Jinja-inspired template engine with a thread-safe template registry.
//!
//! Templates are registered once by name, compiled to an AST at registration
//! time, and rendered many times against host-supplied context data. The
//! syntax covers interpolation (`{{ expr }}`), control flow (`{% if %}`,
//! `{% for %}` with an `else` branch and the `loop` variable), scope-local
//! assignment (`{% set %}`), includes, named blocks, comments (`{# #}`),
//! filters, tests, and global functions.
//!
//! The engine itself ships with no filters, tests, or functions; the
//! `sable-jinja-core` crate installs the standard set.
//!
//! ```
//! use sable_jinja_engine::{Environment, Value};
//!
//! let env = Environment::new();
//! env.add_template("hello", "Hello, {{ name }}!")?;
//! let out = env.render_template("hello", &serde_json::json!({"name": "World"}))?;
//! assert_eq!(out, "Hello, World!");
//! # Ok::<(), sable_jinja_engine::Error>(())
//! ```
//!
//! Context data crosses the host boundary through serde: anything
//! implementing [`serde::Serialize`] becomes a [`Value`] tree, with struct
//! fields exposed as mapping keys. Missing lookup paths resolve to an empty
//! rendering rather than an error unless strict mode is enabled.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod telemetry;
pub mod value;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;

use crate::ast::Stmt;
pub use crate::error::Error;
pub use crate::parser::parse;
pub use crate::runtime::{Capabilities, FilterFn, FunctionFn, TestFn};
pub use crate::value::{to_value, Object, Value, ValueMap};

/// A compiled template: name, source, and parsed body.
///
/// Templates are immutable once built and shared behind [`Arc`], so renders
/// never block registration.
#[derive(Debug)]
pub struct Template {
    name: String,
    source: String,
    fingerprint: u64,
    body: Vec<Stmt>,
}

impl Template {
    fn compile(name: &str, source: &str) -> Result<Self, Error> {
        let started = Instant::now();
        let body = parser::parse(source)?;
        telemetry::record_parse(name, started.elapsed());
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            fingerprint: fingerprint(source),
            body,
        })
    }

    /// The registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The original template source.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn body(&self) -> &[Stmt] {
        &self.body
    }
}

fn fingerprint(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Template registry plus evaluation configuration.
///
/// Registration takes a short write lock; rendering takes a read lock only
/// long enough to clone the [`Arc`] handle, so concurrent renders proceed in
/// parallel. Re-registering identical source under an existing name is a
/// no-op and skips the parse entirely.
#[derive(Debug, Default)]
pub struct Environment {
    templates: RwLock<HashMap<String, Arc<Template>>>,
    capabilities: Capabilities,
    strict: bool,
}

impl Environment {
    /// Creates an empty environment with no templates and no capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filter usable as `value|name(args)`.
    pub fn add_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.capabilities.add_filter(name, f);
    }

    /// Registers a test usable as `value is name(args)`.
    pub fn add_test<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<bool, Error> + Send + Sync + 'static,
    {
        self.capabilities.add_test(name, f);
    }

    /// Registers a global function usable as `name(args)`.
    pub fn add_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.capabilities.add_function(name, f);
    }

    /// The callables currently registered.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// When strict, a plain name that resolves nowhere in scope fails the
    /// render with [`Error::Undefined`] instead of producing empty output.
    /// Attribute and index misses stay permissive either way.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Reports whether strict name resolution is enabled.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Parses `source` and registers it under `name`.
    ///
    /// If a template with the same name and byte-identical source is already
    /// registered this returns without reparsing. Different source under an
    /// existing name replaces the old template; in-flight renders keep their
    /// handle to the version they started with.
    pub fn add_template(&self, name: &str, source: &str) -> Result<(), Error> {
        {
            let templates = self
                .templates
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = templates.get(name) {
                if existing.fingerprint == fingerprint(source) && existing.source == source {
                    return Ok(());
                }
            }
        }
        let template = Arc::new(Template::compile(name, source)?);
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        templates.insert(name.to_string(), template);
        Ok(())
    }

    /// Fetches a registered template by name.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound {
                name: name.to_string(),
            })
    }

    /// Renders a registered template with any serializable context.
    ///
    /// The context serializes to a mapping whose keys become template
    /// variables. Errors are all-or-nothing: on failure no partial output is
    /// returned.
    pub fn render_template<S: Serialize>(&self, name: &str, ctx: &S) -> Result<String, Error> {
        let ctx = to_value(ctx)?;
        self.render_value(name, &ctx)
    }

    /// Renders a registered template with an already-converted context.
    pub fn render_value(&self, name: &str, ctx: &Value) -> Result<String, Error> {
        let template = self.get_template(name)?;
        let started = Instant::now();
        let out = runtime::render(self, template.body(), root_scope(ctx)?)?;
        telemetry::record_render(template.name(), started.elapsed());
        Ok(out)
    }

    /// Parses and renders a one-off template without registering it.
    pub fn render_str(&self, source: &str, ctx: &Value) -> Result<String, Error> {
        let body = parser::parse(source)?;
        runtime::render(self, &body, root_scope(ctx)?)
    }
}

fn root_scope(ctx: &Value) -> Result<ValueMap, Error> {
    match ctx {
        Value::Map(map) => Ok(map.clone()),
        Value::None => Ok(ValueMap::new()),
        other => Err(Error::invalid_operation(format!(
            "render context must be a mapping, got {}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_renders() {
        let env = Environment::new();
        env.add_template("hello", "Hello, {{ name }}!").unwrap();
        let out = env
            .render_template("hello", &serde_json::json!({"name": "World"}))
            .unwrap();
        assert_eq!(out, "Hello, World!");
    }

    #[test]
    fn reregistering_identical_source_is_a_noop() {
        let env = Environment::new();
        env.add_template("t", "{{ x }}").unwrap();
        let before = env.get_template("t").unwrap();
        env.add_template("t", "{{ x }}").unwrap();
        let after = env.get_template("t").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn reregistering_changed_source_replaces() {
        let env = Environment::new();
        env.add_template("t", "a").unwrap();
        env.add_template("t", "b").unwrap();
        assert_eq!(env.get_template("t").unwrap().source(), "b");
        assert_eq!(
            env.render_template("t", &serde_json::json!({})).unwrap(),
            "b"
        );
    }

    #[test]
    fn missing_template_is_reported_by_name() {
        let env = Environment::new();
        let err = env
            .render_template("nope", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { name } if name == "nope"));
    }

    #[test]
    fn registration_rejects_bad_syntax() {
        let env = Environment::new();
        let err = env.add_template("bad", "{% if x %}").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn includes_resolve_through_the_registry() {
        let env = Environment::new();
        env.add_template("header", "== {{ title }} ==").unwrap();
        env.add_template("page", "{% include \"header\" %}\nbody")
            .unwrap();
        let out = env
            .render_template("page", &serde_json::json!({"title": "Docs"}))
            .unwrap();
        assert_eq!(out, "== Docs ==\nbody");
    }

    #[test]
    fn cyclic_includes_hit_the_depth_guard() {
        let env = Environment::new();
        env.add_template("a", "{% include \"b\" %}").unwrap();
        env.add_template("b", "{% include \"a\" %}").unwrap();
        let err = env
            .render_template("a", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::BadInclude { .. }));
    }

    #[test]
    fn structs_serialize_to_mapping_context() {
        #[derive(serde::Serialize)]
        struct Contact {
            email: String,
        }
        #[derive(serde::Serialize)]
        struct Employee {
            #[serde(flatten)]
            contact: Contact,
            name: String,
        }
        let env = Environment::new();
        env.add_template("t", "{{ e.name }} <{{ e.email }}>").unwrap();
        let ctx = serde_json::json!({
            "e": Employee {
                contact: Contact { email: "ada@example.com".into() },
                name: "Ada".into(),
            }
        });
        assert_eq!(
            env.render_template("t", &ctx).unwrap(),
            "Ada <ada@example.com>"
        );
    }

    #[test]
    fn non_mapping_context_is_rejected() {
        let env = Environment::new();
        env.add_template("t", "x").unwrap();
        let err = env.render_template("t", &serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    fn concurrent_renders_share_the_registry() {
        let env = Arc::new(Environment::new());
        env.add_template("t", "{{ n }}").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let env = Arc::clone(&env);
                std::thread::spawn(move || {
                    env.render_template("t", &serde_json::json!({ "n": n }))
                        .unwrap()
                })
            })
            .collect();
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), n.to_string());
        }
    }

    #[test]
    fn failed_renders_return_no_partial_output() {
        let env = Environment::new();
        env.add_template("t", "before {{ x|nope }} after").unwrap();
        let err = env.render_template("t", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownFilter { .. }));
    }
}
