// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::sync::Arc;

use sable_jinja_engine::{Environment, Error, Object, Value, ValueMap};
use serde::Serialize;

#[derive(Serialize)]
struct Contact {
    email: String,
    phone: String,
}

#[derive(Serialize)]
struct Employee {
    #[serde(flatten)]
    contact: Contact,
    name: String,
    reports: u32,
}

#[test]
fn flattened_struct_fields_resolve_as_direct_attributes() {
    let env = Environment::new();
    env.add_template("card", "{{ e.name }} <{{ e.email }}> x{{ e.reports }}")
        .unwrap();
    let ctx = serde_json::json!({
        "e": Employee {
            contact: Contact {
                email: "ada@example.com".into(),
                phone: "555".into(),
            },
            name: "Ada".into(),
            reports: 3,
        }
    });
    assert_eq!(
        env.render_template("card", &ctx).unwrap(),
        "Ada <ada@example.com> x3"
    );
}

#[test]
fn one_template_renders_many_contexts() {
    let env = Environment::new();
    env.add_template("row", "{{ n }};").unwrap();
    let mut out = String::new();
    for n in 0..3 {
        out.push_str(&env.render_template("row", &serde_json::json!({ "n": n })).unwrap());
    }
    assert_eq!(out, "0;1;2;");
}

#[test]
fn loops_over_serialized_struct_sequences() {
    #[derive(Serialize)]
    struct Item {
        sku: String,
        qty: u32,
    }
    let env = Environment::new();
    env.add_template(
        "manifest",
        "{% for item in items %}{{ loop.index }}. {{ item.sku }} x{{ item.qty }}\n{% endfor %}",
    )
    .unwrap();
    let ctx = serde_json::json!({
        "items": [
            Item { sku: "A-1".into(), qty: 2 },
            Item { sku: "B-7".into(), qty: 1 },
        ]
    });
    assert_eq!(
        env.render_template("manifest", &ctx).unwrap(),
        "1. A-1 x2\n2. B-7 x1\n"
    );
}

#[test]
fn includes_see_the_enclosing_scope() {
    let env = Environment::new();
    env.add_template("greeting", "Hello {{ who }}").unwrap();
    env.add_template("page", "{% set who = \"crew\" %}{% include \"greeting\" %}!")
        .unwrap();
    assert_eq!(
        env.render_template("page", &serde_json::json!({})).unwrap(),
        "Hello crew!"
    );
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    assignee: &'static str,
}

impl Object for Ticket {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "assignee" => Some(Value::from(self.assignee)),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        format!("Ticket#{}", self.id)
    }
}

#[test]
fn dynamic_objects_expose_fields_and_repr() {
    let env = Environment::new();
    env.add_template("t", "{{ ticket }} -> {{ ticket.assignee }} ({{ ticket.closed }})")
        .unwrap();
    let mut ctx = ValueMap::new();
    ctx.insert(
        "ticket".to_string(),
        Value::Object(Arc::new(Ticket {
            id: 42,
            assignee: "mara",
        })),
    );
    assert_eq!(
        env.render_value("t", &Value::Map(ctx)).unwrap(),
        "Ticket#42 -> mara ()"
    );
}

#[test]
fn strict_mode_keeps_attribute_misses_permissive() {
    let mut env = Environment::new();
    env.set_strict(true);
    env.add_template("t", "[{{ user.nickname }}]").unwrap();
    let out = env
        .render_template("t", &serde_json::json!({"user": {"name": "Ada"}}))
        .unwrap();
    assert_eq!(out, "[]");
}

#[test]
fn strict_mode_fails_on_unknown_plain_names() {
    let mut env = Environment::new();
    env.set_strict(true);
    env.add_template("t", "{{ user.name }} {{ ghost }}").unwrap();
    let err = env
        .render_template("t", &serde_json::json!({"user": {"name": "Ada"}}))
        .unwrap_err();
    assert!(matches!(err, Error::Undefined { name } if name == "ghost"));
}

#[test]
fn strict_mode_still_answers_definedness_tests() {
    let mut env = Environment::new();
    env.set_strict(true);
    env.add_test("defined", |value: &Value, _args: &[Value]| {
        Ok(!value.is_none())
    });
    env.add_template(
        "t",
        "{% if ghost is defined %}yes{% else %}no{% endif %}/{% if ghost.name is defined %}yes{% else %}no{% endif %}",
    )
    .unwrap();
    let out = env.render_template("t", &serde_json::json!({})).unwrap();
    assert_eq!(out, "no/no");
}

#[test]
fn unrepresentable_context_reports_serialization_failure() {
    let env = Environment::new();
    env.add_template("t", "x").unwrap();
    let err = env
        .render_template("t", &std::collections::HashMap::from([((1u32, 2u32), "v")]))
        .unwrap_err();
    assert!(matches!(err, Error::BadSerialization { .. }));
}
