#![forbid(unsafe_code)]
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Standard filters, tests, and global functions for the Sable template
//! engine.
//!
//! The engine crate ships with no callables at all. This crate provides the
//! default set and an [`environment`] constructor that comes with everything
//! installed:
//!
//! ```
//! let env = sable_jinja_core::environment();
//! env.add_template("t", "{{ names|join(\", \") }}")?;
//! let out = env.render_template("t", &serde_json::json!({"names": ["a", "b"]}))?;
//! assert_eq!(out, "a, b");
//! # Ok::<(), sable_jinja_core::Error>(())
//! ```

pub use sable_jinja_engine::{Environment, Error, Object, Value, ValueMap};

/// Creates an environment with the full default capability set installed.
pub fn environment() -> Environment {
    let mut env = Environment::new();
    install_default_filters(&mut env);
    install_default_tests(&mut env);
    install_default_functions(&mut env);
    env
}

/// Installs the standard filters into an existing environment.
pub fn install_default_filters(env: &mut Environment) {
    env.add_filter("length", filter_length);
    env.add_filter("count", filter_length);
    env.add_filter("default", filter_default);
    env.add_filter("upper", filter_upper);
    env.add_filter("lower", filter_lower);
    env.add_filter("capitalize", filter_capitalize);
    env.add_filter("title", filter_title);
    env.add_filter("trim", filter_trim);
    env.add_filter("join", filter_join);
    env.add_filter("first", filter_first);
    env.add_filter("last", filter_last);
    env.add_filter("reverse", filter_reverse);
    env.add_filter("replace", filter_replace);
    env.add_filter("abs", filter_abs);
    env.add_filter("int", filter_int);
    env.add_filter("float", filter_float);
}

/// Installs the standard tests into an existing environment.
pub fn install_default_tests(env: &mut Environment) {
    env.add_test("defined", |value: &Value, args: &[Value]| {
        no_args("defined", args)?;
        Ok(!value.is_none())
    });
    env.add_test("undefined", |value: &Value, args: &[Value]| {
        no_args("undefined", args)?;
        Ok(value.is_none())
    });
    env.add_test("none", |value: &Value, args: &[Value]| {
        no_args("none", args)?;
        Ok(value.is_none())
    });
    env.add_test("string", |value: &Value, args: &[Value]| {
        no_args("string", args)?;
        Ok(value.as_str().is_some())
    });
    env.add_test("number", |value: &Value, args: &[Value]| {
        no_args("number", args)?;
        Ok(value.is_number())
    });
    env.add_test("sequence", |value: &Value, args: &[Value]| {
        no_args("sequence", args)?;
        Ok(matches!(value, Value::Seq(_)))
    });
    env.add_test("mapping", |value: &Value, args: &[Value]| {
        no_args("mapping", args)?;
        Ok(matches!(value, Value::Map(_)))
    });
    env.add_test("odd", |value: &Value, args: &[Value]| {
        no_args("odd", args)?;
        Ok(integral("odd", value)? % 2 != 0)
    });
    env.add_test("even", |value: &Value, args: &[Value]| {
        no_args("even", args)?;
        Ok(integral("even", value)? % 2 == 0)
    });
}

/// Installs the standard global functions into an existing environment.
pub fn install_default_functions(env: &mut Environment) {
    env.add_function("range", function_range);
    env.add_function("dict", function_dict);
}

fn no_args(name: &'static str, args: &[Value]) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::TooManyArguments {
            name: name.to_string(),
        })
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidOperation {
        message: message.into(),
    }
}

fn integral(name: &str, value: &Value) -> Result<i64, Error> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::UInt(u) => i64::try_from(*u)
            .map_err(|_| invalid(format!("{name} argument out of integer range"))),
        other => Err(invalid(format!("{name} expects an integer, got {}", other.kind()))),
    }
}

fn filter_length(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("length", args)?;
    match value.len() {
        Some(len) => Ok(Value::from(len)),
        None => Err(invalid(format!("{} has no length", value.kind()))),
    }
}

fn filter_default(value: &Value, args: &[Value]) -> Result<Value, Error> {
    let (fallback, also_falsy) = match args {
        [fallback] => (fallback, false),
        [fallback, flag] => (fallback, flag.is_truthy()),
        [] => {
            return Err(Error::MissingArgument {
                name: "default".to_string(),
            })
        }
        _ => {
            return Err(Error::TooManyArguments {
                name: "default".to_string(),
            })
        }
    };
    let miss = value.is_none() || (also_falsy && !value.is_truthy());
    Ok(if miss { fallback.clone() } else { value.clone() })
}

fn filter_upper(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("upper", args)?;
    Ok(Value::String(value.to_string().to_uppercase()))
}

fn filter_lower(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("lower", args)?;
    Ok(Value::String(value.to_string().to_lowercase()))
}

fn filter_capitalize(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("capitalize", args)?;
    let text = value.to_string();
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(Value::String(capitalized))
}

fn filter_title(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("title", args)?;
    let text = value.to_string();
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    Ok(Value::String(out))
}

fn filter_trim(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("trim", args)?;
    Ok(Value::String(value.to_string().trim().to_string()))
}

fn filter_join(value: &Value, args: &[Value]) -> Result<Value, Error> {
    let separator = match args {
        [] => String::new(),
        [sep] => sep.to_string(),
        _ => {
            return Err(Error::TooManyArguments {
                name: "join".to_string(),
            })
        }
    };
    let Value::Seq(items) = value else {
        return Err(invalid(format!("cannot join {}", value.kind())));
    };
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    Ok(Value::String(parts.join(&separator)))
}

fn filter_first(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("first", args)?;
    match value {
        Value::Seq(items) => Ok(items.first().cloned().unwrap_or(Value::None)),
        Value::String(s) => Ok(s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::None)),
        other => Err(invalid(format!("{} has no first element", other.kind()))),
    }
}

fn filter_last(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("last", args)?;
    match value {
        Value::Seq(items) => Ok(items.last().cloned().unwrap_or(Value::None)),
        Value::String(s) => Ok(s
            .chars()
            .next_back()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::None)),
        other => Err(invalid(format!("{} has no last element", other.kind()))),
    }
}

fn filter_reverse(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("reverse", args)?;
    match value {
        Value::Seq(items) => {
            let mut reversed = items.clone();
            reversed.reverse();
            Ok(Value::Seq(reversed))
        }
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        other => Err(invalid(format!("cannot reverse {}", other.kind()))),
    }
}

fn filter_replace(value: &Value, args: &[Value]) -> Result<Value, Error> {
    let [from, to] = args else {
        return Err(if args.len() < 2 {
            Error::MissingArgument {
                name: "replace".to_string(),
            }
        } else {
            Error::TooManyArguments {
                name: "replace".to_string(),
            }
        });
    };
    let text = value.to_string();
    Ok(Value::String(text.replace(&from.to_string(), &to.to_string())))
}

fn filter_abs(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("abs", args)?;
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| invalid("integer overflow in abs")),
        Value::UInt(u) => Ok(Value::UInt(*u)),
        Value::F32(f) => Ok(Value::F32(f.abs())),
        Value::F64(f) => Ok(Value::F64(f.abs())),
        other => Err(invalid(format!("cannot take abs of {}", other.kind()))),
    }
}

fn filter_int(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("int", args)?;
    match value {
        Value::Int(_) | Value::UInt(_) => Ok(value.clone()),
        Value::F32(f) => Ok(Value::Int(*f as i64)),
        Value::F64(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| invalid(format!("cannot convert {s:?} to int"))),
        other => Err(invalid(format!("cannot convert {} to int", other.kind()))),
    }
}

fn filter_float(value: &Value, args: &[Value]) -> Result<Value, Error> {
    no_args("float", args)?;
    match value {
        Value::F32(_) | Value::F64(_) => Ok(value.clone()),
        Value::Int(i) => Ok(Value::F64(*i as f64)),
        Value::UInt(u) => Ok(Value::F64(*u as f64)),
        Value::Bool(b) => Ok(Value::F64(f64::from(u8::from(*b)))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::F64)
            .map_err(|_| invalid(format!("cannot convert {s:?} to float"))),
        other => Err(invalid(format!("cannot convert {} to float", other.kind()))),
    }
}

/// Upper bound on elements produced by `range`, so a huge span in context
/// data fails the render instead of exhausting memory.
const MAX_RANGE_LEN: usize = 100_000;

fn function_range(args: &[Value]) -> Result<Value, Error> {
    let (start, stop, step) = match args {
        [stop] => (0, integral("range", stop)?, 1),
        [start, stop] => (integral("range", start)?, integral("range", stop)?, 1),
        [start, stop, step] => (
            integral("range", start)?,
            integral("range", stop)?,
            integral("range", step)?,
        ),
        [] => {
            return Err(Error::MissingArgument {
                name: "range".to_string(),
            })
        }
        _ => {
            return Err(Error::TooManyArguments {
                name: "range".to_string(),
            })
        }
    };
    if step == 0 {
        return Err(invalid("range step must not be zero"));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        if items.len() >= MAX_RANGE_LEN {
            return Err(invalid(format!(
                "range produces more than {MAX_RANGE_LEN} elements"
            )));
        }
        items.push(Value::Int(current));
        // Stepping past the integer limit also means stepping past `stop`.
        let Some(next) = current.checked_add(step) else {
            break;
        };
        current = next;
    }
    Ok(Value::Seq(items))
}

/// `dict("a", 1, "b", 2)` builds a mapping from alternating keys and values.
fn function_dict(args: &[Value]) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::MissingArgument {
            name: "dict".to_string(),
        });
    }
    let mut map = ValueMap::new();
    for pair in args.chunks(2) {
        map.insert(pair[0].to_string(), pair[1].clone());
    }
    Ok(Value::Map(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, json: serde_json::Value) -> Result<String, Error> {
        let env = environment();
        env.render_str(source, &Value::from_serde(json))
    }

    #[test]
    fn length_counts_every_element() {
        let out = render("{{ items|length }}", serde_json::json!({
            "items": [0, "", false, null, 1]
        }))
        .unwrap();
        assert_eq!(out, "5");
    }

    #[test]
    fn length_counts_string_chars() {
        assert_eq!(
            render("{{ s|length }}", serde_json::json!({"s": "héllo"})).unwrap(),
            "5"
        );
    }

    #[test]
    fn count_is_an_alias() {
        assert_eq!(
            render("{{ items|count }}", serde_json::json!({"items": [1, 2]})).unwrap(),
            "2"
        );
    }

    #[test]
    fn default_covers_missing_values() {
        assert_eq!(
            render("{{ name|default(\"anon\") }}", serde_json::json!({})).unwrap(),
            "anon"
        );
        assert_eq!(
            render("{{ name|default(\"anon\") }}", serde_json::json!({"name": "Ada"})).unwrap(),
            "Ada"
        );
    }

    #[test]
    fn default_with_falsy_flag() {
        assert_eq!(
            render("{{ n|default(7, true) }}", serde_json::json!({"n": 0})).unwrap(),
            "7"
        );
    }

    #[test]
    fn string_case_filters() {
        assert_eq!(render("{{ \"rust\"|upper }}", serde_json::json!({})).unwrap(), "RUST");
        assert_eq!(render("{{ \"RUST\"|lower }}", serde_json::json!({})).unwrap(), "rust");
        assert_eq!(
            render("{{ \"hello world\"|capitalize }}", serde_json::json!({})).unwrap(),
            "Hello world"
        );
        assert_eq!(
            render("{{ \"hello world\"|title }}", serde_json::json!({})).unwrap(),
            "Hello World"
        );
    }

    #[test]
    fn join_renders_elements_unquoted() {
        assert_eq!(
            render("{{ names|join(\", \") }}", serde_json::json!({"names": ["a", "b", "c"]}))
                .unwrap(),
            "a, b, c"
        );
    }

    #[test]
    fn first_last_reverse() {
        let ctx = serde_json::json!({"xs": [1, 2, 3]});
        assert_eq!(render("{{ xs|first }}", ctx.clone()).unwrap(), "1");
        assert_eq!(render("{{ xs|last }}", ctx.clone()).unwrap(), "3");
        assert_eq!(render("{{ xs|reverse }}", ctx).unwrap(), "[3, 2, 1]");
    }

    #[test]
    fn replace_rewrites_substrings() {
        assert_eq!(
            render("{{ \"a-b-c\"|replace(\"-\", \".\") }}", serde_json::json!({})).unwrap(),
            "a.b.c"
        );
    }

    #[test]
    fn numeric_coercion_filters() {
        assert_eq!(render("{{ \" 42 \"|int }}", serde_json::json!({})).unwrap(), "42");
        assert_eq!(render("{{ 3|float }}", serde_json::json!({})).unwrap(), "3.0");
        assert_eq!(render("{{ -5|abs }}", serde_json::json!({})).unwrap(), "5");
    }

    #[test]
    fn int_rejects_garbage() {
        let err = render("{{ \"abc\"|int }}", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    fn defined_and_none_tests() {
        let tpl = "{% if user is defined %}yes{% else %}no{% endif %}";
        assert_eq!(render(tpl, serde_json::json!({"user": "x"})).unwrap(), "yes");
        assert_eq!(render(tpl, serde_json::json!({})).unwrap(), "no");
        assert_eq!(
            render("{{ x is none }}", serde_json::json!({"x": null})).unwrap(),
            "true"
        );
    }

    #[test]
    fn type_tests() {
        assert_eq!(render("{{ x is string }}", serde_json::json!({"x": "s"})).unwrap(), "true");
        assert_eq!(render("{{ x is number }}", serde_json::json!({"x": 1.5})).unwrap(), "true");
        assert_eq!(
            render("{{ x is sequence }}", serde_json::json!({"x": [1]})).unwrap(),
            "true"
        );
        assert_eq!(
            render("{{ x is mapping }}", serde_json::json!({"x": {}})).unwrap(),
            "true"
        );
    }

    #[test]
    fn parity_tests() {
        assert_eq!(render("{{ 3 is odd }}", serde_json::json!({})).unwrap(), "true");
        assert_eq!(render("{{ 4 is even }}", serde_json::json!({})).unwrap(), "true");
        assert_eq!(render("{{ 3 is not even }}", serde_json::json!({})).unwrap(), "true");
    }

    #[test]
    fn parity_rejects_non_integers() {
        let err = render("{{ \"x\" is odd }}", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    fn range_variants() {
        assert_eq!(render("{{ range(3) }}", serde_json::json!({})).unwrap(), "[0, 1, 2]");
        assert_eq!(render("{{ range(1, 4) }}", serde_json::json!({})).unwrap(), "[1, 2, 3]");
        assert_eq!(
            render("{{ range(5, 0, -2) }}", serde_json::json!({})).unwrap(),
            "[5, 3, 1]"
        );
    }

    #[test]
    fn range_near_the_integer_limit_terminates() {
        let out = render(
            "{{ range(s, t, p)|length }}",
            serde_json::json!({"s": i64::MAX - 1, "t": i64::MAX, "p": 2}),
        )
        .unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn range_caps_element_count() {
        let err = render("{{ range(0, 9000000000000000000) }}", serde_json::json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("range produces more than"));
    }

    #[test]
    fn range_zero_step_errors() {
        let err = render("{{ range(0, 3, 0) }}", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    fn dict_builds_a_mapping() {
        assert_eq!(
            render("{{ dict(\"a\", 1, \"b\", 2).b }}", serde_json::json!({})).unwrap(),
            "2"
        );
    }

    #[test]
    fn filter_arity_is_checked() {
        let err = render("{{ \"x\"|upper(1) }}", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::TooManyArguments { .. }));
        let err = render("{{ x|default }}", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { .. }));
    }
}
