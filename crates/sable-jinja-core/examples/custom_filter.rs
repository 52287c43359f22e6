// SPDX-License-Identifier: Apache-2.0 OR MIT
use sable_jinja_core::{install_default_filters, Environment, Value};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Start from the stock filter set, then add a custom one.
    let mut env = Environment::new();
    install_default_filters(&mut env);
    env.add_filter("shout", |value: &Value, _args: &[Value]| {
        Ok(Value::String(format!("{}!", value.to_string().to_uppercase())))
    });

    env.add_template("greet", "{{ phrase|trim|shout }}")?;
    let output = env.render_template("greet", &json!({"phrase": "  hello core  "}))?;

    println!("{output}");
    assert_eq!(output, "HELLO CORE!");
    Ok(())
}
