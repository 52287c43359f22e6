// SPDX-License-Identifier: Apache-2.0 OR MIT
use sable_jinja_core::environment;
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = environment();
    env.add_template(
        "report",
        "Deploys for {{ service|upper }}:\n\
         {% for d in deploys %}{{ loop.index }}. {{ d.env }} at {{ d.at }}\n\
         {% else %}no deploys yet\n{% endfor %}",
    )?;

    let rendered = env.render_template(
        "report",
        &json!({
            "service": "billing",
            "deploys": [
                {"env": "staging", "at": "09:14"},
                {"env": "prod", "at": "11:02"},
            ],
        }),
    )?;
    print!("{rendered}");
    Ok(())
}
