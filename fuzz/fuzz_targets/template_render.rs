#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use sable_jinja_core::environment;
use sable_jinja_engine::{Environment, Value};

static ENV: Lazy<Environment> = Lazy::new(environment);

fuzz_target!(|data: &[u8]| {
    let source = match std::str::from_utf8(data) {
        Ok(src) => src,
        Err(_) => return,
    };

    let _ = ENV.render_str(source, &Value::None);
});
