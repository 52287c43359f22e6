#![no_main]

use libfuzzer_sys::fuzz_target;
use sable_jinja_engine::parse;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let _ = parse(source);
    }
});
