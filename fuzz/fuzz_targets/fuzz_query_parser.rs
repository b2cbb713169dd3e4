#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Malformed queries must come back as errors, never panics
    let _ = seekql::engine::memory::parser::parse_query(data);
});
