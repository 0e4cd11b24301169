//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Exercises `AppConfig::parse()` with arbitrary input to find panics or
//! hangs in TOML parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = solo_config::AppConfig::parse(s);
    }
});
