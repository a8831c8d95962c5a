//! Fuzz target for evq.json parsing and validation.

#![no_main]

use evq_config::EngineConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = EngineConfig::from_json(text) {
        // Overrides may produce any combination of values; validation must
        // reject bad ones without panicking.
        let _ = config.validate();
    }
});
