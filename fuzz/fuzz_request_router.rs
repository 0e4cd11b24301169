//! Fuzz target for forwarded request routing.
//!
//! Run with: cargo +nightly fuzz run fuzz_request_router
//!
//! A resident instance routes whatever bytes a peer sends. Lenient routing
//! must never panic and must always produce a reply.

#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use solo_config::LoggingConfig;
use solo_core::Router;
use solo_core::logging::{self, MessagePattern};

type Subscriber = Box<dyn tracing::Subscriber + Send + Sync>;

fn router() -> &'static Router {
    static ROUTER: OnceLock<(Router, Subscriber)> = OnceLock::new();
    &ROUTER
        .get_or_init(|| {
            let (subscriber, log) = logging::build(&LoggingConfig::default(), std::io::sink)
                .expect("default logging config is valid");
            (Router::new(log), Box::new(subscriber))
        })
        .0
}

fuzz_target!(|data: &[u8]| {
    let reply = router().process_line(data);
    let _ = reply.text();

    let pattern = String::from_utf8_lossy(data);
    assert_eq!(MessagePattern::parse(&pattern).as_str(), pattern);
});
