//! Logger setup for the quorate binary.

use std::env;

/// Initializes the global logger from the `RUST_LOG` directives. Without the
/// variable the process stays quiet apart from this notice.
pub fn init_logging() {
    match env::var("RUST_LOG") {
        Ok(directives) => {
            pretty_env_logger::formatted_timed_builder()
                .parse_filters(&directives)
                .format_timestamp_millis()
                .init();
            log::info!("Logging enabled with directives: {directives}");
        }
        Err(_) => println!("Logging disabled, set RUST_LOG to enable"),
    }
}
