use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{Config, LogFormat};

pub fn initialize_tracing(config: &Config) {
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match (config.logging.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => format.compact().without_time().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => format.with_ansi(false).boxed(),
        (LogFormat::Json, _) => format
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        // INFO by default, with looser levels for our own crates.
        Err(_) => EnvFilter::new(
            "INFO,\
            ste_engine=DEBUG,\
            ste_server=DEBUG,\
            ",
        ),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(config.logging.level.to_filter()))
        .with(env_filter)
        .init();
}
