// Logger setup for the muxbridge binary
use log::LevelFilter;

const OWN_TARGETS: [&str; 3] = ["muxbridge", "muxbridge_control", "muxbridge_types"];

/// Parse a level name, ignoring case. Unknown names yield `None`.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

/// Initialise env_logger once.
///
/// `RUST_LOG` wins when set; otherwise `level` (falling back to `info`).
/// `verbose` raises muxbridge's own targets to `debug` either way.
pub fn init(level: Option<&str>, verbose: bool) {
    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
    } else {
        let mut builder = env_logger::Builder::new();
        let filter = match level {
            Some(name) => parse_level(name).unwrap_or_else(|| {
                eprintln!("Unknown log level '{}', using info", name);
                LevelFilter::Info
            }),
            None => LevelFilter::Info,
        };
        builder.filter_level(filter);
        builder
    };

    if verbose {
        for target in OWN_TARGETS {
            builder.filter_module(target, LevelFilter::Debug);
        }
    }

    builder.format_timestamp_millis();
    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}
