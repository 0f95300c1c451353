use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use sprechen_core::config::LoggingConfig;

/// Base level when `RUST_LOG` is unset: the configured level, else `debug`
/// with `--verbose`, else `info`.
fn default_level(logging: Option<&LoggingConfig>, verbose: bool) -> String {
    logging
        .and_then(|l| l.level.clone())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

fn build_filter(logging: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(logging, verbose)));

    for raw in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log filter '{raw}': {e}"),
        }
    }
    filter
}

/// Install the global subscriber.
pub fn init(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = build_filter(logging, verbose);
    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}
