//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,pdf_explainer=info,tower_http=info";

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Logs go to stderr so `explainer explain` can print JSON on stdout.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "debug,pdf_explainer=debug,tower_http=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(false),
        )
        .try_init()
        .ok();
}
