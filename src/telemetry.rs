use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize structured logging. `RUST_LOG` overrides the default filter.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roundsmith=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
