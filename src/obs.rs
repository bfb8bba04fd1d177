use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber.
///
/// Filter defaults to `portal_session=debug` unless `RUST_LOG` overrides it.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal_session=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
