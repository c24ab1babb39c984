pub mod catalog;
pub mod config;
pub mod core_state;
pub mod intelligence; // Aggregation, duplicate therapy, criteria and interaction rules, PRM sync
pub mod models;
pub mod pipeline; // Hospital export import: normalize, match, parse
pub mod store;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Reads `RUST_LOG`, falling back to [`config::default_log_filter`]. Safe to
/// call more than once; later calls are ignored.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
    }
}
