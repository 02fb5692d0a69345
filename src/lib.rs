pub mod checkpoint;
pub mod config;
pub mod context;
pub mod db;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod service;

pub use service::{TranslateError, TranslateRequest, TranslateResponse, TranslateService};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, logging to stderr.
///
/// `RUST_LOG` wins over the built-in filter. Later calls are no-ops.
pub fn init_tracing() {
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
