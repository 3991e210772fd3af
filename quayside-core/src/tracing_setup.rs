//! Tracing setup for Quayside embedders
//!
//! The engine only emits through the `tracing` macros; installing a
//! subscriber is the embedder's choice. This helper wires a sensible console
//! subscriber for applications that do not bring their own.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initializes a console subscriber at `console_level`, overridable through
/// `RUST_LOG`.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - A global subscriber is already installed
pub fn init_tracing(console_level: Level) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()?;

    Ok(())
}
