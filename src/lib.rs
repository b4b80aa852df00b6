//! psdview - PSD viewing core
//!
//! Opens layered PSD documents, renders a flattened composite through an
//! ordered fallback chain, caches results on disk and writes documents back
//! with edited layer visibility.

pub mod annotations;
pub mod cache;
pub mod config;
pub mod document;
pub mod file;
pub mod render;

pub use document::{OpenOptions, PsdDocument};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "psdview=info,psdview_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if installed.is_ok() {
        tracing::debug!("psdview {} initializing", env!("CARGO_PKG_VERSION"));
    }
}
