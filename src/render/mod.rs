//! PSD composite rendering
//!
//! Two renderer variants sit on top of the [`CompositeGenerator`]:
//! - **Full**: cache lookup, then background generation with callback delivery
//! - **Light**: one synchronous pass through the fastest path, written to a
//!   preview file
//!
//! ```ignore
//! use psdview_lib::render::{Renderer, RenderMode, RenderOptions};
//!
//! let renderer = Renderer::create(RenderMode::Full, source, RenderOptions::default())?;
//! if let Some(composite) = renderer.get_composite(Some(Box::new(|result| {
//!     // runs on the render thread once generation finishes
//! })))? {
//!     // already available (cache hit or finished earlier)
//! }
//! ```

pub mod blend;
pub mod full;
pub mod generator;
pub mod light;
pub mod placeholder;
pub mod source;


pub use full::FullRenderer;
pub use generator::{CompositeGenerator, CompositeOutcome, SkippedLayer, StrategyAttempt};
pub use light::LightRenderer;
pub use source::{Capabilities, CompositeSource, LayerBitmap, LayerEntry, SourceError, Strategy};

use crate::cache::FileCache;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Rendering configuration selected when a document is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Full,
    Light,
}

impl RenderMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "full" => Some(RenderMode::Full),
            "light" => Some(RenderMode::Light),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderMode::Full => "full",
            RenderMode::Light => "light",
        }
    }
}

/// Rendering errors. `Clone` so a single failure can reach every callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("Renderer configuration error: {0}")]
    Config(String),

    #[error("Composite error: {0}")]
    Composite(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Io(e.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(e: image::ImageError) -> Self {
        RenderError::Image(e.to_string())
    }
}

impl From<SourceError> for RenderError {
    fn from(e: SourceError) -> Self {
        RenderError::Composite(e.to_string())
    }
}

impl From<RenderError> for String {
    fn from(e: RenderError) -> Self {
        e.to_string()
    }
}

/// How the bitmap in a [`Composite`] came to be
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeStatus {
    Rendered(Strategy),
    Partial(Vec<SkippedLayer>),
    /// Every strategy failed; the bitmap is the diagnostic placeholder
    Placeholder(Vec<StrategyAttempt>),
    /// Loaded from the file cache
    Cached,
}

/// A displayable composite. Immutable once published.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    pub status: CompositeStatus,
}

impl Composite {
    /// Turn a generator outcome into something the view can show.
    ///
    /// `Failed` becomes the placeholder bitmap; if even that cannot be painted
    /// the error is returned.
    pub fn from_outcome(
        outcome: CompositeOutcome,
        placeholder_size: (u32, u32),
    ) -> Result<Self, RenderError> {
        match outcome {
            CompositeOutcome::Success { image, strategy } => Ok(Self {
                image,
                status: CompositeStatus::Rendered(strategy),
            }),
            CompositeOutcome::Partial { image, skipped } => Ok(Self {
                image,
                status: CompositeStatus::Partial(skipped),
            }),
            CompositeOutcome::Failed { attempts, error } => {
                let lines = placeholder::diagnostic_lines(&attempts);
                let image = placeholder::render(placeholder_size.0, placeholder_size.1, &lines)
                    .map_err(|e| {
                        tracing::error!("Failed to create error placeholder: {}", e);
                        RenderError::Composite(format!(
                            "could not generate composite ({}); placeholder failed: {}",
                            error, e
                        ))
                    })?;
                Ok(Self {
                    image,
                    status: CompositeStatus::Placeholder(attempts),
                })
            }
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, CompositeStatus::Placeholder(_))
    }

    /// Placeholders are never persisted
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self.status,
            CompositeStatus::Rendered(_) | CompositeStatus::Partial(_)
        )
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// One-line summary for a status bar
    pub fn status_message(&self) -> String {
        match &self.status {
            CompositeStatus::Rendered(strategy) => format!(
                "Rendered {}x{} via {}",
                self.width(),
                self.height(),
                strategy
            ),
            CompositeStatus::Cached => {
                format!("Loaded {}x{} from cache", self.width(), self.height())
            }
            CompositeStatus::Partial(skipped) => {
                let names: Vec<&str> = skipped.iter().map(|s| s.name.as_str()).collect();
                format!(
                    "Rendered with {} layer(s) skipped: {}",
                    skipped.len(),
                    names.join(", ")
                )
            }
            CompositeStatus::Placeholder(attempts) => format!(
                "Could not render document ({} method(s) failed)",
                attempts.len()
            ),
        }
    }
}

/// Result handed to callbacks and returned for `Ready` renderers
pub type RenderResult = Result<Arc<Composite>, RenderError>;

/// Invoked once, on the render thread, when generation completes
pub type CompositeCallback = Box<dyn FnOnce(RenderResult) + Send + 'static>;

/// Renderer construction parameters
#[derive(Clone)]
pub struct RenderOptions {
    /// Source file, used as cache identity
    pub source_path: Option<PathBuf>,
    /// Cache variant suffix, e.g. `_full`
    pub variant: String,
    pub cache: Option<Arc<FileCache>>,
    /// Destination for Light mode output
    pub preview_path: Option<PathBuf>,
    pub placeholder_size: (u32, u32),
    pub parallel_decode: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            source_path: None,
            variant: FULL_VARIANT.to_string(),
            cache: None,
            preview_path: None,
            placeholder_size: (placeholder::DEFAULT_WIDTH, placeholder::DEFAULT_HEIGHT),
            parallel_decode: true,
        }
    }
}

/// Cache variant of full-fidelity composites
pub const FULL_VARIANT: &str = "_full";

/// Either renderer variant behind one interface
pub enum Renderer {
    Full(FullRenderer),
    Light(LightRenderer),
}

impl Renderer {
    pub fn create(
        mode: RenderMode,
        source: Arc<dyn CompositeSource>,
        options: RenderOptions,
    ) -> Result<Self, RenderError> {
        match mode {
            RenderMode::Full => Ok(Renderer::Full(FullRenderer::new(source, options))),
            RenderMode::Light => Ok(Renderer::Light(LightRenderer::new(source, options)?)),
        }
    }

    pub fn mode(&self) -> RenderMode {
        match self {
            Renderer::Full(_) => RenderMode::Full,
            Renderer::Light(_) => RenderMode::Light,
        }
    }

    /// Request the composite.
    ///
    /// `Ok(Some)` when available now; `Ok(None)` when it will be delivered to
    /// `callback` later. The callback is only retained in the `None` case.
    pub fn get_composite(
        &self,
        callback: Option<CompositeCallback>,
    ) -> Result<Option<Arc<Composite>>, RenderError> {
        match self {
            Renderer::Full(r) => r.get_composite(callback),
            Renderer::Light(r) => r.get_composite().map(Some),
        }
    }

    /// The composite if one is already held, without scheduling work
    pub fn ready(&self) -> Option<Arc<Composite>> {
        match self {
            Renderer::Full(r) => r.ready(),
            Renderer::Light(r) => r.ready(),
        }
    }

    pub fn cleanup(&self) {
        if let Renderer::Light(r) = self {
            r.cleanup();
        }
    }
}
