//! Light renderer: fastest single path, written straight to a preview PNG
//!
//! No fallback chain and no background thread. Intended for large files where
//! fidelity is traded for responsiveness.

use super::generator::CompositeGenerator;
use super::source::{CompositeSource, Strategy};
use super::{Composite, CompositeStatus, RenderError, RenderOptions};
use image::ImageFormat;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct LightRenderer {
    source: Arc<dyn CompositeSource>,
    generator: CompositeGenerator,
    strategy: Strategy,
    preview_path: PathBuf,
    image: Mutex<Option<Arc<Composite>>>,
}

impl LightRenderer {
    /// Fails with [`RenderError::Config`] without a preview path, or when the
    /// document offers neither a built-in composite nor any layers.
    pub fn new(source: Arc<dyn CompositeSource>, options: RenderOptions) -> Result<Self, RenderError> {
        let preview_path = options.preview_path.ok_or_else(|| {
            RenderError::Config("preview path is required for light rendering mode".into())
        })?;

        let strategy = match source.capabilities().fastest() {
            Some(strategy) => strategy,
            None if !source.layers().is_empty() => Strategy::ManualLayers,
            None => {
                return Err(RenderError::Config(
                    "document has neither a layer collection nor a composite capability".into(),
                ))
            }
        };

        tracing::debug!("Light renderer using {} -> {:?}", strategy, preview_path);

        Ok(Self {
            source,
            generator: CompositeGenerator::new(options.parallel_decode),
            strategy,
            preview_path,
            image: Mutex::new(None),
        })
    }

    pub fn preview_path(&self) -> &Path {
        &self.preview_path
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Produce the composite synchronously (first call) or return the held one
    pub fn get_composite(&self) -> Result<Arc<Composite>, RenderError> {
        let mut held = self.image.lock();
        if let Some(composite) = held.as_ref() {
            return Ok(composite.clone());
        }

        let composite = Arc::new(self.convert_to_png().map_err(|e| {
            tracing::error!("Error in light rendering: {}", e);
            e
        })?);
        *held = Some(composite.clone());
        Ok(composite)
    }

    pub fn ready(&self) -> Option<Arc<Composite>> {
        self.image.lock().clone()
    }

    fn convert_to_png(&self) -> Result<Composite, RenderError> {
        let (image, skipped) = self
            .generator
            .run_strategy(self.source.as_ref(), self.strategy)?;

        image.save_with_format(&self.preview_path, ImageFormat::Png)?;

        let status = if skipped.is_empty() {
            CompositeStatus::Rendered(self.strategy)
        } else {
            CompositeStatus::Partial(skipped)
        };
        Ok(Composite { image, status })
    }

    /// Drop the held bitmap and delete the preview file
    pub fn cleanup(&self) {
        *self.image.lock() = None;
        if self.preview_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.preview_path) {
                tracing::error!("Error cleaning up preview {:?}: {}", self.preview_path, e);
            }
        }
    }
}
