//! Opened PSD document
//!
//! [`PsdDocument`] ties a parsed file to a [`Renderer`]. Visibility changes
//! are recorded on the document's [`PsdSource`]; the next composite request
//! after a change builds a fresh renderer over a snapshot of the new state,
//! leaving previously handed-out composites untouched.

use crate::cache::FileCache;
use crate::config::AppConfig;
use crate::file::psd::{save_psd, PsdSource};
use crate::file::types::{DocumentInfo, ExportFormat, FileError, LayerNode};
use crate::render::{
    Composite, CompositeCallback, CompositeSource, RenderError, RenderMode, RenderOptions,
    Renderer, FULL_VARIANT,
};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

/// How a document is opened
#[derive(Clone)]
pub struct OpenOptions {
    pub mode: RenderMode,
    pub cache: Option<Arc<FileCache>>,
    pub placeholder_size: (u32, u32),
    pub parallel_decode: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        let render = crate::config::RenderConfig::default();
        Self {
            mode: render.mode,
            cache: None,
            placeholder_size: render.placeholder_size(),
            parallel_decode: render.parallel_layer_decode,
        }
    }
}

impl OpenOptions {
    pub fn from_config(config: &AppConfig, cache: Option<Arc<FileCache>>) -> Self {
        Self {
            mode: config.render.mode,
            cache,
            placeholder_size: config.render.placeholder_size(),
            parallel_decode: config.render.parallel_layer_decode,
        }
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }
}

struct RendererSlot {
    renderer: Renderer,
    /// Visibility epoch the renderer was built for
    epoch: u64,
}

pub struct PsdDocument {
    path: PathBuf,
    source: PsdSource,
    options: OpenOptions,
    slot: Mutex<RendererSlot>,
    epoch: AtomicU64,
}

impl PsdDocument {
    /// Parse `path` and set up the renderer for `options.mode`
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        tracing::info!("Opening PSD file: {:?} ({} mode)", path, options.mode.name());

        let bytes = std::fs::read(&path).map_err(|e| FileError::from_open(e, &path))?;
        let source = PsdSource::from_bytes(bytes)?;

        let renderer = build_renderer(&path, &source, &options)?;

        tracing::info!(
            "Opened {:?}: {}x{}, {} layers",
            path,
            source.width(),
            source.height(),
            source.layer_count()
        );

        Ok(Self {
            path,
            source,
            options,
            slot: Mutex::new(RendererSlot {
                renderer,
                epoch: 0,
            }),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn width(&self) -> u32 {
        self.source.width()
    }

    pub fn height(&self) -> u32 {
        self.source.height()
    }

    pub fn mode(&self) -> RenderMode {
        self.options.mode
    }

    /// Current best composite.
    ///
    /// `Ok(Some)` when available now. `Ok(None)` when it is being generated;
    /// `callback` then receives it on the render thread.
    pub fn get_composite(
        &self,
        callback: Option<CompositeCallback>,
    ) -> Result<Option<Arc<Composite>>, RenderError> {
        let mut slot = self.slot.lock();

        let current = self.epoch.load(Ordering::Acquire);
        if slot.epoch != current {
            tracing::debug!("Layer visibility changed, rebuilding renderer");
            let renderer = build_renderer(&self.path, &self.source, &self.options)
                .map_err(|e| RenderError::Config(e.to_string()))?;
            slot.renderer = renderer;
            slot.epoch = current;
        }

        slot.renderer.get_composite(callback)
    }

    /// Block until the current composite is available
    pub fn wait_composite(&self) -> Result<Arc<Composite>, RenderError> {
        let (tx, rx) = mpsc::channel();
        let callback: CompositeCallback = Box::new(move |result| {
            // Receiver gone means nobody is waiting any more
            let _ = tx.send(result);
        });

        if let Some(composite) = self.get_composite(Some(callback))? {
            return Ok(composite);
        }

        rx.recv().map_err(|_| {
            RenderError::Composite("render job ended without delivering a result".into())
        })?
    }

    /// Composite already held by the current renderer, without scheduling work
    pub fn composite(&self) -> Option<Arc<Composite>> {
        let slot = self.slot.lock();
        if slot.epoch != self.epoch.load(Ordering::Acquire) {
            return None;
        }
        slot.renderer.ready()
    }

    /// Show or hide the first layer or group named `name`.
    ///
    /// Returns false when nothing matches. No recomposition happens until the
    /// composite is requested again.
    pub fn set_layer_visibility(&self, name: &str, visible: bool) -> bool {
        let found = self.source.set_visibility(name, visible);
        if found {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        found
    }

    pub fn get_layer_tree(&self) -> Vec<LayerNode> {
        self.source.layer_tree()
    }

    /// Write the document (current layer state) back to PSD.
    ///
    /// Saves over the opened file when `path` is `None`.
    pub fn save(&self, path: Option<&Path>) -> bool {
        let target = path.unwrap_or(self.path.as_path());
        match self.save_to(target) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to save PSD file {:?}: {}", target, e);
                false
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), FileError> {
        let doc = self.source.save_document();
        save_psd(path, &doc)
    }

    /// Composite scaled to fit within `max_width` x `max_height`, never enlarged
    pub fn thumbnail(&self, max_width: u32, max_height: u32) -> Result<RgbaImage, RenderError> {
        let composite = self.wait_composite()?;
        let img = &composite.image;
        if img.width() <= max_width && img.height() <= max_height {
            return Ok(img.clone());
        }
        if max_width == 0 || max_height == 0 {
            return Err(RenderError::Config(format!(
                "invalid thumbnail bounds {}x{}",
                max_width, max_height
            )));
        }

        Ok(DynamicImage::ImageRgba8(img.clone())
            .resize(max_width, max_height, FilterType::Lanczos3)
            .to_rgba8())
    }

    /// Composite resized by `scale` (the shared bitmap is left untouched)
    pub fn scaled_image(&self, scale: f32) -> Result<RgbaImage, RenderError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(RenderError::Config(format!("invalid scale {}", scale)));
        }

        let composite = self.wait_composite()?;
        let img = &composite.image;
        let width = ((img.width() as f32 * scale).round() as u32).max(1);
        let height = ((img.height() as f32 * scale).round() as u32).max(1);

        Ok(image::imageops::resize(img, width, height, FilterType::Lanczos3))
    }

    /// Pixels of one layer, cropped to its bounds
    pub fn layer_image(&self, layer_id: &str) -> Result<RgbaImage, FileError> {
        let index = self
            .source
            .layer_index(layer_id)
            .ok_or_else(|| FileError::InvalidFormat(format!("unknown layer id {}", layer_id)))?;

        self.source
            .render_layer(index)
            .map(|bitmap| bitmap.image)
            .map_err(|e| FileError::Psd(e.to_string()))
    }

    pub fn info(&self) -> DocumentInfo {
        let header = &self.source.layout().header;
        DocumentInfo {
            path: self.path.to_string_lossy().to_string(),
            width: self.width(),
            height: self.height(),
            depth: header.depth,
            dpi: self.source.layout().dpi,
            color_mode: header
                .color_mode()
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| format!("Unknown ({})", header.color_mode)),
            layer_count: self.source.layer_count(),
            group_count: self.source.group_count(),
            render_mode: self.options.mode.name().to_string(),
        }
    }

    /// Write the composite as PNG or JPEG, chosen by extension
    pub fn export_composite(&self, path: &Path) -> Result<(), FileError> {
        let format = ExportFormat::from_path(&path.to_string_lossy()).ok_or_else(|| {
            FileError::InvalidFormat(format!("unsupported export format: {:?}", path))
        })?;

        let composite = self.wait_composite()?;
        match format {
            ExportFormat::Png => composite.image.save_with_format(path, ImageFormat::Png)?,
            ExportFormat::Jpeg => DynamicImage::ImageRgba8(composite.image.clone())
                .to_rgb8()
                .save_with_format(path, ImageFormat::Jpeg)?,
        }

        tracing::info!("Exported composite to {:?}", path);
        Ok(())
    }

    /// Release renderer resources (Light mode removes its preview file)
    pub fn close(&self) {
        self.slot.lock().renderer.cleanup();
        tracing::debug!("Closed {:?}", self.path);
    }
}

/// Preview file used by Light mode: `<stem>_preview.png` beside the source
pub fn preview_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    source.with_file_name(format!("{}_preview.png", stem))
}

fn build_renderer(
    path: &Path,
    source: &PsdSource,
    options: &OpenOptions,
) -> Result<Renderer, FileError> {
    let variant = match source.override_signature() {
        Some(signature) => format!("{}_v{}", FULL_VARIANT, signature),
        None => FULL_VARIANT.to_string(),
    };

    let render_options = RenderOptions {
        source_path: Some(path.to_path_buf()),
        variant,
        cache: options.cache.clone(),
        preview_path: Some(preview_path(path)),
        placeholder_size: options.placeholder_size,
        parallel_decode: options.parallel_decode,
    };

    let snapshot: Arc<dyn CompositeSource> = Arc::new(source.snapshot());
    Ok(Renderer::create(options.mode, snapshot, render_options)?)
}
