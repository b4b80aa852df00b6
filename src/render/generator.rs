//! Composite generation with an ordered fallback chain
//!
//! Strategies are attempted in the order given by the source's
//! [`Capabilities`](super::source::Capabilities). Manual composition isolates
//! every layer: a layer that fails to decode is logged and skipped, the rest
//! of the stack is still blended bottom-to-top.

use super::blend::blend_onto;
use super::source::{guarded, CompositeSource, LayerBitmap, LayerEntry, SourceError, Strategy};
use image::RgbaImage;
use rayon::prelude::*;

/// A strategy that was tried, and why it did not produce the result
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    /// `None` when the strategy succeeded
    pub error: Option<String>,
}

impl std::fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{} failed: {}", self.strategy, e),
            None => write!(f, "{}", self.strategy),
        }
    }
}

/// A layer left out of a manual composition
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLayer {
    pub index: usize,
    pub name: String,
    pub error: String,
}

/// Result of one generation run
#[derive(Debug, Clone)]
pub enum CompositeOutcome {
    Success {
        image: RgbaImage,
        strategy: Strategy,
    },
    /// Manual composition with at least one layer skipped
    Partial {
        image: RgbaImage,
        skipped: Vec<SkippedLayer>,
    },
    Failed {
        attempts: Vec<StrategyAttempt>,
        error: String,
    },
}

impl CompositeOutcome {
    pub fn image(&self) -> Option<&RgbaImage> {
        match self {
            CompositeOutcome::Success { image, .. } | CompositeOutcome::Partial { image, .. } => {
                Some(image)
            }
            CompositeOutcome::Failed { .. } => None,
        }
    }
}

/// Flattens a [`CompositeSource`] into one bitmap
#[derive(Debug, Clone)]
pub struct CompositeGenerator {
    /// Decode layer bitmaps on the rayon pool before blending
    pub parallel_decode: bool,
}

impl Default for CompositeGenerator {
    fn default() -> Self {
        Self {
            parallel_decode: true,
        }
    }
}

impl CompositeGenerator {
    pub fn new(parallel_decode: bool) -> Self {
        Self { parallel_decode }
    }

    /// Walk the fallback chain until a strategy produces a bitmap
    pub fn generate(&self, source: &dyn CompositeSource) -> CompositeOutcome {
        let strategies = source.capabilities().strategies();
        let mut attempts = Vec::with_capacity(strategies.len());
        let mut last_error = String::from("no strategy available");

        for strategy in strategies {
            match self.run_strategy(source, strategy) {
                Ok((image, skipped)) => {
                    tracing::debug!("Composite produced by {}", strategy);
                    if skipped.is_empty() {
                        return CompositeOutcome::Success { image, strategy };
                    }
                    return CompositeOutcome::Partial { image, skipped };
                }
                Err(e) => {
                    if strategy == Strategy::ManualLayers {
                        tracing::error!("Manual composition failed: {}", e);
                    } else {
                        tracing::warn!("{} failed: {}", strategy, e);
                    }
                    last_error = e.to_string();
                    attempts.push(StrategyAttempt {
                        strategy,
                        error: Some(last_error.clone()),
                    });
                }
            }
        }

        tracing::error!(
            "Could not generate composite. Tried: {}",
            attempts
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        CompositeOutcome::Failed {
            attempts,
            error: last_error,
        }
    }

    /// Run exactly one strategy.
    ///
    /// Returns the bitmap plus the layers skipped along the way (always empty
    /// for built-in strategies).
    pub fn run_strategy(
        &self,
        source: &dyn CompositeSource,
        strategy: Strategy,
    ) -> Result<(RgbaImage, Vec<SkippedLayer>), SourceError> {
        let builtin = match strategy {
            Strategy::Composite => guarded(|| source.composite()),
            Strategy::MergedImage => guarded(|| source.merged_image()),
            Strategy::CompositeImage => guarded(|| source.composite_image()),
            Strategy::ManualLayers => return self.compose_layers(source),
        };

        match builtin? {
            Some(image) if image.width() > 0 && image.height() > 0 => Ok((image, Vec::new())),
            _ => Err(SourceError::Empty),
        }
    }

    fn compose_layers(
        &self,
        source: &dyn CompositeSource,
    ) -> Result<(RgbaImage, Vec<SkippedLayer>), SourceError> {
        let layers = guarded(|| Ok(source.layers()))?;
        let (width, height) = canvas_size(source, &layers)?;

        let mut canvas = RgbaImage::new(width, height);
        let mut skipped = Vec::new();

        // Declared order is top-to-bottom; paint bottom-to-top
        let paint_order: Vec<&LayerEntry> = layers.iter().rev().filter(|l| l.visible).collect();

        let decode = |entry: &&LayerEntry| -> Result<LayerBitmap, SourceError> {
            guarded(|| source.render_layer(entry.index))
        };
        let decoded: Vec<Result<LayerBitmap, SourceError>> = if self.parallel_decode {
            paint_order.par_iter().map(decode).collect()
        } else {
            paint_order.iter().map(decode).collect()
        };

        for (entry, bitmap) in paint_order.iter().zip(decoded) {
            match bitmap {
                Ok(bitmap) => {
                    blend_onto(
                        &mut canvas,
                        &bitmap.image,
                        bitmap.left,
                        bitmap.top,
                        entry.opacity,
                    );
                    tracing::debug!("Layer {} composited: {}", entry.index, entry.name);
                }
                Err(e) => {
                    tracing::warn!("Layer {} error ({}): {}", entry.index, entry.name, e);
                    skipped.push(SkippedLayer {
                        index: entry.index,
                        name: entry.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok((canvas, skipped))
    }
}

/// Canvas size from the header, else from the first declared layer
fn canvas_size(
    source: &dyn CompositeSource,
    layers: &[LayerEntry],
) -> Result<(u32, u32), SourceError> {
    if layers.is_empty() {
        return Err(SourceError::Invalid("document has no layers".into()));
    }

    if let Some((w, h)) = source.header_dimensions() {
        if w > 0 && h > 0 {
            return Ok((w, h));
        }
    }

    let first = &layers[0];
    if first.width > 0 && first.height > 0 {
        return Ok((first.width, first.height));
    }

    Err(SourceError::Invalid(
        "unable to determine image dimensions".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_display() {
        let ok = StrategyAttempt {
            strategy: Strategy::ManualLayers,
            error: None,
        };
        assert_eq!(ok.to_string(), "manual layer composition");

        let failed = StrategyAttempt {
            strategy: Strategy::Composite,
            error: Some("truncated".into()),
        };
        assert_eq!(failed.to_string(), "document composite failed: truncated");
    }

    #[test]
    fn test_outcome_image_accessor() {
        let outcome = CompositeOutcome::Failed {
            attempts: vec![],
            error: "x".into(),
        };
        assert!(outcome.image().is_none());

        let outcome = CompositeOutcome::Success {
            image: RgbaImage::new(1, 1),
            strategy: Strategy::Composite,
        };
        assert!(outcome.image().is_some());
    }
}
