//! Composite source seam
//!
//! The generator never talks to the PSD parser directly. A parsed document is
//! exposed through [`CompositeSource`], whose [`Capabilities`] are computed once
//! when the document is opened and turned into a fixed, ordered strategy list.

use image::RgbaImage;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// One way of producing a flattened bitmap, in fallback priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Parser's own whole-document compositor
    Composite,
    /// Merged image data stored inside the file
    MergedImage,
    /// Document-level composite accessor
    CompositeImage,
    /// Per-layer decode blended onto a transparent canvas
    ManualLayers,
}

impl Strategy {
    /// Built-in strategies, fastest first
    pub const BUILTIN: [Strategy; 3] = [
        Strategy::Composite,
        Strategy::MergedImage,
        Strategy::CompositeImage,
    ];

    /// Human-readable name used in logs and on the placeholder
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Composite => "document composite",
            Strategy::MergedImage => "merged image data",
            Strategy::CompositeImage => "composite image accessor",
            Strategy::ManualLayers => "manual layer composition",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Built-in composite accessors offered by a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub composite: bool,
    pub merged_image: bool,
    pub composite_image: bool,
}

impl Capabilities {
    pub fn supports(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Composite => self.composite,
            Strategy::MergedImage => self.merged_image,
            Strategy::CompositeImage => self.composite_image,
            Strategy::ManualLayers => true,
        }
    }

    /// Ordered attempt list: supported built-ins, then manual composition
    pub fn strategies(&self) -> Vec<Strategy> {
        Strategy::BUILTIN
            .iter()
            .copied()
            .filter(|s| self.supports(*s))
            .chain(std::iter::once(Strategy::ManualLayers))
            .collect()
    }

    /// Fastest built-in path, if any
    pub fn fastest(&self) -> Option<Strategy> {
        Strategy::BUILTIN.iter().copied().find(|s| self.supports(*s))
    }

    pub fn has_builtin(&self) -> bool {
        self.fastest().is_some()
    }
}

/// Errors raised by a single strategy or a single layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{0} is not supported by this document")]
    Unsupported(&'static str),

    #[error("no result returned")]
    Empty,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("{0}")]
    Invalid(String),

    #[error("parser panicked: {0}")]
    Panicked(String),
}

/// Snapshot of one layer, taken when the layer list is requested
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry {
    /// Position in the declared (top-to-bottom) order
    pub index: usize,
    pub name: String,
    /// Effective visibility: own flag and every enclosing group
    pub visible: bool,
    pub opacity: u8,
    pub width: u32,
    pub height: u32,
}

/// A decoded layer and where it sits on the canvas
#[derive(Debug, Clone)]
pub struct LayerBitmap {
    pub image: RgbaImage,
    pub left: i32,
    pub top: i32,
}

/// Parsed layered document as seen by the compositing pipeline
pub trait CompositeSource: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Canvas size from the document header, when it declares one
    fn header_dimensions(&self) -> Option<(u32, u32)>;

    /// Layers in declared top-to-bottom order
    fn layers(&self) -> Vec<LayerEntry>;

    /// Decode a single layer
    fn render_layer(&self, index: usize) -> Result<LayerBitmap, SourceError>;

    fn composite(&self) -> Result<Option<RgbaImage>, SourceError> {
        Err(SourceError::Unsupported("composite"))
    }

    fn merged_image(&self) -> Result<Option<RgbaImage>, SourceError> {
        Err(SourceError::Unsupported("merged image"))
    }

    fn composite_image(&self) -> Result<Option<RgbaImage>, SourceError> {
        Err(SourceError::Unsupported("composite image"))
    }
}

/// Run a parser call, turning a panic into [`SourceError::Panicked`]
pub fn guarded<T>(f: impl FnOnce() -> Result<T, SourceError>) -> Result<T, SourceError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(SourceError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Extract the message carried by a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_order_full_capabilities() {
        let caps = Capabilities {
            composite: true,
            merged_image: true,
            composite_image: true,
        };
        assert_eq!(
            caps.strategies(),
            vec![
                Strategy::Composite,
                Strategy::MergedImage,
                Strategy::CompositeImage,
                Strategy::ManualLayers
            ]
        );
        assert_eq!(caps.fastest(), Some(Strategy::Composite));
    }

    #[test]
    fn test_strategy_order_skips_unsupported() {
        let caps = Capabilities {
            composite: false,
            merged_image: true,
            composite_image: false,
        };
        assert_eq!(
            caps.strategies(),
            vec![Strategy::MergedImage, Strategy::ManualLayers]
        );
        assert_eq!(caps.fastest(), Some(Strategy::MergedImage));
    }

    #[test]
    fn test_no_capabilities_leaves_manual_only() {
        let caps = Capabilities::default();
        assert_eq!(caps.strategies(), vec![Strategy::ManualLayers]);
        assert!(!caps.has_builtin());
    }

    #[test]
    fn test_guarded_catches_panic() {
        let result: Result<(), SourceError> = guarded(|| panic!("bad channel"));
        match result {
            Err(SourceError::Panicked(msg)) => assert!(msg.contains("bad channel")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
