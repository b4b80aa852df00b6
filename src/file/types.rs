//! Document-facing types shared by the reader, writer and document model

use serde::{Deserialize, Serialize};

/// One node of the layer tree snapshot handed to the view layer.
///
/// Children are ordered top-to-bottom, the way a layer panel lists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNode {
    pub id: String,
    pub name: String,
    pub visible: bool,
    pub opacity: f32, // 0.0 - 1.0
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    #[serde(default)]
    pub children: Vec<LayerNode>,
}

impl LayerNode {
    /// Depth-first search by name (the node itself before its children)
    pub fn find_by_name(&self, name: &str) -> Option<&LayerNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_name(name))
    }

    /// Number of nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(LayerNode::count).sum::<usize>()
    }
}

/// Summary of an opened document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub depth: u16,
    pub dpi: Option<u32>,
    #[serde(rename = "colorMode")]
    pub color_mode: String,
    #[serde(rename = "layerCount")]
    pub layer_count: usize,
    #[serde(rename = "groupCount")]
    pub group_count: usize,
    #[serde(rename = "renderMode")]
    pub render_mode: String,
}

/// Supported export formats for composited output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    /// Detect format from file extension
    pub fn from_path(path: &str) -> Option<Self> {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".png") {
            Some(ExportFormat::Png)
        } else if path_lower.ends_with(".jpg") || path_lower.ends_with(".jpeg") {
            Some(ExportFormat::Jpeg)
        } else {
            None
        }
    }
}

/// File operation errors
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PSD error: {0}")]
    Psd(String),

    #[error("Render error: {0}")]
    Render(#[from] crate::render::RenderError),
}

impl FileError {
    /// Classify an IO error raised while opening `path`
    pub fn from_open(err: std::io::Error, path: &std::path::Path) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(shown),
            std::io::ErrorKind::PermissionDenied => FileError::PermissionDenied(shown),
            _ => FileError::Io(err),
        }
    }
}

impl From<FileError> for String {
    fn from(e: FileError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::Path;

    fn leaf(name: &str) -> LayerNode {
        LayerNode {
            id: name.to_lowercase(),
            name: name.to_string(),
            visible: true,
            opacity: 1.0,
            is_group: false,
            children: vec![],
        }
    }

    #[test]
    fn test_find_by_name_descends_into_groups() {
        let group = LayerNode {
            id: "g".into(),
            name: "Group".into(),
            visible: true,
            opacity: 1.0,
            is_group: true,
            children: vec![leaf("Eyes"), leaf("Mouth")],
        };

        assert_eq!(group.find_by_name("Mouth").unwrap().id, "mouth");
        assert!(group.find_by_name("Nose").is_none());
        assert_eq!(group.count(), 3);
    }

    #[test]
    fn test_export_format_from_path() {
        assert_eq!(ExportFormat::from_path("a.PNG"), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::from_path("a.jpeg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::from_path("a.tiff"), None);
    }

    #[test]
    fn test_open_error_classification() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            FileError::from_open(err, Path::new("x.psd")),
            FileError::NotFound(_)
        ));

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            FileError::from_open(err, Path::new("x.psd")),
            FileError::PermissionDenied(_)
        ));
    }
}
