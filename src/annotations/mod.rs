//! Vector annotation layers and JSON templates
//!
//! Independent of the PSD pipeline. A [`Template`] is a stack of
//! [`DrawingLayer`]s, each holding simple shapes, persisted as
//! `{"version": "1.0", "layers": [...]}`.

use crate::file::types::FileError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const TEMPLATE_VERSION: &str = "1.0";

const DEFAULT_LAYER_NAME: &str = "Layer";
const DEFAULT_COLOR: &str = "#000000";
const DEFAULT_LINE_WIDTH: u32 = 2;
/// Appended to the layer color to get the default fill
const FILL_ALPHA_SUFFIX: &str = "80";

/// Colors handed out to new layers, in order
const LAYER_PALETTE: [&str; 6] = [
    "#FF0000", "#0000FF", "#00A000", "#FF8000", "#800080", "#000000",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShapeType {
    Rectangle,
    Ellipse,
    Line,
    Freehand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    /// Flat `[x0, y0, x1, y1, ...]`
    pub coords: Vec<f32>,
    pub outline: String,
    /// Empty for no fill
    pub fill: String,
    pub width: u32,
}

/// Per-shape overrides of the layer defaults
#[derive(Debug, Clone, Default)]
pub struct ShapeStyle {
    pub outline: Option<String>,
    pub fill: Option<String>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLayer")]
pub struct DrawingLayer {
    pub id: u32,
    pub name: String,
    pub color: String,
    pub visible: bool,
    pub fill_enabled: bool,
    pub fill_color: String,
    pub line_width: u32,
    pub shapes: Vec<Shape>,
}

impl DrawingLayer {
    pub fn new(id: u32, name: impl Into<String>, color: impl Into<String>) -> Self {
        let color = color.into();
        Self {
            id,
            name: name.into(),
            fill_color: format!("{}{}", color, FILL_ALPHA_SUFFIX),
            color,
            visible: true,
            fill_enabled: false,
            line_width: DEFAULT_LINE_WIDTH,
            shapes: Vec::new(),
        }
    }

    /// Append a shape styled with the layer defaults
    pub fn add_shape(&mut self, shape_type: ShapeType, coords: Vec<f32>) -> &Shape {
        self.add_shape_with(shape_type, coords, ShapeStyle::default())
    }

    pub fn add_shape_with(
        &mut self,
        shape_type: ShapeType,
        coords: Vec<f32>,
        style: ShapeStyle,
    ) -> &Shape {
        let default_fill = if self.fill_enabled {
            self.fill_color.clone()
        } else {
            String::new()
        };

        self.shapes.push(Shape {
            shape_type,
            coords,
            outline: style.outline.unwrap_or_else(|| self.color.clone()),
            fill: style.fill.unwrap_or(default_fill),
            width: style.width.unwrap_or(self.line_width),
        });
        &self.shapes[self.shapes.len() - 1]
    }
}

/// On-disk layer shape; every field optional
#[derive(Deserialize)]
struct RawLayer {
    #[serde(default)]
    id: u32,
    name: Option<String>,
    color: Option<String>,
    visible: Option<bool>,
    #[serde(default)]
    fill_enabled: bool,
    fill_color: Option<String>,
    line_width: Option<u32>,
    #[serde(default)]
    shapes: Vec<RawShape>,
}

#[derive(Deserialize)]
struct RawShape {
    #[serde(rename = "type")]
    shape_type: ShapeType,
    coords: Vec<f32>,
    outline: Option<String>,
    fill: Option<String>,
    width: Option<u32>,
}

impl From<RawLayer> for DrawingLayer {
    fn from(raw: RawLayer) -> Self {
        let mut layer = DrawingLayer::new(
            raw.id,
            raw.name.unwrap_or_else(|| DEFAULT_LAYER_NAME.to_string()),
            raw.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        );
        layer.visible = raw.visible.unwrap_or(true);
        layer.fill_enabled = raw.fill_enabled;
        if let Some(fill_color) = raw.fill_color {
            layer.fill_color = fill_color;
        }
        layer.line_width = raw.line_width.unwrap_or(DEFAULT_LINE_WIDTH);

        // Stored shapes carry their own fill; a missing one means none
        for shape in raw.shapes {
            layer.add_shape_with(
                shape.shape_type,
                shape.coords,
                ShapeStyle {
                    outline: shape.outline,
                    fill: Some(shape.fill.unwrap_or_default()),
                    width: shape.width,
                },
            );
        }
        layer
    }
}

/// Direction for [`Template::move_layer`]; `Up` is towards index 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub layers: Vec<DrawingLayer>,
}

fn default_version() -> String {
    TEMPLATE_VERSION.to_string()
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: default_version(),
            layers: Vec::new(),
        }
    }
}

impl Template {
    /// Add a layer with the next free id and the next palette color.
    ///
    /// Unnamed layers are called `Layer <n>`.
    pub fn add_layer(&mut self, name: Option<&str>) -> &mut DrawingLayer {
        let id = self.layers.iter().map(|l| l.id + 1).max().unwrap_or(1);
        let color = LAYER_PALETTE[self.layers.len() % LAYER_PALETTE.len()];
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", DEFAULT_LAYER_NAME, self.layers.len() + 1));

        self.layers.push(DrawingLayer::new(id, name, color));
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    pub fn layer(&self, id: u32) -> Option<&DrawingLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: u32) -> Option<&mut DrawingLayer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Remove a layer; the last remaining layer cannot be deleted
    pub fn delete_layer(&mut self, id: u32) -> bool {
        if self.layers.len() <= 1 {
            tracing::warn!("Cannot delete the last layer");
            return false;
        }
        match self.layers.iter().position(|l| l.id == id) {
            Some(idx) => {
                self.layers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Swap a layer with its neighbour; false at either end or for unknown ids
    pub fn move_layer(&mut self, id: u32, direction: MoveDirection) -> bool {
        let Some(idx) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        match direction {
            MoveDirection::Up if idx > 0 => self.layers.swap(idx, idx - 1),
            MoveDirection::Down if idx + 1 < self.layers.len() => self.layers.swap(idx, idx + 1),
            _ => return false,
        }
        true
    }

    pub fn set_layer_visibility(&mut self, id: u32, visible: bool) -> bool {
        match self.layer_mut(id) {
            Some(layer) => {
                layer.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), FileError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Template saved to {:?} ({} layers)", path, self.layers.len());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, FileError> {
        let json = std::fs::read_to_string(path).map_err(|e| FileError::from_open(e, path))?;
        let template: Template = serde_json::from_str(&json)?;
        tracing::info!("Template loaded from {:?} ({} layers)", path, template.layers.len());
        Ok(template)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_add_shape_uses_layer_defaults() {
        let mut layer = DrawingLayer::new(1, "Notes", "#FF0000");
        assert_eq!(layer.fill_color, "#FF000080");

        let shape = layer.add_shape(ShapeType::Rectangle, vec![0.0, 0.0, 10.0, 10.0]).clone();
        assert_eq!(shape.outline, "#FF0000");
        assert_eq!(shape.fill, "");
        assert_eq!(shape.width, 2);

        layer.fill_enabled = true;
        let shape = layer.add_shape(ShapeType::Ellipse, vec![1.0, 1.0, 5.0, 5.0]).clone();
        assert_eq!(shape.fill, "#FF000080");

        let shape = layer
            .add_shape_with(
                ShapeType::Line,
                vec![0.0, 0.0, 3.0, 4.0],
                ShapeStyle {
                    width: Some(7),
                    ..ShapeStyle::default()
                },
            )
            .clone();
        assert_eq!(shape.width, 7);
        assert_eq!(layer.shapes.len(), 3);
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let json = r#"{"layers": [{"shapes": [{"type": "LINE", "coords": [0, 0, 1, 1]}]}]}"#;
        let template: Template = serde_json::from_str(json).unwrap();

        assert_eq!(template.version, "1.0");
        let layer = &template.layers[0];
        assert_eq!(layer.id, 0);
        assert_eq!(layer.name, "Layer");
        assert_eq!(layer.color, "#000000");
        assert_eq!(layer.fill_color, "#00000080");
        assert_eq!(layer.line_width, 2);
        assert!(layer.visible);

        let shape = &layer.shapes[0];
        assert_eq!(shape.shape_type, ShapeType::Line);
        assert_eq!(shape.outline, "#000000");
        assert_eq!(shape.fill, "");
        assert_eq!(shape.width, 2);
    }

    #[test]
    fn test_shape_json_layout() {
        let mut layer = DrawingLayer::new(3, "L", "#00FF00");
        layer.add_shape(ShapeType::Rectangle, vec![0.0, 0.0, 2.0, 2.0]);

        let value = serde_json::to_value(&layer).unwrap();
        assert_eq!(value["shapes"][0]["type"], "RECTANGLE");
        assert_eq!(value["fill_color"], "#00FF0080");
        assert_eq!(value["line_width"], 2);
    }

    #[test]
    fn test_save_and_load_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.json");

        let mut template = Template::default();
        template
            .add_layer(Some("Outline"))
            .add_shape(ShapeType::Ellipse, vec![5.0, 5.0, 50.0, 25.0]);
        template.add_layer(None).visible = false;
        template.save(&path).unwrap();

        let loaded = Template::load(&path).unwrap();
        assert_eq!(loaded, template);
        assert_eq!(loaded.layers[1].name, "Layer 2");
    }

    #[test]
    fn test_load_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Template::load(&dir.path().join("nope.json")),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_layer_stack_operations() {
        let mut template = Template::default();
        let a = template.add_layer(Some("A")).id;
        let b = template.add_layer(Some("B")).id;
        assert_ne!(a, b);

        assert!(template.move_layer(b, MoveDirection::Up));
        assert_eq!(template.layers[0].name, "B");
        assert!(!template.move_layer(b, MoveDirection::Up));

        assert!(template.set_layer_visibility(a, false));
        assert!(!template.layer(a).unwrap().visible);

        assert!(template.delete_layer(a));
        assert!(!template.delete_layer(b));
        assert_eq!(template.layers.len(), 1);
    }
}
