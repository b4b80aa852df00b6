//! `psd` crate adapter
//!
//! [`PsdSource`] exposes a parsed document to the compositing pipeline and
//! owns the in-memory visibility state. The parsed layers are never mutated;
//! visibility changes are kept as overrides keyed by node id.
//!
//! NOTE: the `psd` crate reports the hidden bit of the layer flags as
//! `visible()`, so every flag read here is inverted.

use super::image_data::PsdLayout;
use super::writer::{SaveDocument, SaveLayer};
use super::blend_mode_from_debug;
use crate::file::types::{FileError, LayerNode};
use crate::render::source::{
    guarded, Capabilities, CompositeSource, LayerBitmap, LayerEntry, SourceError,
};
use image::RgbaImage;
use parking_lot::RwLock;
use psd::{Psd, PsdLayer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Layer or group reference inside the outline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Layer(usize),
    Group(u32),
}

impl NodeRef {
    fn id(&self) -> String {
        match self {
            NodeRef::Layer(idx) => format!("layer_{}", idx),
            NodeRef::Group(id) => format!("group_{}", id),
        }
    }
}

/// Static shape of the layer tree, top-to-bottom
#[derive(Debug, Clone)]
struct OutlineItem {
    node: NodeRef,
    children: Vec<OutlineItem>,
}

#[derive(Debug, Clone, Copy)]
struct GroupProps {
    parent: Option<u32>,
    visible: bool,
    opacity: u8,
}

/// Immutable parse result, shared between snapshots
struct Parsed {
    psd: Psd,
    bytes: Vec<u8>,
    layout: PsdLayout,
    capabilities: Capabilities,
    groups: HashMap<u32, GroupProps>,
    group_names: HashMap<u32, String>,
    outline: Vec<OutlineItem>,
}

pub struct PsdSource {
    parsed: Arc<Parsed>,
    overrides: RwLock<HashMap<String, bool>>,
}

impl std::fmt::Debug for PsdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsdSource")
            .field("width", &self.parsed.layout.header.width)
            .field("height", &self.parsed.layout.header.height)
            .field("layers", &self.parsed.psd.layers().len())
            .field("overrides", &self.overrides.read().len())
            .finish()
    }
}

impl PsdSource {
    /// Parse a document held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FileError> {
        let layout = PsdLayout::scan(&bytes)?;

        let psd = guarded(|| {
            Psd::from_bytes(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
        })
        .map_err(|e| FileError::InvalidFormat(format!("PSD parse error: {}", e)))?;

        let mut groups = HashMap::new();
        let mut group_names = HashMap::new();
        for group in psd.groups().values() {
            groups.insert(
                group.id(),
                GroupProps {
                    parent: group.parent_id(),
                    visible: !group.visible(),
                    opacity: group.opacity(),
                },
            );
            group_names.insert(group.id(), group.name().to_string());
        }

        let parents: Vec<Option<u32>> = psd.layers().iter().map(|l| l.parent_id()).collect();
        let outline = build_outline(&parents, &groups);

        let capabilities = Capabilities {
            composite: !psd.layers().is_empty(),
            merged_image: true,
            composite_image: layout.decode_supported(),
        };

        tracing::debug!(
            "PSD parsed: {}x{}, {} layers, {} groups, {:?}",
            layout.header.width,
            layout.header.height,
            psd.layers().len(),
            groups.len(),
            capabilities
        );

        Ok(Self {
            parsed: Arc::new(Parsed {
                psd,
                bytes,
                layout,
                capabilities,
                groups,
                group_names,
                outline,
            }),
            overrides: RwLock::new(HashMap::new()),
        })
    }

    /// Copy sharing the parsed document, with the current overrides frozen
    pub fn snapshot(&self) -> Self {
        Self {
            parsed: Arc::clone(&self.parsed),
            overrides: RwLock::new(self.overrides.read().clone()),
        }
    }

    pub fn width(&self) -> u32 {
        self.parsed.psd.width()
    }

    pub fn height(&self) -> u32 {
        self.parsed.psd.height()
    }

    pub fn layout(&self) -> &PsdLayout {
        &self.parsed.layout
    }

    pub fn layer_count(&self) -> usize {
        self.parsed.psd.layers().len()
    }

    pub fn group_count(&self) -> usize {
        self.parsed.groups.len()
    }

    fn own_visibility(&self, node: NodeRef) -> bool {
        if let Some(&visible) = self.overrides.read().get(&node.id()) {
            return visible;
        }
        self.original_visibility(node)
    }

    /// Visibility as stored in the file
    fn original_visibility(&self, node: NodeRef) -> bool {
        match node {
            NodeRef::Layer(idx) => self
                .parsed
                .psd
                .layers()
                .get(idx)
                .map(|l| !l.visible())
                .unwrap_or(false),
            NodeRef::Group(id) => self
                .parsed
                .groups
                .get(&id)
                .map(|g| g.visible)
                .unwrap_or(true),
        }
    }

    /// Own flag and every enclosing group
    fn effective_visibility(&self, idx: usize, layer: &PsdLayer) -> bool {
        if !self.own_visibility(NodeRef::Layer(idx)) {
            return false;
        }

        let mut parent = layer.parent_id();
        let mut depth = 0;
        while let Some(id) = parent {
            if !self.own_visibility(NodeRef::Group(id)) {
                return false;
            }
            parent = self.parsed.groups.get(&id).and_then(|g| g.parent);
            depth += 1;
            if depth > self.parsed.groups.len() {
                tracing::warn!("Group parent chain of layer {} loops", idx);
                break;
            }
        }
        true
    }

    fn visibility_snapshot(&self) -> Vec<bool> {
        self.parsed
            .psd
            .layers()
            .iter()
            .enumerate()
            .map(|(idx, layer)| self.effective_visibility(idx, layer))
            .collect()
    }

    /// Layer tree snapshot, top-to-bottom
    pub fn layer_tree(&self) -> Vec<LayerNode> {
        self.parsed.outline.iter().map(|item| self.to_node(item)).collect()
    }

    fn to_node(&self, item: &OutlineItem) -> LayerNode {
        let (name, opacity, is_group) = match item.node {
            NodeRef::Layer(idx) => match self.parsed.psd.layers().get(idx) {
                Some(layer) => (layer.name().to_string(), layer.opacity(), false),
                None => (String::new(), 255, false),
            },
            NodeRef::Group(id) => (
                self.parsed.group_names.get(&id).cloned().unwrap_or_default(),
                self.parsed.groups.get(&id).map(|g| g.opacity).unwrap_or(255),
                true,
            ),
        };

        LayerNode {
            id: item.node.id(),
            name,
            visible: self.own_visibility(item.node),
            opacity: opacity as f32 / 255.0,
            is_group,
            children: item.children.iter().map(|c| self.to_node(c)).collect(),
        }
    }

    /// Set visibility of the first node named `name` (pre-order, top-to-bottom).
    ///
    /// Returns false when no node matches.
    pub fn set_visibility(&self, name: &str, visible: bool) -> bool {
        let Some(node) = self.find_by_name(&self.parsed.outline, name) else {
            tracing::debug!("No layer named {:?}", name);
            return false;
        };

        let id = node.id();
        let original = self.original_visibility(node);
        let mut overrides = self.overrides.write();
        if original == visible {
            overrides.remove(&id);
        } else {
            overrides.insert(id.clone(), visible);
        }
        tracing::debug!("Layer {} ({:?}) visible = {}", id, name, visible);
        true
    }

    fn find_by_name(&self, items: &[OutlineItem], name: &str) -> Option<NodeRef> {
        for item in items {
            let item_name = match item.node {
                NodeRef::Layer(idx) => self.parsed.psd.layers().get(idx).map(|l| l.name()),
                NodeRef::Group(id) => self.parsed.group_names.get(&id).map(String::as_str),
            };
            if item_name == Some(name) {
                return Some(item.node);
            }
            if let Some(found) = self.find_by_name(&item.children, name) {
                return Some(found);
            }
        }
        None
    }

    pub fn has_overrides(&self) -> bool {
        !self.overrides.read().is_empty()
    }

    /// Short stable hash of the current overrides, `None` when there are none
    pub fn override_signature(&self) -> Option<String> {
        let overrides = self.overrides.read();
        if overrides.is_empty() {
            return None;
        }

        let mut entries: Vec<(&String, &bool)> = overrides.iter().collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for (id, visible) in entries {
            hasher.update(id.as_bytes());
            hasher.update(if *visible { b"=1;" } else { b"=0;" });
        }
        Some(hex::encode(hasher.finalize())[..12].to_string())
    }

    /// Index of the layer with node id `layer_<n>`
    pub fn layer_index(&self, layer_id: &str) -> Option<usize> {
        layer_id
            .strip_prefix("layer_")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&idx| idx < self.parsed.psd.layers().len())
    }

    /// Pixel layers in their current state, bottom-to-top, for the writer.
    ///
    /// Group visibility is folded into each layer since groups are not
    /// written. Layers that fail to decode are left out.
    pub fn save_document(&self) -> SaveDocument {
        let visible = self.visibility_snapshot();
        let mut layers = Vec::with_capacity(self.parsed.psd.layers().len());

        for (idx, layer) in self.parsed.psd.layers().iter().enumerate().rev() {
            match guarded(|| self.decode_layer(layer)) {
                Ok(bitmap) => layers.push(SaveLayer {
                    name: layer.name().to_string(),
                    visible: visible[idx],
                    opacity: layer.opacity(),
                    blend_mode: blend_mode_from_debug(&format!("{:?}", layer.blend_mode()))
                        .to_string(),
                    image: bitmap.image,
                    left: bitmap.left,
                    top: bitmap.top,
                }),
                Err(e) => {
                    tracing::warn!("Layer {} ({}) not saved: {}", idx, layer.name(), e);
                }
            }
        }

        SaveDocument {
            width: self.width(),
            height: self.height(),
            dpi: self.parsed.layout.dpi.unwrap_or(72),
            layers,
            composite: None,
        }
    }

    /// Layer pixels cropped to the layer bounds (clamped to the canvas)
    fn decode_layer(&self, layer: &PsdLayer) -> Result<LayerBitmap, SourceError> {
        let (doc_w, doc_h) = (self.width(), self.height());
        let bounds = LayerBounds::of(layer);
        let (left, top) = (bounds.left, bounds.top);
        let (layer_w, layer_h) = (bounds.width(), bounds.height());

        let rgba = layer.rgba();

        // The psd crate hands back full canvas pixels with the layer in place
        if rgba.len() == (doc_w as usize) * (doc_h as usize) * 4 {
            let full = RgbaImage::from_raw(doc_w, doc_h, rgba)
                .ok_or_else(|| SourceError::Decode("invalid layer RGBA data".into()))?;

            let x0 = left.clamp(0, doc_w as i32);
            let y0 = top.clamp(0, doc_h as i32);
            let x1 = bounds.right.clamp(0, doc_w as i32);
            let y1 = bounds.bottom.clamp(0, doc_h as i32);
            let (w, h) = ((x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32);

            let image = image::imageops::crop_imm(&full, x0 as u32, y0 as u32, w, h).to_image();
            return Ok(LayerBitmap {
                image,
                left: x0,
                top: y0,
            });
        }

        if rgba.len() == (layer_w as usize) * (layer_h as usize) * 4 {
            let image = RgbaImage::from_raw(layer_w, layer_h, rgba)
                .ok_or_else(|| SourceError::Decode("invalid layer RGBA data".into()))?;
            return Ok(LayerBitmap { image, left, top });
        }

        Err(SourceError::Decode(format!(
            "layer '{}': {} RGBA bytes match neither the canvas ({}x{}) nor the layer bounds ({}x{})",
            layer.name(),
            rgba.len(),
            doc_w,
            doc_h,
            layer_w,
            layer_h
        )))
    }

    fn canvas_from_raw(&self, rgba: Vec<u8>) -> Result<Option<RgbaImage>, SourceError> {
        let expected = (self.width() as usize) * (self.height() as usize) * 4;
        if rgba.len() != expected {
            return Err(SourceError::Decode(format!(
                "got {} RGBA bytes, expected {}",
                rgba.len(),
                expected
            )));
        }
        Ok(RgbaImage::from_raw(self.width(), self.height(), rgba))
    }

    fn stale_merged_data(&self) -> Result<(), SourceError> {
        if self.has_overrides() {
            return Err(SourceError::Invalid(
                "stored merged image does not reflect layer visibility changes".into(),
            ));
        }
        Ok(())
    }
}

impl CompositeSource for PsdSource {
    fn capabilities(&self) -> Capabilities {
        self.parsed.capabilities
    }

    fn header_dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width(), self.height()))
    }

    fn layers(&self) -> Vec<LayerEntry> {
        self.parsed
            .psd
            .layers()
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                let bounds = LayerBounds::of(layer);
                LayerEntry {
                    index,
                    name: layer.name().to_string(),
                    visible: self.effective_visibility(index, layer),
                    opacity: layer.opacity(),
                    width: bounds.width(),
                    height: bounds.height(),
                }
            })
            .collect()
    }

    fn render_layer(&self, index: usize) -> Result<LayerBitmap, SourceError> {
        let layer = self
            .parsed
            .psd
            .layers()
            .get(index)
            .ok_or_else(|| SourceError::Invalid(format!("no layer at index {}", index)))?;
        self.decode_layer(layer)
    }

    fn composite(&self) -> Result<Option<RgbaImage>, SourceError> {
        let visible = self.visibility_snapshot();
        let rgba = self
            .parsed
            .psd
            .flatten_layers_rgba(&|(idx, _layer)| visible.get(idx).copied().unwrap_or(false))
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.canvas_from_raw(rgba)
    }

    fn merged_image(&self) -> Result<Option<RgbaImage>, SourceError> {
        self.stale_merged_data()?;
        self.canvas_from_raw(self.parsed.psd.rgba())
    }

    fn composite_image(&self) -> Result<Option<RgbaImage>, SourceError> {
        self.stale_merged_data()?;
        self.parsed
            .layout
            .decode_merged(&self.parsed.bytes)
            .map(Some)
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

/// Layer rectangle with exclusive right/bottom edges.
///
/// The psd crate keeps right and bottom inclusive (one less than the file
/// stores), except for an empty layer whose rectangle stays all zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayerBounds {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl LayerBounds {
    fn of(layer: &PsdLayer) -> Self {
        Self::from_inclusive(
            layer.layer_left(),
            layer.layer_top(),
            layer.layer_right(),
            layer.layer_bottom(),
        )
    }

    fn from_inclusive(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        if left == 0 && top == 0 && right == 0 && bottom == 0 {
            return Self {
                left: 0,
                top: 0,
                right: 0,
                bottom: 0,
            };
        }
        Self {
            left,
            top,
            right: right.saturating_add(1),
            bottom: bottom.saturating_add(1),
        }
    }

    fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// Arrange layers and groups into a tree.
///
/// A group is placed where its first (topmost) member appears; groups
/// without members go after everything else in their parent.
fn build_outline(layer_parents: &[Option<u32>], groups: &HashMap<u32, GroupProps>) -> Vec<OutlineItem> {
    let mut children: HashMap<Option<u32>, Vec<NodeRef>> = HashMap::new();
    let mut placed: HashSet<u32> = HashSet::new();

    fn place(
        id: u32,
        groups: &HashMap<u32, GroupProps>,
        children: &mut HashMap<Option<u32>, Vec<NodeRef>>,
        placed: &mut HashSet<u32>,
    ) {
        if !placed.insert(id) {
            return;
        }
        let parent = groups
            .get(&id)
            .and_then(|g| g.parent)
            .filter(|p| groups.contains_key(p));
        if let Some(parent_id) = parent {
            place(parent_id, groups, children, placed);
        }
        children.entry(parent).or_default().push(NodeRef::Group(id));
    }

    for (idx, parent) in layer_parents.iter().enumerate() {
        let parent = parent.filter(|p| groups.contains_key(p));
        if let Some(group_id) = parent {
            place(group_id, groups, &mut children, &mut placed);
        }
        children.entry(parent).or_default().push(NodeRef::Layer(idx));
    }

    let mut empty_groups: Vec<u32> = groups.keys().copied().filter(|id| !placed.contains(id)).collect();
    empty_groups.sort_unstable();
    for id in empty_groups {
        place(id, groups, &mut children, &mut placed);
    }

    fn assemble(
        parent: Option<u32>,
        children: &HashMap<Option<u32>, Vec<NodeRef>>,
        depth: usize,
    ) -> Vec<OutlineItem> {
        let Some(nodes) = children.get(&parent) else {
            return Vec::new();
        };
        nodes
            .iter()
            .map(|&node| OutlineItem {
                node,
                children: match node {
                    NodeRef::Group(id) if depth < 64 => assemble(Some(id), children, depth + 1),
                    _ => Vec::new(),
                },
            })
            .collect()
    }

    assemble(None, &children, 0)
}
