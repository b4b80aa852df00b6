//! PSD writer
//!
//! Emits 8-bit RGBA documents: one pixel layer record per [`SaveLayer`]
//! (bottom-to-top), RLE channel data and a merged image. Group structure is
//! not written.

use super::blend_mode_to_psd;
use super::compression::pack_plane;
use super::types::{
    LayerFlags, PreparedChannel, PreparedLayer, PsdHeader, ResolutionInfo, COMPRESSION_RLE,
    RESOLUTION_INFO_ID, RESOURCE_SIGNATURE,
};
use crate::file::types::FileError;
use crate::render::blend::blend_onto;
use byteorder::{BigEndian, WriteBytesExt};
use image::RgbaImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A pixel layer to be written
#[derive(Debug, Clone)]
pub struct SaveLayer {
    pub name: String,
    pub visible: bool,
    pub opacity: u8,
    /// Blend mode name, e.g. `multiply`
    pub blend_mode: String,
    /// Layer pixels, positioned at (`left`, `top`) on the canvas
    pub image: RgbaImage,
    pub left: i32,
    pub top: i32,
}

/// Everything needed to serialize a document
#[derive(Debug, Clone)]
pub struct SaveDocument {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// Bottom-to-top
    pub layers: Vec<SaveLayer>,
    /// Merged image; composed from the visible layers when absent
    pub composite: Option<RgbaImage>,
}

pub fn save_psd(path: &Path, doc: &SaveDocument) -> Result<(), FileError> {
    tracing::info!("Saving PSD file: {:?}", path);

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_psd(&mut writer, doc)?;
    writer.flush()?;

    tracing::info!("PSD file saved ({} layers)", doc.layers.len());
    Ok(())
}

/// Serialize `doc` to any writer
pub fn write_psd<W: Write>(w: &mut W, doc: &SaveDocument) -> Result<(), FileError> {
    if doc.width == 0 || doc.height == 0 {
        return Err(FileError::Psd(format!(
            "cannot write a {}x{} document",
            doc.width, doc.height
        )));
    }

    let prepared: Vec<PreparedLayer> = doc.layers.iter().map(prepare_layer).collect();

    PsdHeader::new_rgba(doc.width, doc.height).write(w)?;

    // Color mode data (none for RGB)
    w.write_u32::<BigEndian>(0)?;

    write_image_resources(w, doc.dpi)?;
    write_layer_section(w, &prepared)?;

    let merged = match &doc.composite {
        Some(img) if img.dimensions() == (doc.width, doc.height) => img.clone(),
        Some(img) => {
            tracing::warn!(
                "Merged image is {}x{}, document is {}x{}; recomposing from layers",
                img.width(),
                img.height(),
                doc.width,
                doc.height
            );
            compose_visible(doc)
        }
        None => compose_visible(doc),
    };
    write_merged_image(w, &merged)?;

    Ok(())
}

fn prepare_layer(layer: &SaveLayer) -> PreparedLayer {
    let (width, height) = match layer.image.dimensions() {
        (0, _) | (_, 0) => (0, 0),
        dims => dims,
    };

    PreparedLayer {
        name: layer.name.clone(),
        top: layer.top,
        left: layer.left,
        bottom: layer.top + height as i32,
        right: layer.left + width as i32,
        opacity: layer.opacity,
        blend_mode: blend_mode_to_psd(&layer.blend_mode),
        flags: LayerFlags {
            visible: layer.visible,
            has_useful_info: true,
            ..Default::default()
        },
        // Alpha first, then color
        channels: [(-1i16, 3usize), (0, 0), (1, 1), (2, 2)]
            .iter()
            .map(|&(id, component)| {
                let (row_counts, data) = pack_plane(&plane(&layer.image, component), width as usize);
                PreparedChannel {
                    id,
                    row_counts,
                    data,
                }
            })
            .collect(),
    }
}

/// One color component of an RGBA image as a contiguous plane
fn plane(img: &RgbaImage, component: usize) -> Vec<u8> {
    img.pixels().map(|p| p[component]).collect()
}

fn write_image_resources<W: Write>(w: &mut W, dpi: u32) -> Result<(), FileError> {
    let mut data = Vec::with_capacity(ResolutionInfo::SIZE);
    ResolutionInfo { dpi }.write(&mut data)?;

    let mut section = Vec::new();
    section.write_all(RESOURCE_SIGNATURE)?;
    section.write_u16::<BigEndian>(RESOLUTION_INFO_ID)?;
    section.write_u16::<BigEndian>(0)?; // empty name, padded
    section.write_u32::<BigEndian>(data.len() as u32)?;
    section.write_all(&data)?;

    w.write_u32::<BigEndian>(section.len() as u32)?;
    w.write_all(&section)?;
    Ok(())
}

fn write_layer_section<W: Write>(w: &mut W, layers: &[PreparedLayer]) -> Result<(), FileError> {
    if layers.is_empty() {
        w.write_u32::<BigEndian>(0)?;
        return Ok(());
    }

    let mut info = Vec::new();

    // Negative count: first alpha channel holds merged transparency
    info.write_i16::<BigEndian>(-(layers.len() as i16))?;
    for layer in layers {
        write_layer_record(&mut info, layer)?;
    }
    for layer in layers {
        for channel in &layer.channels {
            info.write_u16::<BigEndian>(COMPRESSION_RLE)?;
            for &count in &channel.row_counts {
                info.write_u16::<BigEndian>(count)?;
            }
            info.write_all(&channel.data)?;
        }
    }
    while info.len() % 4 != 0 {
        info.push(0);
    }

    // layer info length field + layer info + empty global mask
    w.write_u32::<BigEndian>((4 + info.len() + 4) as u32)?;
    w.write_u32::<BigEndian>(info.len() as u32)?;
    w.write_all(&info)?;
    w.write_u32::<BigEndian>(0)?;
    Ok(())
}

fn write_layer_record<W: Write>(w: &mut W, layer: &PreparedLayer) -> Result<(), FileError> {
    w.write_i32::<BigEndian>(layer.top)?;
    w.write_i32::<BigEndian>(layer.left)?;
    w.write_i32::<BigEndian>(layer.bottom)?;
    w.write_i32::<BigEndian>(layer.right)?;

    w.write_u16::<BigEndian>(layer.channels.len() as u16)?;
    for channel in &layer.channels {
        w.write_i16::<BigEndian>(channel.id)?;
        w.write_u32::<BigEndian>(channel.data_length())?;
    }

    w.write_all(RESOURCE_SIGNATURE)?;
    w.write_all(&layer.blend_mode)?;
    w.write_u8(layer.opacity)?;
    w.write_u8(0)?; // clipping: base
    w.write_u8(layer.flags.to_byte())?;
    w.write_u8(0)?; // filler

    let mut extra = Vec::new();
    extra.write_u32::<BigEndian>(0)?; // mask data
    extra.write_u32::<BigEndian>(0)?; // blending ranges
    write_pascal_string(&mut extra, &layer.name)?;

    w.write_u32::<BigEndian>(extra.len() as u32)?;
    w.write_all(&extra)?;
    Ok(())
}

/// Pascal string padded to a multiple of 4 bytes
fn write_pascal_string<W: Write>(w: &mut W, s: &str) -> Result<(), FileError> {
    let mut len = s.len().min(255);
    while !s.is_char_boundary(len) {
        len -= 1;
    }

    let total = 1 + len;
    let padded = (total + 3) & !3;

    w.write_u8(len as u8)?;
    w.write_all(&s.as_bytes()[..len])?;
    for _ in total..padded {
        w.write_u8(0)?;
    }
    Ok(())
}

fn write_merged_image<W: Write>(w: &mut W, img: &RgbaImage) -> Result<(), FileError> {
    w.write_u16::<BigEndian>(COMPRESSION_RLE)?;

    let width = img.width() as usize;
    let mut counts: Vec<u16> = Vec::new();
    let mut data: Vec<u8> = Vec::new();

    // R, G, B, A
    for component in 0..4 {
        let (row_counts, packed) = pack_plane(&plane(img, component), width);
        counts.extend(row_counts);
        data.extend(packed);
    }

    for count in counts {
        w.write_u16::<BigEndian>(count)?;
    }
    w.write_all(&data)?;
    Ok(())
}

/// Visible layers blended bottom-to-top onto a transparent canvas
fn compose_visible(doc: &SaveDocument) -> RgbaImage {
    let mut canvas = RgbaImage::new(doc.width, doc.height);
    for layer in doc.layers.iter().filter(|l| l.visible) {
        blend_onto(&mut canvas, &layer.image, layer.left, layer.top, layer.opacity);
    }
    canvas
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::image_data::PsdLayout;
    use super::*;
    use image::Rgba;

    fn solid_layer(name: &str, color: [u8; 4], left: i32, top: i32, w: u32, h: u32) -> SaveLayer {
        SaveLayer {
            name: name.to_string(),
            visible: true,
            opacity: 255,
            blend_mode: "normal".to_string(),
            image: RgbaImage::from_pixel(w, h, Rgba(color)),
            left,
            top,
        }
    }

    fn two_layer_doc() -> SaveDocument {
        SaveDocument {
            width: 8,
            height: 6,
            dpi: 144,
            layers: vec![
                solid_layer("Background", [255, 255, 255, 255], 0, 0, 8, 6),
                solid_layer("Red", [255, 0, 0, 255], 2, 1, 3, 3),
            ],
            composite: None,
        }
    }

    #[test]
    fn test_write_pascal_string_padding() {
        let mut buf = Vec::new();
        write_pascal_string(&mut buf, "Test").unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(buf[0], 4);
        assert_eq!(&buf[1..5], b"Test");

        let mut buf = Vec::new();
        write_pascal_string(&mut buf, "AB").unwrap();
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_pascal_string_truncates_on_char_boundary() {
        let name = "é".repeat(200);
        let mut buf = Vec::new();
        write_pascal_string(&mut buf, &name).unwrap();
        assert_eq!(buf[0], 254);
        assert!(std::str::from_utf8(&buf[1..255]).is_ok());
    }

    #[test]
    fn test_layer_bounds_follow_position() {
        let layer = prepare_layer(&solid_layer("L", [0, 0, 0, 255], 5, 7, 4, 2));
        assert_eq!((layer.left, layer.top, layer.right, layer.bottom), (5, 7, 9, 9));
        assert_eq!(layer.channels.len(), 4);
        assert_eq!(layer.channels[0].id, -1);
        assert_eq!(layer.channels[0].row_counts.len(), 2);
    }

    #[test]
    fn test_written_file_scans_and_merged_image_matches() {
        let doc = two_layer_doc();
        let mut bytes = Vec::new();
        write_psd(&mut bytes, &doc).unwrap();

        let layout = PsdLayout::scan(&bytes).unwrap();
        assert_eq!(layout.header.width, 8);
        assert_eq!(layout.header.height, 6);
        assert_eq!(layout.dpi, Some(144));

        let merged = layout.decode_merged(&bytes).unwrap();
        assert_eq!(merged.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(merged.get_pixel(3, 2).0, [255, 0, 0, 255]);
        assert_eq!(merged.get_pixel(5, 4).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_hidden_layers_are_left_out_of_merged_image() {
        let mut doc = two_layer_doc();
        doc.layers[1].visible = false;
        let mut bytes = Vec::new();
        write_psd(&mut bytes, &doc).unwrap();

        let merged = PsdLayout::scan(&bytes)
            .unwrap()
            .decode_merged(&bytes)
            .unwrap();
        assert_eq!(merged.get_pixel(3, 2).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_explicit_composite_is_written_verbatim() {
        let mut doc = two_layer_doc();
        doc.composite = Some(RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 4])));
        let mut bytes = Vec::new();
        write_psd(&mut bytes, &doc).unwrap();

        let merged = PsdLayout::scan(&bytes)
            .unwrap()
            .decode_merged(&bytes)
            .unwrap();
        assert_eq!(merged.get_pixel(7, 5).0, [1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_size_document_is_rejected() {
        let doc = SaveDocument {
            width: 0,
            height: 4,
            dpi: 72,
            layers: vec![],
            composite: None,
        };
        assert!(write_psd(&mut Vec::new(), &doc).is_err());
    }
}
