//! Section walker and merged image decoder
//!
//! Locates the sections of a PSD/PSB file without parsing layer records and
//! decodes the stored merged image (the last section). Only 8-bit RGB and
//! grayscale data is decoded.

use super::compression::unpack_plane;
use super::types::{ColorMode, PsdHeader, COMPRESSION_RAW, COMPRESSION_RLE, RESOLUTION_INFO_ID, RESOURCE_SIGNATURE};
use crate::file::types::FileError;
use byteorder::{BigEndian, ReadBytesExt};
use image::RgbaImage;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Where the sections of a document live
#[derive(Debug, Clone)]
pub struct PsdLayout {
    pub header: PsdHeader,
    /// From the resolution resource, when present
    pub dpi: Option<u32>,
    /// Offset of the image data section
    pub image_data_offset: u64,
}

impl PsdLayout {
    pub fn scan(bytes: &[u8]) -> Result<Self, FileError> {
        let mut cursor = Cursor::new(bytes);
        let header = PsdHeader::read(&mut cursor)
            .map_err(|e| FileError::InvalidFormat(format!("PSD header: {}", e)))?;

        let color_data_len = cursor.read_u32::<BigEndian>()?;
        skip(&mut cursor, color_data_len as u64, bytes.len())?;

        let resources_len = cursor.read_u32::<BigEndian>()? as usize;
        let resources_start = cursor.position() as usize;
        let resources = bytes
            .get(resources_start..resources_start + resources_len)
            .ok_or_else(|| FileError::InvalidFormat("image resources truncated".into()))?;
        let dpi = find_resolution(resources);
        cursor.set_position((resources_start + resources_len) as u64);

        let layer_section_len = if header.is_psb() {
            cursor.read_u64::<BigEndian>()?
        } else {
            cursor.read_u32::<BigEndian>()? as u64
        };
        skip(&mut cursor, layer_section_len, bytes.len())?;

        Ok(Self {
            header,
            dpi,
            image_data_offset: cursor.position(),
        })
    }

    /// Whether [`decode_merged`](Self::decode_merged) handles this document
    pub fn decode_supported(&self) -> bool {
        self.header.depth == 8
            && matches!(
                self.header.color_mode(),
                Some(ColorMode::Rgb) | Some(ColorMode::Grayscale)
            )
    }

    /// Decode the merged image section into RGBA
    pub fn decode_merged(&self, bytes: &[u8]) -> Result<RgbaImage, FileError> {
        let header = &self.header;
        if header.depth != 8 {
            return Err(FileError::InvalidFormat(format!(
                "merged image decode supports 8-bit data, file is {}-bit",
                header.depth
            )));
        }
        let mode = header.color_mode();
        if !matches!(mode, Some(ColorMode::Rgb) | Some(ColorMode::Grayscale)) {
            return Err(FileError::InvalidFormat(format!(
                "merged image decode does not support {} color",
                mode.map(|m| m.name()).unwrap_or("unknown")
            )));
        }

        let width = header.width as usize;
        let height = header.height as usize;
        let channels = header.channels as usize;
        if width == 0 || height == 0 || channels == 0 {
            return Err(FileError::InvalidFormat("empty merged image".into()));
        }

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(self.image_data_offset);
        let compression = cursor.read_u16::<BigEndian>()?;

        let planes = match compression {
            COMPRESSION_RAW => read_raw_planes(&mut cursor, width, height, channels)?,
            COMPRESSION_RLE => read_rle_planes(&mut cursor, width, height, channels, header.is_psb())?,
            other => {
                return Err(FileError::InvalidFormat(format!(
                    "unsupported image data compression {}",
                    other
                )))
            }
        };

        assemble(&planes, header.width, header.height, mode == Some(ColorMode::Grayscale))
    }
}

fn skip(cursor: &mut Cursor<&[u8]>, len: u64, total: usize) -> Result<(), FileError> {
    let target = cursor
        .position()
        .checked_add(len)
        .ok_or_else(|| FileError::InvalidFormat("section length overflows".into()))?;
    if target > total as u64 {
        return Err(FileError::InvalidFormat("section extends past end of file".into()));
    }
    cursor.seek(SeekFrom::Start(target))?;
    Ok(())
}

/// Horizontal DPI from the resolution resource
fn find_resolution(resources: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(resources);
    while (cursor.position() as usize) + 12 <= resources.len() {
        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature).ok()?;
        if &signature != RESOURCE_SIGNATURE {
            return None;
        }
        let id = cursor.read_u16::<BigEndian>().ok()?;

        // Pascal name padded to even length
        let name_len = cursor.read_u8().ok()? as u64;
        let padded = (1 + name_len + 1) & !1;
        cursor.set_position(cursor.position() + padded - 1);

        let size = cursor.read_u32::<BigEndian>().ok()? as u64;
        let data_start = cursor.position();
        if id == RESOLUTION_INFO_ID && size >= 4 {
            let fixed = cursor.read_u32::<BigEndian>().ok()?;
            return Some(fixed >> 16);
        }
        cursor.set_position(data_start + ((size + 1) & !1));
    }
    None
}

fn read_raw_planes(
    cursor: &mut Cursor<&[u8]>,
    width: usize,
    height: usize,
    channels: usize,
) -> Result<Vec<Vec<u8>>, FileError> {
    let mut planes = Vec::with_capacity(channels);
    for _ in 0..channels {
        let mut plane = vec![0u8; width * height];
        cursor.read_exact(&mut plane)?;
        planes.push(plane);
    }
    Ok(planes)
}

fn read_rle_planes(
    cursor: &mut Cursor<&[u8]>,
    width: usize,
    height: usize,
    channels: usize,
    psb: bool,
) -> Result<Vec<Vec<u8>>, FileError> {
    let mut counts = Vec::with_capacity(channels * height);
    for _ in 0..channels * height {
        let count = if psb {
            cursor.read_u32::<BigEndian>()?
        } else {
            cursor.read_u16::<BigEndian>()? as u32
        };
        counts.push(count);
    }

    let mut planes = Vec::with_capacity(channels);
    for channel_counts in counts.chunks(height) {
        let total: usize = channel_counts.iter().map(|&c| c as usize).sum();
        let mut data = vec![0u8; total];
        cursor.read_exact(&mut data)?;

        let row_counts: Vec<u16> = channel_counts
            .iter()
            .map(|&c| u16::try_from(c))
            .collect::<Result<_, _>>()
            .map_err(|_| FileError::InvalidFormat("packed row too long".into()))?;
        let plane = unpack_plane(&row_counts, &data, width, height)
            .map_err(|e| FileError::InvalidFormat(format!("merged image: {}", e)))?;
        planes.push(plane);
    }
    Ok(planes)
}

fn assemble(planes: &[Vec<u8>], width: u32, height: u32, grayscale: bool) -> Result<RgbaImage, FileError> {
    let pixel_count = (width as usize) * (height as usize);
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    let (color_planes, alpha_index) = if grayscale { (1, 1) } else { (3, 3) };
    if planes.len() < color_planes {
        return Err(FileError::InvalidFormat(format!(
            "merged image has {} channel(s)",
            planes.len()
        )));
    }
    let alpha = planes.get(alpha_index);

    for i in 0..pixel_count {
        let (r, g, b) = if grayscale {
            (planes[0][i], planes[0][i], planes[0][i])
        } else {
            (planes[0][i], planes[1][i], planes[2][i])
        };
        let a = alpha.map(|p| p[i]).unwrap_or(255);
        rgba.extend_from_slice(&[r, g, b, a]);
    }

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| FileError::InvalidFormat("merged image buffer size mismatch".into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use byteorder::BigEndian as BE;

    /// Minimal grayscale file with raw image data and no resources
    fn raw_gray_psd(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        PsdHeader {
            version: 1,
            channels: 1,
            height,
            width,
            depth: 8,
            color_mode: ColorMode::Grayscale.to_u16(),
        }
        .write(&mut buf)
        .unwrap();
        buf.write_u32::<BE>(0).unwrap(); // color mode data
        buf.write_u32::<BE>(0).unwrap(); // resources
        buf.write_u32::<BE>(0).unwrap(); // layers
        buf.write_u16::<BE>(COMPRESSION_RAW).unwrap();
        buf.extend_from_slice(pixels);
        buf
    }

    #[test]
    fn test_decode_raw_grayscale() {
        let bytes = raw_gray_psd(2, 2, &[0, 64, 128, 255]);
        let layout = PsdLayout::scan(&bytes).unwrap();
        assert_eq!(layout.dpi, None);

        let img = layout.decode_merged(&bytes).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 0).0, [64, 64, 64, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_truncated_data_is_error() {
        let bytes = raw_gray_psd(4, 4, &[1, 2, 3]);
        let layout = PsdLayout::scan(&bytes).unwrap();
        assert!(layout.decode_merged(&bytes).is_err());
    }

    #[test]
    fn test_non_psd_is_invalid_format() {
        assert!(matches!(
            PsdLayout::scan(b"PNG definitely not a photoshop document"),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_sixteen_bit_is_rejected() {
        let mut bytes = raw_gray_psd(1, 1, &[0, 0]);
        // depth lives at offset 22
        bytes[22..24].copy_from_slice(&16u16.to_be_bytes());
        let layout = PsdLayout::scan(&bytes).unwrap();
        assert!(matches!(
            layout.decode_merged(&bytes),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_oversized_layer_section_is_invalid_format() {
        let mut bytes = Vec::new();
        PsdHeader {
            version: 2,
            channels: 3,
            height: 1,
            width: 1,
            depth: 8,
            color_mode: ColorMode::Rgb.to_u16(),
        }
        .write(&mut bytes)
        .unwrap();
        bytes.write_u32::<BE>(0).unwrap(); // color mode data
        bytes.write_u32::<BE>(0).unwrap(); // resources
        bytes.write_u64::<BE>(u64::MAX).unwrap(); // layers
        bytes.extend_from_slice(&[0; 8]);

        assert!(matches!(
            PsdLayout::scan(&bytes),
            Err(FileError::InvalidFormat(_))
        ));
    }
}
