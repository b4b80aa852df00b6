//! PSD record types
//!
//! Big-endian throughout. Only what the writer emits and the merged-image
//! reader needs is modelled here; everything else is delegated to the `psd`
//! crate.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const PSD_SIGNATURE: &[u8; 4] = b"8BPS";
pub const RESOURCE_SIGNATURE: &[u8; 4] = b"8BIM";

/// Image data compression methods
pub const COMPRESSION_RAW: u16 = 0;
pub const COMPRESSION_RLE: u16 = 1;

/// Image resource id of the resolution record
pub const RESOLUTION_INFO_ID: u16 = 0x03ED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Bitmap,
    Grayscale,
    Indexed,
    Rgb,
    Cmyk,
    Multichannel,
    Duotone,
    Lab,
}

impl ColorMode {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => ColorMode::Bitmap,
            1 => ColorMode::Grayscale,
            2 => ColorMode::Indexed,
            3 => ColorMode::Rgb,
            4 => ColorMode::Cmyk,
            7 => ColorMode::Multichannel,
            8 => ColorMode::Duotone,
            9 => ColorMode::Lab,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        match self {
            ColorMode::Bitmap => 0,
            ColorMode::Grayscale => 1,
            ColorMode::Indexed => 2,
            ColorMode::Rgb => 3,
            ColorMode::Cmyk => 4,
            ColorMode::Multichannel => 7,
            ColorMode::Duotone => 8,
            ColorMode::Lab => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorMode::Bitmap => "Bitmap",
            ColorMode::Grayscale => "Grayscale",
            ColorMode::Indexed => "Indexed",
            ColorMode::Rgb => "RGB",
            ColorMode::Cmyk => "CMYK",
            ColorMode::Multichannel => "Multichannel",
            ColorMode::Duotone => "Duotone",
            ColorMode::Lab => "Lab",
        }
    }
}

/// File header (26 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsdHeader {
    /// 1 = PSD, 2 = PSB
    pub version: u16,
    pub channels: u16,
    pub height: u32,
    pub width: u32,
    pub depth: u16,
    pub color_mode: u16,
}

impl PsdHeader {
    pub const SIZE: usize = 26;

    /// 8-bit RGB with an alpha channel
    pub fn new_rgba(width: u32, height: u32) -> Self {
        Self {
            version: 1,
            channels: 4,
            height,
            width,
            depth: 8,
            color_mode: ColorMode::Rgb.to_u16(),
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(PSD_SIGNATURE)?;
        w.write_u16::<BigEndian>(self.version)?;
        w.write_all(&[0u8; 6])?;
        w.write_u16::<BigEndian>(self.channels)?;
        w.write_u32::<BigEndian>(self.height)?;
        w.write_u32::<BigEndian>(self.width)?;
        w.write_u16::<BigEndian>(self.depth)?;
        w.write_u16::<BigEndian>(self.color_mode)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if &signature != PSD_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing 8BPS signature",
            ));
        }

        let version = r.read_u16::<BigEndian>()?;
        let mut reserved = [0u8; 6];
        r.read_exact(&mut reserved)?;

        Ok(Self {
            version,
            channels: r.read_u16::<BigEndian>()?,
            height: r.read_u32::<BigEndian>()?,
            width: r.read_u32::<BigEndian>()?,
            depth: r.read_u16::<BigEndian>()?,
            color_mode: r.read_u16::<BigEndian>()?,
        })
    }

    pub fn color_mode(&self) -> Option<ColorMode> {
        ColorMode::from_u16(self.color_mode)
    }

    pub fn is_psb(&self) -> bool {
        self.version == 2
    }
}

/// Layer record flags byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerFlags {
    pub transparency_protected: bool,
    pub visible: bool,
    pub has_useful_info: bool,
    pub pixel_data_irrelevant: bool,
}

impl LayerFlags {
    pub fn to_byte(self) -> u8 {
        let mut flags = 0u8;
        if self.transparency_protected {
            flags |= 0x01;
        }
        if !self.visible {
            flags |= 0x02; // set = hidden
        }
        if self.has_useful_info {
            flags |= 0x08;
        }
        if self.pixel_data_irrelevant {
            flags |= 0x10;
        }
        flags
    }
}

/// Layer record with its channel data already packed
#[derive(Debug)]
pub struct PreparedLayer {
    pub name: String,
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub opacity: u8,
    pub blend_mode: [u8; 4],
    pub flags: LayerFlags,
    pub channels: Vec<PreparedChannel>,
}

#[derive(Debug)]
pub struct PreparedChannel {
    /// -1 = alpha, 0 = red, 1 = green, 2 = blue
    pub id: i16,
    pub row_counts: Vec<u16>,
    pub data: Vec<u8>,
}

impl PreparedChannel {
    /// Compression marker + row counts + packed rows
    pub fn data_length(&self) -> u32 {
        2 + self.row_counts.len() as u32 * 2 + self.data.len() as u32
    }
}

/// Resolution record (fixed point 16.16 pixels per inch)
#[derive(Debug, Clone, Copy)]
pub struct ResolutionInfo {
    pub dpi: u32,
}

impl ResolutionInfo {
    pub const SIZE: usize = 16;

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for _ in 0..2 {
            w.write_u32::<BigEndian>(self.dpi << 16)?;
            w.write_u16::<BigEndian>(1)?; // pixels per inch
            w.write_u16::<BigEndian>(1)?; // inches
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_write_read() {
        let header = PsdHeader::new_rgba(1920, 1080);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), PsdHeader::SIZE);
        assert_eq!(&buf[0..4], b"8BPS");

        let back = PsdHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, header);
        assert_eq!(back.color_mode(), Some(ColorMode::Rgb));
        assert!(!back.is_psb());
    }

    #[test]
    fn test_header_rejects_bad_signature() {
        let err = PsdHeader::read(&mut Cursor::new(b"GIF89a-not-a-psd-file-at-all")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_layer_flags_hidden_bit() {
        let visible = LayerFlags {
            visible: true,
            ..Default::default()
        };
        assert_eq!(visible.to_byte(), 0x00);

        let hidden = LayerFlags {
            visible: false,
            has_useful_info: true,
            ..Default::default()
        };
        assert_eq!(hidden.to_byte(), 0x0A);
    }

    #[test]
    fn test_resolution_info_size() {
        let mut buf = Vec::new();
        ResolutionInfo { dpi: 72 }.write(&mut buf).unwrap();
        assert_eq!(buf.len(), ResolutionInfo::SIZE);
        assert_eq!(&buf[0..4], &(72u32 << 16).to_be_bytes());
    }

    #[test]
    fn test_color_mode_names() {
        assert_eq!(ColorMode::from_u16(4).map(|m| m.name()), Some("CMYK"));
        assert_eq!(ColorMode::from_u16(5), None);
    }
}
