//! PackBits RLE, as used by PSD channel data
//!
//! Header byte `n`:
//! - `0..=127`: copy the next `n + 1` bytes
//! - `-127..=-1`: repeat the next byte `1 - n` times
//! - `-128`: no-op
//!
//! Every scanline is packed on its own; a channel plane is stored as one
//! big-endian `u16` byte count per row followed by the packed rows.

use byteorder::ReadBytesExt;
use std::io::{self, Cursor, Read};

const MAX_CHUNK: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Row {row}: unpacked to {actual} bytes, expected {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Expected {expected} row counts, got {actual}")]
    RowCount { expected: usize, actual: usize },
}

/// Pack one scanline
pub fn pack_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + row.len() / MAX_CHUNK + 1);
    let mut literal_start = 0;
    let mut i = 0;

    while i < row.len() {
        let run = run_length(&row[i..]);
        if run >= 3 {
            flush_literal(&mut out, &row[literal_start..i]);
            out.push((1 - run as i16) as u8);
            out.push(row[i]);
            i += run;
            literal_start = i;
        } else {
            i += 1;
            if i - literal_start == MAX_CHUNK {
                flush_literal(&mut out, &row[literal_start..i]);
                literal_start = i;
            }
        }
    }
    flush_literal(&mut out, &row[literal_start..]);

    out
}

fn run_length(bytes: &[u8]) -> usize {
    let first = bytes[0];
    bytes
        .iter()
        .take(MAX_CHUNK)
        .take_while(|&&b| b == first)
        .count()
}

fn flush_literal(out: &mut Vec<u8>, literal: &[u8]) {
    for chunk in literal.chunks(MAX_CHUNK) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
}

/// Unpack one scanline of exactly `width` bytes
pub fn unpack_row(packed: &[u8], width: usize) -> Result<Vec<u8>, io::Error> {
    let mut out = Vec::with_capacity(width);
    let mut cursor = Cursor::new(packed);

    while out.len() < width && (cursor.position() as usize) < packed.len() {
        let n = cursor.read_i8()?;
        if n >= 0 {
            let start = out.len();
            out.resize(start + n as usize + 1, 0);
            cursor.read_exact(&mut out[start..])?;
        } else if n != -128 {
            let value = cursor.read_u8()?;
            let count = (1 - n as i16) as usize;
            out.extend(std::iter::repeat(value).take(count));
        }
    }

    Ok(out)
}

/// Pack a `width`-wide channel plane row by row.
///
/// Returns (row byte counts, concatenated packed rows).
pub fn pack_plane(plane: &[u8], width: usize) -> (Vec<u16>, Vec<u8>) {
    if width == 0 {
        return (Vec::new(), Vec::new());
    }

    let rows = plane.len() / width;
    let mut counts = Vec::with_capacity(rows);
    let mut data = Vec::with_capacity(plane.len() / 2);

    for row in plane.chunks_exact(width) {
        let packed = pack_row(row);
        counts.push(packed.len() as u16);
        data.extend_from_slice(&packed);
    }

    (counts, data)
}

/// Inverse of [`pack_plane`]
pub fn unpack_plane(
    counts: &[u16],
    data: &[u8],
    width: usize,
    height: usize,
) -> Result<Vec<u8>, CompressionError> {
    if counts.len() != height {
        return Err(CompressionError::RowCount {
            expected: height,
            actual: counts.len(),
        });
    }

    let mut plane = Vec::with_capacity(width * height);
    let mut offset = 0usize;

    for (row, &count) in counts.iter().enumerate() {
        let end = offset + count as usize;
        let packed = data.get(offset..end).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "packed row past end of data")
        })?;
        let unpacked = unpack_row(packed, width)?;
        if unpacked.len() != width {
            return Err(CompressionError::RowLength {
                row,
                expected: width,
                actual: unpacked.len(),
            });
        }
        plane.extend_from_slice(&unpacked);
        offset = end;
    }

    Ok(plane)
}
