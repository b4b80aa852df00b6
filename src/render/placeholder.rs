//! Diagnostic placeholder bitmap
//!
//! Painted when no composition strategy produced anything. Text uses the
//! built-in 8x8 glyph set so no font file is needed.

use super::generator::StrategyAttempt;
use super::RenderError;
use font8x8::UnicodeFonts;
use image::{Rgba, RgbaImage};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 200;

pub const BACKGROUND: Rgba<u8> = Rgba([255, 200, 200, 255]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([200, 0, 0, 255]);

const MARGIN: u32 = 10;
const LINE_HEIGHT: u32 = 20;
const GLYPH_SIZE: u32 = 8;

/// Text lines shown on the placeholder for a set of failed attempts
pub fn diagnostic_lines(attempts: &[StrategyAttempt]) -> Vec<String> {
    let mut lines = vec![
        "Failed to load PSD file.".to_string(),
        String::new(),
        "Tried methods:".to_string(),
    ];
    lines.extend(attempts.iter().map(|a| format!("- {}", a)));
    lines
}

/// Paint the placeholder
pub fn render(width: u32, height: u32, lines: &[String]) -> Result<RgbaImage, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::Composite(format!(
            "cannot paint a {}x{} placeholder",
            width, height
        )));
    }

    let mut img = RgbaImage::from_pixel(width, height, BACKGROUND);

    for (i, line) in lines.iter().enumerate() {
        let y = MARGIN + i as u32 * LINE_HEIGHT;
        if y + GLYPH_SIZE > height {
            break;
        }
        draw_text(&mut img, MARGIN, y, line);
    }

    Ok(img)
}

fn draw_text(img: &mut RgbaImage, x: u32, y: u32, text: &str) {
    let mut cursor = x;
    for ch in text.chars() {
        if cursor + GLYPH_SIZE > img.width() {
            break;
        }
        let glyph = font8x8::BASIC_FONTS
            .get(ch)
            .or_else(|| font8x8::BASIC_FONTS.get('?'));
        if let Some(rows) = glyph {
            for (gy, row) in rows.iter().enumerate() {
                for gx in 0..GLYPH_SIZE {
                    if row & (1 << gx) != 0 {
                        img.put_pixel(cursor + gx, y + gy as u32, TEXT_COLOR);
                    }
                }
            }
        }
        cursor += GLYPH_SIZE;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::source::Strategy;

    #[test]
    fn test_placeholder_has_background_and_text() {
        let lines = vec!["Failed".to_string()];
        let img = render(DEFAULT_WIDTH, DEFAULT_HEIGHT, &lines).unwrap();

        assert_eq!(img.dimensions(), (800, 200));
        assert_eq!(img.get_pixel(0, 0), &BACKGROUND);
        assert!(img.pixels().any(|p| *p == TEXT_COLOR));
    }

    #[test]
    fn test_zero_size_is_hard_failure() {
        assert!(render(0, 200, &[]).is_err());
    }

    #[test]
    fn test_lines_that_do_not_fit_are_dropped() {
        let lines: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        let img = render(120, 40, &lines).unwrap();
        assert_eq!(img.dimensions(), (120, 40));
    }

    #[test]
    fn test_diagnostic_lines_list_attempts() {
        let attempts = vec![StrategyAttempt {
            strategy: Strategy::Composite,
            error: Some("bad header".into()),
        }];
        let lines = diagnostic_lines(&attempts);
        assert_eq!(lines[0], "Failed to load PSD file.");
        assert!(lines.last().unwrap().contains("bad header"));
    }
}
