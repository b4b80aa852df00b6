//! Source-over alpha compositing for straight (non-premultiplied) RGBA

use image::{Rgba, RgbaImage};

/// Blend `layer` onto `canvas` with its top-left corner at (`left`, `top`).
///
/// Pixels outside the canvas are clipped. `opacity` scales the layer alpha.
pub fn blend_onto(canvas: &mut RgbaImage, layer: &RgbaImage, left: i32, top: i32, opacity: u8) {
    if opacity == 0 {
        return;
    }

    let opacity = opacity as f32 / 255.0;
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);

    // Visible rectangle in layer coordinates
    let x_start = (-(left as i64)).max(0);
    let y_start = (-(top as i64)).max(0);
    let x_end = (layer.width() as i64).min(cw - left as i64);
    let y_end = (layer.height() as i64).min(ch - top as i64);

    if x_start >= x_end || y_start >= y_end {
        return;
    }

    for y in y_start..y_end {
        for x in x_start..x_end {
            let src = layer.get_pixel(x as u32, y as u32);
            let dx = (x + left as i64) as u32;
            let dy = (y + top as i64) as u32;
            let dst = canvas.get_pixel(dx, dy);
            if let Some(out) = source_over(*src, *dst, opacity) {
                canvas.put_pixel(dx, dy, out);
            }
        }
    }
}

/// Blend a single pixel; `None` when the source contributes nothing
pub fn source_over(src: Rgba<u8>, dst: Rgba<u8>, opacity: f32) -> Option<Rgba<u8>> {
    let src_a = (src[3] as f32 / 255.0) * opacity;
    if src_a <= 0.0 {
        return None;
    }

    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return None;
    }

    let blend = |s: u8, d: u8| -> u8 {
        let s_f = s as f32 / 255.0;
        let d_f = d as f32 / 255.0;
        let out = (s_f * src_a + d_f * dst_a * (1.0 - src_a)) / out_a;
        (out * 255.0).round() as u8
    };

    Some(Rgba([
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ]))
}
