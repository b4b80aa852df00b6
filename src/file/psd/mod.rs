//! Adobe Photoshop (.psd) support
//!
//! Reading goes through the `psd` crate ([`PsdSource`]); the merged image
//! section is also decoded independently ([`image_data`]). Writing is done
//! here ([`writer`]).

pub mod compression;
pub mod image_data;
mod reader;
pub mod types;
pub mod writer;

pub use reader::PsdSource;
pub use writer::{save_psd, SaveDocument, SaveLayer};

/// (name, PSD key, `psd` crate variant name)
const BLEND_MODES: [(&str, &[u8; 4], &str); 28] = [
    ("normal", b"norm", "Normal"),
    ("pass-through", b"pass", "PassThrough"),
    ("dissolve", b"diss", "Dissolve"),
    ("darken", b"dark", "Darken"),
    ("multiply", b"mul ", "Multiply"),
    ("color-burn", b"idiv", "ColorBurn"),
    ("linear-burn", b"lbrn", "LinearBurn"),
    ("darker-color", b"dkCl", "DarkerColor"),
    ("lighten", b"lite", "Lighten"),
    ("screen", b"scrn", "Screen"),
    ("color-dodge", b"div ", "ColorDodge"),
    ("linear-dodge", b"lddg", "LinearDodge"),
    ("lighter-color", b"lgCl", "LighterColor"),
    ("overlay", b"over", "Overlay"),
    ("soft-light", b"sLit", "SoftLight"),
    ("hard-light", b"hLit", "HardLight"),
    ("vivid-light", b"vLit", "VividLight"),
    ("linear-light", b"lLit", "LinearLight"),
    ("pin-light", b"pLit", "PinLight"),
    ("hard-mix", b"hMix", "HardMix"),
    ("difference", b"diff", "Difference"),
    ("exclusion", b"smud", "Exclusion"),
    ("subtract", b"fsub", "Subtract"),
    ("divide", b"fdiv", "Divide"),
    ("hue", b"hue ", "Hue"),
    ("saturation", b"sat ", "Saturation"),
    ("color", b"colr", "Color"),
    ("luminosity", b"lum ", "Luminosity"),
];

/// Blend mode name to PSD key; unknown names map to `norm`
pub fn blend_mode_to_psd(mode: &str) -> [u8; 4] {
    BLEND_MODES
        .iter()
        .find(|(name, _, _)| *name == mode)
        .map(|(_, key, _)| **key)
        .unwrap_or(*b"norm")
}

/// PSD key to blend mode name; unknown keys map to `normal`
pub fn psd_to_blend_mode(key: &[u8]) -> &'static str {
    BLEND_MODES
        .iter()
        .find(|(_, k, _)| k.as_slice() == key)
        .map(|(name, _, _)| *name)
        .unwrap_or("normal")
}

/// Blend mode name from the `psd` crate's Debug output.
///
/// Pass-through only exists on groups; pixel layers written back get `normal`.
pub fn blend_mode_from_debug(variant: &str) -> &'static str {
    match BLEND_MODES.iter().find(|(_, _, v)| *v == variant) {
        Some(("pass-through", _, _)) | None => "normal",
        Some((name, _, _)) => *name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_mode_keys_round_trip() {
        for (name, key, _) in BLEND_MODES.iter() {
            assert_eq!(&blend_mode_to_psd(name), *key);
            assert_eq!(psd_to_blend_mode(key.as_slice()), *name);
        }
    }

    #[test]
    fn test_unknown_blend_modes_fall_back_to_normal() {
        assert_eq!(&blend_mode_to_psd("unknown-mode"), b"norm");
        assert_eq!(psd_to_blend_mode(&[0, 1]), "normal");
        assert_eq!(blend_mode_from_debug("Glitter"), "normal");
    }

    #[test]
    fn test_debug_names() {
        assert_eq!(blend_mode_from_debug("ColorDodge"), "color-dodge");
        assert_eq!(blend_mode_from_debug("PassThrough"), "normal");
    }
}
