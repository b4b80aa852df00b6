//! File format support
//!
//! - PSD (.psd) read through the `psd` crate, written by [`psd::writer`]
//! - PNG / JPEG export of composites

pub mod psd;
pub mod types;

pub use types::*;
