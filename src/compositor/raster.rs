//! Rasterizer seam for documents and text
//!
//! Page and text rendering is done by an external library. Layers only
//! see [`ContentRasterizer`], called from load workers.

use std::path::Path;

use crate::loader::LoadError;
use crate::sync::{SyncError, SyncReader, SyncWriter, WireEnum};
use crate::video::DecodedFrame;

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl WireEnum for TextAlign {
    const FIELD: &'static str = "text alignment";

    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(TextAlign::Left),
            1 => Some(TextAlign::Center),
            2 => Some(TextAlign::Right),
            _ => None,
        }
    }
}

/// How a text layer is rendered
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub point_size: f32,
    /// RGBA
    pub color: [u8; 4],
    pub alignment: TextAlign,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Sans".to_string(),
            point_size: 48.0,
            color: [255, 255, 255, 255],
            alignment: TextAlign::Left,
        }
    }
}

impl TextStyle {
    pub fn encode(&self, w: &mut SyncWriter) {
        w.put_str(&self.font_family);
        w.put_f32(self.point_size);
        w.put_u32(u32::from_ne_bytes(self.color));
        self.alignment.write(w);
    }

    pub fn decode(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            font_family: r.string()?,
            point_size: r.f32()?,
            color: r.u32()?.to_ne_bytes(),
            alignment: TextAlign::read(r)?,
        })
    }
}

/// Renders document pages and text into RGBA frames
pub trait ContentRasterizer: Send + Sync {
    fn page_count(&self, document: &Path) -> Result<u32, LoadError> {
        Err(LoadError::Rasterize(format!("cannot open {}", document.display())))
    }

    /// Render a page (0-based) so that neither edge exceeds `max_size`
    fn rasterize_page(&self, document: &Path, page: u32, _max_size: u32) -> Result<DecodedFrame, LoadError> {
        Err(LoadError::Rasterize(format!("cannot render page {} of {}", page, document.display())))
    }

    fn rasterize_text(&self, _text: &str, _style: &TextStyle, _max_size: u32) -> Result<DecodedFrame, LoadError> {
        Err(LoadError::Rasterize("text rendering unavailable".to_string()))
    }
}

/// Rasterizer used when none is configured; every request fails
#[derive(Debug, Default)]
pub struct UnavailableRasterizer;

impl ContentRasterizer for UnavailableRasterizer {}
