//! Composition parameters shared by all layer kinds

use crate::sync::{SyncError, SyncReader, SyncWriter, WireEnum};

/// Draw position relative to the rest of the composition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Hierarchy {
    Back,
    #[default]
    Front,
}

impl WireEnum for Hierarchy {
    const FIELD: &'static str = "hierarchy";

    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Hierarchy::Back),
            1 => Some(Hierarchy::Front),
            _ => None,
        }
    }
}

/// Surface a layer is projected onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum GridMode {
    Flat,
    Plane,
    #[default]
    Dome,
    Sphere,
    EquiAngularCubemap,
}

impl WireEnum for GridMode {
    const FIELD: &'static str = "grid mode";

    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(GridMode::Flat),
            1 => Some(GridMode::Plane),
            2 => Some(GridMode::Dome),
            3 => Some(GridMode::Sphere),
            4 => Some(GridMode::EquiAngularCubemap),
            _ => None,
        }
    }
}

/// Stereoscopic packing of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum StereoMode {
    #[default]
    Mono,
    SideBySide,
    TopBottom,
    TopBottomFlipped,
}

impl StereoMode {
    /// Size of one eye's picture for a packed source of the given size
    pub fn eye_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            StereoMode::Mono => (width, height),
            StereoMode::SideBySide => (width / 2, height),
            StereoMode::TopBottom | StereoMode::TopBottomFlipped => (width, height / 2),
        }
    }
}

impl WireEnum for StereoMode {
    const FIELD: &'static str = "stereo mode";

    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(StereoMode::Mono),
            1 => Some(StereoMode::SideBySide),
            2 => Some(StereoMode::TopBottom),
            3 => Some(StereoMode::TopBottomFlipped),
            _ => None,
        }
    }
}

/// Region of interest in normalized texture coordinates, origin bottom-left
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Roi {
    fn default() -> Self {
        Self::FULL
    }
}

impl Roi {
    /// The whole texture
    pub const FULL: Roi = Roi {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Build a region clamped into the unit square
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        let x = finite_or(x, 0.0).clamp(0.0, 1.0);
        let y = finite_or(y, 0.0).clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: finite_or(width, 1.0).clamp(0.0, 1.0 - x),
            height: finite_or(height, 1.0).clamp(0.0, 1.0 - y),
        }
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Region size in pixels for a texture of the given size
    pub fn pixel_size(&self, width: u32, height: u32) -> (u32, u32) {
        (
            (self.width * width as f32).round() as u32,
            (self.height * height as f32).round() as u32,
        )
    }

    pub fn encode(&self, w: &mut SyncWriter) {
        w.put_f32(self.x);
        w.put_f32(self.y);
        w.put_f32(self.width);
        w.put_f32(self.height);
    }

    pub fn decode(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self::new(r.f32()?, r.f32()?, r.f32()?, r.f32()?))
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_is_clamped_into_unit_square() {
        let roi = Roi::new(0.75, -0.5, 0.5, 2.0);
        assert_eq!(roi, Roi { x: 0.75, y: 0.0, width: 0.25, height: 1.0 });
        assert_eq!(roi.pixel_size(400, 200), (100, 200));
        assert!(Roi::new(0.0, 0.0, 1.0, 1.0).is_full());
    }

    #[test]
    fn test_stereo_eye_size() {
        assert_eq!(StereoMode::SideBySide.eye_size(3840, 1080), (1920, 1080));
        assert_eq!(StereoMode::TopBottomFlipped.eye_size(1920, 2160), (1920, 1080));
        assert_eq!(StereoMode::Mono.eye_size(10, 10), (10, 10));
    }

    #[test]
    fn test_grid_mode_wire_values_are_stable() {
        assert_eq!(GridMode::EquiAngularCubemap.to_wire(), 4);
        assert_eq!(GridMode::from_wire(1), Some(GridMode::Plane));
        assert_eq!(GridMode::from_wire(9), None);
    }
}
