//! Decoded frame representation
//!
//! Contains the raw RGBA pixel data and metadata for a decoded video frame,
//! image, rasterized page or captured source frame.

/// A decoded frame with RGBA pixel data
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Raw pixel data, RGBA (4 bytes/pixel)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
    /// Frame index (0-based)
    pub frame_index: u64,
}

impl DecodedFrame {
    /// Create a new RGBA decoded frame
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: f64, frame_index: u64) -> Self {
        Self {
            data,
            width,
            height,
            pts,
            frame_index,
        }
    }

    /// Create a still frame (images, pages, captured sources)
    pub fn still(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, 0.0, 0)
    }

    /// Create a frame filled with a single RGBA colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(Self::expected_size(width, height))
            .collect();
        Self::still(data, width, height)
    }

    /// Get the expected data size for RGBA frame dimensions (width * height * 4)
    pub fn expected_size(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 4
    }

    /// Check if the frame data has the correct size
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == Self::expected_size(self.width, self.height)
    }

    /// Get the stride (bytes per row)
    pub fn stride(&self) -> usize {
        (self.width as usize) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let width = 1920;
        let height = 1080;
        let data = vec![0u8; DecodedFrame::expected_size(width, height)];
        let frame = DecodedFrame::new(data, width, height, 0.0, 0);

        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert!(frame.is_valid());
        assert_eq!(frame.stride(), 1920 * 4);
    }

    #[test]
    fn test_solid_frame() {
        let frame = DecodedFrame::solid(2, 2, [1, 2, 3, 4]);
        assert!(frame.is_valid());
        assert_eq!(&frame.data[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_frame_is_invalid() {
        let frame = DecodedFrame::still(Vec::new(), 0, 0);
        assert!(!frame.is_valid());
    }
}
