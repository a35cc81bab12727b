//! Texture management for layers
//!
//! GPU textures belong to the external renderer. Layers talk to it through
//! [`TextureSink`]; each layer owns at most one handle via [`LayerTexture`]
//! and never shares it with another layer.

use std::collections::HashMap;

use super::DecodedFrame;

/// Opaque handle to a renderer-owned texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Renderer-side texture operations, called from the render thread only
pub trait TextureSink {
    /// Allocate an RGBA texture; `None` if the renderer refuses
    fn allocate(&mut self, width: u32, height: u32) -> Option<TextureHandle>;

    /// Upload a full frame into a texture of matching size
    fn upload(&mut self, handle: TextureHandle, frame: &DecodedFrame);

    /// Delete a texture
    fn release(&mut self, handle: TextureHandle);

    /// Largest supported texture edge
    fn max_texture_size(&self) -> u32 {
        16384
    }
}

/// A layer's texture: one handle plus its current dimensions
#[derive(Debug, Default)]
pub struct LayerTexture {
    handle: Option<TextureHandle>,
    width: u32,
    height: u32,
    uploads: u64,
}

impl LayerTexture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload a frame, (re)allocating the texture when its size changed.
    ///
    /// Frames larger than `max_size` or the sink's limit are skipped before
    /// any allocation. Returns whether the frame reached the texture.
    pub fn upload(&mut self, sink: &mut dyn TextureSink, frame: &DecodedFrame, max_size: u32) -> bool {
        if !frame.is_valid() {
            tracing::debug!("Skipping invalid frame {}x{}", frame.width, frame.height);
            return false;
        }

        let limit = max_size.min(sink.max_texture_size());
        if frame.width > limit || frame.height > limit {
            tracing::warn!(
                "Frame {}x{} exceeds maximum texture size {}, skipping",
                frame.width,
                frame.height,
                limit
            );
            return false;
        }

        if self.handle.is_none() || frame.width != self.width || frame.height != self.height {
            if let Some(old) = self.handle.take() {
                sink.release(old);
            }
            let Some(handle) = sink.allocate(frame.width, frame.height) else {
                tracing::warn!("Texture allocation failed for {}x{}", frame.width, frame.height);
                return false;
            };
            self.handle = Some(handle);
            self.width = frame.width;
            self.height = frame.height;
        }

        if let Some(handle) = self.handle {
            sink.upload(handle, frame);
            self.uploads += 1;
        }
        true
    }

    /// Release the texture through the sink
    pub fn release(&mut self, sink: &mut dyn TextureSink) {
        if let Some(handle) = self.take_handle() {
            sink.release(handle);
        }
    }

    /// Give up ownership of the handle (for deferred release)
    pub fn take_handle(&mut self) -> Option<TextureHandle> {
        self.width = 0;
        self.height = 0;
        self.uploads = 0;
        self.handle.take()
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    /// Whether at least one frame has been uploaded
    pub fn has_content(&self) -> bool {
        self.handle.is_some() && self.uploads > 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Texture sink that only tracks allocations.
///
/// Used on nodes that replicate state without a GPU, and in tests.
#[derive(Debug)]
pub struct HeadlessTextureSink {
    next_id: u64,
    textures: HashMap<TextureHandle, (u32, u32)>,
    uploads: u64,
    max_size: u32,
}

impl Default for HeadlessTextureSink {
    fn default() -> Self {
        Self::new(16384)
    }
}

impl HeadlessTextureSink {
    pub fn new(max_size: u32) -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            uploads: 0,
            max_size,
        }
    }

    /// Number of live textures
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Total uploads performed
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    pub fn size_of(&self, handle: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&handle).copied()
    }
}

impl TextureSink for HeadlessTextureSink {
    fn allocate(&mut self, width: u32, height: u32) -> Option<TextureHandle> {
        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle, (width, height));
        Some(handle)
    }

    fn upload(&mut self, handle: TextureHandle, frame: &DecodedFrame) {
        if self.textures.get(&handle) == Some(&(frame.width, frame.height)) {
            self.uploads += 1;
        } else {
            tracing::warn!("Upload to unknown or mismatched texture {:?}", handle);
        }
    }

    fn release(&mut self, handle: TextureHandle) {
        self.textures.remove(&handle);
    }

    fn max_texture_size(&self) -> u32 {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_allocates_once_per_size() {
        let mut sink = HeadlessTextureSink::default();
        let mut texture = LayerTexture::new();

        assert!(texture.upload(&mut sink, &DecodedFrame::solid(4, 4, [0; 4]), 16384));
        let first = texture.handle();
        assert!(texture.upload(&mut sink, &DecodedFrame::solid(4, 4, [0; 4]), 16384));
        assert_eq!(texture.handle(), first);
        assert_eq!(sink.live_textures(), 1);

        assert!(texture.upload(&mut sink, &DecodedFrame::solid(8, 2, [0; 4]), 16384));
        assert_ne!(texture.handle(), first);
        assert_eq!(sink.live_textures(), 1);
        assert_eq!(sink.upload_count(), 3);
    }

    #[test]
    fn test_oversized_frame_is_skipped_before_allocation() {
        let mut sink = HeadlessTextureSink::new(8);
        let mut texture = LayerTexture::new();

        assert!(!texture.upload(&mut sink, &DecodedFrame::solid(16, 4, [0; 4]), 16384));
        assert_eq!(sink.live_textures(), 0);
        assert!(!texture.has_content());
    }

    #[test]
    fn test_release_returns_handle_to_sink() {
        let mut sink = HeadlessTextureSink::default();
        let mut texture = LayerTexture::new();
        texture.upload(&mut sink, &DecodedFrame::solid(2, 2, [0; 4]), 16384);

        texture.release(&mut sink);
        assert_eq!(sink.live_textures(), 0);
        assert!(texture.handle().is_none());
    }
}
