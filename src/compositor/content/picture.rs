//! Still image content

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::ClusterContext;
use crate::loader::{AsyncLoad, LoadError, LoadPoll};
use crate::video::DecodedFrame;

/// Decode an image file to RGBA, refusing oversized images before decoding
pub fn load_image(path: &Path, max_size: u32) -> Result<DecodedFrame, LoadError> {
    let (width, height) = image::image_dimensions(path)?;
    if width > max_size || height > max_size {
        return Err(LoadError::TooLarge {
            width,
            height,
            max: max_size,
        });
    }

    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedFrame::still(rgba.into_raw(), width, height))
}

/// Image decoded on a background worker
pub struct ImageContent {
    loader: AsyncLoad<DecodedFrame>,
    /// Decoded while hidden, uploaded once rendering is requested
    pending: Option<DecodedFrame>,
    loaded: bool,
    failed: bool,
}

impl ImageContent {
    pub fn new() -> Self {
        Self {
            loader: AsyncLoad::new("image"),
            pending: None,
            loaded: false,
            failed: false,
        }
    }

    pub fn open(&mut self, ctx: &Arc<ClusterContext>, source: &str) {
        if source.is_empty() {
            return;
        }
        let path = PathBuf::from(source);
        let max_size = ctx.settings().max_texture_size;
        self.failed = false;
        self.loader.request(move || load_image(&path, max_size));
    }

    /// Advance the load handshake every frame; the decoded image is only
    /// handed out when rendering is requested.
    pub fn update(&mut self, rendering_requested: bool) -> Option<DecodedFrame> {
        let pending = &mut self.pending;
        match self.loader.poll(|frame| *pending = Some(frame)) {
            LoadPoll::Uploaded => self.loaded = true,
            LoadPoll::Failed => self.failed = true,
            LoadPoll::Idle | LoadPoll::Pending => {}
        }
        if rendering_requested {
            self.pending.take()
        } else {
            None
        }
    }

    /// Whether a load worker is running or waiting to be joined
    pub fn is_loading(&self) -> bool {
        self.loader.is_busy()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }
}

impl Default for ImageContent {
    fn default() -> Self {
        Self::new()
    }
}
