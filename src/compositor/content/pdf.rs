//! Document page content

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::ClusterContext;
use crate::loader::{AsyncLoad, LoadPoll};
use crate::video::DecodedFrame;

use super::HasPages;

/// One page of a document, rasterized on a background worker
pub struct PdfContent {
    page: u32,
    page_count: u32,
    loader: AsyncLoad<(u32, DecodedFrame)>,
    pending: Option<DecodedFrame>,
    needs_load: bool,
    loaded: bool,
}

impl PdfContent {
    pub fn new() -> Self {
        Self {
            page: 0,
            page_count: 0,
            loader: AsyncLoad::new("pdf"),
            pending: None,
            needs_load: false,
            loaded: false,
        }
    }

    /// Schedule (re)rasterization of the current page
    pub fn open(&mut self) {
        self.needs_load = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn update(&mut self, ctx: &Arc<ClusterContext>, source: &str, rendering_requested: bool) -> Option<DecodedFrame> {
        if self.needs_load && !source.is_empty() {
            self.needs_load = false;
            let ctx = Arc::clone(ctx);
            let path = PathBuf::from(source);
            let page = self.page;
            self.loader.request(move || {
                let rasterizer = ctx.rasterizer();
                let count = ctx.documents().page_count(&path, rasterizer.as_ref())?;
                let page = page.min(count.saturating_sub(1));
                let frame = rasterizer.rasterize_page(&path, page, ctx.settings().max_texture_size)?;
                Ok((count, frame))
            });
        }

        let mut rasterized = None;
        if self.loader.poll(|page| rasterized = Some(page)) == LoadPoll::Uploaded {
            self.loaded = true;
        }
        if let Some((count, frame)) = rasterized {
            self.page_count = count;
            self.pending = Some(frame);
        }
        if rendering_requested {
            self.pending.take()
        } else {
            None
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_busy()
    }
}

impl Default for PdfContent {
    fn default() -> Self {
        Self::new()
    }
}

impl HasPages for PdfContent {
    fn page(&self) -> u32 {
        self.page
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn set_page(&mut self, page: u32) {
        let page = if self.page_count > 0 {
            page.min(self.page_count - 1)
        } else {
            page
        };
        if page != self.page {
            self.page = page;
            self.needs_load = true;
        }
    }
}
