//! Rendered text content

use std::sync::Arc;

use crate::compositor::raster::TextStyle;
use crate::context::ClusterContext;
use crate::loader::{AsyncLoad, LoadPoll};
use crate::video::DecodedFrame;

use super::HasText;

pub struct TextContent {
    text: String,
    style: TextStyle,
    loader: AsyncLoad<DecodedFrame>,
    needs_render: bool,
    loaded: bool,
}

impl TextContent {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            style: TextStyle::default(),
            loader: AsyncLoad::new("text"),
            needs_render: false,
            loaded: false,
        }
    }

    /// Schedule a re-render with the current text and style
    pub fn invalidate(&mut self) {
        self.needs_render = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn update(&mut self, ctx: &Arc<ClusterContext>, rendering_requested: bool) -> Option<DecodedFrame> {
        if self.needs_render {
            self.needs_render = false;
            let rasterizer = ctx.rasterizer();
            let max_size = ctx.settings().max_texture_size;
            let text = self.text.clone();
            let style = self.style.clone();
            self.loader
                .request(move || rasterizer.rasterize_text(&text, &style, max_size));
        }

        if !rendering_requested {
            return None;
        }
        let mut rendered = None;
        if self.loader.poll(|frame| rendered = Some(frame)) == LoadPoll::Uploaded {
            self.loaded = true;
        }
        rendered
    }
}

impl Default for TextContent {
    fn default() -> Self {
        Self::new()
    }
}

impl HasText for TextContent {
    fn text(&self) -> &str {
        &self.text
    }

    fn set_text(&mut self, text: &str) {
        if text != self.text {
            self.text = text.to_string();
            self.needs_render = true;
        }
    }

    fn style(&self) -> &TextStyle {
        &self.style
    }

    fn set_style(&mut self, style: TextStyle) {
        if style != self.style {
            self.style = style;
            self.needs_render = true;
        }
    }
}
