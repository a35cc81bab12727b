//! Layer content variants
//!
//! [`LayerContent`] is a closed sum over every kind of layer. Optional
//! behaviour is exposed through capability traits ([`HasAudio`],
//! [`HasPages`], [`HasText`]) so callers never switch on the kind to find
//! out whether a layer has a volume or pages.

mod pdf;
mod picture;
mod playback;
mod source;
mod text;

pub use pdf::PdfContent;
pub use picture::{load_image, ImageContent};
pub use playback::{PlaybackContent, TransportFields};
pub use source::{AudioRing, CaptureContent, CaptureRegion, SourceContent, SourceFeed};
pub use text::TextContent;

use std::path::Path;
use std::sync::Arc;

use crate::context::ClusterContext;
use crate::sync::{SyncError, SyncReader, SyncWriter, WireEnum};
use crate::video::DecodedFrame;

use super::raster::TextStyle;

/// Kind of a layer, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LayerKind {
    Image,
    Video,
    Audio,
    Pdf,
    Text,
    Stream,
    NetworkSource,
    ScreenCapture,
}

impl LayerKind {
    pub const ALL: [LayerKind; 8] = [
        LayerKind::Image,
        LayerKind::Video,
        LayerKind::Audio,
        LayerKind::Pdf,
        LayerKind::Text,
        LayerKind::Stream,
        LayerKind::NetworkSource,
        LayerKind::ScreenCapture,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Image => "image",
            LayerKind::Video => "video",
            LayerKind::Audio => "audio",
            LayerKind::Pdf => "pdf",
            LayerKind::Text => "text",
            LayerKind::Stream => "stream",
            LayerKind::NetworkSource => "network source",
            LayerKind::ScreenCapture => "screen capture",
        }
    }

    /// Kinds that only produce sound
    pub fn is_audio_only(&self) -> bool {
        matches!(self, LayerKind::Audio)
    }

    /// Kinds whose source is a file on disk
    pub fn has_file_source(&self) -> bool {
        matches!(
            self,
            LayerKind::Image | LayerKind::Video | LayerKind::Audio | LayerKind::Pdf
        )
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl WireEnum for LayerKind {
    const FIELD: &'static str = "layer kind";

    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(value: u8) -> Option<Self> {
        LayerKind::ALL.get(value as usize).copied()
    }
}

/// Layers with an audio output
pub trait HasAudio {
    /// User-set volume, 0-100
    fn configured_volume(&self) -> f32;

    fn set_configured_volume(&mut self, volume: f32);

    /// Volume actually sent to the output
    fn output_volume(&self) -> f32;

    fn apply_output_volume(&mut self, volume: f32);
}

/// Layers that show one page of a document
pub trait HasPages {
    /// Current page, 0-based
    fn page(&self) -> u32;

    /// Number of pages, 0 until the document was opened
    fn page_count(&self) -> u32;

    fn set_page(&mut self, page: u32);
}

/// Layers that render text
pub trait HasText {
    fn text(&self) -> &str;

    fn set_text(&mut self, text: &str);

    fn style(&self) -> &TextStyle;

    fn set_style(&mut self, style: TextStyle);
}

/// What one content update produced
#[derive(Debug, Default)]
pub struct ContentUpdate {
    /// Frame to upload, only when rendering was requested
    pub frame: Option<DecodedFrame>,
    /// Playback stopped at the end of a non-looping file
    pub ended: bool,
}

impl From<Option<DecodedFrame>> for ContentUpdate {
    fn from(frame: Option<DecodedFrame>) -> Self {
        Self { frame, ended: false }
    }
}

/// Variant-specific replicated fields, read from a frame but not yet applied
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFields {
    None,
    Transport(TransportFields),
    Page(u32),
    Text { text: String, style: TextStyle },
    Volume(f32),
    Capture { display: u32, region: CaptureRegion },
}

impl ContentFields {
    /// Read the fields `LayerContent::encode_properties` writes for `kind`
    pub fn read(kind: LayerKind, r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(match kind {
            LayerKind::Image => ContentFields::None,
            LayerKind::Video | LayerKind::Audio | LayerKind::Stream => ContentFields::Transport(TransportFields::read(r)?),
            LayerKind::Pdf => ContentFields::Page(r.u32()?),
            LayerKind::Text => ContentFields::Text {
                text: r.string()?,
                style: TextStyle::decode(r)?,
            },
            LayerKind::NetworkSource => ContentFields::Volume(r.f32()?),
            LayerKind::ScreenCapture => {
                let (display, region) = CaptureContent::read_properties(r)?;
                ContentFields::Capture { display, region }
            }
        })
    }
}

/// Variant-specific state and workers of a layer
pub enum LayerContent {
    Image(ImageContent),
    Video(PlaybackContent),
    Audio(PlaybackContent),
    Pdf(PdfContent),
    Text(TextContent),
    Stream(PlaybackContent),
    NetworkSource(SourceContent),
    ScreenCapture(CaptureContent),
}

impl LayerContent {
    /// Default content for a kind. Nothing is started until `initialize`.
    pub fn new(kind: LayerKind, ctx: &Arc<ClusterContext>) -> Self {
        let volume = ctx.settings().default_volume;
        match kind {
            LayerKind::Image => LayerContent::Image(ImageContent::new()),
            LayerKind::Video => LayerContent::Video(PlaybackContent::video(ctx, volume)),
            LayerKind::Audio => LayerContent::Audio(PlaybackContent::audio(ctx, volume)),
            LayerKind::Pdf => LayerContent::Pdf(PdfContent::new()),
            LayerKind::Text => LayerContent::Text(TextContent::new()),
            LayerKind::Stream => LayerContent::Stream(PlaybackContent::stream(ctx, volume)),
            LayerKind::NetworkSource => LayerContent::NetworkSource(SourceContent::new(volume)),
            LayerKind::ScreenCapture => LayerContent::ScreenCapture(CaptureContent::new()),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerContent::Image(_) => LayerKind::Image,
            LayerContent::Video(_) => LayerKind::Video,
            LayerContent::Audio(_) => LayerKind::Audio,
            LayerContent::Pdf(_) => LayerKind::Pdf,
            LayerContent::Text(_) => LayerKind::Text,
            LayerContent::Stream(_) => LayerKind::Stream,
            LayerContent::NetworkSource(_) => LayerKind::NetworkSource,
            LayerContent::ScreenCapture(_) => LayerKind::ScreenCapture,
        }
    }

    /// Start workers and open the source
    pub fn initialize(&mut self, ctx: &Arc<ClusterContext>, source: &str) {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.initialize(source),
            other => other.open(ctx, source),
        }
    }

    /// Open a (new) source on initialized content
    pub fn open(&mut self, ctx: &Arc<ClusterContext>, source: &str) {
        match self {
            LayerContent::Image(c) => c.open(ctx, source),
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.open(source),
            LayerContent::Pdf(c) => c.open(),
            LayerContent::Text(c) => c.invalidate(),
            LayerContent::NetworkSource(c) => c.feed().set_source_name(source),
            LayerContent::ScreenCapture(_) => {}
        }
    }

    /// Per-frame bookkeeping; returns a frame to upload when one is ready
    /// and rendering was requested.
    pub fn update(&mut self, ctx: &Arc<ClusterContext>, source: &str, rendering_requested: bool) -> ContentUpdate {
        match self {
            LayerContent::Image(c) => c.update(rendering_requested).into(),
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.update(rendering_requested),
            LayerContent::Pdf(c) => c.update(ctx, source, rendering_requested).into(),
            LayerContent::Text(c) => c.update(ctx, rendering_requested).into(),
            LayerContent::NetworkSource(c) => rendering_requested.then(|| c.feed().take_frame()).flatten().into(),
            LayerContent::ScreenCapture(c) => rendering_requested.then(|| c.feed().take_frame()).flatten().into(),
        }
    }

    /// Whether the content is able to present
    pub fn ready(&self) -> bool {
        match self {
            LayerContent::Image(c) => c.is_loaded(),
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.ready(),
            LayerContent::Pdf(c) => c.is_loaded(),
            LayerContent::Text(c) => c.is_loaded(),
            LayerContent::NetworkSource(c) => c.feed().has_frame(),
            LayerContent::ScreenCapture(c) => c.feed().has_frame(),
        }
    }

    /// Content with a transport (play/pause/seek)
    pub fn playback(&self) -> Option<&PlaybackContent> {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => Some(c),
            _ => None,
        }
    }

    pub fn playback_mut(&mut self) -> Option<&mut PlaybackContent> {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => Some(c),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&dyn HasAudio> {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => Some(c),
            LayerContent::NetworkSource(c) => Some(c),
            _ => None,
        }
    }

    pub fn audio_mut(&mut self) -> Option<&mut dyn HasAudio> {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => Some(c),
            LayerContent::NetworkSource(c) => Some(c),
            _ => None,
        }
    }

    pub fn pages(&self) -> Option<&dyn HasPages> {
        match self {
            LayerContent::Pdf(c) => Some(c),
            _ => None,
        }
    }

    pub fn pages_mut(&mut self) -> Option<&mut dyn HasPages> {
        match self {
            LayerContent::Pdf(c) => Some(c),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&dyn HasText> {
        match self {
            LayerContent::Text(c) => Some(c),
            _ => None,
        }
    }

    pub fn text_mut(&mut self) -> Option<&mut dyn HasText> {
        match self {
            LayerContent::Text(c) => Some(c),
            _ => None,
        }
    }

    /// Re-read the source after it changed on disk
    pub fn reload(&mut self, ctx: &Arc<ClusterContext>, source: &str) {
        match self {
            LayerContent::Image(_) => self.open(ctx, source),
            LayerContent::Pdf(_) => {
                // The page count may have changed with the file
                ctx.documents().invalidate(Path::new(source));
                self.open(ctx, source);
            }
            _ => {}
        }
    }

    /// Variant-specific replicated fields
    pub fn encode_properties(&self, w: &mut SyncWriter) {
        match self {
            LayerContent::Image(_) => {}
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.encode_properties(w),
            LayerContent::Pdf(c) => w.put_u32(c.page()),
            LayerContent::Text(c) => {
                w.put_str(c.text());
                c.style().encode(w);
            }
            LayerContent::NetworkSource(c) => w.put_f32(c.configured_volume()),
            LayerContent::ScreenCapture(c) => c.encode_properties(w),
        }
    }

    /// Apply fields read by [`ContentFields::read`]; fields for another kind are ignored
    pub fn apply_properties(&mut self, fields: ContentFields) {
        match (self, fields) {
            (LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c), ContentFields::Transport(t)) => {
                c.apply_transport(t)
            }
            (LayerContent::Pdf(c), ContentFields::Page(page)) => c.set_page(page),
            (LayerContent::Text(c), ContentFields::Text { text, style }) => {
                c.set_text(&text);
                c.set_style(style);
            }
            (LayerContent::NetworkSource(c), ContentFields::Volume(volume)) => c.set_configured_volume(volume),
            (LayerContent::ScreenCapture(c), ContentFields::Capture { display, region }) => {
                c.set_display(display);
                c.set_region(region);
            }
            (content, fields) => {
                if fields != ContentFields::None {
                    tracing::warn!("Ignoring {:?} for {} content", fields, content.kind());
                }
            }
        }
    }

    /// Stop workers; joins backend threads
    pub fn shutdown(&mut self) {
        match self {
            LayerContent::Video(c) | LayerContent::Audio(c) | LayerContent::Stream(c) => c.shutdown(),
            LayerContent::NetworkSource(c) => c.feed().disconnect(),
            LayerContent::ScreenCapture(c) => c.feed().disconnect(),
            LayerContent::Image(_) | LayerContent::Pdf(_) | LayerContent::Text(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::ContentRasterizer;
    use crate::context::{ContextServices, Role};
    use crate::loader::LoadError;
    use crate::settings::ClusterSettings;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Documents whose page count can change between opens
    #[derive(Default)]
    struct Deck(AtomicU32);

    impl ContentRasterizer for Deck {
        fn page_count(&self, _document: &Path) -> Result<u32, LoadError> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        fn rasterize_page(&self, _document: &Path, _page: u32, _max_size: u32) -> Result<DecodedFrame, LoadError> {
            Ok(DecodedFrame::solid(8, 6, [255, 255, 255, 255]))
        }
    }

    fn load_pages(content: &mut LayerContent, ctx: &Arc<ClusterContext>, source: &str) -> Option<u32> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let LayerContent::Pdf(pdf) = content else {
            return None;
        };
        pdf.update(ctx, source, true);
        while pdf.is_loading() && Instant::now() < deadline {
            pdf.update(ctx, source, true);
            std::thread::sleep(Duration::from_millis(1));
        }
        content.pages().map(|p| p.page_count())
    }

    #[test]
    fn test_pdf_reload_picks_up_new_page_count() {
        let deck = Arc::new(Deck::default());
        deck.0.store(5, Ordering::SeqCst);
        let services = ContextServices {
            rasterizer: Arc::clone(&deck) as Arc<dyn ContentRasterizer>,
            ..ContextServices::default()
        };
        let ctx = ClusterContext::new(Role::Node, ClusterSettings::default(), services);
        let source = "/show/slides/deck.pdf";

        let mut content = LayerContent::new(LayerKind::Pdf, &ctx);
        content.initialize(&ctx, source);
        assert_eq!(load_pages(&mut content, &ctx, source), Some(5));
        assert_eq!(ctx.documents().cached(Path::new(source)), Some(5));

        deck.0.store(9, Ordering::SeqCst);
        content.reload(&ctx, source);
        assert_eq!(ctx.documents().cached(Path::new(source)), None);
        assert_eq!(load_pages(&mut content, &ctx, source), Some(9));
    }

    #[test]
    fn test_hidden_pdf_finishes_rasterizing() {
        let deck = Arc::new(Deck::default());
        deck.0.store(3, Ordering::SeqCst);
        let services = ContextServices {
            rasterizer: deck,
            ..ContextServices::default()
        };
        let ctx = ClusterContext::new(Role::Node, ClusterSettings::default(), services);
        let source = "/show/slides/hidden.pdf";
        let mut pdf = PdfContent::new();
        pdf.open();

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(pdf.update(&ctx, source, false).is_none());
        while pdf.is_loading() && Instant::now() < deadline {
            assert!(pdf.update(&ctx, source, false).is_none());
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!pdf.is_loading());
        assert_eq!(pdf.page_count(), 3);

        let frame = pdf.update(&ctx, source, true).unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
    }

    #[test]
    fn test_fields_for_another_kind_are_ignored() {
        let ctx = ClusterContext::new(Role::Node, ClusterSettings::default(), ContextServices::default());
        let mut content = LayerContent::new(LayerKind::Pdf, &ctx);
        content.apply_properties(ContentFields::Volume(10.0));
        assert_eq!(content.pages().map(|p| p.page()), Some(0));
        content.apply_properties(ContentFields::Page(4));
        assert_eq!(content.pages().map(|p| p.page()), Some(4));
    }
}
