//! Layer: one unit of visual or audio content
//!
//! A layer carries the composition parameters shared by every kind plus a
//! [`LayerContent`] holding the variant-specific state. Replicated fields are
//! split into three groups so the sync coordinator can bound per-frame
//! bandwidth:
//!
//! - core: identity and placement (hierarchy, lock, master-only, name, source, flip)
//! - always: transport state streamed every frame while playing
//! - properties: everything else, sent while the layer is dirty
//!
//! Setters on the master mark the layer's [`SyncTracker`]. On a node each
//! group is first read into a plain record ([`CoreFields`], [`AlwaysFields`],
//! [`PropertyFields`]) and applied only once the whole frame parsed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::Vec3;

use crate::context::ClusterContext;
use crate::sync::{SyncError, SyncReader, SyncTracker, SyncWriter, WireEnum};
use crate::video::{is_url, EndAction, LayerTexture, LoopMode, TextureHandle, TextureSink};

use super::content::{CaptureRegion, ContentFields, LayerContent, LayerKind};
use super::params::{GridMode, Hierarchy, Roi, StereoMode};
use super::plane::{Plane, PlaneParams};
use super::raster::TextStyle;
use super::watcher::normalize;

/// Identity and placement as read from a frame
#[derive(Debug, Clone, PartialEq)]
pub struct CoreFields {
    pub hierarchy: Hierarchy,
    pub locked: bool,
    pub master_only: bool,
    pub name: String,
    pub source: String,
    pub flip: bool,
}

impl CoreFields {
    pub fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            hierarchy: Hierarchy::read(r)?,
            locked: r.bool()?,
            master_only: r.bool()?,
            name: r.string()?,
            source: r.string()?,
            flip: r.bool()?,
        })
    }
}

/// Transport state as read from a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlwaysFields {
    pub paused: bool,
    pub position: f64,
    pub time_dirty: bool,
}

impl AlwaysFields {
    pub fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            paused: r.bool()?,
            position: r.f64()?,
            time_dirty: r.bool()?,
        })
    }
}

/// Composition parameters and variant fields as read from a frame
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFields {
    pub alpha: f32,
    pub grid: GridMode,
    pub stereo: StereoMode,
    pub rotation: Vec3,
    pub translation: Vec3,
    pub roi: Roi,
    pub plane: PlaneParams,
    pub keep_visible: u32,
    pub content: ContentFields,
}

impl PropertyFields {
    pub fn read(kind: LayerKind, r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            alpha: r.f32()?,
            grid: GridMode::read(r)?,
            stereo: StereoMode::read(r)?,
            rotation: r.vec3()?,
            translation: r.vec3()?,
            roi: Roi::decode(r)?,
            plane: PlaneParams::decode(r)?,
            keep_visible: r.u32()?,
            content: ContentFields::read(kind, r)?,
        })
    }
}

/// A compositing element replicated across the cluster
pub struct Layer {
    id: u32,
    kind: LayerKind,

    hierarchy: Hierarchy,
    locked: bool,
    master_only: bool,
    name: String,
    source: String,
    flip: bool,

    /// Opacity in [0, 1]
    alpha: f32,
    grid: GridMode,
    stereo: StereoMode,
    /// Euler angles in degrees
    rotation: Vec3,
    translation: Vec3,
    roi: Roi,
    plane: Plane,
    /// Number of following slides on which the layer stays visible
    keep_visible: u32,

    playing: bool,
    /// Set by a seek on the master, cleared once the change went out
    time_dirty: bool,
    /// Position to apply once the content is running (master: pending seek,
    /// node: last received master position)
    target_position: f64,

    texture: LayerTexture,
    width: u32,
    height: u32,
    initialized: bool,
    watched: Option<PathBuf>,
    tracker: SyncTracker,
    content: LayerContent,
    ctx: Arc<ClusterContext>,
}

impl Layer {
    /// Create a layer with a fresh id
    pub fn new(kind: LayerKind, ctx: &Arc<ClusterContext>) -> Self {
        let content = LayerContent::new(kind, ctx);
        Self::build(ctx.next_layer_id(), content, ctx)
    }

    /// Create a layer with an id chosen elsewhere (received over the wire or
    /// read from a project)
    pub fn with_id(id: u32, kind: LayerKind, ctx: &Arc<ClusterContext>) -> Self {
        ctx.reserve_layer_id(id);
        let content = LayerContent::new(kind, ctx);
        Self::build(id, content, ctx)
    }

    /// Create a layer around prepared content
    pub fn from_content(content: LayerContent, ctx: &Arc<ClusterContext>) -> Self {
        Self::build(ctx.next_layer_id(), content, ctx)
    }

    fn build(id: u32, content: LayerContent, ctx: &Arc<ClusterContext>) -> Self {
        let kind = content.kind();
        let settings = ctx.settings();
        Self {
            id,
            kind,
            hierarchy: Hierarchy::default(),
            locked: false,
            master_only: kind.is_audio_only(),
            name: format!("{} {}", kind, id),
            source: String::new(),
            flip: false,
            alpha: 1.0,
            grid: GridMode::default(),
            stereo: StereoMode::default(),
            rotation: Vec3::ZERO,
            translation: Vec3::ZERO,
            roi: Roi::FULL,
            plane: Plane::new(PlaneParams::default()),
            keep_visible: settings.keep_visible_default,
            playing: false,
            time_dirty: false,
            target_position: 0.0,
            texture: LayerTexture::new(),
            width: 0,
            height: 0,
            initialized: false,
            watched: None,
            tracker: SyncTracker::new_dirty(settings.sync_redundancy),
            content,
            ctx: Arc::clone(ctx),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn need_sync(&self) -> bool {
        self.tracker.need_sync()
    }

    // ---- lifecycle ----

    /// Start workers and open the source. Runs once per layer.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        tracing::debug!(layer = self.id, "Initializing {} layer '{}'", self.kind, self.source);

        self.content.initialize(&self.ctx, &self.source);
        self.watch_source();
        self.apply_replicated();

        let target = self.target_position;
        if let Some(playback) = self.content.playback_mut() {
            if target > 0.0 {
                playback.seek(target);
            }
            if self.playing {
                playback.start();
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Per-frame bookkeeping. Frames are uploaded only when rendering was
    /// requested; sizes above the configured maximum are skipped.
    pub fn update(&mut self, sink: &mut dyn TextureSink, rendering_requested: bool) {
        if self.initialized {
            let update = self.content.update(&self.ctx, &self.source, rendering_requested);
            if let Some(frame) = update.frame {
                if self.texture.upload(sink, &frame, self.ctx.settings().max_texture_size) {
                    self.width = frame.width;
                    self.height = frame.height;
                    self.plane.set_content(self.width, self.height, self.stereo);
                }
            }
            // Nodes follow the master's paused flag instead
            if update.ended && self.playing && self.ctx.is_master() {
                tracing::debug!(layer = self.id, "Playback ended");
                self.playing = false;
                self.tracker.mark();
            }
        }

        if !self.ctx.is_master() && self.tracker.need_sync() {
            self.apply_replicated();
            self.tracker.complete_pass();
        }
    }

    /// Whether the layer has something to present
    pub fn ready(&self) -> bool {
        match self.kind {
            LayerKind::Audio => self.content.ready(),
            _ => self.texture.has_content(),
        }
    }

    /// The source file changed on disk
    pub fn source_changed(&mut self) {
        if self.initialized {
            tracing::info!(layer = self.id, "Reloading changed source {}", self.source);
            self.content.reload(&self.ctx, &self.source);
        }
    }

    /// Whether this layer displays the given (normalized) file
    pub fn watches(&self, file: &Path) -> bool {
        self.watched.as_deref() == Some(file)
    }

    fn watch_source(&mut self) {
        if let Some(old) = self.watched.take() {
            self.ctx.unwatch_source(&old);
        }
        if !self.initialized || !self.kind.has_file_source() || self.source.is_empty() || is_url(&self.source) {
            return;
        }
        let path = normalize(Path::new(&self.source));
        self.ctx.watch_source(&path);
        self.watched = Some(path);
    }

    /// Push stored values into the content (volume, transport settings)
    fn apply_replicated(&mut self) {
        self.apply_volume();
        if let Some(playback) = self.content.playback_mut() {
            playback.apply_settings();
        }
    }

    fn apply_volume(&mut self) {
        let factor = self.alpha * self.ctx.volume_scale();
        if let Some(audio) = self.content.audio_mut() {
            let volume = audio.configured_volume() * factor;
            audio.apply_output_volume(volume);
        }
    }

    // ---- transport ----

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Begin playback. Only content with a transport plays.
    pub fn start(&mut self) {
        if self.content.playback().is_none() {
            return;
        }
        self.playing = true;
        if self.initialized {
            if let Some(playback) = self.content.playback_mut() {
                playback.start();
            }
        }
        self.tracker.mark();
    }

    pub fn stop(&mut self) {
        if self.content.playback().is_none() {
            return;
        }
        self.playing = false;
        if self.initialized {
            if let Some(playback) = self.content.playback_mut() {
                playback.stop();
            }
        }
        self.tracker.mark();
    }

    /// Current playback position in seconds (0 for live sources)
    pub fn position(&self) -> f64 {
        match self.content.playback() {
            Some(playback) if playback.is_live() => 0.0,
            Some(playback) if self.initialized => playback.position(),
            _ => self.target_position,
        }
    }

    pub fn seek(&mut self, position: f64) {
        let Some(playback) = self.content.playback_mut() else {
            return;
        };
        if playback.is_live() || !position.is_finite() {
            return;
        }
        let position = position.max(0.0);
        if self.initialized {
            playback.seek(position);
        }
        self.target_position = position;
        self.time_dirty = true;
        self.tracker.mark();
    }

    pub fn time_dirty(&self) -> bool {
        self.time_dirty
    }

    /// Record that one sync pass went out (master)
    pub fn complete_sync_pass(&mut self) {
        self.tracker.complete_pass();
        if !self.tracker.need_sync() {
            self.time_dirty = false;
        }
    }

    // ---- core fields ----

    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    pub fn set_hierarchy(&mut self, hierarchy: Hierarchy) {
        self.hierarchy = hierarchy;
        self.tracker.mark_core();
    }

    /// Locked layers survive `clear` and cannot be removed
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        self.tracker.mark_core();
    }

    /// Layers that exist on the master only never play on nodes
    pub fn is_master_only(&self) -> bool {
        self.master_only
    }

    pub fn set_master_only(&mut self, master_only: bool) {
        self.master_only = master_only;
        self.tracker.mark_core();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.tracker.mark_core();
    }

    /// File path, URL or network source name
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        if source == self.source {
            return;
        }
        self.source = source;
        self.open_source();
        self.tracker.mark_core();
    }

    fn open_source(&mut self) {
        if self.initialized {
            self.content.open(&self.ctx, &self.source);
            self.watch_source();
        }
    }

    pub fn flip(&self) -> bool {
        self.flip
    }

    pub fn set_flip(&mut self, flip: bool) {
        self.flip = flip;
        self.tracker.mark_core();
    }

    // ---- properties ----

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Set opacity. On the master a layer starts playing when it becomes
    /// visible and stops when fully hidden. Audio output follows opacity.
    pub fn set_alpha(&mut self, alpha: f32) {
        let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 };
        let previous = self.alpha;
        self.alpha = alpha;

        if self.ctx.is_master() {
            if alpha <= 0.0 && self.playing {
                self.stop();
            } else if previous <= 0.0 && alpha > 0.0 && !self.playing {
                self.start();
            }
        }
        self.apply_volume();
        self.tracker.mark();
    }

    pub fn grid(&self) -> GridMode {
        self.grid
    }

    pub fn set_grid(&mut self, grid: GridMode) {
        self.grid = grid;
        self.tracker.mark();
    }

    pub fn stereo(&self) -> StereoMode {
        self.stereo
    }

    pub fn set_stereo(&mut self, stereo: StereoMode) {
        self.stereo = stereo;
        self.plane.set_content(self.width, self.height, stereo);
        self.tracker.mark();
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.tracker.mark();
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.tracker.mark();
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn set_roi(&mut self, roi: Roi) {
        self.roi = Roi::new(roi.x, roi.y, roi.width, roi.height);
        self.tracker.mark();
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    /// Plane with its lazily built mesh
    pub fn plane_mut(&mut self) -> &mut Plane {
        &mut self.plane
    }

    pub fn set_plane_params(&mut self, params: PlaneParams) {
        if self.plane.set_params(params) {
            self.tracker.mark();
        }
    }

    pub fn keep_visible(&self) -> u32 {
        self.keep_visible
    }

    pub fn set_keep_visible(&mut self, slides: u32) {
        self.keep_visible = slides;
        self.tracker.mark();
    }

    // ---- variant properties ----

    /// Configured volume (0-100), `None` for layers without audio
    pub fn volume(&self) -> Option<f32> {
        self.content.audio().map(|a| a.configured_volume())
    }

    pub fn output_volume(&self) -> Option<f32> {
        self.content.audio().map(|a| a.output_volume())
    }

    pub fn set_volume(&mut self, volume: f32) {
        let Some(audio) = self.content.audio_mut() else {
            return;
        };
        audio.set_configured_volume(volume);
        self.apply_volume();
        self.tracker.mark();
    }

    /// Re-apply output volume after the global volume scale changed
    pub fn refresh_volume(&mut self) {
        self.apply_volume();
    }

    pub fn page(&self) -> Option<u32> {
        self.content.pages().map(|p| p.page())
    }

    pub fn page_count(&self) -> Option<u32> {
        self.content.pages().map(|p| p.page_count())
    }

    pub fn set_page(&mut self, page: u32) {
        if let Some(pages) = self.content.pages_mut() {
            pages.set_page(page);
            self.tracker.mark();
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.content.text().map(|t| t.text())
    }

    pub fn set_text(&mut self, text: &str) {
        if let Some(content) = self.content.text_mut() {
            content.set_text(text);
            self.tracker.mark();
        }
    }

    pub fn text_style(&self) -> Option<&TextStyle> {
        self.content.text().map(|t| t.style())
    }

    pub fn set_text_style(&mut self, style: TextStyle) {
        if let Some(content) = self.content.text_mut() {
            content.set_style(style);
            self.tracker.mark();
        }
    }

    pub fn loop_mode(&self) -> Option<LoopMode> {
        self.content.playback().map(|p| p.loop_mode())
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        if let Some(playback) = self.content.playback_mut() {
            playback.set_loop_mode(mode);
            self.tracker.mark();
        }
    }

    pub fn end_action(&self) -> Option<EndAction> {
        self.content.playback().map(|p| p.end_action())
    }

    pub fn set_end_action(&mut self, action: EndAction) {
        if let Some(playback) = self.content.playback_mut() {
            playback.set_end_action(action);
            self.tracker.mark();
        }
    }

    pub fn speed(&self) -> Option<f64> {
        self.content.playback().map(|p| p.speed())
    }

    pub fn set_speed(&mut self, speed: f64) {
        if let Some(playback) = self.content.playback_mut() {
            playback.set_speed(speed);
            self.tracker.mark();
        }
    }

    pub fn capture_region(&self) -> Option<(u32, CaptureRegion)> {
        match &self.content {
            LayerContent::ScreenCapture(c) => Some((c.display(), c.region())),
            _ => None,
        }
    }

    pub fn set_capture_region(&mut self, display: u32, region: CaptureRegion) {
        if let LayerContent::ScreenCapture(c) = &mut self.content {
            c.set_display(display);
            c.set_region(region);
            self.tracker.mark();
        }
    }

    // ---- render state ----

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture.handle()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    // ---- wire groups ----

    pub fn encode_core(&self, w: &mut SyncWriter) {
        self.hierarchy.write(w);
        w.put_bool(self.locked);
        w.put_bool(self.master_only);
        w.put_str(&self.name);
        w.put_str(&self.source);
        w.put_bool(self.flip);
    }

    /// Apply core fields. The layer re-applies its state over the next
    /// passes in case an earlier frame was missed.
    pub fn apply_core(&mut self, fields: CoreFields) {
        self.hierarchy = fields.hierarchy;
        self.locked = fields.locked;
        self.master_only = fields.master_only;
        self.name = fields.name;
        self.flip = fields.flip;

        if fields.source != self.source {
            self.source = fields.source;
            self.open_source();
        }
        self.tracker.mark();
    }

    pub fn encode_always(&self, w: &mut SyncWriter) {
        w.put_bool(!self.playing);
        w.put_f64(self.position());
        w.put_bool(self.time_dirty);
    }

    pub fn decode_always(&mut self, r: &mut SyncReader<'_>) -> Result<(), SyncError> {
        let fields = AlwaysFields::read(r)?;
        self.apply_always(fields);
        Ok(())
    }

    /// Follow the master's transport. A seek is issued when the master
    /// seeked, or when drift exceeds the configured threshold.
    pub fn apply_always(&mut self, fields: AlwaysFields) {
        let AlwaysFields {
            paused,
            position,
            time_dirty,
        } = fields;

        let seeked = time_dirty && !self.time_dirty;
        self.time_dirty = time_dirty;
        self.target_position = position;

        let playing = !paused;
        if playing != self.playing {
            self.playing = playing;
            if self.initialized {
                if let Some(playback) = self.content.playback_mut() {
                    if playing {
                        playback.start();
                    } else {
                        playback.stop();
                    }
                }
            }
        }

        if !self.initialized {
            return;
        }
        let threshold = self.ctx.settings().time_sync_threshold;
        if let Some(playback) = self.content.playback_mut() {
            if playback.is_live() {
                return;
            }
            let drift = (playback.position() - position).abs();
            if seeked || (playback.ready() && drift > threshold) {
                tracing::trace!(layer = self.id, drift, "Seeking to master position {:.3}", position);
                playback.seek(position);
            }
        }
    }

    pub fn encode_properties(&self, w: &mut SyncWriter) {
        w.put_f32(self.alpha);
        self.grid.write(w);
        self.stereo.write(w);
        w.put_vec3(self.rotation);
        w.put_vec3(self.translation);
        self.roi.encode(w);
        self.plane.params().encode(w);
        w.put_u32(self.keep_visible);
        self.content.encode_properties(w);
    }

    pub fn apply_properties(&mut self, fields: PropertyFields) {
        self.alpha = fields.alpha;
        self.grid = fields.grid;
        self.stereo = fields.stereo;
        self.rotation = fields.rotation;
        self.translation = fields.translation;
        self.roi = fields.roi;
        self.keep_visible = fields.keep_visible;
        self.content.apply_properties(fields.content);

        self.plane.set_params(fields.plane);
        self.plane.set_content(self.width, self.height, self.stereo);
        self.apply_replicated();
    }

    /// All three groups, for copying a layer's complete state
    pub fn encode_full(&self, w: &mut SyncWriter) {
        self.encode_core(w);
        self.encode_always(w);
        self.encode_properties(w);
    }

    /// Nothing is applied unless all three groups parse
    pub fn decode_full(&mut self, r: &mut SyncReader<'_>) -> Result<(), SyncError> {
        let core = CoreFields::read(r)?;
        let always = AlwaysFields::read(r)?;
        let properties = PropertyFields::read(self.kind, r)?;
        self.apply_core(core);
        self.apply_always(always);
        self.apply_properties(properties);
        Ok(())
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        self.content.shutdown();
        if let Some(handle) = self.texture.take_handle() {
            self.ctx.queue_texture_release(handle);
        }
        if let Some(path) = self.watched.take() {
            self.ctx.unwatch_source(&path);
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("alpha", &self.alpha)
            .field("playing", &self.playing)
            .finish_non_exhaustive()
    }
}
