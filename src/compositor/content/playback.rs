//! Transport-driven content: video, audio and live streams

use std::sync::Arc;

use crate::context::ClusterContext;
use crate::settings::BackendKind;
use crate::sync::{SyncError, SyncReader, SyncWriter, WireEnum};
use crate::video::{AdaptiveSelector, BackendEvent, EndAction, EngineBackend, LoopMode, PlaybackBackend};

use super::{ContentUpdate, HasAudio};

/// Replicated transport settings as read from a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportFields {
    pub volume: f32,
    pub loop_mode: LoopMode,
    pub end_action: EndAction,
    pub speed: f64,
}

impl TransportFields {
    pub fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            volume: r.f32()?,
            loop_mode: LoopMode::read(r)?,
            end_action: EndAction::read(r)?,
            speed: r.f64()?,
        })
    }
}

/// A playback backend plus the replicated transport settings
pub struct PlaybackContent {
    backend: Box<dyn PlaybackBackend>,
    /// Live sources have no timeline: no seeking, position is not replicated
    live: bool,
    initialized: bool,
    configured_volume: f32,
    output_volume: f32,
    loop_mode: LoopMode,
    end_action: EndAction,
    speed: f64,
}

impl PlaybackContent {
    pub fn with_backend(backend: Box<dyn PlaybackBackend>, live: bool, volume: f32) -> Self {
        Self {
            backend,
            live,
            initialized: false,
            configured_volume: volume,
            output_volume: volume,
            loop_mode: LoopMode::Loop,
            end_action: EndAction::Hold,
            speed: 1.0,
        }
    }

    /// Video: adaptive selection between both backends
    pub fn video(ctx: &Arc<ClusterContext>, volume: f32) -> Self {
        let selector = AdaptiveSelector::new(
            Box::new(EngineBackend::new(BackendKind::General, ctx.decoder(BackendKind::General))),
            Box::new(EngineBackend::new(BackendKind::Accelerated, ctx.decoder(BackendKind::Accelerated))),
            ctx.policy().clone(),
        );
        Self::with_backend(Box::new(selector), false, volume)
    }

    pub fn audio(ctx: &Arc<ClusterContext>, volume: f32) -> Self {
        let backend = EngineBackend::new(BackendKind::General, ctx.decoder(BackendKind::General));
        Self::with_backend(Box::new(backend), false, volume)
    }

    pub fn stream(ctx: &Arc<ClusterContext>, volume: f32) -> Self {
        let backend = EngineBackend::new(BackendKind::General, ctx.decoder(BackendKind::General));
        Self::with_backend(Box::new(backend), true, volume)
    }

    /// Start the backend and open the source. A failing backend leaves the
    /// content permanently not ready.
    pub fn initialize(&mut self, source: &str) {
        if let Err(e) = self.backend.initialize() {
            tracing::error!("Playback backend failed to initialize: {}", e);
            return;
        }
        self.initialized = true;
        self.apply_settings();
        self.open(source);
    }

    pub fn open(&mut self, source: &str) {
        if self.initialized && !source.is_empty() {
            self.backend.load(source);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Push the replicated transport settings into the backend
    pub fn apply_settings(&mut self) {
        if !self.initialized {
            return;
        }
        self.backend.set_volume(self.output_volume);
        self.backend.set_loop_mode(self.loop_mode);
        self.backend.set_end_action(self.end_action);
        self.backend.set_speed(self.speed);
    }

    pub fn update(&mut self, rendering_requested: bool) -> ContentUpdate {
        let mut ended = false;
        for event in self.backend.poll_events() {
            match event {
                BackendEvent::FileLoaded { path, width, height, .. } => {
                    tracing::debug!("Playback ready: {} ({}x{})", path, width, height);
                }
                BackendEvent::EndOfFile => {
                    tracing::debug!("Playback reached end of file");
                    ended |= self.loop_mode == LoopMode::Once;
                }
                BackendEvent::CodecKnown { .. } | BackendEvent::Error(_) => {}
            }
        }
        ContentUpdate {
            frame: if rendering_requested { self.backend.take_frame() } else { None },
            ended,
        }
    }

    pub fn ready(&self) -> bool {
        self.initialized && self.backend.is_ready()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn backend(&self) -> &dyn PlaybackBackend {
        self.backend.as_ref()
    }

    pub fn start(&mut self) {
        if self.initialized {
            self.backend.start();
        }
    }

    pub fn stop(&mut self) {
        if self.initialized {
            self.backend.stop();
        }
    }

    pub fn position(&self) -> f64 {
        if self.live {
            0.0
        } else {
            self.backend.position()
        }
    }

    pub fn seek(&mut self, position: f64) {
        if self.initialized && !self.live {
            self.backend.seek(position);
        }
    }

    pub fn duration(&self) -> f64 {
        self.backend.duration()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        if self.initialized {
            self.backend.set_loop_mode(mode);
        }
    }

    pub fn end_action(&self) -> EndAction {
        self.end_action
    }

    pub fn set_end_action(&mut self, action: EndAction) {
        self.end_action = action;
        if self.initialized {
            self.backend.set_end_action(action);
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_finite() { speed.max(0.0) } else { 1.0 };
        if self.initialized {
            self.backend.set_speed(self.speed);
        }
    }

    pub fn encode_properties(&self, w: &mut SyncWriter) {
        w.put_f32(self.configured_volume);
        self.loop_mode.write(w);
        self.end_action.write(w);
        w.put_f64(self.speed);
    }

    /// Store received settings; the owning layer re-applies them
    pub fn apply_transport(&mut self, fields: TransportFields) {
        self.configured_volume = fields.volume;
        self.loop_mode = fields.loop_mode;
        self.end_action = fields.end_action;
        self.speed = fields.speed;
    }

    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}

impl HasAudio for PlaybackContent {
    fn configured_volume(&self) -> f32 {
        self.configured_volume
    }

    fn set_configured_volume(&mut self, volume: f32) {
        self.configured_volume = volume.clamp(0.0, 100.0);
    }

    fn output_volume(&self) -> f32 {
        self.output_volume
    }

    fn apply_output_volume(&mut self, volume: f32) {
        self.output_volume = volume.clamp(0.0, 100.0);
        if self.initialized {
            self.backend.set_volume(self.output_volume);
        }
    }
}
