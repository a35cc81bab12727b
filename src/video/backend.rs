//! Playback backend protocol
//!
//! Every concrete decoder implementation sits behind [`PlaybackBackend`].
//! Moving a playing file from one backend to another goes through a single
//! record, [`PlaybackSnapshot`], so the hand-off schema lives in one place.

use crate::settings::BackendKind;
use crate::sync::{SyncError, SyncReader, SyncWriter, WireEnum};

use super::DecodedFrame;

/// What happens when playback reaches the end of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum LoopMode {
    /// Loop back to the start
    #[default]
    Loop,
    /// Play once, then apply the end action
    Once,
}

impl WireEnum for LoopMode {
    const FIELD: &'static str = "loop mode";

    fn to_wire(self) -> u8 {
        match self {
            LoopMode::Loop => 0,
            LoopMode::Once => 1,
        }
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(LoopMode::Loop),
            1 => Some(LoopMode::Once),
            _ => None,
        }
    }
}

/// End-of-file behaviour for [`LoopMode::Once`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum EndAction {
    /// Hold the last frame
    #[default]
    Hold,
    /// Rewind to the first frame and pause
    Rewind,
}

impl WireEnum for EndAction {
    const FIELD: &'static str = "end action";

    fn to_wire(self) -> u8 {
        match self {
            EndAction::Hold => 0,
            EndAction::Rewind => 1,
        }
    }

    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(EndAction::Hold),
            1 => Some(EndAction::Rewind),
            _ => None,
        }
    }
}

/// Notifications from a backend, delivered in the order the decoder emitted them
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// File header parsed, playback can begin
    FileLoaded {
        path: String,
        duration: f64,
        width: u32,
        height: u32,
    },
    /// Codec of the loaded file became known
    CodecKnown { path: String, codec: String },
    /// Playback reached the end (only in [`LoopMode::Once`])
    EndOfFile,
    /// Decoder failure; the backend stays not-ready for this file
    Error(String),
}

/// Backend errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("unsupported media: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("backend thread failed to start: {0}")]
    ThreadSpawn(String),
}

/// Complete observable playback state of a backend
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub loaded_file: Option<String>,
    pub position: f64,
    pub paused: bool,
    pub loop_mode: LoopMode,
    pub end_action: EndAction,
    pub volume: f32,
    pub speed: f64,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            loaded_file: None,
            position: 0.0,
            paused: true,
            loop_mode: LoopMode::Loop,
            end_action: EndAction::Hold,
            volume: 100.0,
            speed: 1.0,
        }
    }
}

impl PlaybackSnapshot {
    pub fn encode(&self, w: &mut SyncWriter) {
        w.put_str(self.loaded_file.as_deref().unwrap_or(""));
        w.put_f64(self.position);
        w.put_bool(self.paused);
        self.loop_mode.write(w);
        self.end_action.write(w);
        w.put_f32(self.volume);
        w.put_f64(self.speed);
    }

    pub fn decode(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        let file = r.string()?;
        Ok(Self {
            loaded_file: (!file.is_empty()).then_some(file),
            position: r.f64()?,
            paused: r.bool()?,
            loop_mode: LoopMode::read(r)?,
            end_action: EndAction::read(r)?,
            volume: r.f32()?,
            speed: r.f64()?,
        })
    }
}

/// A decoder implementation that can play one file at a time.
///
/// All methods are called from the render thread and must return without
/// blocking on the decoder; work happens on the backend's own thread.
pub trait PlaybackBackend: Send {
    /// Which backend slot this implementation fills
    fn kind(&self) -> BackendKind;

    /// Start the backend's worker. Called once per lifetime.
    fn initialize(&mut self) -> Result<(), BackendError>;

    /// Open a file. Resumes from a restored snapshot when it names the same file.
    fn load(&mut self, path: &str);

    fn loaded_file(&self) -> Option<&str>;

    /// Begin or resume playback
    fn start(&mut self);

    /// Pause playback without unloading
    fn stop(&mut self);

    fn is_paused(&self) -> bool;

    /// Current position in seconds
    fn position(&self) -> f64;

    fn seek(&mut self, position: f64);

    /// Duration in seconds, 0 when unknown or live
    fn duration(&self) -> f64;

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    fn loop_mode(&self) -> LoopMode;

    fn set_loop_mode(&mut self, mode: LoopMode);

    fn end_action(&self) -> EndAction;

    fn set_end_action(&mut self, action: EndAction);

    fn speed(&self) -> f64;

    fn set_speed(&mut self, speed: f64);

    /// Codec of the loaded file, once reported
    fn codec(&self) -> Option<&str>;

    /// Capture the full playback state
    fn snapshot(&self) -> PlaybackSnapshot;

    /// Adopt a snapshot taken from another backend
    fn restore(&mut self, snapshot: &PlaybackSnapshot);

    /// Latest decoded frame, if a new one is ready (non-blocking)
    fn take_frame(&mut self) -> Option<DecodedFrame>;

    /// Drain pending events (non-blocking)
    fn poll_events(&mut self) -> Vec<BackendEvent>;

    /// Whether a file is loaded and playable
    fn is_ready(&self) -> bool;

    /// Stop the worker and join it
    fn shutdown(&mut self);
}
