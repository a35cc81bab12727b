//! Media playback backends and texture plumbing
//!
//! Decoding runs on one background thread per backend. Decoded frames are
//! handed to the render thread as RGBA buffers and uploaded through the
//! renderer's [`TextureSink`].

mod backend;
mod decoder;
mod engine;
mod frame;
pub mod probe;
mod selector;
mod texture;

pub use backend::{BackendError, BackendEvent, EndAction, LoopMode, PlaybackBackend, PlaybackSnapshot};
pub use decoder::{is_url, DecoderFactory, FrameDecoder, MediaInfo, ProbeDecoderFactory};
pub use engine::EngineBackend;
pub use frame::DecodedFrame;
pub use selector::{AdaptiveSelector, SelectionPolicy};
pub use texture::{HeadlessTextureSink, LayerTexture, TextureHandle, TextureSink};
