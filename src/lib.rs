//! Immersive Cluster Library
//!
//! State replication and layer composition for multi-node projection
//! playback. One master process owns playback intent; render nodes decode a
//! per-frame sync stream and reproduce the same composition.
//!
//! The crate does not draw. A renderer supplies a [`video::TextureSink`] and
//! reads layer textures and parameters each frame.

pub mod compositor;
pub mod context;
pub mod loader;
pub mod project;
pub mod settings;
pub mod sync;
pub mod telemetry;
pub mod video;

pub use compositor::{Layer, LayerContainer, LayerKind, SlideContainer, VisibilityMatrix};
pub use context::{ClusterContext, ContextServices, Role};
pub use loader::{AsyncLoad, LoadError};
pub use project::{ProjectDocument, ProjectError};
pub use settings::{BackendKind, ClusterSettings};
pub use sync::{GlobalState, LoopbackTransport, SyncCoordinator, SyncError, SyncTransport};
pub use video::{AdaptiveSelector, DecodedFrame, PlaybackBackend, TextureSink};
