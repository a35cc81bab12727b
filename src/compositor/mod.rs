//! Compositor module
//!
//! The composition hierarchy that the sync coordinator replicates and the
//! external renderer draws.
//!
//! # Architecture
//!
//! - `Layer`: one unit of content with its composition parameters
//! - `LayerContent`: closed sum over the layer kinds, with capability traits
//!   (`HasAudio`, `HasPages`, `HasText`) for optional behaviour
//! - `LayerContainer`: ordered layers (draw and sync order)
//! - `SlideContainer`: the master container plus slides, selection and crossfade
//! - `VisibilityMatrix`: per (layer, slide) local index driving preload and fades

pub mod container;
pub mod content;
pub mod layer;
pub mod params;
pub mod plane;
pub mod raster;
pub mod slides;
pub mod visibility;
pub mod watcher;

pub use container::{ContainerError, LayerContainer};
pub use content::{
    CaptureRegion, HasAudio, HasPages, HasText, LayerContent, LayerKind, SourceFeed,
};
pub use layer::{AlwaysFields, CoreFields, Layer, PropertyFields};
pub use params::{GridMode, Hierarchy, Roi, StereoMode};
pub use plane::{Plane, PlaneMesh, PlaneParams, PlaneVertex};
pub use raster::{ContentRasterizer, TextAlign, TextStyle, UnavailableRasterizer};
pub use slides::{LayerLocation, SlideContainer, SlideState, StructureRecord, MASTER_SLIDE};
pub use visibility::{Visibility, VisibilityMatrix};
pub use watcher::SourceWatcher;
