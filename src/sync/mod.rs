//! Cluster state replication
//!
//! The master serializes dirty state into one frame per rendered frame and
//! broadcasts it; every node decodes it in the same order. See
//! [`coordinator`] for the frame layout.

pub mod codec;
pub mod coordinator;
pub mod global;
pub mod tracker;
pub mod transport;

pub use codec::{SyncError, SyncReader, SyncWriter, WireEnum};
pub use coordinator::{SyncCoordinator, SyncStats};
pub use global::{ColorGrading, DomeGeometry, GlobalState, PlaneGeometry};
pub use tracker::SyncTracker;
pub use transport::{LoopbackTransport, SyncTransport};
