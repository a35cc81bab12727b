//! Per-frame sync protocol
//!
//! The master encodes one frame per rendered frame; every node decodes each
//! received frame in the same field order. Frame layout:
//!
//! ```text
//! u64 frame number
//! global always group
//! bool  + global properties group         (while the global record is dirty)
//! slide state (selection, trigger, fade)
//! bool  + container structure             (while membership changes are owed)
//! u32 entry count
//! entries: u32 id, u8 kind, u8 group mask, groups in core/always/properties
//!          order, then a u32 length trailer when frame verification is on
//! ```
//!
//! A layer entry carries core while its core countdown runs, always while it
//! is playing or dirty (never for master-only layers) and properties while it
//! is dirty. There is no acknowledgement path: redundancy covers nodes that
//! missed frames.
//!
//! A node parses the complete frame (and checks every trailer) before it
//! touches any state, so a rejected frame leaves the node as it was.

use std::sync::Arc;

use bytes::Bytes;

use crate::compositor::{
    AlwaysFields, CoreFields, Layer, LayerKind, PropertyFields, SlideContainer, SlideState, StructureRecord,
};
use crate::context::ClusterContext;

use super::codec::{SyncError, SyncReader, SyncWriter, WireEnum};
use super::global::GlobalState;
use super::transport::SyncTransport;

const GROUP_CORE: u8 = 1 << 0;
const GROUP_ALWAYS: u8 = 1 << 1;
const GROUP_PROPERTIES: u8 = 1 << 2;

/// Counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    /// Frames a node never saw, from gaps in frame numbers
    pub frames_missed: u64,
    pub entries_sent: u64,
    pub entries_received: u64,
    pub bytes_sent: u64,
    pub last_frame_size: usize,
}

/// One layer entry, parsed but not applied
#[derive(Debug)]
struct StagedEntry {
    id: u32,
    kind: LayerKind,
    core: Option<CoreFields>,
    always: Option<AlwaysFields>,
    properties: Option<PropertyFields>,
}

/// A fully parsed frame
#[derive(Debug)]
struct StagedFrame {
    number: u64,
    global: GlobalState,
    state: SlideState,
    structure: Option<StructureRecord>,
    entries: Vec<StagedEntry>,
}

pub struct SyncCoordinator {
    ctx: Arc<ClusterContext>,
    global: GlobalState,
    frame_number: u64,
    last_received: Option<u64>,
    stats: SyncStats,
}

impl SyncCoordinator {
    pub fn new(ctx: &Arc<ClusterContext>) -> Self {
        let settings = ctx.settings();
        Self {
            ctx: Arc::clone(ctx),
            global: GlobalState::new(settings.sync_redundancy, settings.time_sync_threshold),
            frame_number: 0,
            last_received: None,
            stats: SyncStats::default(),
        }
    }

    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut GlobalState {
        &mut self.global
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Number of the last frame encoded (master) or applied (node)
    pub fn frame_number(&self) -> u64 {
        if self.ctx.is_master() {
            self.frame_number
        } else {
            self.last_received.unwrap_or(0)
        }
    }

    fn entry_mask(layer: &Layer) -> u8 {
        let tracker = layer.tracker();
        let mut mask = 0;
        if tracker.core_pending() {
            mask |= GROUP_CORE;
        }
        if !layer.is_master_only() && (layer.is_playing() || tracker.need_sync()) {
            mask |= GROUP_ALWAYS;
        }
        if tracker.need_sync() {
            mask |= GROUP_PROPERTIES;
        }
        mask
    }

    /// Encode this frame's sync data and count one pass on every dirty record
    pub fn encode_frame(&mut self, slides: &mut SlideContainer) -> Bytes {
        slides.refresh_structure();
        self.frame_number += 1;
        let verify = self.ctx.settings().verify_frames;

        let mut w = SyncWriter::with_capacity(256);
        w.put_u64(self.frame_number);

        self.global.encode_always(&mut w);
        let global_dirty = self.global.need_sync();
        w.put_bool(global_dirty);
        if global_dirty {
            self.global.encode_properties(&mut w);
        }
        self.global.complete_sync_pass();

        slides.encode_state(&mut w);
        let structure_dirty = slides.structure_tracker().need_sync();
        w.put_bool(structure_dirty);
        if structure_dirty {
            slides.encode_structure(&mut w);
            slides.complete_structure_pass();
        }

        let count_at = w.reserve_u32();
        let mut count = 0u32;
        for layer in slides.layers_mut() {
            let mask = Self::entry_mask(layer);
            if mask == 0 {
                continue;
            }
            w.put_u32(layer.id());
            layer.kind().write(&mut w);
            w.put_u8(mask);

            let start = w.len();
            if mask & GROUP_CORE != 0 {
                layer.encode_core(&mut w);
            }
            if mask & GROUP_ALWAYS != 0 {
                layer.encode_always(&mut w);
            }
            if mask & GROUP_PROPERTIES != 0 {
                layer.encode_properties(&mut w);
            }
            if verify {
                let length = (w.len() - start) as u32;
                w.put_u32(length);
            }

            if layer.need_sync() {
                layer.complete_sync_pass();
            }
            count += 1;
        }
        w.patch_u32(count_at, count);

        let frame = w.freeze();
        self.stats.frames_sent += 1;
        self.stats.entries_sent += count as u64;
        self.stats.bytes_sent += frame.len() as u64;
        self.stats.last_frame_size = frame.len();
        tracing::trace!(frame = self.frame_number, entries = count, bytes = frame.len(), "Sync frame encoded");
        frame
    }

    /// Apply one received frame. A frame that fails to parse is dropped whole.
    pub fn decode_frame(&mut self, slides: &mut SlideContainer, frame: &[u8]) -> Result<(), SyncError> {
        match self.read_frame(frame) {
            Ok(staged) => {
                let number = staged.number;
                if let Some(last) = self.last_received {
                    if number > last + 1 {
                        self.stats.frames_missed += number - last - 1;
                        tracing::debug!(missed = number - last - 1, "Gap in sync frames");
                    }
                }
                self.apply_frame(slides, staged);
                self.last_received = Some(number);
                self.stats.frames_received += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.frames_rejected += 1;
                tracing::error!("Sync frame rejected: {}", e);
                Err(e)
            }
        }
    }

    fn read_frame(&self, frame: &[u8]) -> Result<StagedFrame, SyncError> {
        let verify = self.ctx.settings().verify_frames;
        let mut r = SyncReader::new(frame);
        let number = r.u64()?;

        let mut global = self.global.clone();
        global.decode_always(&mut r)?;
        if r.bool()? {
            global.decode_properties(&mut r)?;
        }

        let state = SlideState::read(&mut r)?;
        let structure = if r.bool()? {
            Some(StructureRecord::read(&mut r)?)
        } else {
            None
        };

        let count = r.u32()?;
        let mut entries = Vec::with_capacity((count as usize).min(4096));
        for _ in 0..count {
            let id = r.u32()?;
            let kind = LayerKind::read(&mut r)?;
            let mask = r.u8()?;

            let start = r.position();
            let core = (mask & GROUP_CORE != 0).then(|| CoreFields::read(&mut r)).transpose()?;
            let always = (mask & GROUP_ALWAYS != 0).then(|| AlwaysFields::read(&mut r)).transpose()?;
            let properties = (mask & GROUP_PROPERTIES != 0)
                .then(|| PropertyFields::read(kind, &mut r))
                .transpose()?;
            if verify {
                let actual = (r.position() - start) as u32;
                let expected = r.u32()?;
                if expected != actual {
                    return Err(SyncError::EntryLength {
                        layer: id,
                        expected,
                        actual,
                    });
                }
            }
            entries.push(StagedEntry {
                id,
                kind,
                core,
                always,
                properties,
            });
        }

        Ok(StagedFrame {
            number,
            global,
            state,
            structure,
            entries,
        })
    }

    fn apply_frame(&mut self, slides: &mut SlideContainer, staged: StagedFrame) {
        self.global = staged.global;
        slides.apply_state(staged.state);
        if let Some(structure) = staged.structure {
            slides.apply_structure(structure);
        }

        for entry in staged.entries {
            let Some(layer) = slides.ensure_layer(entry.id, entry.kind) else {
                tracing::warn!("{}", SyncError::LayerUnavailable(entry.id));
                continue;
            };
            if let Some(core) = entry.core {
                layer.apply_core(core);
            }
            if let Some(always) = entry.always {
                layer.apply_always(always);
            }
            if let Some(properties) = entry.properties {
                layer.apply_properties(properties);
            }
            self.stats.entries_received += 1;
        }
    }

    /// Master: encode and broadcast this frame
    pub fn send_frame(&mut self, slides: &mut SlideContainer, transport: &mut dyn SyncTransport) {
        let frame = self.encode_frame(slides);
        transport.broadcast(frame);
    }

    /// Node: apply every frame waiting on the transport. Returns how many
    /// frames were applied.
    pub fn receive_frames(&mut self, slides: &mut SlideContainer, transport: &mut dyn SyncTransport) -> usize {
        let mut applied = 0;
        while let Some(frame) = transport.try_receive() {
            if self.decode_frame(slides, &frame).is_ok() {
                applied += 1;
            }
        }
        applied
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("role", &self.ctx.role())
            .field("frame_number", &self.frame_number())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
