//! Externally fed sources: network video sources and screen capture
//!
//! A receiving collaborator (network receiver thread, capture thread) pushes
//! frames and audio into a [`SourceFeed`]; the layer picks them up on the
//! render thread. The audio side is drained by the real-time output callback,
//! which must not block or allocate, so reads only ever `try_lock`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::sync::{SyncError, SyncReader, SyncWriter};
use crate::video::DecodedFrame;

use super::HasAudio;

/// Maximum frames queued before the oldest is dropped
const FRAME_QUEUE_CAPACITY: usize = 3;

/// Fixed-capacity interleaved sample ring
pub struct AudioRing {
    samples: Mutex<RingState>,
    /// Output gain, stored as f32 bits
    gain: AtomicU32,
    overruns: AtomicU64,
}

struct RingState {
    buf: Vec<f32>,
    read: usize,
    len: usize,
}

impl AudioRing {
    /// Allocate the full capacity up front
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(RingState {
                buf: vec![0.0; capacity.max(1)],
                read: 0,
                len: 0,
            }),
            gain: AtomicU32::new(1.0f32.to_bits()),
            overruns: AtomicU64::new(0),
        }
    }

    /// Append samples from the receiving thread, overwriting the oldest on overflow
    pub fn push(&self, input: &[f32]) {
        let Ok(mut ring) = self.samples.lock() else {
            return;
        };
        let capacity = ring.buf.len();
        for &sample in input {
            let write = (ring.read + ring.len) % capacity;
            ring.buf[write] = sample;
            if ring.len == capacity {
                ring.read = (ring.read + 1) % capacity;
                self.overruns.fetch_add(1, Ordering::Relaxed);
            } else {
                ring.len += 1;
            }
        }
    }

    /// Fill `out` from the real-time callback. Never blocks: if the producer
    /// holds the lock the block is silence. Returns the samples taken.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let gain = self.gain();
        let Ok(mut ring) = self.samples.try_lock() else {
            out.fill(0.0);
            return 0;
        };
        let capacity = ring.buf.len();
        let taken = ring.len.min(out.len());
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if i < taken {
                ring.buf[(ring.read + i) % capacity] * gain
            } else {
                0.0
            };
        }
        ring.read = (ring.read + taken) % capacity;
        ring.len -= taken;
        taken
    }

    pub fn available(&self) -> usize {
        self.samples.lock().map(|r| r.len).unwrap_or(0)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Samples dropped because the ring was full
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Frames and audio delivered by an external receiver
pub struct SourceFeed {
    source_name: Mutex<String>,
    frames: Mutex<VecDeque<DecodedFrame>>,
    has_frame: AtomicBool,
    connected: AtomicBool,
    frames_dropped: AtomicU64,
    audio: AudioRing,
}

impl SourceFeed {
    /// One second of 48kHz stereo audio
    pub fn new() -> Self {
        Self::with_audio_capacity(48000 * 2)
    }

    pub fn with_audio_capacity(samples: usize) -> Self {
        Self {
            source_name: Mutex::new(String::new()),
            frames: Mutex::new(VecDeque::with_capacity(FRAME_QUEUE_CAPACITY)),
            has_frame: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            frames_dropped: AtomicU64::new(0),
            audio: AudioRing::new(samples),
        }
    }

    pub fn source_name(&self) -> String {
        self.source_name.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn set_source_name(&self, name: &str) {
        if let Ok(mut current) = self.source_name.lock() {
            if *current != name {
                tracing::info!("Source feed now follows '{}'", name);
                *current = name.to_string();
            }
        }
    }

    /// Called by the receiver thread
    pub fn push_frame(&self, frame: DecodedFrame) {
        if let Ok(mut frames) = self.frames.lock() {
            if frames.len() >= FRAME_QUEUE_CAPACITY {
                frames.pop_front();
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
            self.has_frame.store(true, Ordering::Release);
            self.connected.store(true, Ordering::Release);
        }
    }

    /// Newest frame, discarding older queued ones (non-blocking)
    pub fn take_frame(&self) -> Option<DecodedFrame> {
        let mut frames = self.frames.try_lock().ok()?;
        let newest = frames.pop_back();
        let stale = frames.len() as u64;
        frames.clear();
        if stale > 0 {
            self.frames_dropped.fetch_add(stale, Ordering::Relaxed);
        }
        newest
    }

    /// Whether a frame was ever received
    pub fn has_frame(&self) -> bool {
        self.has_frame.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn audio(&self) -> &AudioRing {
        &self.audio
    }
}

impl Default for SourceFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Network video source with audio
pub struct SourceContent {
    feed: Arc<SourceFeed>,
    configured_volume: f32,
    output_volume: f32,
}

impl SourceContent {
    pub fn new(volume: f32) -> Self {
        let content = Self {
            feed: Arc::new(SourceFeed::new()),
            configured_volume: volume,
            output_volume: volume,
        };
        content.feed.audio().set_gain(volume / 100.0);
        content
    }

    /// Shared handle for the receiving collaborator
    pub fn feed(&self) -> &Arc<SourceFeed> {
        &self.feed
    }
}

impl HasAudio for SourceContent {
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
        self.feed.audio().set_gain(self.output_volume / 100.0);
    }
}

/// Captured screen rectangle in display pixels; zero size means the whole display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn is_full_display(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Screen capture source
pub struct CaptureContent {
    feed: Arc<SourceFeed>,
    display: u32,
    region: CaptureRegion,
}

impl CaptureContent {
    pub fn new() -> Self {
        Self {
            feed: Arc::new(SourceFeed::with_audio_capacity(1)),
            display: 0,
            region: CaptureRegion::default(),
        }
    }

    pub fn feed(&self) -> &Arc<SourceFeed> {
        &self.feed
    }

    pub fn display(&self) -> u32 {
        self.display
    }

    pub fn set_display(&mut self, display: u32) {
        self.display = display;
    }

    pub fn region(&self) -> CaptureRegion {
        self.region
    }

    pub fn set_region(&mut self, region: CaptureRegion) {
        self.region = region;
    }

    pub fn encode_properties(&self, w: &mut SyncWriter) {
        w.put_u32(self.display);
        w.put_i32(self.region.x);
        w.put_i32(self.region.y);
        w.put_u32(self.region.width);
        w.put_u32(self.region.height);
    }

    /// Display index and region as written by `encode_properties`
    pub fn read_properties(r: &mut SyncReader<'_>) -> Result<(u32, CaptureRegion), SyncError> {
        let display = r.u32()?;
        let region = CaptureRegion {
            x: r.i32()?,
            y: r.i32()?,
            width: r.u32()?,
            height: r.u32()?,
        };
        Ok((display, region))
    }
}

impl Default for CaptureContent {
    fn default() -> Self {
        Self::new()
    }
}
