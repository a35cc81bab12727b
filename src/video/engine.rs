//! Background-threaded playback backend
//!
//! Each [`EngineBackend`] owns one decode thread. The render thread sends
//! commands over a channel and picks up decoded frames from a latest-frame
//! slot without blocking; the decode thread sleeps on the command channel
//! between frames instead of spinning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::settings::BackendKind;

use super::backend::{BackendError, BackendEvent, EndAction, LoopMode, PlaybackBackend, PlaybackSnapshot};
use super::decoder::{DecoderFactory, FrameDecoder};
use super::DecodedFrame;

/// How long the decode thread sleeps when nothing is playing
const IDLE_WAIT: Duration = Duration::from_millis(50);

enum Command {
    Load {
        generation: u64,
        source: String,
        paused: bool,
    },
    Play,
    Pause,
    Seek(f64),
    SetVolume(f32),
    SetLoop(LoopMode, EndAction),
    SetSpeed(f64),
    Shutdown,
}

/// Shared state between decode thread and render thread
struct SharedState {
    /// The latest decoded frame (if any)
    current_frame: Mutex<Option<DecodedFrame>>,
    /// Whether a new frame is available for pickup
    new_frame_available: AtomicBool,
    /// Playback position in seconds, stored as f64 bits
    position: AtomicU64,
    /// Duration in seconds, stored as f64 bits
    duration: AtomicU64,
    /// Load generation that opened successfully, 0 for none
    ready_generation: AtomicU64,
}

impl SharedState {
    fn new() -> Self {
        Self {
            current_frame: Mutex::new(None),
            new_frame_available: AtomicBool::new(false),
            position: AtomicU64::new(0f64.to_bits()),
            duration: AtomicU64::new(0f64.to_bits()),
            ready_generation: AtomicU64::new(0),
        }
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    fn set_position(&self, seconds: f64) {
        self.position.store(seconds.to_bits(), Ordering::Release);
    }

    fn advance(&self, delta: f64) -> f64 {
        let previous = self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(previous) + delta
    }

    fn publish(&self, frame: DecodedFrame) {
        if let Ok(mut current) = self.current_frame.lock() {
            *current = Some(frame);
            self.new_frame_available.store(true, Ordering::Release);
        }
    }
}

/// Threaded backend driving a [`FrameDecoder`]
pub struct EngineBackend {
    kind: BackendKind,
    factory: Arc<dyn DecoderFactory>,
    state: Arc<SharedState>,
    commands: Option<Sender<Command>>,
    events: Option<Receiver<(u64, BackendEvent)>>,
    thread_handle: Option<JoinHandle<()>>,

    // Render-thread view of playback intent
    generation: u64,
    loaded_file: Option<String>,
    codec: Option<String>,
    paused: bool,
    volume: f32,
    loop_mode: LoopMode,
    end_action: EndAction,
    speed: f64,
    pending_restore: Option<PlaybackSnapshot>,
}

impl EngineBackend {
    pub fn new(kind: BackendKind, factory: Arc<dyn DecoderFactory>) -> Self {
        let defaults = PlaybackSnapshot::default();
        Self {
            kind,
            factory,
            state: Arc::new(SharedState::new()),
            commands: None,
            events: None,
            thread_handle: None,
            generation: 0,
            loaded_file: None,
            codec: None,
            paused: defaults.paused,
            volume: defaults.volume,
            loop_mode: defaults.loop_mode,
            end_action: defaults.end_action,
            speed: defaults.speed,
            pending_restore: None,
        }
    }

    fn send(&self, command: Command) {
        match &self.commands {
            Some(tx) => {
                if tx.send(command).is_err() {
                    tracing::warn!(backend = %self.kind, "Backend thread is gone, command dropped");
                }
            }
            None => tracing::warn!(backend = %self.kind, "Backend used before initialize"),
        }
    }

    /// Decode loop, one per backend instance
    fn run(
        kind: BackendKind,
        factory: Arc<dyn DecoderFactory>,
        state: Arc<SharedState>,
        commands: Receiver<Command>,
        events: Sender<(u64, BackendEvent)>,
    ) {
        let mut decoder: Option<Box<dyn FrameDecoder>> = None;
        let mut generation = 0u64;
        let mut source = String::new();
        let mut playing = false;
        let mut loop_mode = LoopMode::Loop;
        let mut end_action = EndAction::Hold;
        let mut speed = 1.0f64;
        let mut volume = 100.0f32;
        let mut decode_warned = false;
        let mut last_tick = Instant::now();

        loop {
            let timeout = match &decoder {
                Some(d) if playing => Duration::from_secs_f64(1.0 / d.info().frame_rate.max(1.0)),
                _ => IDLE_WAIT,
            };

            let mut refresh = false;
            match commands.recv_timeout(timeout) {
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Ok(Command::Load {
                    generation: next,
                    source: path,
                    paused,
                }) => {
                    generation = next;
                    source = path;
                    decode_warned = false;
                    state.ready_generation.store(0, Ordering::Release);
                    match factory.open(&source) {
                        Ok(mut opened) => {
                            opened.set_volume(volume);
                            let info = opened.info().clone();
                            state.duration.store(info.duration.to_bits(), Ordering::Release);
                            if info.live {
                                state.set_position(0.0);
                            }
                            state.ready_generation.store(generation, Ordering::Release);
                            tracing::info!(
                                backend = %kind,
                                "Loaded {}: {}x{} @ {:.2}fps, duration {:.2}s, codec {}",
                                source,
                                info.width,
                                info.height,
                                info.frame_rate,
                                info.duration,
                                if info.codec.is_empty() { "unknown" } else { info.codec.as_str() }
                            );
                            let _ = events.send((
                                generation,
                                BackendEvent::FileLoaded {
                                    path: source.clone(),
                                    duration: info.duration,
                                    width: info.width,
                                    height: info.height,
                                },
                            ));
                            if !info.codec.is_empty() {
                                let _ = events.send((
                                    generation,
                                    BackendEvent::CodecKnown {
                                        path: source.clone(),
                                        codec: info.codec.clone(),
                                    },
                                ));
                            }
                            decoder = Some(opened);
                            playing = !paused;
                            refresh = true;
                        }
                        Err(e) => {
                            tracing::error!(backend = %kind, "Failed to open {}: {}", source, e);
                            decoder = None;
                            playing = false;
                            let _ = events.send((generation, BackendEvent::Error(e.to_string())));
                        }
                    }
                }
                Ok(Command::Play) => playing = decoder.is_some(),
                Ok(Command::Pause) => playing = false,
                Ok(Command::Seek(position)) => {
                    state.set_position(position.max(0.0));
                    refresh = true;
                }
                Ok(Command::SetVolume(v)) => {
                    volume = v;
                    if let Some(d) = decoder.as_mut() {
                        d.set_volume(v);
                    }
                }
                Ok(Command::SetLoop(mode, action)) => {
                    loop_mode = mode;
                    end_action = action;
                }
                Ok(Command::SetSpeed(s)) => speed = s,
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            let Some(active) = decoder.as_mut() else {
                continue;
            };

            if playing {
                let live = active.info().live;
                let duration = active.info().duration;
                let mut position = state.advance(elapsed * speed);

                if !live && duration > 0.0 && position >= duration {
                    match loop_mode {
                        LoopMode::Loop => {
                            position %= duration;
                            state.set_position(position);
                            tracing::debug!(backend = %kind, "Looping {}", source);
                        }
                        LoopMode::Once => {
                            position = match end_action {
                                EndAction::Hold => duration,
                                EndAction::Rewind => 0.0,
                            };
                            state.set_position(position);
                            playing = false;
                            let _ = events.send((generation, BackendEvent::EndOfFile));
                        }
                    }
                }
                refresh = true;
            }

            if refresh {
                match active.decode_at(state.position()) {
                    Ok(Some(frame)) => state.publish(frame),
                    Ok(None) => {}
                    Err(e) if !decode_warned => {
                        decode_warned = true;
                        tracing::warn!(backend = %kind, "Decode error in {}: {}", source, e);
                    }
                    Err(_) => {}
                }
            }
        }

        tracing::debug!(backend = %kind, "Backend decode thread stopped");
    }
}

impl PlaybackBackend for EngineBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let kind = self.kind;
        let factory = Arc::clone(&self.factory);
        let state = Arc::clone(&self.state);

        let handle = thread::Builder::new()
            .name(format!("{}-backend", kind))
            .spawn(move || Self::run(kind, factory, state, command_rx, event_tx))
            .map_err(|e| BackendError::ThreadSpawn(e.to_string()))?;

        self.commands = Some(command_tx);
        self.events = Some(event_rx);
        self.thread_handle = Some(handle);
        tracing::debug!(backend = %kind, decoder = self.factory.name(), "Backend initialized");
        Ok(())
    }

    fn load(&mut self, path: &str) {
        let (start_at, paused) = match self.pending_restore.take() {
            Some(snapshot) if snapshot.loaded_file.as_deref() == Some(path) => {
                (snapshot.position, snapshot.paused)
            }
            _ => (0.0, self.paused),
        };

        self.generation += 1;
        self.loaded_file = Some(path.to_string());
        self.codec = None;
        self.paused = paused;
        self.state.set_position(start_at);
        self.send(Command::Load {
            generation: self.generation,
            source: path.to_string(),
            paused,
        });
    }

    fn loaded_file(&self) -> Option<&str> {
        self.loaded_file.as_deref()
    }

    fn start(&mut self) {
        self.paused = false;
        self.send(Command::Play);
    }

    fn stop(&mut self) {
        self.paused = true;
        self.send(Command::Pause);
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn position(&self) -> f64 {
        self.state.position()
    }

    fn seek(&mut self, position: f64) {
        let position = position.max(0.0);
        self.state.set_position(position);
        self.send(Command::Seek(position));
    }

    fn duration(&self) -> f64 {
        f64::from_bits(self.state.duration.load(Ordering::Acquire))
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 100.0);
        self.send(Command::SetVolume(self.volume));
    }

    fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        self.send(Command::SetLoop(self.loop_mode, self.end_action));
    }

    fn end_action(&self) -> EndAction {
        self.end_action
    }

    fn set_end_action(&mut self, action: EndAction) {
        self.end_action = action;
        self.send(Command::SetLoop(self.loop_mode, self.end_action));
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.0);
        self.send(Command::SetSpeed(self.speed));
    }

    fn codec(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            loaded_file: self.loaded_file.clone(),
            position: self.position(),
            paused: self.paused,
            loop_mode: self.loop_mode,
            end_action: self.end_action,
            volume: self.volume,
            speed: self.speed,
        }
    }

    fn restore(&mut self, snapshot: &PlaybackSnapshot) {
        self.paused = snapshot.paused;
        self.set_volume(snapshot.volume);
        self.loop_mode = snapshot.loop_mode;
        self.set_end_action(snapshot.end_action);
        self.set_speed(snapshot.speed);
        self.pending_restore = Some(snapshot.clone());
    }

    /// Take the latest decoded frame if available (non-blocking)
    fn take_frame(&mut self) -> Option<DecodedFrame> {
        if self.state.new_frame_available.swap(false, Ordering::AcqRel) {
            if let Ok(mut current) = self.state.current_frame.lock() {
                return current.take();
            }
        }
        None
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        let Some(events) = &self.events else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (generation, event) in events.try_iter() {
            if generation != self.generation {
                continue;
            }
            match &event {
                BackendEvent::CodecKnown { codec, .. } => self.codec = Some(codec.clone()),
                BackendEvent::EndOfFile => self.paused = true,
                BackendEvent::Error(message) => {
                    tracing::error!(backend = %self.kind, "Backend failed: {}", message);
                }
                BackendEvent::FileLoaded { .. } => {}
            }
            out.push(event);
        }
        out
    }

    fn is_ready(&self) -> bool {
        self.generation > 0 && self.state.ready_generation.load(Ordering::Acquire) == self.generation
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(backend = %self.kind, "Failed to join backend thread: {:?}", e);
            }
        }
        self.events = None;
    }
}

impl Drop for EngineBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::MediaInfo;

    struct TestDecoder {
        info: MediaInfo,
    }

    impl FrameDecoder for TestDecoder {
        fn info(&self) -> &MediaInfo {
            &self.info
        }

        fn decode_at(&mut self, position: f64) -> Result<Option<DecodedFrame>, BackendError> {
            let mut frame = DecodedFrame::solid(4, 2, [255, 0, 0, 255]);
            frame.pts = position;
            Ok(Some(frame))
        }
    }

    struct TestFactory;

    impl DecoderFactory for TestFactory {
        fn name(&self) -> &str {
            "test"
        }

        fn open(&self, source: &str) -> Result<Box<dyn FrameDecoder>, BackendError> {
            if source.starts_with("missing") {
                return Err(BackendError::OpenFailed {
                    path: source.to_string(),
                    reason: "no such file".to_string(),
                });
            }
            Ok(Box::new(TestDecoder {
                info: MediaInfo {
                    width: 4,
                    height: 2,
                    frame_rate: 100.0,
                    duration: 60.0,
                    codec: "h264".to_string(),
                    live: false,
                },
            }))
        }
    }

    fn backend() -> EngineBackend {
        let mut backend = EngineBackend::new(BackendKind::General, Arc::new(TestFactory));
        backend.initialize().unwrap();
        backend
    }

    fn wait_for(backend: &mut EngineBackend, mut done: impl FnMut(&mut EngineBackend, &[BackendEvent]) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let events = backend.poll_events();
            if done(backend, &events) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_load_reports_file_and_codec() {
        let mut backend = backend();
        backend.load("clip.mp4");

        let mut seen = Vec::new();
        assert!(wait_for(&mut backend, |_, events| {
            seen.extend_from_slice(events);
            seen.len() >= 2
        }));
        assert!(matches!(seen[0], BackendEvent::FileLoaded { duration, .. } if duration == 60.0));
        assert!(matches!(&seen[1], BackendEvent::CodecKnown { codec, .. } if codec == "h264"));
        assert!(backend.is_ready());
        assert_eq!(backend.codec(), Some("h264"));
        assert!(backend.take_frame().is_some());
    }

    #[test]
    fn test_open_failure_is_never_ready() {
        let mut backend = backend();
        backend.load("missing.mp4");
        assert!(wait_for(&mut backend, |_, events| {
            events.iter().any(|e| matches!(e, BackendEvent::Error(_)))
        }));
        assert!(!backend.is_ready());
    }

    #[test]
    fn test_playback_advances_position() {
        let mut backend = backend();
        backend.load("clip.mp4");
        backend.start();
        assert!(wait_for(&mut backend, |b, _| b.position() > 0.05));
        backend.stop();
        assert!(backend.is_paused());
    }

    #[test]
    fn test_restore_resumes_same_file_only() {
        let mut backend = backend();
        let snapshot = PlaybackSnapshot {
            loaded_file: Some("clip.mp4".to_string()),
            position: 12.0,
            paused: true,
            volume: 30.0,
            ..PlaybackSnapshot::default()
        };

        backend.restore(&snapshot);
        backend.load("clip.mp4");
        assert_eq!(backend.position(), 12.0);
        assert_eq!(backend.volume(), 30.0);

        backend.restore(&snapshot);
        backend.load("other.mp4");
        assert_eq!(backend.position(), 0.0);
    }

    #[test]
    fn test_seek_is_visible_immediately() {
        let mut backend = backend();
        backend.load("clip.mp4");
        backend.seek(5.0);
        assert_eq!(backend.position(), 5.0);
        backend.shutdown();
        assert!(backend.poll_events().is_empty());
    }
}
