//! Adaptive backend selection with live hand-off
//!
//! An [`AdaptiveSelector`] owns one backend of each kind for its whole
//! lifetime and routes every call to the active one. When the policy picks
//! the other backend for a file (by extension up front, or by codec once the
//! active backend reports it), playback state moves across through a
//! serialized [`PlaybackSnapshot`].
//!
//! The decision only depends on the configuration and the file path/codec,
//! so every process in the cluster picks the same backend for the same file.

use std::path::Path;

use crate::settings::{BackendKind, BackendPolicySettings};
use crate::sync::{SyncReader, SyncWriter};

use super::backend::{BackendError, BackendEvent, EndAction, LoopMode, PlaybackBackend, PlaybackSnapshot};
use super::DecodedFrame;

/// Normalized backend policy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPolicy {
    pub default_backend: BackendKind,
    pub select_by_codec: bool,
    extensions: [Vec<String>; 2],
    codecs: [Vec<String>; 2],
}

impl SelectionPolicy {
    pub fn from_settings(settings: &BackendPolicySettings) -> Self {
        Self {
            default_backend: settings.default_backend,
            select_by_codec: settings.select_by_codec,
            extensions: [
                settings.extensions(BackendKind::General),
                settings.extensions(BackendKind::Accelerated),
            ],
            codecs: [
                settings.codecs(BackendKind::General),
                settings.codecs(BackendKind::Accelerated),
            ],
        }
    }

    /// Backend for a file, judged by its extension
    pub fn for_path(&self, path: &str) -> BackendKind {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.pick(&self.extensions, &extension)
    }

    /// Backend for a codec name
    pub fn for_codec(&self, codec: &str) -> BackendKind {
        self.pick(&self.codecs, &codec.to_lowercase())
    }

    /// An entry listed for the non-default backend selects it, unless the
    /// default backend lists it too.
    fn pick(&self, lists: &[Vec<String>; 2], entry: &str) -> BackendKind {
        let default = self.default_backend;
        let other = default.other();
        let listed = |kind: BackendKind| lists[kind.index()].iter().any(|e| e == entry);
        if !entry.is_empty() && listed(other) && !listed(default) {
            other
        } else {
            default
        }
    }
}

/// Video backend that hot-swaps between a general and an accelerated backend
pub struct AdaptiveSelector {
    backends: [Box<dyn PlaybackBackend>; 2],
    active: BackendKind,
    policy: SelectionPolicy,
    handoffs: u32,
}

impl AdaptiveSelector {
    /// Both backends must report their own kind; they are slotted by it.
    pub fn new(
        general: Box<dyn PlaybackBackend>,
        accelerated: Box<dyn PlaybackBackend>,
        policy: SelectionPolicy,
    ) -> Self {
        debug_assert_eq!(general.kind(), BackendKind::General);
        debug_assert_eq!(accelerated.kind(), BackendKind::Accelerated);
        Self {
            backends: [general, accelerated],
            active: policy.default_backend,
            policy,
            handoffs: 0,
        }
    }

    pub fn active_kind(&self) -> BackendKind {
        self.active
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Number of hand-offs performed so far
    pub fn handoff_count(&self) -> u32 {
        self.handoffs
    }

    pub fn backend(&self, kind: BackendKind) -> &dyn PlaybackBackend {
        self.backends[kind.index()].as_ref()
    }

    fn active_backend(&self) -> &dyn PlaybackBackend {
        self.backends[self.active.index()].as_ref()
    }

    fn active_mut(&mut self) -> &mut dyn PlaybackBackend {
        self.backends[self.active.index()].as_mut()
    }

    /// Move playback state from the active backend to `target` and make it active.
    ///
    /// The caller loads the file into the new backend afterwards.
    fn hand_off(&mut self, target: BackendKind) {
        if target == self.active {
            return;
        }
        let from = self.active;

        let source = self.backends[from.index()].as_mut();
        let was_paused = source.is_paused();
        source.stop();
        let mut snapshot = source.snapshot();
        snapshot.paused = was_paused;

        let mut writer = SyncWriter::with_capacity(64);
        snapshot.encode(&mut writer);
        let bytes = writer.freeze();

        let target_backend = self.backends[target.index()].as_mut();
        match PlaybackSnapshot::decode(&mut SyncReader::new(&bytes)) {
            Ok(decoded) => target_backend.restore(&decoded),
            Err(e) => {
                tracing::warn!("Hand-off snapshot did not decode ({}), restoring directly", e);
                target_backend.restore(&snapshot);
            }
        }

        self.active = target;
        self.handoffs += 1;
        tracing::info!(
            from = %from,
            to = %target,
            "Backend hand-off at {:.3}s ({} bytes)",
            snapshot.position,
            bytes.len()
        );
    }
}

impl PlaybackBackend for AdaptiveSelector {
    fn kind(&self) -> BackendKind {
        self.active
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        for backend in self.backends.iter_mut() {
            backend.initialize()?;
        }
        Ok(())
    }

    fn load(&mut self, path: &str) {
        let target = self.policy.for_path(path);
        if target != self.active {
            self.hand_off(target);
        }
        self.active_mut().load(path);
    }

    fn loaded_file(&self) -> Option<&str> {
        self.active_backend().loaded_file()
    }

    fn start(&mut self) {
        self.active_mut().start();
    }

    fn stop(&mut self) {
        self.active_mut().stop();
    }

    fn is_paused(&self) -> bool {
        self.active_backend().is_paused()
    }

    fn position(&self) -> f64 {
        self.active_backend().position()
    }

    fn seek(&mut self, position: f64) {
        self.active_mut().seek(position);
    }

    fn duration(&self) -> f64 {
        self.active_backend().duration()
    }

    fn volume(&self) -> f32 {
        self.active_backend().volume()
    }

    fn set_volume(&mut self, volume: f32) {
        self.active_mut().set_volume(volume);
    }

    fn loop_mode(&self) -> LoopMode {
        self.active_backend().loop_mode()
    }

    fn set_loop_mode(&mut self, mode: LoopMode) {
        self.active_mut().set_loop_mode(mode);
    }

    fn end_action(&self) -> EndAction {
        self.active_backend().end_action()
    }

    fn set_end_action(&mut self, action: EndAction) {
        self.active_mut().set_end_action(action);
    }

    fn speed(&self) -> f64 {
        self.active_backend().speed()
    }

    fn set_speed(&mut self, speed: f64) {
        self.active_mut().set_speed(speed);
    }

    fn codec(&self) -> Option<&str> {
        self.active_backend().codec()
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        self.active_backend().snapshot()
    }

    fn restore(&mut self, snapshot: &PlaybackSnapshot) {
        self.active_mut().restore(snapshot);
    }

    fn take_frame(&mut self) -> Option<DecodedFrame> {
        let inactive = self.active.other().index();
        let _ = self.backends[inactive].take_frame();
        self.active_mut().take_frame()
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        let inactive = self.active.other().index();
        let _ = self.backends[inactive].poll_events();

        let events = self.active_mut().poll_events();
        if self.policy.select_by_codec {
            let codec_target = events.iter().rev().find_map(|event| match event {
                BackendEvent::CodecKnown { path, codec } => Some((path.clone(), self.policy.for_codec(codec))),
                _ => None,
            });
            if let Some((path, target)) = codec_target {
                if target != self.active && self.loaded_file() == Some(path.as_str()) {
                    self.hand_off(target);
                    self.active_mut().load(&path);
                }
            }
        }
        events
    }

    fn is_ready(&self) -> bool {
        self.active_backend().is_ready()
    }

    fn shutdown(&mut self) {
        for backend in self.backends.iter_mut() {
            backend.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Calls {
        stops: u32,
        snapshots: u32,
        restores: u32,
        loads: Vec<String>,
    }

    struct FakeBackend {
        kind: BackendKind,
        calls: Arc<Mutex<Calls>>,
        state: PlaybackSnapshot,
        pending: Option<PlaybackSnapshot>,
        codec: Option<String>,
        events: Vec<BackendEvent>,
        codec_for_loads: Option<String>,
    }

    impl FakeBackend {
        fn boxed(kind: BackendKind, codec_for_loads: Option<&str>) -> (Box<dyn PlaybackBackend>, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let backend: Box<dyn PlaybackBackend> = Box::new(FakeBackend {
                kind,
                calls: Arc::clone(&calls),
                state: PlaybackSnapshot::default(),
                pending: None,
                codec: None,
                events: Vec::new(),
                codec_for_loads: codec_for_loads.map(str::to_string),
            });
            (backend, calls)
        }
    }

    impl PlaybackBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }
        fn initialize(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
        fn load(&mut self, path: &str) {
            self.calls.lock().unwrap().loads.push(path.to_string());
            match self.pending.take() {
                Some(s) if s.loaded_file.as_deref() == Some(path) => self.state = s,
                _ => self.state.position = 0.0,
            }
            self.state.loaded_file = Some(path.to_string());
            if let Some(codec) = &self.codec_for_loads {
                self.codec = Some(codec.clone());
                self.events.push(BackendEvent::CodecKnown {
                    path: path.to_string(),
                    codec: codec.clone(),
                });
            }
        }
        fn loaded_file(&self) -> Option<&str> {
            self.state.loaded_file.as_deref()
        }
        fn start(&mut self) {
            self.state.paused = false;
        }
        fn stop(&mut self) {
            self.calls.lock().unwrap().stops += 1;
            self.state.paused = true;
        }
        fn is_paused(&self) -> bool {
            self.state.paused
        }
        fn position(&self) -> f64 {
            self.state.position
        }
        fn seek(&mut self, position: f64) {
            self.state.position = position;
        }
        fn duration(&self) -> f64 {
            120.0
        }
        fn volume(&self) -> f32 {
            self.state.volume
        }
        fn set_volume(&mut self, volume: f32) {
            self.state.volume = volume;
        }
        fn loop_mode(&self) -> LoopMode {
            self.state.loop_mode
        }
        fn set_loop_mode(&mut self, mode: LoopMode) {
            self.state.loop_mode = mode;
        }
        fn end_action(&self) -> EndAction {
            self.state.end_action
        }
        fn set_end_action(&mut self, action: EndAction) {
            self.state.end_action = action;
        }
        fn speed(&self) -> f64 {
            self.state.speed
        }
        fn set_speed(&mut self, speed: f64) {
            self.state.speed = speed;
        }
        fn codec(&self) -> Option<&str> {
            self.codec.as_deref()
        }
        fn snapshot(&self) -> PlaybackSnapshot {
            self.calls.lock().unwrap().snapshots += 1;
            self.state.clone()
        }
        fn restore(&mut self, snapshot: &PlaybackSnapshot) {
            self.calls.lock().unwrap().restores += 1;
            self.state.paused = snapshot.paused;
            self.state.volume = snapshot.volume;
            self.state.loop_mode = snapshot.loop_mode;
            self.pending = Some(snapshot.clone());
        }
        fn take_frame(&mut self) -> Option<DecodedFrame> {
            None
        }
        fn poll_events(&mut self) -> Vec<BackendEvent> {
            std::mem::take(&mut self.events)
        }
        fn is_ready(&self) -> bool {
            self.state.loaded_file.is_some()
        }
        fn shutdown(&mut self) {}
    }

    fn policy(accelerated_extensions: &str, select_by_codec: bool) -> SelectionPolicy {
        SelectionPolicy::from_settings(&BackendPolicySettings {
            accelerated_extensions: accelerated_extensions.to_string(),
            select_by_codec,
            ..BackendPolicySettings::default()
        })
    }

    #[test]
    fn test_extension_hand_off_counts() {
        let (general, a) = FakeBackend::boxed(BackendKind::General, None);
        let (accelerated, b) = FakeBackend::boxed(BackendKind::Accelerated, None);
        let mut selector = AdaptiveSelector::new(general, accelerated, policy("mkv", false));
        assert_eq!(selector.active_kind(), BackendKind::General);

        selector.load("clip.mkv");

        let a = a.lock().unwrap();
        let b = b.lock().unwrap();
        assert_eq!(a.stops, 1);
        assert_eq!(a.snapshots, 1);
        assert!(a.loads.is_empty());
        assert_eq!(b.restores, 1);
        assert_eq!(b.loads, vec!["clip.mkv".to_string()]);
        assert_eq!(selector.active_kind(), BackendKind::Accelerated);
        assert_eq!(selector.loaded_file(), Some("clip.mkv"));
        assert_eq!(selector.handoff_count(), 1);
    }

    #[test]
    fn test_matching_backend_loads_without_hand_off() {
        let (general, a) = FakeBackend::boxed(BackendKind::General, None);
        let (accelerated, _) = FakeBackend::boxed(BackendKind::Accelerated, None);
        let mut selector = AdaptiveSelector::new(general, accelerated, policy("mkv", false));

        selector.load("clip.MP4");
        assert_eq!(selector.active_kind(), BackendKind::General);
        assert_eq!(a.lock().unwrap().stops, 0);
        assert_eq!(selector.handoff_count(), 0);
    }

    #[test]
    fn test_codec_hand_off_preserves_playback_state() {
        let (general, _) = FakeBackend::boxed(BackendKind::General, Some("hap"));
        let (accelerated, b) = FakeBackend::boxed(BackendKind::Accelerated, Some("hap"));
        let mut selector = AdaptiveSelector::new(general, accelerated, policy("", true));

        selector.load("show.mov");
        selector.start();
        selector.seek(42.5);
        selector.set_volume(55.0);
        selector.poll_events();

        assert_eq!(selector.active_kind(), BackendKind::Accelerated);
        assert_eq!(b.lock().unwrap().loads, vec!["show.mov".to_string()]);
        assert_eq!(selector.position(), 42.5);
        assert!(!selector.is_paused());
        assert_eq!(selector.volume(), 55.0);

        // Same codec reported again by the new backend: no ping-pong
        selector.poll_events();
        assert_eq!(selector.handoff_count(), 1);
    }

    #[test]
    fn test_entry_in_both_lists_keeps_default() {
        let policy = SelectionPolicy::from_settings(&BackendPolicySettings {
            general_extensions: "mov".to_string(),
            accelerated_extensions: "mov mkv".to_string(),
            ..BackendPolicySettings::default()
        });
        assert_eq!(policy.for_path("a.mov"), BackendKind::General);
        assert_eq!(policy.for_path("a.mkv"), BackendKind::Accelerated);
        assert_eq!(policy.for_path("noextension"), BackendKind::General);
        assert_eq!(policy.for_codec("HAP_Q"), BackendKind::Accelerated);
    }
}
