//! Master and node replicating a composition over the loopback transport

use std::sync::Arc;

use glam::Vec3;
use immersive_cluster::compositor::LayerLocation;
use immersive_cluster::sync::{LoopbackTransport, SyncCoordinator};
use immersive_cluster::{ClusterContext, ClusterSettings, ContextServices, Layer, LayerKind, Role, SlideContainer};

struct Endpoint {
    ctx: Arc<ClusterContext>,
    slides: SlideContainer,
    coordinator: SyncCoordinator,
    transport: LoopbackTransport,
}

impl Endpoint {
    fn master(settings: &ClusterSettings) -> Self {
        let ctx = ClusterContext::new(Role::Master, settings.clone(), ContextServices::default());
        Self {
            slides: SlideContainer::new(&ctx),
            coordinator: SyncCoordinator::new(&ctx),
            transport: LoopbackTransport::new(64),
            ctx,
        }
    }

    fn node(master: &Endpoint, settings: &ClusterSettings) -> Self {
        let ctx = ClusterContext::new(Role::Node, settings.clone(), ContextServices::default());
        Self {
            slides: SlideContainer::new(&ctx),
            coordinator: SyncCoordinator::new(&ctx),
            transport: master.transport.node(),
            ctx,
        }
    }

    fn send(&mut self) {
        self.coordinator.send_frame(&mut self.slides, &mut self.transport);
    }

    fn receive(&mut self) -> usize {
        let applied = self.coordinator.receive_frames(&mut self.slides, &mut self.transport);
        self.slides.refresh_structure();
        applied
    }
}

fn settings() -> ClusterSettings {
    ClusterSettings {
        verify_frames: true,
        ..ClusterSettings::default()
    }
}

#[test]
fn keep_visible_layer_is_placed_identically_on_node() {
    let settings = settings();
    let mut master = Endpoint::master(&settings);
    let mut node = Endpoint::node(&master, &settings);

    for name in ["A", "B", "C"] {
        master.slides.add_slide(name);
    }
    let x = master
        .slides
        .add_layer(Some(1), Layer::new(LayerKind::Image, &master.ctx))
        .unwrap();
    master.slides.layer_mut(x).unwrap().set_keep_visible(1);

    master.send();
    assert_eq!(node.receive(), 1);

    let matrix = node.slides.matrix();
    assert_eq!(node.slides.locate(x), Some(LayerLocation::Slide(1)));
    assert_eq!(matrix.local_index(x, 0), Some(-1));
    assert_eq!(matrix.local_index(x, 1), Some(0));
    assert_eq!(matrix.local_index(x, 2), Some(0));

    master.slides.add_slide("D");
    master.send();
    node.receive();
    assert_eq!(node.slides.slide_name(3), Some("D"));
    assert_eq!(node.slides.matrix().local_index(x, 3), Some(1));
}

#[test]
fn alpha_change_reaches_node_volume() {
    let settings = settings();
    let mut master = Endpoint::master(&settings);
    let mut node = Endpoint::node(&master, &settings);
    master.ctx.set_volume_scale(0.5);
    node.ctx.set_volume_scale(0.5);

    let id = master
        .slides
        .add_layer(None, Layer::new(LayerKind::Video, &master.ctx))
        .unwrap();
    let layer = master.slides.layer_mut(id).unwrap();
    layer.set_alpha(0.0);
    assert!(!layer.is_playing());
    layer.set_alpha(0.6);
    assert!(layer.is_playing());

    master.send();
    node.receive();

    let replica = node.slides.layer(id).unwrap();
    assert!(replica.is_playing());
    assert!((replica.alpha() - 0.6).abs() < 1e-6);
    let expected = settings.default_volume * 0.6 * 0.5;
    assert!((replica.output_volume().unwrap() - expected).abs() < 1e-3);
}

#[test]
fn late_node_catches_up_within_redundancy_window() {
    let settings = settings();
    let mut master = Endpoint::master(&settings);
    let id = master
        .slides
        .add_layer(None, Layer::new(LayerKind::Text, &master.ctx))
        .unwrap();
    master.slides.layer_mut(id).unwrap().set_text("Doors open");
    master.coordinator.global_mut().set_loaded_file("/show/backdrop.mov");

    // First pass goes out before the node listens
    master.send();
    let mut node = Endpoint::node(&master, &settings);
    for _ in 1..settings.sync_redundancy {
        master.send();
    }
    assert_eq!(node.receive(), settings.sync_redundancy as usize - 1);

    assert_eq!(node.slides.locate(id), Some(LayerLocation::Master));
    assert_eq!(node.slides.layer(id).unwrap().text(), Some("Doors open"));
    assert_eq!(node.coordinator.global().loaded_file(), "/show/backdrop.mov");
    assert_eq!(node.coordinator.frame_number(), settings.sync_redundancy as u64);

    // Everything is clean now: frames carry no entries
    let before = master.coordinator.stats().entries_sent;
    master.send();
    assert_eq!(master.coordinator.stats().entries_sent, before);
    assert_eq!(node.receive(), 1);
}

#[test]
fn unknown_layer_is_created_and_rest_of_frame_applied() {
    let settings = settings();
    let mut master = Endpoint::master(&settings);
    let image = master
        .slides
        .add_layer(None, Layer::new(LayerKind::Image, &master.ctx))
        .unwrap();
    let text = master
        .slides
        .add_layer(None, Layer::new(LayerKind::Text, &master.ctx))
        .unwrap();
    for _ in 0..settings.sync_redundancy {
        master.send();
    }

    // The node joins after the structure went out
    let mut node = Endpoint::node(&master, &settings);
    master
        .slides
        .layer_mut(image)
        .unwrap()
        .set_translation(Vec3::new(0.5, 0.0, -3.0));
    master.slides.layer_mut(text).unwrap().set_text("Intermission");
    master.send();
    assert_eq!(node.receive(), 1);

    assert_eq!(node.slides.locate(image), Some(LayerLocation::Detached));
    let replica = node.slides.layer(image).unwrap();
    assert_eq!(replica.kind(), LayerKind::Image);
    assert_eq!(replica.translation(), Vec3::new(0.5, 0.0, -3.0));
    assert_eq!(node.slides.layer(text).unwrap().text(), Some("Intermission"));
    assert_eq!(node.coordinator.stats().frames_rejected, 0);

    // The next structure update places them
    master.slides.add_slide("Second half");
    master.send();
    node.receive();
    assert_eq!(node.slides.locate(image), Some(LayerLocation::Master));
    assert_eq!(node.slides.locate(text), Some(LayerLocation::Master));
    assert_eq!(node.slides.slide_count(), 1);
}

#[test]
fn slide_trigger_and_fade_follow_master() {
    let settings = settings();
    let mut master = Endpoint::master(&settings);
    let mut node = Endpoint::node(&master, &settings);
    let a = master.slides.add_slide("A");
    let b = master.slides.add_slide("B");
    let on_a = master
        .slides
        .add_layer(Some(a), Layer::new(LayerKind::Image, &master.ctx))
        .unwrap();
    let on_b = master
        .slides
        .add_layer(Some(b), Layer::new(LayerKind::Image, &master.ctx))
        .unwrap();

    master.slides.trigger(a as i32).unwrap();
    master.slides.set_fade(100.0);
    master.slides.trigger(b as i32).unwrap();
    master.slides.set_fade(40.0);
    master.send();
    node.receive();

    assert_eq!(node.slides.triggered(), b as i32);
    assert_eq!(node.slides.previous_triggered(), a as i32);
    assert_eq!(node.slides.fade(), 40.0);
    assert!((node.slides.layer(on_b).unwrap().alpha() - 0.4).abs() < 1e-6);
    assert!((node.slides.layer(on_a).unwrap().alpha() - 0.6).abs() < 1e-6);
}
