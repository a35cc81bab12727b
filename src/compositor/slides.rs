//! Slide container: the master layer list plus ordered slides
//!
//! The master container is always present and cannot be removed. Slides are
//! shown through crossfades: triggering a slide starts a fade from the
//! previously triggered one, and the fade progress (0-100) sets every slide
//! layer's alpha through the visibility matrix so both fades overlap exactly.
//!
//! Slide index -1 denotes the master.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ClusterContext;
use crate::sync::{SyncError, SyncReader, SyncTracker, SyncWriter, WireEnum};
use crate::video::TextureSink;

use super::container::{ContainerError, LayerContainer};
use super::content::LayerKind;
use super::layer::Layer;
use super::visibility::VisibilityMatrix;

/// Index value meaning "the master container"
pub const MASTER_SLIDE: i32 = -1;

/// Where a layer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerLocation {
    Master,
    Slide(usize),
    /// Known from sync entries but not yet placed by a structure update
    Detached,
}

pub struct SlideContainer {
    ctx: Arc<ClusterContext>,
    master: LayerContainer,
    slides: Vec<LayerContainer>,
    slide_names: Vec<String>,
    selected: i32,
    previous_selected: i32,
    triggered: i32,
    previous_triggered: i32,
    /// Crossfade progress of the triggered slide, 0-100
    fade: f32,
    matrix: VisibilityMatrix,
    /// Membership changes owed to the nodes
    structure: SyncTracker,
    detached: LayerContainer,
}

impl SlideContainer {
    pub fn new(ctx: &Arc<ClusterContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            master: LayerContainer::new(),
            slides: Vec::new(),
            slide_names: Vec::new(),
            selected: MASTER_SLIDE,
            previous_selected: MASTER_SLIDE,
            triggered: MASTER_SLIDE,
            previous_triggered: MASTER_SLIDE,
            fade: 100.0,
            matrix: VisibilityMatrix::new(),
            structure: SyncTracker::new_dirty(ctx.settings().sync_redundancy),
            detached: LayerContainer::new(),
        }
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    pub fn master(&self) -> &LayerContainer {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut LayerContainer {
        &mut self.master
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    pub fn slide(&self, index: usize) -> Option<&LayerContainer> {
        self.slides.get(index)
    }

    pub fn slide_mut(&mut self, index: usize) -> Option<&mut LayerContainer> {
        self.slides.get_mut(index)
    }

    pub fn slide_name(&self, index: usize) -> Option<&str> {
        self.slide_names.get(index).map(String::as_str)
    }

    pub fn set_slide_name(&mut self, index: usize, name: impl Into<String>) -> Result<(), ContainerError> {
        let slot = self
            .slide_names
            .get_mut(index)
            .ok_or(ContainerError::SlideOutOfRange(index))?;
        *slot = name.into();
        self.structure.mark();
        Ok(())
    }

    pub fn add_slide(&mut self, name: impl Into<String>) -> usize {
        let index = self.slides.len();
        self.slides.push(LayerContainer::new());
        self.slide_names.push(name.into());
        self.structure.mark();
        index
    }

    pub fn insert_slide(&mut self, index: usize, name: impl Into<String>) -> usize {
        let index = index.min(self.slides.len());
        self.slides.insert(index, LayerContainer::new());
        self.slide_names.insert(index, name.into());
        for slot in [
            &mut self.selected,
            &mut self.previous_selected,
            &mut self.triggered,
            &mut self.previous_triggered,
        ] {
            if *slot >= index as i32 {
                *slot += 1;
            }
        }
        self.structure.mark();
        index
    }

    /// Remove a slide with all its layers
    pub fn remove_slide(&mut self, index: usize) -> Result<LayerContainer, ContainerError> {
        if index >= self.slides.len() {
            return Err(ContainerError::SlideOutOfRange(index));
        }
        let removed = self.slides.remove(index);
        self.slide_names.remove(index);
        for slot in [
            &mut self.selected,
            &mut self.previous_selected,
            &mut self.triggered,
            &mut self.previous_triggered,
        ] {
            if *slot == index as i32 {
                *slot = MASTER_SLIDE;
            } else if *slot > index as i32 {
                *slot -= 1;
            }
        }
        self.structure.mark();
        self.refresh_structure();
        Ok(removed)
    }

    /// Add a layer on top of a slide, or of the master container for `None`
    pub fn add_layer(&mut self, slide: Option<usize>, layer: Layer) -> Result<u32, ContainerError> {
        let container = match slide {
            None => &mut self.master,
            Some(index) => self
                .slides
                .get_mut(index)
                .ok_or(ContainerError::SlideOutOfRange(index))?,
        };
        let id = container.add(layer)?;
        self.apply_crossfade();
        Ok(id)
    }

    /// Remove a layer wherever it lives
    pub fn remove_layer(&mut self, id: u32) -> Result<Layer, ContainerError> {
        let location = self.locate(id).ok_or(ContainerError::NotFound(id))?;
        let layer = self.container_mut(location).remove(id)?;
        self.refresh_structure();
        Ok(layer)
    }

    /// Remove all unlocked layers from the master and every slide
    pub fn clear(&mut self) -> Vec<Layer> {
        let mut removed = self.master.clear();
        for slide in &mut self.slides {
            removed.extend(slide.clear());
        }
        self.refresh_structure();
        removed
    }

    /// Drop every layer and slide, locked ones included, and return to the
    /// master slide
    pub fn reset(&mut self) -> Vec<Layer> {
        let mut removed = self.master.take_all();
        for mut slide in self.slides.drain(..) {
            removed.extend(slide.take_all());
        }
        removed.extend(self.detached.take_all());
        self.slide_names.clear();
        self.selected = MASTER_SLIDE;
        self.previous_selected = MASTER_SLIDE;
        self.triggered = MASTER_SLIDE;
        self.previous_triggered = MASTER_SLIDE;
        self.fade = 100.0;
        self.structure.mark();
        self.refresh_structure();
        removed
    }

    pub fn locate(&self, id: u32) -> Option<LayerLocation> {
        if self.master.contains(id) {
            return Some(LayerLocation::Master);
        }
        if let Some(index) = self.slides.iter().position(|s| s.contains(id)) {
            return Some(LayerLocation::Slide(index));
        }
        self.detached.contains(id).then_some(LayerLocation::Detached)
    }

    fn container_mut(&mut self, location: LayerLocation) -> &mut LayerContainer {
        match location {
            LayerLocation::Master => &mut self.master,
            LayerLocation::Slide(index) => &mut self.slides[index],
            LayerLocation::Detached => &mut self.detached,
        }
    }

    pub fn layer(&self, id: u32) -> Option<&Layer> {
        self.layers().find(|l| l.id() == id)
    }

    pub fn layer_mut(&mut self, id: u32) -> Option<&mut Layer> {
        self.layers_mut().find(|l| l.id() == id)
    }

    /// All layers in sync order: master, then slides, then detached
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.master
            .iter()
            .chain(self.slides.iter().flat_map(LayerContainer::iter))
            .chain(self.detached.iter())
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.master
            .iter_mut()
            .chain(self.slides.iter_mut().flat_map(LayerContainer::iter_mut))
            .chain(self.detached.iter_mut())
    }

    pub fn layer_count(&self) -> usize {
        self.layers().count()
    }

    /// Find a layer by id, creating it with default state when unknown.
    /// A layer of a different kind under the same id is replaced.
    pub fn ensure_layer(&mut self, id: u32, kind: LayerKind) -> Option<&mut Layer> {
        let ctx = Arc::clone(&self.ctx);
        match self.locate(id) {
            Some(location) => {
                let container = self.container_mut(location);
                let index = container.position(id)?;
                if container.get_by_index(index).map(Layer::kind) != Some(kind) {
                    tracing::warn!(layer = id, "Layer kind changed to {}, recreating", kind);
                    container.take(id);
                    container.insert(index, Layer::with_id(id, kind, &ctx)).ok()?;
                }
                container.get_by_index_mut(index)
            }
            None => {
                tracing::debug!(layer = id, "Creating unknown {} layer", kind);
                self.detached.add(Layer::with_id(id, kind, &ctx)).ok()?;
                self.detached.get_mut(id)
            }
        }
    }

    pub fn matrix(&self) -> &VisibilityMatrix {
        &self.matrix
    }

    pub fn structure_tracker(&self) -> &SyncTracker {
        &self.structure
    }

    pub fn complete_structure_pass(&mut self) {
        self.structure.complete_pass();
    }

    /// Pick up membership changes: rebuild the matrix and owe the nodes
    /// a structure update
    pub fn refresh_structure(&mut self) {
        let mut changed = self.master.take_membership_changed();
        for slide in &mut self.slides {
            changed |= slide.take_membership_changed();
        }
        if changed {
            self.structure.mark();
        }
        if changed || self.matrix.is_stale(&self.slides) {
            self.matrix.rebuild(&self.slides);
        }
    }

    // ---- selection and crossfade ----

    pub fn selected(&self) -> i32 {
        self.selected
    }

    pub fn previous_selected(&self) -> i32 {
        self.previous_selected
    }

    pub fn triggered(&self) -> i32 {
        self.triggered
    }

    pub fn previous_triggered(&self) -> i32 {
        self.previous_triggered
    }

    pub fn fade(&self) -> f32 {
        self.fade
    }

    fn check_index(&self, index: i32) -> Result<(), ContainerError> {
        if index == MASTER_SLIDE || (index >= 0 && (index as usize) < self.slides.len()) {
            Ok(())
        } else {
            Err(ContainerError::SlideOutOfRange(index.max(0) as usize))
        }
    }

    pub fn select(&mut self, index: i32) -> Result<(), ContainerError> {
        self.check_index(index)?;
        if index != self.selected {
            self.previous_selected = self.selected;
            self.selected = index;
        }
        Ok(())
    }

    /// Start a crossfade from the currently triggered slide to `index`
    pub fn trigger(&mut self, index: i32) -> Result<(), ContainerError> {
        self.check_index(index)?;
        self.previous_triggered = self.triggered;
        self.triggered = index;
        self.fade = 0.0;
        tracing::info!(
            from = self.previous_triggered,
            to = index,
            "Slide triggered"
        );
        self.apply_crossfade();
        Ok(())
    }

    /// Set crossfade progress (0-100)
    pub fn set_fade(&mut self, progress: f32) {
        self.fade = if progress.is_finite() { progress.clamp(0.0, 100.0) } else { 100.0 };
        self.apply_crossfade();
    }

    /// Slide whose layers should be running
    pub fn focus_slide(&self) -> Option<usize> {
        slide_index(self.triggered, self.slides.len()).or_else(|| slide_index(self.selected, self.slides.len()))
    }

    /// Alpha of every slide layer from the fade progress. Layers visible on
    /// both slides stay opaque; the two ramps are complementary.
    fn apply_crossfade(&mut self) {
        if !self.ctx.is_master() {
            return;
        }
        self.refresh_structure();
        let value = self.fade / 100.0;
        let triggered = slide_index(self.triggered, self.slides.len());
        let previous = slide_index(self.previous_triggered, self.slides.len());
        let matrix = &self.matrix;

        for layer in self.slides.iter_mut().flat_map(LayerContainer::iter_mut) {
            let id = layer.id();
            let at_triggered = triggered.is_some_and(|s| matrix.is_visible(id, s));
            let at_previous = previous.is_some_and(|s| matrix.is_visible(id, s));
            let alpha = match (at_triggered, at_previous) {
                (true, true) => 1.0,
                (true, false) => value,
                (false, true) => 1.0 - value,
                (false, false) => 0.0,
            };
            if layer.alpha() != alpha {
                layer.set_alpha(alpha);
            }
        }
    }

    /// Per-frame update of every layer.
    ///
    /// Master layers and slide layers visible on (or preloading for) the
    /// focus slide are initialized lazily. Layers hidden there skip uploads.
    /// On nodes master-only layers are never initialized.
    pub fn update_all(&mut self, sink: &mut dyn TextureSink, rendering_requested: bool) {
        for handle in self.ctx.drain_released_textures() {
            sink.release(handle);
        }
        self.refresh_structure();

        let changed = self.ctx.poll_source_changes();
        if !changed.is_empty() {
            for layer in self.layers_mut() {
                if changed.iter().any(|path| layer.watches(path)) {
                    layer.source_changed();
                }
            }
        }

        let is_master = self.ctx.is_master();
        let focus = self.focus_slide();
        let fading_from = slide_index(self.previous_triggered, self.slides.len()).filter(|_| self.fade < 100.0);

        for layer in self.master.iter_mut() {
            if is_master || !layer.is_master_only() {
                layer.initialize();
            }
            layer.update(sink, rendering_requested);
        }

        let matrix = &self.matrix;
        for layer in self.slides.iter_mut().flat_map(LayerContainer::iter_mut) {
            let id = layer.id();
            let local = focus.and_then(|slide| matrix.local_index(id, slide));
            let fading_out = fading_from.is_some_and(|slide| matrix.is_visible(id, slide));
            if (matches!(local, Some(-1) | Some(0)) || fading_out) && (is_master || !layer.is_master_only()) {
                layer.initialize();
            }
            let hidden = local.is_some_and(|l| l > 1) && !fading_out;
            layer.update(sink, rendering_requested && !hidden);
        }

        for layer in self.detached.iter_mut() {
            layer.update(sink, false);
        }
    }

    // ---- wire ----

    /// Selection and crossfade state, sent every frame
    pub fn encode_state(&self, w: &mut SyncWriter) {
        w.put_i32(self.selected);
        w.put_i32(self.previous_selected);
        w.put_i32(self.triggered);
        w.put_i32(self.previous_triggered);
        w.put_f32(self.fade);
    }

    pub fn apply_state(&mut self, state: SlideState) {
        self.selected = state.selected;
        self.previous_selected = state.previous_selected;
        self.triggered = state.triggered;
        self.previous_triggered = state.previous_triggered;
        self.fade = state.fade;
    }

    /// Container membership: master entries, then per slide a name and entries
    pub fn encode_structure(&self, w: &mut SyncWriter) {
        encode_entries(w, &self.master);
        w.put_u32(self.slides.len() as u32);
        for (name, slide) in self.slide_names.iter().zip(&self.slides) {
            w.put_str(name);
            encode_entries(w, slide);
        }
    }

    /// Rebuild the containers from a structure update. Known layers keep
    /// their state; unknown ids are created with defaults and ids no longer
    /// listed are dropped. Nothing changes if the update is truncated.
    pub fn decode_structure(&mut self, r: &mut SyncReader<'_>) -> Result<(), SyncError> {
        let structure = StructureRecord::read(r)?;
        self.apply_structure(structure);
        Ok(())
    }

    pub fn apply_structure(&mut self, structure: StructureRecord) {
        let StructureRecord { master, slides } = structure;
        let mut pool: HashMap<u32, Layer> = HashMap::new();
        let containers = std::iter::once(&mut self.master)
            .chain(self.slides.iter_mut())
            .chain(std::iter::once(&mut self.detached));
        for container in containers {
            pool.extend(container.take_all().into_iter().map(|l| (l.id(), l)));
        }

        let ctx = Arc::clone(&self.ctx);
        let mut build = |entries: Vec<(u32, LayerKind)>| {
            let mut container = LayerContainer::new();
            for (id, kind) in entries {
                let layer = match pool.remove(&id) {
                    Some(layer) if layer.kind() == kind => layer,
                    _ => Layer::with_id(id, kind, &ctx),
                };
                if let Err(e) = container.add(layer) {
                    tracing::warn!("Ignoring structure entry: {}", e);
                }
            }
            container
        };

        self.master = build(master);
        self.slide_names.clear();
        self.slides = slides
            .into_iter()
            .map(|(name, entries)| {
                self.slide_names.push(name);
                build(entries)
            })
            .collect();

        if !pool.is_empty() {
            tracing::debug!(count = pool.len(), "Dropping layers no longer in the composition");
        }
        drop(pool);
        self.refresh_structure();
    }
}

/// Selection and crossfade state as read from a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideState {
    pub selected: i32,
    pub previous_selected: i32,
    pub triggered: i32,
    pub previous_triggered: i32,
    pub fade: f32,
}

impl SlideState {
    pub fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        Ok(Self {
            selected: r.i32()?,
            previous_selected: r.i32()?,
            triggered: r.i32()?,
            previous_triggered: r.i32()?,
            fade: r.f32()?,
        })
    }
}

/// Container membership as read from a frame: `(id, kind)` entries for the
/// master container, then a name and entries per slide
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructureRecord {
    pub master: Vec<(u32, LayerKind)>,
    pub slides: Vec<(String, Vec<(u32, LayerKind)>)>,
}

impl StructureRecord {
    pub fn read(r: &mut SyncReader<'_>) -> Result<Self, SyncError> {
        let master = decode_entries(r)?;
        let count = r.u32()? as usize;
        let mut slides = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let name = r.string()?;
            slides.push((name, decode_entries(r)?));
        }
        Ok(Self { master, slides })
    }
}

impl std::fmt::Debug for SlideContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlideContainer")
            .field("master", &self.master.len())
            .field("slides", &self.slides.len())
            .field("selected", &self.selected)
            .field("triggered", &self.triggered)
            .field("fade", &self.fade)
            .finish_non_exhaustive()
    }
}

fn slide_index(index: i32, count: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|&i| i < count)
}

fn encode_entries(w: &mut SyncWriter, container: &LayerContainer) {
    w.put_u32(container.len() as u32);
    for layer in container.iter() {
        w.put_u32(layer.id());
        layer.kind().write(w);
    }
}

fn decode_entries(r: &mut SyncReader<'_>) -> Result<Vec<(u32, LayerKind)>, SyncError> {
    let count = r.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        entries.push((r.u32()?, LayerKind::read(r)?));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextServices, Role};
    use crate::settings::ClusterSettings;

    fn context(role: Role) -> Arc<ClusterContext> {
        ClusterContext::new(role, ClusterSettings::default(), ContextServices::default())
    }

    #[test]
    fn test_crossfade_is_complementary() {
        let ctx = context(Role::Master);
        let mut slides = SlideContainer::new(&ctx);
        let a = slides.add_slide("A");
        let b = slides.add_slide("B");
        let on_a = slides.add_layer(Some(a), Layer::new(LayerKind::Image, &ctx)).unwrap();
        let on_b = slides.add_layer(Some(b), Layer::new(LayerKind::Image, &ctx)).unwrap();
        let shared = slides.add_layer(Some(a), Layer::new(LayerKind::Image, &ctx)).unwrap();
        slides.layer_mut(shared).unwrap().set_keep_visible(1);

        slides.trigger(a as i32).unwrap();
        slides.set_fade(100.0);
        slides.trigger(b as i32).unwrap();
        slides.set_fade(25.0);

        let alpha = |id| slides.layer(id).unwrap().alpha();
        assert!((alpha(on_b) - 0.25).abs() < 1e-6);
        assert!((alpha(on_a) - 0.75).abs() < 1e-6);
        assert_eq!(alpha(shared), 1.0);
        assert!((alpha(on_a) + alpha(on_b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_slide_adjusts_indices() {
        let ctx = context(Role::Master);
        let mut slides = SlideContainer::new(&ctx);
        for name in ["A", "B", "C"] {
            slides.add_slide(name);
        }
        slides.select(2).unwrap();
        slides.trigger(1).unwrap();
        slides.remove_slide(1).unwrap();

        assert_eq!(slides.selected(), 1);
        assert_eq!(slides.triggered(), MASTER_SLIDE);
        assert_eq!(slides.slide_name(1), Some("C"));
        assert!(slides.select(5).is_err());
    }

    #[test]
    fn test_structure_round_trip_keeps_known_layers() {
        let master_ctx = context(Role::Master);
        let mut master = SlideContainer::new(&master_ctx);
        let slide = master.add_slide("Intro");
        let image = master.add_layer(Some(slide), Layer::new(LayerKind::Image, &master_ctx)).unwrap();
        let text = master.add_layer(None, Layer::new(LayerKind::Text, &master_ctx)).unwrap();

        let node_ctx = context(Role::Node);
        let mut node = SlideContainer::new(&node_ctx);
        node.ensure_layer(image, LayerKind::Image).unwrap().set_name("kept");
        node.ensure_layer(900, LayerKind::Pdf);
        assert_eq!(node.locate(image), Some(LayerLocation::Detached));

        let mut w = SyncWriter::new();
        master.encode_structure(&mut w);
        let bytes = w.freeze();
        node.decode_structure(&mut SyncReader::new(&bytes)).unwrap();

        assert_eq!(node.slide_name(0), Some("Intro"));
        assert_eq!(node.locate(image), Some(LayerLocation::Slide(0)));
        assert_eq!(node.locate(text), Some(LayerLocation::Master));
        assert_eq!(node.layer(image).unwrap().name(), "kept");
        assert!(node.layer(900).is_none());
        assert_eq!(node.matrix().slide_count(), 1);
    }

    #[test]
    fn test_reset_drops_locked_layers_and_slides() {
        let ctx = context(Role::Master);
        let mut slides = SlideContainer::new(&ctx);
        let slide = slides.add_slide("A");
        let locked = slides.add_layer(None, Layer::new(LayerKind::Image, &ctx)).unwrap();
        slides.layer_mut(locked).unwrap().set_locked(true);
        slides.add_layer(Some(slide), Layer::new(LayerKind::Text, &ctx)).unwrap();
        slides.trigger(0).unwrap();

        assert_eq!(slides.clear().len(), 1);
        assert_eq!(slides.layer_count(), 1);

        assert_eq!(slides.reset().len(), 1);
        assert_eq!(slides.layer_count(), 0);
        assert_eq!(slides.slide_count(), 0);
        assert_eq!(slides.triggered(), MASTER_SLIDE);
        assert!(slides.structure_tracker().need_sync());
    }

    #[test]
    fn test_ensure_layer_replaces_wrong_kind() {
        let ctx = context(Role::Node);
        let mut slides = SlideContainer::new(&ctx);
        slides.ensure_layer(7, LayerKind::Image);
        let layer = slides.ensure_layer(7, LayerKind::Video).unwrap();
        assert_eq!(layer.kind(), LayerKind::Video);
        assert_eq!(slides.layer_count(), 1);
    }
}
