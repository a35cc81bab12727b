//! Cross-slide visibility matrix
//!
//! For every slide layer and every slide the matrix holds a signed local
//! index relative to the slide that owns the layer:
//!
//! ```text
//! raw   = candidate slide - owner slide
//! local = raw            if raw <= 0
//!         max(raw - keep, 0) otherwise
//! ```
//!
//! where `keep` is the layer's "keep visible across N slides" value. Negative
//! values are upcoming slides (the slide right before is where preloading
//! happens), 0 means visible, 1 is the slide where the layer fades out and
//! anything above is hidden. Master layers are not part of the matrix.

use std::collections::HashMap;

use super::container::LayerContainer;

/// Visibility of a layer on one slide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Upcoming,
    Visible,
    FadeOut,
    Hidden,
}

impl Visibility {
    pub fn from_local_index(local: i32) -> Self {
        match local {
            i32::MIN..=-1 => Visibility::Upcoming,
            0 => Visibility::Visible,
            1 => Visibility::FadeOut,
            _ => Visibility::Hidden,
        }
    }
}

/// Local index of a layer owned by `owner` as seen from slide `candidate`
pub fn local_index(candidate: usize, owner: usize, keep_visible: u32) -> i32 {
    let raw = candidate as i64 - owner as i64;
    let local = if raw > 0 { (raw - keep_visible as i64).max(0) } else { raw };
    local.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    owner: usize,
    keep_visible: u32,
}

/// Local indices of all slide layers on all slides
#[derive(Debug, Default, Clone)]
pub struct VisibilityMatrix {
    slide_count: usize,
    placements: HashMap<u32, Placement>,
    /// Layer ids per owning slide, in container order
    order: Vec<Vec<u32>>,
}

impl VisibilityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from the slide containers
    pub fn rebuild(&mut self, slides: &[LayerContainer]) {
        self.slide_count = slides.len();
        self.placements.clear();
        self.order = slides
            .iter()
            .enumerate()
            .map(|(owner, container)| {
                container
                    .iter()
                    .map(|layer| {
                        self.placements.insert(
                            layer.id(),
                            Placement {
                                owner,
                                keep_visible: layer.keep_visible(),
                            },
                        );
                        layer.id()
                    })
                    .collect()
            })
            .collect();
        tracing::trace!(
            slides = self.slide_count,
            layers = self.placements.len(),
            "Visibility matrix rebuilt"
        );
    }

    /// Whether the slides differ from what the matrix was built from
    pub fn is_stale(&self, slides: &[LayerContainer]) -> bool {
        if slides.len() != self.slide_count {
            return true;
        }
        slides.iter().zip(&self.order).any(|(container, ids)| {
            container.len() != ids.len()
                || container.iter().zip(ids).any(|(layer, &id)| {
                    layer.id() != id
                        || self
                            .placements
                            .get(&id)
                            .map_or(true, |p| p.keep_visible != layer.keep_visible())
                })
        })
    }

    pub fn slide_count(&self) -> usize {
        self.slide_count
    }

    /// Slide that owns a layer
    pub fn owner(&self, layer: u32) -> Option<usize> {
        self.placements.get(&layer).map(|p| p.owner)
    }

    pub fn local_index(&self, layer: u32, slide: usize) -> Option<i32> {
        if slide >= self.slide_count {
            return None;
        }
        let placement = self.placements.get(&layer)?;
        Some(local_index(slide, placement.owner, placement.keep_visible))
    }

    pub fn visibility(&self, layer: u32, slide: usize) -> Option<Visibility> {
        self.local_index(layer, slide).map(Visibility::from_local_index)
    }

    pub fn is_visible(&self, layer: u32, slide: usize) -> bool {
        self.local_index(layer, slide) == Some(0)
    }

    fn select(&self, slide: usize, pred: impl Fn(i32) -> bool) -> Vec<u32> {
        self.order
            .iter()
            .flatten()
            .copied()
            .filter(|&id| self.local_index(id, slide).is_some_and(&pred))
            .collect()
    }

    /// Layers visible on a slide, in draw order
    pub fn visible_layers(&self, slide: usize) -> Vec<u32> {
        self.select(slide, |local| local == 0)
    }

    /// Layers whose home slide is the next one
    pub fn preload_layers(&self, slide: usize) -> Vec<u32> {
        self.select(slide, |local| local == -1)
    }

    /// Layers fully hidden on a slide
    pub fn teardown_layers(&self, slide: usize) -> Vec<u32> {
        self.select(slide, |local| local > 1)
    }
}
