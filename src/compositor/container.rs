//! Ordered layer collections
//!
//! Insertion order is draw order and sync order; a container never reorders
//! layers on its own.

use super::layer::Layer;

/// Errors from container mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    #[error("layer {0} not found")]
    NotFound(u32),
    #[error("layer {0} is locked")]
    Locked(u32),
    #[error("layer {0} is already in the container")]
    Duplicate(u32),
    #[error("slide index {0} out of range")]
    SlideOutOfRange(usize),
}

/// An ordered sequence of layers (bottom to top)
#[derive(Debug, Default)]
pub struct LayerContainer {
    layers: Vec<Layer>,
    /// Set on any add/remove/move; cleared by whoever reacts to it
    membership_changed: bool,
}

impl LayerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Add a layer on top
    pub fn add(&mut self, layer: Layer) -> Result<u32, ContainerError> {
        let index = self.layers.len();
        self.insert(index, layer)
    }

    /// Insert a layer at `index` (clamped to the end)
    pub fn insert(&mut self, index: usize, layer: Layer) -> Result<u32, ContainerError> {
        let id = layer.id();
        if self.contains(id) {
            return Err(ContainerError::Duplicate(id));
        }
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.membership_changed = true;
        tracing::debug!(layer = id, "Layer inserted at {}", index);
        Ok(id)
    }

    /// Remove a layer; locked layers stay
    pub fn remove(&mut self, id: u32) -> Result<Layer, ContainerError> {
        let index = self.position(id).ok_or(ContainerError::NotFound(id))?;
        if self.layers[index].is_locked() {
            return Err(ContainerError::Locked(id));
        }
        self.membership_changed = true;
        Ok(self.layers.remove(index))
    }

    /// Remove a layer regardless of its lock (used when replicating)
    pub fn take(&mut self, id: u32) -> Option<Layer> {
        let index = self.position(id)?;
        self.membership_changed = true;
        Some(self.layers.remove(index))
    }

    /// Move a layer to `index`, keeping the order of all others
    pub fn move_layer(&mut self, id: u32, index: usize) -> Result<(), ContainerError> {
        let from = self.position(id).ok_or(ContainerError::NotFound(id))?;
        let to = index.min(self.layers.len() - 1);
        if from == to {
            return Ok(());
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.membership_changed = true;
        Ok(())
    }

    /// Remove all layers, locked ones included
    pub fn take_all(&mut self) -> Vec<Layer> {
        if !self.layers.is_empty() {
            self.membership_changed = true;
        }
        std::mem::take(&mut self.layers)
    }

    /// Remove every unlocked layer and return them
    pub fn clear(&mut self) -> Vec<Layer> {
        let (kept, removed): (Vec<Layer>, Vec<Layer>) = self.layers.drain(..).partition(Layer::is_locked);
        self.layers = kept;
        if !removed.is_empty() {
            self.membership_changed = true;
        }
        removed
    }

    pub fn contains(&self, id: u32) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: u32) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == id)
    }

    pub fn get(&self, id: u32) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id() == id)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn get_by_index_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.iter_mut()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.layers.iter().map(Layer::id).collect()
    }

    pub fn membership_changed(&self) -> bool {
        self.membership_changed
    }

    /// Returns whether membership had changed
    pub fn take_membership_changed(&mut self) -> bool {
        std::mem::take(&mut self.membership_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::LayerKind;
    use crate::context::{ClusterContext, ContextServices, Role};
    use crate::settings::ClusterSettings;
    use std::sync::Arc;

    fn filled(n: usize) -> (Arc<ClusterContext>, LayerContainer, Vec<u32>) {
        let ctx = ClusterContext::new(Role::Master, ClusterSettings::default(), ContextServices::default());
        let mut container = LayerContainer::new();
        let ids = (0..n)
            .map(|_| container.add(Layer::new(LayerKind::Image, &ctx)).unwrap())
            .collect();
        (ctx, container, ids)
    }

    #[test]
    fn test_move_preserves_other_order() {
        let (_ctx, mut container, ids) = filled(4);
        container.take_membership_changed();

        container.move_layer(ids[0], 2).unwrap();
        assert_eq!(container.ids(), vec![ids[1], ids[2], ids[0], ids[3]]);
        assert!(container.take_membership_changed());

        container.move_layer(ids[3], 99).unwrap();
        assert_eq!(container.ids(), vec![ids[1], ids[2], ids[0], ids[3]]);
        assert!(!container.membership_changed());
    }

    #[test]
    fn test_locked_layers_survive() {
        let (_ctx, mut container, ids) = filled(3);
        container.get_mut(ids[1]).unwrap().set_locked(true);

        assert_eq!(container.remove(ids[1]).unwrap_err(), ContainerError::Locked(ids[1]));
        let removed = container.clear();
        assert_eq!(removed.len(), 2);
        assert_eq!(container.ids(), vec![ids[1]]);
        assert!(container.take(ids[1]).is_some());
    }

    #[test]
    fn test_duplicate_and_missing_ids() {
        let (ctx, mut container, ids) = filled(1);
        let twin = Layer::with_id(ids[0], LayerKind::Image, &ctx);
        assert_eq!(container.add(twin).unwrap_err(), ContainerError::Duplicate(ids[0]));
        assert_eq!(container.remove(999).unwrap_err(), ContainerError::NotFound(999));
        assert!(container.move_layer(999, 0).is_err());
    }

    #[test]
    fn test_insert_clamps_index() {
        let (ctx, mut container, ids) = filled(2);
        let id = container.insert(0, Layer::new(LayerKind::Text, &ctx)).unwrap();
        assert_eq!(container.ids(), vec![id, ids[0], ids[1]]);
        let top = container.insert(50, Layer::new(LayerKind::Text, &ctx)).unwrap();
        assert_eq!(container.position(top), Some(3));
    }
}
