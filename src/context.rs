//! Shared cluster context
//!
//! One [`ClusterContext`] is built per process and handed to every component
//! that needs process-wide state: the sync coordinator, the slide container
//! and each layer. It replaces global singletons with an object that has a
//! clear owner and an explicit [`shutdown`](ClusterContext::shutdown).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::compositor::{ContentRasterizer, SourceWatcher, UnavailableRasterizer};
use crate::loader::LoadError;
use crate::settings::{BackendKind, ClusterSettings};
use crate::video::{DecoderFactory, ProbeDecoderFactory, SelectionPolicy, TextureHandle};

/// Whether this process owns playback intent or replicates it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Node,
}

/// External collaborators plugged into the context
#[derive(Clone)]
pub struct ContextServices {
    pub general_decoder: Arc<dyn DecoderFactory>,
    pub accelerated_decoder: Arc<dyn DecoderFactory>,
    pub rasterizer: Arc<dyn ContentRasterizer>,
}

impl Default for ContextServices {
    fn default() -> Self {
        Self {
            general_decoder: Arc::new(ProbeDecoderFactory),
            accelerated_decoder: Arc::new(ProbeDecoderFactory),
            rasterizer: Arc::new(UnavailableRasterizer),
        }
    }
}

/// Page counts of opened documents, keyed by path
#[derive(Debug, Default)]
pub struct DocumentCache {
    page_counts: Mutex<HashMap<PathBuf, u32>>,
}

impl DocumentCache {
    /// Page count of a document, asking the rasterizer on first use
    pub fn page_count(&self, document: &Path, rasterizer: &dyn ContentRasterizer) -> Result<u32, LoadError> {
        if let Some(count) = self.cached(document) {
            return Ok(count);
        }
        let count = rasterizer.page_count(document)?;
        if let Ok(mut cache) = self.page_counts.lock() {
            cache.insert(document.to_path_buf(), count);
        }
        Ok(count)
    }

    pub fn cached(&self, document: &Path) -> Option<u32> {
        self.page_counts.lock().ok()?.get(document).copied()
    }

    /// Forget a document, e.g. after it changed on disk
    pub fn invalidate(&self, document: &Path) {
        if let Ok(mut cache) = self.page_counts.lock() {
            cache.remove(document);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.page_counts.lock() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.page_counts.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide state shared by the sync coordinator and all layers
pub struct ClusterContext {
    role: Role,
    settings: ClusterSettings,
    policy: SelectionPolicy,
    services: ContextServices,
    next_layer_id: AtomicU32,
    /// Global volume scale, stored as f32 bits
    volume_scale: AtomicU32,
    released_textures: Mutex<Vec<TextureHandle>>,
    documents: DocumentCache,
    watcher: Mutex<Option<SourceWatcher>>,
    shut_down: AtomicBool,
}

impl ClusterContext {
    pub fn new(role: Role, mut settings: ClusterSettings, services: ContextServices) -> Arc<Self> {
        settings.sanitize();
        let watcher = match SourceWatcher::new() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("Source file watching disabled: {}", e);
                None
            }
        };

        tracing::info!(
            role = ?role,
            redundancy = settings.sync_redundancy,
            "Cluster context created (default backend {})",
            settings.backend_policy.default_backend
        );

        Arc::new(Self {
            role,
            policy: SelectionPolicy::from_settings(&settings.backend_policy),
            settings,
            services,
            next_layer_id: AtomicU32::new(1),
            volume_scale: AtomicU32::new(1.0f32.to_bits()),
            released_textures: Mutex::new(Vec::new()),
            documents: DocumentCache::default(),
            watcher: Mutex::new(watcher),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn decoder(&self, kind: BackendKind) -> Arc<dyn DecoderFactory> {
        match kind {
            BackendKind::General => Arc::clone(&self.services.general_decoder),
            BackendKind::Accelerated => Arc::clone(&self.services.accelerated_decoder),
        }
    }

    pub fn rasterizer(&self) -> Arc<dyn ContentRasterizer> {
        Arc::clone(&self.services.rasterizer)
    }

    pub fn documents(&self) -> &DocumentCache {
        &self.documents
    }

    /// Allocate a fresh layer id
    pub fn next_layer_id(&self) -> u32 {
        self.next_layer_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure future ids do not collide with one chosen elsewhere
    pub fn reserve_layer_id(&self, id: u32) {
        self.next_layer_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }

    pub fn volume_scale(&self) -> f32 {
        f32::from_bits(self.volume_scale.load(Ordering::Relaxed))
    }

    pub fn set_volume_scale(&self, scale: f32) {
        let scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
        self.volume_scale.store(scale.to_bits(), Ordering::Relaxed);
    }

    /// Hand a texture back for deletion on the render thread
    pub fn queue_texture_release(&self, handle: TextureHandle) {
        if let Ok(mut released) = self.released_textures.lock() {
            released.push(handle);
        }
    }

    /// Textures whose layers are gone; the renderer deletes them
    pub fn drain_released_textures(&self) -> Vec<TextureHandle> {
        self.released_textures
            .lock()
            .map(|mut released| std::mem::take(&mut *released))
            .unwrap_or_default()
    }

    pub fn watch_source(&self, file: &Path) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(watcher) = watcher.as_mut() {
                watcher.watch(file);
            }
        }
    }

    pub fn unwatch_source(&self, file: &Path) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(watcher) = watcher.as_mut() {
                watcher.unwatch(file);
            }
        }
    }

    /// Source files that changed since the last poll
    pub fn poll_source_changes(&self) -> Vec<PathBuf> {
        let changed = match self.watcher.lock() {
            Ok(mut watcher) => watcher.as_mut().map(SourceWatcher::poll).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for path in &changed {
            self.documents.invalidate(path);
        }
        changed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the file watcher and drop cached documents
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut watcher) = self.watcher.lock() {
            *watcher = None;
        }
        self.documents.clear();
        tracing::info!(role = ?self.role, "Cluster context shut down");
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("role", &self.role)
            .field("next_layer_id", &self.next_layer_id)
            .field("volume_scale", &self.volume_scale())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRasterizer(std::sync::atomic::AtomicU32);

    impl ContentRasterizer for CountingRasterizer {
        fn page_count(&self, _document: &Path) -> Result<u32, LoadError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(12)
        }
    }

    #[test]
    fn test_layer_ids_skip_reserved() {
        let ctx = ClusterContext::new(Role::Master, ClusterSettings::default(), ContextServices::default());
        assert_eq!(ctx.next_layer_id(), 1);
        ctx.reserve_layer_id(40);
        assert_eq!(ctx.next_layer_id(), 41);
        ctx.reserve_layer_id(3);
        assert_eq!(ctx.next_layer_id(), 42);
    }

    #[test]
    fn test_released_textures_drain_once() {
        let ctx = ClusterContext::new(Role::Node, ClusterSettings::default(), ContextServices::default());
        ctx.queue_texture_release(TextureHandle(4));
        ctx.queue_texture_release(TextureHandle(9));
        assert_eq!(ctx.drain_released_textures(), vec![TextureHandle(4), TextureHandle(9)]);
        assert!(ctx.drain_released_textures().is_empty());
    }

    #[test]
    fn test_document_cache_asks_once() {
        let cache = DocumentCache::default();
        let rasterizer = CountingRasterizer(Default::default());
        let path = Path::new("deck.pdf");
        assert_eq!(cache.page_count(path, &rasterizer).unwrap(), 12);
        assert_eq!(cache.page_count(path, &rasterizer).unwrap(), 12);
        assert_eq!(rasterizer.0.load(Ordering::SeqCst), 1);

        cache.invalidate(path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shutdown_clears_cache() {
        let ctx = ClusterContext::new(Role::Master, ClusterSettings::default(), ContextServices::default());
        ctx.documents().page_count(Path::new("a.pdf"), &CountingRasterizer(Default::default())).unwrap();
        ctx.shutdown();
        assert!(ctx.is_shut_down());
        assert!(ctx.documents().is_empty());
        assert!(ctx.poll_source_changes().is_empty());
    }

    #[test]
    fn test_volume_scale_rejects_nan() {
        let ctx = ClusterContext::new(Role::Master, ClusterSettings::default(), ContextServices::default());
        ctx.set_volume_scale(0.5);
        assert_eq!(ctx.volume_scale(), 0.5);
        ctx.set_volume_scale(f32::NAN);
        assert_eq!(ctx.volume_scale(), 1.0);
    }
}
