//! Source file watcher
//!
//! Layers register the files they display; the watcher reports a file once
//! it changed on disk and has been quiet for the debounce interval. The slide
//! container polls it every frame and tells the affected layers to reload.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::time::{Duration, Instant};

/// Watches layer source files for modifications
pub struct SourceWatcher {
    /// The file watcher (kept alive to maintain watch)
    watcher: RecommendedWatcher,
    /// Receiver for file change events
    receiver: Receiver<Result<Event, notify::Error>>,
    /// Watched files, with the number of layers using each
    files: HashMap<PathBuf, usize>,
    /// Watched directories, with the number of watched files in each
    directories: HashMap<PathBuf, usize>,
    /// Changed files waiting for the debounce interval to pass
    pending: HashMap<PathBuf, Instant>,
    debounce_duration: Duration,
}

impl SourceWatcher {
    pub fn new() -> Result<Self, notify::Error> {
        Self::with_debounce(Duration::from_millis(250))
    }

    pub fn with_debounce(debounce_duration: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher,
            receiver: rx,
            files: HashMap::new(),
            directories: HashMap::new(),
            pending: HashMap::new(),
            debounce_duration,
        })
    }

    /// Start watching a file. Nested calls for the same file are counted.
    pub fn watch(&mut self, file: &Path) {
        let file = normalize(file);
        let count = self.files.entry(file.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return;
        }

        let Some(dir) = file.parent().map(Path::to_path_buf) else {
            return;
        };
        let dir_count = self.directories.entry(dir.clone()).or_insert(0);
        *dir_count += 1;
        if *dir_count == 1 {
            if let Err(e) = self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                tracing::warn!("Cannot watch {}: {}", dir.display(), e);
            } else {
                tracing::debug!("Watching {}", dir.display());
            }
        }
    }

    /// Stop watching a file once its last user is gone
    pub fn unwatch(&mut self, file: &Path) {
        let file = normalize(file);
        let Some(count) = self.files.get_mut(&file) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.files.remove(&file);
        self.pending.remove(&file);

        let Some(dir) = file.parent().map(Path::to_path_buf) else {
            return;
        };
        if let Some(dir_count) = self.directories.get_mut(&dir) {
            *dir_count -= 1;
            if *dir_count == 0 {
                self.directories.remove(&dir);
                let _ = self.watcher.unwatch(&dir);
            }
        }
    }

    pub fn is_watching(&self, file: &Path) -> bool {
        self.files.contains_key(&normalize(file))
    }

    /// Drain file events and return watched files whose change has settled
    pub fn poll(&mut self) -> Vec<PathBuf> {
        loop {
            match self.receiver.try_recv() {
                Ok(Ok(event)) => {
                    if event.kind.is_access() {
                        continue;
                    }
                    for path in event.paths {
                        let path = normalize(&path);
                        if self.files.contains_key(&path) {
                            self.pending.insert(path, Instant::now());
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Source watcher error: {:?}", e);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::error!("Source watcher channel disconnected");
                    break;
                }
            }
        }

        let debounce = self.debounce_duration;
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| last.elapsed() >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &settled {
            self.pending.remove(path);
            tracing::info!("Source changed: {}", path.display());
        }
        settled
    }
}

/// Canonicalize when possible so watcher events match registered paths
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_watch_counts_users() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image.png");
        std::fs::write(&file, b"a").unwrap();

        let mut watcher = SourceWatcher::new().unwrap();
        watcher.watch(&file);
        watcher.watch(&file);
        watcher.unwatch(&file);
        assert!(watcher.is_watching(&file));
        watcher.unwatch(&file);
        assert!(!watcher.is_watching(&file));
    }

    #[test]
    fn test_modification_is_reported_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image.png");
        std::fs::write(&file, b"first").unwrap();

        let mut watcher = SourceWatcher::with_debounce(Duration::from_millis(20)).unwrap();
        watcher.watch(&file);
        std::fs::write(&file, b"second version").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut changed = Vec::new();
        while changed.is_empty() && Instant::now() < deadline {
            changed = watcher.poll();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(changed, vec![normalize(&file)]);
    }
}
