//! Background content loading with a render-thread handshake
//!
//! Images, PDF pages and rendered text are decoded on a short-lived worker
//! thread. The render thread polls once per frame and never waits:
//!
//! 1. worker decodes, hands the result over, sets `content_decoded`
//! 2. render thread uploads it, sets `upload_done` and acknowledges
//! 3. worker exits and sets `thread_done`
//! 4. render thread joins the worker and resets the flags
//!
//! At most one worker runs per loader. A request made while one is in flight
//! is deferred, and only the latest deferred request is kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Load failures reported by a worker
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("content {width}x{height} exceeds maximum texture size {max}")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("rasterization failed: {0}")]
    Rasterize(String),
    #[error("worker thread failed to start: {0}")]
    Spawn(String),
}

/// Handshake flags shared with the worker
#[derive(Debug, Default)]
pub struct LoadFlags {
    pub thread_running: AtomicBool,
    pub content_decoded: AtomicBool,
    pub upload_done: AtomicBool,
    pub thread_done: AtomicBool,
}

impl LoadFlags {
    fn reset(&self) {
        self.thread_running.store(false, Ordering::Release);
        self.content_decoded.store(false, Ordering::Release);
        self.upload_done.store(false, Ordering::Release);
        self.thread_done.store(false, Ordering::Release);
    }
}

/// Outcome of one [`AsyncLoad::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPoll {
    /// No worker running
    Idle,
    /// Worker still busy, or waiting to be joined
    Pending,
    /// Content was handed to the upload callback this poll
    Uploaded,
    /// The worker reported an error this poll
    Failed,
}

type Job<T> = Box<dyn FnOnce() -> Result<T, LoadError> + Send>;

/// One-at-a-time background loader
pub struct AsyncLoad<T: Send + 'static> {
    name: String,
    flags: Arc<LoadFlags>,
    result_rx: Option<Receiver<Result<T, LoadError>>>,
    ack_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    deferred: Option<Job<T>>,
}

impl<T: Send + 'static> AsyncLoad<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: Arc::new(LoadFlags::default()),
            result_rx: None,
            ack_tx: None,
            handle: None,
            deferred: None,
        }
    }

    pub fn flags(&self) -> &LoadFlags {
        &self.flags
    }

    /// Whether a worker is running or waiting to be joined
    pub fn is_busy(&self) -> bool {
        self.flags.thread_running.load(Ordering::Acquire)
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Request a load. Returns `false` when deferred behind a running worker.
    pub fn request<F>(&mut self, job: F) -> bool
    where
        F: FnOnce() -> Result<T, LoadError> + Send + 'static,
    {
        if self.is_busy() {
            tracing::debug!(loader = %self.name, "Load in flight, deferring request");
            self.deferred = Some(Box::new(job));
            return false;
        }
        self.spawn(Box::new(job));
        true
    }

    fn spawn(&mut self, job: Job<T>) {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let (ack_tx, ack_rx) = crossbeam_channel::bounded::<()>(1);
        let flags = Arc::clone(&self.flags);
        flags.thread_running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name(format!("load-{}", self.name))
            .spawn(move || {
                let result = job();
                let _ = result_tx.send(result);
                flags.content_decoded.store(true, Ordering::Release);
                // Keep the worker alive until the upload is acknowledged or the loader is dropped
                let _ = ack_rx.recv();
                flags.thread_done.store(true, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                self.result_rx = Some(result_rx);
                self.ack_tx = Some(ack_tx);
                self.handle = Some(handle);
            }
            Err(e) => {
                tracing::error!(loader = %self.name, "{}", LoadError::Spawn(e.to_string()));
                self.flags.reset();
            }
        }
    }

    /// Advance the handshake; never blocks.
    ///
    /// `upload` runs on the calling thread with the decoded content.
    pub fn poll(&mut self, upload: impl FnOnce(T)) -> LoadPoll {
        if !self.is_busy() {
            return LoadPoll::Idle;
        }

        let flags = Arc::clone(&self.flags);
        if flags.content_decoded.load(Ordering::Acquire) && !flags.upload_done.load(Ordering::Acquire) {
            let outcome = match self.result_rx.as_ref().map(|rx| rx.try_recv()) {
                Some(Ok(Ok(content))) => {
                    upload(content);
                    LoadPoll::Uploaded
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(loader = %self.name, "Load failed: {}", e);
                    LoadPoll::Failed
                }
                Some(Err(TryRecvError::Empty)) => return LoadPoll::Pending,
                Some(Err(TryRecvError::Disconnected)) | None => LoadPoll::Failed,
            };
            flags.upload_done.store(true, Ordering::Release);
            if let Some(ack) = self.ack_tx.take() {
                let _ = ack.send(());
            }
            return outcome;
        }

        if flags.thread_done.load(Ordering::Acquire) {
            self.join();
            if let Some(job) = self.deferred.take() {
                self.spawn(job);
                return LoadPoll::Pending;
            }
            return LoadPoll::Idle;
        }

        LoadPoll::Pending
    }

    fn join(&mut self) {
        self.ack_tx = None;
        self.result_rx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(loader = %self.name, "Load worker panicked");
            }
        }
        self.flags.reset();
    }
}

impl<T: Send + 'static> Drop for AsyncLoad<T> {
    fn drop(&mut self) {
        self.deferred = None;
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn poll_until<T: Send + 'static>(
        loader: &mut AsyncLoad<T>,
        uploaded: &mut Vec<T>,
        want: LoadPoll,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if loader.poll(|v| uploaded.push(v)) == want {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_handshake_runs_to_idle() {
        let mut loader = AsyncLoad::new("test");
        let mut uploaded = Vec::new();
        assert!(loader.request(|| Ok(7u32)));
        assert!(loader.is_busy());

        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Uploaded));
        assert_eq!(uploaded, vec![7]);
        assert!(loader.flags().upload_done.load(Ordering::Acquire));

        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Idle));
        assert!(!loader.is_busy());
        assert!(!loader.flags().content_decoded.load(Ordering::Acquire));
    }

    #[test]
    fn test_request_while_busy_is_deferred_latest_wins() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let mut loader = AsyncLoad::new("test");
        let mut uploaded = Vec::new();

        assert!(loader.request(move || {
            let _ = gate_rx.recv();
            Ok(1u32)
        }));
        assert!(!loader.request(|| Ok(2)));
        assert!(!loader.request(|| Ok(3)));
        assert!(loader.has_deferred());

        gate_tx.send(()).unwrap();
        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Uploaded));
        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Uploaded));
        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Idle));
        assert_eq!(uploaded, vec![1, 3]);
    }

    #[test]
    fn test_failed_load_reports_and_resets() {
        let mut loader: AsyncLoad<u32> = AsyncLoad::new("test");
        let mut uploaded = Vec::new();
        loader.request(|| Err(LoadError::Rasterize("no rasterizer".to_string())));

        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Failed));
        assert!(poll_until(&mut loader, &mut uploaded, LoadPoll::Idle));
        assert!(uploaded.is_empty());
    }

    #[test]
    fn test_drop_joins_unacknowledged_worker() {
        let mut loader = AsyncLoad::new("test");
        loader.request(|| Ok(vec![0u8; 16]));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !loader.flags().content_decoded.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        drop(loader);
    }
}
