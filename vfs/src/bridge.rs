//! Async bridge layer.
//!
//! When a read misses every upstream layer, the bridge forwards the request
//! to an external file resolver (the embedding host) over a request/response
//! channel. Synchronous reads are unsupported on this layer: a sync lookup
//! treats it as a miss. Failures on the channel also surface as misses, which
//! the stack turns into a not-found error.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};

/// A single outstanding read forwarded to the host file resolver.
pub struct FileRequest {
    pub path: String,
    pub reply: oneshot::Sender<Option<String>>,
}

pub struct BridgeLayer {
    tx: mpsc::UnboundedSender<FileRequest>,
    enabled: AtomicBool,
    cache: Mutex<FxHashMap<String, Option<String>>>,
}

impl BridgeLayer {
    /// Create the layer plus the receiving end the host transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FileRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                enabled: AtomicBool::new(false),
                cache: Mutex::new(FxHashMap::default()),
            },
            rx,
        )
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_cache(&self) {
        self.cache.lock().clear();
    }

    pub(crate) async fn read(&self, path: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        if let Some(cached) = self.cache.lock().get(path) {
            return cached.clone();
        }
        let (reply, rx) = oneshot::channel();
        let request = FileRequest {
            path: path.to_string(),
            reply,
        };
        if self.tx.send(request).is_err() {
            tracing::debug!(path, "file resolver bridge closed");
            return None;
        }
        let result = rx.await.ok().flatten();
        self.cache.lock().insert(path.to_string(), result.clone());
        result
    }

    pub(crate) async fn exists(&self, path: &str) -> bool {
        self.read(path).await.is_some()
    }
}

/// Drive a bridge receiver with a plain lookup function. Test harnesses and
/// the CLI use this instead of a real message transport.
pub fn serve_file_requests<F>(
    mut rx: mpsc::UnboundedReceiver<FileRequest>,
    handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let _ = request.reply.send(handler(&request.path));
        }
    })
}
