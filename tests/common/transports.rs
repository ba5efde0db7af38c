//! Transports that record or refuse frames

use async_trait::async_trait;
use collabcore::backend::error::{CollabError, CollabResult};
use collabcore::backend::registry::Transport;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records every frame sent to it
#[derive(Default)]
pub struct MockTransport {
    frames: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame parsed as JSON
    pub fn frames(&self) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).expect("frames are JSON"))
            .collect()
    }

    /// The `type` of every frame, in order
    pub fn types(&self) -> Vec<String> {
        self.frames()
            .iter()
            .filter_map(|f| f["type"].as_str().map(str::to_string))
            .collect()
    }

    /// Frames of one type
    pub fn of_type(&self, kind: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, text: String) -> CollabResult<()> {
        self.frames.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Fails every send, like a socket whose peer vanished
#[derive(Default)]
pub struct FailingTransport {
    closed: AtomicBool,
}

impl FailingTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _text: String) -> CollabResult<()> {
        Err(CollabError::transport("connection reset by peer"))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
