//! Presence mirrors for persistence tests

use async_trait::async_trait;
use collabcore::backend::error::{CollabError, CollabResult};
use collabcore::backend::presence::PresenceMirror;
use collabcore::shared::PresenceRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct RecordingMirror {
    writes: Mutex<Vec<PresenceRecord>>,
}

impl RecordingMirror {
    pub fn writes(&self) -> Vec<PresenceRecord> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresenceMirror for RecordingMirror {
    async fn upsert_presence(&self, record: &PresenceRecord) -> CollabResult<()> {
        self.writes.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Mirror whose database is always down
#[derive(Default)]
pub struct FailingMirror;

#[async_trait]
impl PresenceMirror for FailingMirror {
    async fn upsert_presence(&self, _record: &PresenceRecord) -> CollabResult<()> {
        Err(CollabError::persistence("database unavailable"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Mirror whose first write is slow, like a cold connection pool
#[derive(Default)]
pub struct SlowFirstMirror {
    warmed: AtomicBool,
    inner: RecordingMirror,
}

impl SlowFirstMirror {
    pub fn writes(&self) -> Vec<PresenceRecord> {
        self.inner.writes()
    }
}

#[async_trait]
impl PresenceMirror for SlowFirstMirror {
    async fn upsert_presence(&self, record: &PresenceRecord) -> CollabResult<()> {
        if !self.warmed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.upsert_presence(record).await
    }

    fn name(&self) -> &'static str {
        "slow-first"
    }
}
