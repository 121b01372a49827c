// mot-summary-rs/src/stream_registry.rs
//
// Per-request ownership of in-flight summary streams.
//
// Each chat request inserts its model stream under a fresh UUID and
// exactly one stream request may claim it afterwards. Concurrent requests
// therefore never see each other's streams.

use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm_client::SummaryStream;

/// Upper bound on unclaimed streams; the oldest entry is evicted when a
/// new stream would exceed it, so abandoned chats cannot grow memory.
pub const MAX_PENDING_STREAMS: usize = 32;

struct PendingStream {
    seq: u64,
    stream: SummaryStream,
}

struct RegistryInner {
    next_seq: u64,
    map: HashMap<Uuid, PendingStream>,
}

/// Registry of streams waiting to be consumed, keyed by request id.
pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_seq: 0,
                map: HashMap::new(),
            }),
        }
    }

    /// Store a stream and return the id the client uses to claim it.
    pub async fn insert(&self, stream: SummaryStream) -> Uuid {
        let mut inner = self.inner.lock().await;

        if inner.map.len() >= MAX_PENDING_STREAMS {
            let oldest = inner
                .map
                .iter()
                .min_by_key(|(_, pending)| pending.seq)
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                inner.map.remove(&id);
                log::warn!("Stream registry full; evicted unclaimed stream {}", id);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let id = Uuid::new_v4();
        inner.map.insert(id, PendingStream { seq, stream });
        id
    }

    /// Take ownership of a pending stream. A stream can be claimed at most
    /// once; later claims for the same id return `None`.
    pub async fn claim(&self, id: &Uuid) -> Option<SummaryStream> {
        self.inner
            .lock()
            .await
            .map
            .remove(id)
            .map(|pending| pending.stream)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
