use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::timeout,
};

use crate::{
    error::DeliveryError,
    message::{Message, write_line},
};

pub type ClientId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound half of one client connection.
///
/// Writes go through an async mutex so concurrent broadcasts never interleave
/// inside a line. Once closed, the sink silently drops further lines. A write
/// that fails, times out, or is cancelled also closes the sink, so a partial
/// line is never followed by another.
pub struct Sink {
    peer: Option<SocketAddr>,
    writer: Mutex<Option<BoxedWriter>>,
}

impl Sink {
    pub fn new<W>(peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writes one line within `write_timeout`. Returns `Ok(false)` when the
    /// sink was already closed.
    pub async fn send_line(
        &self,
        message: &Message,
        write_timeout: Duration,
    ) -> Result<bool, DeliveryError> {
        let mut slot = self.writer.lock().await;
        // The writer only goes back into the slot after a complete write.
        let Some(mut writer) = slot.take() else {
            return Ok(false);
        };

        match timeout(write_timeout, write_line(&mut writer, message)).await {
            Ok(Ok(())) => {
                *slot = Some(writer);
                Ok(true)
            }
            Ok(Err(err)) => Err(DeliveryError::Write(err)),
            Err(_) => Err(DeliveryError::TimedOut(write_timeout)),
        }
    }

    /// Shuts the writer down. Idempotent.
    pub async fn close(&self) -> io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Live set of client sinks shared by every session and the broadcaster.
///
/// The map lock is only ever held to insert, remove, or clone the
/// `Arc`s; no I/O happens under it.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<Sink>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a sink. The returned guard unregisters it when dropped.
    pub fn register(self: &Arc<Self>, sink: Arc<Sink>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, sink);

        Registration {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Removes a sink if present. Returns whether anything was removed.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Point-in-time copy of every registered sink.
    pub fn snapshot(&self) -> Vec<(ClientId, Arc<Sink>)> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that a sink is registered. Dropping it unregisters the sink, so a
/// session gets removed on every exit path, panics included.
#[derive(Debug)]
pub struct Registration {
    id: ClientId,
    registry: Arc<ClientRegistry>,
}

impl Registration {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

    fn sink() -> Arc<Sink> {
        let (writer, _reader) = duplex(64);
        Arc::new(Sink::new(None, writer))
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = Arc::new(ClientRegistry::new());
        let first = registry.register(sink());
        let second = registry.register(sink());

        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Arc::new(ClientRegistry::new());
        let registration = registry.register(sink());
        let id = registration.id();

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        // The guard's own removal on drop must be a no-op too.
        drop(registration);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropping_registration_removes_sink() {
        let registry = Arc::new(ClientRegistry::new());
        let registration = registry.register(sink());
        let id = registration.id();
        assert!(registry.contains(id));

        drop(registration);
        assert!(!registry.contains(id));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let registry = Arc::new(ClientRegistry::new());
        let first = registry.register(sink());
        let snapshot = registry.snapshot();

        let _second = registry.register(sink());
        drop(first);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn closed_sink_skips_lines() {
        let (writer, mut reader) = duplex(64);
        let sink = Sink::new(None, writer);

        assert!(
            sink.send_line(&Message::from("one"), WRITE_TIMEOUT)
                .await
                .expect("send")
        );
        sink.close().await.expect("close");
        assert!(sink.is_closed().await);
        assert!(
            !sink
                .send_line(&Message::from("two"), WRITE_TIMEOUT)
                .await
                .expect("send")
        );
        sink.close().await.expect("second close is a no-op");

        let mut received = String::new();
        reader.read_to_string(&mut received).await.expect("read");
        assert_eq!(received, "one\n");
    }

    #[tokio::test]
    async fn timed_out_write_closes_the_sink() {
        let (writer, mut reader) = duplex(8);
        let sink = Sink::new(None, writer);

        let first = sink
            .send_line(&Message::from("first-long-line"), WRITE_TIMEOUT)
            .await;
        assert!(matches!(first, Err(DeliveryError::TimedOut(_))));
        assert!(sink.is_closed().await);

        // The peer catches up; the next line must not be glued onto the cut one.
        let second = sink
            .send_line(&Message::from("second"), WRITE_TIMEOUT)
            .await
            .expect("closed sink skips");
        assert!(!second);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, b"first-lo");
    }

    #[tokio::test]
    async fn cancelled_write_closes_the_sink() {
        let (writer, _reader) = duplex(4);
        let sink = Sink::new(None, writer);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            sink.send_line(&Message::from("never fits"), Duration::from_secs(60)),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(sink.is_closed().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mutation_never_exposes_partial_state() {
        let registry = Arc::new(ClientRegistry::new());
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let registration = registry.register(sink());
                    let snapshot = registry.snapshot();
                    let ids: HashSet<_> = snapshot.iter().map(|(id, _)| *id).collect();
                    assert_eq!(ids.len(), snapshot.len(), "duplicate ids in snapshot");
                    assert!(ids.contains(&registration.id()));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.expect("task panicked");
        }
        assert!(registry.is_empty());
    }
}
