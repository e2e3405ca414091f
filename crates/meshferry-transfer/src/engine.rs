//! Single-writer transfer engine: one per peer connection.
//!
//! All inbound packets for a connection flow through
//! [`TransferEngine::handle_packet`] on one `&mut self` path, so chunk
//! buffers and retry counters never see concurrent mutation. Outbound
//! packets leave through an mpsc outbox the external transport drains;
//! notifications leave through an event channel the external UI drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use meshferry_proto::packet::{percent_to_wire, wire_to_percent};
use meshferry_proto::{FileDescriptor, FileHash, Packet, RateState, SIZE_TOO_LARGE};
use meshferry_store::ContentStore;
use tokio::sync::mpsc;

use crate::assembler::{ChunkAssembler, ChunkOutcome};
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::events::TransferEvent;
use crate::retransmit::{RetransmissionCoordinator, RetryDecision, resend_packets};
use crate::splitter::FileSplitter;

/// One inbound file being reassembled
struct ReceiveSession {
    assembler: ChunkAssembler,
    retry: RetransmissionCoordinator,
}

/// One outbound file kept around to serve retransmissions
struct SendSession {
    descriptor: FileDescriptor,
    chunks: Vec<Vec<u8>>,
}

/// Chunks that arrived ahead of their announce
struct OrphanBuffer {
    chunks: Vec<(u16, Vec<u8>)>,
    last_seen: Instant,
}

/// Transfer engine for one peer connection.
///
/// The one [`RateState`] is shared by every file moving over the
/// connection; a speed update in the middle of two concurrent transfers
/// re-paces both. That coupling is part of the protocol.
pub struct TransferEngine {
    peer: String,
    config: TransferConfig,
    splitter: FileSplitter,
    rate: Arc<RateState>,
    receiving: HashMap<FileHash, ReceiveSession>,
    sending: HashMap<FileHash, SendSession>,
    orphans: HashMap<FileHash, OrphanBuffer>,
    store: ContentStore,
    outbox: mpsc::Sender<Vec<u8>>,
    events: mpsc::Sender<TransferEvent>,
}

impl TransferEngine {
    /// Create an engine for the connection to `peer`.
    ///
    /// `outbox` carries encoded packets to the external transport;
    /// `events` carries notifications to the external consumer.
    pub fn new(
        peer: impl Into<String>,
        config: TransferConfig,
        store: ContentStore,
        outbox: mpsc::Sender<Vec<u8>>,
        events: mpsc::Sender<TransferEvent>,
    ) -> Self {
        let splitter = FileSplitter::from_config(&config);
        Self {
            peer: peer.into(),
            config,
            splitter,
            rate: Arc::new(RateState::default()),
            receiving: HashMap::new(),
            sending: HashMap::new(),
            orphans: HashMap::new(),
            store,
            outbox,
            events,
        }
    }

    /// Shared pacing state for this connection
    #[must_use]
    pub fn rate(&self) -> Arc<RateState> {
        Arc::clone(&self.rate)
    }

    /// Peer this connection talks to
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The engine's content store
    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Mutable access to the content store (knowledge merges)
    pub fn store_mut(&mut self) -> &mut ContentStore {
        &mut self.store
    }

    /// Number of receive sessions in flight
    #[must_use]
    pub fn active_receives(&self) -> usize {
        self.receiving.len()
    }

    /// Announce and queue a file for the peer.
    ///
    /// Splits the content, announces the descriptor, queues every chunk
    /// and keeps the send buffer for retransmissions.
    ///
    /// # Errors
    ///
    /// [`TransferError::FileTooLarge`] when the size or chunk count
    /// overflows the wire fields; the denial announce still goes out so
    /// the peer stops waiting. [`TransferError::ChannelClosed`] when the
    /// transport is gone.
    pub async fn offer_file(
        &mut self,
        name: &str,
        content: &[u8],
    ) -> Result<FileDescriptor, TransferError> {
        let descriptor = self.splitter.describe(name, content);

        if descriptor.is_too_large() {
            tracing::warn!(name, len = content.len(), "file too large to send");
            self.send_packet(&Packet::FileAnnounce {
                hash: descriptor.hash,
                size: SIZE_TOO_LARGE,
                total_chunks: 0,
                name: descriptor.name.clone(),
            })
            .await?;
            return Err(TransferError::FileTooLarge {
                name: descriptor.name,
            });
        }

        let chunks = self.splitter.split(content);
        self.send_announce_and_chunks(&descriptor, &chunks).await?;

        tracing::info!(
            hash = %descriptor.hash,
            name = descriptor.name,
            size = descriptor.size,
            chunks = chunks.len(),
            "file offered"
        );

        self.sending.insert(
            descriptor.hash,
            SendSession {
                descriptor: descriptor.clone(),
                chunks,
            },
        );
        Ok(descriptor)
    }

    /// Ask the peer to send a file we know of, at our current pace
    ///
    /// # Errors
    ///
    /// [`TransferError::ChannelClosed`] when the transport is gone.
    pub async fn request_file(&mut self, hash: FileHash, size: u32) -> Result<(), TransferError> {
        let rate = self.rate.code();
        self.send_packet(&Packet::FileRequest { hash, size, rate })
            .await
    }

    /// Name ourselves on the mesh
    ///
    /// # Errors
    ///
    /// [`TransferError::ChannelClosed`] when the transport is gone.
    pub async fn announce_self(&mut self, name: &str) -> Result<(), TransferError> {
        self.send_packet(&Packet::PeerAnnounce {
            name: name.to_owned(),
        })
        .await
    }

    /// Set our pacing interval and tell the peer
    ///
    /// # Errors
    ///
    /// [`TransferError::ChannelClosed`] when the transport is gone.
    pub async fn announce_speed(&mut self, wait_seconds: f64) -> Result<(), TransferError> {
        self.rate.set_wait(wait_seconds);
        let rate = self.rate.code();
        self.send_packet(&Packet::SpeedUpdate { rate }).await
    }

    /// Process one inbound packet.
    ///
    /// Codec failures (truncated, malformed, unknown opcode) drop the
    /// packet with a log line and are not errors to the caller; the
    /// retransmission loop recovers the loss.
    ///
    /// # Errors
    ///
    /// Store failures (including integrity errors) and a closed
    /// transport channel.
    pub async fn handle_packet(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "dropping undecodable packet");
                return Ok(());
            }
        };

        match packet {
            Packet::FileAnnounce {
                hash,
                size,
                total_chunks,
                name,
            } => self.handle_announce(hash, size, total_chunks, name).await,
            Packet::DataChunk {
                hash,
                index,
                payload,
            } => self.accept_chunk(hash, index, &payload).await,
            Packet::SpeedUpdate { rate } => {
                self.rate.set_code(rate);
                tracing::debug!(rate, "peer updated pacing");
                Ok(())
            }
            Packet::FileRequest { hash, size, rate } => {
                self.rate.set_code(rate);
                self.handle_file_request(hash, size).await
            }
            Packet::RetransmitRequest {
                hash,
                rate,
                percent,
                missing,
            } => {
                self.rate.set_code(rate);
                self.handle_retransmit_request(hash, percent, &missing).await
            }
            Packet::FileHash { hash } => {
                if self.sending.remove(&hash).is_some() {
                    tracing::info!(%hash, "peer confirmed file, send buffer released");
                }
                self.emit(TransferEvent::PeerFinished { hash }).await;
                Ok(())
            }
            Packet::PeerAnnounce { name } => {
                let name = name.trim().to_owned();
                if !name.is_empty() {
                    self.peer = name.clone();
                    self.emit(TransferEvent::PeerSeen { name }).await;
                }
                Ok(())
            }
        }
    }

    /// Drive retransmission timers and orphan aging from the caller's
    /// clock; equivalent to [`TransferEngine::tick`] with an explicit
    /// `now`.
    ///
    /// # Errors
    ///
    /// [`TransferError::ChannelClosed`] when the transport is gone.
    pub async fn tick_at(&mut self, now: Instant) -> Result<(), TransferError> {
        let mut requests = Vec::new();
        let mut aborts = Vec::new();

        for (hash, session) in &mut self.receiving {
            match session.retry.poll(now) {
                RetryDecision::Wait => {}
                RetryDecision::Request => {
                    let missing = session.assembler.missing_capped();
                    if missing.is_empty() {
                        continue;
                    }
                    requests.push(Packet::RetransmitRequest {
                        hash: *hash,
                        rate: self.rate.code(),
                        percent: percent_to_wire(session.assembler.percent_received()),
                        missing,
                    });
                }
                RetryDecision::Abort => aborts.push(*hash),
            }
        }

        for request in requests {
            if let Packet::RetransmitRequest { hash, missing, .. } = &request {
                tracing::debug!(%hash, missing = missing.len(), "requesting retransmission");
            }
            self.send_packet(&request).await?;
        }

        for hash in aborts {
            if let Some(mut session) = self.receiving.remove(&hash) {
                session.assembler.abort();
                let name = session.assembler.descriptor().name.clone();
                tracing::warn!(%hash, name, "retry budget exhausted, transfer aborted");
                self.emit(TransferEvent::Aborted { hash, name }).await;
            }
        }

        // Orphans that never saw their announce age out on the same
        // clock as a whole retry cycle
        let ttl = self.config.inactivity_timeout * (self.config.retransmit_limit + 1);
        self.orphans.retain(|hash, orphan| {
            let keep = now.duration_since(orphan.last_seen) < ttl;
            if !keep {
                tracing::debug!(%hash, "unannounced chunks aged out");
            }
            keep
        });

        Ok(())
    }

    /// Drive retransmission timers and orphan aging.
    ///
    /// Call on a fixed interval; expiry is not an error, just the
    /// trigger for the next protocol step.
    ///
    /// # Errors
    ///
    /// [`TransferError::ChannelClosed`] when the transport is gone.
    pub async fn tick(&mut self) -> Result<(), TransferError> {
        self.tick_at(Instant::now()).await
    }

    /// Cancel a receive session, releasing its buffers and timers. No
    /// partial content reaches the store. Returns whether a session
    /// existed.
    pub async fn cancel(&mut self, hash: FileHash) -> bool {
        match self.receiving.remove(&hash) {
            Some(mut session) => {
                session.assembler.abort();
                let name = session.assembler.descriptor().name.clone();
                tracing::info!(%hash, name, "transfer cancelled");
                self.emit(TransferEvent::Aborted { hash, name }).await;
                true
            }
            None => false,
        }
    }

    async fn handle_announce(
        &mut self,
        hash: FileHash,
        size: u32,
        total_chunks: u16,
        name: String,
    ) -> Result<(), TransferError> {
        if size == SIZE_TOO_LARGE {
            // Denied before any buffer exists
            tracing::info!(%hash, name, "announce rejected: file too large");
            self.emit(TransferEvent::AnnounceRejected { hash, name }).await;
            return Ok(());
        }

        if self.receiving.contains_key(&hash) {
            tracing::debug!(%hash, "duplicate announce ignored");
            return Ok(());
        }

        let descriptor = FileDescriptor {
            hash,
            size,
            total_chunks,
            name,
        };

        let assembler = match ChunkAssembler::new(descriptor.clone()) {
            Ok(assembler) => assembler,
            Err(e) => {
                tracing::warn!(%hash, error = %e, "announce dropped");
                return Ok(());
            }
        };

        // Knowledge row before any chunk: even if the transfer dies we
        // know the peer has this file
        let peer = self.peer.clone();
        self.store
            .record(&peer, hash, size, &descriptor.name, None)
            .await?;

        tracing::info!(
            %hash,
            name = descriptor.name,
            size,
            total_chunks,
            "file announced"
        );
        self.emit(TransferEvent::AnnounceReceived { descriptor }).await;

        self.receiving.insert(
            hash,
            ReceiveSession {
                assembler,
                retry: RetransmissionCoordinator::new(
                    self.config.inactivity_timeout,
                    self.config.retransmit_limit,
                    Instant::now(),
                ),
            },
        );

        // Zero-chunk files have nothing left to wait for
        if self
            .receiving
            .get(&hash)
            .is_some_and(|s| s.assembler.is_complete())
        {
            if let Some(session) = self.receiving.remove(&hash) {
                self.finalize(session).await?;
            }
            return Ok(());
        }

        // Unordered transport: chunks may have beaten their announce
        if let Some(orphans) = self.orphans.remove(&hash) {
            tracing::debug!(%hash, count = orphans.chunks.len(), "draining early chunks");
            for (index, payload) in orphans.chunks {
                self.accept_chunk(hash, index, &payload).await?;
            }
        }

        Ok(())
    }

    async fn accept_chunk(
        &mut self,
        hash: FileHash,
        index: u16,
        payload: &[u8],
    ) -> Result<(), TransferError> {
        let Some(session) = self.receiving.get_mut(&hash) else {
            if self.sending.contains_key(&hash) {
                // Our own chunk echoed back through the mesh
                return Ok(());
            }
            self.park_orphan(hash, index, payload);
            return Ok(());
        };

        match session.assembler.store(index, payload) {
            Ok(ChunkOutcome::Stored) => {
                session.retry.on_progress(Instant::now());
                let descriptor = session.assembler.descriptor();
                let event = TransferEvent::Progress {
                    hash,
                    name: descriptor.name.clone(),
                    received: session.assembler.received(),
                    total: descriptor.total_chunks,
                    percent: session.assembler.percent_received(),
                };
                self.emit(event).await;
                Ok(())
            }
            Ok(ChunkOutcome::Completed) => {
                if let Some(session) = self.receiving.remove(&hash) {
                    self.finalize(session).await?;
                }
                Ok(())
            }
            Ok(ChunkOutcome::Duplicate) => Ok(()),
            Err(TransferError::ChunkOutOfRange { index, total }) => {
                tracing::warn!(%hash, index, total, "chunk outside announced range dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn park_orphan(&mut self, hash: FileHash, index: u16, payload: &[u8]) {
        let orphan = self.orphans.entry(hash).or_insert_with(|| OrphanBuffer {
            chunks: Vec::new(),
            last_seen: Instant::now(),
        });
        orphan.last_seen = Instant::now();

        if orphan.chunks.len() >= self.config.orphan_limit {
            tracing::warn!(%hash, index, "orphan buffer full, chunk dropped");
            return;
        }
        if orphan.chunks.iter().all(|(i, _)| *i != index) {
            orphan.chunks.push((index, payload.to_vec()));
        }
    }

    /// Commit a completed receive: persist, tell the peer, tell the
    /// consumer.
    async fn finalize(&mut self, mut session: ReceiveSession) -> Result<(), TransferError> {
        let descriptor = session.assembler.descriptor().clone();
        let Some(content) = session.assembler.take_content() else {
            return Ok(());
        };

        let peer = self.peer.clone();
        self.store
            .record(
                &peer,
                descriptor.hash,
                descriptor.size,
                &descriptor.name,
                Some(&content),
            )
            .await?;

        self.send_packet(&Packet::FileHash {
            hash: descriptor.hash,
        })
        .await?;

        tracing::info!(
            hash = %descriptor.hash,
            name = descriptor.name,
            size = descriptor.size,
            "file reassembled and committed"
        );
        self.emit(TransferEvent::Completed {
            hash: descriptor.hash,
            name: descriptor.name,
            size: descriptor.size,
        })
        .await;

        Ok(())
    }

    async fn handle_file_request(&mut self, hash: FileHash, size: u32) -> Result<(), TransferError> {
        if let Some(send) = self.sending.get(&hash) {
            let descriptor = send.descriptor.clone();
            let chunks = send.chunks.clone();
            tracing::debug!(%hash, "serving file request from send buffer");
            return self.send_announce_and_chunks(&descriptor, &chunks).await;
        }

        match self.store.lookup(hash, size).await? {
            Some(found) => match found.content {
                Some(content) => {
                    tracing::debug!(%hash, path = found.path, "serving file request from store");
                    self.offer_file(&found.path, &content).await?;
                    Ok(())
                }
                None => {
                    tracing::info!(%hash, "requested file known but not cached");
                    Ok(())
                }
            },
            None => {
                tracing::info!(%hash, "requested file unknown");
                Ok(())
            }
        }
    }

    async fn handle_retransmit_request(
        &mut self,
        hash: FileHash,
        percent: u8,
        missing: &[u16],
    ) -> Result<(), TransferError> {
        tracing::debug!(
            %hash,
            peer_percent = wire_to_percent(percent),
            missing = missing.len(),
            "retransmission requested"
        );

        let chunks = match self.sending.get(&hash) {
            Some(send) => send.chunks.clone(),
            None => match self.store.find_content(hash).await? {
                Some(content) => self.splitter.split(&content),
                None => {
                    tracing::warn!(%hash, "cannot serve retransmission: content unknown");
                    return Ok(());
                }
            },
        };

        // Fire-and-forget: the peer's retry loop recovers further loss
        for packet in resend_packets(hash, &chunks, missing) {
            self.send_packet(&packet).await?;
        }
        Ok(())
    }

    async fn send_announce_and_chunks(
        &mut self,
        descriptor: &FileDescriptor,
        chunks: &[Vec<u8>],
    ) -> Result<(), TransferError> {
        self.send_packet(&Packet::FileAnnounce {
            hash: descriptor.hash,
            size: descriptor.size,
            total_chunks: descriptor.total_chunks,
            name: descriptor.name.clone(),
        })
        .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            self.send_packet(&Packet::DataChunk {
                hash: descriptor.hash,
                index: index as u16,
                payload: chunk.clone(),
            })
            .await?;
        }
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), TransferError> {
        self.outbox
            .send(packet.encode())
            .await
            .map_err(|_| TransferError::ChannelClosed)
    }

    async fn emit(&self, event: TransferEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("event consumer gone, notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Rig {
        engine: TransferEngine,
        outbox: mpsc::Receiver<Vec<u8>>,
        events: mpsc::Receiver<TransferEvent>,
        _dir: tempfile::TempDir,
    }

    async fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        let (out_tx, out_rx) = mpsc::channel(1024);
        let (ev_tx, ev_rx) = mpsc::channel(1024);
        Rig {
            engine: TransferEngine::new(
                "peer-a",
                TransferConfig::default(),
                store,
                out_tx,
                ev_tx,
            ),
            outbox: out_rx,
            events: ev_rx,
            _dir: dir,
        }
    }

    fn drain_packets(outbox: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(bytes) = outbox.try_recv() {
            packets.push(Packet::decode(&bytes).unwrap());
        }
        packets
    }

    fn drain_events(events: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn offer_announces_then_sends_every_chunk() {
        let mut rig = rig().await;
        let content = vec![7u8; 250];

        let descriptor = rig.engine.offer_file("telemetry.bin", &content).await.unwrap();
        assert_eq!(descriptor.total_chunks, 3);

        let packets = drain_packets(&mut rig.outbox);
        assert_eq!(packets.len(), 4);
        assert!(matches!(packets[0], Packet::FileAnnounce { total_chunks: 3, .. }));
        assert!(matches!(
            &packets[3],
            Packet::DataChunk { index: 2, payload, .. } if payload.len() == 50
        ));
    }

    #[tokio::test]
    async fn receives_out_of_order_and_commits() {
        let mut rig = rig().await;
        let content: Vec<u8> = (0..250).map(|i| (i % 251) as u8).collect();
        let splitter = FileSplitter::new(100, 64);
        let descriptor = splitter.describe("sensor.csv", &content);
        let chunks = splitter.split(&content);

        rig.engine
            .handle_packet(
                &Packet::FileAnnounce {
                    hash: descriptor.hash,
                    size: descriptor.size,
                    total_chunks: descriptor.total_chunks,
                    name: descriptor.name.clone(),
                }
                .encode(),
            )
            .await
            .unwrap();

        for index in [2u16, 0, 1] {
            rig.engine
                .handle_packet(
                    &Packet::DataChunk {
                        hash: descriptor.hash,
                        index,
                        payload: chunks[usize::from(index)].clone(),
                    }
                    .encode(),
                )
                .await
                .unwrap();
        }

        let events = drain_events(&mut rig.events);
        assert!(matches!(events.first(), Some(TransferEvent::AnnounceReceived { .. })));
        assert!(matches!(
            events.last(),
            Some(TransferEvent::Completed { size: 250, .. })
        ));

        // End marker went back to the peer
        let packets = drain_packets(&mut rig.outbox);
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::FileHash { hash } if *hash == descriptor.hash)));

        // Content is in the store under the peer's table
        let found = rig
            .engine
            .store()
            .lookup(descriptor.hash, descriptor.size)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.source, "peer-a");
        assert_eq!(found.content.unwrap(), content);
    }

    #[tokio::test]
    async fn chunks_ahead_of_announce_are_parked_then_drained() {
        let mut rig = rig().await;
        let content = vec![3u8; 150];
        let splitter = FileSplitter::new(100, 64);
        let descriptor = splitter.describe("late.bin", &content);
        let chunks = splitter.split(&content);

        for (index, chunk) in chunks.iter().enumerate() {
            rig.engine
                .handle_packet(
                    &Packet::DataChunk {
                        hash: descriptor.hash,
                        index: index as u16,
                        payload: chunk.clone(),
                    }
                    .encode(),
                )
                .await
                .unwrap();
        }
        assert_eq!(rig.engine.active_receives(), 0);

        rig.engine
            .handle_packet(
                &Packet::FileAnnounce {
                    hash: descriptor.hash,
                    size: descriptor.size,
                    total_chunks: descriptor.total_chunks,
                    name: descriptor.name.clone(),
                }
                .encode(),
            )
            .await
            .unwrap();

        let events = drain_events(&mut rig.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, TransferEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn too_large_announce_allocates_no_session() {
        let mut rig = rig().await;
        rig.engine
            .handle_packet(
                &Packet::FileAnnounce {
                    hash: FileHash::from_raw(99),
                    size: SIZE_TOO_LARGE,
                    total_chunks: 0,
                    name: "huge.iso".to_owned(),
                }
                .encode(),
            )
            .await
            .unwrap();

        assert_eq!(rig.engine.active_receives(), 0);
        let events = drain_events(&mut rig.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::AnnounceRejected { .. }));
    }

    #[tokio::test]
    async fn zero_chunk_announce_with_nonzero_size_is_dropped() {
        let mut rig = rig().await;
        rig.engine
            .handle_packet(
                &Packet::FileAnnounce {
                    hash: FileHash::from_raw(17),
                    size: 10,
                    total_chunks: 0,
                    name: "phantom.bin".to_owned(),
                }
                .encode(),
            )
            .await
            .unwrap();

        // No session, no event, and no knowledge row for the phantom
        assert_eq!(rig.engine.active_receives(), 0);
        assert!(drain_events(&mut rig.events).is_empty());
        assert!(rig.engine.store().records("peer-a").is_none());
    }

    #[tokio::test]
    async fn timeout_cycle_requests_then_aborts_once() {
        let mut rig = rig().await;
        let content = vec![9u8; 300];
        let splitter = FileSplitter::new(100, 64);
        let descriptor = splitter.describe("flaky.bin", &content);
        let chunks = splitter.split(&content);

        rig.engine
            .handle_packet(
                &Packet::FileAnnounce {
                    hash: descriptor.hash,
                    size: descriptor.size,
                    total_chunks: descriptor.total_chunks,
                    name: descriptor.name.clone(),
                }
                .encode(),
            )
            .await
            .unwrap();
        // Only chunk 0 ever arrives
        rig.engine
            .handle_packet(
                &Packet::DataChunk {
                    hash: descriptor.hash,
                    index: 0,
                    payload: chunks[0].clone(),
                }
                .encode(),
            )
            .await
            .unwrap();
        drain_packets(&mut rig.outbox);

        let timeout = TransferConfig::default().inactivity_timeout;
        let limit = TransferConfig::default().retransmit_limit;
        let mut now = Instant::now();

        for _ in 0..limit {
            now += timeout + Duration::from_millis(1);
            rig.engine.tick_at(now).await.unwrap();
            let packets = drain_packets(&mut rig.outbox);
            assert_eq!(packets.len(), 1);
            assert!(matches!(
                &packets[0],
                Packet::RetransmitRequest { missing, .. } if missing == &vec![1, 2]
            ));
        }

        now += timeout + Duration::from_millis(1);
        rig.engine.tick_at(now).await.unwrap();
        assert_eq!(rig.engine.active_receives(), 0);

        // A further tick reports nothing again
        now += timeout;
        rig.engine.tick_at(now).await.unwrap();

        let aborted: Vec<_> = drain_events(&mut rig.events)
            .into_iter()
            .filter(|e| matches!(e, TransferEvent::Aborted { .. }))
            .collect();
        assert_eq!(aborted.len(), 1);
    }

    #[tokio::test]
    async fn retransmit_request_is_served_from_send_buffer() {
        let mut rig = rig().await;
        let content = vec![5u8; 250];
        let descriptor = rig.engine.offer_file("resend.bin", &content).await.unwrap();
        drain_packets(&mut rig.outbox);

        rig.engine
            .handle_packet(
                &Packet::RetransmitRequest {
                    hash: descriptor.hash,
                    rate: 40,
                    percent: percent_to_wire(66.7),
                    missing: vec![1],
                }
                .encode(),
            )
            .await
            .unwrap();

        // Peer's rate code was adopted
        assert_eq!(rig.engine.rate().code(), 40);

        let packets = drain_packets(&mut rig.outbox);
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            &packets[0],
            Packet::DataChunk { index: 1, payload, .. } if payload.len() == 100
        ));
    }

    #[tokio::test]
    async fn file_request_is_served_from_store() {
        let mut rig = rig().await;
        let content = b"previously ferried content".to_vec();
        let hash = FileHash::of(&content);
        rig.engine
            .store_mut()
            .record("peer-b", hash, content.len() as u32, "old.txt", Some(&content))
            .await
            .unwrap();

        rig.engine
            .handle_packet(
                &Packet::FileRequest {
                    hash,
                    size: content.len() as u32,
                    rate: 10,
                }
                .encode(),
            )
            .await
            .unwrap();

        let packets = drain_packets(&mut rig.outbox);
        assert!(matches!(packets[0], Packet::FileAnnounce { .. }));
        assert_eq!(packets.len(), 2);
    }

    #[tokio::test]
    async fn undecodable_packets_are_dropped_quietly() {
        let mut rig = rig().await;
        rig.engine.handle_packet(b"XYZ\x01").await.unwrap();
        rig.engine.handle_packet(b"FC").await.unwrap();
        assert!(drain_events(&mut rig.events).is_empty());
    }

    #[tokio::test]
    async fn end_marker_releases_send_buffer() {
        let mut rig = rig().await;
        let content = vec![1u8; 50];
        let descriptor = rig.engine.offer_file("done.bin", &content).await.unwrap();
        drain_packets(&mut rig.outbox);

        rig.engine
            .handle_packet(&Packet::FileHash { hash: descriptor.hash }.encode())
            .await
            .unwrap();

        // A later retransmission request can no longer be served from
        // memory, and the content never reached our store
        rig.engine
            .handle_packet(
                &Packet::RetransmitRequest {
                    hash: descriptor.hash,
                    rate: 0,
                    percent: 0,
                    missing: vec![0],
                }
                .encode(),
            )
            .await
            .unwrap();
        assert!(drain_packets(&mut rig.outbox).is_empty());

        let events = drain_events(&mut rig.events);
        assert!(matches!(events[0], TransferEvent::PeerFinished { .. }));
    }
}
