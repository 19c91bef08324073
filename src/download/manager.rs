//! Download coordinator
//!
//! Drives a whole torrent: announces for peers, runs one worker per peer
//! up to the concurrency limit, hands out pieces from the plan, recycles
//! failures, broadcasts HAVE on completion, and reports the lifecycle to
//! the tracker. Errors on one peer never poison the download; the worker
//! is dropped, its pieces go back to pending, and the next peer is tried.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::download::plan::PiecePlan;
use crate::error::Error;
use crate::peer::id::{PeerId, PeerInfo};
use crate::peer::session::PeerSession;
use crate::peer::worker::{PieceCallback, Worker};
use crate::storage::piece::Piece;
use crate::storage::sink::PieceSink;
use crate::torrent::info::Metainfo;
use crate::tracker::client::{Metrics, TrackerClient};

/// How often the supervisor looks for new peers when nothing else wakes it
const RESPAWN_INTERVAL: Duration = Duration::from_secs(30);

/// How long a peer sits out after its worker fails
const PEER_RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// Coordinator tunables
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Port reported to the tracker
    pub port: u16,
    /// Concurrent peer workers
    pub max_peers: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            port: 6881,
            max_peers: 2,
        }
    }
}

/// Transfer totals fed to the tracker; `left` counts down as pieces verify
pub struct LiveMetrics {
    total: u64,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
}

impl LiveMetrics {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
        }
    }

    fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl Metrics for LiveMetrics {
    fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    fn left(&self) -> u64 {
        self.total.saturating_sub(self.downloaded())
    }
}

/// Point-in-time view of the download for display
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub pieces_complete: usize,
    pub pieces_total: usize,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub connected_peers: usize,
}

/// Coordinates one torrent download
pub struct Downloader {
    meta: Arc<Metainfo>,
    config: DownloadConfig,
    self_id: PeerId,
    tracker: Arc<TrackerClient>,
    sink: Arc<dyn PieceSink>,
    metrics: Arc<LiveMetrics>,
    plan: Mutex<PiecePlan>,
    sessions: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    workers: Mutex<HashMap<PeerId, Arc<Worker>>>,
    /// Peers with a live worker task, from spawn to exit
    active: Mutex<HashSet<PeerId>>,
    /// Last failure time per peer, for the retry cooldown
    benched: Mutex<HashMap<PeerId, Instant>>,
    /// Reset pieces parked here keep their payload buffer; reassignment
    /// hands them back out instead of allocating fresh ones. Keys are
    /// always a subset of the plan's pending set.
    retained: Mutex<HashMap<u32, Piece>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
    done: watch::Sender<bool>,
}

impl Downloader {
    pub fn new(
        meta: Arc<Metainfo>,
        config: DownloadConfig,
        sink: Arc<dyn PieceSink>,
    ) -> Result<Arc<Self>, Error> {
        let self_id = PeerId::generate();
        let metrics = Arc::new(LiveMetrics::new(meta.total_size));
        let tracker = Arc::new(TrackerClient::new(
            &meta,
            self_id,
            config.port,
            Arc::clone(&metrics) as Arc<dyn Metrics>,
        )?);
        let plan = PiecePlan::new(meta.piece_count());
        let (done, _) = watch::channel(false);
        Ok(Arc::new(Self {
            meta,
            config,
            self_id,
            tracker,
            sink,
            metrics,
            plan: Mutex::new(plan),
            sessions: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
            benched: Mutex::new(HashMap::new()),
            retained: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(Vec::new()),
            done,
        }))
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn tracker(&self) -> &Arc<TrackerClient> {
        &self.tracker
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let plan = self.plan.lock().expect("plan lock poisoned");
        ProgressSnapshot {
            pieces_complete: plan.complete_count(),
            pieces_total: self.meta.piece_count(),
            downloaded_bytes: self.metrics.downloaded(),
            total_bytes: self.meta.total_size,
            connected_peers: self.sessions.lock().expect("sessions lock poisoned").len(),
        }
    }

    /// Run the download to completion.
    ///
    /// The initial announce is fatal on failure; after that the periodic
    /// tracker task logs and retries on its own. Workers come and go with
    /// their peers until the plan drains, then everything is wound down
    /// and the tracker gets its `completed` event.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> anyhow::Result<()> {
        info!(
            name = %self.meta.name,
            pieces = self.meta.piece_count(),
            bytes = self.meta.total_size,
            "starting download"
        );

        let first_interval = self.tracker.announce(None).await?;
        debug!(peers = self.tracker.peers().len(), "initial announce done");

        let work_token = token.child_token();
        let tracker_task = tokio::spawn({
            let tracker = Arc::clone(&self.tracker);
            let tracker_token = work_token.clone();
            async move { tracker.run_periodic(first_interval, tracker_token).await }
        });

        let respawn = Arc::new(Notify::new());
        let mut done_rx = self.done.subscribe();
        self.check_done();

        let outcome = loop {
            if *done_rx.borrow() {
                break Ok(());
            }
            Arc::clone(&self).spawn_workers(&work_token, &respawn);
            self.dispatch_pending();
            tokio::select! {
                _ = token.cancelled() => break Err(Error::Cancelled),
                _ = done_rx.wait_for(|finished| *finished) => break Ok(()),
                _ = respawn.notified() => {}
                _ = tokio::time::sleep(RESPAWN_INTERVAL) => {}
            }
        };

        work_token.cancel();
        tracker_task.abort();

        match outcome {
            Ok(()) => {
                // let in-flight payload deliveries land before finishing
                let handles =
                    std::mem::take(&mut *self.deliveries.lock().expect("deliveries poisoned"));
                for handle in handles {
                    let _ = handle.await;
                }
                self.sink.finish().await?;
                if let Err(e) = self.tracker.completed().await {
                    warn!(error = %e, "completed announce failed");
                }
                info!(name = %self.meta.name, "download complete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start workers for tracker peers until the slots are full. Skips
    /// ourselves, peers already being worked, and recently failed peers.
    fn spawn_workers(self: Arc<Self>, work_token: &CancellationToken, respawn: &Arc<Notify>) {
        let peers = self.tracker.peers();
        let mut active = self.active.lock().expect("active lock poisoned");
        for peer in peers {
            if active.len() >= self.config.max_peers {
                break;
            }
            if peer.id == self.self_id || active.contains(&peer.id) {
                continue;
            }
            if let Some(failed_at) = self
                .benched
                .lock()
                .expect("benched lock poisoned")
                .get(&peer.id)
            {
                if failed_at.elapsed() < PEER_RETRY_COOLDOWN {
                    continue;
                }
            }
            active.insert(peer.id);
            info!(peer = %peer.socket_addr(), "starting worker");
            tokio::spawn(Arc::clone(&self).worker_task(
                peer,
                work_token.clone(),
                Arc::clone(respawn),
            ));
        }
    }

    /// Hand pending pieces to workers that currently have nothing assigned
    fn dispatch_pending(&self) {
        loop {
            let idle = {
                let workers = self.workers.lock().expect("workers lock poisoned");
                workers
                    .values()
                    .find(|worker| worker.assigned_count() == 0)
                    .cloned()
            };
            let Some(worker) = idle else { return };
            let Some(piece) = self.start_next_piece() else {
                return;
            };
            let index = piece.index();
            if let Some(rejected) = worker.request_piece(piece) {
                // the worker died under us; put the piece back, buffer
                // included, and wait for the registry to catch up
                let mut plan = self.plan.lock().expect("plan lock poisoned");
                plan.fail(index);
                self.retained
                    .lock()
                    .expect("retained lock poisoned")
                    .insert(index, rejected);
                return;
            }
        }
    }

    async fn worker_task(
        self: Arc<Self>,
        peer: PeerInfo,
        token: CancellationToken,
        respawn: Arc<Notify>,
    ) {
        let result = Arc::clone(&self).run_worker(&peer, &token).await;
        match &result {
            Ok(()) => debug!(peer = %peer.socket_addr(), "worker finished"),
            Err(e) if e.is_cancelled() => debug!(peer = %peer.socket_addr(), "worker cancelled"),
            Err(e) => {
                warn!(peer = %peer.socket_addr(), error = %e, "worker failed");
                self.benched
                    .lock()
                    .expect("benched lock poisoned")
                    .insert(peer.id, Instant::now());
            }
        }
        self.workers
            .lock()
            .expect("workers lock poisoned")
            .remove(&peer.id);
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .remove(&peer.id);
        self.active
            .lock()
            .expect("active lock poisoned")
            .remove(&peer.id);
        respawn.notify_one();
    }

    async fn run_worker(
        self: Arc<Self>,
        peer: &PeerInfo,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let session = Arc::new(
            PeerSession::connect(
                *peer,
                self.meta.info_hash,
                self.self_id,
                self.meta.piece_count(),
                self.meta.max_frame_payload(),
                token,
            )
            .await?,
        );
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .insert(peer.id, Arc::clone(&session));

        let worker = Worker::new(session, Arc::clone(&self).piece_callback(), token);
        self.workers
            .lock()
            .expect("workers lock poisoned")
            .insert(peer.id, Arc::clone(&worker));
        self.dispatch_pending();

        let result = Arc::clone(&worker).run().await;

        // whatever the worker still held goes back to pending, buffers
        // parked for the next assignment
        let reclaimed = worker.take_in_progress();
        if !reclaimed.is_empty() {
            let mut plan = self.plan.lock().expect("plan lock poisoned");
            let mut retained = self.retained.lock().expect("retained lock poisoned");
            for mut piece in reclaimed {
                debug!(piece = piece.index(), "reclaiming piece from dead worker");
                plan.fail(piece.index());
                piece.reset();
                retained.insert(piece.index(), piece);
            }
        }
        self.check_done();
        result
    }

    /// The policy a worker needs: where finished pieces go and what to
    /// work on next
    fn piece_callback(self: Arc<Self>) -> PieceCallback {
        let downloader = self;
        Arc::new(move |piece, outcome| match outcome {
            Ok(()) => Arc::clone(&downloader).on_piece_complete(piece),
            Err(err) => downloader.on_piece_failed(piece, err),
        })
    }

    fn on_piece_complete(self: Arc<Self>, piece: Piece) -> Option<Piece> {
        let index = piece.index();
        let size = piece.size() as u64;
        self.plan.lock().expect("plan lock poisoned").complete(index);
        self.metrics.add_downloaded(size);
        info!(piece = index, bytes = size, "piece verified");

        let payload = Bytes::from(piece.into_payload());
        let handle = tokio::spawn(Arc::clone(&self).deliver_piece(index, payload));
        self.deliveries
            .lock()
            .expect("deliveries poisoned")
            .push(handle);

        self.check_done();
        self.start_next_piece()
    }

    fn on_piece_failed(&self, mut piece: Piece, err: Error) -> Option<Piece> {
        let index = piece.index();
        warn!(piece = index, error = %err, "piece failed; back to pending");
        piece.reset();
        {
            // park under the plan lock so no assignment can slip between
            // the index turning pending and the buffer becoming reusable
            let mut plan = self.plan.lock().expect("plan lock poisoned");
            plan.fail(index);
            self.retained
                .lock()
                .expect("retained lock poisoned")
                .insert(index, piece);
        }
        self.start_next_piece()
    }

    /// Deliver one verified payload to the sink, then tell every active
    /// peer we have the piece
    async fn deliver_piece(self: Arc<Self>, index: u32, payload: Bytes) {
        if let Err(e) = self.sink.deliver(index, payload).await {
            error!(piece = index, error = %e, "piece delivery failed");
        }
        let sessions: Vec<Arc<PeerSession>> = self
            .sessions
            .lock()
            .expect("sessions lock poisoned")
            .values()
            .cloned()
            .collect();
        for session in sessions {
            if let Err(e) = session.have(index).await {
                debug!(
                    peer = %session.peer_info().socket_addr(),
                    error = %e,
                    "HAVE broadcast failed"
                );
            }
        }
    }

    /// Atomically pop a pending piece into in-progress and hand out its
    /// assembly state. A piece that failed earlier comes back with its
    /// buffer intact; anything else is allocated fresh.
    fn start_next_piece(&self) -> Option<Piece> {
        let mut plan = self.plan.lock().expect("plan lock poisoned");
        let index = plan.start_next()?;
        if let Some(piece) = self
            .retained
            .lock()
            .expect("retained lock poisoned")
            .remove(&index)
        {
            return Some(piece);
        }
        let size = self.meta.piece_size(index) as u32;
        let hash = self.meta.piece_hash(index)?;
        Some(Piece::new(index, size, hash))
    }

    fn check_done(&self) {
        if self.plan.lock().expect("plan lock poisoned").is_done() {
            self.done.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, Dict, Value};
    use crate::protocol::handshake;
    use crate::protocol::message::Message;
    use crate::protocol::wire;
    use crate::storage::sink::MemorySink;
    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    const INFO_HASH: [u8; 20] = [5u8; 20];
    const PIECE_LEN: u64 = 32;

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn make_meta(announce: &str, content: &[u8]) -> Arc<Metainfo> {
        let hashes: Vec<[u8; 20]> = content.chunks(PIECE_LEN as usize).map(sha1_of).collect();
        Arc::new(Metainfo {
            announce: Url::parse(announce).unwrap(),
            name: "sample.bin".to_string(),
            piece_length: PIECE_LEN,
            total_size: content.len() as u64,
            files: vec![],
            hashes,
            info: Value::Int(0),
            info_hash: INFO_HASH,
        })
    }

    /// Scripted HTTP tracker: serves the same peer list forever
    async fn run_tracker(listener: TcpListener, peers: Vec<(PeerId, u16)>) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let Ok(n) = stream.read(&mut buf).await else {
                    return;
                };
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let entries: Vec<Value> = peers
                .iter()
                .map(|(id, port)| {
                    let mut entry = Dict::new();
                    entry.insert(b"peer id".to_vec(), Value::Bytes(id.as_bytes().to_vec()));
                    entry.insert(b"ip".to_vec(), Value::from("127.0.0.1"));
                    entry.insert(b"port".to_vec(), Value::Int(*port as i64));
                    Value::Dict(entry)
                })
                .collect();
            let mut root = Dict::new();
            root.insert(b"interval".to_vec(), Value::Int(1800));
            root.insert(b"peers".to_vec(), Value::List(entries));
            let body = encode(&Value::Dict(root));
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
        }
    }

    /// A full seeder for `content`. `poison_first_serve` corrupts the
    /// first block it serves and then hangs up, like a peer feeding us
    /// garbage before vanishing.
    async fn run_seeder(
        listener: TcpListener,
        seeder_id: PeerId,
        content: Vec<u8>,
        poison_first_serve: bool,
    ) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut header = [0u8; handshake::HEADER_LEN];
            if stream.read_exact(&mut header).await.is_err() {
                continue;
            }
            if stream
                .write_all(&handshake::encode_header(&INFO_HASH))
                .await
                .is_err()
            {
                continue;
            }
            let mut id = [0u8; 20];
            if stream.read_exact(&mut id).await.is_err() {
                continue;
            }
            if stream.write_all(seeder_id.as_bytes()).await.is_err() {
                continue;
            }

            let num_pieces = content.len().div_ceil(PIECE_LEN as usize);
            let mut bits = vec![0u8; num_pieces.div_ceil(8)];
            for piece in 0..num_pieces {
                bits[piece / 8] |= 0x80 >> (piece % 8);
            }
            let _ = wire::write_frame(&mut stream, &Message::Bitfield { bits }).await;

            loop {
                let message = match wire::read_frame(&mut stream, 1 << 20).await {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match message {
                    Message::Interested => {
                        let _ = wire::write_frame(&mut stream, &Message::Unchoke).await;
                    }
                    Message::Request(block) => {
                        let start =
                            block.piece_index as usize * PIECE_LEN as usize + block.begin as usize;
                        let mut data = content[start..start + block.length as usize].to_vec();
                        if poison_first_serve {
                            data[0] ^= 0xff;
                        }
                        let _ = wire::write_frame(
                            &mut stream,
                            &Message::Piece {
                                index: block.piece_index,
                                begin: block.begin,
                                data,
                            },
                        )
                        .await;
                        if poison_first_serve {
                            return;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    async fn spawn_seeder(id: PeerId, content: Vec<u8>, poison: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(run_seeder(listener, id, content, poison));
        port
    }

    async fn run_download(
        peers: Vec<(PeerId, u16)>,
        content: &[u8],
    ) -> (Arc<Downloader>, Arc<MemorySink>) {
        let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = tracker_listener.local_addr().unwrap();
        tokio::spawn(run_tracker(tracker_listener, peers));

        let meta = make_meta(&format!("http://{}/announce", tracker_addr), content);
        let sink = Arc::new(MemorySink::new());
        let downloader = Downloader::new(
            meta,
            DownloadConfig {
                port: 6881,
                max_peers: 2,
            },
            Arc::clone(&sink) as Arc<dyn PieceSink>,
        )
        .unwrap();

        Arc::clone(&downloader).run(CancellationToken::new()).await.unwrap();
        (downloader, sink)
    }

    fn assemble(sink: &MemorySink) -> Vec<u8> {
        sink.take_pieces()
            .into_values()
            .flat_map(|b| b.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_download_from_one_seeder() {
        let content: Vec<u8> = (0..100u32).map(|i| (i % 251) as u8).collect();
        let seeder_id = PeerId::generate();
        let port = spawn_seeder(seeder_id, content.clone(), false).await;

        let (downloader, sink) = run_download(vec![(seeder_id, port)], &content).await;

        assert_eq!(assemble(&sink), content);
        let snapshot = downloader.snapshot();
        assert_eq!(snapshot.pieces_complete, snapshot.pieces_total);
        assert_eq!(snapshot.downloaded_bytes, content.len() as u64);
    }

    #[tokio::test]
    async fn test_download_survives_a_poisoning_peer() {
        let content: Vec<u8> = (0..96u32).map(|i| (i % 13) as u8).collect();
        let poisoner_id = PeerId::generate();
        let honest_id = PeerId::generate();
        let poisoner_port = spawn_seeder(poisoner_id, content.clone(), true).await;
        let honest_port = spawn_seeder(honest_id, content.clone(), false).await;

        // the poisoner is listed first so it gets work
        let (_, sink) = run_download(
            vec![(poisoner_id, poisoner_port), (honest_id, honest_port)],
            &content,
        )
        .await;

        // every piece still ends up intact
        assert_eq!(assemble(&sink), content);
    }

    #[tokio::test]
    async fn test_download_ignores_self_in_peer_list() {
        let content: Vec<u8> = (0..40u32).map(|i| i as u8).collect();
        let seeder_id = PeerId::generate();
        let port = spawn_seeder(seeder_id, content.clone(), false).await;

        let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = tracker_listener.local_addr().unwrap();

        let meta = make_meta(&format!("http://{}/announce", tracker_addr), &content);
        let sink = Arc::new(MemorySink::new());
        let downloader = Downloader::new(
            meta,
            DownloadConfig::default(),
            Arc::clone(&sink) as Arc<dyn PieceSink>,
        )
        .unwrap();

        // the tracker lists us before the real seeder
        tokio::spawn(run_tracker(
            tracker_listener,
            vec![(downloader.self_id(), 1), (seeder_id, port)],
        ));

        Arc::clone(&downloader).run(CancellationToken::new()).await.unwrap();
        assert_eq!(assemble(&sink), content);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_download() {
        // a tracker with no peers: the download can never progress
        let tracker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = tracker_listener.local_addr().unwrap();
        tokio::spawn(run_tracker(tracker_listener, vec![]));

        let content: Vec<u8> = vec![1u8; 64];
        let meta = make_meta(&format!("http://{}/announce", tracker_addr), &content);
        let sink = Arc::new(MemorySink::new());
        let downloader = Downloader::new(
            meta,
            DownloadConfig::default(),
            Arc::clone(&sink) as Arc<dyn PieceSink>,
        )
        .unwrap();

        let token = CancellationToken::new();
        let run = {
            let downloader = Arc::clone(&downloader);
            let token = token.clone();
            tokio::spawn(async move { downloader.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = run.await.unwrap().unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(err.is_cancelled());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_failed_piece_keeps_its_buffer_for_the_retry() {
        let content: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        let meta = make_meta("http://127.0.0.1:1/announce", &content);
        let sink = Arc::new(MemorySink::new());
        let downloader =
            Downloader::new(meta, DownloadConfig::default(), sink as Arc<dyn PieceSink>).unwrap();

        let mut piece = downloader.start_next_piece().unwrap();
        assert_eq!(piece.index(), 0);
        let block = piece.missing_blocks()[0];
        let payload = vec![0xab; block.length as usize];
        piece.add_block(block, &payload).unwrap();

        // the failure path parks the reset piece, and reassigning index 0
        // hands the very same piece back out
        let retry = downloader
            .on_piece_failed(piece, Error::HashMismatch { piece: 0 })
            .unwrap();
        assert_eq!(retry.index(), 0);
        assert_eq!(retry.missing_blocks().len(), 1);
        // reset clears block presence but not the buffer; a fresh
        // allocation would read back as zeros here
        assert_eq!(retry.payload(), payload.as_slice());

        assert!(downloader
            .retained
            .lock()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_initial_announce_failure_is_fatal() {
        // nothing is listening on this port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let content = vec![1u8; 32];
        let meta = make_meta(&format!("http://{}/announce", addr), &content);
        let sink = Arc::new(MemorySink::new());
        let downloader =
            Downloader::new(meta, DownloadConfig::default(), sink as Arc<dyn PieceSink>).unwrap();

        let result = Arc::clone(&downloader).run(CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
