//! Peer wire session
//!
//! Owns one TCP connection to a remote peer: the handshake, the framed
//! read loop, the outbound write path, and the per-peer protocol state.
//! Exactly one reader task consumes inbound frames; every write goes
//! through one async mutex, so the remote observes our messages in
//! program order.
//!
//! Remote choking is exposed as a latch: a watch channel that holds
//! `true` while we are unchoked. CHOKE resets it, so waiters block again
//! until the next UNCHOKE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::peer::id::{PeerId, PeerInfo};
use crate::protocol::bitfield::Bitfield;
use crate::protocol::handshake;
use crate::protocol::message::{Block, Message};
use crate::protocol::wire;

/// Applies to the TCP connect and to each half of the handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between outbound keep-alive frames
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Inbound messages buffered toward the subscriber
const SUBSCRIBER_CAPACITY: usize = 16;

#[derive(Debug)]
struct SessionState {
    remote_bitfield: Bitfield,
    /// BITFIELD is only legal before any HAVE and only once
    saw_have: bool,
    saw_bitfield: bool,
    /// Whether we have sent INTERESTED without a matching NOT_INTERESTED
    interested: bool,
    subscriber: Option<mpsc::Sender<Message>>,
}

/// One established connection to a remote peer
#[derive(Debug)]
pub struct PeerSession {
    info: PeerInfo,
    num_pieces: usize,
    max_payload: usize,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: AsyncMutex<OwnedWriteHalf>,
    state: Mutex<SessionState>,
    unchoked: watch::Sender<bool>,
    token: CancellationToken,
    closed: AtomicBool,
}

impl PeerSession {
    /// Dial the peer and perform the handshake.
    ///
    /// The exchange runs in two halves: we send our header (protocol
    /// string, reserved bytes, info-hash), read and validate the remote
    /// header, then trade 20-byte peer ids. The remote id must equal the
    /// id the tracker reported for this address.
    pub async fn connect(
        info: PeerInfo,
        info_hash: [u8; 20],
        self_id: PeerId,
        num_pieces: usize,
        max_payload: usize,
        parent: &CancellationToken,
    ) -> Result<Self, Error> {
        let addr = info.socket_addr();
        debug!(peer = %addr, "connecting");

        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::handshake_full("connect timed out", addr.to_string(), "timeout"))?
            .map_err(|e| {
                Error::handshake_full("failed to connect", addr.to_string(), e.to_string())
            })?;

        stream
            .write_all(&handshake::encode_header(&info_hash))
            .await
            .map_err(|e| {
                Error::handshake_full("failed to send handshake", addr.to_string(), e.to_string())
            })?;

        let mut header = [0u8; handshake::HEADER_LEN];
        timeout(CONNECT_TIMEOUT, stream.read_exact(&mut header))
            .await
            .map_err(|_| {
                Error::handshake_full("handshake timed out", addr.to_string(), "timeout")
            })?
            .map_err(|e| {
                Error::handshake_full("failed to read handshake", addr.to_string(), e.to_string())
            })?;
        let remote_hash =
            handshake::decode_header(&header).map_err(|e| e.with_peer(addr.to_string()))?;
        if remote_hash != info_hash {
            return Err(Error::handshake_full(
                "info hash mismatch",
                addr.to_string(),
                format!("remote offered {}", hex::encode(remote_hash)),
            ));
        }

        stream.write_all(self_id.as_bytes()).await.map_err(|e| {
            Error::handshake_full("failed to send peer id", addr.to_string(), e.to_string())
        })?;
        let mut remote_id = [0u8; 20];
        timeout(CONNECT_TIMEOUT, stream.read_exact(&mut remote_id))
            .await
            .map_err(|_| {
                Error::handshake_full("handshake timed out", addr.to_string(), "timeout")
            })?
            .map_err(|e| {
                Error::handshake_full("failed to read peer id", addr.to_string(), e.to_string())
            })?;
        if remote_id != *info.id.as_bytes() {
            return Err(Error::handshake_full(
                "peer id mismatch",
                addr.to_string(),
                format!("remote identified as {}", PeerId::from(remote_id)),
            ));
        }

        info!(peer = %addr, id = %info.id, "handshake complete");

        let (read_half, write_half) = stream.into_split();
        let (unchoked, _) = watch::channel(false);
        Ok(Self {
            info,
            num_pieces,
            max_payload,
            reader: AsyncMutex::new(Some(read_half)),
            writer: AsyncMutex::new(write_half),
            state: Mutex::new(SessionState {
                remote_bitfield: Bitfield::new(num_pieces),
                saw_have: false,
                saw_bitfield: false,
                interested: false,
                subscriber: None,
            }),
            unchoked,
            token: parent.child_token(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.info
    }

    /// Hand out the session's single message stream. Second calls fail.
    pub fn subscribe(&self) -> Result<mpsc::Receiver<Message>, Error> {
        let mut state = self.state.lock().expect("session state poisoned");
        if state.subscriber.is_some() {
            return Err(Error::session("session already has a subscriber")
                .with_peer(self.info.socket_addr().to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        state.subscriber = Some(tx);
        Ok(rx)
    }

    /// Consume inbound frames until the session dies.
    ///
    /// Every exit path is terminal: read errors, protocol violations, and
    /// cancellation all end the session, and the session token is
    /// cancelled on the way out so writers and waiters unblock.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::session("read loop already started"))?;

        let keepalive = tokio::spawn({
            let session = Arc::clone(&self);
            async move { session.keepalive_loop().await }
        });

        let result = loop {
            tokio::select! {
                _ = self.token.cancelled() => break Err(Error::Cancelled),
                frame = wire::read_frame(&mut reader, self.max_payload) => {
                    match frame {
                        Ok(message) => {
                            if let Err(e) = self.handle_message(message).await {
                                break Err(e);
                            }
                        }
                        Err(e) => break Err(e.with_peer(self.info.socket_addr().to_string())),
                    }
                }
            }
        };

        keepalive.abort();
        self.token.cancel();
        if let Err(e) = &result {
            if !e.is_cancelled() {
                warn!(peer = %self.info.socket_addr(), error = %e, "session ended");
            }
        }
        result
    }

    async fn handle_message(&self, message: Message) -> Result<(), Error> {
        let addr = self.info.socket_addr();
        trace!(peer = %addr, id = ?message.message_id(), "received message");

        match &message {
            // tolerated silently
            Message::KeepAlive => return Ok(()),
            Message::Choke => {
                debug!(peer = %addr, "choked");
                self.unchoked.send_replace(false);
            }
            Message::Unchoke => {
                debug!(peer = %addr, "unchoked");
                self.unchoked.send_replace(true);
            }
            Message::Have { piece_index } => {
                if *piece_index as usize >= self.num_pieces {
                    return Err(Error::session(format!(
                        "HAVE for piece {} of a {}-piece torrent",
                        piece_index, self.num_pieces
                    ))
                    .with_peer(addr.to_string()));
                }
                let mut state = self.state.lock().expect("session state poisoned");
                state.remote_bitfield.set(*piece_index);
                state.saw_have = true;
            }
            Message::Bitfield { bits } => {
                let bitfield = Bitfield::from_bytes(bits.clone());
                bitfield
                    .validate(self.num_pieces)
                    .map_err(|e| e.with_peer(addr.to_string()))?;
                let mut state = self.state.lock().expect("session state poisoned");
                if state.saw_have || state.saw_bitfield {
                    return Err(Error::session("BITFIELD arrived after HAVE or a second time")
                        .with_peer(addr.to_string()));
                }
                state.saw_bitfield = true;
                state.remote_bitfield = bitfield;
            }
            Message::Interested | Message::NotInterested => {
                debug!(peer = %addr, id = ?message.message_id(), "remote interest changed");
            }
            Message::Request(block) => {
                // leech only: we never unchoke anyone, so nothing is owed
                debug!(peer = %addr, piece = block.piece_index, "ignoring REQUEST");
            }
            Message::Cancel(_) | Message::Piece { .. } => {}
        }

        let subscriber = self
            .state
            .lock()
            .expect("session state poisoned")
            .subscriber
            .clone();
        if let Some(tx) = subscriber {
            if tx.send(message).await.is_err() {
                trace!(peer = %addr, "subscriber gone; dropping message");
            }
        }
        Ok(())
    }

    async fn keepalive_loop(&self) {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        // the first tick is immediate; the handshake just proved liveness
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = ticker.tick() => {
                    trace!(peer = %self.info.socket_addr(), "sending keep-alive");
                    if let Err(e) = self.send(&Message::KeepAlive).await {
                        warn!(peer = %self.info.socket_addr(), error = %e, "keep-alive failed");
                        return;
                    }
                }
            }
        }
    }

    async fn send(&self, message: &Message) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        wire::write_frame(&mut *writer, message)
            .await
            .map_err(|e| e.with_peer(self.info.socket_addr().to_string()))
    }

    /// Send INTERESTED. Idempotent: only the first call writes.
    pub async fn interested(&self) -> Result<(), Error> {
        {
            let state = self.state.lock().expect("session state poisoned");
            if state.interested {
                return Ok(());
            }
        }
        debug!(peer = %self.info.socket_addr(), "sending INTERESTED");
        self.send(&Message::Interested).await?;
        self.state
            .lock()
            .expect("session state poisoned")
            .interested = true;
        Ok(())
    }

    /// Send NOT_INTERESTED if we are currently interested
    pub async fn not_interested(&self) -> Result<(), Error> {
        {
            let state = self.state.lock().expect("session state poisoned");
            if !state.interested {
                return Ok(());
            }
        }
        debug!(peer = %self.info.socket_addr(), "sending NOT_INTERESTED");
        self.send(&Message::NotInterested).await?;
        self.state
            .lock()
            .expect("session state poisoned")
            .interested = false;
        Ok(())
    }

    pub async fn request(&self, block: Block) -> Result<(), Error> {
        debug!(
            peer = %self.info.socket_addr(),
            piece = block.piece_index,
            begin = block.begin,
            length = block.length,
            "sending REQUEST"
        );
        self.send(&Message::Request(block)).await
    }

    pub async fn cancel(&self, block: Block) -> Result<(), Error> {
        debug!(
            peer = %self.info.socket_addr(),
            piece = block.piece_index,
            begin = block.begin,
            "sending CANCEL"
        );
        self.send(&Message::Cancel(block)).await
    }

    pub async fn have(&self, piece_index: u32) -> Result<(), Error> {
        debug!(peer = %self.info.socket_addr(), piece = piece_index, "sending HAVE");
        self.send(&Message::Have { piece_index }).await
    }

    /// The unchoked latch. The receiver reads `true` while unchoked.
    pub fn unchoked(&self) -> watch::Receiver<bool> {
        self.unchoked.subscribe()
    }

    /// Block until the remote unchokes us or the session ends
    pub async fn await_unchoked(&self) -> Result<(), Error> {
        let mut latch = self.unchoked.subscribe();
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = latch.wait_for(|open| *open) => result
                .map(|_| ())
                .map_err(|_| Error::session("session closed while waiting for unchoke")),
        }
    }

    /// Whether the remote has announced piece `piece_index`
    pub fn remote_has(&self, piece_index: u32) -> bool {
        self.state
            .lock()
            .expect("session state poisoned")
            .remote_bitfield
            .has(piece_index)
    }

    /// Snapshot of the remote's announced pieces
    pub fn remote_bitfield(&self) -> Bitfield {
        self.state
            .lock()
            .expect("session state poisoned")
            .remote_bitfield
            .clone()
    }

    /// Close the connection. Safe to call more than once; only the first
    /// call acts. Cancelling the token unblocks the read loop.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(peer = %self.info.socket_addr(), "closing session");
        self.token.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [5u8; 20];
    const REMOTE_ID: [u8; 20] = [7u8; 20];

    /// Accept one connection and play the remote side of the handshake
    async fn accept_with_handshake(listener: TcpListener) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut header = [0u8; handshake::HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(handshake::decode_header(&header).unwrap(), INFO_HASH);
        stream
            .write_all(&handshake::encode_header(&INFO_HASH))
            .await
            .unwrap();
        let mut id = [0u8; 20];
        stream.read_exact(&mut id).await.unwrap();
        stream.write_all(&REMOTE_ID).await.unwrap();
        stream
    }

    async fn connect_to(port: u16, token: &CancellationToken) -> Result<PeerSession, Error> {
        let info = PeerInfo::new(REMOTE_ID.into(), "127.0.0.1".parse().unwrap(), port);
        PeerSession::connect(info, INFO_HASH, PeerId::generate(), 3, 64 * 1024, token).await
    }

    #[tokio::test]
    async fn test_connect_happy_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let remote = tokio::spawn(accept_with_handshake(listener));

        let token = CancellationToken::new();
        let session = connect_to(port, &token).await.unwrap();
        assert_eq!(session.peer_info().port, port);
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_info_hash_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut header = [0u8; handshake::HEADER_LEN];
            stream.read_exact(&mut header).await.unwrap();
            let _ = stream
                .write_all(&handshake::encode_header(&[9u8; 20]))
                .await;
            let mut id = [0u8; 20];
            let _ = stream.read_exact(&mut id).await;
            let _ = stream.write_all(&REMOTE_ID).await;
        });

        let token = CancellationToken::new();
        let err = connect_to(port, &token).await.unwrap_err();
        assert!(err.to_string().contains("info hash mismatch"));
    }

    #[tokio::test]
    async fn test_connect_rejects_peer_id_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut header = [0u8; handshake::HEADER_LEN];
            stream.read_exact(&mut header).await.unwrap();
            stream
                .write_all(&handshake::encode_header(&INFO_HASH))
                .await
                .unwrap();
            let mut id = [0u8; 20];
            stream.read_exact(&mut id).await.unwrap();
            // identify as somebody else
            let _ = stream.write_all(&[8u8; 20]).await;
        });

        let token = CancellationToken::new();
        let err = connect_to(port, &token).await.unwrap_err();
        assert!(err.to_string().contains("peer id mismatch"));
    }

    #[tokio::test]
    async fn test_latch_bitfield_and_piece_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let remote = tokio::spawn(async move {
            let mut stream = accept_with_handshake(listener).await;
            // pieces 0 and 2 of 3
            wire::write_frame(&mut stream, &Message::Bitfield { bits: vec![0xa0] })
                .await
                .unwrap();
            wire::write_frame(&mut stream, &Message::Unchoke)
                .await
                .unwrap();
            let msg = wire::read_frame(&mut stream, 1024).await.unwrap();
            assert_eq!(msg, Message::Interested);
            wire::write_frame(
                &mut stream,
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    data: vec![1, 2, 3],
                },
            )
            .await
            .unwrap();
            // keep the socket open until the client hangs up
            let mut scratch = [0u8; 64];
            let _ = stream.read(&mut scratch).await;
        });

        let token = CancellationToken::new();
        let session = Arc::new(connect_to(port, &token).await.unwrap());
        let mut messages = session.subscribe().unwrap();
        let run = tokio::spawn(Arc::clone(&session).run());

        session.interested().await.unwrap();
        // idempotent: a second call writes nothing, so the remote's single
        // read_frame above stays in sync
        session.interested().await.unwrap();
        session.await_unchoked().await.unwrap();

        loop {
            match messages.recv().await.unwrap() {
                Message::Piece { index, begin, data } => {
                    assert_eq!((index, begin), (0, 0));
                    assert_eq!(data, vec![1, 2, 3]);
                    break;
                }
                _ => {}
            }
        }

        assert!(session.remote_has(0));
        assert!(!session.remote_has(1));
        assert!(session.remote_has(2));

        session.close().await;
        assert!(run.await.unwrap().unwrap_err().is_cancelled());
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_choke_reopens_latch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let remote = tokio::spawn(async move {
            let mut stream = accept_with_handshake(listener).await;
            wire::write_frame(&mut stream, &Message::Unchoke)
                .await
                .unwrap();
            wire::write_frame(&mut stream, &Message::Choke)
                .await
                .unwrap();
            // sync point: the client observes CHOKE strictly before this
            wire::write_frame(&mut stream, &Message::Have { piece_index: 1 })
                .await
                .unwrap();
            let mut scratch = [0u8; 64];
            let _ = stream.read(&mut scratch).await;
        });

        let token = CancellationToken::new();
        let session = Arc::new(connect_to(port, &token).await.unwrap());
        let mut messages = session.subscribe().unwrap();
        let run = tokio::spawn(Arc::clone(&session).run());

        loop {
            if let Message::Have { piece_index } = messages.recv().await.unwrap() {
                assert_eq!(piece_index, 1);
                break;
            }
        }
        // the latch was opened by UNCHOKE and closed again by CHOKE
        assert!(!*session.unchoked().borrow());

        session.close().await;
        let _ = run.await.unwrap();
        remote.await.unwrap();
    }

    #[tokio::test]
    async fn test_outbound_control_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let remote = tokio::spawn(async move {
            let mut stream = accept_with_handshake(listener).await;
            let mut received = Vec::new();
            for _ in 0..4 {
                received.push(wire::read_frame(&mut stream, 1024).await.unwrap());
            }
            received
        });

        let token = CancellationToken::new();
        let session = connect_to(port, &token).await.unwrap();
        let block = Block {
            piece_index: 2,
            begin: 0,
            length: 16384,
        };
        session.interested().await.unwrap();
        session.have(2).await.unwrap();
        session.cancel(block).await.unwrap();
        session.not_interested().await.unwrap();
        // no longer interested, so this second call writes nothing
        session.not_interested().await.unwrap();

        let received = remote.await.unwrap();
        assert_eq!(
            received,
            vec![
                Message::Interested,
                Message::Have { piece_index: 2 },
                Message::Cancel(block),
                Message::NotInterested,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_message_type_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut stream = accept_with_handshake(listener).await;
            // type byte 9 is not a message this client speaks
            let _ = stream.write_all(&[0, 0, 0, 1, 9]).await;
            let mut scratch = [0u8; 64];
            let _ = stream.read(&mut scratch).await;
        });

        let token = CancellationToken::new();
        let session = Arc::new(connect_to(port, &token).await.unwrap());
        let err = Arc::clone(&session).run().await.unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }

    #[tokio::test]
    async fn test_bitfield_after_have_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut stream = accept_with_handshake(listener).await;
            wire::write_frame(&mut stream, &Message::Have { piece_index: 0 })
                .await
                .unwrap();
            let _ = wire::write_frame(&mut stream, &Message::Bitfield { bits: vec![0xa0] }).await;
            let mut scratch = [0u8; 64];
            let _ = stream.read(&mut scratch).await;
        });

        let token = CancellationToken::new();
        let session = Arc::new(connect_to(port, &token).await.unwrap());
        let err = Arc::clone(&session).run().await.unwrap_err();
        assert!(err.to_string().contains("BITFIELD"));
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let remote = tokio::spawn(accept_with_handshake(listener));

        let token = CancellationToken::new();
        let session = connect_to(port, &token).await.unwrap();
        assert!(session.subscribe().is_ok());
        assert!(session.subscribe().is_err());
        remote.await.unwrap();
    }
}
