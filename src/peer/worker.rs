//! Piece download worker
//!
//! One worker drives one peer session. It keeps the pieces it has been
//! assigned, converts inbound PIECE messages into piece progress, and runs
//! a requester loop that sends the next REQUEST whenever it is signalled.
//! Completed pieces are verified and handed to the completion callback,
//! which answers with the worker's next assignment.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::peer::retry::retry_with_backoff;
use crate::peer::session::PeerSession;
use crate::protocol::message::{Block, Message};
use crate::storage::piece::Piece;

/// First retry delay when a block request fails
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Request attempts before the piece is handed back as failed
const MAX_REQUEST_ATTEMPTS: u32 = 5;

/// Completion callback: receives the piece and its outcome, returns the
/// worker's next assignment if there is one
pub type PieceCallback = Arc<dyn Fn(Piece, Result<(), Error>) -> Option<Piece> + Send + Sync>;

/// Downloads assigned pieces from one peer
pub struct Worker {
    session: Arc<PeerSession>,
    callback: PieceCallback,
    in_progress: Mutex<BTreeMap<u32, Piece>>,
    next_request: Notify,
    token: CancellationToken,
    /// The most recently sent REQUEST the peer has not answered yet;
    /// withdrawn with CANCEL when the worker abandons it
    outstanding: Mutex<Option<Block>>,
    /// Set once the coordinator reclaims this worker's pieces; assignments
    /// are refused from then on so nothing can strand in a dead worker
    retired: AtomicBool,
}

impl Worker {
    pub fn new(
        session: Arc<PeerSession>,
        callback: PieceCallback,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            callback,
            in_progress: Mutex::new(BTreeMap::new()),
            next_request: Notify::new(),
            token: parent.child_token(),
            outstanding: Mutex::new(None),
            retired: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &Arc<PeerSession> {
        &self.session
    }

    /// Assign a piece to this worker and wake the requester loop. A
    /// retired worker refuses the assignment and hands the piece back.
    pub fn request_piece(&self, piece: Piece) -> Option<Piece> {
        if self.retired.load(Ordering::Acquire) {
            return Some(piece);
        }
        debug!(
            peer = %self.session.peer_info().socket_addr(),
            piece = piece.index(),
            "assigned piece"
        );
        self.in_progress
            .lock()
            .expect("worker state poisoned")
            .insert(piece.index(), piece);
        self.next_request.notify_one();
        None
    }

    /// How many pieces are currently assigned and unfinished
    pub fn assigned_count(&self) -> usize {
        self.in_progress
            .lock()
            .expect("worker state poisoned")
            .len()
    }

    /// Drain whatever the worker was still working on. The coordinator
    /// calls this after the worker dies to put the pieces back in the
    /// pending set.
    pub fn take_in_progress(&self) -> Vec<Piece> {
        self.retired.store(true, Ordering::Release);
        std::mem::take(&mut *self.in_progress.lock().expect("worker state poisoned"))
            .into_values()
            .collect()
    }

    /// Run until the session ends or the coordinator cancels.
    ///
    /// The session's read loop runs as its own task; this loop consumes
    /// the subscribed message stream.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut messages = self.session.subscribe()?;
        let mut session_task = tokio::spawn(Arc::clone(&self.session).run());
        let requester = tokio::spawn(Arc::clone(&self).requester_loop());

        let result = loop {
            tokio::select! {
                _ = self.token.cancelled() => break Err(Error::Cancelled),
                joined = &mut session_task => {
                    break match joined {
                        Ok(session_result) => session_result,
                        Err(e) => Err(Error::session_with_source(
                            "session task failed",
                            e.to_string(),
                        )),
                    };
                }
                message = messages.recv() => match message {
                    Some(Message::Piece { index, begin, data }) => {
                        self.receive_block(index, begin, data);
                    }
                    Some(_) => {}
                    None => break Err(Error::session("message stream closed")),
                },
            }
        };

        // the requester observes the cancelled tokens and drains; joining
        // it guarantees no assignment lands after the coordinator reclaims
        self.token.cancel();
        // withdraw any request still in flight before the connection goes
        let abandoned = self
            .outstanding
            .lock()
            .expect("worker state poisoned")
            .take();
        if let Some(block) = abandoned {
            if let Err(e) = self.session.cancel(block).await {
                debug!(
                    piece = block.piece_index,
                    error = %e,
                    "could not cancel in-flight request"
                );
            }
        }
        self.session.close().await;
        let _ = requester.await;
        result
    }

    /// Write one received block into its piece. A finished piece is
    /// verified and reported; either way the requester is signalled so the
    /// next REQUEST goes out.
    fn receive_block(&self, index: u32, begin: u32, data: Vec<u8>) {
        let block = Block {
            piece_index: index,
            begin,
            length: data.len() as u32,
        };
        trace!(piece = index, begin, length = block.length, "received block");

        {
            // the request this block answers is no longer in flight
            let mut outstanding = self.outstanding.lock().expect("worker state poisoned");
            if *outstanding == Some(block) {
                *outstanding = None;
            }
        }

        let finished = {
            let mut in_progress = self.in_progress.lock().expect("worker state poisoned");
            match in_progress.get_mut(&index) {
                None => {
                    debug!(piece = index, "block for a piece this worker never requested");
                    None
                }
                Some(piece) => match piece.add_block(block, &data) {
                    Err(e) => {
                        warn!(piece = index, error = %e, "discarding block");
                        None
                    }
                    Ok(()) if piece.is_complete() => in_progress.remove(&index),
                    Ok(()) => None,
                },
            }
        };

        if let Some(piece) = finished {
            let index = piece.index();
            let outcome = if piece.verify() {
                debug!(piece = index, "piece complete and verified");
                Ok(())
            } else {
                warn!(piece = index, "piece failed verification");
                Err(Error::HashMismatch { piece: index })
            };
            if let Some(next) = (self.callback)(piece, outcome) {
                if let Some(rejected) = self.request_piece(next) {
                    warn!(piece = rejected.index(), "worker retired; dropping assignment");
                }
            }
        }

        self.next_request.notify_one();
    }

    /// Send one REQUEST per wake-up: express interest, wait out the choke
    /// latch, then ask for the first missing block of the first assigned
    /// piece. Retries back off exponentially; exhaustion fails the piece.
    async fn requester_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = self.next_request.notified() => {}
            }

            let target = {
                let in_progress = self.in_progress.lock().expect("worker state poisoned");
                in_progress
                    .values()
                    .find_map(|piece| piece.missing_blocks().into_iter().next())
            };
            let Some(block) = target else { continue };

            let sent = retry_with_backoff(
                &self.token,
                INITIAL_RETRY_DELAY,
                MAX_REQUEST_ATTEMPTS,
                || self.request_block(block),
            )
            .await;

            match sent {
                Ok(()) => {
                    *self.outstanding.lock().expect("worker state poisoned") = Some(block);
                }
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    // an earlier attempt may have reached the peer; tell it
                    // we gave up before abandoning the piece
                    if let Err(e) = self.session.cancel(block).await {
                        debug!(
                            piece = block.piece_index,
                            error = %e,
                            "could not cancel abandoned request"
                        );
                    }
                    self.outstanding
                        .lock()
                        .expect("worker state poisoned")
                        .take();
                    let piece = self
                        .in_progress
                        .lock()
                        .expect("worker state poisoned")
                        .remove(&block.piece_index);
                    if let Some(piece) = piece {
                        let index = piece.index();
                        warn!(piece = index, error = %err, "request retries exhausted");
                        let outcome = Err(Error::RequestExhausted {
                            piece: index,
                            attempts: MAX_REQUEST_ATTEMPTS,
                        });
                        if let Some(next) = (self.callback)(piece, outcome) {
                            if let Some(rejected) = self.request_piece(next) {
                                warn!(
                                    piece = rejected.index(),
                                    "worker retired; dropping assignment"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    async fn request_block(&self, block: Block) -> Result<(), Error> {
        self.session.interested().await?;
        self.session.await_unchoked().await?;
        self.session.request(block).await
    }
}
