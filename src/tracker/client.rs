//! HTTP tracker announces
//!
//! An announce is a GET whose query carries the raw info-hash and peer id
//! percent-encoded byte by byte, plus transfer metrics from the metrics
//! supplier. The bencoded response carries the re-announce interval and
//! the peer list; a `failure` key is the tracker telling us why not.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::bencode::{self, Value};
use crate::error::Error;
use crate::peer::id::{PeerId, PeerInfo};
use crate::torrent::info::Metainfo;

/// HTTP timeout for a single announce
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

/// Transfer totals reported to the tracker
pub trait Metrics: Send + Sync {
    fn uploaded(&self) -> u64;
    fn downloaded(&self) -> u64;
    fn left(&self) -> u64;
}

/// Metrics that never change; pretends nothing has been transferred yet
pub struct FixedMetrics {
    pub total_size: u64,
}

impl Metrics for FixedMetrics {
    fn uploaded(&self) -> u64 {
        0
    }

    fn downloaded(&self) -> u64 {
        0
    }

    fn left(&self) -> u64 {
        self.total_size
    }
}

/// Lifecycle events reported to the tracker; the periodic announce sends
/// none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    Completed,
}

impl Event {
    fn as_str(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
        }
    }
}

/// Announces to one torrent's HTTP tracker and caches the peer list
pub struct TrackerClient {
    http: reqwest::Client,
    announce_url: Url,
    info_hash: [u8; 20],
    self_id: PeerId,
    port: u16,
    metrics: Arc<dyn Metrics>,
    peers: Mutex<Vec<PeerInfo>>,
}

impl TrackerClient {
    pub fn new(
        meta: &Metainfo,
        self_id: PeerId,
        port: u16,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(ANNOUNCE_TIMEOUT)
            .build()
            .map_err(|e| Error::tracker_full("failed to build http client", meta.announce.as_str(), e.to_string()))?;
        Ok(Self {
            http,
            announce_url: meta.announce.clone(),
            info_hash: meta.info_hash,
            self_id,
            port,
            metrics,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// One announce. Replaces the peer cache on success and returns the
    /// tracker's re-announce interval.
    pub async fn announce(&self, event: Option<Event>) -> Result<Duration, Error> {
        let url = self.announce_request_url(event);
        debug!(url = %url, "announcing");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.err("announce request failed", e.to_string()))?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(self.err(
                "tracker responded with unexpected HTTP status",
                status.to_string(),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| self.err("failed to read announce response", e.to_string()))?;

        // a tracker-declared failure passes through verbatim
        let (interval, peers) = match parse_response(&body) {
            Ok(parsed) => parsed,
            Err(err @ Error::Tracker { .. }) => return Err(err),
            Err(err) => return Err(self.err("malformed announce response", err.to_string())),
        };

        info!(
            interval = interval.as_secs(),
            peers = peers.len(),
            event = event.map(|e| e.as_str()).unwrap_or("none"),
            "tracker sync complete"
        );
        *self.peers.lock().expect("peer cache poisoned") = peers;
        Ok(interval)
    }

    /// Re-announce on the tracker's schedule until cancelled. Announce
    /// failures are logged and retried on the next tick; a changed
    /// interval resets the schedule.
    pub async fn run_periodic(&self, first_interval: Duration, token: CancellationToken) {
        let mut interval = first_interval;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(interval) => {}
            }
            match self.announce(None).await {
                Ok(new_interval) => {
                    if new_interval != interval {
                        info!(
                            old = interval.as_secs(),
                            new = new_interval.as_secs(),
                            "tracker changed the announce interval"
                        );
                        interval = new_interval;
                    }
                }
                Err(e) => warn!(error = %e, "periodic announce failed; will retry"),
            }
        }
    }

    /// Snapshot of the most recent peer list
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().expect("peer cache poisoned").clone()
    }

    pub async fn started(&self) -> Result<(), Error> {
        self.announce(Some(Event::Started)).await.map(|_| ())
    }

    pub async fn stopped(&self) -> Result<(), Error> {
        self.announce(Some(Event::Stopped)).await.map(|_| ())
    }

    pub async fn completed(&self) -> Result<(), Error> {
        self.announce(Some(Event::Completed)).await.map(|_| ())
    }

    fn err(&self, message: &str, source: String) -> Error {
        Error::tracker_full(message, self.announce_url.as_str(), source)
    }

    fn announce_request_url(&self, event: Option<Event>) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=0",
            percent_encode(&self.info_hash),
            percent_encode(self.self_id.as_bytes()),
            self.port,
            self.metrics.uploaded(),
            self.metrics.downloaded(),
            self.metrics.left(),
        );
        if let Some(event) = event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }

        let mut url = self.announce_url.to_string();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
        url
    }
}

/// Percent-encode arbitrary bytes for a query string. Unreserved
/// characters pass through; everything else becomes %XX.
fn percent_encode(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len() * 3);
    for &byte in data {
        match byte {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

/// Pull the interval and peer list out of a bencoded announce response
fn parse_response(body: &[u8]) -> Result<(Duration, Vec<PeerInfo>), Error> {
    let root = bencode::decode(body)?;
    let dict = root
        .as_dict()
        .ok_or_else(|| Error::parse("response must be a dictionary"))?;

    if let Some(failure) = dict
        .get(b"failure".as_ref())
        .or_else(|| dict.get(b"failure reason".as_ref()))
    {
        let reason = failure
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", failure));
        return Err(Error::tracker(reason));
    }

    let interval = dict
        .get(b"interval".as_ref())
        .and_then(Value::as_int)
        .filter(|i| *i > 0)
        .ok_or_else(|| Error::parse("missing interval"))?;

    let peer_values = dict
        .get(b"peers".as_ref())
        .and_then(Value::as_list)
        .ok_or_else(|| Error::parse("missing peer list"))?;

    let mut peers = Vec::with_capacity(peer_values.len());
    for value in peer_values {
        let entry = value
            .as_dict()
            .ok_or_else(|| Error::parse("peer entry must be a dictionary"))?;
        let id = entry
            .get(b"peer id".as_ref())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::parse("peer entry is missing its id"))?;
        let id = PeerId::from_bytes(id)?;
        let ip: IpAddr = entry
            .get(b"ip".as_ref())
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("peer entry is missing its ip"))?
            .parse()
            .map_err(|_| Error::parse("peer ip is not an address"))?;
        let port = entry
            .get(b"port".as_ref())
            .and_then(Value::as_int)
            .filter(|p| (0..=u16::MAX as i64).contains(p))
            .ok_or_else(|| Error::parse("peer entry is missing a valid port"))?;
        peers.push(PeerInfo::new(id, ip, port as u16));
    }

    Ok((Duration::from_secs(interval as u64), peers))
}
