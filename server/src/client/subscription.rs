//! Live connections as a stream of [`SubscriptionEvent`]s.
//!
//! [`SseSubscription`] owns the reconnect policy: when the HTTP stream drops
//! it reports an `Error`, waits per its [`Backoff`], and reports `Open` again
//! once reconnected. Callers never reconnect by hand.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::Backoff;
use crate::handlers::identity::USER_ID_HEADER;
use crate::models::UserId;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Open,
    /// One raw frame, undecoded.
    Message(String),
    Error(String),
}

#[async_trait]
pub trait Subscription: Send {
    /// `None` once the subscription is closed for good.
    async fn next(&mut self) -> Option<SubscriptionEvent>;

    fn close(&mut self);
}

/// In-process subscription fed through a channel.
#[derive(Debug)]
pub struct ChannelSubscription {
    events: mpsc::Receiver<SubscriptionEvent>,
}

impl ChannelSubscription {
    pub fn new(capacity: usize) -> (mpsc::Sender<SubscriptionEvent>, Self) {
        let (tx, events) = mpsc::channel(capacity.max(1));
        (tx, Self { events })
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        self.events.close();
    }
}

/// Server-sent events over HTTP.
#[derive(Debug)]
pub struct SseSubscription {
    events: mpsc::Receiver<SubscriptionEvent>,
    task: JoinHandle<()>,
}

impl SseSubscription {
    pub fn connect(http: Client, url: String, user: UserId, backoff: Backoff) -> Self {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(pump(http, url, user, backoff, tx));
        Self { events, task }
    }
}

#[async_trait]
impl Subscription for SseSubscription {
    async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        self.task.abort();
        self.events.close();
    }
}

impl Drop for SseSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump(
    http: Client,
    url: String,
    user: UserId,
    backoff: Backoff,
    tx: mpsc::Sender<SubscriptionEvent>,
) {
    let mut attempt = 0;
    loop {
        let outcome = stream_once(&http, &url, user, &tx, &mut attempt).await;
        let reason = match outcome {
            Ok(()) => "stream ended".to_string(),
            Err(reason) => reason,
        };
        if tx.send(SubscriptionEvent::Error(reason.clone())).await.is_err() {
            return;
        }
        if backoff.gives_up_after(attempt) {
            warn!(user_id = %user, attempt, "Giving up on notification stream");
            return;
        }
        let delay = backoff.delay(attempt);
        debug!(user_id = %user, attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "Reconnecting");
        attempt += 1;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tx.closed() => return,
        }
    }
}

/// Runs one connection until it ends. `attempt` resets once a connection
/// opens.
async fn stream_once(
    http: &Client,
    url: &str,
    user: UserId,
    tx: &mpsc::Sender<SubscriptionEvent>,
    attempt: &mut u32,
) -> Result<(), String> {
    let response = http
        .get(url)
        .header(USER_ID_HEADER, user.to_string())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("stream refused with status {}", response.status()));
    }

    *attempt = 0;
    info!(user_id = %user, "Notification stream open");
    if tx.send(SubscriptionEvent::Open).await.is_err() {
        return Ok(());
    }

    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        for frame in parser.push(&chunk) {
            if tx.send(SubscriptionEvent::Message(frame)).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Longest line or joined frame the parser keeps. Anything larger is dropped.
const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Splits an `text/event-stream` body into frames.
///
/// Data lines are joined and emitted when their event ends. Comment lines
/// (`: keepalive`) are emitted as they arrive so idle-channel markers reach
/// the frame decoder. Lines or frames over [`MAX_FRAME_BYTES`] are logged and
/// dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    data_len: usize,
    /// Inside a line whose head was already discarded.
    skipping_line: bool,
    /// Inside an event whose data was already discarded.
    skipping_event: bool,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let raw = match raw.last() {
                Some(b'\r') => &raw[..raw.len() - 1],
                _ => raw,
            };
            let raw_len = raw.len();
            let line = if self.skipping_line || raw_len > MAX_FRAME_BYTES {
                None
            } else {
                Some(String::from_utf8_lossy(raw).into_owned())
            };
            start = end + 1;

            match line {
                Some(line) => {
                    if let Some(frame) = self.line(&line) {
                        frames.push(frame);
                    }
                }
                None => {
                    if !self.skipping_line {
                        warn!(bytes = raw_len, "Dropping oversized stream line");
                    }
                    self.skipping_line = false;
                }
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_FRAME_BYTES {
            warn!(bytes = self.buffer.len(), "Dropping oversized stream line");
            self.buffer.clear();
            self.skipping_line = true;
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            let skipped = std::mem::take(&mut self.skipping_event);
            let data = std::mem::take(&mut self.data);
            self.data_len = 0;
            if skipped || data.is_empty() {
                return None;
            }
            return Some(data.join("\n"));
        }
        if line.starts_with(':') {
            return Some(line.to_string());
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" && !self.skipping_event {
            self.data_len += value.len() + 1;
            if self.data_len > MAX_FRAME_BYTES {
                warn!(bytes = self.data_len, "Dropping oversized stream frame");
                self.data.clear();
                self.data_len = 0;
                self.skipping_event = true;
            } else {
                self.data.push(value.to_string());
            }
        }
        None
    }
}
