//! Socket Feed - Streaming WebSocket Price Source
//!
//! Connects to a live tick server and normalizes its JSON messages
//! into the common `Tick` shape. The wire format carries one tick per
//! text frame: `{"ccy": "EURUSD", "bid": 1.0950, "offer": 1.0952,
//! "ts": 1719.5}` plus an initial status frame describing the server,
//! which is logged and skipped. Ping/pong is handled by tungstenite.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::tick::{Instrument, SourceId, Tick};
use crate::ports::source::{FeedError, SourceAdapter};

/// Socket source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// WebSocket server URL.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "ws://localhost:8765".to_string()
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

/// Wire messages the server may send.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMsg {
    Status {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        symbols: Vec<String>,
        #[serde(default)]
        playback_speed: Option<f64>,
    },
    Tick(WireTick),
}

/// One tick frame. Older servers send "pair" instead of "ccy".
#[derive(Debug, Deserialize)]
struct WireTick {
    #[serde(alias = "pair")]
    ccy: String,
    bid: f64,
    #[serde(alias = "ask")]
    offer: f64,
    /// Epoch seconds with fractional part.
    ts: Option<f64>,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket price source implementing the source port.
pub struct SocketFeed {
    url: String,
    instruments: Vec<Instrument>,
    ws: Option<WsStream>,
}

impl SocketFeed {
    pub fn new(instruments: Vec<Instrument>, cfg: &SocketConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            instruments,
            ws: None,
        }
    }

    fn wire_ts(ts: Option<f64>) -> DateTime<Utc> {
        ts.and_then(|secs| {
            let millis = (secs * 1_000.0) as i64;
            Utc.timestamp_millis_opt(millis).single()
        })
        .unwrap_or_else(Utc::now)
    }

    fn parse_frame(instruments: &[Instrument], text: &str) -> Result<Option<Tick>, FeedError> {
        let msg: WireMsg = serde_json::from_str(text)
            .map_err(|e| FeedError::Protocol(format!("invalid feed JSON: {e}")))?;

        match msg {
            WireMsg::Status {
                kind,
                symbols,
                playback_speed,
            } => {
                info!(
                    kind = %kind,
                    symbols = symbols.len(),
                    playback_speed = ?playback_speed,
                    "socket feed server status"
                );
                Ok(None)
            }
            WireMsg::Tick(wire) => {
                if !instruments.iter().any(|i| *i == wire.ccy) {
                    debug!(ccy = %wire.ccy, "ignoring unsubscribed pair");
                    return Ok(None);
                }
                if !(wire.bid.is_finite() && wire.offer.is_finite()) || wire.bid > wire.offer {
                    return Err(FeedError::Protocol(format!(
                        "incoherent two-way price {}/{} for {}",
                        wire.bid, wire.offer, wire.ccy
                    )));
                }
                Ok(Some(Tick {
                    instrument: wire.ccy,
                    bid: wire.bid,
                    ask: wire.offer,
                    ts: Self::wire_ts(wire.ts),
                    seq: 0,
                    source: SourceId::Socket,
                }))
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for SocketFeed {
    fn id(&self) -> SourceId {
        SourceId::Socket
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        info!(url = %self.url, "connecting to socket feed");
        let (ws, _) = connect_async(&self.url).await.map_err(|e| FeedError::Connect {
            id: SourceId::Socket,
            reason: e.to_string(),
        })?;
        self.ws = Some(ws);
        info!(url = %self.url, "socket feed connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            // Best-effort close; the session is gone either way.
            let _ = futures_util::SinkExt::send(&mut ws, Message::Close(None)).await;
        }
    }

    async fn next_tick(&mut self) -> Result<Tick, FeedError> {
        // Cancel-safe: the read borrows the session in place, so a
        // caller racing this against timers can drop the future and
        // call again without losing the connection.
        let ws = self.ws.as_mut().ok_or(FeedError::Closed)?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    match Self::parse_frame(&self.instruments, &text) {
                        Ok(Some(tick)) => return Ok(tick),
                        Ok(None) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is sent automatically by tungstenite.
                    debug!(len = data.len(), "socket feed ping");
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FeedError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket feed transport error");
                    return Err(FeedError::Closed);
                }
            }
        }
    }
}
