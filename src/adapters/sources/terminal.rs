//! Terminal Feed - Proprietary Terminal Gateway Source
//!
//! Talks to the desktop terminal's local data gateway over TCP
//! (conventionally localhost:8194). The session is line-oriented
//! JSON: a subscribe frame listing the wanted pairs, an ack from the
//! gateway, then one tick object per line in the same `ccy`/`bid`/
//! `offer` schema as the socket feed. Gateway quirks (missing ack,
//! truncated lines) are mapped into the shared error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::domain::tick::{Instrument, SourceId, Tick};
use crate::ports::source::{FeedError, SourceAdapter};

/// Terminal gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on the TCP connect plus handshake, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8194
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    op: &'static str,
    ccys: &'a [Instrument],
}

#[derive(Deserialize)]
struct AckFrame {
    op: String,
}

#[derive(Debug, Deserialize)]
struct WireTick {
    ccy: String,
    bid: f64,
    offer: f64,
    ts: Option<f64>,
}

struct Session {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

/// Terminal gateway source implementing the source port.
pub struct TerminalFeed {
    cfg: TerminalConfig,
    instruments: Vec<Instrument>,
    session: Option<Session>,
}

impl TerminalFeed {
    pub fn new(instruments: Vec<Instrument>, cfg: &TerminalConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            instruments,
            session: None,
        }
    }

    fn connect_err(&self, reason: impl std::fmt::Display) -> FeedError {
        FeedError::Connect {
            id: SourceId::Terminal,
            reason: reason.to_string(),
        }
    }

    async fn handshake(&self) -> Result<Session, FeedError> {
        let addr = format!("{}:{}", self.cfg.host, self.cfg.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| self.connect_err(format!("{addr}: {e}")))?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let frame = serde_json::to_string(&SubscribeFrame {
            op: "subscribe",
            ccys: &self.instruments,
        })
        .map_err(|e| self.connect_err(e))?;
        writer
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .map_err(|e| self.connect_err(e))?;

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| self.connect_err(e))?;
        if n == 0 {
            return Err(self.connect_err("gateway closed during handshake"));
        }
        let ack: AckFrame = serde_json::from_str(line.trim())
            .map_err(|e| self.connect_err(format!("bad handshake frame: {e}")))?;
        if ack.op != "ack" {
            return Err(self.connect_err(format!("unexpected handshake op '{}'", ack.op)));
        }

        Ok(Session {
            lines: reader.lines(),
            writer,
        })
    }

    fn parse_line(instruments: &[Instrument], line: &str) -> Result<Option<Tick>, FeedError> {
        let wire: WireTick = serde_json::from_str(line)
            .map_err(|e| FeedError::Protocol(format!("invalid gateway line: {e}")))?;

        if !instruments.iter().any(|i| *i == wire.ccy) {
            debug!(ccy = %wire.ccy, "ignoring unsubscribed pair from gateway");
            return Ok(None);
        }
        if !(wire.bid.is_finite() && wire.offer.is_finite()) || wire.bid > wire.offer {
            return Err(FeedError::Protocol(format!(
                "incoherent two-way price {}/{} for {}",
                wire.bid, wire.offer, wire.ccy
            )));
        }

        let ts = wire
            .ts
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1_000.0) as i64).single())
            .unwrap_or_else(Utc::now);

        Ok(Some(Tick {
            instrument: wire.ccy,
            bid: wire.bid,
            ask: wire.offer,
            ts,
            seq: 0,
            source: SourceId::Terminal,
        }))
    }
}

#[async_trait]
impl SourceAdapter for TerminalFeed {
    fn id(&self) -> SourceId {
        SourceId::Terminal
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        let timeout = Duration::from_millis(self.cfg.connect_timeout_ms);
        let session = tokio::time::timeout(timeout, self.handshake())
            .await
            .map_err(|_| self.connect_err("connect timed out"))??;
        self.session = Some(session);

        info!(
            host = %self.cfg.host,
            port = self.cfg.port,
            pairs = self.instruments.len(),
            "terminal gateway session open"
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.writer.shutdown().await;
        }
    }

    async fn next_tick(&mut self) -> Result<Tick, FeedError> {
        // Cancel-safe: `next_line` can be dropped mid-read and resumed
        // on the next call without corrupting the line framing.
        let session = self.session.as_mut().ok_or(FeedError::Closed)?;

        loop {
            match session.lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match Self::parse_line(&self.instruments, trimmed) {
                        Ok(Some(tick)) => return Ok(tick),
                        Ok(None) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Ok(None) => return Err(FeedError::Closed),
                Err(e) => {
                    debug!(error = %e, "terminal gateway read failed");
                    return Err(FeedError::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn feed(port: u16) -> TerminalFeed {
        TerminalFeed::new(
            vec!["EURUSD".to_string()],
            &TerminalConfig {
                host: "127.0.0.1".to_string(),
                port,
                connect_timeout_ms: 2_000,
            },
        )
    }

    fn parse(line: &str) -> Result<Option<Tick>, FeedError> {
        TerminalFeed::parse_line(&["EURUSD".to_string()], line)
    }

    #[test]
    fn parses_gateway_line() {
        let tick = parse(r#"{"ccy":"EURUSD","bid":1.0950,"offer":1.0952,"ts":100.5}"#)
            .expect("valid line")
            .expect("is a tick");
        assert_eq!(tick.source, SourceId::Terminal);
        assert!((tick.mid() - 1.0951).abs() < 1e-9);
    }

    #[test]
    fn truncated_line_is_protocol_error() {
        let err = parse(r#"{"ccy":"EURUSD","bid":1.09"#).expect_err("truncated");
        assert!(matches!(err, FeedError::Protocol(_)));
    }

    #[tokio::test]
    async fn connect_refused_maps_to_connect_error() {
        // Bind-then-drop gives a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let mut feed = feed(port);
        match feed.connect().await {
            Err(FeedError::Connect { id, .. }) => assert_eq!(id, SourceId::Terminal),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_then_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.expect("read subscribe");
            let subscribe = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(subscribe.contains("\"subscribe\""));

            sock.write_all(b"{\"op\":\"ack\"}\n").await.expect("ack");
            sock.write_all(
                b"{\"ccy\":\"EURUSD\",\"bid\":1.0950,\"offer\":1.0952,\"ts\":42.0}\n",
            )
            .await
            .expect("tick");
        });

        let mut feed = feed(port);
        feed.connect().await.expect("handshake");
        let tick = feed.next_tick().await.expect("first tick");
        assert_eq!(tick.instrument, "EURUSD");

        // Server hung up; the session must report closure.
        server.await.expect("server task");
        assert!(matches!(feed.next_tick().await, Err(FeedError::Closed)));
        feed.disconnect().await;
    }
}
