//! Socket.IO listener for real-time message status events
//!
//! Speaks just enough of Engine.IO v4 / Socket.IO v5 over a plain
//! WebSocket to authenticate, answer heartbeats and collect events such as
//! `message:sent` and `message:delivered`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// Engine.IO transport packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn parse(frame: &str) -> E2eResult<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| E2eError::Socket("empty engine.io frame".to_string()))?;
        let rest = chars.as_str();

        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(rest)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(rest.to_string()),
            '3' => EnginePacket::Pong(rest.to_string()),
            '4' => EnginePacket::Message(rest.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(E2eError::Socket(format!("unknown engine.io packet type '{other}'"))),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(v) => format!("0{v}"),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(d) => format!("2{d}"),
            EnginePacket::Pong(d) => format!("3{d}"),
            EnginePacket::Message(m) => format!("4{m}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn parse(payload: &str) -> E2eResult<Self> {
        let mut rest = payload;
        let kind = rest
            .chars()
            .next()
            .ok_or_else(|| E2eError::Socket("empty socket.io packet".to_string()))?;
        rest = &rest[kind.len_utf8()..];

        // Binary attachment count ("<n>-") is not supported for plain JSON events
        if matches!(kind, '5' | '6') {
            return Err(E2eError::Socket("binary socket.io packets are not supported".to_string()));
        }

        // Optional namespace: "/admin,"
        if rest.starts_with('/') {
            rest = rest.find(',').map_or("", |i| &rest[i + 1..]);
        }

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let ack = if digits > 0 {
            rest[..digits].parse().ok()
        } else {
            None
        };
        rest = &rest[digits..];

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(match kind {
            '0' => SocketPacket::Connect(data),
            '1' => SocketPacket::Disconnect,
            '2' => {
                let mut items = match data {
                    Some(Value::Array(items)) if !items.is_empty() => items,
                    _ => return Err(E2eError::Socket(format!("malformed event packet: {payload}"))),
                };
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(E2eError::Socket(format!("event name is not a string: {other}"))),
                };
                SocketPacket::Event { name, args: items, ack }
            }
            '3' => SocketPacket::Ack {
                id: ack.ok_or_else(|| E2eError::Socket(format!("ack without id: {payload}")))?,
                args: match data {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
            },
            '4' => SocketPacket::ConnectError(data.unwrap_or(Value::Null)),
            other => return Err(E2eError::Socket(format!("unknown socket.io packet type '{other}'"))),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{auth}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, args, ack } => {
                let mut items = vec![Value::String(name.clone())];
                items.extend(args.iter().cloned());
                let ack = ack.map(|a| a.to_string()).unwrap_or_default();
                format!("2{ack}{}", Value::Array(items))
            }
            SocketPacket::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            SocketPacket::ConnectError(v) => format!("4{v}"),
        }
    }
}

/// An event received from the server
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub name: String,
    pub args: Vec<Value>,
    pub received_at: Instant,
}

/// Build the websocket URL for an HTTP origin, passing the JWT as a query parameter
pub fn socket_url(origin: &str, token: &str) -> E2eResult<String> {
    let mut url = Url::parse(origin).map_err(|e| E2eError::Config(format!("invalid socket origin '{origin}': {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(E2eError::Config(format!("unsupported socket scheme: {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| E2eError::Config(format!("cannot use scheme {scheme} for {origin}")))?;
    url.set_path("/socket.io/");
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("token", token);

    Ok(url.to_string())
}

pub struct SocketListener {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    buffered: VecDeque<SocketEvent>,
    /// Set once the server closed the stream; it is never polled again
    ended: bool,
}

impl SocketListener {
    /// Connect, complete the Engine.IO handshake and join the default namespace
    pub async fn connect(origin: &str, token: &str, connect_timeout: Duration) -> E2eResult<Self> {
        let url = socket_url(origin, token)?;
        info!("Connecting socket to {}", origin);

        let (stream, _) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| E2eError::Timeout(format!("socket connect to {origin}")))??;

        let mut listener = Self {
            stream,
            buffered: VecDeque::new(),
            ended: false,
        };

        match listener.next_engine_packet(connect_timeout).await? {
            EnginePacket::Open(handshake) => debug!("Engine.IO open: {}", handshake),
            other => return Err(E2eError::Socket(format!("expected open packet, got {other:?}"))),
        }

        let connect = SocketPacket::Connect(Some(json!({ "token": token })));
        listener.send_engine(EnginePacket::Message(connect.encode())).await?;

        let deadline = Instant::now() + connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match listener.next_socket_packet(remaining).await? {
                SocketPacket::Connect(_) => break,
                SocketPacket::ConnectError(reason) => {
                    return Err(E2eError::Socket(format!("connection refused: {reason}")));
                }
                SocketPacket::Event { name, args, .. } => listener.buffer(name, args),
                SocketPacket::Disconnect => {
                    return Err(E2eError::Socket("server closed before namespace connect".to_string()));
                }
                _ => {}
            }
        }

        info!("Socket connected");
        Ok(listener)
    }

    /// Wait for `event`, returning its arguments. Events received earlier are checked first.
    pub async fn wait_for(&mut self, event: &str, wait: Duration) -> E2eResult<SocketEvent> {
        if let Some(pos) = self.buffered.iter().position(|e| e.name == event) {
            if let Some(found) = self.buffered.remove(pos) {
                return Ok(found);
            }
        }

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(E2eError::Timeout(format!("socket event '{event}'")));
            }
            match self.next_socket_packet(remaining).await {
                Ok(SocketPacket::Event { name, args, .. }) if name == event => {
                    return Ok(SocketEvent {
                        name,
                        args,
                        received_at: Instant::now(),
                    });
                }
                Ok(SocketPacket::Event { name, args, .. }) => self.buffer(name, args),
                Ok(SocketPacket::Disconnect) => {
                    return Err(E2eError::Socket(format!("server disconnected while waiting for '{event}'")));
                }
                Ok(_) => {}
                Err(E2eError::Timeout(_)) => return Err(E2eError::Timeout(format!("socket event '{event}'"))),
                Err(e) => return Err(e),
            }
        }
    }

    /// Events received but not yet consumed by `wait_for`
    pub fn pending(&self) -> impl Iterator<Item = &SocketEvent> {
        self.buffered.iter()
    }

    pub async fn close(mut self) -> E2eResult<()> {
        if self.ended {
            return Ok(());
        }
        let _ = self
            .send_engine(EnginePacket::Message(SocketPacket::Disconnect.encode()))
            .await;
        self.stream.close(None).await?;
        Ok(())
    }

    fn buffer(&mut self, name: String, args: Vec<Value>) {
        debug!("Buffered socket event {}", name);
        self.buffered.push_back(SocketEvent {
            name,
            args,
            received_at: Instant::now(),
        });
    }

    async fn send_engine(&mut self, packet: EnginePacket) -> E2eResult<()> {
        self.stream.send(Message::Text(packet.encode())).await?;
        Ok(())
    }

    /// Next Socket.IO packet, answering heartbeats along the way
    async fn next_socket_packet(&mut self, wait: Duration) -> E2eResult<SocketPacket> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_engine_packet(remaining).await? {
                EnginePacket::Ping(data) => self.send_engine(EnginePacket::Pong(data)).await?,
                EnginePacket::Message(payload) => return SocketPacket::parse(&payload),
                EnginePacket::Close => return Ok(SocketPacket::Disconnect),
                _ => {}
            }
        }
    }

    async fn next_engine_packet(&mut self, wait: Duration) -> E2eResult<EnginePacket> {
        if self.ended {
            return Err(E2eError::Socket("socket already closed by server".to_string()));
        }
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(E2eError::Timeout("socket frame".to_string()));
            }
            let frame = timeout(remaining, self.stream.next())
                .await
                .map_err(|_| E2eError::Timeout("socket frame".to_string()))?;

            match frame {
                Some(Ok(Message::Text(text))) => return EnginePacket::parse(&text),
                Some(Ok(Message::Close(_))) | None => {
                    self.ended = true;
                    return Ok(EnginePacket::Close);
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.ended = true;
                    return Ok(EnginePacket::Close);
                }
                Some(Err(e)) => {
                    self.ended = true;
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parses_handshake() {
        let packet = EnginePacket::parse(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        match packet {
            EnginePacket::Open(v) => assert_eq!(v["sid"], "abc"),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test_case("2", EnginePacket::Ping(String::new()) ; "ping")]
    #[test_case("3probe", EnginePacket::Pong("probe".into()) ; "pong with data")]
    #[test_case("1", EnginePacket::Close ; "close")]
    #[test_case("6", EnginePacket::Noop ; "noop")]
    fn engine_control_packets(frame: &str, expected: EnginePacket) {
        assert_eq!(EnginePacket::parse(frame).unwrap(), expected);
        assert_eq!(expected.encode(), frame);
    }

    #[test]
    fn parses_status_event() {
        let packet = SocketPacket::parse(r#"2["message:delivered",{"messageId":"m1","status":"delivered"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                name: "message:delivered".to_string(),
                args: vec![json!({"messageId": "m1", "status": "delivered"})],
                ack: None,
            }
        );
    }

    #[test]
    fn parses_namespace_and_ack_id() {
        let packet = SocketPacket::parse(r#"2/tenant,12["message:sent",1]"#).unwrap();
        match packet {
            SocketPacket::Event { name, args, ack } => {
                assert_eq!(name, "message:sent");
                assert_eq!(args, vec![json!(1)]);
                assert_eq!(ack, Some(12));
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn connect_packets() {
        assert_eq!(
            SocketPacket::parse(r#"0{"sid":"x"}"#).unwrap(),
            SocketPacket::Connect(Some(json!({"sid": "x"})))
        );
        assert_eq!(
            SocketPacket::parse(r#"4{"message":"Authentication error"}"#).unwrap(),
            SocketPacket::ConnectError(json!({"message": "Authentication error"}))
        );
        assert_eq!(SocketPacket::Connect(Some(json!({"token": "t"}))).encode(), r#"0{"token":"t"}"#);
    }

    #[test]
    fn rejects_malformed_packets() {
        assert!(EnginePacket::parse("").is_err());
        assert!(EnginePacket::parse("9").is_err());
        assert!(SocketPacket::parse("2{}").is_err());
        assert!(SocketPacket::parse("51-[\"bin\"]").is_err());
    }

    #[test]
    fn event_encoding_includes_ack() {
        let packet = SocketPacket::Event {
            name: "join".to_string(),
            args: vec![json!("room-1")],
            ack: Some(3),
        };
        assert_eq!(packet.encode(), r#"23["join","room-1"]"#);
    }

    #[test]
    fn socket_url_from_https_origin() {
        let url = socket_url("https://app.example.org", "jwt.token").unwrap();
        assert_eq!(
            url,
            "wss://app.example.org/socket.io/?EIO=4&transport=websocket&token=jwt.token"
        );
    }

    #[test]
    fn socket_url_rejects_other_schemes() {
        assert!(socket_url("ftp://example.org", "t").is_err());
    }
}
