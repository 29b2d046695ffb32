//! Persistent bidirectional channel to the agent.
//!
//! Outbound frames go through one FIFO drained by a single pump task, so the
//! wire order is the send order. Inbound frames surface as [`ChannelEvent`]s,
//! ending with exactly one `Closed`.

use super::error::{SessionError, TransportError};
use super::protocol::{RealtimeInputMessage, SetupMessage};
use crate::log_debug;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame, or a binary frame holding UTF-8 text.
    Message(String),
    Closed { reason: String },
}

/// Opens signaling channels. [`WsConnector`] is the production implementation.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SignalingChannel, SessionError>>;
}

/// WebSocket connector over `tokio-tungstenite` (TLS via rustls).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<SignalingChannel, SessionError>> {
        let url = url.to_string();
        Box::pin(async move {
            let redacted = redact_url(&url);
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|err| SessionError::Connection(err.to_string()))?;
            tracing::info!(endpoint = %redacted, "websocket connected");

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(stream, outbound_rx, events_tx));
            Ok(SignalingChannel::from_parts(outbound_tx, events_rx))
        })
    }
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<ChannelEvent>,
) {
    let (mut write, mut read) = stream.split();
    let reason = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(err) = write.send(Message::Text(text.into())).await {
                        break format!("send failed: {err}");
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break "closed locally".to_string();
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ChannelEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(ChannelEvent::Message(text));
                    }
                    Err(_) => log_debug(&format!(
                        "dropping non-UTF-8 binary frame ({} bytes)",
                        bytes.len()
                    )),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason.as_str()))
                        .unwrap_or_else(|| "closed by peer".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break err.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };
    tracing::debug!(reason = %reason, "websocket pump finished");
    let _ = events.send(ChannelEvent::Closed { reason });
}

/// Handle to one open channel. Dropping it (or calling [`close`](Self::close))
/// closes the connection.
#[derive(Debug)]
pub struct SignalingChannel {
    outbound: Option<UnboundedSender<String>>,
    events: Option<UnboundedReceiver<ChannelEvent>>,
    setup_sent: bool,
}

impl SignalingChannel {
    /// Wrap an outbound frame queue and an inbound event stream. Connectors
    /// other than [`WsConnector`] (tests, alternative transports) build
    /// channels this way.
    pub fn from_parts(
        outbound: UnboundedSender<String>,
        events: UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            events: Some(events),
            setup_sent: false,
        }
    }

    pub fn send_setup(&mut self, setup: &SetupMessage) -> Result<(), TransportError> {
        self.send_json(setup)?;
        self.setup_sent = true;
        Ok(())
    }

    /// Queue one base64 PCM16 frame. Refused until the setup frame went out.
    pub fn send_audio(&mut self, data: String) -> Result<(), TransportError> {
        if !self.setup_sent {
            return Err(TransportError::SetupPending);
        }
        self.send_json(&RealtimeInputMessage::audio(data))
    }

    fn send_json<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        let text =
            serde_json::to_string(message).map_err(|err| TransportError::Encode(err.to_string()))?;
        outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Next inbound event; `None` once the stream is exhausted or handed off.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.as_mut()?.recv().await
    }

    /// Hand the inbound stream to another task.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<ChannelEvent>> {
        self.events.take()
    }

    pub fn close(&mut self) {
        self.outbound = None;
    }

    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Append the credential as the percent-encoded `key` query parameter.
pub fn endpoint_url(endpoint: &str, api_key: &str) -> Result<String, SessionError> {
    let mut url = Url::parse(endpoint)
        .map_err(|err| SessionError::Connection(format!("invalid endpoint {endpoint}: {err}")))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url.into())
}

/// Endpoint URL with the credential masked, for logs.
pub fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let params: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if name.eq_ignore_ascii_case("key") => format!("{name}=***"),
            _ => pair.to_string(),
        })
        .collect();
    format!("{base}?{}", params.join("&"))
}
