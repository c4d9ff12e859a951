//! NIP-01 client sessions over WebSocket.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::{
    error::RelayError,
    event::Event,
    filter::Filter,
    keys,
    transport::{PublishStatus, Session, Subscription, Transport},
};

type WsStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Knobs for WebSocket sessions.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Optional SOCKS5 proxy (host:port), e.g. a local Tor daemon.
    pub proxy: Option<String>,
    /// Drop incoming events whose id or signature does not check out.
    pub verify_sig: bool,
    pub connect_timeout: Duration,
    /// How long to wait for `OK` after a publish or `EOSE` after a query.
    pub reply_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            verify_sig: true,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport that dials relays directly or through a SOCKS5 proxy.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    options: ConnectOptions,
}

impl WsTransport {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Session>, RelayError> {
        let dial = connect_ws(url, self.options.proxy.as_deref());
        let ws = match timeout(self.options.connect_timeout, dial).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(RelayError::Connection {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RelayError::Connection {
                    url: url.to_string(),
                    reason: "timed out".into(),
                })
            }
        };
        debug!(relay = url, "connected");
        Ok(Arc::new(WsSession {
            url: url.to_string(),
            ws: Arc::new(Mutex::new(ws)),
            options: self.options.clone(),
        }))
    }
}

/// One open relay connection. Exchanges on a session are serialized.
pub struct WsSession {
    url: String,
    ws: Arc<Mutex<WsStream>>,
    options: ConnectOptions,
}

#[async_trait]
impl Session for WsSession {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, ev: &Event) -> Result<PublishStatus, RelayError> {
        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(json!(["EVENT", ev]).to_string()))
            .await?;
        let wait = async {
            while let Some(msg) = ws.next().await {
                let txt = match msg? {
                    Message::Text(txt) => txt,
                    Message::Close(_) => break,
                    _ => continue,
                };
                if let Some(RelayMessage::Ok {
                    id,
                    accepted,
                    message,
                }) = parse_relay_message(&txt)
                {
                    if id != ev.id {
                        continue;
                    }
                    if accepted {
                        return Ok(PublishStatus::Succeeded);
                    }
                    return Err(RelayError::PublishRejected {
                        url: self.url.clone(),
                        message,
                    });
                }
            }
            Err(RelayError::Closed)
        };
        match timeout(self.options.reply_timeout, wait).await {
            Ok(res) => res,
            Err(_) => Ok(PublishStatus::Sent),
        }
    }

    async fn query_sync(&self, filter: &Filter) -> Result<Vec<Event>, RelayError> {
        let sub_id = subscription_id();
        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(json!(["REQ", sub_id, filter]).to_string()))
            .await?;
        let mut found = vec![];
        let collect = async {
            while let Some(msg) = ws.next().await {
                let txt = match msg? {
                    Message::Text(txt) => txt,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match parse_relay_message(&txt) {
                    Some(RelayMessage::Event { sub, event }) if sub == sub_id => {
                        if self.accept(&event) {
                            found.push(event);
                        }
                    }
                    Some(RelayMessage::Eose(sub)) if sub == sub_id => break,
                    Some(RelayMessage::Closed { sub, message }) if sub == sub_id => {
                        debug!(relay = %self.url, %message, "query closed by relay");
                        break;
                    }
                    _ => {}
                }
            }
            Ok::<_, RelayError>(())
        };
        match timeout(self.options.reply_timeout, collect).await {
            Ok(res) => res?,
            Err(_) => debug!(relay = %self.url, "query timed out before EOSE"),
        }
        let _ = ws
            .send(Message::Text(json!(["CLOSE", sub_id]).to_string()))
            .await;
        Ok(found)
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, RelayError> {
        let sub_id = subscription_id();
        let mut req = vec![json!("REQ"), json!(sub_id)];
        for f in &filters {
            req.push(serde_json::to_value(f)?);
        }
        let mut ws = self.ws.clone().lock_owned().await;
        ws.send(Message::Text(Value::Array(req).to_string()))
            .await?;

        let (tx, events) = mpsc::channel(256);
        let (eose_tx, end_of_stored) = oneshot::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let url = self.url.clone();
        let verify_sig = self.options.verify_sig;
        tokio::spawn(async move {
            let mut eose_tx = Some(eose_tx);
            loop {
                let msg = tokio::select! {
                    _ = token.cancelled() => break,
                    msg = ws.next() => msg,
                };
                let txt = match msg {
                    Some(Ok(Message::Text(txt))) => txt,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(relay = %url, error = %e, "subscription read failed");
                        break;
                    }
                };
                match parse_relay_message(&txt) {
                    Some(RelayMessage::Event { sub, event }) if sub == sub_id => {
                        if verify_sig && keys::verify(&event).is_err() {
                            trace!(relay = %url, id = %event.id, "dropping unverifiable event");
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(RelayMessage::Eose(sub)) if sub == sub_id => {
                        if let Some(signal) = eose_tx.take() {
                            let _ = signal.send(());
                        }
                    }
                    Some(RelayMessage::Closed { sub, message }) if sub == sub_id => {
                        debug!(relay = %url, %message, "subscription closed by relay");
                        break;
                    }
                    Some(RelayMessage::Notice(message)) => {
                        debug!(relay = %url, %message, "notice");
                    }
                    _ => {}
                }
            }
            let _ = ws
                .send(Message::Text(json!(["CLOSE", sub_id]).to_string()))
                .await;
        });

        Ok(Subscription {
            events,
            end_of_stored,
            cancel,
        })
    }

    async fn close(&self) {
        let mut ws = self.ws.lock().await;
        let _ = ws.close(None).await;
    }
}

impl WsSession {
    fn accept(&self, ev: &Event) -> bool {
        if !self.options.verify_sig {
            return true;
        }
        match keys::verify(ev) {
            Ok(()) => true,
            Err(e) => {
                trace!(relay = %self.url, id = %ev.id, error = %e, "dropping unverifiable event");
                false
            }
        }
    }
}

/// Messages a relay may send to a client.
#[derive(Debug, Clone, PartialEq)]
enum RelayMessage {
    Event { sub: String, event: Event },
    Ok {
        id: String,
        accepted: bool,
        message: String,
    },
    Eose(String),
    Closed { sub: String, message: String },
    Notice(String),
}

/// Parse a relay frame. Unknown or malformed frames yield `None`.
fn parse_relay_message(txt: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(txt).ok()?;
    let arr = val.as_array()?;
    let text_at = |i: usize| arr.get(i).and_then(|v| v.as_str()).map(str::to_string);
    match arr.first()?.as_str()? {
        "EVENT" if arr.len() >= 3 => Some(RelayMessage::Event {
            sub: text_at(1)?,
            event: serde_json::from_value(arr[2].clone()).ok()?,
        }),
        "OK" if arr.len() >= 3 => Some(RelayMessage::Ok {
            id: text_at(1)?,
            accepted: arr[2].as_bool()?,
            message: text_at(3).unwrap_or_default(),
        }),
        "EOSE" => Some(RelayMessage::Eose(text_at(1)?)),
        "CLOSED" => Some(RelayMessage::Closed {
            sub: text_at(1)?,
            message: text_at(2).unwrap_or_default(),
        }),
        "NOTICE" => Some(RelayMessage::Notice(text_at(1).unwrap_or_default())),
        _ => None,
    }
}

fn subscription_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("fanpost-{suffix}")
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, proxy: Option<&str>) -> anyhow::Result<WsStream> {
    let url = Url::parse(relay)?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        anyhow::bail!("unsupported scheme: {}", url.scheme());
    }
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = proxy {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
