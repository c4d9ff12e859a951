//! In-memory relays for exercising the coordination logic without sockets.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    error::RelayError,
    event::{Event, Kind, Tags, UnsignedEvent},
    filter::Filter,
    keys::{KeyError, Keys, Signer},
    transport::{PublishStatus, Session, Subscription, Transport},
};

pub(crate) fn note(id: &str, pubkey: &str) -> Event {
    Event {
        id: id.into(),
        pubkey: pubkey.into(),
        kind: Kind::Note.as_u32(),
        created_at: 1,
        tags: Tags::default(),
        content: format!("note {id}"),
        sig: String::new(),
    }
}

/// Behaviour of one fake relay.
#[derive(Clone, Default)]
pub(crate) struct RelayScript {
    unreachable: bool,
    rejects: bool,
    connect_delay: Duration,
    /// Time `query_sync` takes before answering.
    query_delay: Duration,
    /// Events returned by `query_sync`, filtered by kind and author.
    history: Vec<Event>,
    /// Events streamed by `subscribe` before end of stored events.
    stream: Vec<Event>,
    /// Delay before signalling end of stored events; `None` never signals.
    eose_after: Option<Duration>,
}

impl RelayScript {
    pub(crate) fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub(crate) fn rejecting() -> Self {
        Self {
            rejects: true,
            ..Self::default()
        }
    }

    pub(crate) fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub(crate) fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub(crate) fn history(mut self, events: Vec<Event>) -> Self {
        self.history = events;
        self
    }

    pub(crate) fn stream(mut self, events: Vec<Event>, eose_after: Option<Duration>) -> Self {
        self.stream = events;
        self.eose_after = eose_after;
        self
    }
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    queries: AtomicUsize,
    closes: AtomicUsize,
    published: Mutex<Vec<(String, Event)>>,
    subscribed: Mutex<Vec<Filter>>,
}

/// Transport whose relays follow a script. Unscripted URLs accept everything.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, RelayScript>>,
    counters: Arc<Counters>,
}

impl ScriptedTransport {
    pub(crate) fn script(&self, url: &str, script: RelayScript) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub(crate) fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn published(&self) -> Vec<Event> {
        let published = self.counters.published.lock().unwrap();
        published.iter().map(|(_, ev)| ev.clone()).collect()
    }

    /// Every filter passed to `subscribe`, in call order.
    pub(crate) fn subscribed(&self) -> Vec<Filter> {
        self.counters.subscribed.lock().unwrap().clone()
    }

    pub(crate) fn published_to(&self) -> Vec<String> {
        let published = self.counters.published.lock().unwrap();
        published.iter().map(|(url, _)| url.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Session>, RelayError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default();
        if !script.connect_delay.is_zero() {
            tokio::time::sleep(script.connect_delay).await;
        }
        if script.unreachable {
            return Err(RelayError::Connection {
                url: url.to_string(),
                reason: "refused".into(),
            });
        }
        Ok(Arc::new(ScriptedSession {
            url: url.to_string(),
            script,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedSession {
    url: String,
    script: RelayScript,
    counters: Arc<Counters>,
}

#[async_trait]
impl Session for ScriptedSession {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, ev: &Event) -> Result<PublishStatus, RelayError> {
        self.counters
            .published
            .lock()
            .unwrap()
            .push((self.url.clone(), ev.clone()));
        if self.script.rejects {
            return Err(RelayError::PublishRejected {
                url: self.url.clone(),
                message: "blocked".into(),
            });
        }
        Ok(PublishStatus::Succeeded)
    }

    async fn query_sync(&self, filter: &Filter) -> Result<Vec<Event>, RelayError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if !self.script.query_delay.is_zero() {
            tokio::time::sleep(self.script.query_delay).await;
        }
        Ok(self
            .script
            .history
            .iter()
            .filter(|ev| filter.kinds.is_empty() || filter.kinds.contains(&ev.kind))
            .filter(|ev| filter.authors.is_empty() || filter.authors.contains(&ev.pubkey))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, RelayError> {
        self.counters.subscribed.lock().unwrap().extend(filters);
        let (tx, events) = mpsc::channel(64);
        let (eose_tx, end_of_stored) = oneshot::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let stream = self.script.stream.clone();
        let eose_after = self.script.eose_after;
        tokio::spawn(async move {
            for ev in stream {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
            if let Some(delay) = eose_after {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                let _ = eose_tx.send(());
            } else {
                // Hold the signal open so the caller has to time out.
                let _keep = eose_tx;
                token.cancelled().await;
                return;
            }
            token.cancelled().await;
        });
        Ok(Subscription {
            events,
            end_of_stored,
            cancel,
        })
    }

    async fn close(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps real keys and counts how often it signs.
pub(crate) struct CountingSigner {
    keys: Keys,
    count: AtomicUsize,
}

impl CountingSigner {
    pub(crate) fn new(keys: Keys) -> Self {
        Self {
            keys,
            count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Signer for CountingSigner {
    fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    fn sign(&self, draft: UnsignedEvent) -> Result<Event, KeyError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.keys.sign(draft)
    }
}
