//! Seams between the relay coordination logic and the wire.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{error::RelayError, event::Event, filter::Filter};

/// Opens sessions to relay endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Session>, RelayError>;
}

/// How a relay answered a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// The relay confirmed the event with an `OK` message.
    Succeeded,
    /// The event was written but no confirmation arrived in time.
    Sent,
}

/// A live connection to one relay.
#[async_trait]
pub trait Session: Send + Sync {
    fn url(&self) -> &str;

    /// Send an event. A refusal from the relay is `RelayError::PublishRejected`.
    async fn publish(&self, ev: &Event) -> Result<PublishStatus, RelayError>;

    /// Run a one-shot query and return every stored match.
    async fn query_sync(&self, filter: &Filter) -> Result<Vec<Event>, RelayError>;

    /// Open a streaming subscription.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription, RelayError>;

    async fn close(&self);
}

/// Handle to a running subscription.
///
/// `events` closes once `cancel` fires and the reader has stopped.
/// `end_of_stored` resolves when the relay sends `EOSE`.
pub struct Subscription {
    pub events: mpsc::Receiver<Event>,
    pub end_of_stored: oneshot::Receiver<()>,
    pub cancel: CancellationToken,
}
