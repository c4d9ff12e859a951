//! History-only subscription reads bounded by end of stored events or a timeout.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::RelayError,
    event::Event,
    filter::Filter,
    transport::{Session, Subscription},
};

/// Upper bound on how long a read command waits for stored events.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream of stored events from one subscription.
///
/// The stream ends once the relay signals end of stored events or the
/// timeout passes, whichever comes first. Dropping it cancels the
/// subscription.
pub struct Drain {
    events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl Drain {
    /// Next event in relay delivery order, or `None` once the stream closed.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Subscribe with `filters`, each capped at `limit`, and stream stored events.
pub async fn drain(
    session: &dyn Session,
    filters: Vec<Filter>,
    limit: usize,
) -> Result<Drain, RelayError> {
    drain_with_timeout(session, filters, limit, DRAIN_TIMEOUT).await
}

pub async fn drain_with_timeout(
    session: &dyn Session,
    filters: Vec<Filter>,
    limit: usize,
    timeout: Duration,
) -> Result<Drain, RelayError> {
    let filters = filters.into_iter().map(|f| f.limit(limit)).collect();
    let Subscription {
        events,
        end_of_stored,
        cancel,
    } = session.subscribe(filters).await?;

    let token = cancel.clone();
    let relay = session.url().to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = end_of_stored => debug!(%relay, "end of stored events"),
            _ = tokio::time::sleep(timeout) => debug!(%relay, "drain timed out"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });

    Ok(Drain { events, cancel })
}
