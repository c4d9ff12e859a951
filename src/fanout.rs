//! Relay fan-out: concurrent broadcast, first-responder priming and
//! single relay selection for reads.

use std::{future::Future, sync::Arc};

use tokio::{sync::OnceCell, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    event::{Event, Tag, UnsignedEvent},
    filter::Filter,
    keys::Signer,
    relay::{CapabilityRequest, RelayRegistry},
    transport::{Session, Transport},
};

/// Result of one relay's part in a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub url: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Aggregate over all relays a fan-out attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSummary {
    pub success_count: usize,
    pub attempted_count: usize,
}

impl OperationSummary {
    pub fn from_outcomes(outcomes: &[OperationOutcome]) -> Self {
        Self {
            success_count: outcomes.iter().filter(|o| o.succeeded).count(),
            attempted_count: outcomes.len(),
        }
    }
}

/// Configured relays plus the transport used to reach them.
#[derive(Clone)]
pub struct RelayPool {
    registry: RelayRegistry,
    transport: Arc<dyn Transport>,
}

impl RelayPool {
    pub fn new(registry: RelayRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &RelayRegistry {
        &self.registry
    }

    /// Connect to every relay matching `request` in parallel and run `action`
    /// on each live session. Returns once every attempt has finished.
    ///
    /// A relay that fails to connect is recorded as failed and skipped; there
    /// are no retries.
    pub async fn run_all<F, Fut>(&self, request: CapabilityRequest, action: F) -> Vec<OperationOutcome>
    where
        F: Fn(Arc<dyn Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        let action = Arc::new(action);
        let mut tasks = JoinSet::new();
        for relay in self.registry.matching(request) {
            let transport = self.transport.clone();
            let action = action.clone();
            tasks.spawn(async move {
                let session = match transport.connect(&relay.url).await {
                    Ok(session) => session,
                    Err(e) => {
                        info!(relay = %relay.url, error = %e, "connection failed");
                        return OperationOutcome {
                            url: relay.url,
                            succeeded: false,
                            error: Some(e.to_string()),
                        };
                    }
                };
                let result = action(session.clone()).await;
                session.close().await;
                match result {
                    Ok(()) => OperationOutcome {
                        url: relay.url,
                        succeeded: true,
                        error: None,
                    },
                    Err(e) => {
                        info!(relay = %relay.url, error = %e, "relay operation failed");
                        OperationOutcome {
                            url: relay.url,
                            succeeded: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "relay task aborted"),
            }
        }
        outcomes
    }

    /// Publish `ev` to every relay matching `request`.
    pub async fn broadcast(&self, request: CapabilityRequest, ev: Event) -> Vec<OperationOutcome> {
        let ev = Arc::new(ev);
        self.run_all(request, move |session| {
            let ev = ev.clone();
            async move {
                let status = session.publish(&ev).await?;
                debug!(relay = session.url(), ?status, "published");
                Ok(())
            }
        })
        .await
    }

    /// Fan out an event whose tags need a history lookup before signing.
    ///
    /// Whichever relay reaches the shared cell first runs `filter` against
    /// its own session, appends a `p` tag per returned event id, and signs.
    /// Every other relay waits on the same cell and publishes that single
    /// signed event. Nothing is queried or signed when no relay connects.
    pub async fn broadcast_primed(
        &self,
        request: CapabilityRequest,
        draft: UnsignedEvent,
        filter: Filter,
        signer: Arc<dyn Signer>,
    ) -> (Vec<OperationOutcome>, Option<Event>) {
        let primed: Arc<OnceCell<Option<Arc<Event>>>> = Arc::new(OnceCell::new());
        let cell = primed.clone();
        let outcomes = self
            .run_all(request, move |session| {
                let cell = cell.clone();
                let draft = draft.clone();
                let filter = filter.clone();
                let signer = signer.clone();
                async move {
                    let ev = cell
                        .get_or_init(|| prime(session.clone(), draft, filter, signer))
                        .await
                        .clone()
                        .ok_or(RelayError::NotSigned)?;
                    let status = session.publish(&ev).await?;
                    debug!(relay = session.url(), ?status, "published");
                    Ok(())
                }
            })
            .await;
        let signed = primed.get().cloned().flatten().map(|ev| (*ev).clone());
        (outcomes, signed)
    }

    /// Try matching relays one at a time and return the first that connects.
    pub async fn select_one(&self, request: CapabilityRequest) -> Option<Arc<dyn Session>> {
        for relay in self.registry.matching(request) {
            match self.transport.connect(&relay.url).await {
                Ok(session) => return Some(session),
                Err(e) => info!(relay = %relay.url, error = %e, "connection failed"),
            }
        }
        None
    }
}

async fn prime(
    session: Arc<dyn Session>,
    mut draft: UnsignedEvent,
    filter: Filter,
    signer: Arc<dyn Signer>,
) -> Option<Arc<Event>> {
    match session.query_sync(&filter).await {
        Ok(found) => {
            debug!(relay = session.url(), count = found.len(), "priming query");
            for ev in found {
                draft.tags.append_unique(Tag::new(["p".to_string(), ev.id]));
            }
        }
        Err(e) => info!(relay = session.url(), error = %e, "priming query failed"),
    }
    match signer.sign(draft) {
        Ok(ev) => Some(Arc::new(ev)),
        Err(e) => {
            warn!(error = %e, "signing failed");
            None
        }
    }
}
