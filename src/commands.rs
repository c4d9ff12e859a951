//! Command handlers. Each receives the invocation's [`Context`] explicitly.

use std::{io::Write, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    config::{Config, ConfigStore},
    drain,
    error::{CommandError, Operation, RelayError},
    event::{Kind, Tag, UnsignedEvent},
    fanout::{OperationOutcome, OperationSummary, RelayPool},
    filter::Filter,
    follows::Refresh,
    keys::{resolve_event_id, Keys, Signer},
    output::{write_event, OutputFormat},
    relay::CapabilityRequest,
    transport::{Session, Transport},
};

/// State shared by every command of one invocation.
pub struct Context {
    pub config: Config,
    pub store: ConfigStore,
    pub pool: RelayPool,
}

impl Context {
    /// `override_relays`, when non-empty, replaces the configured relays.
    pub fn new(
        config: Config,
        store: ConfigStore,
        transport: Arc<dyn Transport>,
        override_relays: &[String],
    ) -> Self {
        let pool = RelayPool::new(config.registry(override_relays), transport);
        Self {
            config,
            store,
            pool,
        }
    }

    fn keys(&self) -> Result<Arc<Keys>, CommandError> {
        let keys = Keys::parse(&self.config.privatekey)
            .map_err(|e| CommandError::InvalidKey(e.to_string()))?;
        let npub = keys
            .npub()
            .map_err(|e| CommandError::InvalidKey(e.to_string()))?;
        debug!(%npub, "signing as");
        Ok(Arc::new(keys))
    }
}

/// Options shared by the read commands.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub limit: usize,
    pub format: OutputFormat,
}

fn summarize(
    op: Operation,
    outcomes: &[OperationOutcome],
) -> Result<OperationSummary, CommandError> {
    let summary = OperationSummary::from_outcomes(outcomes);
    debug!(%op, success = summary.success_count, attempted = summary.attempted_count, "fan-out done");
    if summary.attempted_count == 0 {
        return Err(CommandError::NoMatchingRelay);
    }
    if summary.success_count == 0 {
        return Err(CommandError::AggregateFailure(op));
    }
    Ok(summary)
}

fn non_empty(content: &str) -> Result<(), CommandError> {
    if content.trim().is_empty() {
        return Err(CommandError::EmptyContent);
    }
    Ok(())
}

/// Publish a note to every write relay.
pub async fn post(
    ctx: &Context,
    content: &str,
    sensitive: Option<&str>,
) -> Result<OperationSummary, CommandError> {
    non_empty(content)?;
    let keys = ctx.keys()?;
    let mut draft = UnsignedEvent::new(keys.public_key(), Kind::Note, content);
    if let Some(reason) = sensitive.filter(|r| !r.is_empty()) {
        draft
            .tags
            .append_unique(Tag::new(["content-warning", reason]));
    }
    let ev = keys
        .sign(draft)
        .map_err(|e| CommandError::InvalidKey(e.to_string()))?;
    let outcomes = ctx.pool.broadcast(CapabilityRequest::Write, ev).await;
    summarize(Operation::Post, &outcomes)
}

/// Reply to (or quote) `id`. Each relay gets its own copy tagged with that
/// relay's URL, signed for it alone.
pub async fn reply(
    ctx: &Context,
    id: &str,
    content: &str,
    quote: bool,
) -> Result<OperationSummary, CommandError> {
    non_empty(content)?;
    let keys = ctx.keys()?;
    let id = resolve_event_id(id);
    let marker = if quote { "mention" } else { "reply" };
    let draft = UnsignedEvent::new(keys.public_key(), Kind::Note, content);
    let outcomes = ctx
        .pool
        .run_all(CapabilityRequest::Write, move |session| {
            let mut draft = draft.clone();
            let keys = keys.clone();
            let id = id.clone();
            async move {
                draft
                    .tags
                    .append_unique(Tag::new(["e", id.as_str(), session.url(), marker]));
                let ev = keys.sign(draft)?;
                let status = session.publish(&ev).await?;
                debug!(relay = session.url(), ?status, "published");
                Ok::<(), RelayError>(())
            }
        })
        .await;
    summarize(Operation::Reply, &outcomes)
}

/// Boost `id`, tagging the authors found by the first relay to connect.
pub async fn repost(ctx: &Context, id: &str) -> Result<OperationSummary, CommandError> {
    primed(ctx, id, Kind::Boost, "", Operation::Repost).await
}

/// React with `+` to `id`.
pub async fn like(ctx: &Context, id: &str) -> Result<OperationSummary, CommandError> {
    primed(ctx, id, Kind::Reaction, "+", Operation::Like).await
}

async fn primed(
    ctx: &Context,
    id: &str,
    kind: Kind,
    content: &str,
    op: Operation,
) -> Result<OperationSummary, CommandError> {
    let keys = ctx.keys()?;
    let id = resolve_event_id(id);
    let mut draft = UnsignedEvent::new(keys.public_key(), kind, content);
    draft.tags.append_unique(Tag::new(["e", id.as_str()]));
    let filter = Filter::new().kind(Kind::Note).ids([id]);
    let (outcomes, signed) = ctx
        .pool
        .broadcast_primed(CapabilityRequest::Write, draft, filter, keys)
        .await;
    if let Some(ev) = signed {
        debug!(id = %ev.id, tags = ev.tags.iter().count(), "signed primed event");
    }
    summarize(op, &outcomes)
}

/// Request deletion of `id`.
pub async fn delete(ctx: &Context, id: &str) -> Result<OperationSummary, CommandError> {
    let keys = ctx.keys()?;
    let id = resolve_event_id(id);
    let mut draft = UnsignedEvent::new(keys.public_key(), Kind::Deletion, "");
    draft.tags.append_unique(Tag::new(["e", id.as_str()]));
    let ev = keys
        .sign(draft)
        .map_err(|e| CommandError::InvalidKey(e.to_string()))?;
    let outcomes = ctx.pool.broadcast(CapabilityRequest::Write, ev).await;
    summarize(Operation::Delete, &outcomes)
}

/// Print recent notes from followed authors.
pub async fn timeline<W: Write>(ctx: &mut Context, opts: ReadOptions, out: &mut W) -> Result<()> {
    let session = ctx
        .pool
        .select_one(CapabilityRequest::Read)
        .await
        .ok_or(CommandError::NoMatchingRelay)?;
    let result = async {
        let follows = refresh_follows(ctx, session.as_ref()).await?;
        let filter = Filter::new().kind(Kind::Note).authors(follows);
        print_stored(ctx, session.as_ref(), filter, opts, out).await
    }
    .await;
    session.close().await;
    result
}

/// Print notes matching `words` from a search relay.
pub async fn search<W: Write>(
    ctx: &mut Context,
    words: &[String],
    opts: ReadOptions,
    out: &mut W,
) -> Result<()> {
    let session = ctx
        .pool
        .select_one(CapabilityRequest::Search)
        .await
        .ok_or(CommandError::NoMatchingRelay)?;
    let result = async {
        refresh_follows(ctx, session.as_ref()).await?;
        let filter = Filter::new().kind(Kind::Note).search(words.join(" "));
        print_stored(ctx, session.as_ref(), filter, opts, out).await
    }
    .await;
    session.close().await;
    result
}

/// Returns the followed keys. After a rebuild these come from the contact
/// lists, so authors without usable metadata are still followed.
///
/// A failed refresh leaves the cache as it was; a rebuild is always saved.
async fn refresh_follows(ctx: &mut Context, session: &dyn Session) -> Result<Vec<String>> {
    match ctx
        .config
        .follows
        .refresh_if_stale(session, Utc::now())
        .await
    {
        Ok(Refresh::Rebuilt(follows)) => {
            debug!(
                follows = follows.len(),
                profiles = ctx.config.follows.follows.len(),
                "follow cache rebuilt"
            );
            ctx.store.save(&ctx.config)?;
            Ok(follows.into_iter().collect())
        }
        Ok(Refresh::Fresh) => Ok(ctx.config.follows.authors()),
        Err(e) => {
            warn!(relay = session.url(), error = %e, "refreshing follows failed");
            Ok(ctx.config.follows.authors())
        }
    }
}

async fn print_stored<W: Write>(
    ctx: &Context,
    session: &dyn Session,
    filter: Filter,
    opts: ReadOptions,
    out: &mut W,
) -> Result<()> {
    let mut stored = drain::drain(session, vec![filter], opts.limit).await?;
    while let Some(ev) = stored.next().await {
        write_event(out, opts.format, &ev, &ctx.config.follows)?;
    }
    out.flush()?;
    Ok(())
}
