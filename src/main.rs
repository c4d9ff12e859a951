//! Command line Nostr client. Reads come from a single relay; writes are fanned
//! out to every configured relay that accepts them.

mod commands;
mod config;
mod drain;
mod error;
mod event;
mod fanout;
mod filter;
mod follows;
mod keys;
mod output;
mod relay;
#[cfg(test)]
mod testing;
mod transport;
mod ws;

use std::{io::Read, sync::Arc};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use commands::{Context, ReadOptions};
use config::{csv_strings, list_profiles, ConfigStore};
use output::OutputFormat;
use tracing::{debug, warn};
use ws::{ConnectOptions, WsTransport};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "fanpost",
    author,
    version,
    about = "Nostr client that fans out to many relays",
    disable_version_flag = true
)]
struct Cli {
    /// Print version.
    #[arg(long, action = clap::ArgAction::Version)]
    #[allow(dead_code)] // clap prints and exits before this is read
    version: Option<bool>,
    /// Profile name. `?` lists the available profiles.
    #[arg(short = 'a', global = true)]
    profile: Option<String>,
    /// Comma-separated relays used instead of the configured ones.
    #[arg(long, global = true, default_value = "")]
    relays: String,
    /// Print per-relay diagnostics.
    #[arg(short = 'V', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Copy)]
struct ReadArgs {
    /// Number of notes to fetch.
    #[arg(short = 'n', default_value_t = 30)]
    n: usize,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
    /// With --json, attach the author's profile and skip unknown authors.
    #[arg(long)]
    extra: bool,
}

impl ReadArgs {
    fn options(self) -> ReadOptions {
        ReadOptions {
            limit: self.n,
            format: OutputFormat::from_flags(self.json, self.extra),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show recent notes from followed authors.
    #[command(visible_alias = "tl")]
    Timeline {
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Search notes on a search-capable relay.
    #[command(visible_alias = "s")]
    Search {
        #[command(flatten)]
        read: ReadArgs,
        words: Vec<String>,
    },
    /// Publish a note.
    #[command(visible_alias = "n")]
    Post {
        /// Read the content from standard input.
        #[arg(long)]
        stdin: bool,
        /// Mark the note with a content warning.
        #[arg(long)]
        sensitive: Option<String>,
        #[arg(required_unless_present = "stdin")]
        text: Vec<String>,
    },
    /// Reply to a note.
    #[command(visible_alias = "r")]
    Reply {
        /// Note id, `note1…` or hex.
        #[arg(long)]
        id: String,
        #[arg(long)]
        stdin: bool,
        /// Quote the note instead of replying to it.
        #[arg(long)]
        quote: bool,
        #[arg(required_unless_present = "stdin")]
        text: Vec<String>,
    },
    /// Boost a note.
    #[command(visible_alias = "b")]
    Repost {
        #[arg(long)]
        id: String,
    },
    /// React to a note.
    #[command(visible_alias = "l")]
    Like {
        #[arg(long)]
        id: String,
    },
    /// Ask relays to delete a note.
    #[command(visible_alias = "d")]
    Delete {
        #[arg(long)]
        id: String,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);
    // A second init (as in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Note content from the arguments joined by newlines, or from stdin.
fn read_content(stdin: bool, text: &[String]) -> anyhow::Result<String> {
    if stdin {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("reading stdin")?;
        Ok(content)
    } else {
        Ok(text.join("\n"))
    }
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let dir = ConfigStore::config_dir()?;
    if cli.profile.as_deref() == Some("?") {
        for name in list_profiles(&dir)? {
            println!("{name}");
        }
        return Ok(());
    }
    let Some(command) = cli.command else {
        anyhow::bail!("no command given, see --help");
    };

    let store = ConfigStore::for_profile(&dir, cli.profile.as_deref());
    let config = store.load()?;
    let transport = Arc::new(WsTransport::new(ConnectOptions {
        proxy: config.proxy.clone(),
        ..ConnectOptions::default()
    }));
    let mut ctx = Context::new(config, store, transport, &csv_strings(&cli.relays));
    if ctx.pool.registry().is_empty() {
        warn!(profile = ?cli.profile, "no relays configured");
    }
    debug!(relays = ctx.pool.registry().len(), "loaded config");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = match command {
        Commands::Timeline { read } => {
            commands::timeline(&mut ctx, read.options(), &mut out).await?;
            None
        }
        Commands::Search { read, words } => {
            commands::search(&mut ctx, &words, read.options(), &mut out).await?;
            None
        }
        Commands::Post {
            stdin,
            sensitive,
            text,
        } => {
            let content = read_content(stdin, &text)?;
            Some(commands::post(&ctx, &content, sensitive.as_deref()).await?)
        }
        Commands::Reply {
            id,
            stdin,
            quote,
            text,
        } => {
            let content = read_content(stdin, &text)?;
            Some(commands::reply(&ctx, &id, &content, quote).await?)
        }
        Commands::Repost { id } => Some(commands::repost(&ctx, &id).await?),
        Commands::Like { id } => Some(commands::like(&ctx, &id).await?),
        Commands::Delete { id } => Some(commands::delete(&ctx, &id).await?),
    };
    if let Some(summary) = summary {
        debug!(
            success = summary.success_count,
            attempted = summary.attempted_count,
            "done"
        );
    }
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli).await
}
