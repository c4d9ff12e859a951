//! Rendering of events printed by read commands.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::{
    event::{Event, Profile},
    follows::FollowCache,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `name: pubkey` followed by the content.
    Text,
    /// One event object per line.
    Json,
    /// One `{event, profile}` object per line, followed authors only.
    JsonExtra,
}

impl OutputFormat {
    pub fn from_flags(json: bool, extra: bool) -> Self {
        match (json, extra) {
            (true, true) => OutputFormat::JsonExtra,
            (true, false) => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Serialize)]
struct EventWithProfile<'a> {
    event: &'a Event,
    profile: &'a Profile,
}

/// Write one event to `out` in `format`.
pub fn write_event<W: Write>(
    out: &mut W,
    format: OutputFormat,
    ev: &Event,
    follows: &FollowCache,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let name = follows
                .profile(&ev.pubkey)
                .map(|p| p.name.as_str())
                .unwrap_or(&ev.pubkey);
            writeln!(out, "{name}: {}", ev.pubkey)?;
            writeln!(out, "{}", ev.content)?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, ev)?;
            writeln!(out)?;
        }
        OutputFormat::JsonExtra => {
            if let Some(profile) = follows.profile(&ev.pubkey) {
                serde_json::to_writer(&mut *out, &EventWithProfile { event: ev, profile })?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}
