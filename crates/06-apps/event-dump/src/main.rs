//! Prints the records in a captured event-queue buffer.

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use event_codec::{Event, EventReader, EventRecord};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode a binary event-queue capture")]
struct Args {
    /// Raw queue bytes, records back to back
    file: PathBuf,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,

    /// Print per-type counts instead of one line per record
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    init_tracing();

    let Args {
        file,
        limit,
        summary,
    } = Args::parse();

    let bytes = fs::read(&file).with_context(|| format!("failed to read {file:?}"))?;
    debug!(len = bytes.len(), path = ?file, "capture loaded");

    let mut reader = EventReader::new(&bytes);
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut seen = 0usize;

    while limit.map_or(true, |limit| seen < limit) {
        let offset = reader.offset();
        let Some(next) = reader.next() else {
            break;
        };
        let record = next.map_err(|err| anyhow!("corrupt record at byte {offset}: {err}"))?;
        if summary {
            *counts.entry(type_name(&record)).or_default() += 1;
        } else {
            println!("{offset:>8}  {}", describe(&record));
        }
        seen += 1;
    }

    if summary {
        for (name, count) in &counts {
            println!("{name:<20} {count}");
        }
    }
    info!(
        records = seen,
        consumed = reader.offset(),
        total = bytes.len(),
        "done"
    );
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn type_name(record: &EventRecord<'_>) -> &'static str {
    match record.event {
        Event::NewSession { .. } => "NewSession",
        Event::SessionEstablished => "SessionEstablished",
        Event::SessionError { .. } => "SessionError",
        Event::MsgComplete => "MsgComplete",
        Event::MsgError => "MsgError",
        Event::MsgReceived => "MsgReceived",
        Event::FdReady { .. } => "FdReady",
    }
}

fn describe(record: &EventRecord<'_>) -> String {
    let name = type_name(record);
    let handle = record.handle;
    match record.event {
        Event::NewSession {
            session,
            uri,
            peer_ip,
        } => format!("{name} {handle} session={session} uri={uri:?} peer={peer_ip:?}"),
        Event::SessionError {
            error_type,
            error_reason,
        } => match record.session_event_kind() {
            Some(kind) => format!("{name} {handle} kind={kind:?} reason={error_reason}"),
            None => format!("{name} {handle} kind=?{error_type} reason={error_reason}"),
        },
        Event::FdReady { fd, epoll_event } => {
            format!("{name} fd={fd} events={epoll_event:#x}")
        }
        Event::SessionEstablished | Event::MsgComplete | Event::MsgError | Event::MsgReceived => {
            format!("{name} {handle}")
        }
    }
}
