//! keywatch driver
//!
//! Runs the watcher over an in-memory record store. Reads one JSON request per
//! line on stdin and writes one JSON line per response or alert on stdout.
//! Logs go to stderr.
//!
//! Requests:
//!
//! ```text
//! {"type": "message", "channel_id": "c1", "content": "urgent deploy", "embeds": []}
//! {"type": "add", "keywords": "urgent deploy", "channel": {"id": "c1", "name": "ops"}, "delay": 60}
//! {"type": "remove", "keywords": "urgent deploy", "channel_id": "c1"}
//! {"type": "delay", "id": "<record id>", "delay": 120}
//! {"type": "list", "page": 1}
//! {"type": "health"}
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use keywatch::storage::{load_records_file, seed_store};
use keywatch::{
    ChangeFeedMirror, ChannelRef, ChannelSink, Clock, Commands, Deadline, InMemoryStores, InboundEvent,
    KeywordRecord, KeywordStore, KeywordWatcher, PingStore, RecordId, SystemClock, WatchConfig,
    WatcherRuntime,
};

/// Driver configuration
struct Args {
    /// Seed file in the collection export format
    records: Option<PathBuf>,
    /// Worker override
    workers: Option<usize>,
}

fn usage() {
    println!("keywatch - keyword alerting driver");
    println!();
    println!("USAGE:");
    println!("    keywatch [OPTIONS] < requests.jsonl");
    println!();
    println!("OPTIONS:");
    println!("    -r, --records <FILE>      Seed keyword records from FILE");
    println!("    -w, --workers <N>         Event handler threads [default: 4]");
    println!("    -h, --help                Print help information");
    println!();
    println!("Configuration is also read from KEYWATCH_* environment variables.");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut out = Args {
        records: None,
        workers: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--records" | "-r" => {
                let value = args.get(i + 1).ok_or("--records requires a value")?;
                out.records = Some(PathBuf::from(value));
                i += 2;
            }
            "--workers" | "-w" => {
                let value = args.get(i + 1).ok_or("--workers requires a value")?;
                let workers = value
                    .parse()
                    .map_err(|_| format!("invalid worker count: {value}"))?;
                out.workers = Some(workers);
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Message(InboundEvent),
    Add {
        keywords: String,
        channel: ChannelRef,
        delay: u64,
    },
    Remove {
        keywords: String,
        channel_id: String,
    },
    Delay {
        id: RecordId,
        delay: u64,
    },
    List {
        #[serde(default = "first_page")]
        page: usize,
    },
    Health,
}

const fn first_page() -> usize {
    1
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response<'a> {
    Queued { accepted: bool },
    Added { id: RecordId },
    Removed { ids: Vec<RecordId> },
    DelayUpdated { id: RecordId },
    Page {
        page: usize,
        total_pages: usize,
        total_records: usize,
        records: Vec<KeywordRecord>,
    },
    Health {
        synced: bool,
        connected: bool,
        stale: bool,
        records: usize,
        applied_deltas: u64,
        reconnects: u64,
    },
    Alert {
        title: &'static str,
        alert: &'a keywatch::Alert,
    },
    Error { message: String },
}

fn emit(response: &Response<'_>) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => tracing::error!(error = %e, "failed to encode response"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    };

    let mut config = WatchConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate()?;

    let stores = InMemoryStores::new();
    if let Some(path) = &args.records {
        let written = seed_store(&stores.keywords, load_records_file(path)?)?;
        tracing::info!(records = written, path = %path.display(), "seeded keyword records");
    }

    let keywords: Arc<dyn KeywordStore> = Arc::new(Deadline::new(Arc::new(stores.keywords), config.remote_timeout()));
    let pings: Arc<dyn PingStore> = Arc::new(Deadline::new(Arc::new(stores.pings), config.remote_timeout()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mirror = Arc::new(ChangeFeedMirror::new(
        Arc::clone(&keywords),
        Arc::clone(&clock),
        config.mirror_config(),
    ));
    mirror.initialize()?;
    mirror.start()?;
    mirror.wait_until_synced(config.remote_timeout())?;

    let (sink, alerts) = ChannelSink::new(config.event_queue_capacity);
    let printer = thread::Builder::new()
        .name("keywatch-alerts".to_string())
        .spawn(move || {
            for alert in alerts {
                emit(&Response::Alert {
                    title: alert.title(),
                    alert: &alert,
                });
            }
        })?;

    let watcher = Arc::new(KeywordWatcher::new(
        Arc::clone(&mirror),
        pings,
        Arc::new(sink),
        Arc::clone(&clock),
    ));
    let runtime = WatcherRuntime::spawn(watcher, &config.runtime_config())?;
    let commands = Commands::new(keywords, Arc::clone(&clock), config.page_size);

    tracing::info!(workers = config.workers, "keywatch ready; reading requests from stdin");

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                emit(&Response::Error {
                    message: format!("invalid request: {e}"),
                });
                continue;
            }
        };

        let response = match request {
            Request::Message(event) => Ok(Response::Queued {
                accepted: runtime.submit(event),
            }),
            Request::Add {
                keywords,
                channel,
                delay,
            } => commands
                .add_record(&keywords, channel, delay)
                .map(|id| Response::Added { id }),
            Request::Remove { keywords, channel_id } => commands
                .remove_records(&keywords, &channel_id)
                .map(|ids| Response::Removed { ids }),
            Request::Delay { id, delay } => commands
                .update_delay(&id, delay)
                .map(|()| Response::DelayUpdated { id }),
            Request::List { page } => commands.list_records(page).map(|p| Response::Page {
                page: p.page,
                total_pages: p.total_pages,
                total_records: p.total_records,
                records: p.records,
            }),
            Request::Health => mirror.health().map(|h| Response::Health {
                stale: h.is_stale(clock.now(), config.stale_after()),
                synced: h.synced,
                connected: h.connected,
                records: h.records,
                applied_deltas: h.applied_deltas,
                reconnects: h.reconnects,
            }),
        };

        match response {
            Ok(response) => emit(&response),
            Err(e) => emit(&Response::Error {
                message: e.to_string(),
            }),
        }
    }

    // Queued events are drained before the workers exit.
    runtime.shutdown()?;
    if printer.join().is_err() {
        tracing::error!("alert printer panicked");
    }
    Ok(())
}
