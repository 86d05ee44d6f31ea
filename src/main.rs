mod cache;
mod clients;
mod config;
mod connectivity;
mod db;
mod event;
mod http;
mod lifecycle;
mod logging;
mod messaging;
mod notification;
mod queue;
mod strategy;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStore, SqliteCacheStore};
use crate::event::{Event, EventHandler};
use crate::http::{Destination, HttpNetwork, Method, Request};
use crate::messaging::ControlMessage;
use crate::notification::{ActionKind, ConsoleNotifier};
use crate::sync::Submission;
use crate::worker::{Outcome, Worker, WorkerContext};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline caching and deferred sync in front of a web application")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the static partition for the configured version
  Install,
  /// Activate a waiting version now
  SkipWaiting,
  /// Show versions, partitions and queue state
  Status,
  /// Send a request through the strategy engine
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    #[arg(short, long, value_enum, default_value_t = Destination::Empty)]
    destination: Destination,
    /// Treat the request as a top-level navigation
    #[arg(short, long)]
    navigate: bool,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Queue a write for replay
  Enqueue {
    resource_id: String,
    /// JSON body
    payload: String,
    /// Bearer credential (default: $OFFLINE_WORKER_TOKEN)
    #[arg(short, long)]
    token: Option<String>,
    /// Try the write first and only queue it if the network is down
    #[arg(long)]
    now: bool,
  },
  /// Replay pending writes
  Sync {
    /// Sync tag (default: the configured tag)
    #[arg(short, long)]
    tag: Option<String>,
  },
  /// List pending writes
  Queue,
  /// Drop every pending write
  ClearQueue,
  /// List partitions with their entry counts
  Partitions,
  /// Add URLs to the runtime partition
  CacheUrls { urls: Vec<String> },
  /// Show a notification for a push payload
  Push { payload: Option<String> },
  /// Simulate a notification click
  Click {
    #[arg(value_enum)]
    action: Option<ActionKind>,
  },
  /// Keep running: sync on reconnect and read control messages from stdin
  Run,
}

type AppWorker = Worker<SqliteCacheStore, HttpNetwork>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  let config = config::Config::load(args.config.as_deref())?;
  let db = db::Database::open(config.database.as_deref())?;
  let cache = Arc::new(SqliteCacheStore::new(db.clone()));
  let network = Arc::new(HttpNetwork::new()?);
  let ctx = WorkerContext::new(config, db, cache, network, Arc::new(ConsoleNotifier))?;
  let worker = Worker::new(ctx);

  match args.command {
    Command::Install => report(worker.dispatch(Event::Install).await?),
    Command::SkipWaiting => report(
      worker
        .dispatch(Event::Message(ControlMessage::SkipWaiting))
        .await?,
    ),
    Command::Status => status(&worker)?,
    Command::Fetch {
      url,
      method,
      destination,
      navigate,
      output,
    } => {
      let url = worker.context().config().resolve(&url)?;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url).with_destination(destination)
      }
      .with_method(method);

      if let Outcome::Fetched(served) = worker.dispatch(Event::Fetch(request)).await? {
        eprintln!("{} ({})", served.response.status, served.source);
        if let Some(stored_at) = served.stored_at {
          eprintln!("stored at {}", stored_at.format("%Y-%m-%d %H:%M:%S"));
        }
        match output {
          Some(path) => std::fs::write(&path, &served.response.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
          None => std::io::stdout()
            .write_all(&served.response.body)
            .map_err(|e| eyre!("Failed to write body: {}", e))?,
        }
      }
    }
    Command::Enqueue {
      resource_id,
      payload,
      token,
      now,
    } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not JSON: {}", e))?;
      let token = match token {
        Some(t) => t,
        None => config::Config::get_token()?,
      };
      let sync = worker.context().sync();

      if now {
        match sync.submit(&resource_id, payload, &token).await? {
          Submission::Sent { status } => println!("sent, server answered {}", status),
          Submission::Queued(write) => println!("offline, queued {}", write.id),
        }
      } else {
        let write = sync.enqueue(&resource_id, payload, &token)?;
        println!("queued {}", write.id);
      }
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| worker.context().sync().tag().to_string());
      report(worker.dispatch(Event::Sync { tag }).await?)
    }
    Command::Queue => {
      for write in worker.context().sync().queue().list()? {
        println!(
          "{}  {}  {}  {}",
          write.id,
          write.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          write.resource_id,
          write.payload
        );
      }
    }
    Command::ClearQueue => {
      let sync = worker.context().sync();
      let removed = sync.queue().clear()?;
      sync.registrations().unregister(sync.tag())?;
      println!("removed {} pending writes", removed);
    }
    Command::Partitions => {
      let cache = worker.context().cache();
      for name in cache.partition_names()? {
        let live = if worker.context().partitions().is_live(&name) {
          ""
        } else {
          "  (stale)"
        };
        println!("{}  {}{}", name, cache.keys(&name)?.len(), live);
      }
    }
    Command::CacheUrls { urls } => report(
      worker
        .dispatch(Event::Message(ControlMessage::CacheUrls { urls }))
        .await?,
    ),
    Command::Push { payload } => {
      worker.dispatch(Event::Push { payload }).await?;
    }
    Command::Click { action } => report(worker.dispatch(Event::NotificationClick { action }).await?),
    Command::Run => run(&worker).await?,
  }

  Ok(())
}

async fn run(worker: &AppWorker) -> Result<()> {
  let ctx = worker.context();
  let config = ctx.config();

  let mut events = EventHandler::new();
  events.watch_connectivity(
    Arc::clone(ctx.network()),
    config.probe_url()?,
    config.probe_interval(),
    ctx.sync().registrations().clone(),
  );
  events.watch_stdin();

  // stdin acts as one controlled client
  let client = ctx.clients().connect(config.origin.clone())?;
  info!(version = %ctx.lifecycle().version(), %client, "worker running");

  // Replay anything left over from a previous session
  worker.spawn(Event::Sync {
    tag: ctx.sync().tag().to_string(),
  })?;

  loop {
    tokio::select! {
      event = events.next() => match event {
        Some(event) => worker.spawn(event)?,
        None => break,
      },
      _ = tokio::signal::ctrl_c() => {
        info!("interrupted, shutting down");
        break;
      }
    }

    for notice in ctx.clients().take_notices(&client)? {
      info!(?notice, "client notice");
    }
  }

  worker.shutdown().await?;
  ctx.clients().disconnect(&client)?;
  Ok(())
}

fn status(worker: &AppWorker) -> Result<()> {
  let ctx = worker.context();
  let lifecycle = ctx.lifecycle();
  let registration = lifecycle.registration();
  let sync = ctx.sync();

  println!("version:   {} ({})", lifecycle.version(), lifecycle.state()?);
  println!(
    "active:    {}",
    registration
      .active()?
      .map(|v| v.to_string())
      .unwrap_or_else(|| "-".to_string())
  );
  println!(
    "waiting:   {}",
    registration
      .waiting()?
      .map(|v| v.to_string())
      .unwrap_or_else(|| "-".to_string())
  );
  println!("pending:   {}", sync.queue().len()?);
  println!("syncs:     {}", sync.registrations().tags()?.join(", "));
  println!("partitions: {}", ctx.cache().partition_names()?.join(", "));
  Ok(())
}

fn report(outcome: Outcome) {
  match outcome {
    Outcome::Installed {
      install,
      activation,
    } => {
      println!(
        "installed {} into {} ({} assets)",
        install.version, install.partition, install.assets
      );
      match activation {
        Some(a) => println!("activated {}, evicted {:?}", a.version, a.evicted),
        None => println!("waiting for skip-waiting"),
      }
    }
    Outcome::Activated(Some(a)) => println!(
      "activated {}, evicted {:?}, claimed {} clients",
      a.version, a.evicted, a.claimed
    ),
    Outcome::Activated(None) => println!("nothing waiting"),
    Outcome::Synced(Some(r)) => println!(
      "delivered {}, still pending {}",
      r.delivered.len(),
      r.failed.len()
    ),
    Outcome::Synced(None) => println!("unknown sync tag, ignored"),
    Outcome::Cached(n) => println!("cached {} urls", n),
    Outcome::Clicked { opened: Some(id) } => println!("opened window {}", id),
    Outcome::Clicked { opened: None } => println!("dismissed"),
    Outcome::Fetched(served) => println!("{} ({})", served.response.status, served.source),
    Outcome::Notified(n) => println!("{}: {}", n.title, n.body),
  }
}
