use clap::Parser;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use stickyboard::{
    BackendKind, BoardStore, Config, EventHub, LiveFeed, MemoryBackend, ReadinessQueue,
    SqliteBackend, StickyId, config::StorageConfig,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Shared sticky-note board with a live event feed",
    long_about = None
)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Board to edit and follow
    #[arg(short, long, default_value = "demo")]
    board: String,
}

#[derive(Debug, PartialEq)]
enum Command {
    Add { x: i64, y: i64, text: String },
    Update { id: StickyId, x: i64, y: i64, text: String },
    Remove { id: StickyId },
    List,
    Get { id: StickyId },
}

#[derive(Error, Debug, PartialEq)]
enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("missing argument: {0}")]
    Missing(&'static str),

    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

fn number(parts: &mut std::str::SplitN<'_, char>, name: &'static str) -> Result<i64, CommandError> {
    let value = parts.next().ok_or(CommandError::Missing(name))?;
    value.parse().map_err(|_| CommandError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn remainder(parts: std::str::SplitN<'_, char>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.splitn(5, ' ');
        let verb = parts.next().unwrap_or_default();

        match verb {
            "add" => {
                let x = number(&mut parts, "x")?;
                let y = number(&mut parts, "y")?;
                Ok(Command::Add {
                    x,
                    y,
                    text: remainder(parts),
                })
            }
            "update" => {
                let id = number(&mut parts, "id")?;
                let x = number(&mut parts, "x")?;
                let y = number(&mut parts, "y")?;
                Ok(Command::Update {
                    id,
                    x,
                    y,
                    text: remainder(parts),
                })
            }
            "remove" => Ok(Command::Remove {
                id: number(&mut parts, "id")?,
            }),
            "get" => Ok(Command::Get {
                id: number(&mut parts, "id")?,
            }),
            "list" => Ok(Command::List),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

async fn run_command(
    hub: &EventHub<ReadinessQueue>,
    board_id: &str,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value = match command {
        Command::Add { x, y, text } => {
            serde_json::to_value(hub.add_sticky(board_id, text, x, y).await?)?
        }
        Command::Update { id, x, y, text } => {
            serde_json::to_value(hub.update_sticky(board_id, id, text, x, y).await?)?
        }
        Command::Remove { id } => serde_json::to_value(hub.remove_sticky(board_id, id).await?)?,
        Command::List => serde_json::to_value(hub.get_stickies(board_id).await?)?,
        Command::Get { id } => serde_json::to_value(hub.get_sticky(id, board_id).await?)?,
    };
    Ok(value)
}

/// Open the configured backend and hand it to the queue
async fn attach_backend(
    queue: Arc<ReadinessQueue>,
    storage: StorageConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match storage.backend {
        BackendKind::Memory => {
            info!("Using in-memory backend");
            queue.attach(MemoryBackend::new()).await;
        }
        BackendKind::Sqlite => {
            // Ensure data directory exists
            if let Some(parent) = storage.db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            info!("Opening database at: {:?}", storage.db_path);
            let backend = SqliteBackend::open_async(storage.db_path.clone(), storage).await?;
            queue.attach(backend).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout only carries results and feed frames
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        warn!("Config file {} not found, using defaults", args.config);
        Config::default()
    };
    info!("Starting stickyboard on board {}", args.board);

    // Commands typed before the backend is open wait in the queue
    let queue = Arc::new(ReadinessQueue::new());
    let hub = EventHub::new(BoardStore::new(Arc::clone(&queue)));

    let storage = config.storage.clone();
    tokio::spawn(async move {
        match attach_backend(queue, storage).await {
            Ok(()) => info!("Backend ready"),
            Err(e) => {
                // Queued commands would never resolve
                error!("Failed to open backend: {}", e);
                std::process::exit(1);
            }
        }
    });

    let feed_hub = hub.clone();
    let board_id = args.board.clone();
    let capacity = config.feed.channel_capacity;
    let feed_handle = tokio::spawn(async move {
        let (_feed, mut frames) = match LiveFeed::channel(&feed_hub, &board_id, capacity).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to open live feed on board {}: {}", board_id, e);
                return;
            }
        };
        while let Some(frame) = frames.recv().await {
            print!("{}", frame.to_sse());
        }
        warn!("Live feed on board {} was dropped", board_id);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line.parse::<Command>() {
            Ok(command) => run_command(&hub, &args.board, command).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(value) => println!("{}", value),
            Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
        }
    }

    // Dropping the feed task drops the LiveFeed, which unsubscribes it
    feed_handle.abort();

    info!("stdin closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "add 10 20 buy milk".parse::<Command>(),
            Ok(Command::Add {
                x: 10,
                y: 20,
                text: "buy milk".to_string()
            })
        );
        assert_eq!(
            "update 3 -5 7 done".parse::<Command>(),
            Ok(Command::Update {
                id: 3,
                x: -5,
                y: 7,
                text: "done".to_string()
            })
        );
        assert_eq!("remove 3".parse::<Command>(), Ok(Command::Remove { id: 3 }));
        assert_eq!("get 4".parse::<Command>(), Ok(Command::Get { id: 4 }));
        assert_eq!("list".parse::<Command>(), Ok(Command::List));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "shout hi".parse::<Command>(),
            Err(CommandError::Unknown("shout".to_string()))
        );
        assert_eq!("remove".parse::<Command>(), Err(CommandError::Missing("id")));
        assert_eq!(
            "add one 2 text".parse::<Command>(),
            Err(CommandError::Invalid {
                name: "x",
                value: "one".to_string()
            })
        );
    }
}
