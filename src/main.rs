//! ntrie CLI - Command line interface for nibble_trie
//!
//! Every invocation opens the database, applies one command and commits, so
//! the state root printed after a write is the one stored on disk.

use clap::{Parser, Subcommand};
use nibble_trie::{proof, Hash, StateDb, StateVersion, TrieConfig};
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "ntrie")]
#[command(about = "A Merkle-Patricia trie state database")]
#[command(version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, default_value = "state.ntrie")]
    database: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// State version used to encode values (v0 or v1), overrides the config
    #[arg(long)]
    state_version: Option<StateVersion>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    // === Key/Value Commands ===
    /// Store a value under a key
    Put {
        /// The key (UTF-8, or hex with a 0x prefix)
        key: String,
        /// The value (UTF-8, or hex with a 0x prefix)
        value: String,
    },

    /// Get the value stored under a key
    Get {
        /// The key
        key: String,
    },

    /// Delete a key
    Delete {
        /// The key
        key: String,
    },

    /// Delete every key starting with a prefix
    ClearPrefix {
        /// The key prefix
        prefix: String,
    },

    /// List keys and values
    List {
        /// Only list keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Show the current state root
    Root,

    // === Proof Commands ===
    /// Build a proof of inclusion for keys
    Prove {
        /// Keys to prove
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Verify a proof of inclusion
    Verify {
        /// State root hash the proof is for
        #[arg(long)]
        root: String,
        /// The proven key
        #[arg(long)]
        key: String,
        /// Expected value; any value is accepted when omitted
        #[arg(long)]
        value: Option<String>,
        /// Proof nodes in hex
        #[arg(required = true)]
        nodes: Vec<String>,
    },

    // === Root Commands ===
    /// Save the current state root under a name
    Snapshot {
        /// Root name
        name: String,
    },

    /// Switch to a named state root
    Checkout {
        /// Root name
        name: String,
    },

    /// List all named state roots
    Roots,

    /// Show database status
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TrieConfig::load(&cli.database).unwrap_or_default();
    if let Some(version) = cli.state_version {
        config.state_version = version;
    }
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Init => {
            let mut db = StateDb::create(&cli.database, config)?;
            let root = db.commit()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created database at {}", cli.database.display()),
                    "root": root.to_string()
                }),
            )?;
        }

        Commands::Put { key, value } => {
            let mut db = open_db(&cli.database, config)?;
            db.put(&parse_bytes(&key)?, parse_bytes(&value)?)?;
            let root = db.commit()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "root": root.to_string()
                }),
            )?;
        }

        Commands::Get { key } => {
            let db = open_db(&cli.database, config)?;
            match db.get(&parse_bytes(&key)?) {
                Some(value) => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "key": key,
                            "value": render_bytes(&value),
                            "size": value.len()
                        }),
                    )?;
                }
                None => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    )?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Delete { key } => {
            let mut db = open_db(&cli.database, config)?;
            let deleted = db.delete(&parse_bytes(&key)?)?;
            let root = db.commit()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "key": key,
                    "deleted": deleted,
                    "root": root.to_string()
                }),
            )?;
        }

        Commands::ClearPrefix { prefix } => {
            let mut db = open_db(&cli.database, config)?;
            db.clear_prefix(&parse_bytes(&prefix)?)?;
            let root = db.commit()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "prefix": prefix,
                    "root": root.to_string()
                }),
            )?;
        }

        Commands::List { prefix } => {
            let db = open_db(&cli.database, config)?;
            let prefix = match prefix {
                Some(prefix) => parse_bytes(&prefix)?,
                None => Vec::new(),
            };
            let entries: Vec<_> = db
                .list(&prefix)
                .into_iter()
                .map(|(key, value)| {
                    serde_json::json!({
                        "key": render_bytes(&key),
                        "value": render_bytes(&value)
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": entries.len(),
                    "entries": entries
                }),
            )?;
        }

        Commands::Root => {
            let db = open_db(&cli.database, config)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "head": db.head(),
                    "root": db.root_hash()?.to_string()
                }),
            )?;
        }

        Commands::Prove { keys } => {
            let mut db = open_db(&cli.database, config)?;
            let keys = keys
                .iter()
                .map(|key| parse_bytes(key))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let (root, nodes) = db.prove(&keys)?;
            let nodes: Vec<String> = nodes
                .iter()
                .map(|node| format!("0x{}", hex::encode(node)))
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "root": root.to_string(),
                    "nodes": nodes
                }),
            )?;
        }

        Commands::Verify {
            root,
            key,
            value,
            nodes,
        } => {
            let root = Hash::from_hex(&root)
                .map_err(|_| anyhow::anyhow!("Invalid root hash: {}", root))?;
            let nodes = nodes
                .iter()
                .map(|node| hex::decode(node.trim_start_matches("0x")))
                .collect::<Result<Vec<_>, _>>()?;
            let expected = match value {
                Some(value) => parse_bytes(&value)?,
                None => Vec::new(),
            };

            match proof::verify(&nodes, root, &parse_bytes(&key)?, &expected) {
                Ok(()) => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "status": "ok",
                            "valid": true
                        }),
                    )?;
                }
                Err(err) => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "valid": false,
                            "message": err.to_string()
                        }),
                    )?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Snapshot { name } => {
            let mut db = open_db(&cli.database, config)?;
            let root = db.snapshot(&name)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "name": name,
                    "root": root.to_string()
                }),
            )?;
        }

        Commands::Checkout { name } => {
            let mut db = open_db(&cli.database, config)?;
            db.checkout(&name)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "head": name,
                    "root": db.root_hash()?.to_string()
                }),
            )?;
        }

        Commands::Roots => {
            let db = open_db(&cli.database, config)?;
            let current = db.head();
            let roots: Vec<_> = db
                .list_roots()
                .into_iter()
                .map(|(name, hash)| {
                    serde_json::json!({
                        "current": name == current,
                        "name": name,
                        "root": hash.to_string()
                    })
                })
                .collect();
            output(&cli.format, &serde_json::json!({ "roots": roots }))?;
        }

        Commands::Status => {
            let db = open_db(&cli.database, config)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "database": cli.database.display().to_string(),
                    "head": db.head(),
                    "root": db.root_hash()?.to_string(),
                    "entries": db.trie().entries().len(),
                    "objects": db.object_count(),
                    "state_version": db.config().state_version.to_string(),
                    "compress": db.config().compress
                }),
            )?;
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over the configured level
fn init_tracing(level: &str) {
    let directive = Directive::from_str(level).unwrap_or_else(|_| Directive::from(LevelFilter::WARN));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn open_db(path: &Path, config: TrieConfig) -> anyhow::Result<StateDb> {
    let db = if path.exists() {
        StateDb::open_with_config(path, config)?
    } else {
        StateDb::create(path, config)?
    };
    Ok(db)
}

/// Keys and values are UTF-8 unless written as 0x-prefixed hex
fn parse_bytes(input: &str) -> anyhow::Result<Vec<u8>> {
    match input.strip_prefix("0x") {
        Some(hex_str) => {
            hex::decode(hex_str).map_err(|e| anyhow::anyhow!("Invalid hex '{}': {}", input, e))
        }
        None => Ok(input.as_bytes().to_vec()),
    }
}

fn render_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.starts_with("0x") && !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value)?);
        }
        OutputFormat::Text => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
