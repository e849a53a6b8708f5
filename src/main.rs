//! # Knowledge Core CLI (`kc`)
//!
//! The `kc` binary drives the retrieval core from the shell: create the
//! database, ingest files, manage per-user activation, and search.
//!
//! ## Usage
//!
//! ```bash
//! kc --config ./config/kc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kc init` | Create the SQLite database and run schema migrations |
//! | `kc ingest <file> --owner N` | Store and index one file |
//! | `kc ingest-dir <dir> --owner N` | Ingest every file under a directory |
//! | `kc search "<query>" --user N` | Search the user's scope |
//! | `kc activate <doc> --user N` | Add a document to the user's default scope |
//! | `kc deactivate <doc> --user N` | Remove it again |
//! | `kc list --user N` | List the user's or the public documents |
//! | `kc get <doc> --user N` | Print a document's passages |
//! | `kc delete <doc> --user N` | Delete a document and its file |
//! | `kc reindex <doc>` | Re-extract and re-chunk a stored document |
//! | `kc completions <shell>` | Print a shell completion script |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `knowledge_core=info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use knowledge_core::config;
use knowledge_core::ingest::KnowledgeBase;
use knowledge_core::models::{DocumentScope, Requester, RetrievalHit, Visibility};

/// Knowledge Core CLI: document ingestion and scoped passage retrieval.
///
/// All commands except `completions` read a TOML configuration file given
/// by `--config`.
#[derive(Parser)]
#[command(
    name = "kc",
    about = "Knowledge Core: document ingestion and scoped passage retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it on an existing database is safe.
    Init,

    /// Store and index a single file (.txt, .md, .docx, .pdf, .doc).
    Ingest {
        file: PathBuf,

        /// Uploading user.
        #[arg(long)]
        owner: i64,

        /// Add the document to the shared public pool.
        #[arg(long)]
        public: bool,
    },

    /// Ingest every file under a directory, recursively.
    ///
    /// A file that fails is reported and the rest continue.
    IngestDir {
        dir: PathBuf,

        #[arg(long)]
        owner: i64,

        #[arg(long)]
        public: bool,
    },

    /// Search the passages in a user's scope.
    Search {
        query: String,

        /// Requesting user.
        #[arg(long)]
        user: i64,

        /// Number of passages to return. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Search every visible document, not just activated ones.
        #[arg(long)]
        all: bool,

        /// Return at most one passage per document.
        #[arg(long)]
        per_document: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Activate a document for a user.
    Activate {
        document: i64,
        #[arg(long)]
        user: i64,
    },

    /// Deactivate a document for a user.
    Deactivate {
        document: i64,
        #[arg(long)]
        user: i64,
    },

    /// List documents with the user's activation state.
    List {
        #[arg(long)]
        user: i64,

        #[arg(long, value_enum, default_value_t = ScopeArg::Mine)]
        scope: ScopeArg,

        #[arg(long)]
        json: bool,
    },

    /// Print a document and its passages.
    Get {
        document: i64,

        #[arg(long)]
        user: i64,

        #[arg(long)]
        json: bool,
    },

    /// Delete a document, its index entries and its stored file.
    Delete {
        document: i64,

        #[arg(long)]
        user: i64,

        /// Act as an administrator (required for public documents).
        #[arg(long)]
        admin: bool,
    },

    /// Rebuild a document's chunks from its stored file.
    Reindex { document: i64 },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Mine,
    Public,
}

impl From<ScopeArg> for DocumentScope {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::Mine => DocumentScope::Mine,
            ScopeArg::Public => DocumentScope::Public,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("knowledge_core=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "kc", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let kb = KnowledgeBase::open(cfg)
        .await
        .context("Failed to open knowledge base")?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            owner,
            public,
        } => {
            let doc = kb
                .ingest_path(owner, &file, Visibility::from_flag(public))
                .await
                .map_err(|e| {
                    let hint = if e.is_user_fixable() {
                        "check or convert the file"
                    } else {
                        "contact an administrator"
                    };
                    anyhow::anyhow!("{}: {} ({})", file.display(), e, hint)
                })?;
            println!("Ingested {} as document {}", doc.filename, doc.id);
        }
        Commands::IngestDir { dir, owner, public } => {
            let report = kb
                .ingest_dir(owner, &dir, Visibility::from_flag(public))
                .await?;
            for doc in &report.ingested {
                println!("ok     {} -> document {}", doc.filename, doc.id);
            }
            for (path, err) in &report.failed {
                println!("failed {}: {}", path.display(), err);
            }
            println!(
                "Ingested {} file(s), {} failed.",
                report.ingested.len(),
                report.failed.len()
            );
        }
        Commands::Search {
            query,
            user,
            top_k,
            all,
            per_document,
            json,
        } => {
            let top_k = top_k.unwrap_or(kb.config().retrieval.top_k);
            let hits = if per_document {
                kb.search_best_per_document(&query, user, top_k, all).await?
            } else {
                kb.search(&query, user, top_k, all).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print_hits(&hits);
            }
        }
        Commands::Activate { document, user } => {
            kb.set_activation(user, document, true).await?;
            println!("Document {} activated for user {}.", document, user);
        }
        Commands::Deactivate { document, user } => {
            kb.set_activation(user, document, false).await?;
            println!("Document {} deactivated for user {}.", document, user);
        }
        Commands::List { user, scope, json } => {
            let docs = kb.list_documents(user, scope.into()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents.");
            } else {
                for d in &docs {
                    println!(
                        "{:>6}  {}  {:<7}  {}",
                        d.document.id,
                        if d.is_active { "active  " } else { "inactive" },
                        if d.document.visibility.is_public() { "public" } else { "private" },
                        d.document.filename
                    );
                }
            }
        }
        Commands::Get {
            document,
            user,
            json,
        } => {
            let detail = kb.get_document(document, user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("Document {}: {}", detail.document.id, detail.document.filename);
                println!("Owner: {}", detail.document.owner_id);
                println!("Stored at: {}", detail.document.filepath);
                println!("Passages: {}", detail.passages.len());
                for (i, p) in detail.passages.iter().enumerate() {
                    println!("\n--- passage {} ---\n{}", i, p);
                }
            }
        }
        Commands::Delete {
            document,
            user,
            admin,
        } => {
            let requester = if admin {
                Requester::admin(user)
            } else {
                Requester::user(user)
            };
            kb.delete_document(document, requester).await?;
            println!("Deleted document {}.", document);
        }
        Commands::Reindex { document } => {
            let report = kb.reindex_document(document).await?;
            println!(
                "Reindexed document {}: {} -> {} chunks ({} changed).",
                document, report.previous_chunks, report.chunks, report.changed
            );
        }
        Commands::Completions { .. } => {}
    }

    kb.close().await;
    Ok(())
}

fn print_hits(hits: &[RetrievalHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, h) in hits.iter().enumerate() {
        println!(
            "{}. [doc {} #{}] score {:.4}",
            i + 1,
            h.document_id,
            h.ordinal,
            h.score
        );
        println!("   {}", snippet(&h.passage, 240));
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
