//! # Trail Coach CLI (`coach`)
//!
//! ## Usage
//!
//! ```bash
//! coach --config ./config/coach.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coach init` | Create the cache database |
//! | `coach kb` | List the knowledge base in display order |
//! | `coach index` | Build or load the index and print the build report |
//! | `coach ask "<question>"` | Answer one question |
//! | `coach chat` | Interactive session on stdin |
//! | `coach reset` | Clear the persistent index cache |
//! | `coach serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `trail_coach=info,trail_coach_core=info`).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use trail_coach::progress::ProgressMode;
use trail_coach::{ask, config, index_cmd, knowledge, migrate, server};

/// Trail Coach: answers running and nutrition questions from a curated
/// knowledge base using local sentence embeddings.
#[derive(Parser)]
#[command(name = "coach", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/coach.toml")]
    config: PathBuf,

    /// Progress output on stderr. `auto` shows progress when stderr is a terminal.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache database and its tables. Idempotent.
    Init,

    /// List the knowledge base entries.
    Kb,

    /// Build the index, or load it from the cache when the knowledge base
    /// is unchanged, and print where the vectors came from.
    Index,

    /// Answer one question.
    Ask {
        question: String,

        /// Print the answer payload as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive question loop (`/reset`, `/quit`).
    Chat,

    /// Clear the persistent index cache.
    Reset,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "trail_coach=info,trail_coach_core=info".into()
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let mode = cli.progress.mode();

    match cli.command {
        Commands::Init => {
            if cfg.cache.backend == "sqlite" {
                migrate::run_migrations(&cfg).await?;
                println!("Cache database ready at {}", cfg.cache.path.display());
            } else {
                println!("Cache backend is '{}'; nothing to initialize.", cfg.cache.backend);
            }
        }
        Commands::Kb => knowledge::run_kb(&cfg)?,
        Commands::Index => index_cmd::run_index(&cfg, mode).await?,
        Commands::Ask { question, json } => ask::run_ask(&cfg, &question, json, mode).await?,
        Commands::Chat => ask::run_chat(&cfg, mode).await?,
        Commands::Reset => index_cmd::run_reset(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
