//! SoloJourn CLI
//!
//! Command-line tools for the SoloJourn sync layer.
//!
//! # Commands
//!
//! - `listen` - Connect to an event hub and log inbound traffic
//! - `simulate` - Run a scripted session against in-memory collaborators
//! - `token` - Manage the persisted session token

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SoloJourn real-time sync tools.
#[derive(Parser)]
#[command(name = "solojourn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the session store file
    #[arg(global = true, short, long, default_value = ".solojourn/session.json")]
    store: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to an event hub and log inbound events
    Listen {
        /// Event hub URL (defaults to $SOLOJOURN_SOCKET_URL)
        #[arg(short, long)]
        url: Option<String>,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Conversations to join once connected
        #[arg(short, long)]
        join: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a scripted session against in-memory collaborators
    Simulate {
        /// Number of posts on the server
        #[arg(short, long, default_value = "20")]
        posts: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Manage the persisted session token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a token
    Set {
        /// The bearer token
        token: String,
    },
    /// Print the stored token
    Get,
    /// Remove the stored token
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Listen {
            url,
            duration,
            join,
            format,
        } => {
            commands::listen::run(&cli.store, url, duration, &join, &format).await?;
        }
        Commands::Simulate { posts, format } => {
            commands::simulate::run(posts, &format).await?;
        }
        Commands::Token { action } => match action {
            TokenAction::Set { token } => commands::token::set(&cli.store, &token)?,
            TokenAction::Get => commands::token::get(&cli.store)?,
            TokenAction::Clear => commands::token::clear(&cli.store)?,
        },
        Commands::Version => {
            println!("SoloJourn CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
