//! Squirrel command-line client.
//!
//! Usage:
//!   squirrel show [PATH]
//!   squirrel play E Bank/pin 1234 --autocreate
//!   squirrel undo
//!   squirrel sync
//!
//! The client blob lives in `client_dir`; the cloud is a second directory
//! (`cloud_dir`), typically inside a synced folder.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;

/// Password hoard with client/cloud sync.
#[derive(Parser, Debug)]
#[command(name = "squirrel")]
#[command(about = "Password hoard with client/cloud sync")]
struct Args {
    /// Config file (default: ~/.config/squirrel/config.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the client hoard
    #[arg(long, global = true)]
    client_dir: Option<PathBuf>,

    /// Directory standing in for the cloud
    #[arg(long, global = true)]
    cloud_dir: Option<PathBuf>,

    /// Name of the cloud stream inside the cloud directory
    #[arg(long, global = true)]
    cloud_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tree (values hidden)
    Show {
        /// Slash-separated path; the whole tree when omitted
        path: Option<String>,
    },
    /// Play one action against the client
    Play {
        /// Action type letter: N I A C D E M R X
        code: String,
        /// Slash-separated target path
        path: String,
        /// Payload; a string unless --json
        data: Option<String>,
        /// Parse the payload as JSON
        #[arg(long)]
        json: bool,
        /// Create missing parents
        #[arg(long)]
        autocreate: bool,
    },
    /// Undo the last unsynced action
    Undo,
    /// List unsynced actions
    Changes {
        #[arg(long, default_value_t = 20)]
        max: usize,
    },
    /// Merge with the cloud and save both replicas
    Sync,
    /// Ring reminders that are due
    Alarms,
    /// Print the minimal action stream for the client tree
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.client_dir {
        config.client_dir = dir;
    }
    if let Some(dir) = args.cloud_dir {
        config.cloud_dir = Some(dir);
    }
    let cloud_override = args.cloud_path.is_some();
    if let Some(path) = args.cloud_path {
        config.cloud_path = path;
    }
    tracing::debug!(?config, "effective config");

    let mut hoarder = commands::open(&config, cloud_override).await?;

    match args.command {
        Command::Show { path } => {
            let path = path.as_deref().map(commands::parse_path).unwrap_or_default();
            commands::show(&hoarder, &path)?;
        }
        Command::Play {
            code,
            path,
            data,
            json,
            autocreate,
        } => {
            commands::play(
                &mut hoarder,
                &code,
                &path,
                data.as_deref(),
                json,
                autocreate || config.autocreate,
            )
            .await?;
        }
        Command::Undo => commands::undo(&mut hoarder).await?,
        Command::Changes { max } => commands::changes(&hoarder, max),
        Command::Sync => {
            if config.cloud_dir.is_none() {
                anyhow::bail!("no cloud directory configured (set cloud_dir or pass --cloud-dir)");
            }
            commands::sync(&mut hoarder).await?;
        }
        Command::Alarms => commands::alarms(&mut hoarder).await?,
        Command::Compact => commands::compact(&hoarder)?,
    }

    Ok(())
}
