mod commands;
mod render;
mod singleton;

use std::path::PathBuf;
use std::sync::Arc;

use agenda_core::{AgendaConfig, LocalStore, open_store};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agenda")]
#[command(about = "Keep a local replica of a CalDAV calendar and query it per user")]
struct Cli {
    /// Config file (defaults to ~/.config/agenda/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v for debug, -vv for trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull changes from the CalDAV server into the local store
    Sync,
    /// List upcoming events for a user
    Events {
        /// User identifier to evaluate "my_events" and registration against
        #[arg(short, long)]
        user: String,

        /// Filter: my_events, need_volunteers or a category name. Repeat
        /// the flag to combine filters; category names may contain commas.
        #[arg(short, long)]
        filter: Vec<String>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
    /// Show one stored event
    Show {
        id: String,

        #[arg(short, long)]
        user: String,
    },
    /// List categories of upcoming events
    Categories,
    /// Delete categories and attendees no event refers to
    Clean,
    /// Wipe the local store; the next sync downloads everything again
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync => {
            let _lock = singleton::acquire_lock(&config.store)?;
            commands::sync::run(&config).await
        }
        Commands::Events { user, filter, json } => {
            commands::events::run(&config, open(&config)?, &user, &filter, json)
        }
        Commands::Show { id, user } => commands::events::show(open(&config)?, &id, &user),
        Commands::Categories => commands::events::categories(open(&config)?),
        Commands::Clean => {
            let _lock = singleton::acquire_lock(&config.store)?;
            commands::clean::run(open(&config)?)
        }
        Commands::Reset => {
            let _lock = singleton::acquire_lock(&config.store)?;
            commands::reset::run(open(&config)?)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "agenda_core=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<AgendaConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => AgendaConfig::config_path()?,
    };

    debug!(path = %path.display(), "Loading configuration");

    let config = AgendaConfig::load_from(&path).with_context(|| {
        format!(
            "Could not load configuration from {}.\n\n\
            A minimal config.toml looks like:\n\n  \
            [caldav]\n  \
            url = \"https://dav.example.com/calendars/me/agenda/\"\n  \
            username = \"me\"\n  \
            password = \"secret\"",
            path.display()
        )
    })?;

    info!(
        calendar = %config.caldav.url,
        store = %config.store.expanded_path().display(),
        "Configuration loaded"
    );
    Ok(config)
}

fn open(config: &AgendaConfig) -> Result<Arc<dyn LocalStore>> {
    Ok(open_store(&config.store)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_values_keep_their_commas() {
        let cli = Cli::try_parse_from([
            "agenda", "events", "-u", "U1", "-f", "Quartier, Nord", "--filter", "my_events",
        ])
        .unwrap();

        match cli.command {
            Commands::Events { filter, .. } => {
                assert_eq!(filter, vec!["Quartier, Nord".to_string(), "my_events".to_string()]);
            }
            _ => panic!("expected the events subcommand"),
        }
    }
}
