use std::sync::Arc;
use std::time::Duration;

use agenda_core::{
    AgendaConfig, CalDavClient, EventClassifier, StaticIdentityResolver, SyncCoordinator,
    SyncOutcome, open_store,
};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::info;

use crate::render::Render;

pub async fn run(config: &AgendaConfig) -> Result<()> {
    let remote = Arc::new(CalDavClient::new(&config.caldav)?);
    let store = open_store(&config.store)?;
    let resolver = Arc::new(StaticIdentityResolver::new(&config.identities));
    let classifier = EventClassifier::new(&config.volunteers_tag_prefix);

    let coordinator = SyncCoordinator::new(remote, store, resolver, classifier);

    let spinner = spinner(format!("Syncing {}", config.caldav.url));
    let result = coordinator.sync_now().await;
    spinner.finish_and_clear();

    let report = match result? {
        SyncOutcome::UpToDate => {
            println!("{}", "Already up to date".dimmed());
            return Ok(());
        }
        SyncOutcome::Applied(report) => report,
    };

    println!("{}", report.render());
    for diagnostic in &report.diagnostics {
        println!("{}", diagnostic.render());
    }

    if !report.token_persisted {
        println!(
            "{}",
            "Some changes could not be stored; they will be retried on the next sync".yellow()
        );
    }

    let (categories, attendees) = coordinator.clean().await?;
    if categories > 0 || attendees > 0 {
        info!(categories, attendees, "Removed orphaned rows after sync");
        println!(
            "{}",
            format!("Cleaned {} categories, {} attendees", categories, attendees).dimmed()
        );
    }

    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner().with_message(message);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style.tick_strings(&["-", "\\", "|", "/", "-"]));
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
