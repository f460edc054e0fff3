use std::sync::Arc;

use agenda_core::{AgendaConfig, EventClassifier, Filter, LocalStore, QueryEngine};
use anyhow::Result;
use chrono::Utc;
use owo_colors::OwoColorize;
use tracing::debug;

use crate::render::Render;

pub fn run(
    config: &AgendaConfig,
    store: Arc<dyn LocalStore>,
    user: &str,
    raw_filters: &[String],
    json: bool,
) -> Result<()> {
    let classifier = EventClassifier::new(&config.volunteers_tag_prefix);
    let filters = Filter::parse_all(raw_filters, &classifier);

    let engine = QueryEngine::new(store);
    let events = engine.user_events_filtered(user, Utc::now(), &filters)?;
    debug!(user, filters = ?filters, matched = events.len(), "Queried upcoming events");

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No events found".dimmed());
        return Ok(());
    }

    for event in &events {
        println!("{}", event.render());
    }

    Ok(())
}

pub fn show(store: Arc<dyn LocalStore>, id: &str, user: &str) -> Result<()> {
    let engine = QueryEngine::new(store);

    match engine.event_for_user(id, user)? {
        Some(event) => {
            println!("{}", event.render());
            if !event.attendees.is_empty() {
                println!("  attendees: {}", event.attendees.join(", "));
            }
            if event.unknown_attendees > 0 {
                println!("  {} unknown attendees", event.unknown_attendees);
            }
            Ok(())
        }
        None => anyhow::bail!("No event with id '{}'", id),
    }
}

pub fn categories(store: Arc<dyn LocalStore>) -> Result<()> {
    let engine = QueryEngine::new(store);

    for name in engine.known_categories(Utc::now())? {
        println!("{}", name);
    }

    Ok(())
}
