use std::sync::Arc;

use agenda_core::LocalStore;
use anyhow::Result;
use tracing::info;

pub fn run(store: Arc<dyn LocalStore>) -> Result<()> {
    let categories = store.clean_orphan_categories()?;
    let attendees = store.clean_orphan_attendees()?;

    info!(categories, attendees, "Removed orphaned rows");
    println!("Removed {} categories, {} attendees", categories, attendees);

    Ok(())
}
