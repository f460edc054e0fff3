use std::sync::Arc;

use agenda_core::LocalStore;
use anyhow::Result;
use owo_colors::OwoColorize;
use tracing::warn;

pub fn run(store: Arc<dyn LocalStore>) -> Result<()> {
    warn!("Emptying local store");
    store.truncate_all()?;

    println!("{}", "Local store emptied; run `agenda sync` to download everything again".yellow());

    Ok(())
}
