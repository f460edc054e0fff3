//! Local replica storage.
//!
//! Two interchangeable backends implement [`LocalStore`]: a directory of
//! .ics files with sidecar files ([`FsStore`]) and a SQLite database with
//! normalized tables ([`SqliteStore`]). Each call is atomic on its own;
//! orphan cleanup is an explicit, separate call.

mod fs;
mod schema;
mod sqlite;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::AgendaResult;
use crate::event::{Attendee, Event, EventQuery};

pub use fs::FsStore;
pub use sqlite::SqliteStore;

pub trait LocalStore: Send + Sync {
    /// Insert or replace an event together with its category and attendee
    /// associations. Missing Category and Attendee rows are created; an
    /// existing attendee keeps its resolved id unless a new one is given.
    fn upsert_event(
        &self,
        event: &Event,
        categories: &BTreeSet<String>,
        attendees: &[Attendee],
    ) -> AgendaResult<()>;

    /// Remove an event and its association rows. Returns false if the
    /// event was not stored.
    fn remove_event(&self, id: &str) -> AgendaResult<bool>;

    fn list_event_ids_and_tokens(&self) -> AgendaResult<HashMap<String, String>>;

    fn get_event(&self, id: &str) -> AgendaResult<Option<Event>>;

    /// Events matching `query`, ordered by start time ascending.
    fn query_events(&self, query: &EventQuery) -> AgendaResult<Vec<Event>>;

    /// Category names associated with an event, sorted.
    fn event_categories(&self, id: &str) -> AgendaResult<Vec<String>>;

    /// Attendee rows associated with an event, sorted by email.
    fn event_attendees(&self, id: &str) -> AgendaResult<Vec<Attendee>>;

    fn attendee(&self, email: &str) -> AgendaResult<Option<Attendee>>;

    /// Every stored category name, sorted.
    fn category_names(&self) -> AgendaResult<Vec<String>>;

    /// Delete categories with no remaining event. Returns how many went.
    fn clean_orphan_categories(&self) -> AgendaResult<usize>;

    /// Delete attendees with no remaining event. Returns how many went.
    fn clean_orphan_attendees(&self) -> AgendaResult<usize>;

    /// Remove every event, category, attendee and the sync state.
    fn truncate_all(&self) -> AgendaResult<()>;

    /// Last change token persisted by a completed sync cycle.
    fn change_token(&self) -> AgendaResult<Option<String>>;

    fn set_change_token(&self, token: &str) -> AgendaResult<()>;
}

/// Open the backend selected in the configuration.
pub fn open_store(config: &StoreConfig) -> AgendaResult<Arc<dyn LocalStore>> {
    let path = config.expanded_path();
    info!(backend = ?config.backend, path = %path.display(), "Opening local store");

    Ok(match config.backend {
        StoreBackend::Filesystem => Arc::new(FsStore::open(&path)?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&path)?),
    })
}
