//! Core library for agenda: a local replica of a CalDAV calendar.
//!
//! - `remote` talks to the server (change token, entry tokens, bodies)
//! - `sync` diffs and applies remote changes to a `store`
//! - `query` answers per-user filtered event lists from the replica

pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod ics;
pub mod identity;
pub mod query;
pub mod remote;
pub mod store;
pub mod sync;

pub use classify::{Classification, EventClassifier};
pub use config::{AgendaConfig, StoreBackend, StoreConfig};
pub use error::{AgendaError, AgendaResult};
pub use event::{Attendee, Event, EventQuery, RenderableEvent};
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use query::{Filter, QueryEngine};
pub use remote::{CalDavClient, RemoteCalendarClient, RemoteEntry};
pub use store::{FsStore, LocalStore, SqliteStore, open_store};
pub use sync::{SyncCoordinator, SyncOutcome, SyncReport};
