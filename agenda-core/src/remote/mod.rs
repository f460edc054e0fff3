//! The calendar server as seen by the sync engine.
//!
//! Only three requests are needed: the collection change token, the
//! per-entry token listing and a batch body fetch. Tokens are opaque and
//! only ever compared for equality.

pub mod caldav;
mod multistatus;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::AgendaResult;

pub use caldav::CalDavClient;

/// A fetched entry body with its token.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub token: String,
    pub body: String,
}

#[async_trait]
pub trait RemoteCalendarClient: Send + Sync {
    /// Token summarizing the whole collection (CalDAV ctag).
    async fn change_token(&self) -> AgendaResult<String>;

    /// Entry id -> entry token (CalDAV etag) for every entry in the collection.
    async fn entry_tokens(&self) -> AgendaResult<HashMap<String, String>>;

    /// Bodies for the requested ids. Ids the server did not return are
    /// simply absent from the map.
    async fn fetch_bodies(&self, ids: &[String]) -> AgendaResult<HashMap<String, RemoteEntry>>;
}

/// Derive an entry id from a resource href: its last non-empty path segment.
pub fn entry_id_from_href(href: &str) -> Option<String> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}

/// ETags come quoted on the wire; the quotes are not part of the token.
pub fn normalize_token(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_from_href() {
        assert_eq!(
            entry_id_from_href("/dav/calendars/agenda/abc-123.ics").as_deref(),
            Some("abc-123.ics")
        );
        assert_eq!(entry_id_from_href("/").as_deref(), None);
    }

    #[test]
    fn test_normalize_token_strips_quotes() {
        assert_eq!(normalize_token("\"63ab-1\""), "63ab-1");
        assert_eq!(normalize_token("plain"), "plain");
    }
}
