//! Normalized event types.
//!
//! These are the rows the local replica stores. They are produced by the
//! sync apply phase from remote calendar objects and read back by the
//! query layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored calendar entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable entry identifier (last path segment of the remote resource)
    pub id: String,
    /// Opaque per-entry token, compared only for equality
    pub token: String,
    pub start: DateTime<Utc>,
    /// Count carried by a volunteers-required tag, if the event has one
    pub volunteers_required: Option<u32>,
    /// Calendar object text exactly as the server returned it
    pub raw_body: String,
}

impl Event {
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start > now
    }
}

/// An attendee row. `resolved_id` is `None` when identity lookup failed
/// or has not happened yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub resolved_id: Option<String>,
}

impl Attendee {
    pub fn new(email: &str, resolved_id: Option<String>) -> Self {
        Attendee {
            email: email.to_string(),
            resolved_id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_id.is_some()
    }
}

/// Predicate evaluated by a [`LocalStore`](crate::store::LocalStore).
///
/// All conditions are combined with AND; `categories` is an intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    /// Only events starting strictly after this instant
    pub starts_after: DateTime<Utc>,
    pub needs_volunteers: bool,
    pub categories: Vec<String>,
    /// Only events with an attendee resolving to this identifier
    pub attendee_id: Option<String>,
}

impl EventQuery {
    pub fn upcoming(now: DateTime<Utc>) -> Self {
        EventQuery {
            starts_after: now,
            needs_volunteers: false,
            categories: Vec::new(),
            attendee_id: None,
        }
    }

    /// In-memory evaluation, for backends that have no query engine of their own.
    pub fn matches(&self, event: &Event, categories: &[String], attendees: &[Attendee]) -> bool {
        if !event.is_upcoming(self.starts_after) {
            return false;
        }
        if self.needs_volunteers && event.volunteers_required.is_none() {
            return false;
        }
        if !self.categories.iter().all(|c| categories.contains(c)) {
            return false;
        }
        match &self.attendee_id {
            Some(id) => attendees
                .iter()
                .any(|a| a.resolved_id.as_deref() == Some(id.as_str())),
            None => true,
        }
    }
}

/// An event decorated with everything a presentation layer needs,
/// derived from association rows at query time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderableEvent {
    pub event: Event,
    /// Resolved identifiers of the attendees, sorted and deduplicated
    pub attendees: Vec<String>,
    /// Attendees whose email could not be resolved
    pub unknown_attendees: usize,
    /// Whether the querying user is among the resolved attendees
    pub is_registered: bool,
    pub categories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(start: DateTime<Utc>, volunteers: Option<u32>) -> Event {
        Event {
            id: "e1".to_string(),
            token: "t1".to_string(),
            start,
            volunteers_required: volunteers,
            raw_body: String::new(),
        }
    }

    #[test]
    fn test_query_excludes_events_starting_exactly_now() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap();
        let query = EventQuery::upcoming(now);

        assert!(!query.matches(&event(now, None), &[], &[]));
        assert!(query.matches(&event(now + chrono::Duration::seconds(1), None), &[], &[]));
    }

    #[test]
    fn test_query_combines_conditions_with_and() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap();
        let later = now + chrono::Duration::days(1);
        let query = EventQuery {
            starts_after: now,
            needs_volunteers: true,
            categories: vec!["A".to_string(), "B".to_string()],
            attendee_id: Some("U1".to_string()),
        };
        let cats = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let attendees = vec![
            Attendee::new("x@example.com", None),
            Attendee::new("u1@example.com", Some("U1".to_string())),
        ];

        assert!(query.matches(&event(later, Some(2)), &cats, &attendees));
        assert!(!query.matches(&event(later, None), &cats, &attendees));
        assert!(!query.matches(&event(later, Some(2)), &cats[..1], &attendees));
        assert!(!query.matches(&event(later, Some(2)), &cats, &attendees[..1]));
    }
}
