//! Reading the replica back for a given user.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::classify::EventClassifier;
use crate::error::AgendaResult;
use crate::event::{Event, EventQuery, RenderableEvent};
use crate::store::LocalStore;

pub const MINE_FILTER: &str = "my_events";
pub const NEEDS_VOLUNTEERS_FILTER: &str = "need_volunteers";

/// One filter token. A filter set is the AND of all its tokens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Filter {
    /// The user is among the resolved attendees
    Mine,
    NeedsVolunteers,
    Category(String),
}

impl Filter {
    /// Interpret a filter string coming from a caller.
    ///
    /// Returns `None` for blank strings and for names that encode a
    /// volunteers count, which are never stored as categories.
    pub fn parse(raw: &str, classifier: &EventClassifier) -> Option<Filter> {
        let raw = raw.trim();
        match raw {
            "" => None,
            MINE_FILTER => Some(Filter::Mine),
            NEEDS_VOLUNTEERS_FILTER => Some(Filter::NeedsVolunteers),
            name if classifier.volunteers_count(name).is_some() => None,
            name => Some(Filter::Category(name.to_string())),
        }
    }

    pub fn parse_all<S: AsRef<str>>(raw: &[S], classifier: &EventClassifier) -> Vec<Filter> {
        raw.iter()
            .filter_map(|r| Filter::parse(r.as_ref(), classifier))
            .collect()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Mine => write!(f, "{}", MINE_FILTER),
            Filter::NeedsVolunteers => write!(f, "{}", NEEDS_VOLUNTEERS_FILTER),
            Filter::Category(name) => write!(f, "{}", name),
        }
    }
}

pub struct QueryEngine {
    store: Arc<dyn LocalStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        QueryEngine { store }
    }

    /// Upcoming events (start strictly after `now`) matching every filter,
    /// earliest first.
    pub fn user_events_filtered(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        filters: &[Filter],
    ) -> AgendaResult<Vec<RenderableEvent>> {
        let query = build_query(user_id, now, filters);

        self.store
            .query_events(&query)?
            .into_iter()
            .map(|event| self.render(event, user_id))
            .collect()
    }

    /// A single event by id, whatever its start time.
    pub fn event_for_user(&self, id: &str, user_id: &str) -> AgendaResult<Option<RenderableEvent>> {
        match self.store.get_event(id)? {
            Some(event) => Ok(Some(self.render(event, user_id)?)),
            None => Ok(None),
        }
    }

    /// Categories carried by at least one upcoming event, sorted.
    pub fn known_categories(&self, now: DateTime<Utc>) -> AgendaResult<Vec<String>> {
        let mut names = BTreeSet::new();
        for event in self.store.query_events(&EventQuery::upcoming(now))? {
            names.extend(self.store.event_categories(&event.id)?);
        }
        Ok(names.into_iter().collect())
    }

    fn render(&self, event: Event, user_id: &str) -> AgendaResult<RenderableEvent> {
        let attendees = self.store.event_attendees(&event.id)?;
        let categories = self.store.event_categories(&event.id)?;

        let resolved: BTreeSet<String> = attendees
            .iter()
            .filter_map(|a| a.resolved_id.clone())
            .collect();
        let unknown_attendees = attendees.iter().filter(|a| !a.is_resolved()).count();

        Ok(RenderableEvent {
            is_registered: resolved.contains(user_id),
            attendees: resolved.into_iter().collect(),
            unknown_attendees,
            categories,
            event,
        })
    }
}

fn build_query(user_id: &str, now: DateTime<Utc>, filters: &[Filter]) -> EventQuery {
    let mut query = EventQuery::upcoming(now);
    let mut categories = BTreeSet::new();

    for filter in filters {
        match filter {
            Filter::Mine => query.attendee_id = Some(user_id.to_string()),
            Filter::NeedsVolunteers => query.needs_volunteers = true,
            Filter::Category(name) => {
                categories.insert(name.clone());
            }
        }
    }

    query.categories = categories.into_iter().collect();
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Attendee;
    use crate::store::SqliteStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 9, 0, 0).unwrap()
    }

    fn event(id: &str, days: i64, volunteers: Option<u32>) -> Event {
        Event {
            id: id.to_string(),
            token: format!("{id}-t"),
            start: now() + Duration::days(days),
            volunteers_required: volunteers,
            raw_body: String::new(),
        }
    }

    fn seeded() -> QueryEngine {
        let store = SqliteStore::in_memory().unwrap();
        let cats = |names: &[&str]| -> BTreeSet<String> {
            names.iter().map(|n| n.to_string()).collect()
        };
        let alice = Attendee::new("alice@example.com", Some("U1".to_string()));
        let bob = Attendee::new("bob@example.com", Some("U2".to_string()));
        let stranger = Attendee::new("who@example.com", None);

        store
            .upsert_event(&event("E1", 1, None), &cats(&["A"]), &[alice.clone()])
            .unwrap();
        store
            .upsert_event(&event("E2", 2, Some(3)), &cats(&["A", "B"]), &[bob, stranger])
            .unwrap();
        store
            .upsert_event(&event("E3", 3, Some(1)), &cats(&["B"]), &[alice])
            .unwrap();
        store
            .upsert_event(&event("OLD", -2, Some(1)), &cats(&["A", "Z"]), &[])
            .unwrap();

        QueryEngine::new(Arc::new(store))
    }

    fn ids(events: &[RenderableEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event.id.as_str()).collect()
    }

    #[test]
    fn test_parse_filters() {
        let classifier = EventClassifier::default();
        let filters = Filter::parse_all(
            &["my_events", "need_volunteers", "Kitchen", "vol:4", "  "],
            &classifier,
        );
        assert_eq!(
            filters,
            vec![
                Filter::Mine,
                Filter::NeedsVolunteers,
                Filter::Category("Kitchen".to_string())
            ]
        );
        assert_eq!(Filter::Mine.to_string(), "my_events");
    }

    #[test]
    fn test_category_filters_intersect() {
        let engine = seeded();
        let filters = vec![
            Filter::Category("A".to_string()),
            Filter::Category("B".to_string()),
        ];

        let events = engine.user_events_filtered("U1", now(), &filters).unwrap();
        assert_eq!(ids(&events), vec!["E2"]);
    }

    #[test]
    fn test_no_filters_lists_upcoming_in_order() {
        let engine = seeded();
        let events = engine.user_events_filtered("U1", now(), &[]).unwrap();
        assert_eq!(ids(&events), vec!["E1", "E2", "E3"]);
    }

    #[test]
    fn test_mine_and_volunteers_combine() {
        let engine = seeded();

        let mine = engine.user_events_filtered("U1", now(), &[Filter::Mine]).unwrap();
        assert_eq!(ids(&mine), vec!["E1", "E3"]);

        let both = engine
            .user_events_filtered("U1", now(), &[Filter::Mine, Filter::NeedsVolunteers])
            .unwrap();
        assert_eq!(ids(&both), vec!["E3"]);
    }

    #[test]
    fn test_rendered_fields() {
        let engine = seeded();
        let events = engine.user_events_filtered("U2", now(), &[]).unwrap();
        let e2 = events.iter().find(|e| e.event.id == "E2").unwrap();

        assert_eq!(e2.attendees, vec!["U2"]);
        assert_eq!(e2.unknown_attendees, 1);
        assert!(e2.is_registered);
        assert_eq!(e2.categories, vec!["A", "B"]);

        let e1 = events.iter().find(|e| e.event.id == "E1").unwrap();
        assert!(!e1.is_registered);
    }

    #[test]
    fn test_event_for_user_ignores_start_time() {
        let engine = seeded();
        let old = engine.event_for_user("OLD", "U1").unwrap().unwrap();
        assert_eq!(old.categories, vec!["A", "Z"]);
        assert!(engine.event_for_user("missing", "U1").unwrap().is_none());
    }

    #[test]
    fn test_known_categories_skip_past_events() {
        let engine = seeded();
        assert_eq!(engine.known_categories(now()).unwrap(), vec!["A", "B"]);
    }
}
