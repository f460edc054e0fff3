//! Calendar object (.ics) parsing.
//!
//! Only the fields the replica needs are extracted: start/end, a few text
//! fields, CATEGORIES and ATTENDEE values.

mod parse;

pub use parse::{CalendarObject, parse_calendar_object};
