//! ICS parsing using the icalendar crate's parser.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Property, read_calendar, unfold},
};

use crate::error::{AgendaError, AgendaResult};

/// The parts of a VEVENT the replica cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarObject {
    pub uid: Option<String>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// Every CATEGORIES value, in document order
    pub categories: Vec<String>,
    /// Attendee emails with the `mailto:` scheme removed
    pub attendees: Vec<String>,
}

/// Parse ICS content into a [`CalendarObject`].
///
/// Fails when there is no VEVENT or its DTSTART is missing or unreadable.
pub fn parse_calendar_object(content: &str) -> AgendaResult<CalendarObject> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(AgendaError::Parse)?;
    let vevent = calendar
        .components
        .iter()
        .find(|c| c.name == "VEVENT")
        .ok_or_else(|| AgendaError::Parse("No VEVENT component".into()))?;

    let dtstart = vevent
        .find_prop("DTSTART")
        .ok_or_else(|| AgendaError::Parse("VEVENT has no DTSTART".into()))?;
    let start = DatePerhapsTime::try_from(dtstart)
        .ok()
        .and_then(to_utc)
        .ok_or_else(|| {
            AgendaError::Parse(format!("Unreadable DTSTART '{}'", dtstart.val.as_ref()))
        })?;

    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .and_then(to_utc);

    let uid = vevent.find_prop("UID").map(|p| p.val.to_string());
    // TEXT values arrive already unescaped by the parser
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());
    let description = vevent.find_prop("DESCRIPTION").map(|p| p.val.to_string());
    let location = vevent
        .find_prop("LOCATION")
        .map(|p| p.val.to_string())
        .filter(|l| !l.is_empty());

    // The parser's unescaping would turn `\,` into a separator, so the list
    // is split on the raw text
    let categories: Vec<String> = raw_event_values(&unfolded, "CATEGORIES")
        .into_iter()
        .flat_map(split_list)
        .collect();

    let attendees: Vec<String> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .filter_map(parse_attendee_email)
        .collect();

    Ok(CalendarObject {
        uid,
        summary,
        description,
        location,
        start,
        end,
        categories,
        attendees,
    })
}

/// Resolve icalendar's DatePerhapsTime to an absolute instant.
///
/// Dates are taken at midnight UTC. Floating times and unknown TZIDs are
/// read as UTC.
fn to_utc(dpt: DatePerhapsTime) -> Option<DateTime<Utc>> {
    match dpt {
        DatePerhapsTime::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => Some(dt),
            CalendarDateTime::Floating(naive) => Some(naive.and_utc()),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                Some(zoned_to_utc(date_time, &tzid))
            }
        },
    }
}

fn zoned_to_utc(date_time: NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    match tzid.parse::<Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&date_time)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| date_time.and_utc()),
        Err(_) => date_time.and_utc(),
    }
}

fn parse_attendee_email(prop: &Property) -> Option<String> {
    let val = prop.val.as_ref().trim();
    let email = match val.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => &val[7..],
        _ => val,
    };
    let email = email.trim();
    (!email.is_empty()).then(|| email.to_string())
}

/// Still-escaped values of every `name` property of the first VEVENT.
/// Properties of nested components (VALARM) are skipped.
fn raw_event_values<'a>(unfolded: &'a str, name: &str) -> Vec<&'a str> {
    let mut values = Vec::new();
    let mut in_event = false;
    let mut nested = 0usize;

    for line in unfolded.lines() {
        if let Some(component) = line.strip_prefix("BEGIN:") {
            if in_event {
                nested += 1;
            } else if component.trim().eq_ignore_ascii_case("VEVENT") {
                in_event = true;
            }
            continue;
        }
        if !in_event {
            continue;
        }
        if line.starts_with("END:") {
            if nested == 0 {
                break;
            }
            nested -= 1;
            continue;
        }
        if nested > 0 {
            continue;
        }
        if let Some((key, value)) = split_content_line(line) {
            if key.eq_ignore_ascii_case(name) {
                values.push(value);
            }
        }
    }
    values
}

/// `NAME;PARAM="a:b":value` -> `("NAME", "value")`. Colons inside quoted
/// parameter values do not end the parameters.
fn split_content_line(line: &str) -> Option<(&str, &str)> {
    let key_end = line.find([';', ':'])?;
    let mut quoted = false;

    for (offset, c) in line[key_end..].char_indices() {
        match c {
            '"' => quoted = !quoted,
            ':' if !quoted => return Some((&line[..key_end], &line[key_end + offset + 1..])),
            _ => {}
        }
    }
    None
}

/// Split a comma-separated TEXT list, honouring `\,` escapes.
fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push('\\');
                    current.push(next);
                }
            }
            ',' => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| unescape_text(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(escaped @ ('\\' | ',' | ';' | ':')) => out.push(escaped),
            // Unknown escapes are kept as written
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_categories_and_attendees() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-1\r\n\
SUMMARY:Atelier compost\r\n\
DTSTART:20300105T140000Z\r\n\
DTEND:20300105T160000Z\r\n\
CATEGORIES:Atelier,vol:3\r\n\
CATEGORIES:Quartier\\, Nord\r\n\
ATTENDEE;CN=Alice:mailto:alice@example.com\r\n\
ATTENDEE:MAILTO:bob@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let object = parse_calendar_object(ics).expect("Should parse");

        assert_eq!(object.uid.as_deref(), Some("evt-1"));
        assert_eq!(object.summary, "Atelier compost");
        assert_eq!(
            object.start,
            Utc.with_ymd_and_hms(2030, 1, 5, 14, 0, 0).unwrap()
        );
        assert_eq!(object.categories, vec!["Atelier", "vol:3", "Quartier, Nord"]);
        assert_eq!(object.attendees, vec!["alice@example.com", "bob@example.com"]);
    }

    #[test]
    fn test_text_values_are_unescaped_once() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-5\r\n\
SUMMARY:Tri\\, compost\r\n\
DESCRIPTION:Outils dans C:\\\\atelier\\nApporter des gants\r\n\
LOCATION:Salle \\\\ 2\r\n\
DTSTART:20300105T140000Z\r\n\
CATEGORIES;LANGUAGE=\"fr:FR\":Dossier\\\\Partage,Atelier\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
CATEGORIES:Alarme\r\n\
TRIGGER:-PT15M\r\n\
END:VALARM\r\n\
CATEGORIES:Quartier\\, Nord\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let object = parse_calendar_object(ics).expect("Should parse");

        assert_eq!(object.summary, "Tri, compost");
        assert_eq!(
            object.description.as_deref(),
            Some("Outils dans C:\\atelier\nApporter des gants")
        );
        assert_eq!(object.location.as_deref(), Some("Salle \\ 2"));
        assert_eq!(object.categories, vec!["Dossier\\Partage", "Atelier", "Quartier, Nord"]);
    }

    #[test]
    fn test_split_content_line_skips_quoted_colons() {
        assert_eq!(
            split_content_line("CATEGORIES;X-NOTE=\"a:b\":One,Two"),
            Some(("CATEGORIES", "One,Two"))
        );
        assert_eq!(split_content_line("CATEGORIES:vol:3"), Some(("CATEGORIES", "vol:3")));
        assert_eq!(split_content_line("garbage"), None);
    }

    #[test]
    fn test_parse_zoned_start_converts_to_utc() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-2\r\n\
DTSTART;TZID=Europe/Paris:20300601T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let object = parse_calendar_object(ics).expect("Should parse");

        // Paris is UTC+2 in summer
        assert_eq!(
            object.start,
            Utc.with_ymd_and_hms(2030, 6, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(object.end, None);
    }

    #[test]
    fn test_parse_all_day_event() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-3\r\n\
DTSTART;VALUE=DATE:20300210\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let object = parse_calendar_object(ics).expect("Should parse");
        assert_eq!(
            object.start,
            Utc.with_ymd_and_hms(2030, 2, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_dtstart_is_a_parse_error() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:evt-4\r\n\
SUMMARY:No start\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let err = parse_calendar_object(ics).unwrap_err();
        assert!(matches!(err, AgendaError::Parse(_)));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(parse_calendar_object("this is not a calendar").is_err());
    }
}
