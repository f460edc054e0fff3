//! Parsing of WebDAV multistatus response bodies.

use roxmltree::{Document, Node};

use crate::error::{AgendaError, AgendaResult};

/// A resource from a calendar-multiget response.
#[derive(Debug, PartialEq)]
pub struct CalendarResource {
    pub href: String,
    pub etag: Option<String>,
    pub data: String,
}

fn parse_document(text: &str) -> AgendaResult<Document<'_>> {
    Document::parse(text)
        .map_err(|e| AgendaError::Transport(format!("Malformed multistatus response: {e}")))
}

fn child_text<'a>(node: Node<'a, 'a>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.tag_name().name() == name)
        .and_then(|n| n.text())
}

fn responses<'a>(doc: &'a Document<'a>) -> impl Iterator<Item = Node<'a, 'a>> {
    doc.root_element()
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
}

/// Extract the collection ctag from a Depth 0 PROPFIND response.
pub fn parse_ctag(text: &str) -> AgendaResult<Option<String>> {
    let doc = parse_document(text)?;
    let ctag = responses(&doc)
        .find_map(|response| child_text(response, "getctag"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(ctag)
}

/// Extract `(href, etag)` pairs from a Depth 1 calendar-query response.
///
/// Responses without an etag (the collection itself) are skipped.
pub fn parse_etags(text: &str) -> AgendaResult<Vec<(String, String)>> {
    let doc = parse_document(text)?;
    let pairs = responses(&doc)
        .filter_map(|response| {
            let href = child_text(response, "href")?;
            let etag = child_text(response, "getetag")?;
            Some((href.trim().to_string(), etag.to_string()))
        })
        .collect();
    Ok(pairs)
}

/// Resources of a calendar-multiget response. Responses without
/// calendar-data (e.g. 404 for a vanished href) are skipped.
pub fn parse_calendar_resources(text: &str) -> AgendaResult<Vec<CalendarResource>> {
    let doc = parse_document(text)?;
    let resources = responses(&doc)
        .filter_map(|response| {
            Some(CalendarResource {
                href: child_text(response, "href")?.trim().to_string(),
                etag: child_text(response, "getetag").map(String::from),
                data: child_text(response, "calendar-data")?.to_string(),
            })
        })
        .collect();
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ctag() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:cs="http://calendarserver.org/ns/">
  <d:response>
    <d:href>/calendars/agenda/</d:href>
    <d:propstat>
      <d:prop><cs:getctag>3145</cs:getctag></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        assert_eq!(parse_ctag(body).unwrap().as_deref(), Some("3145"));
    }

    #[test]
    fn test_parse_ctag_missing() {
        let body = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:href>/c/</d:href></d:response></d:multistatus>"#;
        assert_eq!(parse_ctag(body).unwrap(), None);
    }

    #[test]
    fn test_parse_etags_skips_collection() {
        let body = r#"<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/calendars/agenda/</d:href>
    <d:propstat><d:prop/></d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/agenda/a.ics</d:href>
    <d:propstat><d:prop><d:getetag>"e-1"</d:getetag></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/agenda/b.ics</d:href>
    <d:propstat><d:prop><d:getetag>"e-2"</d:getetag></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let pairs = parse_etags(body).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("/calendars/agenda/a.ics".to_string(), "\"e-1\"".to_string()),
                ("/calendars/agenda/b.ics".to_string(), "\"e-2\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_calendar_resources() {
        let body = r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/calendars/agenda/a.ics</d:href>
    <d:propstat><d:prop>
      <d:getetag>"e-1"</d:getetag>
      <c:calendar-data>BEGIN:VCALENDAR
END:VCALENDAR</c:calendar-data>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/agenda/gone.ics</d:href>
    <d:status>HTTP/1.1 404 Not Found</d:status>
  </d:response>
  <d:response>
    <d:href> /calendars/agenda/b.ics </d:href>
    <d:propstat><d:prop>
      <c:calendar-data>BEGIN:VCALENDAR
END:VCALENDAR</c:calendar-data>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let resources = parse_calendar_resources(body).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].href, "/calendars/agenda/a.ics");
        assert_eq!(resources[0].etag.as_deref(), Some("\"e-1\""));
        assert!(resources[0].data.starts_with("BEGIN:VCALENDAR"));
        assert_eq!(resources[1].href, "/calendars/agenda/b.ics");
        assert_eq!(resources[1].etag, None);
    }

    #[test]
    fn test_malformed_xml_is_a_transport_error() {
        let err = parse_etags("<d:multistatus").unwrap_err();
        assert!(err.is_transport());
    }
}
