//! CalDAV client over reqwest.
//!
//! Speaks the three requests the sync cycle needs: a Depth 0 PROPFIND for
//! the ctag, a calendar-query REPORT for etags and a calendar-multiget
//! REPORT for bodies.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use tokio::time::timeout;
use tracing::debug;

use crate::config::CalDavConfig;
use crate::error::{AgendaError, AgendaResult};
use crate::remote::multistatus::{parse_calendar_resources, parse_ctag, parse_etags};
use crate::remote::{RemoteCalendarClient, RemoteEntry, entry_id_from_href, normalize_token};

const CTAG_QUERY: &str = r#"<d:propfind xmlns:d="DAV:" xmlns:cs="http://calendarserver.org/ns/">
  <d:prop>
    <cs:getctag/>
  </d:prop>
</d:propfind>"#;

const ETAG_QUERY: &str = r#"<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
    <d:prop>
        <d:getetag/>
    </d:prop>
    <c:filter>
        <c:comp-filter name="VCALENDAR"/>
    </c:filter>
</c:calendar-query>"#;

pub struct CalDavClient {
    http: Client,
    url: Url,
    username: String,
    password: String,
    request_timeout: Duration,
}

impl CalDavClient {
    pub fn new(config: &CalDavConfig) -> AgendaResult<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| AgendaError::Config(format!("Invalid CalDAV url '{}': {e}", config.url)))?;

        let http = Client::builder()
            .build()
            .map_err(|e| AgendaError::Config(format!("Could not build HTTP client: {e}")))?;

        Ok(CalDavClient {
            http,
            url,
            username: config.username.clone(),
            password: config.password.clone(),
            request_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Build the href of an entry inside the collection.
    fn entry_href(&self, id: &str) -> String {
        format!("{}/{}", self.url.path().trim_end_matches('/'), id)
    }

    /// Send a WebDAV request and return the response body, bounded by the
    /// configured timeout.
    async fn send(&self, method: &[u8], depth: &str, body: String) -> AgendaResult<String> {
        let method = Method::from_bytes(method)
            .map_err(|e| AgendaError::Transport(format!("Invalid method: {e}")))?;

        let request = self
            .http
            .request(method.clone(), self.url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", depth)
            .header("Prefer", "return-minimal")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(body);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AgendaError::Transport(format!(
                    "{} {} returned {}",
                    method, self.url, status
                )));
            }
            Ok::<_, AgendaError>(response.text().await?)
        };

        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| AgendaError::Timeout(self.request_timeout.as_secs()))?
    }
}

#[async_trait]
impl RemoteCalendarClient for CalDavClient {
    async fn change_token(&self) -> AgendaResult<String> {
        let body = self.send(b"PROPFIND", "0", CTAG_QUERY.to_string()).await?;
        parse_ctag(&body)?.ok_or_else(|| {
            AgendaError::Transport(format!("No getctag in PROPFIND response from {}", self.url))
        })
    }

    async fn entry_tokens(&self) -> AgendaResult<HashMap<String, String>> {
        let body = self.send(b"REPORT", "1", ETAG_QUERY.to_string()).await?;

        let tokens: HashMap<String, String> = parse_etags(&body)?
            .into_iter()
            .filter_map(|(href, etag)| Some((entry_id_from_href(&href)?, normalize_token(&etag))))
            .collect();

        debug!(entries = tokens.len(), "Listed remote entry tokens");
        Ok(tokens)
    }

    async fn fetch_bodies(&self, ids: &[String]) -> AgendaResult<HashMap<String, RemoteEntry>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let hrefs: String = ids
            .iter()
            .map(|id| format!("    <d:href>{}</d:href>\n", xml_escape(&self.entry_href(id))))
            .collect();

        let query = format!(
            r#"<c:calendar-multiget xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
    <d:prop>
        <d:getetag/>
        <c:calendar-data/>
    </d:prop>
{hrefs}</c:calendar-multiget>"#
        );

        let body = self.send(b"REPORT", "1", query).await?;

        let entries = parse_calendar_resources(&body)?
            .into_iter()
            .filter_map(|resource| {
                let id = entry_id_from_href(&resource.href)?;
                let token = resource.etag.as_deref().map(normalize_token).unwrap_or_default();
                Some((
                    id,
                    RemoteEntry {
                        token,
                        body: resource.data,
                    },
                ))
            })
            .collect();

        Ok(entries)
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
