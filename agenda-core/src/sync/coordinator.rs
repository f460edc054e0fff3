//! One synchronization cycle: token check, diff, fetch, apply, prune,
//! persist the new change token.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classify::EventClassifier;
use crate::error::AgendaResult;
use crate::event::{Attendee, Event};
use crate::ics::parse_calendar_object;
use crate::identity::IdentityResolver;
use crate::remote::{RemoteCalendarClient, RemoteEntry};
use crate::store::LocalStore;
use crate::sync::{DiagnosticKind, DiffKind, EntryDiff, SyncReport};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The remote change token matched; nothing was read or written
    UpToDate,
    Applied(SyncReport),
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemoteCalendarClient>,
    store: Arc<dyn LocalStore>,
    resolver: Arc<dyn IdentityResolver>,
    classifier: EventClassifier,
    // Held for a whole cycle so two cycles never interleave on one store
    cycle: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteCalendarClient>,
        store: Arc<dyn LocalStore>,
        resolver: Arc<dyn IdentityResolver>,
        classifier: EventClassifier,
    ) -> Self {
        SyncCoordinator {
            remote,
            store,
            resolver,
            classifier,
            cycle: Mutex::new(()),
        }
    }

    pub async fn sync_now(&self) -> AgendaResult<SyncOutcome> {
        self.sync(Utc::now()).await
    }

    /// Run one cycle. Entries starting at or before `now` are not stored.
    ///
    /// Transport errors and a failure to persist the change token abort
    /// the cycle; everything scoped to a single entry is reported in the
    /// [`SyncReport`] instead.
    pub async fn sync(&self, now: DateTime<Utc>) -> AgendaResult<SyncOutcome> {
        let _cycle = self.cycle.lock().await;

        let remote_ctag = self.remote.change_token().await?;
        let local_ctag = self.store.change_token()?;
        debug!(remote = %remote_ctag, local = ?local_ctag, "Comparing change tokens");

        if local_ctag.as_deref() == Some(remote_ctag.as_str()) {
            debug!("Agenda is up to date");
            return Ok(SyncOutcome::UpToDate);
        }

        info!("Agenda update needed");

        let remote_tokens = self.remote.entry_tokens().await?;
        let local_tokens = self.store.list_event_ids_and_tokens()?;
        let diff = EntryDiff::compute(&local_tokens, &remote_tokens);

        let mut report = SyncReport {
            unchanged: diff.unchanged,
            ..Default::default()
        };

        if !diff.to_fetch.is_empty() {
            let bodies = self.remote.fetch_bodies(&diff.fetch_ids()).await?;

            for (id, kind) in &diff.to_fetch {
                match bodies.get(id) {
                    Some(entry) => {
                        let fallback_token = remote_tokens.get(id).map(String::as_str);
                        self.apply_entry(id, *kind, entry, fallback_token, now, &mut report)
                            .await;
                    }
                    None => {
                        warn!("Server returned no body for {}", id);
                        report.diagnose(id, DiagnosticKind::MissingBody, "not in batch response");
                    }
                }
            }
        }

        for id in &diff.to_remove {
            info!("Removing event {} deleted on the server", id);
            match self.store.remove_event(id) {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    warn!("Failed to remove {}: {}", id, e);
                    report.diagnose(id, DiagnosticKind::Storage, e.to_string());
                }
            }
        }

        // Storage failures leave local state behind the remote; keeping the
        // old token makes the next cycle diff again and retry them.
        if report.has_storage_failures() {
            warn!(
                failures = report.count(DiagnosticKind::Storage),
                "Keeping previous change token after storage failures"
            );
        } else {
            self.store.set_change_token(&remote_ctag)?;
            report.token_persisted = true;
        }

        info!(%report, "Sync cycle complete");
        Ok(SyncOutcome::Applied(report))
    }

    /// Parse, classify and store one fetched entry. Never fails the cycle.
    async fn apply_entry(
        &self,
        id: &str,
        kind: DiffKind,
        entry: &RemoteEntry,
        fallback_token: Option<&str>,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) {
        let object = match parse_calendar_object(&entry.body) {
            Ok(object) => object,
            Err(e) => {
                warn!("Skipping {}: {}", id, e);
                report.diagnose(id, DiagnosticKind::Parse, e.to_string());
                return;
            }
        };

        if object.start <= now {
            debug!("Event {} is in the past, skipping", id);
            report.skipped_past += 1;
            if kind == DiffKind::Update {
                // The stored copy is stale and expired; drop it
                if let Err(e) = self.store.remove_event(id) {
                    report.diagnose(id, DiagnosticKind::Storage, e.to_string());
                }
            }
            return;
        }

        let classification = self.classifier.classify(&object.categories);

        let attendees = match self.resolve_attendees(&object.attendees).await {
            Ok(attendees) => attendees,
            Err(e) => {
                warn!("Could not look up attendees of {}: {}", id, e);
                report.diagnose(id, DiagnosticKind::Storage, e.to_string());
                return;
            }
        };

        let token = match (entry.token.as_str(), fallback_token) {
            ("", Some(listed)) => listed.to_string(),
            (token, _) => token.to_string(),
        };

        let event = Event {
            id: id.to_string(),
            token,
            start: object.start,
            volunteers_required: classification.volunteers_required,
            raw_body: entry.body.clone(),
        };

        match self
            .store
            .upsert_event(&event, &classification.categories, &attendees)
        {
            Ok(()) => {
                info!("{} event {} ({})", kind, id, object.summary);
                match kind {
                    DiffKind::Update => report.updated += 1,
                    _ => report.created += 1,
                }
            }
            Err(e) => {
                warn!("Failed to store {}: {}", id, e);
                report.diagnose(id, DiagnosticKind::Storage, e.to_string());
            }
        }
    }

    /// Attendee rows for an event. Emails are lowercased and deduplicated;
    /// only attendees without a known identity go to the resolver.
    async fn resolve_attendees(&self, emails: &[String]) -> AgendaResult<Vec<Attendee>> {
        let emails: BTreeSet<String> = emails.iter().map(|e| e.to_lowercase()).collect();

        let mut attendees = Vec::with_capacity(emails.len());
        for email in emails {
            let known = self.store.attendee(&email)?.and_then(|a| a.resolved_id);
            let resolved_id = match known {
                Some(id) => Some(id),
                None => {
                    let resolved = self.resolver.resolve(&email).await;
                    if resolved.is_none() {
                        debug!("No identity for attendee {}", email);
                    }
                    resolved
                }
            };
            attendees.push(Attendee::new(&email, resolved_id));
        }
        Ok(attendees)
    }

    /// Remove categories and attendees no event refers to any more.
    pub async fn clean(&self) -> AgendaResult<(usize, usize)> {
        let _cycle = self.cycle.lock().await;
        let categories = self.store.clean_orphan_categories()?;
        let attendees = self.store.clean_orphan_attendees()?;
        Ok((categories, attendees))
    }

    /// Drop the whole replica; the next sync starts from scratch.
    pub async fn reset(&self) -> AgendaResult<()> {
        let _cycle = self.cycle.lock().await;
        self.store.truncate_all()
    }
}
