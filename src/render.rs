//! Terminal rendering for agenda-core types.

use agenda_core::RenderableEvent;
use agenda_core::ics::parse_calendar_object;
use agenda_core::sync::{Diagnostic, DiagnosticKind, SyncReport};
use chrono::Local;
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for SyncReport {
    fn render(&self) -> String {
        let mut line = format!(
            "{} created, {} updated, {} removed, {} unchanged",
            self.created.green(),
            self.updated.yellow(),
            self.removed.red(),
            self.unchanged
        );
        if self.skipped_past > 0 {
            line.push_str(&format!(", {} already past", self.skipped_past).dimmed().to_string());
        }
        line
    }
}

impl Render for Diagnostic {
    fn render(&self) -> String {
        let kind = match self.kind {
            DiagnosticKind::Storage => self.kind.to_string().red().to_string(),
            _ => self.kind.to_string().yellow().to_string(),
        };
        format!("   ! {} [{}] {}", self.id, kind, self.message.dimmed())
    }
}

impl Render for RenderableEvent {
    fn render(&self) -> String {
        let summary = parse_calendar_object(&self.event.raw_body)
            .map(|object| object.summary)
            .unwrap_or_else(|_| self.event.id.clone());
        let time = self
            .event
            .start
            .with_timezone(&Local)
            .format("%a %b %-d %H:%M")
            .to_string();

        let mut line = format!("  {} {}", time, summary);

        if !self.categories.is_empty() {
            line.push_str(&format!(" [{}]", self.categories.join(", ")).dimmed().to_string());
        }
        if let Some(count) = self.event.volunteers_required {
            let registered = self.attendees.len() + self.unknown_attendees;
            line.push_str(&format!(" {}/{} volunteers", registered, count).cyan().to_string());
        }
        if self.is_registered {
            line.push_str(&" (registered)".green().to_string());
        }
        line
    }
}
