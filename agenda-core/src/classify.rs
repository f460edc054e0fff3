//! Split a calendar object's CATEGORIES into plain tags and the
//! volunteers-required count.

use std::collections::BTreeSet;

pub const DEFAULT_VOLUNTEERS_PREFIX: &str = "vol:";

/// Result of classifying one event's tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub categories: BTreeSet<String>,
    pub volunteers_required: Option<u32>,
}

/// Recognizes tags of the form `<prefix><count>`, e.g. `vol:3`.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    prefix: String,
}

impl Default for EventClassifier {
    fn default() -> Self {
        EventClassifier::new(DEFAULT_VOLUNTEERS_PREFIX)
    }
}

impl EventClassifier {
    pub fn new(prefix: &str) -> Self {
        EventClassifier {
            prefix: prefix.to_string(),
        }
    }

    /// Returns the count if `tag` encodes a volunteers-required value.
    /// Counts too large for a `u32` saturate.
    pub fn volunteers_count(&self, tag: &str) -> Option<u32> {
        let digits = tag.trim().strip_prefix(&self.prefix)?.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(digits.parse().unwrap_or(u32::MAX))
    }

    /// Scan tags in order. The first volunteers tag sets the count, later
    /// ones are dropped; every other non-empty tag is a category.
    pub fn classify<S: AsRef<str>>(&self, tags: &[S]) -> Classification {
        let mut classification = Classification::default();

        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() {
                continue;
            }

            match self.volunteers_count(tag) {
                Some(count) => {
                    if classification.volunteers_required.is_none() {
                        classification.volunteers_required = Some(count);
                    }
                }
                None => {
                    classification.categories.insert(tag.to_string());
                }
            }
        }

        classification
    }
}
