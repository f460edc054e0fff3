//! Token-based diff between the local replica and the remote listing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::Create => write!(f, "+"),
            DiffKind::Update => write!(f, "~"),
            DiffKind::Delete => write!(f, "-"),
        }
    }
}

/// What one sync cycle has to do. Ids are kept sorted so a cycle always
/// processes entries in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryDiff {
    /// Ids to fetch: absent locally (`Create`) or with a different token (`Update`)
    pub to_fetch: BTreeMap<String, DiffKind>,
    /// Ids stored locally but gone from the remote listing
    pub to_remove: BTreeSet<String>,
    /// Ids whose tokens match on both sides
    pub unchanged: usize,
}

impl EntryDiff {
    pub fn compute(local: &HashMap<String, String>, remote: &HashMap<String, String>) -> Self {
        let mut diff = EntryDiff::default();

        for (id, remote_token) in remote {
            match local.get(id) {
                None => {
                    diff.to_fetch.insert(id.clone(), DiffKind::Create);
                }
                Some(local_token) if local_token != remote_token => {
                    diff.to_fetch.insert(id.clone(), DiffKind::Update);
                }
                Some(_) => diff.unchanged += 1,
            }
        }

        diff.to_remove = local
            .keys()
            .filter(|id| !remote.contains_key(*id))
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_remove.is_empty()
    }

    pub fn fetch_ids(&self) -> Vec<String> {
        self.to_fetch.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, token)| (id.to_string(), token.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_scenario() {
        let local = tokens(&[("e1", "t1"), ("e3", "tX")]);
        let remote = tokens(&[("e1", "t1"), ("e2", "t2")]);

        let diff = EntryDiff::compute(&local, &remote);

        assert_eq!(
            diff.to_fetch,
            BTreeMap::from([("e2".to_string(), DiffKind::Create)])
        );
        assert_eq!(diff.to_remove, BTreeSet::from(["e3".to_string()]));
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_changed_token_needs_fetch() {
        let local = tokens(&[("e1", "t1")]);
        let remote = tokens(&[("e1", "t1-bis")]);

        let diff = EntryDiff::compute(&local, &remote);

        assert_eq!(diff.fetch_ids(), vec!["e1"]);
        assert_eq!(diff.to_fetch["e1"], DiffKind::Update);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_identical_sides_are_empty() {
        let both = tokens(&[("e1", "t1"), ("e2", "t2")]);
        let diff = EntryDiff::compute(&both, &both);
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, 2);
    }

    #[test]
    fn test_display_kind() {
        assert_eq!(DiffKind::Create.to_string(), "+");
        assert_eq!(DiffKind::Delete.to_string(), "-");
    }
}
