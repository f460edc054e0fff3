//! Filesystem-backed replica.
//!
//! Layout under the store root:
//!
//! ```text
//! events/<id>.ics        raw body
//! events/<id>.meta.json  start, volunteers count, categories, attendee emails
//! events/<id>.etag       entry token, written last
//! attendees.json         email -> resolved id
//! categories.json        known category names
//! ctag                   last persisted change token
//! ```
//!
//! An event counts as stored only when its `.etag` file exists. Upserts
//! stage every file as `<name>.tmp` first; if staging fails the staged
//! files are removed and the previous copy is untouched. Only then is the
//! old token dropped and the staged files renamed into place, token last,
//! so a crash between renames shows up as a missing entry that the next
//! sync fetches again.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{AgendaError, AgendaResult};
use crate::event::{Attendee, Event, EventQuery};
use crate::store::LocalStore;

const EVENTS_DIR: &str = "events";
const BODY_EXT: &str = "ics";
const META_EXT: &str = "meta.json";
const TOKEN_EXT: &str = "etag";
const ATTENDEES_FILE: &str = "attendees.json";
const CATEGORIES_FILE: &str = "categories.json";
const CHANGE_TOKEN_FILE: &str = "ctag";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventMeta {
    start: DateTime<Utc>,
    volunteers_required: Option<u32>,
    categories: Vec<String>,
    attendees: Vec<String>,
}

pub struct FsStore {
    root: PathBuf,
    // Serializes writers; the registry files are read-modify-write.
    write_lock: Mutex<()>,
}

impl FsStore {
    pub fn open<P: AsRef<Path>>(root: P) -> AgendaResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(EVENTS_DIR))?;
        info!("Opened agenda directory at {:?}", root);

        Ok(FsStore {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> AgendaResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AgendaError::Storage("Store lock poisoned".into()))
    }

    fn events_dir(&self) -> PathBuf {
        self.root.join(EVENTS_DIR)
    }

    /// Path of one of an event's files. Ids must be a single plain path segment.
    fn event_path(&self, id: &str, ext: &str) -> AgendaResult<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !valid {
            return Err(AgendaError::Storage(format!("Invalid entry id '{id}'")));
        }
        Ok(self.events_dir().join(format!("{id}.{ext}")))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Write to a temp file, then rename over the target.
    fn write_atomic(path: &Path, content: &[u8]) -> AgendaResult<()> {
        let temp = Self::temp_path(path);
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }

    /// Write every file's temp copy. On failure the copies already
    /// written are removed and nothing else has changed.
    fn stage(files: &[(&Path, Vec<u8>)]) -> AgendaResult<()> {
        for (written, (path, content)) in files.iter().enumerate() {
            if let Err(e) = std::fs::write(Self::temp_path(path), content) {
                for (staged, _) in &files[..written] {
                    let _ = std::fs::remove_file(Self::temp_path(staged));
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn remove_if_exists(path: &Path) -> AgendaResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_optional(path: &Path) -> AgendaResult<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_json<T: DeserializeOwned + Default>(path: &Path) -> AgendaResult<T> {
        match Self::read_optional(path)? {
            Some(content) => Ok(serde_json::from_str(&content)?),
            None => Ok(T::default()),
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> AgendaResult<()> {
        let content = serde_json::to_vec_pretty(value)?;
        Self::write_atomic(path, &content)
    }

    fn attendee_registry(&self) -> AgendaResult<BTreeMap<String, Option<String>>> {
        Self::read_json(&self.root.join(ATTENDEES_FILE))
    }


    fn save_attendee_registry(&self, registry: &BTreeMap<String, Option<String>>) -> AgendaResult<()> {
        Self::write_json(&self.root.join(ATTENDEES_FILE), registry)
    }

    fn category_registry(&self) -> AgendaResult<BTreeSet<String>> {
        Self::read_json(&self.root.join(CATEGORIES_FILE))
    }

    fn save_category_registry(&self, registry: &BTreeSet<String>) -> AgendaResult<()> {
        Self::write_json(&self.root.join(CATEGORIES_FILE), registry)
    }

    fn token(&self, id: &str) -> AgendaResult<Option<String>> {
        Self::read_optional(&self.event_path(id, TOKEN_EXT)?)
    }

    fn meta(&self, id: &str) -> AgendaResult<Option<EventMeta>> {
        match Self::read_optional(&self.event_path(id, META_EXT)?)? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Ids of every complete event (those with a token file).
    fn stored_ids(&self) -> AgendaResult<Vec<String>> {
        let suffix = format!(".{TOKEN_EXT}");
        let mut ids: Vec<String> = std::fs::read_dir(self.events_dir())?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .filter_map(|name| name.strip_suffix(&suffix).map(String::from))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Load an event with its metadata, if it is completely stored.
    fn load(&self, id: &str) -> AgendaResult<Option<(Event, EventMeta)>> {
        let Some(token) = self.token(id)? else {
            return Ok(None);
        };
        let body = Self::read_optional(&self.event_path(id, BODY_EXT)?)?;
        let meta = self.meta(id)?;

        let (Some(raw_body), Some(meta)) = (body, meta) else {
            warn!("Event {} has a token but is missing its body or metadata", id);
            return Ok(None);
        };

        let event = Event {
            id: id.to_string(),
            token,
            start: meta.start,
            volunteers_required: meta.volunteers_required,
            raw_body,
        };
        Ok(Some((event, meta)))
    }

    fn all_metas(&self) -> AgendaResult<Vec<EventMeta>> {
        let mut metas = Vec::new();
        for id in self.stored_ids()? {
            if let Some(meta) = self.meta(&id)? {
                metas.push(meta);
            }
        }
        Ok(metas)
    }

    fn attendees_for(
        meta: &EventMeta,
        registry: &BTreeMap<String, Option<String>>,
    ) -> Vec<Attendee> {
        let mut attendees: Vec<Attendee> = meta
            .attendees
            .iter()
            .map(|email| Attendee::new(email, registry.get(email).cloned().flatten()))
            .collect();
        attendees.sort_by(|a, b| a.email.cmp(&b.email));
        attendees
    }
}

impl LocalStore for FsStore {
    fn upsert_event(
        &self,
        event: &Event,
        categories: &BTreeSet<String>,
        attendees: &[Attendee],
    ) -> AgendaResult<()> {
        let _guard = self.lock()?;

        let token_path = self.event_path(&event.id, TOKEN_EXT)?;
        let body_path = self.event_path(&event.id, BODY_EXT)?;
        let meta_path = self.event_path(&event.id, META_EXT)?;

        let mut category_registry = self.category_registry()?;
        category_registry.extend(categories.iter().cloned());

        let mut attendee_registry = self.attendee_registry()?;
        for attendee in attendees {
            let entry = attendee_registry.entry(attendee.email.clone()).or_insert(None);
            if attendee.resolved_id.is_some() {
                *entry = attendee.resolved_id.clone();
            }
        }

        let mut emails: Vec<String> = attendees.iter().map(|a| a.email.clone()).collect();
        emails.sort();
        emails.dedup();
        let meta = EventMeta {
            start: event.start,
            volunteers_required: event.volunteers_required,
            categories: categories.iter().cloned().collect(),
            attendees: emails,
        };

        let categories_path = self.root.join(CATEGORIES_FILE);
        let attendees_path = self.root.join(ATTENDEES_FILE);

        // Rename order below follows this order; the token must stay last
        let files = [
            (body_path.as_path(), event.raw_body.as_bytes().to_vec()),
            (meta_path.as_path(), serde_json::to_vec_pretty(&meta)?),
            (categories_path.as_path(), serde_json::to_vec_pretty(&category_registry)?),
            (attendees_path.as_path(), serde_json::to_vec_pretty(&attendee_registry)?),
            (token_path.as_path(), event.token.as_bytes().to_vec()),
        ];
        Self::stage(&files)?;

        Self::remove_if_exists(&token_path)?;
        for (path, _) in &files {
            std::fs::rename(Self::temp_path(path), path)?;
        }

        debug!("Stored event {}", event.id);
        Ok(())
    }

    fn remove_event(&self, id: &str) -> AgendaResult<bool> {
        let _guard = self.lock()?;

        let token_path = self.event_path(id, TOKEN_EXT)?;
        let existed = token_path.exists();

        // Token first: once it is gone the event no longer counts as stored
        Self::remove_if_exists(&token_path)?;
        Self::remove_if_exists(&self.event_path(id, META_EXT)?)?;
        Self::remove_if_exists(&self.event_path(id, BODY_EXT)?)?;

        Ok(existed)
    }

    fn list_event_ids_and_tokens(&self) -> AgendaResult<HashMap<String, String>> {
        let mut tokens = HashMap::new();
        for id in self.stored_ids()? {
            if let Some(token) = self.token(&id)? {
                tokens.insert(id, token);
            }
        }
        Ok(tokens)
    }

    fn get_event(&self, id: &str) -> AgendaResult<Option<Event>> {
        Ok(self.load(id)?.map(|(event, _)| event))
    }

    fn query_events(&self, query: &EventQuery) -> AgendaResult<Vec<Event>> {
        let registry = self.attendee_registry()?;

        let mut events = Vec::new();
        for id in self.stored_ids()? {
            let Some((event, meta)) = self.load(&id)? else {
                continue;
            };
            let attendees = Self::attendees_for(&meta, &registry);
            if query.matches(&event, &meta.categories, &attendees) {
                events.push(event);
            }
        }

        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    fn event_categories(&self, id: &str) -> AgendaResult<Vec<String>> {
        Ok(self
            .load(id)?
            .map(|(_, meta)| meta.categories)
            .unwrap_or_default())
    }

    fn event_attendees(&self, id: &str) -> AgendaResult<Vec<Attendee>> {
        let Some((_, meta)) = self.load(id)? else {
            return Ok(Vec::new());
        };
        Ok(Self::attendees_for(&meta, &self.attendee_registry()?))
    }

    fn attendee(&self, email: &str) -> AgendaResult<Option<Attendee>> {
        Ok(self
            .attendee_registry()?
            .remove(email)
            .map(|resolved_id| Attendee::new(email, resolved_id)))
    }

    fn category_names(&self) -> AgendaResult<Vec<String>> {
        Ok(self.category_registry()?.into_iter().collect())
    }

    fn clean_orphan_categories(&self) -> AgendaResult<usize> {
        let _guard = self.lock()?;

        let referenced: BTreeSet<String> = self
            .all_metas()?
            .into_iter()
            .flat_map(|meta| meta.categories)
            .collect();

        let mut registry = self.category_registry()?;
        let before = registry.len();
        registry.retain(|name| {
            let keep = referenced.contains(name);
            if !keep {
                info!("Category {} will be deleted", name);
            }
            keep
        });
        let removed = before - registry.len();

        self.save_category_registry(&registry)?;
        info!(removed, "Cleaned orphan categories");
        Ok(removed)
    }

    fn clean_orphan_attendees(&self) -> AgendaResult<usize> {
        let _guard = self.lock()?;

        let referenced: BTreeSet<String> = self
            .all_metas()?
            .into_iter()
            .flat_map(|meta| meta.attendees)
            .collect();

        let mut registry = self.attendee_registry()?;
        let before = registry.len();
        registry.retain(|email, _| referenced.contains(email));
        let removed = before - registry.len();

        self.save_attendee_registry(&registry)?;
        info!(removed, "Cleaned orphan attendees");
        Ok(removed)
    }

    fn truncate_all(&self) -> AgendaResult<()> {
        let _guard = self.lock()?;

        std::fs::remove_dir_all(self.events_dir())?;
        std::fs::create_dir_all(self.events_dir())?;
        for file in [ATTENDEES_FILE, CATEGORIES_FILE, CHANGE_TOKEN_FILE] {
            Self::remove_if_exists(&self.root.join(file))?;
        }

        info!("Truncated agenda directory {:?}", self.root);
        Ok(())
    }

    fn change_token(&self) -> AgendaResult<Option<String>> {
        Self::read_optional(&self.root.join(CHANGE_TOKEN_FILE))
    }

    fn set_change_token(&self, token: &str) -> AgendaResult<()> {
        let _guard = self.lock()?;
        Self::write_atomic(&self.root.join(CHANGE_TOKEN_FILE), token.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::{TempDir, tempdir};

    fn store() -> (TempDir, FsStore) {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_layout_on_disk() {
        let (dir, store) = store();
        store
            .upsert_event(&contract::event("e1", "t1", 1, None), &contract::cats(&["A"]), &[])
            .unwrap();

        let events = dir.path().join("events");
        assert!(events.join("e1.ics").exists());
        assert!(events.join("e1.etag").exists());
        assert!(events.join("e1.meta.json").exists());
        assert_eq!(std::fs::read_to_string(events.join("e1.etag")).unwrap(), "t1");
    }

    #[test]
    fn test_event_without_token_is_not_stored() {
        let (dir, store) = store();
        store
            .upsert_event(&contract::event("e1", "t1", 1, None), &contract::cats(&[]), &[])
            .unwrap();

        // Simulate a write interrupted before the token landed
        std::fs::remove_file(dir.path().join("events").join("e1.etag")).unwrap();

        assert_eq!(store.get_event("e1").unwrap(), None);
        assert!(store.list_event_ids_and_tokens().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (_dir, store) = store();
        for id in ["../escape", "a/b", ".hidden", ""] {
            let event = contract::event(id, "t", 1, None);
            let err = store.upsert_event(&event, &contract::cats(&[]), &[]).unwrap_err();
            assert!(matches!(err, AgendaError::Storage(_)), "id {id:?}");
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let (_dir, store) = store();
        contract::upsert_and_get(&store);
    }

    #[test]
    fn test_upsert_replaces_associations() {
        let (_dir, store) = store();
        contract::upsert_replaces_associations(&store);
    }

    #[test]
    fn test_remove_cascades_associations() {
        let (_dir, store) = store();
        contract::remove_cascades_associations(&store);
    }

    #[test]
    fn test_orphan_cleanup() {
        let (_dir, store) = store();
        contract::orphan_cleanup(&store);
    }

    #[test]
    fn test_query_filters() {
        let (_dir, store) = store();
        contract::query_filters(&store);
    }

    #[test]
    fn test_change_token_and_truncate() {
        let (_dir, store) = store();
        contract::change_token_and_truncate(&store);
    }

    #[test]
    fn test_failed_update_keeps_previous() {
        let (dir, store) = store();
        let events = dir.path().join("events");
        // A directory where the body's temp file should go makes staging fail
        contract::failed_update_keeps_previous(&store, || {
            std::fs::create_dir(events.join("e1.ics.tmp")).unwrap();
        });

        assert!(!events.join("e1.meta.json.tmp").exists());
        assert!(!dir.path().join("categories.json.tmp").exists());
    }

    #[test]
    fn test_failed_staging_removes_written_temp_files() {
        let (dir, store) = store();
        let events = dir.path().join("events");
        std::fs::create_dir(dir.path().join("attendees.json.tmp")).unwrap();

        let result = store.upsert_event(
            &contract::event("e1", "t1", 1, None),
            &contract::cats(&["A"]),
            &[],
        );

        assert!(result.is_err());
        assert_eq!(store.get_event("e1").unwrap(), None);
        assert!(!events.join("e1.ics.tmp").exists());
        assert!(!events.join("e1.meta.json.tmp").exists());
        assert!(!dir.path().join("categories.json.tmp").exists());
        assert!(store.category_names().unwrap().is_empty());
    }

    #[test]
    fn test_tokens_are_stored_verbatim() {
        let (_dir, store) = store();
        contract::tokens_are_stored_verbatim(&store);
    }
}
