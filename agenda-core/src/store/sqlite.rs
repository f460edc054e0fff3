//! SQLite-backed replica.
//!
//! Association rows cascade with their event through foreign keys, so
//! `PRAGMA foreign_keys` must be on for every connection.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::DateTime;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{AgendaError, AgendaResult};
use crate::event::{Attendee, Event, EventQuery};
use crate::store::LocalStore;
use crate::store::schema::{SCHEMA_VERSION, create_all};

const CHANGE_TOKEN_KEY: &str = "ctag";

const EVENT_COLUMNS: &str = "id, token, start_time, volunteers_required, raw_body";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn open<P: AsRef<Path>>(db_path: P) -> AgendaResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init(&conn)?;
        info!("Opened agenda database at {:?}", db_path);

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, mostly for tests.
    pub fn in_memory() -> AgendaResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> AgendaResult<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        match version {
            0 => {
                info!("Creating agenda schema version {}", SCHEMA_VERSION);
                create_all(conn)
            }
            v if v == SCHEMA_VERSION => Ok(()),
            v => Err(AgendaError::Storage(format!(
                "Database version {} is not supported (expected {})",
                v, SCHEMA_VERSION
            ))),
        }
    }

    fn conn(&self) -> AgendaResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgendaError::Storage("Database connection lock poisoned".into()))
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let start_time: i64 = row.get("start_time")?;
        let start = DateTime::from_timestamp(start_time, 0).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(2, start_time)
        })?;

        Ok(Event {
            id: row.get("id")?,
            token: row.get("token")?,
            start,
            volunteers_required: row.get("volunteers_required")?,
            raw_body: row.get("raw_body")?,
        })
    }

    /// Build the SELECT for a query. Category and attendee conditions are
    /// subqueries combined with INTERSECT.
    fn query_sql(query: &EventQuery) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE start_time > ?1");
        let mut values = vec![Value::Integer(query.starts_after.timestamp())];

        if query.needs_volunteers {
            sql.push_str(" AND volunteers_required IS NOT NULL");
        }

        let mut intersect = Vec::new();
        if let Some(user_id) = &query.attendee_id {
            values.push(Value::Text(user_id.clone()));
            intersect.push(format!(
                "SELECT ea.event_id FROM events_attendees ea \
                 JOIN attendees a ON a.email = ea.email WHERE a.resolved_id = ?{}",
                values.len()
            ));
        }
        for category in &query.categories {
            values.push(Value::Text(category.clone()));
            intersect.push(format!(
                "SELECT ec.event_id FROM events_categories ec \
                 JOIN categories c ON c.id = ec.category_id WHERE c.name = ?{}",
                values.len()
            ));
        }
        if !intersect.is_empty() {
            sql.push_str(&format!(" AND id IN ({})", intersect.join(" INTERSECT ")));
        }

        sql.push_str(" ORDER BY start_time, id");
        (sql, values)
    }
}

impl LocalStore for SqliteStore {
    fn upsert_event(
        &self,
        event: &Event,
        categories: &BTreeSet<String>,
        attendees: &[Attendee],
    ) -> AgendaResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO events (id, token, start_time, volunteers_required, raw_body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                token = excluded.token,
                start_time = excluded.start_time,
                volunteers_required = excluded.volunteers_required,
                raw_body = excluded.raw_body",
            params![
                event.id,
                event.token,
                event.start.timestamp(),
                event.volunteers_required,
                event.raw_body
            ],
        )?;
        tx.execute("DELETE FROM events_categories WHERE event_id = ?1", [&event.id])?;
        tx.execute("DELETE FROM events_attendees WHERE event_id = ?1", [&event.id])?;

        for name in categories {
            tx.execute(
                "INSERT INTO categories (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                [name],
            )?;
            let category_id: i64 = tx.query_row(
                "SELECT id FROM categories WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO events_categories (category_id, event_id) VALUES (?1, ?2)",
                params![category_id, event.id],
            )?;
        }

        for attendee in attendees {
            tx.execute(
                "INSERT INTO attendees (email, resolved_id) VALUES (?1, ?2)
                 ON CONFLICT(email) DO UPDATE SET
                    resolved_id = COALESCE(excluded.resolved_id, attendees.resolved_id)",
                params![attendee.email, attendee.resolved_id],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO events_attendees (event_id, email) VALUES (?1, ?2)",
                params![event.id, attendee.email],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn remove_event(&self, id: &str) -> AgendaResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM events WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    fn list_event_ids_and_tokens(&self) -> AgendaResult<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, token FROM events")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn get_event(&self, id: &str) -> AgendaResult<Option<Event>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                [id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    fn query_events(&self, query: &EventQuery) -> AgendaResult<Vec<Event>> {
        let (sql, values) = Self::query_sql(query);
        debug!(%sql, "Querying events");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_event)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn event_categories(&self, id: &str) -> AgendaResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.name FROM categories c
             JOIN events_categories ec ON ec.category_id = c.id
             WHERE ec.event_id = ?1 ORDER BY c.name",
        )?;
        let rows = stmt.query_map([id], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn event_attendees(&self, id: &str) -> AgendaResult<Vec<Attendee>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.email, a.resolved_id FROM attendees a
             JOIN events_attendees ea ON ea.email = a.email
             WHERE ea.event_id = ?1 ORDER BY a.email",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok(Attendee {
                email: row.get(0)?,
                resolved_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn attendee(&self, email: &str) -> AgendaResult<Option<Attendee>> {
        let conn = self.conn()?;
        let attendee = conn
            .query_row(
                "SELECT email, resolved_id FROM attendees WHERE email = ?1",
                [email],
                |row| {
                    Ok(Attendee {
                        email: row.get(0)?,
                        resolved_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(attendee)
    }

    fn category_names(&self) -> AgendaResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM categories ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn clean_orphan_categories(&self) -> AgendaResult<usize> {
        let conn = self.conn()?;
        let orphan_filter = "FROM categories WHERE NOT EXISTS (
                SELECT 1 FROM events_categories ec WHERE ec.category_id = categories.id)";

        let mut stmt = conn.prepare(&format!("SELECT name {orphan_filter}"))?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        for name in &names {
            info!("Category {} will be deleted", name);
        }

        let removed = conn.execute(&format!("DELETE {orphan_filter}"), [])?;
        info!(removed, "Cleaned orphan categories");
        Ok(removed)
    }

    fn clean_orphan_attendees(&self) -> AgendaResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM attendees WHERE NOT EXISTS (
                SELECT 1 FROM events_attendees ea WHERE ea.email = attendees.email)",
            [],
        )?;
        info!(removed, "Cleaned orphan attendees");
        Ok(removed)
    }

    fn truncate_all(&self) -> AgendaResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["events", "categories", "attendees", "sync_state"] {
            debug!("Truncate table {}", table);
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        info!("Truncated all tables");
        Ok(())
    }

    fn change_token(&self) -> AgendaResult<Option<String>> {
        let conn = self.conn()?;
        let token = conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                [CHANGE_TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    fn set_change_token(&self, token: &str) -> AgendaResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [CHANGE_TOKEN_KEY, token],
        )?;
        Ok(())
    }
}
