//! Table definitions for the SQLite store.

use rusqlite::Connection;

use crate::error::AgendaResult;

/// Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub foreign_key: Option<ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!(
                    "{} {}",
                    column.name,
                    match column.sql_type {
                        SqlType::Text => "TEXT",
                        SqlType::Integer => "INTEGER",
                    }
                );
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if column.is_unique {
                    sql.push_str(" UNIQUE");
                }
                if let Some(fk) = &column.foreign_key {
                    sql.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE CASCADE",
                        fk.foreign_table, fk.foreign_column
                    ));
                }
                sql
            })
            .collect();

        let mut create_sql = format!("CREATE TABLE IF NOT EXISTS {} ({}", self.name, columns.join(", "));
        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        create_sql
    }

    pub fn create(&self, conn: &Connection) -> AgendaResult<()> {
        conn.execute(&self.create_sql(), [])?;
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS {} ON {} ({});", index_name, self.name, columns),
                [],
            )?;
        }
        Ok(())
    }
}

const EVENTS_TABLE: Table = Table {
    name: "events",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("token", SqlType::Text, non_null = true),
        // Unix seconds
        sqlite_column!("start_time", SqlType::Integer, non_null = true),
        sqlite_column!("volunteers_required", SqlType::Integer),
        sqlite_column!("raw_body", SqlType::Text, non_null = true),
    ],
    indices: &[("idx_events_start_time", "start_time")],
    unique_constraints: &[],
};

const CATEGORIES_TABLE: Table = Table {
    name: "categories",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", SqlType::Text, non_null = true, is_unique = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ATTENDEES_TABLE: Table = Table {
    name: "attendees",
    columns: &[
        sqlite_column!("email", SqlType::Text, is_primary_key = true),
        sqlite_column!("resolved_id", SqlType::Text),
    ],
    indices: &[("idx_attendees_resolved_id", "resolved_id")],
    unique_constraints: &[],
};

const EVENTS_CATEGORIES_TABLE: Table = Table {
    name: "events_categories",
    columns: &[
        sqlite_column!(
            "category_id",
            SqlType::Integer,
            non_null = true,
            foreign_key = Some(ForeignKey {
                foreign_table: "categories",
                foreign_column: "id",
            })
        ),
        sqlite_column!(
            "event_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(ForeignKey {
                foreign_table: "events",
                foreign_column: "id",
            })
        ),
    ],
    indices: &[("idx_events_categories_event", "event_id")],
    unique_constraints: &[&["category_id", "event_id"]],
};

const EVENTS_ATTENDEES_TABLE: Table = Table {
    name: "events_attendees",
    columns: &[
        sqlite_column!(
            "event_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(ForeignKey {
                foreign_table: "events",
                foreign_column: "id",
            })
        ),
        sqlite_column!(
            "email",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(ForeignKey {
                foreign_table: "attendees",
                foreign_column: "email",
            })
        ),
    ],
    indices: &[("idx_events_attendees_email", "email")],
    unique_constraints: &[&["event_id", "email"]],
};

const SYNC_STATE_TABLE: Table = Table {
    name: "sync_state",
    columns: &[
        sqlite_column!("key", SqlType::Text, is_primary_key = true),
        sqlite_column!("value", SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Creation order respects foreign keys.
pub const TABLES: &[Table] = &[
    EVENTS_TABLE,
    CATEGORIES_TABLE,
    ATTENDEES_TABLE,
    EVENTS_CATEGORIES_TABLE,
    EVENTS_ATTENDEES_TABLE,
    SYNC_STATE_TABLE,
];

pub fn create_all(conn: &Connection) -> AgendaResult<()> {
    for table in TABLES {
        table.create(conn)?;
    }
    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    Ok(())
}
