use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rollcall_core::store::{AttendanceStore, IdentityStore, StoreError};
use rollcall_core::{
    AttendanceEntry, AttendanceRecord, ContactInfo, Embedding, Identity, Location, NewIdentity,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

const IDENTITY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    email        TEXT,
    phone        TEXT,
    embedding    TEXT,
    created_at   TEXT NOT NULL
);";

const ATTENDANCE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id    TEXT NOT NULL,
    timestamp      TEXT NOT NULL,
    liveness_score REAL NOT NULL,
    confidence     REAL NOT NULL,
    captured_image BLOB,
    lat            REAL,
    lng            REAL
);
CREATE INDEX IF NOT EXISTS idx_attendance_identity ON attendance (identity_id, timestamp);";

/// Attendance table as provisioned by deployments that predate frame capture.
#[cfg(test)]
const LEGACY_ATTENDANCE_SCHEMA: &str = "
CREATE TABLE attendance (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id    TEXT NOT NULL,
    timestamp      TEXT NOT NULL,
    liveness_score REAL NOT NULL,
    confidence     REAL NOT NULL,
    lat            REAL,
    lng            REAL
);";

/// SQLite-backed identity roster and attendance log.
pub struct SqliteStore {
    conn: Connection,
    /// Whether the attendance table carries the `captured_image` column.
    has_image_column: bool,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                let message = format!("creating {}: {e}", parent.display());
                return Err(StoreError::Backend(message));
            }
        }
        let conn = Connection::open(path).map_err(to_store_error)?;
        let store = Self::from_connection(conn)?;
        tracing::info!(
            path = %path.display(),
            image_column = store.has_image_column,
            "database opened"
        );
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(to_store_error)?)
    }

    /// Ensure the schema exists. Tables already present are left as they are.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(IDENTITY_SCHEMA).map_err(to_store_error)?;
        conn.execute_batch(ATTENDANCE_SCHEMA)
            .map_err(to_store_error)?;
        let has_image_column = column_exists(&conn, "attendance", "captured_image")?;
        if !has_image_column {
            tracing::warn!(
                "attendance table has no captured_image column; frames will not be stored"
            );
        }
        Ok(Self {
            conn,
            has_image_column,
        })
    }

    /// Attendance rows, newest first, optionally for one identity and capped at `limit`.
    fn select_entries(
        &self,
        identity_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<AttendanceEntry>, StoreError> {
        let has_image = if self.has_image_column {
            "a.captured_image IS NOT NULL"
        } else {
            "0"
        };
        let filter = if identity_id.is_some() {
            "WHERE a.identity_id = ?1"
        } else {
            ""
        };
        let limit = match limit {
            Some(n) => format!("LIMIT {}", i64::try_from(n).unwrap_or(i64::MAX)),
            None => String::new(),
        };
        let sql = format!(
            "SELECT a.id, a.identity_id, i.display_name, a.timestamp, a.liveness_score, \
             a.confidence, {has_image}, a.lat, a.lng \
             FROM attendance a LEFT JOIN identities i ON i.id = a.identity_id \
             {filter} ORDER BY a.timestamp DESC, a.id DESC {limit}"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(to_store_error)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(identity_id), |row| {
                Ok(EntryRow {
                    id: row.get(0)?,
                    identity_id: row.get(1)?,
                    display_name: row.get(2)?,
                    timestamp: row.get(3)?,
                    liveness_score: row.get(4)?,
                    confidence: row.get(5)?,
                    has_image: row.get(6)?,
                    lat: row.get(7)?,
                    lng: row.get(8)?,
                })
            })
            .map_err(to_store_error)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(to_store_error)?.into_entry()?);
        }
        Ok(entries)
    }
}

impl IdentityStore for SqliteStore {
    fn insert(&mut self, identity: NewIdentity) -> Result<Identity, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().trunc_subsecs(6);
        let embedding = serde_json::to_string(&identity.embedding)
            .map_err(|e| StoreError::Backend(format!("encoding embedding: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO identities (id, display_name, email, phone, embedding, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    identity.display_name,
                    identity.contact.email,
                    identity.contact.phone,
                    embedding,
                    format_timestamp(&created_at),
                ],
            )
            .map_err(to_store_error)?;

        Ok(Identity {
            id,
            display_name: identity.display_name,
            contact: identity.contact,
            embedding: Some(identity.embedding),
            created_at,
        })
    }

    fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, display_name, email, phone, embedding, created_at \
                 FROM identities ORDER BY created_at, rowid",
            )
            .map_err(to_store_error)?;
        let rows = stmt
            .query_map([], IdentityRow::read)
            .map_err(to_store_error)?;

        let mut identities = Vec::new();
        for row in rows {
            identities.push(row.map_err(to_store_error)?.into_identity()?);
        }
        Ok(identities)
    }

    fn get(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, display_name, email, phone, embedding, created_at \
                 FROM identities WHERE id = ?1",
                [id],
                IdentityRow::read,
            )
            .optional()
            .map_err(to_store_error)?
            .map(IdentityRow::into_identity)
            .transpose()
    }
}

impl AttendanceStore for SqliteStore {
    fn insert(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let timestamp = format_timestamp(&record.timestamp);
        let lat = record.location.map(|l| l.lat);
        let lng = record.location.map(|l| l.lng);

        let result = match &record.captured_image {
            Some(jpeg) => self.conn.execute(
                "INSERT INTO attendance \
                 (identity_id, timestamp, liveness_score, confidence, captured_image, lat, lng) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.identity_id,
                    timestamp,
                    record.liveness_score as f64,
                    record.confidence as f64,
                    jpeg,
                    lat,
                    lng,
                ],
            ),
            None => self.conn.execute(
                "INSERT INTO attendance \
                 (identity_id, timestamp, liveness_score, confidence, lat, lng) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.identity_id,
                    timestamp,
                    record.liveness_score as f64,
                    record.confidence as f64,
                    lat,
                    lng,
                ],
            ),
        };
        result.map(|_| ()).map_err(to_store_error)
    }

    fn history(&self, limit: usize) -> Result<Vec<AttendanceEntry>, StoreError> {
        self.select_entries(None, Some(limit))
    }

    fn for_identity(&self, identity_id: &str) -> Result<Vec<AttendanceEntry>, StoreError> {
        self.select_entries(Some(identity_id), None)
    }
}

struct IdentityRow {
    id: String,
    display_name: String,
    email: Option<String>,
    phone: Option<String>,
    embedding: Option<String>,
    created_at: String,
}

impl IdentityRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            embedding: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Unreadable vectors load as `None` so the identity is skipped for matching.
    fn decode_embedding(&self) -> Option<Embedding> {
        let text = self.embedding.as_deref()?;
        match serde_json::from_str(text) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!(
                    identity = %self.id,
                    error = %e,
                    "stored embedding unreadable; identity skipped for matching"
                );
                None
            }
        }
    }

    fn into_identity(self) -> Result<Identity, StoreError> {
        let embedding = self.decode_embedding();
        Ok(Identity {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            display_name: self.display_name,
            contact: ContactInfo {
                email: self.email,
                phone: self.phone,
            },
            embedding,
        })
    }
}

struct EntryRow {
    id: i64,
    identity_id: String,
    display_name: Option<String>,
    timestamp: String,
    liveness_score: f64,
    confidence: f64,
    has_image: bool,
    lat: Option<f64>,
    lng: Option<f64>,
}

impl EntryRow {
    fn into_entry(self) -> Result<AttendanceEntry, StoreError> {
        let location = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Location { lat, lng }),
            _ => None,
        };
        Ok(AttendanceEntry {
            id: self.id,
            identity_id: self.identity_id,
            display_name: self.display_name,
            timestamp: parse_timestamp(&self.timestamp)?,
            liveness_score: self.liveness_score as f32,
            confidence: self.confidence as f32,
            has_image: self.has_image,
            location,
        })
    }
}

/// Fixed-width UTC form, so lexical order in SQL is chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(e) => Err(StoreError::Backend(format!("bad timestamp {raw:?}: {e}"))),
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(to_store_error)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(to_store_error)?;
    for name in names {
        if name.map_err(to_store_error)? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// SQLite reports writes to unprovisioned columns as "table X has no column named Y".
fn to_store_error(e: rusqlite::Error) -> StoreError {
    let message = e.to_string();
    match message.split_once("has no column named ") {
        Some((_, column)) => StoreError::UnknownField(column.trim().to_string()),
        None => StoreError::Backend(message),
    }
}
