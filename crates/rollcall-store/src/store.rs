//! SQLite persistence for persons, attendance, and detection logs.
//!
//! All access goes through one shared `tokio_rusqlite::Connection`, so every
//! write to the attendance ledger is serialized through a single writer.

use crate::crypto::{CryptoError, EmbeddingCipher};
use chrono::{Local, NaiveDateTime, NaiveTime};
use rollcall_core::{Embedding, GalleryEntry};
use serde::Serialize;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("person already enrolled: {0}")]
    DuplicateId(String),
    #[error("person not found: {0}")]
    PersonNotFound(String),
    #[error("bad shift time {0:?} — expected HH:MM")]
    BadShiftTime(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Enrollment input for a new person.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub person_id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub shift_start: String,
    pub shift_end: String,
}

/// A person row without the embedding blob.
#[derive(Debug, Clone, Serialize)]
pub struct PersonRow {
    pub person_id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub shift_start: String,
    pub shift_end: String,
    pub registered_at: String,
}

/// Result of syncing a recognized person against today's attendance row.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    /// First sighting of the day.
    Login { time: String },
    /// Later sighting past the person's shift end; leaving time updated.
    LogoutUpdated { time: String },
    /// Later sighting during the shift; leaving time updated silently.
    ShiftOngoing { ends: String },
}

impl AttendanceOutcome {
    pub fn describe(&self, name: &str) -> String {
        match self {
            Self::Login { time } => format!("{name}: login at {time}"),
            Self::LogoutUpdated { time } => format!("{name}: logout updated to {time}"),
            Self::ShiftOngoing { ends } => format!("{name}: shift ongoing (ends {ends})"),
        }
    }
}

/// One row of today's attendance view.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRow {
    pub person_id: String,
    pub name: String,
    pub arrival_time: Option<String>,
    pub leaving_time: Option<String>,
    pub status: String,
}

/// One row of a date-ranged attendance report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub date: String,
    pub name: String,
    pub person_id: String,
    pub arrival_time: Option<String>,
    pub leaving_time: Option<String>,
    pub status: String,
}

/// One raw detection log row.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub person_id: String,
    pub name: String,
    pub date: String,
    pub time: String,
}

/// Punctuality statistics for one person.
#[derive(Debug, Clone, Serialize)]
pub struct PersonStats {
    pub person_id: String,
    pub name: String,
    pub shift: String,
    pub total_days: usize,
    pub late_arrivals: usize,
    pub early_departures: usize,
    pub avg_hours: f64,
}

/// Headline counters for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct Counts {
    pub total_persons: usize,
    pub present_today: usize,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS persons (
        person_id     TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        email         TEXT,
        department    TEXT,
        shift_start   TEXT NOT NULL DEFAULT '09:00',
        shift_end     TEXT NOT NULL DEFAULT '18:00',
        registered_at TEXT NOT NULL,
        model_version TEXT,
        embedding     BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS attendance (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        person_id    TEXT NOT NULL REFERENCES persons(person_id) ON DELETE CASCADE,
        date         TEXT NOT NULL,
        arrival_time TEXT,
        leaving_time TEXT,
        status       TEXT NOT NULL DEFAULT 'Present',
        UNIQUE (person_id, date)
    );

    CREATE TABLE IF NOT EXISTS face_logs (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        person_id TEXT REFERENCES persons(person_id) ON DELETE CASCADE,
        name      TEXT,
        date      TEXT NOT NULL,
        time      TEXT NOT NULL,
        logged_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS unknown_faces (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        observed_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        snapshot_path TEXT,
        embedding     BLOB
    );
";

/// Handle to the attendance database. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
    cipher: EmbeddingCipher,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &std::path::Path, cipher: EmbeddingCipher) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        let store = Self { conn, cipher };
        store.init().await?;
        tracing::info!(path = %path.display(), "attendance database ready");
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory(cipher: EmbeddingCipher) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn, cipher };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- Person management ---

    /// Enroll a person with their reference embedding. The embedding is
    /// encrypted before it touches the database.
    pub async fn add_person(
        &self,
        person: NewPerson,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        validate_shift_time(&person.shift_start)?;
        validate_shift_time(&person.shift_end)?;

        let blob = self.cipher.encrypt(&embedding.values)?;
        let model_version = embedding.model_version.clone();
        let registered_at = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string();
        let id_for_err = person.person_id.clone();

        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO persons
                         (person_id, name, email, department, shift_start, shift_end,
                          registered_at, model_version, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        person.person_id,
                        person.name,
                        person.email,
                        person.department,
                        person.shift_start,
                        person.shift_end,
                        registered_at,
                        model_version,
                        blob,
                    ],
                )?;
                Ok(())
            })
            .await;

        match result {
            Err(ref e) if is_constraint_violation(e) => Err(StoreError::DuplicateId(id_for_err)),
            other => Ok(other?),
        }
    }

    pub async fn get_person(&self, person_id: &str) -> Result<Option<PersonRow>, StoreError> {
        let id = person_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, name, email, department, shift_start, shift_end,
                            registered_at
                     FROM persons WHERE person_id = ?1",
                )?;
                let mut rows = stmt.query_map([id], person_row_from)?;
                Ok(rows.next().transpose()?)
            })
            .await?;
        Ok(row)
    }

    pub async fn list_persons(&self) -> Result<Vec<PersonRow>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, name, email, department, shift_start, shift_end,
                            registered_at
                     FROM persons ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], person_row_from)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Update a person's details (not their embedding).
    pub async fn update_person(
        &self,
        person_id: &str,
        name: &str,
        email: Option<String>,
        department: Option<String>,
        shift_start: &str,
        shift_end: &str,
    ) -> Result<(), StoreError> {
        validate_shift_time(shift_start)?;
        validate_shift_time(shift_end)?;

        let id = person_id.to_string();
        let id_for_err = id.clone();
        let (name, shift_start, shift_end) =
            (name.to_string(), shift_start.to_string(), shift_end.to_string());

        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE persons
                     SET name = ?2, email = ?3, department = ?4,
                         shift_start = ?5, shift_end = ?6
                     WHERE person_id = ?1",
                    rusqlite::params![id, name, email, department, shift_start, shift_end],
                )?;
                Ok(n)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::PersonNotFound(id_for_err));
        }
        Ok(())
    }

    /// Delete a person. Attendance rows and raw logs cascade away with them.
    pub async fn delete_person(&self, person_id: &str) -> Result<bool, StoreError> {
        let id = person_id.to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM persons WHERE person_id = ?1", [id])?)
            })
            .await?;
        Ok(n > 0)
    }

    /// Load and decrypt every enrolled embedding for matching.
    pub async fn load_gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let raw: Vec<(String, String, Option<String>, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, name, model_version, embedding FROM persons",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery = Vec::with_capacity(raw.len());
        for (person_id, name, model_version, blob) in raw {
            let values = self.cipher.decrypt(&blob)?;
            gallery.push(GalleryEntry {
                person_id,
                name,
                embedding: Embedding { values, model_version },
            });
        }
        Ok(gallery)
    }

    // --- Logging & attendance ---

    /// Append a raw detection log row. Rows are never updated or deleted.
    pub async fn log_detection(&self, person_id: &str, name: &str) -> Result<(), StoreError> {
        self.log_detection_at(person_id, name, Local::now().naive_local()).await
    }

    pub async fn log_detection_at(
        &self,
        person_id: &str,
        name: &str,
        now: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let (id, name) = (person_id.to_string(), name.to_string());
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_logs (person_id, name, date, time) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, name, date, time],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Sync a recognized person against today's attendance row.
    ///
    /// First sighting of a day inserts the row (arrival = leaving = now).
    /// Every later sighting moves `leaving_time` forward, so the row always
    /// holds first-seen and last-seen; the outcome says whether the person's
    /// shift end has passed.
    pub async fn sync_attendance(&self, person_id: &str) -> Result<AttendanceOutcome, StoreError> {
        self.sync_attendance_at(person_id, Local::now().naive_local()).await
    }

    pub async fn sync_attendance_at(
        &self,
        person_id: &str,
        now: NaiveDateTime,
    ) -> Result<AttendanceOutcome, StoreError> {
        use chrono::Timelike;

        let id = person_id.to_string();
        let id_for_err = id.clone();
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();

        let outcome = self
            .conn
            .call(move |conn| {
                let shift_end: Option<String> = conn
                    .query_row(
                        "SELECT shift_end FROM persons WHERE person_id = ?1",
                        [&id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                let Some(shift_end) = shift_end else {
                    return Ok(None);
                };

                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM attendance WHERE person_id = ?1 AND date = ?2",
                        rusqlite::params![id, date],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                let outcome = match existing {
                    None => {
                        conn.execute(
                            "INSERT INTO attendance
                                 (person_id, date, arrival_time, leaving_time, status)
                             VALUES (?1, ?2, ?3, ?3, 'Present')",
                            rusqlite::params![id, date, time],
                        )?;
                        AttendanceOutcome::Login { time }
                    }
                    Some(_) => {
                        conn.execute(
                            "UPDATE attendance SET leaving_time = ?3
                             WHERE person_id = ?1 AND date = ?2",
                            rusqlite::params![id, date, time],
                        )?;

                        let shift_end_hour = NaiveTime::parse_from_str(&shift_end, "%H:%M")
                            .map(|t| t.hour())
                            .unwrap_or(18);

                        if now.hour() >= shift_end_hour {
                            AttendanceOutcome::LogoutUpdated { time }
                        } else {
                            AttendanceOutcome::ShiftOngoing { ends: shift_end }
                        }
                    }
                };
                Ok(Some(outcome))
            })
            .await?;

        outcome.ok_or(StoreError::PersonNotFound(id_for_err))
    }

    /// Record an unknown face sighting: snapshot path plus its embedding
    /// (encrypted like enrolled ones).
    pub async fn log_unknown(
        &self,
        snapshot_path: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let blob = self.cipher.encrypt(&embedding.values)?;
        let path = snapshot_path.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO unknown_faces (snapshot_path, embedding) VALUES (?1, ?2)",
                    rusqlite::params![path, blob],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- Reports ---

    pub async fn today_attendance(&self) -> Result<Vec<AttendanceRow>, StoreError> {
        self.attendance_on(&Local::now().format("%Y-%m-%d").to_string()).await
    }

    pub async fn attendance_on(&self, date: &str) -> Result<Vec<AttendanceRow>, StoreError> {
        let date = date.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.person_id, p.name, a.arrival_time, a.leaving_time, a.status
                     FROM attendance a JOIN persons p ON a.person_id = p.person_id
                     WHERE a.date = ?1 ORDER BY a.arrival_time DESC",
                )?;
                let rows = stmt
                    .query_map([date], |row| {
                        Ok(AttendanceRow {
                            person_id: row.get(0)?,
                            name: row.get(1)?,
                            arrival_time: row.get(2)?,
                            leaving_time: row.get(3)?,
                            status: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Raw detection log, newest first.
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRow>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT person_id, name, date, time FROM face_logs
                     ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit as i64], |row| {
                        Ok(LogRow {
                            person_id: row.get(0)?,
                            name: row.get(1)?,
                            date: row.get(2)?,
                            time: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Attendance rows for a date range, optionally for one person.
    pub async fn attendance_report(
        &self,
        start_date: &str,
        end_date: &str,
        person_id: Option<String>,
    ) -> Result<Vec<ReportRow>, StoreError> {
        let (start, end) = (start_date.to_string(), end_date.to_string());
        let rows = self
            .conn
            .call(move |conn| {
                let base = "SELECT a.date, p.name, a.person_id, a.arrival_time,
                                   a.leaving_time, a.status
                            FROM attendance a JOIN persons p ON a.person_id = p.person_id
                            WHERE a.date BETWEEN ?1 AND ?2";
                let map = |row: &rusqlite::Row<'_>| {
                    Ok(ReportRow {
                        date: row.get(0)?,
                        name: row.get(1)?,
                        person_id: row.get(2)?,
                        arrival_time: row.get(3)?,
                        leaving_time: row.get(4)?,
                        status: row.get(5)?,
                    })
                };

                let rows = match person_id {
                    Some(pid) => {
                        let sql = format!(
                            "{base} AND a.person_id = ?3 ORDER BY a.date DESC, a.arrival_time DESC"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map(rusqlite::params![start, end, pid], map)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let sql = format!("{base} ORDER BY a.date DESC, a.arrival_time DESC");
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map(rusqlite::params![start, end], map)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Punctuality stats: late arrivals vs shift start, early departures vs
    /// shift end, average worked hours over days with both times recorded.
    pub async fn person_stats(&self, person_id: &str) -> Result<PersonStats, StoreError> {
        let person = self
            .get_person(person_id)
            .await?
            .ok_or_else(|| StoreError::PersonNotFound(person_id.to_string()))?;

        let id = person_id.to_string();
        let records: Vec<(Option<String>, Option<String>)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT arrival_time, leaving_time FROM attendance WHERE person_id = ?1",
                )?;
                let rows = stmt
                    .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let shift_start = NaiveTime::parse_from_str(&person.shift_start, "%H:%M")
            .map_err(|_| StoreError::BadShiftTime(person.shift_start.clone()))?;
        let shift_end = NaiveTime::parse_from_str(&person.shift_end, "%H:%M")
            .map_err(|_| StoreError::BadShiftTime(person.shift_end.clone()))?;

        let parse = |t: &str| NaiveTime::parse_from_str(t, "%H:%M:%S").ok();

        let mut late = 0usize;
        let mut early = 0usize;
        let mut worked_secs = 0i64;
        let mut full_days = 0usize;

        for (arrival, leaving) in &records {
            let arr = arrival.as_deref().and_then(parse);
            let leave = leaving.as_deref().and_then(parse);

            if let Some(a) = arr {
                if a > shift_start {
                    late += 1;
                }
            }
            if let Some(l) = leave {
                if l < shift_end {
                    early += 1;
                }
                if let Some(a) = arr {
                    let dur = (l - a).num_seconds();
                    if dur > 0 {
                        worked_secs += dur;
                        full_days += 1;
                    }
                }
            }
        }

        let avg_hours = if full_days > 0 {
            worked_secs as f64 / full_days as f64 / 3600.0
        } else {
            0.0
        };

        Ok(PersonStats {
            person_id: person.person_id,
            name: person.name,
            shift: format!("{} - {}", person.shift_start, person.shift_end),
            total_days: records.len(),
            late_arrivals: late,
            early_departures: early,
            avg_hours: (avg_hours * 10.0).round() / 10.0,
        })
    }

    pub async fn counts(&self) -> Result<Counts, StoreError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let (total, present) = self
            .conn
            .call(move |conn| {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM persons", [], |r| r.get(0))?;
                let present: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE date = ?1",
                    [today],
                    |r| r.get(0),
                )?;
                Ok((total, present))
            })
            .await?;
        Ok(Counts {
            total_persons: total as usize,
            present_today: present as usize,
        })
    }

    /// Number of recorded unknown-face sightings.
    pub async fn unknown_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM unknown_faces", [], |r| r.get(0))?)
            })
            .await?;
        Ok(n as usize)
    }

    /// Export today's attendance as CSV. Returns the number of data rows.
    pub async fn export_csv(&self, path: &std::path::Path) -> Result<usize, StoreError> {
        let rows = self.today_attendance().await?;

        let mut out = String::from("ID,Name,Login Time,Last Seen,Status\n");
        for row in &rows {
            let fields = [
                row.person_id.as_str(),
                row.name.as_str(),
                row.arrival_time.as_deref().unwrap_or("N/A"),
                row.leaving_time.as_deref().unwrap_or("N/A"),
                row.status.as_str(),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }

        std::fs::write(path, out)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "exported attendance CSV");
        Ok(rows.len())
    }
}

fn person_row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonRow> {
    Ok(PersonRow {
        person_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        department: row.get(3)?,
        shift_start: row.get(4)?,
        shift_end: row.get(5)?,
        registered_at: row.get(6)?,
    })
}

fn validate_shift_time(value: &str) -> Result<(), StoreError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map(|_| ())
        .map_err(|_| StoreError::BadShiftTime(value.to_string()))
}

fn is_constraint_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Quote a CSV field when it contains a comma, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cipher() -> EmbeddingCipher {
        EmbeddingCipher::from_key_bytes(&[42u8; 32])
    }

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: Some("w600k_r50".into()) }
    }

    fn person(id: &str, name: &str) -> NewPerson {
        NewPerson {
            person_id: id.into(),
            name: name.into(),
            email: None,
            department: Some("Engineering".into()),
            shift_start: "09:00".into(),
            shift_end: "18:00".into(),
        }
    }

    fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, time.2)
            .unwrap()
    }

    async fn store() -> Store {
        Store::open_in_memory(cipher()).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get_person() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0, 0.0])).await.unwrap();

        let row = s.get_person("e-1").await.unwrap().unwrap();
        assert_eq!(row.name, "Priya");
        assert_eq!(row.shift_end, "18:00");
        assert!(s.get_person("e-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_person_id() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();
        let err = s.add_person(person("e-1", "Other"), &embedding(vec![1.0])).await;
        assert!(matches!(err, Err(StoreError::DuplicateId(id)) if id == "e-1"));
    }

    #[tokio::test]
    async fn test_bad_shift_time_rejected() {
        let s = store().await;
        let mut p = person("e-1", "Priya");
        p.shift_start = "9am".into();
        assert!(matches!(
            s.add_person(p, &embedding(vec![1.0])).await,
            Err(StoreError::BadShiftTime(_))
        ));
    }

    #[tokio::test]
    async fn test_update_person_details() {
        let s = store().await;
        let values = vec![0.6, 0.8];
        s.add_person(person("e-1", "Priya"), &embedding(values.clone())).await.unwrap();

        s.update_person(
            "e-1",
            "Priya Nair",
            Some("priya@example.com".into()),
            None,
            "08:30",
            "17:30",
        )
        .await
        .unwrap();

        let row = s.get_person("e-1").await.unwrap().unwrap();
        assert_eq!(row.name, "Priya Nair");
        assert_eq!(row.email.as_deref(), Some("priya@example.com"));
        assert_eq!(row.department, None);
        assert_eq!(row.shift_start, "08:30");
        assert_eq!(row.shift_end, "17:30");

        // Embedding is untouched by a details update.
        let gallery = s.load_gallery().await.unwrap();
        assert_eq!(gallery[0].embedding.values, values);

        let missing = s
            .update_person("ghost", "Ghost", None, None, "09:00", "18:00")
            .await;
        assert!(matches!(missing, Err(StoreError::PersonNotFound(_))));

        let bad = s.update_person("e-1", "Priya", None, None, "morning", "18:00").await;
        assert!(matches!(bad, Err(StoreError::BadShiftTime(_))));
    }

    #[tokio::test]
    async fn test_gallery_roundtrip_through_encryption() {
        let s = store().await;
        let values = vec![0.6, 0.8, 0.0];
        s.add_person(person("e-1", "Priya"), &embedding(values.clone())).await.unwrap();

        let gallery = s.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].person_id, "e-1");
        assert_eq!(gallery[0].embedding.values, values);
        assert_eq!(gallery[0].embedding.model_version.as_deref(), Some("w600k_r50"));
    }

    #[tokio::test]
    async fn test_embedding_is_not_stored_in_clear() {
        let s = store().await;
        let values = vec![0.6f32, 0.8, 0.0];
        s.add_person(person("e-1", "Priya"), &embedding(values.clone())).await.unwrap();

        let blob: Vec<u8> = s
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT embedding FROM persons", [], |r| r.get(0))?)
            })
            .await
            .unwrap();

        let clear: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_ne!(blob, clear);
        assert!(blob.len() > clear.len()); // nonce + GCM tag overhead
    }

    #[tokio::test]
    async fn test_delete_person_cascades() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();
        s.sync_attendance_at("e-1", at((2026, 3, 2), (9, 0, 0))).await.unwrap();
        s.log_detection_at("e-1", "Priya", at((2026, 3, 2), (9, 0, 0))).await.unwrap();

        assert!(s.delete_person("e-1").await.unwrap());
        assert!(!s.delete_person("e-1").await.unwrap());
        assert!(s.attendance_on("2026-03-02").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_sighting_is_login() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        let outcome = s.sync_attendance_at("e-1", at((2026, 3, 2), (8, 55, 10))).await.unwrap();
        assert!(matches!(outcome, AttendanceOutcome::Login { ref time } if time == "08:55:10"));

        let rows = s.attendance_on("2026-03-02").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].arrival_time.as_deref(), Some("08:55:10"));
        assert_eq!(rows[0].leaving_time.as_deref(), Some("08:55:10"));
    }

    #[tokio::test]
    async fn test_one_attendance_row_per_day() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        s.sync_attendance_at("e-1", at((2026, 3, 2), (9, 0, 0))).await.unwrap();
        let mid = s.sync_attendance_at("e-1", at((2026, 3, 2), (13, 30, 0))).await.unwrap();
        assert!(matches!(mid, AttendanceOutcome::ShiftOngoing { ref ends } if ends == "18:00"));

        let rows = s.attendance_on("2026-03-02").await.unwrap();
        assert_eq!(rows.len(), 1);
        // Arrival keeps first-seen; leaving moves to last-seen.
        assert_eq!(rows[0].arrival_time.as_deref(), Some("09:00:00"));
        assert_eq!(rows[0].leaving_time.as_deref(), Some("13:30:00"));
    }

    #[tokio::test]
    async fn test_logout_after_shift_end() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        s.sync_attendance_at("e-1", at((2026, 3, 2), (9, 0, 0))).await.unwrap();
        let evening = s.sync_attendance_at("e-1", at((2026, 3, 2), (18, 5, 0))).await.unwrap();
        assert!(matches!(evening, AttendanceOutcome::LogoutUpdated { ref time } if time == "18:05:00"));
    }

    #[tokio::test]
    async fn test_new_day_is_new_login() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        s.sync_attendance_at("e-1", at((2026, 3, 2), (9, 0, 0))).await.unwrap();
        let next_day = s.sync_attendance_at("e-1", at((2026, 3, 3), (9, 10, 0))).await.unwrap();
        assert!(matches!(next_day, AttendanceOutcome::Login { .. }));

        assert_eq!(s.attendance_on("2026-03-02").await.unwrap().len(), 1);
        assert_eq!(s.attendance_on("2026-03-03").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_unknown_person() {
        let s = store().await;
        let err = s.sync_attendance_at("ghost", at((2026, 3, 2), (9, 0, 0))).await;
        assert!(matches!(err, Err(StoreError::PersonNotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first_with_limit() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        for minute in 0..5 {
            s.log_detection_at("e-1", "Priya", at((2026, 3, 2), (9, minute, 0)))
                .await
                .unwrap();
        }

        let logs = s.recent_logs(3).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].time, "09:04:00");
        assert_eq!(logs[2].time, "09:02:00");
    }

    #[tokio::test]
    async fn test_attendance_report_range_and_person_filter() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();
        s.add_person(person("e-2", "Marcus"), &embedding(vec![0.0, 1.0])).await.unwrap();

        s.sync_attendance_at("e-1", at((2026, 3, 1), (9, 0, 0))).await.unwrap();
        s.sync_attendance_at("e-1", at((2026, 3, 2), (9, 0, 0))).await.unwrap();
        s.sync_attendance_at("e-2", at((2026, 3, 2), (10, 0, 0))).await.unwrap();
        s.sync_attendance_at("e-1", at((2026, 3, 9), (9, 0, 0))).await.unwrap();

        let all = s.attendance_report("2026-03-01", "2026-03-05", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].date, "2026-03-02"); // newest date first

        let priya = s
            .attendance_report("2026-03-01", "2026-03-05", Some("e-1".into()))
            .await
            .unwrap();
        assert_eq!(priya.len(), 2);
        assert!(priya.iter().all(|r| r.person_id == "e-1"));
    }

    #[tokio::test]
    async fn test_person_stats() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();

        // Day 1: on time, leaves after shift end (9h worked).
        s.sync_attendance_at("e-1", at((2026, 3, 2), (8, 58, 0))).await.unwrap();
        s.sync_attendance_at("e-1", at((2026, 3, 2), (17, 58, 0))).await.unwrap();
        // Day 2: late arrival, early departure (7h worked).
        s.sync_attendance_at("e-1", at((2026, 3, 3), (9, 30, 0))).await.unwrap();
        s.sync_attendance_at("e-1", at((2026, 3, 3), (16, 30, 0))).await.unwrap();

        let stats = s.person_stats("e-1").await.unwrap();
        assert_eq!(stats.total_days, 2);
        assert_eq!(stats.late_arrivals, 1);
        assert_eq!(stats.early_departures, 2); // 17:58 and 16:30 both precede 18:00
        assert_eq!(stats.shift, "09:00 - 18:00");
        assert!((stats.avg_hours - 8.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_counts() {
        let s = store().await;
        s.add_person(person("e-1", "Priya"), &embedding(vec![1.0])).await.unwrap();
        s.add_person(person("e-2", "Marcus"), &embedding(vec![0.0, 1.0])).await.unwrap();
        s.sync_attendance("e-1").await.unwrap();

        let counts = s.counts().await.unwrap();
        assert_eq!(counts.total_persons, 2);
        assert_eq!(counts.present_today, 1);
    }

    #[tokio::test]
    async fn test_log_unknown() {
        let s = store().await;
        s.log_unknown("/var/lib/rollcall/unknown/a.png", &embedding(vec![0.1, 0.2]))
            .await
            .unwrap();

        let n: i64 = s
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM unknown_faces", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[tokio::test]
    async fn test_export_csv() {
        let s = store().await;
        s.add_person(person("e-1", "Nguyen, Priya"), &embedding(vec![1.0])).await.unwrap();
        s.sync_attendance("e-1").await.unwrap();

        let path = std::env::temp_dir().join(format!("rollcall-export-{}.csv", std::process::id()));
        let rows = s.export_csv(&path).await.unwrap();
        assert_eq!(rows, 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("ID,Name,Login Time,Last Seen,Status\n"));
        assert!(contents.contains("\"Nguyen, Priya\""));
        let _ = std::fs::remove_file(&path);
    }
}
