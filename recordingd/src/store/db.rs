use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use shared::types::RecordingState;
use crate::store::{ActiveRecording, StoreError, Target};

const RECORDING_COLUMNS: &str = "target_id, remote_id, name, state, duration, start_time,
                                 continuous, to_disk, max_size, max_age, metadata";

pub struct RecordingDb {
    conn: Connection,
}

impl RecordingDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS targets (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                connect_url TEXT NOT NULL UNIQUE,
                alias       TEXT
            );

            CREATE TABLE IF NOT EXISTS active_recordings (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id   INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
                remote_id   INTEGER NOT NULL,
                name        TEXT NOT NULL,
                state       TEXT NOT NULL,
                duration    INTEGER NOT NULL,
                start_time  INTEGER NOT NULL,
                continuous  INTEGER NOT NULL,
                to_disk     INTEGER NOT NULL,
                max_size    INTEGER NOT NULL,
                max_age     INTEGER NOT NULL,
                metadata    TEXT NOT NULL,
                UNIQUE (target_id, name),
                UNIQUE (target_id, remote_id)
            );

            CREATE INDEX IF NOT EXISTS idx_recordings_target ON active_recordings(target_id);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert a target, or update its alias if the connect URL is already known.
    pub fn upsert_target(&self, connect_url: &str, alias: Option<&str>) -> Result<Target, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO targets (connect_url, alias) VALUES (?1, ?2)
            ON CONFLICT(connect_url) DO UPDATE SET alias = excluded.alias
            "#,
            params![connect_url, alias],
        )?;

        self.find_target_by_connect_url(connect_url)?
            .ok_or_else(|| StoreError::NotFound(format!("Target {}", connect_url)))
    }

    pub fn find_target_by_id(&self, id: i64) -> Result<Option<Target>, StoreError> {
        let target = self
            .conn
            .query_row(
                "SELECT id, connect_url, alias FROM targets WHERE id = ?1",
                params![id],
                Self::row_to_target,
            )
            .optional()?;

        self.with_recordings(target)
    }

    pub fn find_target_by_connect_url(&self, connect_url: &str) -> Result<Option<Target>, StoreError> {
        let target = self
            .conn
            .query_row(
                "SELECT id, connect_url, alias FROM targets WHERE connect_url = ?1",
                params![connect_url],
                Self::row_to_target,
            )
            .optional()?;

        self.with_recordings(target)
    }

    /// All targets, each with its active recordings loaded
    pub fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, connect_url, alias FROM targets ORDER BY id")?;

        let targets = stmt
            .query_map([], Self::row_to_target)?
            .collect::<Result<Vec<_>, _>>()?;

        targets
            .into_iter()
            .map(|mut target| {
                target.active_recordings = self.list_recordings(target.id)?;
                Ok(target)
            })
            .collect()
    }

    /// Remove a target; its recordings go with it.
    pub fn delete_target(&self, id: i64) -> Result<bool, StoreError> {
        let count = self.conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    pub fn list_recordings(&self, target_id: i64) -> Result<Vec<ActiveRecording>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM active_recordings WHERE target_id = ?1 ORDER BY id",
            RECORDING_COLUMNS
        ))?;

        let recordings = stmt
            .query_map(params![target_id], Self::row_to_recording)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(recordings)
    }

    /// Persist a new recording and attach it to its target in one transaction.
    pub fn insert_recording(&mut self, recording: &ActiveRecording) -> Result<(), StoreError> {
        let metadata_json = serde_json::to_string(&recording.metadata)?;
        let tx = self.conn.transaction()?;

        let target_exists = tx
            .query_row(
                "SELECT 1 FROM targets WHERE id = ?1",
                params![recording.target_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !target_exists {
            return Err(StoreError::NotFound(format!("Target {}", recording.target_id)));
        }

        let tracked = |column: &str, value: &dyn rusqlite::ToSql| -> Result<bool, StoreError> {
            Ok(tx
                .query_row(
                    &format!(
                        "SELECT 1 FROM active_recordings WHERE target_id = ?1 AND {} = ?2",
                        column
                    ),
                    params![recording.target_id, value],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        };
        if tracked("name", &recording.name)? {
            return Err(StoreError::Conflict(format!(
                "Recording with name \"{}\" already exists",
                recording.name
            )));
        }
        if tracked("remote_id", &recording.remote_id)? {
            return Err(StoreError::Conflict(format!(
                "Recording id {} is already tracked for target {}",
                recording.remote_id, recording.target_id
            )));
        }

        let inserted = tx.execute(
            &format!(
                "INSERT INTO active_recordings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                RECORDING_COLUMNS
            ),
            params![
                recording.target_id,
                recording.remote_id,
                &recording.name,
                recording.state.as_str(),
                recording.duration,
                recording.start_time,
                recording.continuous as i32,
                recording.to_disk as i32,
                recording.max_size,
                recording.max_age,
                metadata_json,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::Conflict(format!(
                    "Recording \"{}\" ({}) conflicts with a tracked recording",
                    recording.name, recording.remote_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a recording row. Returns true if a row was removed.
    pub fn delete_recording(&mut self, target_id: i64, remote_id: i64) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let count = tx.execute(
            "DELETE FROM active_recordings WHERE target_id = ?1 AND remote_id = ?2",
            params![target_id, remote_id],
        )?;
        tx.commit()?;
        Ok(count > 0)
    }

    pub fn update_recording_state(
        &self,
        target_id: i64,
        remote_id: i64,
        state: RecordingState,
    ) -> Result<bool, StoreError> {
        let count = self.conn.execute(
            "UPDATE active_recordings SET state = ?1 WHERE target_id = ?2 AND remote_id = ?3",
            params![state.as_str(), target_id, remote_id],
        )?;
        Ok(count > 0)
    }

    fn with_recordings(&self, target: Option<Target>) -> Result<Option<Target>, StoreError> {
        match target {
            Some(mut target) => {
                target.active_recordings = self.list_recordings(target.id)?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    fn row_to_target(row: &rusqlite::Row) -> Result<Target, rusqlite::Error> {
        Ok(Target {
            id: row.get(0)?,
            connect_url: row.get(1)?,
            alias: row.get(2)?,
            active_recordings: Vec::new(),
        })
    }

    fn row_to_recording(row: &rusqlite::Row) -> Result<ActiveRecording, rusqlite::Error> {
        let state_str: String = row.get(3)?;
        let continuous: i32 = row.get(6)?;
        let to_disk: i32 = row.get(7)?;
        let metadata_json: String = row.get(10)?;

        let state = state_str.parse::<RecordingState>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        let metadata = serde_json::from_str(&metadata_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

        Ok(ActiveRecording {
            target_id: row.get(0)?,
            remote_id: row.get(1)?,
            name: row.get(2)?,
            state,
            duration: row.get(4)?,
            start_time: row.get(5)?,
            continuous: continuous != 0,
            to_disk: to_disk != 0,
            max_size: row.get(8)?,
            max_age: row.get(9)?,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use shared::types::Metadata;

    const URL: &str = "service:jmx:rmi:///jndi/rmi://localhost:9091/jmxrmi";

    fn test_recording(target_id: i64, remote_id: i64, name: &str) -> ActiveRecording {
        ActiveRecording {
            target_id,
            remote_id,
            name: name.to_string(),
            state: RecordingState::Running,
            duration: 30_000,
            start_time: 1_700_000_000_000,
            continuous: false,
            to_disk: true,
            max_size: 0,
            max_age: 0,
            metadata: Metadata::new(BTreeMap::from([
                ("template.name".to_string(), "Profiling".to_string()),
                ("template.type".to_string(), "TARGET".to_string()),
            ])),
        }
    }

    #[test]
    fn test_upsert_target_is_idempotent() {
        let db = RecordingDb::open(":memory:").unwrap();

        let first = db.upsert_target(URL, None).unwrap();
        let second = db.upsert_target(URL, Some("app")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.alias.as_deref(), Some("app"));
        assert_eq!(db.list_targets().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_and_load_recording() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let target = db.upsert_target(URL, None).unwrap();

        let recording = test_recording(target.id, 42, "r1");
        db.insert_recording(&recording).unwrap();

        let loaded = db.find_target_by_id(target.id).unwrap().unwrap();
        assert_eq!(loaded.active_recordings, vec![recording.clone()]);

        let by_url = db.find_target_by_connect_url(URL).unwrap().unwrap();
        assert_eq!(by_url.recording_by_name("r1"), Some(&recording));
    }

    #[test]
    fn test_duplicate_name_is_a_conflict() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let target = db.upsert_target(URL, None).unwrap();

        db.insert_recording(&test_recording(target.id, 1, "r1")).unwrap();
        let err = db.insert_recording(&test_recording(target.id, 2, "r1")).unwrap_err();

        assert!(matches!(err, StoreError::Conflict(ref m) if m.contains("already exists")));
        assert_eq!(db.list_recordings(target.id).unwrap().len(), 1);
    }

    #[test]
    fn test_reused_remote_id_is_not_a_name_conflict() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let target = db.upsert_target(URL, None).unwrap();

        db.insert_recording(&test_recording(target.id, 1, "old")).unwrap();
        let err = db.insert_recording(&test_recording(target.id, 1, "fresh")).unwrap_err();

        match err {
            StoreError::Conflict(message) => {
                assert!(message.contains("id 1 is already tracked"), "{}", message);
                assert!(!message.contains("already exists"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(db.list_recordings(target.id).unwrap()[0].name, "old");
    }

    #[test]
    fn test_same_name_on_different_targets() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let a = db.upsert_target(URL, None).unwrap();
        let b = db.upsert_target("service:jmx:rmi:///jndi/rmi://other:9091/jmxrmi", None).unwrap();

        db.insert_recording(&test_recording(a.id, 1, "r1")).unwrap();
        db.insert_recording(&test_recording(b.id, 1, "r1")).unwrap();

        assert_eq!(db.list_recordings(a.id).unwrap().len(), 1);
        assert_eq!(db.list_recordings(b.id).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_for_unknown_target() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let err = db.insert_recording(&test_recording(99, 1, "r1")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_and_update_recording() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let target = db.upsert_target(URL, None).unwrap();
        db.insert_recording(&test_recording(target.id, 42, "r1")).unwrap();

        assert!(db.update_recording_state(target.id, 42, RecordingState::Stopped).unwrap());
        let loaded = db.list_recordings(target.id).unwrap();
        assert_eq!(loaded[0].state, RecordingState::Stopped);

        assert!(db.delete_recording(target.id, 42).unwrap());
        assert!(!db.delete_recording(target.id, 42).unwrap());
        assert!(db.list_recordings(target.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_target_cascades() {
        let mut db = RecordingDb::open(":memory:").unwrap();
        let target = db.upsert_target(URL, None).unwrap();
        db.insert_recording(&test_recording(target.id, 42, "r1")).unwrap();

        assert!(db.delete_target(target.id).unwrap());
        assert!(db.find_target_by_id(target.id).unwrap().is_none());
        assert!(db.list_recordings(target.id).unwrap().is_empty());
    }
}
