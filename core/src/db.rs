use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CalorieEntry, CalorieEntryPatch, DAY_FORMAT, NewCalorieEntry, NewWeightEntry, Settings,
    StoredSettings, WeightEntry, WorkoutData, format_day,
};
use crate::store::{Collection, Listener, RemoteStore, Snapshot, Subscription};

const SETTINGS_DOC: &str = "settings";
const WORKOUT_DOC: &str = "workoutData";

/// Open a connection and bring the schema up to date.
///
/// The store and the auth provider share one database file, so every table
/// is owned by this migration list.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    migrate(&conn)?;
    Ok(conn)
}

pub(crate) fn open_memory_connection() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS calorie_entries (
                id TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                day TEXT NOT NULL,
                target INTEGER,
                exercise INTEGER,
                intake INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS weight_entries (
                id TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                date TEXT NOT NULL,
                weight REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                uid TEXT NOT NULL,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (uid, name)
            );

            CREATE INDEX IF NOT EXISTS idx_calorie_entries_uid ON calorie_entries(uid);
            CREATE INDEX IF NOT EXISTS idx_weight_entries_uid ON weight_entries(uid);

            PRAGMA user_version = 1;",
        )?;
    }

    if version < 2 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_salt TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_session (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                uid TEXT NOT NULL REFERENCES users(uid),
                signed_in_at TEXT NOT NULL
            );

            PRAGMA user_version = 2;",
        )?;
    }

    Ok(())
}

fn parse_stored_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Serialize, Deserialize)]
struct WorkoutDocument {
    #[serde(default)]
    data: WorkoutData,
}

struct Watcher {
    id: u64,
    uid: String,
    collection: Collection,
    listener: Listener,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    entries: Vec<Watcher>,
}

/// SQLite-backed [`RemoteStore`]. Change notifications are delivered to
/// watchers registered on this instance, synchronously after each commit.
/// Commits made through other connections to the same file are picked up by
/// [`RemoteStore::refresh`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Arc<Mutex<Watchers>>,
    // Last `PRAGMA data_version` seen; it only moves on foreign commits.
    data_version: Mutex<i64>,
}

fn data_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.pragma_query_value(None, "data_version", |row| row.get(0))
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_connection(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(open_memory_connection()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let version = data_version(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            watchers: Arc::new(Mutex::new(Watchers::default())),
            data_version: Mutex::new(version),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watcher_count(&self) -> usize {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Push the current contents of a stream to its watchers.
    ///
    /// Called after the write has committed and the connection lock is
    /// released, so listeners may read from the store.
    fn notify(&self, uid: &str, collection: Collection) {
        let listeners: Vec<Listener> = {
            let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers
                .entries
                .iter()
                .filter(|w| w.uid == uid && w.collection == collection)
                .map(|w| Arc::clone(&w.listener))
                .collect()
        };
        if listeners.is_empty() {
            return;
        }
        match self.read(uid, collection) {
            Ok(snapshot) => {
                for listener in listeners {
                    listener(snapshot.clone());
                }
            }
            Err(e) => {
                tracing::warn!(
                    collection = collection.name(),
                    "Failed to read snapshot for watchers: {e:#}"
                );
            }
        }
    }

    // --- Row mapping helpers ---

    // Expects columns: 0: id, 1: day, 2: target, 3: exercise, 4: intake
    fn calorie_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<CalorieEntry> {
        let day: String = row.get(1)?;
        Ok(CalorieEntry {
            id: row.get(0)?,
            day: parse_stored_date(1, &day)?,
            target: row.get(2)?,
            exercise: row.get(3)?,
            intake: row.get(4)?,
        })
    }

    // Expects columns: 0: id, 1: date, 2: weight
    fn weight_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<WeightEntry> {
        let date: String = row.get(1)?;
        Ok(WeightEntry {
            id: row.get(0)?,
            date: parse_stored_date(1, &date)?,
            weight: row.get(2)?,
        })
    }

    // --- Reads ---

    fn get_document(conn: &Connection, uid: &str, name: &str) -> Result<Option<String>> {
        let body = conn
            .query_row(
                "SELECT body FROM documents WHERE uid = ?1 AND name = ?2",
                params![uid, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn put_document(conn: &Connection, uid: &str, name: &str, body: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents (uid, name, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uid, name) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![uid, name, body, now],
        )?;
        Ok(())
    }

    pub fn get_settings(&self, uid: &str) -> Result<Option<StoredSettings>> {
        let conn = self.conn();
        Self::get_document(&conn, uid, SETTINGS_DOC)?
            .map(|body| {
                serde_json::from_str(&body).context("Corrupt settings document in store")
            })
            .transpose()
    }

    pub fn get_workout_data(&self, uid: &str) -> Result<Option<WorkoutData>> {
        let conn = self.conn();
        Self::get_document(&conn, uid, WORKOUT_DOC)?
            .map(|body| {
                serde_json::from_str::<WorkoutDocument>(&body)
                    .map(|doc| doc.data)
                    .context("Corrupt workout document in store")
            })
            .transpose()
    }

    pub fn get_calorie_entries(&self, uid: &str) -> Result<Vec<CalorieEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, day, target, exercise, intake
             FROM calorie_entries WHERE uid = ?1 ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map(params![uid], Self::calorie_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn get_calorie_entry(&self, uid: &str, id: &str) -> Result<Option<CalorieEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT id, day, target, exercise, intake
                 FROM calorie_entries WHERE uid = ?1 AND id = ?2",
                params![uid, id],
                Self::calorie_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn get_weight_entries(&self, uid: &str) -> Result<Vec<WeightEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, date, weight FROM weight_entries WHERE uid = ?1 ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map(params![uid], Self::weight_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn insert_calorie_entry(conn: &Connection, uid: &str, entry: &NewCalorieEntry) -> Result<String> {
        let now = Local::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO calorie_entries (id, uid, day, target, exercise, intake, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                uid,
                format_day(entry.day),
                entry.target,
                entry.exercise,
                entry.intake,
                now,
                now,
            ],
        )?;
        Ok(id)
    }
}

impl RemoteStore for SqliteStore {
    fn watch(
        &self,
        uid: &str,
        collection: Collection,
        listener: Listener,
    ) -> Result<Subscription> {
        let id = {
            let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            let id = watchers.next_id;
            watchers.next_id += 1;
            watchers.entries.push(Watcher {
                id,
                uid: uid.to_string(),
                collection,
                listener: Arc::clone(&listener),
            });
            id
        };
        tracing::debug!(uid, collection = collection.name(), id, "Watcher registered");

        let weak: Weak<Mutex<Watchers>> = Arc::downgrade(&self.watchers);
        let subscription = Subscription::new(move || {
            if let Some(watchers) = weak.upgrade() {
                let mut watchers = watchers.lock().unwrap_or_else(PoisonError::into_inner);
                watchers.entries.retain(|w| w.id != id);
                tracing::debug!(id, "Watcher released");
            }
        });

        // Registered before the initial read so no commit falls between the
        // two. A failed read drops the subscription again.
        let initial = self.read(uid, collection)?;
        listener(initial);
        Ok(subscription)
    }

    fn refresh(&self) -> Result<bool> {
        let version = data_version(&self.conn())?;
        {
            let mut seen = self.data_version.lock().unwrap_or_else(PoisonError::into_inner);
            if *seen == version {
                return Ok(false);
            }
            *seen = version;
        }

        let mut streams: Vec<(String, Collection)> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|w| (w.uid.clone(), w.collection))
            .collect();
        streams.sort_by_key(|(uid, collection)| (uid.clone(), collection.name()));
        streams.dedup();
        tracing::debug!(streams = streams.len(), "External commit detected, refreshing watchers");
        for (uid, collection) in streams {
            self.notify(&uid, collection);
        }
        Ok(true)
    }

    fn read(&self, uid: &str, collection: Collection) -> Result<Snapshot> {
        Ok(match collection {
            Collection::Settings => Snapshot::Settings(self.get_settings(uid)?),
            Collection::CalorieEntries => Snapshot::CalorieEntries(self.get_calorie_entries(uid)?),
            Collection::WorkoutData => Snapshot::WorkoutData(self.get_workout_data(uid)?),
            Collection::WeightEntries => Snapshot::WeightEntries(self.get_weight_entries(uid)?),
        })
    }

    fn merge_settings(&self, uid: &str, settings: &Settings) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let existing: StoredSettings = Self::get_document(&tx, uid, SETTINGS_DOC)?
                .map(|body| serde_json::from_str(&body))
                .transpose()
                .context("Corrupt settings document in store")?
                .unwrap_or_default();
            let merged = existing.merged(StoredSettings::from(*settings));
            Self::put_document(&tx, uid, SETTINGS_DOC, &serde_json::to_string(&merged)?)?;
            tx.commit()?;
        }
        self.notify(uid, Collection::Settings);
        Ok(())
    }

    fn add_calorie_entry(&self, uid: &str, entry: &NewCalorieEntry) -> Result<String> {
        let id = {
            let conn = self.conn();
            Self::insert_calorie_entry(&conn, uid, entry)?
        };
        self.notify(uid, Collection::CalorieEntries);
        Ok(id)
    }

    fn update_calorie_entry(
        &self,
        uid: &str,
        id: &str,
        patch: &CalorieEntryPatch,
    ) -> Result<bool> {
        let updated = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    "SELECT id, day, target, exercise, intake
                     FROM calorie_entries WHERE uid = ?1 AND id = ?2",
                    params![uid, id],
                    Self::calorie_entry_from_row,
                )
                .optional()?;
            let Some(mut entry) = existing else {
                tracing::debug!(id, "Update skipped: calorie entry does not exist");
                return Ok(false);
            };
            patch.apply_to(&mut entry);
            let now = Local::now().to_rfc3339();
            tx.execute(
                "UPDATE calorie_entries
                 SET day = ?1, target = ?2, exercise = ?3, intake = ?4, updated_at = ?5
                 WHERE uid = ?6 AND id = ?7",
                params![
                    format_day(entry.day),
                    entry.target,
                    entry.exercise,
                    entry.intake,
                    now,
                    uid,
                    id,
                ],
            )?;
            tx.commit()?;
            true
        };
        if updated {
            self.notify(uid, Collection::CalorieEntries);
        }
        Ok(updated)
    }

    fn delete_calorie_entry(&self, uid: &str, id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM calorie_entries WHERE uid = ?1 AND id = ?2",
            params![uid, id],
        )?;
        if rows > 0 {
            self.notify(uid, Collection::CalorieEntries);
        }
        Ok(rows > 0)
    }

    fn calorie_entry_ids(&self, uid: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM calorie_entries WHERE uid = ?1")?;
        let ids = stmt
            .query_map(params![uid], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn delete_calorie_entries(&self, uid: &str, ids: &[String]) -> Result<usize> {
        let deleted = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM calorie_entries WHERE uid = ?1 AND id = ?2")?;
                for id in ids {
                    deleted += stmt.execute(params![uid, id])?;
                }
            }
            tx.commit()?;
            deleted
        };
        self.notify(uid, Collection::CalorieEntries);
        Ok(deleted)
    }

    fn create_calorie_entries(
        &self,
        uid: &str,
        entries: &[NewCalorieEntry],
    ) -> Result<Vec<String>> {
        let ids = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let ids = entries
                .iter()
                .map(|entry| Self::insert_calorie_entry(&tx, uid, entry))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            ids
        };
        self.notify(uid, Collection::CalorieEntries);
        Ok(ids)
    }

    fn set_workout_data(&self, uid: &str, data: &WorkoutData) -> Result<()> {
        let body = serde_json::to_string(&WorkoutDocument { data: data.clone() })?;
        {
            let conn = self.conn();
            Self::put_document(&conn, uid, WORKOUT_DOC, &body)?;
        }
        self.notify(uid, Collection::WorkoutData);
        Ok(())
    }

    fn add_weight_entry(&self, uid: &str, entry: &NewWeightEntry) -> Result<String> {
        let now = Local::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO weight_entries (id, uid, date, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, uid, format_day(entry.date), entry.weight, now],
        )?;
        self.notify(uid, Collection::WeightEntries);
        Ok(id)
    }

    fn delete_weight_entry(&self, uid: &str, id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM weight_entries WHERE uid = ?1 AND id = ?2",
            params![uid, id],
        )?;
        if rows > 0 {
            self.notify(uid, Collection::WeightEntries);
        }
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WorkoutEntry, WorkoutType, parse_day};

    const UID: &str = "user-1";

    fn entry(day: &str, target: Option<i64>, exercise: Option<i64>, intake: Option<i64>) -> NewCalorieEntry {
        NewCalorieEntry {
            day: parse_day(day).unwrap(),
            target,
            exercise,
            intake,
        }
    }

    fn recorder(store: &SqliteStore, collection: Collection) -> (Arc<Mutex<Vec<Snapshot>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store
            .watch(
                UID,
                collection,
                Arc::new(move |s| sink.lock().unwrap().push(s)),
            )
            .unwrap();
        (seen, sub)
    }

    #[test]
    fn test_add_and_read_calorie_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, Some(1800)))
            .unwrap();

        let entries = store.get_calorie_entries(UID).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].target, Some(1500));
        assert_eq!(entries[0].exercise, None);
        assert_eq!(entries[0].intake, Some(1800));
    }

    #[test]
    fn test_collections_are_scoped_per_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, None))
            .unwrap();
        store
            .add_calorie_entry("someone-else", &entry("2024-06-15", Some(1500), None, None))
            .unwrap();

        assert_eq!(store.get_calorie_entries(UID).unwrap().len(), 1);
        assert_eq!(store.calorie_entry_ids("someone-else").unwrap().len(), 1);
    }

    #[test]
    fn test_update_merges_named_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), Some(300), None))
            .unwrap();

        let patch = CalorieEntryPatch {
            intake: Some(Some(1800)),
            ..Default::default()
        };
        assert!(store.update_calorie_entry(UID, &id, &patch).unwrap());

        let updated = store.get_calorie_entry(UID, &id).unwrap().unwrap();
        assert_eq!(updated.target, Some(1500));
        assert_eq!(updated.exercise, Some(300));
        assert_eq!(updated.intake, Some(1800));
    }

    #[test]
    fn test_update_missing_id_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, Some(900)))
            .unwrap();
        let before = store.get_calorie_entries(UID).unwrap();

        let patch = CalorieEntryPatch {
            intake: Some(Some(1200)),
            ..Default::default()
        };
        assert!(!store.update_calorie_entry(UID, "x", &patch).unwrap());

        assert_eq!(store.get_calorie_entries(UID).unwrap(), before);
        assert_eq!(store.get_calorie_entry(UID, &id).unwrap().unwrap().intake, Some(900));
    }

    #[test]
    fn test_delete_calorie_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_calorie_entry(UID, &entry("2024-06-15", None, None, None))
            .unwrap();
        assert!(store.delete_calorie_entry(UID, &id).unwrap());
        assert!(!store.delete_calorie_entry(UID, &id).unwrap());
        assert!(store.get_calorie_entries(UID).unwrap().is_empty());
    }

    #[test]
    fn test_batch_delete_and_create() {
        let store = SqliteStore::open_in_memory().unwrap();
        for d in ["2024-06-01", "2024-06-02", "2024-06-03"] {
            store
                .add_calorie_entry(UID, &entry(d, Some(1500), None, None))
                .unwrap();
        }
        let ids = store.calorie_entry_ids(UID).unwrap();
        assert_eq!(store.delete_calorie_entries(UID, &ids).unwrap(), 3);
        assert!(store.get_calorie_entries(UID).unwrap().is_empty());

        let created = store
            .create_calorie_entries(
                UID,
                &[
                    entry("2024-07-01", Some(1600), Some(100), Some(1400)),
                    entry("2024-07-02", None, None, Some(2100)),
                ],
            )
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(store.get_calorie_entries(UID).unwrap().len(), 2);
    }

    #[test]
    fn test_batch_delete_of_nothing_still_notifies() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (seen, _sub) = recorder(&store, Collection::CalorieEntries);
        assert_eq!(store.delete_calorie_entries(UID, &[]).unwrap(), 0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_settings_merge_write() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_settings(UID).unwrap().is_none());

        let settings = Settings {
            maintenance_calories: 2400,
            step_goal: 8000,
            weight_goal: 170,
        };
        store.merge_settings(UID, &settings).unwrap();
        let stored = store.get_settings(UID).unwrap().unwrap();
        assert_eq!(stored.resolve(), settings);
    }

    #[test]
    fn test_workout_document_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut data = WorkoutData::default();
        data.set_day(
            parse_day("2024-06-15").unwrap(),
            WorkoutEntry {
                workout_type: WorkoutType::Push,
                steps: Some(9000),
            },
        );
        data.set_day(
            parse_day("2024-06-16").unwrap(),
            WorkoutEntry {
                workout_type: WorkoutType::Unset,
                steps: Some(3000),
            },
        );
        store.set_workout_data(UID, &data).unwrap();
        assert_eq!(store.get_workout_data(UID).unwrap().unwrap(), data);

        data.remove_day(parse_day("2024-06-15").unwrap());
        store.set_workout_data(UID, &data).unwrap();
        let read_back = store.get_workout_data(UID).unwrap().unwrap();
        assert_eq!(read_back, data);
        assert!(read_back.get(parse_day("2024-06-15").unwrap()).is_none());
    }

    #[test]
    fn test_weight_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_weight_entry(
                UID,
                &NewWeightEntry {
                    date: parse_day("2024-06-15").unwrap(),
                    weight: 172.4,
                },
            )
            .unwrap();
        let entries = store.get_weight_entries(UID).unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].weight - 172.4).abs() < f64::EPSILON);

        assert!(store.delete_weight_entry(UID, &id).unwrap());
        assert!(store.get_weight_entries(UID).unwrap().is_empty());
    }

    #[test]
    fn test_watch_delivers_initial_snapshot_and_changes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (seen, sub) = recorder(&store, Collection::CalorieEntries);

        assert_eq!(seen.lock().unwrap().as_slice(), &[Snapshot::CalorieEntries(vec![])]);

        store
            .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, None))
            .unwrap();
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            match &seen[1] {
                Snapshot::CalorieEntries(entries) => assert_eq!(entries.len(), 1),
                other => panic!("unexpected snapshot {other:?}"),
            }
        }

        drop(sub);
        assert_eq!(store.watcher_count(), 0);
        store
            .add_calorie_entry(UID, &entry("2024-06-16", Some(1500), None, None))
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_watch_ignores_other_streams_and_users() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (seen, _sub) = recorder(&store, Collection::WeightEntries);

        store
            .add_calorie_entry(UID, &entry("2024-06-15", None, None, None))
            .unwrap();
        store
            .add_weight_entry(
                "someone-else",
                &NewWeightEntry {
                    date: parse_day("2024-06-15").unwrap(),
                    weight: 150.0,
                },
            )
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_open_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stride.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, None))
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_calorie_entries(UID).unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_picks_up_commits_from_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stride.db");
        let server = SqliteStore::open(&path).unwrap();
        let cli = SqliteStore::open(&path).unwrap();
        let (seen, _sub) = recorder(&server, Collection::CalorieEntries);

        cli.add_calorie_entry(UID, &entry("2024-06-15", Some(1500), None, Some(1800)))
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert!(server.refresh().unwrap());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        match &seen[1] {
            Snapshot::CalorieEntries(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].intake, Some(1800));
            }
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn test_refresh_without_foreign_commits_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("stride.db")).unwrap();
        let (seen, _sub) = recorder(&store, Collection::Settings);

        // Own writes are already delivered and do not count as foreign.
        store.merge_settings(UID, &Settings::default()).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!store.refresh().unwrap());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_watch_registers_before_initial_delivery() {
        let store = SqliteStore::open_in_memory().unwrap();
        let counted = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&counted);
        let watchers = Arc::clone(&store.watchers);
        let sub = store
            .watch(
                UID,
                Collection::WeightEntries,
                Arc::new(move |_: Snapshot| {
                    // Already listed when the first snapshot arrives.
                    *sink.lock().unwrap() = watchers.lock().unwrap().entries.len();
                }),
            )
            .unwrap();
        assert_eq!(*counted.lock().unwrap(), 1);
        drop(sub);
        assert_eq!(store.watcher_count(), 0);
    }
}
