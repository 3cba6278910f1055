//! Live mirror of the signed-in user's data.
//!
//! A [`Session`] exists while a user is signed in. It holds four store
//! subscriptions and the [`AppData`] they keep current. Mutations go straight
//! to the store; the mirror only changes when the store echoes the write back.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::auth::User;
use crate::models::{
    AppData, CalorieEntryPatch, NewCalorieEntry, NewWeightEntry, Settings, StoredSettings,
    WorkoutData, WorkoutEntry, validate_setting, validate_steps, validate_weight,
};
use crate::store::{Collection, RemoteStore, Snapshot, Subscription};

fn apply_snapshot(data: &Mutex<AppData>, snapshot: Snapshot) {
    let mut data = data.lock().unwrap_or_else(PoisonError::into_inner);
    match snapshot {
        Snapshot::Settings(stored) => data.settings = stored.unwrap_or_default().resolve(),
        Snapshot::CalorieEntries(entries) => data.calorie_data = entries,
        Snapshot::WorkoutData(doc) => data.workout_data = doc.unwrap_or_default(),
        Snapshot::WeightEntries(entries) => data.weight_data = entries,
    }
}

pub struct Session {
    user: User,
    data: Arc<Mutex<AppData>>,
    // Released together when the session drops.
    _subscriptions: Vec<Subscription>,
}

impl Session {
    pub fn start(store: &dyn RemoteStore, user: User) -> Result<Self> {
        let data = Arc::new(Mutex::new(AppData::default()));
        let mut subscriptions = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let sink = Arc::clone(&data);
            let sub = store
                .watch(
                    &user.uid,
                    collection,
                    Arc::new(move |snapshot| apply_snapshot(&sink, snapshot)),
                )
                .with_context(|| format!("Failed to subscribe to {}", collection.name()))?;
            subscriptions.push(sub);
        }
        tracing::info!(email = %user.email, "Session started");
        Ok(Self {
            user,
            data,
            _subscriptions: subscriptions,
        })
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn data(&self) -> AppData {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn settings(&self) -> Settings {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::info!(email = %self.user.email, "Session ended");
    }
}

pub struct DataSync {
    store: Arc<dyn RemoteStore>,
    session: Option<Session>,
}

impl DataSync {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            session: None,
        }
    }

    /// Follow an identity change. A new user replaces the current session; an
    /// absent user drops it, which resets the mirror to defaults.
    pub fn on_auth_state_changed(&mut self, user: Option<&User>) -> Result<()> {
        match user {
            Some(user) if self.session.as_ref().is_some_and(|s| s.user.uid == user.uid) => {}
            Some(user) => {
                self.session = None;
                self.session = Some(Session::start(self.store.as_ref(), user.clone())?);
            }
            None => self.session = None,
        }
        Ok(())
    }

    #[must_use]
    pub fn current_user(&self) -> Option<&User> {
        self.session.as_ref().map(Session::user)
    }

    /// Current mirror, or defaults when signed out.
    #[must_use]
    pub fn snapshot(&self) -> AppData {
        self.session.as_ref().map(Session::data).unwrap_or_default()
    }

    fn uid(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.uid.as_str())
    }

    // --- Calorie entries ---

    pub fn add_calorie_entry(&self, entry: &NewCalorieEntry) -> Result<Option<String>> {
        let Some(uid) = self.uid() else {
            return Ok(None);
        };
        entry.validate()?;
        let id = self
            .store
            .add_calorie_entry(uid, entry)
            .context("Failed to add calorie entry")?;
        Ok(Some(id))
    }

    /// The "add entry" action: a blank row for `today` with the default target.
    pub fn add_default_calorie_entry(&self, today: NaiveDate) -> Result<Option<String>> {
        self.add_calorie_entry(&NewCalorieEntry::blank(today))
    }

    /// Returns `false` when there is no entry with `id`; nothing is written then.
    pub fn update_calorie_entry(&self, id: &str, patch: &CalorieEntryPatch) -> Result<bool> {
        let Some(uid) = self.uid() else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(false);
        }
        patch.validate()?;
        self.store
            .update_calorie_entry(uid, id, patch)
            .with_context(|| format!("Failed to update calorie entry {id}"))
    }

    pub fn delete_calorie_entry(&self, id: &str) -> Result<bool> {
        let Some(uid) = self.uid() else {
            return Ok(false);
        };
        self.store
            .delete_calorie_entry(uid, id)
            .with_context(|| format!("Failed to delete calorie entry {id}"))
    }

    pub fn clear_all_calorie_data(&self) -> Result<usize> {
        let Some(uid) = self.uid() else {
            return Ok(0);
        };
        let ids = self
            .store
            .calorie_entry_ids(uid)
            .context("Failed to list calorie entries")?;
        let deleted = self
            .store
            .delete_calorie_entries(uid, &ids)
            .context("Failed to clear calorie entries")?;
        tracing::info!(deleted, "Cleared calorie data");
        Ok(deleted)
    }

    /// Replace every calorie entry with `entries`. The clear commits before
    /// the create, so other readers can briefly see an empty collection.
    pub fn import_calorie_data(&self, entries: &[NewCalorieEntry]) -> Result<usize> {
        let Some(uid) = self.uid() else {
            return Ok(0);
        };
        for (i, entry) in entries.iter().enumerate() {
            entry
                .validate()
                .with_context(|| format!("Import row {} for {}", i + 1, entry.day))?;
        }
        self.clear_all_calorie_data()?;
        let ids = self
            .store
            .create_calorie_entries(uid, entries)
            .context("Failed to import calorie entries")?;
        tracing::info!(imported = ids.len(), "Imported calorie data");
        Ok(ids.len())
    }

    // --- Workouts ---

    pub fn save_workout_data(&self, data: &WorkoutData) -> Result<()> {
        let Some(uid) = self.uid() else {
            return Ok(());
        };
        self.store
            .set_workout_data(uid, data)
            .context("Failed to save workout data")
    }

    /// Set one day from the current mirror and save the whole map. An entry
    /// with no type and no steps removes the day.
    pub fn log_workout_day(&self, day: NaiveDate, entry: WorkoutEntry) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        validate_steps(entry.steps)?;
        let mut data = session.data().workout_data;
        data.set_day(day, entry);
        self.save_workout_data(&data)
    }

    // --- Weight ---

    pub fn save_weight_entry(&self, entry: &NewWeightEntry) -> Result<Option<String>> {
        let Some(uid) = self.uid() else {
            return Ok(None);
        };
        validate_weight(entry.weight)?;
        let id = self
            .store
            .add_weight_entry(uid, entry)
            .context("Failed to save weight entry")?;
        Ok(Some(id))
    }

    pub fn delete_weight_entry(&self, id: &str) -> Result<bool> {
        let Some(uid) = self.uid() else {
            return Ok(false);
        };
        self.store
            .delete_weight_entry(uid, id)
            .with_context(|| format!("Failed to delete weight entry {id}"))
    }

    // --- Settings ---

    pub fn set_maintenance_calories(&self, value: i64) -> Result<()> {
        self.update_settings(StoredSettings {
            maintenance_calories: Some(value),
            ..Default::default()
        })
    }

    pub fn set_step_goal(&self, value: i64) -> Result<()> {
        self.update_settings(StoredSettings {
            step_goal: Some(value),
            ..Default::default()
        })
    }

    pub fn set_weight_goal(&self, value: i64) -> Result<()> {
        self.update_settings(StoredSettings {
            weight_goal: Some(value),
            ..Default::default()
        })
    }

    /// Merge the present fields over the mirrored settings and write all
    /// three. The mirror follows once the store echoes the write.
    pub fn update_settings(&self, changes: StoredSettings) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        if let Some(v) = changes.maintenance_calories {
            validate_setting("maintenanceCalories", v)?;
        }
        if let Some(v) = changes.step_goal {
            validate_setting("stepGoal", v)?;
        }
        if let Some(v) = changes.weight_goal {
            validate_setting("weightGoal", v)?;
        }

        let settings = StoredSettings::from(session.settings())
            .merged(changes)
            .resolve();
        self.store
            .merge_settings(&session.user.uid, &settings)
            .context("Failed to save settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{WorkoutType, parse_day};
    use crate::store::Listener;

    fn user(uid: &str) -> User {
        User {
            uid: uid.to_string(),
            email: format!("{uid}@example.com"),
        }
    }

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    fn signed_in() -> (Arc<SqliteStore>, DataSync) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut sync = DataSync::new(store.clone());
        sync.on_auth_state_changed(Some(&user("u1"))).unwrap();
        (store, sync)
    }

    fn new_entry(d: &str, target: i64, intake: i64) -> NewCalorieEntry {
        NewCalorieEntry {
            day: day(d),
            target: Some(target),
            exercise: None,
            intake: Some(intake),
        }
    }

    #[test]
    fn test_signed_out_reads_defaults_and_ignores_writes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sync = DataSync::new(store.clone());

        assert_eq!(sync.snapshot(), AppData::default());
        assert_eq!(sync.snapshot().settings, Settings::default());
        assert!(
            sync.add_default_calorie_entry(day("2024-06-15"))
                .unwrap()
                .is_none()
        );
        assert_eq!(sync.clear_all_calorie_data().unwrap(), 0);
        sync.set_step_goal(12_000).unwrap();
        assert!(sync.current_user().is_none());
    }

    #[test]
    fn test_add_default_entry_is_mirrored() {
        let (_store, sync) = signed_in();
        let id = sync
            .add_default_calorie_entry(day("2024-06-15"))
            .unwrap()
            .unwrap();

        let data = sync.snapshot();
        assert_eq!(data.calorie_data.len(), 1);
        assert_eq!(data.calorie_data[0].id, id);
        assert_eq!(data.calorie_data[0].target, Some(1500));
        assert_eq!(data.calorie_data[0].intake, None);
    }

    #[test]
    fn test_update_merges_fields_into_mirror() {
        let (_store, sync) = signed_in();
        let id = sync
            .add_calorie_entry(&new_entry("2024-06-15", 1500, 1000))
            .unwrap()
            .unwrap();

        let patch = CalorieEntryPatch {
            exercise: Some(Some(300)),
            ..Default::default()
        };
        assert!(sync.update_calorie_entry(&id, &patch).unwrap());

        let entry = &sync.snapshot().calorie_data[0];
        assert_eq!(entry.exercise, Some(300));
        assert_eq!(entry.intake, Some(1000));
    }

    #[test]
    fn test_update_missing_id_is_silent_no_op() {
        let (store, sync) = signed_in();
        sync.add_calorie_entry(&new_entry("2024-06-15", 1500, 1000))
            .unwrap();
        let before = store.get_calorie_entries("u1").unwrap();

        let patch = CalorieEntryPatch {
            intake: Some(Some(5)),
            ..Default::default()
        };
        assert!(!sync.update_calorie_entry("missing", &patch).unwrap());
        assert_eq!(store.get_calorie_entries("u1").unwrap(), before);
    }

    #[test]
    fn test_clear_all_on_empty_and_populated() {
        let (_store, sync) = signed_in();
        assert_eq!(sync.clear_all_calorie_data().unwrap(), 0);
        assert!(sync.snapshot().calorie_data.is_empty());

        for d in ["2024-06-01", "2024-06-02", "2024-06-03", "2024-06-04"] {
            sync.add_calorie_entry(&new_entry(d, 1500, 1400)).unwrap();
        }
        assert_eq!(sync.snapshot().calorie_data.len(), 4);
        assert_eq!(sync.clear_all_calorie_data().unwrap(), 4);
        assert!(sync.snapshot().calorie_data.is_empty());
    }

    #[test]
    fn test_import_replaces_existing_entries() {
        let (_store, sync) = signed_in();
        let old_id = sync
            .add_calorie_entry(&new_entry("2024-05-01", 1500, 1200))
            .unwrap()
            .unwrap();

        let imported = vec![
            new_entry("2024-06-01", 1600, 1500),
            new_entry("2024-06-02", 1700, 1650),
        ];
        assert_eq!(sync.import_calorie_data(&imported).unwrap(), 2);

        let data = sync.snapshot();
        assert_eq!(data.calorie_data.len(), 2);
        assert!(data.calorie_data.iter().all(|e| e.id != old_id));
        let mut days: Vec<_> = data.calorie_data.iter().map(|e| e.day).collect();
        days.sort();
        assert_eq!(days, vec![day("2024-06-01"), day("2024-06-02")]);
    }

    #[test]
    fn test_out_of_range_calories_write_nothing() {
        let (store, sync) = signed_in();
        let id = sync
            .add_calorie_entry(&new_entry("2024-06-01", 1500, 1200))
            .unwrap()
            .unwrap();

        assert!(
            sync.add_calorie_entry(&new_entry("2024-06-02", 1500, i64::MAX))
                .is_err()
        );
        let patch = CalorieEntryPatch {
            exercise: Some(Some(-5)),
            ..Default::default()
        };
        assert!(sync.update_calorie_entry(&id, &patch).is_err());

        let imported = vec![
            new_entry("2024-06-03", 1600, 1500),
            new_entry("2024-06-04", -1, 1500),
        ];
        let err = sync.import_calorie_data(&imported).unwrap_err();
        assert!(format!("{err:#}").contains("Import row 2"));

        let stored = store.get_calorie_entries("u1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].exercise, None);
        assert_eq!(sync.snapshot().calorie_data, stored);
    }

    #[test]
    fn test_save_workout_data_roundtrip() {
        let (store, sync) = signed_in();
        let mut data = WorkoutData::default();
        data.set_day(
            day("2024-06-01"),
            WorkoutEntry {
                workout_type: WorkoutType::Pull,
                steps: Some(7000),
            },
        );
        data.set_day(
            day("2024-06-02"),
            WorkoutEntry {
                workout_type: WorkoutType::Rest,
                steps: None,
            },
        );
        sync.save_workout_data(&data).unwrap();
        assert_eq!(sync.snapshot().workout_data, data);

        data.remove_day(day("2024-06-01"));
        sync.save_workout_data(&data).unwrap();
        assert_eq!(store.get_workout_data("u1").unwrap().unwrap(), data);
        assert_eq!(sync.snapshot().workout_data, data);
    }

    #[test]
    fn test_log_workout_day_removes_trivial_day() {
        let (_store, sync) = signed_in();
        sync.log_workout_day(
            day("2024-06-01"),
            WorkoutEntry {
                workout_type: WorkoutType::Legs,
                steps: Some(5000),
            },
        )
        .unwrap();
        sync.log_workout_day(
            day("2024-06-02"),
            WorkoutEntry {
                workout_type: WorkoutType::Unset,
                steps: Some(3000),
            },
        )
        .unwrap();
        assert_eq!(sync.snapshot().workout_data.len(), 2);

        sync.log_workout_day(
            day("2024-06-01"),
            WorkoutEntry {
                workout_type: WorkoutType::Unset,
                steps: Some(0),
            },
        )
        .unwrap();
        let data = sync.snapshot().workout_data;
        assert_eq!(data.len(), 1);
        assert!(data.get(day("2024-06-01")).is_none());
    }

    #[test]
    fn test_log_workout_day_rejects_negative_steps() {
        let (_store, sync) = signed_in();
        let result = sync.log_workout_day(
            day("2024-06-01"),
            WorkoutEntry {
                workout_type: WorkoutType::Push,
                steps: Some(-10),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_weight_entries_mirrored() {
        let (_store, sync) = signed_in();
        let id = sync
            .save_weight_entry(&NewWeightEntry {
                date: day("2024-06-01"),
                weight: 180.5,
            })
            .unwrap()
            .unwrap();
        assert_eq!(sync.snapshot().weight_data.len(), 1);

        assert!(
            sync.save_weight_entry(&NewWeightEntry {
                date: day("2024-06-02"),
                weight: 0.0,
            })
            .is_err()
        );

        assert!(sync.delete_weight_entry(&id).unwrap());
        assert!(sync.snapshot().weight_data.is_empty());
    }

    #[test]
    fn test_settings_write_through() {
        let (store, sync) = signed_in();
        sync.set_maintenance_calories(2300).unwrap();

        let stored = store.get_settings("u1").unwrap().unwrap();
        assert_eq!(stored.maintenance_calories, Some(2300));
        assert_eq!(stored.step_goal, Some(10_000));
        assert_eq!(stored.weight_goal, Some(165));
        assert_eq!(sync.snapshot().settings.maintenance_calories, 2300);

        assert!(sync.set_weight_goal(0).is_err());
        assert_eq!(sync.snapshot().settings.weight_goal, 165);
    }

    #[test]
    fn test_partial_settings_document_falls_back_per_field() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .merge_settings(
                "u1",
                &Settings {
                    maintenance_calories: 2500,
                    ..Settings::default()
                },
            )
            .unwrap();
        let mut sync = DataSync::new(store);
        sync.on_auth_state_changed(Some(&user("u1"))).unwrap();
        let settings = sync.snapshot().settings;
        assert_eq!(settings.maintenance_calories, 2500);
        assert_eq!(settings.step_goal, 10_000);
    }

    #[test]
    fn test_sign_out_resets_to_defaults() {
        let (_store, mut sync) = signed_in();
        sync.set_step_goal(12_000).unwrap();
        sync.add_calorie_entry(&new_entry("2024-06-01", 1500, 1400))
            .unwrap();
        sync.save_weight_entry(&NewWeightEntry {
            date: day("2024-06-01"),
            weight: 170.0,
        })
        .unwrap();

        sync.on_auth_state_changed(None).unwrap();
        let data = sync.snapshot();
        assert_eq!(data.settings.maintenance_calories, 2000);
        assert_eq!(data.settings.step_goal, 10_000);
        assert_eq!(data.settings.weight_goal, 165);
        assert!(data.calorie_data.is_empty());
        assert!(data.workout_data.is_empty());
        assert!(data.weight_data.is_empty());
    }

    #[test]
    fn test_switching_users_isolates_data() {
        let (store, mut sync) = signed_in();
        sync.add_calorie_entry(&new_entry("2024-06-01", 1500, 1400))
            .unwrap();

        sync.on_auth_state_changed(Some(&user("u2"))).unwrap();
        assert!(sync.snapshot().calorie_data.is_empty());

        // Writes for the previous user must not reach the new session.
        store
            .add_calorie_entry("u1", &new_entry("2024-06-02", 1500, 1400))
            .unwrap();
        assert!(sync.snapshot().calorie_data.is_empty());
        assert_eq!(sync.current_user().unwrap().uid, "u2");
    }

    struct FailingStore;

    impl RemoteStore for FailingStore {
        fn watch(&self, _: &str, _: Collection, _: Listener) -> Result<Subscription> {
            Ok(Subscription::detached())
        }
        fn read(&self, _: &str, _: Collection) -> Result<Snapshot> {
            anyhow::bail!("offline")
        }
        fn merge_settings(&self, _: &str, _: &Settings) -> Result<()> {
            anyhow::bail!("offline")
        }
        fn add_calorie_entry(&self, _: &str, _: &NewCalorieEntry) -> Result<String> {
            anyhow::bail!("offline")
        }
        fn update_calorie_entry(&self, _: &str, _: &str, _: &CalorieEntryPatch) -> Result<bool> {
            anyhow::bail!("offline")
        }
        fn delete_calorie_entry(&self, _: &str, _: &str) -> Result<bool> {
            anyhow::bail!("offline")
        }
        fn calorie_entry_ids(&self, _: &str) -> Result<Vec<String>> {
            anyhow::bail!("offline")
        }
        fn delete_calorie_entries(&self, _: &str, _: &[String]) -> Result<usize> {
            anyhow::bail!("offline")
        }
        fn create_calorie_entries(&self, _: &str, _: &[NewCalorieEntry]) -> Result<Vec<String>> {
            anyhow::bail!("offline")
        }
        fn set_workout_data(&self, _: &str, _: &WorkoutData) -> Result<()> {
            anyhow::bail!("offline")
        }
        fn add_weight_entry(&self, _: &str, _: &NewWeightEntry) -> Result<String> {
            anyhow::bail!("offline")
        }
        fn delete_weight_entry(&self, _: &str, _: &str) -> Result<bool> {
            anyhow::bail!("offline")
        }
    }

    #[test]
    fn test_store_failures_reach_the_caller() {
        let mut sync = DataSync::new(Arc::new(FailingStore));
        sync.on_auth_state_changed(Some(&user("u1"))).unwrap();

        let err = sync
            .add_default_calorie_entry(day("2024-06-01"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to add calorie entry"));
        assert!(sync.import_calorie_data(&[]).is_err());
    }

    #[test]
    fn test_failed_settings_write_leaves_mirror_unchanged() {
        let mut sync = DataSync::new(Arc::new(FailingStore));
        sync.on_auth_state_changed(Some(&user("u1"))).unwrap();

        let err = sync.set_step_goal(9000).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to save settings"));
        assert_eq!(sync.snapshot().settings, Settings::default());
    }
}
