use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::auth::{AuthError, AuthProvider, LocalAuth, User};
use crate::calorie_csv;
use crate::db::SqliteStore;
use crate::metrics::{self, DashboardSummary};
use crate::models::{
    AppData, CalorieEntryPatch, NewCalorieEntry, NewWeightEntry, Settings, StoredSettings,
    WorkoutData, WorkoutEntry,
};
use crate::store::{RemoteStore, Subscription};
use crate::sync::DataSync;

/// Entry point for the CLI and the server: auth plus the live data mirror.
///
/// The sync layer follows the auth provider. Signing in starts a session,
/// signing out drops it.
pub struct StrideService {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn RemoteStore>,
    sync: Arc<Mutex<DataSync>>,
    _auth_watch: Subscription,
}

impl StrideService {
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = SqliteStore::open(db_path)?;
        let auth = LocalAuth::open(db_path)?;
        Ok(Self::with_backends(Arc::new(store), Arc::new(auth)))
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = SqliteStore::open_in_memory()?;
        let auth = LocalAuth::open_in_memory()?;
        Ok(Self::with_backends(Arc::new(store), Arc::new(auth)))
    }

    pub fn with_backends(store: Arc<dyn RemoteStore>, auth: Arc<dyn AuthProvider>) -> Self {
        let sync = Arc::new(Mutex::new(DataSync::new(Arc::clone(&store))));
        let follower = Arc::clone(&sync);
        let auth_watch = auth.on_auth_state_changed(Arc::new(move |user: Option<&User>| {
            let mut sync = follower.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = sync.on_auth_state_changed(user) {
                tracing::error!("Failed to start session: {e:#}");
            }
        }));
        Self {
            auth,
            store,
            sync,
            _auth_watch: auth_watch,
        }
    }

    // Never call into `auth` while holding this guard: auth listeners lock it too.
    fn sync(&self) -> MutexGuard<'_, DataSync> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Auth ---

    pub fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self.auth.sign_up(email, password)?;
        self.ensure_session(&user)?;
        Ok(user)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self.auth.sign_in(email, password)?;
        self.ensure_session(&user)?;
        Ok(user)
    }

    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.auth.sign_out()
    }

    fn ensure_session(&self, user: &User) -> Result<(), AuthError> {
        if self.sync().current_user().is_some_and(|u| u.uid == user.uid) {
            Ok(())
        } else {
            Err(AuthError::Other(anyhow::anyhow!(
                "Signed in as {} but failed to load their data",
                user.email
            )))
        }
    }

    /// Catch up with writes other processes made to the shared database:
    /// the signed-in identity first, then the data streams.
    pub fn refresh(&self) -> Result<()> {
        self.auth
            .refresh()
            .context("Failed to reload sign-in state")?;
        self.store.refresh().context("Failed to reload data")?;
        Ok(())
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.sync().current_user().cloned()
    }

    pub fn require_user(&self) -> Result<User> {
        match self.current_user() {
            Some(user) => Ok(user),
            None => bail!("Not signed in. Run `stride auth sign-in` first"),
        }
    }

    // --- Reads ---

    #[must_use]
    pub fn data(&self) -> AppData {
        self.sync().snapshot()
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.data().settings
    }

    #[must_use]
    pub fn dashboard(&self, today: NaiveDate, month: NaiveDate) -> DashboardSummary {
        metrics::build_dashboard(&self.data(), today, month)
    }

    // --- Calorie entries ---

    pub fn add_calorie_entry(&self, entry: &NewCalorieEntry) -> Result<Option<String>> {
        self.sync().add_calorie_entry(entry)
    }

    pub fn add_default_calorie_entry(&self, today: NaiveDate) -> Result<Option<String>> {
        self.sync().add_default_calorie_entry(today)
    }

    pub fn update_calorie_entry(&self, id: &str, patch: &CalorieEntryPatch) -> Result<bool> {
        self.sync().update_calorie_entry(id, patch)
    }

    pub fn delete_calorie_entry(&self, id: &str) -> Result<bool> {
        self.sync().delete_calorie_entry(id)
    }

    pub fn clear_all_calorie_data(&self) -> Result<usize> {
        self.sync().clear_all_calorie_data()
    }

    pub fn import_calorie_data(&self, entries: &[NewCalorieEntry]) -> Result<usize> {
        self.sync().import_calorie_data(entries)
    }

    /// Parse a calorie CSV and replace all entries with its rows. Nothing is
    /// written when the file does not parse.
    pub fn import_calorie_csv<R: Read>(&self, reader: R, today: NaiveDate) -> Result<usize> {
        let entries = match calorie_csv::parse_calorie_csv(reader, today) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Calorie import rejected: {e:#}");
                return Err(e.context("Failed to import calorie data"));
            }
        };
        self.import_calorie_data(&entries)
    }

    pub fn export_calorie_csv<W: Write>(&self, writer: W) -> Result<()> {
        let data = self.data();
        calorie_csv::write_calorie_csv(
            writer,
            &data.calorie_data,
            data.settings.maintenance_calories,
        )
        .context("Failed to export calorie data")
    }

    // --- Workouts ---

    pub fn save_workout_data(&self, data: &WorkoutData) -> Result<()> {
        self.sync().save_workout_data(data)
    }

    pub fn log_workout_day(&self, day: NaiveDate, entry: WorkoutEntry) -> Result<()> {
        self.sync().log_workout_day(day, entry)
    }

    // --- Weight ---

    pub fn save_weight_entry(&self, entry: &NewWeightEntry) -> Result<Option<String>> {
        self.sync().save_weight_entry(entry)
    }

    pub fn delete_weight_entry(&self, id: &str) -> Result<bool> {
        self.sync().delete_weight_entry(id)
    }

    // --- Settings ---

    pub fn set_maintenance_calories(&self, value: i64) -> Result<()> {
        self.sync().set_maintenance_calories(value)
    }

    pub fn set_step_goal(&self, value: i64) -> Result<()> {
        self.sync().set_step_goal(value)
    }

    pub fn set_weight_goal(&self, value: i64) -> Result<()> {
        self.sync().set_weight_goal(value)
    }

    pub fn update_settings(&self, changes: StoredSettings) -> Result<()> {
        self.sync().update_settings(changes)
    }
}
