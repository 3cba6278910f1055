//! The remote document store contract.
//!
//! Each user owns four streams: a settings document, a calorie-entries
//! collection, a single workout document, and a weight-entries collection.
//! Watching a stream delivers its full current contents once on subscribe and
//! again after every committed change.

use std::sync::Arc;

use anyhow::Result;

use crate::models::{
    CalorieEntry, CalorieEntryPatch, NewCalorieEntry, NewWeightEntry, Settings, StoredSettings,
    WeightEntry, WorkoutData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Settings,
    CalorieEntries,
    WorkoutData,
    WeightEntries,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Settings,
        Collection::CalorieEntries,
        Collection::WorkoutData,
        Collection::WeightEntries,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Collection::Settings => "settings",
            Collection::CalorieEntries => "calorieData",
            Collection::WorkoutData => "workoutData",
            Collection::WeightEntries => "weightData",
        }
    }
}

/// Full contents of one stream at a point in time.
///
/// Missing documents are `None`; empty collections are empty vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Settings(Option<StoredSettings>),
    CalorieEntries(Vec<CalorieEntry>),
    WorkoutData(Option<WorkoutData>),
    WeightEntries(Vec<WeightEntry>),
}

impl Snapshot {
    #[must_use]
    pub fn collection(&self) -> Collection {
        match self {
            Snapshot::Settings(_) => Collection::Settings,
            Snapshot::CalorieEntries(_) => Collection::CalorieEntries,
            Snapshot::WorkoutData(_) => Collection::WorkoutData,
            Snapshot::WeightEntries(_) => Collection::WeightEntries,
        }
    }
}

pub type Listener = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Guard for a live listener. Dropping it (or calling [`Subscription::cancel`])
/// stops delivery; a notification already in flight may still arrive once.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Per-user document store with push notifications.
///
/// Implementations must make `delete_calorie_entries` and
/// `create_calorie_entries` atomic: readers observe either none or all of the
/// batch.
pub trait RemoteStore: Send + Sync {
    fn watch(&self, uid: &str, collection: Collection, listener: Listener)
    -> Result<Subscription>;

    fn read(&self, uid: &str, collection: Collection) -> Result<Snapshot>;

    /// Push fresh snapshots to every watcher when another writer has changed
    /// the store since the last check. Returns whether anything was pushed.
    /// Stores that see every write themselves have nothing to do.
    fn refresh(&self) -> Result<bool> {
        Ok(false)
    }

    /// Merge-write every field of `settings` into the settings document.
    fn merge_settings(&self, uid: &str, settings: &Settings) -> Result<()>;

    fn add_calorie_entry(&self, uid: &str, entry: &NewCalorieEntry) -> Result<String>;

    /// Merge the named fields into an existing entry. Returns `false` without
    /// writing anything when `id` does not exist.
    fn update_calorie_entry(&self, uid: &str, id: &str, patch: &CalorieEntryPatch)
    -> Result<bool>;

    fn delete_calorie_entry(&self, uid: &str, id: &str) -> Result<bool>;

    fn calorie_entry_ids(&self, uid: &str) -> Result<Vec<String>>;

    fn delete_calorie_entries(&self, uid: &str, ids: &[String]) -> Result<usize>;

    fn create_calorie_entries(&self, uid: &str, entries: &[NewCalorieEntry])
    -> Result<Vec<String>>;

    /// Replace the whole workout document.
    fn set_workout_data(&self, uid: &str, data: &WorkoutData) -> Result<()>;

    fn add_weight_entry(&self, uid: &str, entry: &NewWeightEntry) -> Result<String>;

    fn delete_weight_entry(&self, uid: &str, id: &str) -> Result<bool>;
}
