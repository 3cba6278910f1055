use std::collections::BTreeMap;
use std::collections::btree_map;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_MAINTENANCE_CALORIES: i64 = 2000;
pub const DEFAULT_STEP_GOAL: i64 = 10_000;
pub const DEFAULT_WEIGHT_GOAL: i64 = 165;

/// Target assigned to a calorie entry created with the "add entry" action.
pub const DEFAULT_ENTRY_TARGET: i64 = 1500;

pub const DAY_FORMAT: &str = "%Y-%m-%d";
/// Largest value accepted for a calorie target, exercise or intake.
pub const MAX_CALORIES: i64 = 100_000;
/// Largest step count accepted for one day.
pub const MAX_STEPS: i64 = 1_000_000;

// --- Calorie entries ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieEntry {
    pub id: String,
    pub day: NaiveDate,
    pub target: Option<i64>,
    pub exercise: Option<i64>,
    pub intake: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCalorieEntry {
    pub day: NaiveDate,
    #[serde(default)]
    pub target: Option<i64>,
    #[serde(default)]
    pub exercise: Option<i64>,
    #[serde(default)]
    pub intake: Option<i64>,
}

impl NewCalorieEntry {
    /// The entry created by the "add entry" action: today's date, the default
    /// target, and nothing logged yet.
    #[must_use]
    pub fn blank(day: NaiveDate) -> Self {
        Self {
            day,
            target: Some(DEFAULT_ENTRY_TARGET),
            exercise: None,
            intake: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_calories("Target", self.target)?;
        validate_calories("Exercise", self.exercise)?;
        validate_calories("Intake", self.intake)
    }
}

impl From<CalorieEntry> for NewCalorieEntry {
    fn from(entry: CalorieEntry) -> Self {
        Self {
            day: entry.day,
            target: entry.target,
            exercise: entry.exercise,
            intake: entry.intake,
        }
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Partial update of a calorie entry. `None` leaves a field untouched,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::option_option)]
pub struct CalorieEntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<Option<i64>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub exercise: Option<Option<i64>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub intake: Option<Option<i64>>,
}

impl CalorieEntryPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.day.is_none() && self.target.is_none() && self.exercise.is_none() && self.intake.is_none()
    }

    /// Checks the values being set; clearing a field is always allowed.
    pub fn validate(&self) -> Result<()> {
        validate_calories("Target", self.target.flatten())?;
        validate_calories("Exercise", self.exercise.flatten())?;
        validate_calories("Intake", self.intake.flatten())
    }

    pub fn apply_to(&self, entry: &mut CalorieEntry) {
        if let Some(day) = self.day {
            entry.day = day;
        }
        if let Some(target) = self.target {
            entry.target = target;
        }
        if let Some(exercise) = self.exercise {
            entry.exercise = exercise;
        }
        if let Some(intake) = self.intake {
            entry.intake = intake;
        }
    }
}

// --- Workouts ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkoutType {
    Push,
    Pull,
    Legs,
    Rest,
    #[default]
    #[serde(rename = "")]
    Unset,
}

impl WorkoutType {
    pub const ALL: [WorkoutType; 5] = [
        WorkoutType::Push,
        WorkoutType::Pull,
        WorkoutType::Legs,
        WorkoutType::Rest,
        WorkoutType::Unset,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkoutType::Push => "Push",
            WorkoutType::Pull => "Pull",
            WorkoutType::Legs => "Legs",
            WorkoutType::Rest => "Rest",
            WorkoutType::Unset => "",
        }
    }
}

impl std::fmt::Display for WorkoutType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkoutType::Unset => f.write_str("None"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::str::FromStr for WorkoutType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "push" => Ok(WorkoutType::Push),
            "pull" => Ok(WorkoutType::Pull),
            "legs" => Ok(WorkoutType::Legs),
            "rest" => Ok(WorkoutType::Rest),
            "" | "none" => Ok(WorkoutType::Unset),
            _ => bail!("Invalid workout type '{s}'. Must be one of: push, pull, legs, rest, none"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutEntry {
    #[serde(rename = "type", default)]
    pub workout_type: WorkoutType,
    #[serde(default)]
    pub steps: Option<i64>,
}

impl WorkoutEntry {
    /// A day counts as logged when it has a workout type or a positive step count.
    #[must_use]
    pub fn is_logged(&self) -> bool {
        self.workout_type != WorkoutType::Unset || self.steps.unwrap_or(0) > 0
    }
}

/// Per-day workout log, keyed by calendar date.
///
/// Days that carry neither a workout type nor a positive step count are never
/// stored: inserting one removes the day instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<NaiveDate, WorkoutEntry>")]
pub struct WorkoutData(BTreeMap<NaiveDate, WorkoutEntry>);

impl From<BTreeMap<NaiveDate, WorkoutEntry>> for WorkoutData {
    fn from(map: BTreeMap<NaiveDate, WorkoutEntry>) -> Self {
        map.into_iter().collect()
    }
}

impl FromIterator<(NaiveDate, WorkoutEntry)> for WorkoutData {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, WorkoutEntry)>>(iter: I) -> Self {
        let mut data = WorkoutData::default();
        for (day, entry) in iter {
            data.set_day(day, entry);
        }
        data
    }
}

impl WorkoutData {
    #[must_use]
    pub fn get(&self, day: NaiveDate) -> Option<&WorkoutEntry> {
        self.0.get(&day)
    }

    /// Store `entry` for `day`, or drop the day when the entry is empty.
    pub fn set_day(&mut self, day: NaiveDate, entry: WorkoutEntry) {
        if entry.is_logged() {
            self.0.insert(day, entry);
        } else {
            self.0.remove(&day);
        }
    }

    pub fn remove_day(&mut self, day: NaiveDate) -> Option<WorkoutEntry> {
        self.0.remove(&day)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, NaiveDate, WorkoutEntry> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a WorkoutData {
    type Item = (&'a NaiveDate, &'a WorkoutEntry);
    type IntoIter = btree_map::Iter<'a, NaiveDate, WorkoutEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// --- Weight ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: String,
    pub date: NaiveDate,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWeightEntry {
    pub date: NaiveDate,
    pub weight: f64,
}

// --- Settings ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub maintenance_calories: i64,
    pub step_goal: i64,
    pub weight_goal: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            maintenance_calories: DEFAULT_MAINTENANCE_CALORIES,
            step_goal: DEFAULT_STEP_GOAL,
            weight_goal: DEFAULT_WEIGHT_GOAL,
        }
    }
}

/// Settings document as it exists in the store, where any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_calories: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_goal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_goal: Option<i64>,
}

impl StoredSettings {
    /// Fill missing fields from the defaults.
    #[must_use]
    pub fn resolve(self) -> Settings {
        let defaults = Settings::default();
        Settings {
            maintenance_calories: self
                .maintenance_calories
                .unwrap_or(defaults.maintenance_calories),
            step_goal: self.step_goal.unwrap_or(defaults.step_goal),
            weight_goal: self.weight_goal.unwrap_or(defaults.weight_goal),
        }
    }

    /// Merge `other` over `self`: fields present in `other` win.
    #[must_use]
    pub fn merged(self, other: StoredSettings) -> StoredSettings {
        StoredSettings {
            maintenance_calories: other.maintenance_calories.or(self.maintenance_calories),
            step_goal: other.step_goal.or(self.step_goal),
            weight_goal: other.weight_goal.or(self.weight_goal),
        }
    }
}

impl From<Settings> for StoredSettings {
    fn from(s: Settings) -> Self {
        Self {
            maintenance_calories: Some(s.maintenance_calories),
            step_goal: Some(s.step_goal),
            weight_goal: Some(s.weight_goal),
        }
    }
}

// --- Aggregate ---

/// Everything the signed-in user sees, mirrored from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppData {
    pub calorie_data: Vec<CalorieEntry>,
    pub workout_data: WorkoutData,
    pub weight_data: Vec<WeightEntry>,
    pub settings: Settings,
}

// --- Validation ---

pub fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DAY_FORMAT)
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}'. Must be YYYY-MM-DD"))
}

#[must_use]
pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight <= 0.0 {
        bail!("Weight must be greater than 0");
    }
    Ok(())
}

pub fn validate_setting(name: &str, value: i64) -> Result<()> {
    if value <= 0 {
        bail!("{name} must be greater than 0 (got {value})");
    }
    Ok(())
}

pub fn validate_calories(name: &str, value: Option<i64>) -> Result<()> {
    if let Some(v) = value {
        if !(0..=MAX_CALORIES).contains(&v) {
            bail!("{name} must be between 0 and {MAX_CALORIES} (got {v})");
        }
    }
    Ok(())
}

pub fn validate_steps(steps: Option<i64>) -> Result<()> {
    if steps.is_some_and(|s| s < 0) {
        bail!("Steps must not be negative");
    }
    if steps.is_some_and(|s| s > MAX_STEPS) {
        bail!("Steps must be at most {MAX_STEPS}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    #[test]
    fn test_blank_entry_uses_default_target() {
        let entry = NewCalorieEntry::blank(day("2024-06-15"));
        assert_eq!(entry.target, Some(1500));
        assert!(entry.exercise.is_none());
        assert!(entry.intake.is_none());
    }

    #[test]
    fn test_patch_applies_only_named_fields() {
        let mut entry = CalorieEntry {
            id: "a".to_string(),
            day: day("2024-06-15"),
            target: Some(1500),
            exercise: Some(200),
            intake: Some(1700),
        };
        let patch = CalorieEntryPatch {
            intake: Some(Some(1200)),
            exercise: Some(None),
            ..Default::default()
        };
        patch.apply_to(&mut entry);
        assert_eq!(entry.intake, Some(1200));
        assert_eq!(entry.exercise, None);
        assert_eq!(entry.target, Some(1500));
        assert_eq!(entry.day, day("2024-06-15"));
    }

    #[test]
    fn test_patch_json_distinguishes_null_from_missing() {
        let patch: CalorieEntryPatch = serde_json::from_str(r#"{"intake": null}"#).unwrap();
        assert_eq!(patch.intake, Some(None));
        assert_eq!(patch.target, None);
        assert!(!patch.is_empty());

        let empty: CalorieEntryPatch = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_workout_type_wire_format() {
        assert_eq!(serde_json::to_string(&WorkoutType::Push).unwrap(), "\"Push\"");
        assert_eq!(serde_json::to_string(&WorkoutType::Unset).unwrap(), "\"\"");
        let parsed: WorkoutType = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, WorkoutType::Unset);
    }

    #[test]
    fn test_workout_type_from_str() {
        assert_eq!("legs".parse::<WorkoutType>().unwrap(), WorkoutType::Legs);
        assert_eq!("PULL".parse::<WorkoutType>().unwrap(), WorkoutType::Pull);
        assert_eq!("none".parse::<WorkoutType>().unwrap(), WorkoutType::Unset);
        assert!("cardio".parse::<WorkoutType>().is_err());
    }

    #[test]
    fn test_set_day_drops_empty_entries() {
        let mut data = WorkoutData::default();
        data.set_day(
            day("2024-06-15"),
            WorkoutEntry {
                workout_type: WorkoutType::Push,
                steps: None,
            },
        );
        assert_eq!(data.len(), 1);

        data.set_day(
            day("2024-06-15"),
            WorkoutEntry {
                workout_type: WorkoutType::Unset,
                steps: Some(0),
            },
        );
        assert!(data.is_empty());
    }

    #[test]
    fn test_steps_only_entry_is_kept() {
        let mut data = WorkoutData::default();
        data.set_day(
            day("2024-06-16"),
            WorkoutEntry {
                workout_type: WorkoutType::Unset,
                steps: Some(4200),
            },
        );
        assert_eq!(data.get(day("2024-06-16")).unwrap().steps, Some(4200));
    }

    #[test]
    fn test_workout_data_json_roundtrip_filters_empty_days() {
        let json = r#"{
            "2024-06-15": {"type": "Legs", "steps": 8000},
            "2024-06-16": {"type": "", "steps": null}
        }"#;
        let data: WorkoutData = serde_json::from_str(json).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(
            data.get(day("2024-06-15")).unwrap().workout_type,
            WorkoutType::Legs
        );
    }

    #[test]
    fn test_workout_data_rejects_malformed_day_key() {
        let json = r#"{"June 15": {"type": "Legs", "steps": 8000}}"#;
        assert!(serde_json::from_str::<WorkoutData>(json).is_err());
    }

    #[test]
    fn test_stored_settings_fall_back_per_field() {
        let stored = StoredSettings {
            maintenance_calories: None,
            step_goal: Some(8000),
            weight_goal: None,
        };
        let settings = stored.resolve();
        assert_eq!(settings.maintenance_calories, 2000);
        assert_eq!(settings.step_goal, 8000);
        assert_eq!(settings.weight_goal, 165);
    }

    #[test]
    fn test_stored_settings_merge() {
        let base = StoredSettings {
            maintenance_calories: Some(2500),
            step_goal: Some(9000),
            weight_goal: None,
        };
        let merged = base.merged(StoredSettings {
            step_goal: Some(12_000),
            ..Default::default()
        });
        assert_eq!(merged.maintenance_calories, Some(2500));
        assert_eq!(merged.step_goal, Some(12_000));
        assert_eq!(merged.weight_goal, None);
    }

    #[test]
    fn test_settings_wire_names_are_camel_case() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["maintenanceCalories"], 2000);
        assert_eq!(json["stepGoal"], 10_000);
        assert_eq!(json["weightGoal"], 165);
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2024-01-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
        assert!(parse_day("01/05/2024").is_err());
        assert!(parse_day("2024-02-30").is_err());
    }

    #[test]
    fn test_validate_weight() {
        assert!(validate_weight(165.5).is_ok());
        assert!(validate_weight(0.0).is_err());
        assert!(validate_weight(-3.0).is_err());
        assert!(validate_weight(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_setting() {
        assert!(validate_setting("stepGoal", 10_000).is_ok());
        assert!(validate_setting("stepGoal", 0).is_err());
        assert!(validate_setting("stepGoal", -5).is_err());
    }

    #[test]
    fn test_validate_calories() {
        assert!(validate_calories("Intake", None).is_ok());
        assert!(validate_calories("Intake", Some(0)).is_ok());
        assert!(validate_calories("Intake", Some(MAX_CALORIES)).is_ok());
        assert!(validate_calories("Intake", Some(-1)).is_err());
        assert!(validate_calories("Intake", Some(i64::MAX)).is_err());

        let mut entry = NewCalorieEntry::blank(day("2024-06-15"));
        assert!(entry.validate().is_ok());
        entry.exercise = Some(-5);
        let err = entry.validate().unwrap_err();
        assert!(err.to_string().contains("Exercise"));

        let clear = CalorieEntryPatch {
            intake: Some(None),
            ..Default::default()
        };
        assert!(clear.validate().is_ok());
        let huge = CalorieEntryPatch {
            intake: Some(Some(i64::MAX)),
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_validate_steps_bounds() {
        assert!(validate_steps(None).is_ok());
        assert!(validate_steps(Some(MAX_STEPS)).is_ok());
        assert!(validate_steps(Some(MAX_STEPS + 1)).is_err());
        assert!(validate_steps(Some(-1)).is_err());
    }
}
