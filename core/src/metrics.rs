//! Values derived from the raw entries: calorie balance, progress toward the
//! daily goals, monthly workout consistency and the trend series.

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use crate::models::{AppData, CalorieEntry, WeightEntry, WorkoutData, WorkoutType};

/// Number of weight entries shown in the dashboard trend.
pub const WEIGHT_TREND_LEN: usize = 30;

/// `intake - exercise`, with absent values counted as 0. Saturates rather
/// than overflowing on rows written before values were bounded.
#[must_use]
pub fn net(entry: &CalorieEntry) -> i64 {
    entry
        .intake
        .unwrap_or(0)
        .saturating_sub(entry.exercise.unwrap_or(0))
}

/// `target - net`. Positive means the day finished under target.
#[must_use]
pub fn plus_minus(entry: &CalorieEntry) -> i64 {
    entry.target.unwrap_or(0).saturating_sub(net(entry))
}

/// Surplus (positive) or deficit (negative) against maintenance.
#[must_use]
pub fn gained(entry: &CalorieEntry, maintenance_calories: i64) -> i64 {
    net(entry).saturating_sub(maintenance_calories)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalorieBalance {
    pub net: i64,
    pub plus_minus: i64,
    pub gained: i64,
}

impl CalorieBalance {
    #[must_use]
    pub fn of(entry: &CalorieEntry, maintenance_calories: i64) -> Self {
        Self {
            net: net(entry),
            plus_minus: plus_minus(entry),
            gained: gained(entry, maintenance_calories),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(value: i64, goal: i64) -> f64 {
    if goal > 0 {
        value as f64 / goal as f64 * 100.0
    } else {
        0.0
    }
}

/// The first entry logged for `day`, if any.
#[must_use]
pub fn entry_for_day(calorie_data: &[CalorieEntry], day: NaiveDate) -> Option<&CalorieEntry> {
    calorie_data.iter().find(|e| e.day == day)
}

/// Target for `day`: the entry's own target, or maintenance when there is no
/// entry or it has no target.
#[must_use]
pub fn calorie_target(calorie_data: &[CalorieEntry], day: NaiveDate, maintenance_calories: i64) -> i64 {
    entry_for_day(calorie_data, day)
        .and_then(|e| e.target)
        .unwrap_or(maintenance_calories)
}

#[must_use]
pub fn calorie_progress(calorie_data: &[CalorieEntry], day: NaiveDate, maintenance_calories: i64) -> f64 {
    let intake = entry_for_day(calorie_data, day)
        .and_then(|e| e.intake)
        .unwrap_or(0);
    percent(intake, calorie_target(calorie_data, day, maintenance_calories))
}

#[must_use]
pub fn steps_on(workout_data: &WorkoutData, day: NaiveDate) -> i64 {
    workout_data.get(day).and_then(|e| e.steps).unwrap_or(0)
}

#[must_use]
pub fn step_progress(workout_data: &WorkoutData, day: NaiveDate, step_goal: i64) -> f64 {
    percent(steps_on(workout_data, day), step_goal)
}

fn first_of_month(month: NaiveDate) -> NaiveDate {
    month.with_day(1).unwrap_or(month)
}

/// Number of days in the month containing `month`.
#[allow(clippy::cast_sign_loss)]
#[must_use]
pub fn days_in_month(month: NaiveDate) -> u32 {
    let start = first_of_month(month);
    start
        .checked_add_months(Months::new(1))
        .map_or(31, |next| (next - start).num_days() as u32)
}

/// Every date of the month containing `month`, in order.
pub fn month_days(month: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let start = first_of_month(month);
    start.iter_days().take(days_in_month(month) as usize)
}

/// Percentage of days in the month with a logged workout or steps, rounded.
#[allow(clippy::cast_sign_loss)]
#[must_use]
pub fn consistency_score(workout_data: &WorkoutData, month: NaiveDate) -> u32 {
    let total = days_in_month(month);
    if total == 0 {
        return 0;
    }
    let logged = month_days(month)
        .filter(|d| workout_data.get(*d).is_some_and(|e| e.is_logged()))
        .count();
    (f64::from(logged as u32) * 100.0 / f64::from(total)).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlusMinusPoint {
    pub date: NaiveDate,
    pub plus_minus: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightPoint {
    pub date: NaiveDate,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepsPoint {
    pub date: NaiveDate,
    pub steps: i64,
}

#[must_use]
pub fn plus_minus_trend(calorie_data: &[CalorieEntry]) -> Vec<PlusMinusPoint> {
    let mut points: Vec<PlusMinusPoint> = calorie_data
        .iter()
        .map(|e| PlusMinusPoint {
            date: e.day,
            plus_minus: plus_minus(e),
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

#[must_use]
pub fn weight_trend(weight_data: &[WeightEntry]) -> Vec<WeightPoint> {
    let mut points: Vec<WeightPoint> = weight_data
        .iter()
        .map(|e| WeightPoint {
            date: e.date,
            weight: e.weight,
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

/// Steps for every day of the month; days without an entry report 0.
#[must_use]
pub fn monthly_steps(workout_data: &WorkoutData, month: NaiveDate) -> Vec<StepsPoint> {
    month_days(month)
        .map(|date| StepsPoint {
            date,
            steps: steps_on(workout_data, date),
        })
        .collect()
}

/// The most recent weigh-in by date.
#[must_use]
pub fn latest_weight(weight_data: &[WeightEntry]) -> Option<&WeightEntry> {
    weight_data.iter().max_by_key(|e| e.date)
}

/// Weight entries newest first, the order the weight log is listed in.
#[must_use]
pub fn weight_log(weight_data: &[WeightEntry]) -> Vec<WeightEntry> {
    let mut entries = weight_data.to_vec();
    entries.sort_by(|a, b| b.date.cmp(&a.date));
    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub date: NaiveDate,
    pub calories_today: i64,
    pub calorie_target: i64,
    pub calorie_progress: f64,
    pub steps_today: i64,
    pub step_goal: i64,
    pub step_progress: f64,
    pub current_weight: Option<f64>,
    pub weight_goal: i64,
    /// Current weight minus the goal; positive means above goal.
    pub to_goal: Option<f64>,
    pub workout_today: String,
    pub consistency_month: NaiveDate,
    pub consistency_score: u32,
    pub plus_minus_trend: Vec<PlusMinusPoint>,
    pub weight_trend: Vec<WeightPoint>,
}

#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn build_dashboard(data: &AppData, today: NaiveDate, month: NaiveDate) -> DashboardSummary {
    let settings = data.settings;
    let current_weight = latest_weight(&data.weight_data).map(|e| e.weight);

    let workout_today = match data.workout_data.get(today).map(|e| e.workout_type) {
        None | Some(WorkoutType::Unset) => WorkoutType::Rest.as_str().to_string(),
        Some(t) => t.as_str().to_string(),
    };

    let mut weight_trend = weight_trend(&data.weight_data);
    if weight_trend.len() > WEIGHT_TREND_LEN {
        weight_trend.drain(..weight_trend.len() - WEIGHT_TREND_LEN);
    }

    DashboardSummary {
        date: today,
        calories_today: entry_for_day(&data.calorie_data, today)
            .and_then(|e| e.intake)
            .unwrap_or(0),
        calorie_target: calorie_target(&data.calorie_data, today, settings.maintenance_calories),
        calorie_progress: calorie_progress(&data.calorie_data, today, settings.maintenance_calories),
        steps_today: steps_on(&data.workout_data, today),
        step_goal: settings.step_goal,
        step_progress: step_progress(&data.workout_data, today, settings.step_goal),
        current_weight,
        weight_goal: settings.weight_goal,
        to_goal: current_weight.map(|w| w - settings.weight_goal as f64),
        workout_today,
        consistency_month: first_of_month(month),
        consistency_score: consistency_score(&data.workout_data, month),
        plus_minus_trend: plus_minus_trend(&data.calorie_data),
        weight_trend,
    }
}
