use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::metrics;
use stride_core::models::{WorkoutEntry, WorkoutType, format_day};
use stride_core::service::StrideService;

use super::helpers::{json_error, parse_date, parse_month};

pub(crate) fn cmd_workout_log(
    svc: &StrideService,
    date: Option<String>,
    workout_type: Option<&str>,
    steps: Option<i64>,
    clear: bool,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    let date = parse_date(date)?;

    let entry = if clear {
        WorkoutEntry::default()
    } else {
        if workout_type.is_none() && steps.is_none() {
            bail!("Nothing to log. Provide --type, --steps, or --clear");
        }
        let existing = svc
            .data()
            .workout_data
            .get(date)
            .copied()
            .unwrap_or_default();
        WorkoutEntry {
            workout_type: match workout_type {
                Some(t) => t.parse::<WorkoutType>()?,
                None => existing.workout_type,
            },
            steps: steps.or(existing.steps),
        }
    };

    svc.log_workout_day(date, entry)?;
    let saved = svc.data().workout_data.get(date).copied();

    if json {
        println!(
            "{}",
            serde_json::json!({ "date": format_day(date), "entry": saved })
        );
    } else if let Some(e) = saved {
        let steps = e.steps.map_or_else(|| "-".to_string(), |s| s.to_string());
        println!("Logged {} for {}: {} steps", e.workout_type, format_day(date), steps);
    } else {
        println!("Cleared {}", format_day(date));
    }
    Ok(())
}

pub(crate) fn cmd_workout_show(svc: &StrideService, date: Option<String>, json: bool) -> Result<()> {
    svc.require_user()?;
    let date = parse_date(date)?;
    let data = svc.data();

    if let Some(e) = data.workout_data.get(date) {
        if json {
            println!("{}", serde_json::to_string_pretty(e)?);
        } else {
            let goal = data.settings.step_goal;
            let steps = e.steps.unwrap_or(0);
            let pct = metrics::step_progress(&data.workout_data, date, goal);
            println!("{}: {}", format_day(date), e.workout_type);
            println!("  Steps: {steps} / {goal} ({pct:.0}%)");
        }
        Ok(())
    } else {
        let date_str = format_day(date);
        if json {
            println!("{}", json_error(&format!("No workout logged for {date_str}")));
        } else {
            eprintln!("No workout logged for {date_str}");
        }
        process::exit(2);
    }
}

pub(crate) fn cmd_workout_month(svc: &StrideService, month: Option<&str>, json: bool) -> Result<()> {
    svc.require_user()?;
    let month = parse_month(month)?;
    let data = svc.data();
    let score = metrics::consistency_score(&data.workout_data, month);
    let steps = metrics::monthly_steps(&data.workout_data, month);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "month": month.format("%Y-%m").to_string(),
                "consistency_score": score,
                "steps": steps,
            })
        );
        return Ok(());
    }

    #[derive(Tabled)]
    struct DayRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Workout")]
        workout: String,
        #[tabled(rename = "Steps")]
        steps: i64,
    }

    let rows: Vec<DayRow> = steps
        .iter()
        .map(|p| DayRow {
            day: p.date.format("%a %d").to_string(),
            workout: data
                .workout_data
                .get(p.date)
                .map(|e| e.workout_type)
                .filter(|t| *t != WorkoutType::Unset)
                .map(|t| t.to_string())
                .unwrap_or_default(),
            steps: p.steps,
        })
        .collect();

    let total: i64 = steps.iter().map(|p| p.steps).sum();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("=== {} ===\n", month.format("%B %Y"));
    println!("{table}");
    println!("  Steps: {total} total (goal {} per day)", data.settings.step_goal);
    println!("  Consistency: {score}%");
    Ok(())
}
