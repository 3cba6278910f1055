use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::metrics::{self, CalorieBalance};
use stride_core::models::{CalorieEntryPatch, NewCalorieEntry, format_day};
use stride_core::service::StrideService;

use super::helpers::{fmt_opt, json_error, parse_date, today};

/// Parse a calorie field given on the command line. `none` clears it.
fn parse_field(name: &str, s: &str) -> Result<Option<i64>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let value: i64 = s
        .parse()
        .with_context(|| format!("Invalid {name} '{s}'. Use a whole number or 'none'"))?;
    Ok(Some(value))
}

pub(crate) fn cmd_calories_add(
    svc: &StrideService,
    day: Option<String>,
    target: Option<i64>,
    exercise: Option<i64>,
    intake: Option<i64>,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    let day = parse_date(day)?;

    let mut entry = NewCalorieEntry::blank(day);
    if target.is_some() {
        entry.target = target;
    }
    entry.exercise = exercise;
    entry.intake = intake;

    let id = svc
        .add_calorie_entry(&entry)?
        .context("Not signed in")?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "entry": entry }));
    } else {
        println!(
            "Added entry {id} for {} (target {})",
            format_day(day),
            fmt_opt(entry.target)
        );
    }
    Ok(())
}

pub(crate) fn cmd_calories_list(svc: &StrideService, json: bool) -> Result<()> {
    svc.require_user()?;
    let data = svc.data();
    let maintenance = data.settings.maintenance_calories;

    let mut entries = data.calorie_data;
    entries.sort_by_key(|e| e.day);

    if json {
        #[derive(serde::Serialize)]
        struct Row<'a> {
            #[serde(flatten)]
            entry: &'a stride_core::models::CalorieEntry,
            #[serde(flatten)]
            balance: CalorieBalance,
        }
        let rows: Vec<Row> = entries
            .iter()
            .map(|e| Row {
                entry: e,
                balance: CalorieBalance::of(e, maintenance),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("No calorie entries. Use `stride calories add` to start a day.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct CalorieRow {
        #[tabled(rename = "No.")]
        number: usize,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Exercise")]
        exercise: String,
        #[tabled(rename = "Intake")]
        intake: String,
        #[tabled(rename = "Net")]
        net: i64,
        #[tabled(rename = "Plus/Minus")]
        plus_minus: i64,
        #[tabled(rename = "Gained")]
        gained: i64,
    }

    let rows: Vec<CalorieRow> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let balance = CalorieBalance::of(e, maintenance);
            CalorieRow {
                number: i + 1,
                id: e.id.clone(),
                day: format_day(e.day),
                target: fmt_opt(e.target),
                exercise: fmt_opt(e.exercise),
                intake: fmt_opt(e.intake),
                net: balance.net,
                plus_minus: balance.plus_minus,
                gained: balance.gained,
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..9)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!("Maintenance: {maintenance} kcal");
    Ok(())
}

pub(crate) fn cmd_calories_update(
    svc: &StrideService,
    id: &str,
    day: Option<String>,
    target: Option<&str>,
    exercise: Option<&str>,
    intake: Option<&str>,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    if day.is_none() && target.is_none() && exercise.is_none() && intake.is_none() {
        bail!("Nothing to update. Provide at least one of --day, --target, --exercise, or --intake");
    }

    let patch = CalorieEntryPatch {
        day: day.map(|d| parse_date(Some(d))).transpose()?,
        target: target.map(|s| parse_field("target", s)).transpose()?,
        exercise: exercise.map(|s| parse_field("exercise", s)).transpose()?,
        intake: intake.map(|s| parse_field("intake", s)).transpose()?,
    };

    if !svc.update_calorie_entry(id, &patch)? {
        if json {
            println!("{}", json_error(&format!("Entry {id} not found")));
        } else {
            eprintln!("Entry {id} not found");
        }
        process::exit(2);
    }

    let data = svc.data();
    let updated = data.calorie_data.iter().find(|e| e.id == id);
    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else if let Some(e) = updated {
        let balance = CalorieBalance::of(e, data.settings.maintenance_calories);
        println!(
            "Updated {id}: {} target {} exercise {} intake {} (net {}, plus/minus {})",
            format_day(e.day),
            fmt_opt(e.target),
            fmt_opt(e.exercise),
            fmt_opt(e.intake),
            balance.net,
            balance.plus_minus
        );
    }
    Ok(())
}

pub(crate) fn cmd_calories_delete(svc: &StrideService, id: &str, json: bool) -> Result<()> {
    svc.require_user()?;
    if svc.delete_calorie_entry(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted entry {id}");
        }
        Ok(())
    } else {
        if json {
            println!("{}", json_error(&format!("Entry {id} not found")));
        } else {
            eprintln!("Entry {id} not found");
        }
        process::exit(2);
    }
}

pub(crate) fn cmd_calories_clear(svc: &StrideService, yes: bool, json: bool) -> Result<()> {
    svc.require_user()?;
    if !yes {
        bail!("This deletes every calorie entry. Re-run with --yes to confirm");
    }
    let deleted = svc.clear_all_calorie_data()?;

    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Cleared {deleted} calorie entries");
    }
    Ok(())
}

pub(crate) fn cmd_calories_import(svc: &StrideService, file: &Path, json: bool) -> Result<()> {
    svc.require_user()?;
    let reader = std::fs::File::open(file)
        .with_context(|| format!("Failed to open file: {}", file.display()))?;
    let imported = svc.import_calorie_csv(reader, today())?;

    if json {
        println!("{}", serde_json::json!({ "imported": imported }));
    } else {
        println!(
            "Imported {imported} entries from {} (previous entries replaced)",
            file.display()
        );
    }
    Ok(())
}

pub(crate) fn cmd_calories_export(svc: &StrideService, output: Option<&Path>) -> Result<()> {
    svc.require_user()?;
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create file: {}", path.display()))?;
            svc.export_calorie_csv(file)?;
            eprintln!("Exported calorie data to {}", path.display());
        }
        None => svc.export_calorie_csv(std::io::stdout().lock())?,
    }
    Ok(())
}

pub(crate) fn cmd_calories_trend(svc: &StrideService, json: bool) -> Result<()> {
    svc.require_user()?;
    let trend = metrics::plus_minus_trend(&svc.data().calorie_data);

    if json {
        println!("{}", serde_json::to_string_pretty(&trend)?);
        return Ok(());
    }
    if trend.is_empty() {
        eprintln!("No calorie entries yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct TrendRow {
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Weekday")]
        weekday: String,
        #[tabled(rename = "Plus/Minus")]
        plus_minus: i64,
    }

    let rows: Vec<TrendRow> = trend
        .iter()
        .map(|p| TrendRow {
            day: format_day(p.date),
            weekday: p.date.format("%a").to_string(),
            plus_minus: p.plus_minus,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
