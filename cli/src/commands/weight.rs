use anyhow::{Context, Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use stride_core::metrics;
use stride_core::models::{NewWeightEntry, format_day};
use stride_core::service::StrideService;

use super::helpers::{json_error, no_neg_zero, parse_date};

const LBS_PER_KG: f64 = 2.20462;

pub(crate) fn cmd_weight_log(
    svc: &StrideService,
    value: f64,
    unit: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    if value <= 0.0 {
        bail!("Weight must be greater than 0");
    }

    let weight = match unit.to_lowercase().as_str() {
        "lbs" | "lb" => value,
        "kg" => {
            let lbs = no_neg_zero(value * LBS_PER_KG);
            eprintln!("Converting {value:.1} kg → {lbs:.1} lbs");
            lbs
        }
        _ => bail!("Invalid unit '{unit}'. Use 'lbs' or 'kg'"),
    };

    let entry = NewWeightEntry {
        date: parse_date(date)?,
        weight,
    };
    let id = svc.save_weight_entry(&entry)?.context("Not signed in")?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "entry": entry }));
    } else {
        let goal = svc.settings().weight_goal;
        println!(
            "Logged {:.1} lbs for {} (goal {goal} lbs)",
            entry.weight,
            format_day(entry.date)
        );
    }
    Ok(())
}

pub(crate) fn cmd_weight_list(svc: &StrideService, json: bool) -> Result<()> {
    svc.require_user()?;
    let data = svc.data();
    let entries = metrics::weight_log(&data.weight_data);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("No weight entries found. Use `stride weight log` to record your weight.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct WeightRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Weight (lbs)")]
        lbs: String,
        #[tabled(rename = "Weight (kg)")]
        kg: String,
    }

    let rows: Vec<WeightRow> = entries
        .iter()
        .map(|e| WeightRow {
            id: e.id.clone(),
            date: format_day(e.date),
            lbs: format!("{:.1}", e.weight),
            kg: format!("{:.1}", e.weight / LBS_PER_KG),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    #[allow(clippy::cast_precision_loss)]
    let goal = data.settings.weight_goal as f64;
    if let Some(latest) = metrics::latest_weight(&data.weight_data) {
        let diff = no_neg_zero(latest.weight - goal);
        println!("  Goal: {goal:.0} lbs ({diff:+.1} lbs to go)");
    }
    Ok(())
}

pub(crate) fn cmd_weight_delete(svc: &StrideService, id: &str, json: bool) -> Result<()> {
    svc.require_user()?;
    if svc.delete_weight_entry(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted weight entry {id}");
        }
        Ok(())
    } else {
        if json {
            println!("{}", json_error(&format!("Weight entry {id} not found")));
        } else {
            eprintln!("Weight entry {id} not found");
        }
        process::exit(2);
    }
}
