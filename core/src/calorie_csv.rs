use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::metrics;
use crate::models::{CalorieEntry, NewCalorieEntry, validate_calories};

/// Parse a calorie spreadsheet exported as CSV.
///
/// Expected header: `Day,Target,Exercise,Intake` (a lowercase `day` column is
/// accepted when `Day` is missing; other columns are ignored). Unparseable
/// days become `today`; non-numeric cells become absent. A number outside
/// `0..=MAX_CALORIES` rejects the whole file.
pub fn parse_calorie_csv<R: Read>(reader: R, today: NaiveDate) -> Result<Vec<NewCalorieEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col = |name: &str| -> Option<usize> { headers.iter().position(|h| h == name) };

    let Some(idx_day) = col("Day").or_else(|| col("day")) else {
        bail!("Missing required column: Day");
    };
    let idx_target = col("Target");
    let idx_exercise = col("Exercise");
    let idx_intake = col("Intake");

    let mut entries = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;

        let row = line_num + 2;
        let number = |name: &str, idx: Option<usize>| -> Result<Option<i64>> {
            let Some(cell) = idx.and_then(|i| record.get(i)) else {
                return Ok(None);
            };
            let value = parse_number(cell);
            validate_calories(name, value)
                .with_context(|| format!("Invalid value in CSV row {row}"))?;
            Ok(value)
        };

        entries.push(NewCalorieEntry {
            day: parse_import_day(record.get(idx_day).unwrap_or(""), today),
            target: number("Target", idx_target)?,
            exercise: number("Exercise", idx_exercise)?,
            intake: number("Intake", idx_intake)?,
        });
    }

    Ok(entries)
}

/// `as` saturates, so huge cells land on `i64::MAX`/`MIN` and fail the bound
/// check instead of wrapping.
#[allow(clippy::cast_possible_truncation)]
fn parse_number(cell: &str) -> Option<i64> {
    let value = cell.trim().parse::<f64>().ok()?;
    value.is_finite().then(|| value.round() as i64)
}

/// Interpret a spreadsheet day cell. Formats are tried in order:
/// `2024-06-15`, `15-Jun-24`, `15-Jun` (year of `today`), `06/15/2024`,
/// `6/15/24`. Anything else, including an empty cell, is `today`.
#[must_use]
pub fn parse_import_day(raw: &str, today: NaiveDate) -> NaiveDate {
    let s = raw.trim();
    if s.is_empty() {
        return today;
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d-%b-%y") {
        return d;
    }
    if s.matches('-').count() == 1 {
        let with_year = format!("{s}-{}", today.year());
        if let Ok(d) = NaiveDate::parse_from_str(&with_year, "%d-%b-%Y") {
            return d;
        }
    }

    let four_digit_year = s.rsplit('/').next().is_some_and(|y| y.len() == 4);
    let slash_format = if four_digit_year { "%m/%d/%Y" } else { "%m/%d/%y" };
    if let Ok(d) = NaiveDate::parse_from_str(s, slash_format) {
        return d;
    }

    tracing::debug!(value = s, "Unrecognized day in import, using today");
    today
}

#[derive(Serialize)]
struct ExportRow {
    #[serde(rename = "No.")]
    number: usize,
    #[serde(rename = "Day")]
    day: NaiveDate,
    #[serde(rename = "Target")]
    target: Option<i64>,
    #[serde(rename = "Exercise")]
    exercise: Option<i64>,
    #[serde(rename = "Intake")]
    intake: Option<i64>,
    #[serde(rename = "Net")]
    net: i64,
    #[serde(rename = "Plus/Minus")]
    plus_minus: i64,
    #[serde(rename = "Gained")]
    gained: i64,
}

/// Write entries as CSV, sorted by day and numbered from 1, with the derived
/// net, plus/minus and gained columns.
pub fn write_calorie_csv<W: Write>(
    writer: W,
    entries: &[CalorieEntry],
    maintenance_calories: i64,
) -> Result<()> {
    let mut sorted: Vec<&CalorieEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.day);

    let mut wtr = csv::Writer::from_writer(writer);
    if sorted.is_empty() {
        wtr.write_record([
            "No.", "Day", "Target", "Exercise", "Intake", "Net", "Plus/Minus", "Gained",
        ])?;
    }
    for (i, entry) in sorted.into_iter().enumerate() {
        let balance = metrics::CalorieBalance::of(entry, maintenance_calories);
        wtr.serialize(ExportRow {
            number: i + 1,
            day: entry.day,
            target: entry.target,
            exercise: entry.exercise,
            intake: entry.intake,
            net: balance.net,
            plus_minus: balance.plus_minus,
            gained: balance.gained,
        })
        .context("Failed to write CSV row")?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
