use anyhow::Result;

use stride_core::models::format_day;
use stride_core::service::StrideService;

use super::helpers::{no_neg_zero, parse_date, parse_month};

#[allow(clippy::cast_precision_loss)]
fn bar(percent: f64) -> String {
    const WIDTH: usize = 20;
    #[allow(clippy::cast_sign_loss)]
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(WIDTH - filled))
}

pub(crate) fn cmd_dashboard(
    svc: &StrideService,
    date: Option<String>,
    month: Option<&str>,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    let date = parse_date(date)?;
    let month = match month {
        Some(m) => parse_month(Some(m))?,
        None => date,
    };
    let summary = svc.dashboard(date, month);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== {} ===\n", format_day(summary.date));
    println!(
        "  Calories  {} {:>5} / {} kcal ({:.0}%)",
        bar(summary.calorie_progress),
        summary.calories_today,
        summary.calorie_target,
        summary.calorie_progress
    );
    println!(
        "  Steps     {} {:>5} / {} ({:.0}%)",
        bar(summary.step_progress),
        summary.steps_today,
        summary.step_goal,
        summary.step_progress
    );
    match (summary.current_weight, summary.to_goal) {
        (Some(w), Some(diff)) => println!(
            "  Weight    {w:.1} lbs (goal {} lbs, {:+.1} to go)",
            summary.weight_goal,
            no_neg_zero(diff)
        ),
        _ => println!("  Weight    N/A (goal {} lbs)", summary.weight_goal),
    }
    println!("  Workout   {}", summary.workout_today);
    println!(
        "  Consistency ({}): {}%",
        summary.consistency_month.format("%B %Y"),
        summary.consistency_score
    );

    if let Some(last) = summary.plus_minus_trend.last() {
        println!(
            "\n  Last logged day {}: {:+} kcal vs target",
            format_day(last.date),
            last.plus_minus
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar() {
        assert_eq!(bar(0.0), format!("[{}]", ".".repeat(20)));
        assert_eq!(bar(50.0), format!("[{}{}]", "#".repeat(10), ".".repeat(10)));
        assert_eq!(bar(250.0), format!("[{}]", "#".repeat(20)));
        assert_eq!(bar(-5.0), format!("[{}]", ".".repeat(20)));
    }
}
