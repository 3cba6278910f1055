use anyhow::{Result, bail};

use stride_core::service::StrideService;

pub(crate) fn cmd_settings_show(svc: &StrideService, json: bool) -> Result<()> {
    svc.require_user()?;
    let settings = svc.settings();

    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        println!("Maintenance calories: {}", settings.maintenance_calories);
        println!("Step goal:            {}", settings.step_goal);
        println!("Weight goal:          {} lbs", settings.weight_goal);
    }
    Ok(())
}

pub(crate) fn cmd_settings_set(
    svc: &StrideService,
    maintenance: Option<i64>,
    step_goal: Option<i64>,
    weight_goal: Option<i64>,
    json: bool,
) -> Result<()> {
    svc.require_user()?;
    if maintenance.is_none() && step_goal.is_none() && weight_goal.is_none() {
        bail!("Nothing to set. Provide --maintenance, --step-goal, or --weight-goal");
    }

    if let Some(v) = maintenance {
        svc.set_maintenance_calories(v)?;
    }
    if let Some(v) = step_goal {
        svc.set_step_goal(v)?;
    }
    if let Some(v) = weight_goal {
        svc.set_weight_goal(v)?;
    }

    cmd_settings_show(svc, json)
}
