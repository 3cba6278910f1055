mod auth;
mod calories;
mod dashboard;
mod helpers;
mod settings;
mod weight;
mod workout;

pub(crate) use auth::{cmd_sign_in, cmd_sign_out, cmd_sign_up, cmd_whoami};
pub(crate) use calories::{
    cmd_calories_add, cmd_calories_clear, cmd_calories_delete, cmd_calories_export,
    cmd_calories_import, cmd_calories_list, cmd_calories_trend, cmd_calories_update,
};
pub(crate) use dashboard::cmd_dashboard;
pub(crate) use settings::{cmd_settings_set, cmd_settings_show};
pub(crate) use weight::{cmd_weight_delete, cmd_weight_list, cmd_weight_log};
pub(crate) use workout::{cmd_workout_log, cmd_workout_month, cmd_workout_show};
