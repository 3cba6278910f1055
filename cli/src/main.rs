mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    cmd_calories_add, cmd_calories_clear, cmd_calories_delete, cmd_calories_export,
    cmd_calories_import, cmd_calories_list, cmd_calories_trend, cmd_calories_update,
    cmd_dashboard, cmd_settings_set, cmd_settings_show, cmd_sign_in, cmd_sign_out, cmd_sign_up,
    cmd_weight_delete, cmd_weight_list, cmd_weight_log, cmd_whoami, cmd_workout_log,
    cmd_workout_month, cmd_workout_show,
};
use crate::config::Config;
use stride_core::service::StrideService;

#[derive(Parser)]
#[command(
    name = "stride",
    version,
    about = "Track calories, workouts, steps and weight",
    long_about = "Track calories, workouts, steps and weight.\n\n\
        Data belongs to the signed-in account. Start with `stride auth sign-up`."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account, sign in or out
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Daily calorie log: target, exercise and intake per day
    Calories {
        #[command(subcommand)]
        command: CalorieCommands,
    },
    /// Workout type and step count per day
    Workout {
        #[command(subcommand)]
        command: WorkoutCommands,
    },
    /// Weight log (lbs)
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
    /// Maintenance calories, step goal and weight goal
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Show today's progress, consistency and trends
    Dashboard {
        /// Day to show (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Month for the consistency score (YYYY-MM, default: month of the day shown)
        #[arg(long)]
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Create an account and sign in
    SignUp {
        /// Email address
        email: String,
        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign in to an existing account
    SignIn {
        /// Email address
        email: String,
        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out
    SignOut {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in account
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CalorieCommands {
    /// Add a calorie entry (default target 1500)
    Add {
        /// Day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        day: Option<String>,
        /// Calorie target for the day
        #[arg(short, long)]
        target: Option<i64>,
        /// Calories burned through exercise
        #[arg(short, long)]
        exercise: Option<i64>,
        /// Calories eaten
        #[arg(short, long)]
        intake: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List calorie entries with net, plus/minus and gained
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update fields of a calorie entry ("none" clears a number)
    Update {
        /// Entry ID
        id: String,
        /// New day (YYYY-MM-DD)
        #[arg(long)]
        day: Option<String>,
        /// New target, or "none"
        #[arg(short, long, allow_hyphen_values = true)]
        target: Option<String>,
        /// New exercise, or "none"
        #[arg(short, long, allow_hyphen_values = true)]
        exercise: Option<String>,
        /// New intake, or "none"
        #[arg(short, long, allow_hyphen_values = true)]
        intake: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a calorie entry by ID
    Delete {
        /// Entry ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every calorie entry
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace all calorie entries with the rows of a CSV file
    Import {
        /// Path to the CSV file (needs a Day column)
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export calorie entries as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show plus/minus per logged day
    Trend {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WorkoutCommands {
    /// Log a workout type and/or steps for a day
    Log {
        /// Workout type: push, pull, legs, rest
        #[arg(short = 't', long = "type")]
        workout_type: Option<String>,
        /// Step count
        #[arg(short, long)]
        steps: Option<i64>,
        /// Day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Remove whatever is logged for the day
        #[arg(long, conflicts_with_all = ["workout_type", "steps"])]
        clear: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the workout logged for a day
    Show {
        /// Day (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show steps per day and the consistency score for a month
    Month {
        /// Month (YYYY-MM, default: this month)
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Log a weight entry
    Log {
        /// Weight value (number)
        value: f64,
        /// Unit: lbs or kg (default: lbs)
        #[arg(short, long, default_value = "lbs")]
        unit: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List weight entries, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a weight entry by ID
    Delete {
        /// Weight entry ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show current settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change one or more settings
    Set {
        /// Daily maintenance calories
        #[arg(long)]
        maintenance: Option<i64>,
        /// Daily step goal
        #[arg(long)]
        step_goal: Option<i64>,
        /// Goal weight (lbs)
        #[arg(long)]
        weight_goal: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Logs go to stderr so `--json` output stays clean. The server logs
/// requests at info; other commands only surface warnings unless
/// `RUST_LOG` says otherwise.
fn init_tracing(serving: bool) {
    let default_filter = if serving {
        "stride=info,stride_core=info,tower_http=info"
    } else {
        "stride=warn,stride_core=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = StrideService::open(&config.db_path)?;

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::SignUp {
                email,
                password,
                json,
            } => cmd_sign_up(&svc, &email, password, json),
            AuthCommands::SignIn {
                email,
                password,
                json,
            } => cmd_sign_in(&svc, &email, password, json),
            AuthCommands::SignOut { json } => cmd_sign_out(&svc, json),
            AuthCommands::Whoami { json } => cmd_whoami(&svc, json),
        },
        Commands::Calories { command } => match command {
            CalorieCommands::Add {
                day,
                target,
                exercise,
                intake,
                json,
            } => cmd_calories_add(&svc, day, target, exercise, intake, json),
            CalorieCommands::List { json } => cmd_calories_list(&svc, json),
            CalorieCommands::Update {
                id,
                day,
                target,
                exercise,
                intake,
                json,
            } => cmd_calories_update(
                &svc,
                &id,
                day,
                target.as_deref(),
                exercise.as_deref(),
                intake.as_deref(),
                json,
            ),
            CalorieCommands::Delete { id, json } => cmd_calories_delete(&svc, &id, json),
            CalorieCommands::Clear { yes, json } => cmd_calories_clear(&svc, yes, json),
            CalorieCommands::Import { file, json } => cmd_calories_import(&svc, &file, json),
            CalorieCommands::Export { output } => cmd_calories_export(&svc, output.as_deref()),
            CalorieCommands::Trend { json } => cmd_calories_trend(&svc, json),
        },
        Commands::Workout { command } => match command {
            WorkoutCommands::Log {
                workout_type,
                steps,
                date,
                clear,
                json,
            } => cmd_workout_log(&svc, date, workout_type.as_deref(), steps, clear, json),
            WorkoutCommands::Show { date, json } => cmd_workout_show(&svc, date, json),
            WorkoutCommands::Month { month, json } => {
                cmd_workout_month(&svc, month.as_deref(), json)
            }
        },
        Commands::Weight { command } => match command {
            WeightCommands::Log {
                value,
                unit,
                date,
                json,
            } => cmd_weight_log(&svc, value, &unit, date, json),
            WeightCommands::List { json } => cmd_weight_list(&svc, json),
            WeightCommands::Delete { id, json } => cmd_weight_delete(&svc, &id, json),
        },
        Commands::Settings { command } => match command {
            SettingsCommands::Show { json } => cmd_settings_show(&svc, json),
            SettingsCommands::Set {
                maintenance,
                step_goal,
                weight_goal,
                json,
            } => cmd_settings_set(&svc, maintenance, step_goal, weight_goal, json),
        },
        Commands::Dashboard { date, month, json } => {
            cmd_dashboard(&svc, date, month.as_deref(), json)
        }
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            server::start_server(svc, port, &bind, api_key, new_api_key).await
        }
    }
}
