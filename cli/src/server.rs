use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use stride_core::calorie_csv::parse_calorie_csv;
use stride_core::metrics::{self, CalorieBalance, DashboardSummary};
use stride_core::models::{
    AppData, CalorieEntry, CalorieEntryPatch, NewCalorieEntry, NewWeightEntry, Settings,
    StoredSettings, WeightEntry, WorkoutData, WorkoutEntry, format_day, parse_day,
    validate_setting, validate_steps, validate_weight,
};
use stride_core::service::StrideService;

const BODY_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<StrideService>>,
    api_key: Option<String>,
}

impl AppState {
    /// Lock the service and catch up with anything the CLI wrote meanwhile.
    fn service(&self) -> MutexGuard<'_, StrideService> {
        let svc = self
            .svc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = svc.refresh() {
            tracing::warn!("Serving cached data: {e:#}");
        }
        svc
    }
}

// --- Request / Response types ---

#[derive(Deserialize, Default)]
#[serde(default)]
struct CreateCalorieRequest {
    day: Option<String>,
    target: Option<i64>,
    exercise: Option<i64>,
    intake: Option<i64>,
}

#[derive(Deserialize)]
struct CreateWeightRequest {
    date: Option<String>,
    weight: f64,
}

#[derive(Deserialize)]
struct DashboardQuery {
    date: Option<String>,
    month: Option<String>,
}

#[derive(Serialize)]
struct CalorieRow {
    #[serde(flatten)]
    entry: CalorieEntry,
    #[serde(flatten)]
    balance: CalorieBalance,
}

#[derive(Serialize)]
struct WorkoutDayResponse {
    date: String,
    entry: Option<WorkoutEntry>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Internal(err) => {
                tracing::error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err:#}"))
}

fn not_signed_in() -> ApiError {
    ApiError::Unauthorized(
        "No account is signed in on this server. Run `stride auth sign-in` first".to_string(),
    )
}

/// Every data endpoint works on the account signed in on the host.
fn require_session(svc: &StrideService) -> Result<(), ApiError> {
    if svc.current_user().is_none() {
        return Err(not_signed_in());
    }
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_optional_day(s: Option<&str>) -> Result<NaiveDate, ApiError> {
    s.map_or_else(|| Ok(today()), |s| parse_day(s).map_err(|e| bad_request(&e)))
}

fn parse_month(s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid month '{s}'. Must be YYYY-MM")))
}

fn calorie_rows(data: AppData) -> Vec<CalorieRow> {
    let maintenance = data.settings.maintenance_calories;
    let mut entries = data.calorie_data;
    entries.sort_by_key(|e| e.day);
    entries
        .into_iter()
        .map(|entry| {
            let balance = CalorieBalance::of(&entry, maintenance);
            CalorieRow { entry, balance }
        })
        .collect()
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_data(State(state): State<AppState>) -> Result<Json<AppData>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(svc.data()))
}

async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardSummary>, ApiError> {
    let date = parse_optional_day(query.date.as_deref())?;
    let month = match query.month.as_deref() {
        Some(m) => parse_month(m)?,
        None => date,
    };

    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(svc.dashboard(date, month)))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(svc.settings()))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<StoredSettings>,
) -> Result<Json<Settings>, ApiError> {
    if req == StoredSettings::default() {
        return Err(ApiError::BadRequest(
            "Provide at least one of maintenanceCalories, stepGoal, weightGoal".to_string(),
        ));
    }
    for (name, value) in [
        ("maintenanceCalories", req.maintenance_calories),
        ("stepGoal", req.step_goal),
        ("weightGoal", req.weight_goal),
    ] {
        if let Some(v) = value {
            validate_setting(name, v).map_err(|e| bad_request(&e))?;
        }
    }

    let svc = state.service();
    require_session(&svc)?;
    svc.update_settings(req).context("failed to save settings")?;
    Ok(Json(svc.settings()))
}

async fn list_calories(State(state): State<AppState>) -> Result<Json<Vec<CalorieRow>>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(calorie_rows(svc.data())))
}

async fn create_calorie_entry(
    State(state): State<AppState>,
    Json(req): Json<CreateCalorieRequest>,
) -> Result<(StatusCode, Json<CalorieEntry>), ApiError> {
    let day = parse_optional_day(req.day.as_deref())?;
    let mut entry = NewCalorieEntry::blank(day);
    if req.target.is_some() {
        entry.target = req.target;
    }
    entry.exercise = req.exercise;
    entry.intake = req.intake;
    entry.validate().map_err(|e| bad_request(&e))?;

    let svc = state.service();
    require_session(&svc)?;
    let id = svc
        .add_calorie_entry(&entry)
        .context("failed to add calorie entry")?
        .ok_or_else(not_signed_in)?;

    let created = CalorieEntry {
        id,
        day: entry.day,
        target: entry.target,
        exercise: entry.exercise,
        intake: entry.intake,
    };
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_calorie_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<CalorieEntryPatch>,
) -> Result<Json<CalorieEntry>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "Provide at least one of day, target, exercise, intake".to_string(),
        ));
    }
    patch.validate().map_err(|e| bad_request(&e))?;

    let svc = state.service();
    require_session(&svc)?;
    if !svc
        .update_calorie_entry(&id, &patch)
        .context("failed to update calorie entry")?
    {
        return Err(ApiError::NotFound(format!("Calorie entry {id} not found")));
    }

    svc.data()
        .calorie_data
        .into_iter()
        .find(|e| e.id == id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Calorie entry {id} not found")))
}

async fn delete_calorie_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    if svc
        .delete_calorie_entry(&id)
        .context("failed to delete calorie entry")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Calorie entry {id} not found")))
    }
}

async fn clear_calories(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    let deleted = svc
        .clear_all_calorie_data()
        .context("failed to clear calorie data")?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn import_calories(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = parse_calorie_csv(body.as_bytes(), today()).map_err(|e| {
        tracing::warn!("rejected calorie import: {e:#}");
        bad_request(&e)
    })?;

    let svc = state.service();
    require_session(&svc)?;
    let imported = svc
        .import_calorie_data(&entries)
        .context("failed to import calorie data")?;
    Ok(Json(serde_json::json!({ "imported": imported })))
}

async fn export_calories(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut buf = Vec::new();
    {
        let svc = state.service();
        require_session(&svc)?;
        svc.export_calorie_csv(&mut buf)?;
    }
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"CalorieTrackerExport.csv\"",
            ),
        ],
        buf,
    )
        .into_response())
}

async fn get_workouts(State(state): State<AppState>) -> Result<Json<WorkoutData>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(svc.data().workout_data))
}

async fn replace_workouts(
    State(state): State<AppState>,
    Json(data): Json<WorkoutData>,
) -> Result<Json<WorkoutData>, ApiError> {
    for (day, entry) in &data {
        validate_steps(entry.steps)
            .map_err(|e| ApiError::BadRequest(format!("{}: {e:#}", format_day(*day))))?;
    }

    let svc = state.service();
    require_session(&svc)?;
    svc.save_workout_data(&data)
        .context("failed to save workout data")?;
    Ok(Json(svc.data().workout_data))
}

async fn log_workout_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(entry): Json<WorkoutEntry>,
) -> Result<Json<WorkoutDayResponse>, ApiError> {
    let day = parse_day(&date).map_err(|e| bad_request(&e))?;
    validate_steps(entry.steps).map_err(|e| bad_request(&e))?;

    let svc = state.service();
    require_session(&svc)?;
    svc.log_workout_day(day, entry)
        .context("failed to save workout day")?;
    Ok(Json(WorkoutDayResponse {
        date: format_day(day),
        entry: svc.data().workout_data.get(day).copied(),
    }))
}

async fn list_weight(State(state): State<AppState>) -> Result<Json<Vec<WeightEntry>>, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    Ok(Json(metrics::weight_log(&svc.data().weight_data)))
}

async fn create_weight(
    State(state): State<AppState>,
    Json(req): Json<CreateWeightRequest>,
) -> Result<(StatusCode, Json<WeightEntry>), ApiError> {
    let date = parse_optional_day(req.date.as_deref())?;
    validate_weight(req.weight).map_err(|e| bad_request(&e))?;
    let entry = NewWeightEntry {
        date,
        weight: req.weight,
    };

    let svc = state.service();
    require_session(&svc)?;
    let id = svc
        .save_weight_entry(&entry)
        .context("failed to save weight entry")?
        .ok_or_else(not_signed_in)?;
    Ok((
        StatusCode::CREATED,
        Json(WeightEntry {
            id,
            date: entry.date,
            weight: entry.weight,
        }),
    ))
}

async fn delete_weight(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let svc = state.service();
    require_session(&svc)?;
    if svc
        .delete_weight_entry(&id)
        .context("failed to delete weight entry")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Weight entry {id} not found")))
    }
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/data", get(get_data))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route(
            "/api/calories",
            get(list_calories)
                .post(create_calorie_entry)
                .delete(clear_calories),
        )
        .route(
            "/api/calories/{id}",
            put(update_calorie_entry).delete(delete_calorie_entry),
        )
        .route("/api/calories/import", post(import_calories))
        .route("/api/calories/export", get(export_calories))
        .route("/api/workouts", get(get_workouts).put(replace_workouts))
        .route("/api/workouts/{date}", put(log_workout_day))
        .route("/api/weight", get(list_weight).post(create_weight))
        .route("/api/weight/{id}", delete(delete_weight))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: StrideService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    match svc.current_user() {
        Some(user) => tracing::info!(email = %user.email, "serving data for signed-in account"),
        None => eprintln!(
            "Warning: No account is signed in. Data endpoints return 401 until you run `stride auth sign-in`."
        ),
    }

    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        // A fresh key was already printed in full.
        if !new_api_key && key.len() >= 8 {
            eprintln!(
                "API key: {}...{} (see api_key file in data directory)",
                &key[..4],
                &key[key.len() - 4..],
            );
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
