use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use std::io::{self, BufRead, Write};

use stride_core::auth::AuthError;

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(today()),
        Some(s) => match s.as_str() {
            "today" => Ok(today()),
            "yesterday" => Ok(today() - chrono::Duration::days(1)),
            "tomorrow" => Ok(today() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse `YYYY-MM` into the first day of that month (default: this month).
pub(crate) fn parse_month(month_str: Option<&str>) -> Result<NaiveDate> {
    let Some(s) = month_str else {
        let now = today();
        return NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .context("Invalid current month");
    };
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{s}'. Use YYYY-MM"))
}

/// Auth failures the person can act on become their form message; storage
/// failures keep the full error chain.
pub(crate) fn auth_failure(e: AuthError) -> anyhow::Error {
    match e {
        AuthError::Database(_) | AuthError::Other(_) => anyhow::Error::new(e),
        other => anyhow!("{}", other.user_message()),
    }
}

pub(crate) fn prompt_password(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn fmt_opt(v: Option<i64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}
