use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::{Datelike, Utc};
use serde::Deserialize;

use super::ApplicationState;
use crate::error::{success, ApiError};
use crate::security::AuthContext;
use crate::store::blocking;

pub(super) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/monthly", web::get().to(monthly));
}

#[derive(Deserialize)]
struct MonthParams {
    year: Option<String>,
    month: Option<String>,
}

fn parse_or<T: std::str::FromStr + PartialOrd>(
    raw: Option<&str>,
    default: T,
    range: std::ops::RangeInclusive<T>,
    message: &str,
) -> Result<T, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .ok()
            .filter(|v| range.contains(v))
            .ok_or_else(|| ApiError::bad_request(message)),
    }
}

/// Buy/sell totals for one calendar month of trade dates. Defaults to the
/// current UTC month.
async fn monthly(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    params: web::Query<MonthParams>,
) -> Result<HttpResponse, ApiError> {
    let now = Utc::now();
    let year = parse_or(params.year.as_deref(), now.year(), 1900..=9999, "year must be a four-digit year")?;
    let month = parse_or(params.month.as_deref(), now.month(), 1..=12, "month must be between 1 and 12")?;

    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let summary = blocking(move || transactions.monthly_summary(&user_id, year, month))
        .await
        .map_err(|err| state.store_failure("Failed to fetch statistics", err))?;
    Ok(success(StatusCode::OK, summary))
}
