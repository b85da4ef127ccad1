use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use slog::info;

use super::ApplicationState;
use crate::error::{success, ApiError};
use crate::model::{month_start, ListQuery, Quota, Transaction, TransactionInput, MAX_PAGE_SIZE};
use crate::security::AuthContext;
use crate::store::blocking;

const DEFAULT_PAGE_SIZE: u32 = 20;
// keeps (page - 1) * limit inside u32
const MAX_PAGE: u32 = 10_000_000;

pub(super) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::get().to(list)).route(web::post().to(create)))
        .service(
            web::resource("/{id}")
                .route(web::get().to(fetch))
                .route(web::put().to(update))
                .route(web::delete().to(remove)),
        );
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<String>,
    limit: Option<String>,
    search: Option<String>,
}

fn bounded(raw: Option<&str>, default: u32, max: u32, message: &str) -> Result<u32, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1 && *n <= max)
            .ok_or_else(|| ApiError::bad_request(message)),
    }
}

impl ListParams {
    fn into_query(self) -> Result<ListQuery, ApiError> {
        let page = bounded(self.page.as_deref(), 1, MAX_PAGE, "page must be a positive integer")?;
        let limit = bounded(
            self.limit.as_deref(),
            DEFAULT_PAGE_SIZE,
            MAX_PAGE_SIZE,
            &format!("limit must be between 1 and {}", MAX_PAGE_SIZE),
        )?;
        let search = self.search.filter(|s| !s.trim().is_empty());
        Ok(ListQuery { page, limit, search })
    }
}

fn not_found() -> ApiError {
    ApiError::not_found("Transaction not found")
}

async fn list(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let (page, limit) = (query.page, query.limit);

    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let rows = blocking(move || transactions.list(&user_id, &query))
        .await
        .map_err(|err| state.store_failure("Failed to fetch transactions", err))?;

    let has_more = rows.len() == limit as usize;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": rows,
        "pagination": { "page": page, "limit": limit, "hasMore": has_more },
    })))
}

async fn fetch(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let id = id.into_inner();
    match blocking(move || transactions.get(&user_id, &id)).await {
        Ok(Some(record)) => Ok(success(StatusCode::OK, record)),
        Ok(None) => Err(not_found()),
        Err(err) => Err(state.store_failure("Failed to fetch transaction", err)),
    }
}

/// The plan quota is checked before the body is looked at.
async fn check_quota(state: &ApplicationState, ctx: &AuthContext) -> Result<(), ApiError> {
    let quota = state.plans.quota(&ctx.plan);
    let limit = match quota {
        Quota::Unlimited => return Ok(()),
        Quota::Monthly(limit) => limit,
    };

    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let since = month_start(Utc::now());
    let used = blocking(move || transactions.count_created_since(&user_id, since))
        .await
        .map_err(|err| state.store_failure("Failed to check monthly limit", err))?;

    if quota.allows(used) {
        Ok(())
    } else {
        info!(state.log, "monthly limit reached"; "user_id" => &ctx.user_id, "plan" => &ctx.plan, "limit" => limit);
        Err(ApiError::QuotaExceeded(limit))
    }
}

async fn create(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    check_quota(&state, &ctx).await?;
    let details = TransactionInput::from_json(&body).map_err(ApiError::Validation)?;

    let record = Transaction::create(&ctx.user_id, details, Utc::now());
    let transactions = state.transactions.clone();
    let stored = record.clone();
    blocking(move || transactions.insert(&stored))
        .await
        .map_err(|err| state.store_failure("Failed to create transaction", err))?;

    Ok(success(StatusCode::CREATED, record))
}

async fn update(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    id: web::Path<String>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let details = TransactionInput::from_json(&body).map_err(ApiError::Validation)?;

    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let id = id.into_inner();
    match blocking(move || transactions.update(&user_id, &id, &details, Utc::now())).await {
        Ok(Some(record)) => Ok(success(StatusCode::OK, record)),
        Ok(None) => Err(not_found()),
        Err(err) => Err(state.store_failure("Failed to update transaction", err)),
    }
}

async fn remove(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let id = id.into_inner();
    match blocking(move || transactions.delete(&user_id, &id)).await {
        Ok(true) => Ok(success(StatusCode::OK, json!({ "message": "Transaction deleted" }))),
        Ok(false) => Err(not_found()),
        Err(err) => Err(state.store_failure("Failed to delete transaction", err)),
    }
}
