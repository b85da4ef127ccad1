use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;
use slog::info;

use super::{optional_object, ApplicationState};
use crate::error::{success, ApiError};
use crate::model::{parse_registration, UserRecord};
use crate::security::VerifiedIdentity;
use crate::store::{blocking, StoreError};

// Mounted behind the identity-only gate: callers here have a valid token
// but usually no user record yet.
pub(super) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/register", web::post().to(register))
        .route("/verify", web::post().to(verify));
}

async fn register(
    state: web::Data<ApplicationState>,
    identity: VerifiedIdentity,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let email = identity
        .email
        .clone()
        .filter(|email| !email.trim().is_empty())
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;
    let profile = parse_registration(&optional_object(&body)?).map_err(ApiError::Validation)?;

    let user = UserRecord::register(&identity.external_id, &email, profile, Utc::now());
    let users = state.users.clone();
    let record = user.clone();
    match blocking(move || users.insert(&record)).await {
        Ok(()) => {
            info!(state.log, "user registered"; "user_id" => &user.id, "sub" => &user.external_id);
            Ok(success(StatusCode::CREATED, json!({ "user": user })))
        }
        Err(StoreError::Conflict) => Err(ApiError::Conflict("User already registered".to_string())),
        Err(err) => Err(state.store_failure("Failed to register user", err)),
    }
}

async fn verify(identity: VerifiedIdentity) -> HttpResponse {
    success(
        StatusCode::OK,
        json!({ "firebase_uid": identity.external_id, "email": identity.email }),
    )
}
