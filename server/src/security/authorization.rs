use std::future::{ready, Ready};

use actix_rt::time::timeout;
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use slog::{error, info};

use super::identity::Inner;
use super::{AuthContext, VerifiedIdentity};
use crate::error::ApiError;
use crate::model::UserRecord;
use crate::store::blocking;

/// Look the subject up in the user directory, bounded by the configured
/// timeout. A miss means the caller has not registered yet.
pub(super) async fn resolve_user(inner: &Inner, external_id: &str) -> Result<UserRecord, ApiError> {
    let log = &inner.log;
    let directory = inner.directory.clone();
    let key = external_id.to_string();
    let lookup = blocking(move || directory.find_by_external_id(&key));

    match timeout(inner.timeout, lookup).await {
        Ok(Ok(Some(user))) => Ok(user),
        Ok(Ok(None)) => {
            info!(log, "token subject is not registered"; "sub" => external_id);
            Err(ApiError::NotRegistered)
        }
        Ok(Err(err)) => {
            error!(log, "user directory lookup failed"; "sub" => external_id, "error" => %err);
            Err(ApiError::dependency("Error fetching user information"))
        }
        Err(_) => {
            error!(log, "user directory lookup timed out";
                "sub" => external_id, "timeout_ms" => inner.timeout.as_millis() as u64);
            Err(ApiError::dependency("Error fetching user information"))
        }
    }
}

fn from_extensions<T: Clone + 'static>(req: &HttpRequest) -> Result<T, ApiError> {
    req.extensions()
        .get::<T>()
        .cloned()
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))
}

impl FromRequest for AuthContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;
    type Config = ();

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(from_extensions(req))
    }
}

impl FromRequest for VerifiedIdentity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;
    type Config = ();

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(from_extensions(req))
    }
}
