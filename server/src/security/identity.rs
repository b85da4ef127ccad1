use std::cell::RefCell;
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{Error, HttpMessage, ResponseError};
use chrono::Utc;
use slog::{error, info, o, warn, Logger};

use super::authorization::resolve_user;
use super::claims::{decode, validate, TokenError};
use super::signature::KeySet;
use super::{AuthContext, VerifiedIdentity};
use crate::error::ApiError;
use crate::store::SharedDirectory;

const BEARER: &str = "Bearer ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateMode {
    /// Valid token for a registered user; attaches [`AuthContext`].
    Required,
    /// Valid token, no directory lookup; attaches [`VerifiedIdentity`].
    IdentityOnly,
    /// Never rejects; attaches whatever could be established.
    Optional,
}

pub(super) struct Inner {
    pub(super) project_id: Option<String>,
    pub(super) keys: Option<KeySet>,
    pub(super) timeout: Duration,
    pub(super) directory: SharedDirectory,
    pub(super) log: Logger,
}

/// Identity gate middleware factory. One instance is built at startup and
/// cloned per scope with the mode that scope needs.
#[derive(Clone)]
pub struct IdentityGate {
    mode: GateMode,
    inner: Arc<Inner>,
}

impl IdentityGate {
    pub fn new(
        project_id: Option<String>,
        keys: Option<KeySet>,
        timeout: Duration,
        directory: SharedDirectory,
        log: &Logger,
    ) -> Self {
        let inner = Inner {
            project_id,
            keys,
            timeout,
            directory,
            log: log.new(o!("component" => "identity-gate")),
        };
        IdentityGate { mode: GateMode::Required, inner: Arc::new(inner) }
    }

    fn mode(&self, mode: GateMode) -> Self {
        IdentityGate { mode, inner: self.inner.clone() }
    }

    pub fn required(&self) -> Self {
        self.mode(GateMode::Required)
    }

    pub fn identity_only(&self) -> Self {
        self.mode(GateMode::IdentityOnly)
    }

    pub fn optional(&self) -> Self {
        self.mode(GateMode::Optional)
    }
}

/// Outcome of a successful pass through the gate.
enum Admission {
    Anonymous,
    Identity(VerifiedIdentity),
    User(AuthContext),
}

impl Admission {
    fn attach(self, req: &ServiceRequest) {
        match self {
            Admission::Anonymous => {}
            Admission::Identity(identity) => {
                req.extensions_mut().insert(identity);
            }
            Admission::User(context) => {
                req.extensions_mut().insert(context);
            }
        }
    }
}

fn bearer_token(header: Option<&str>) -> Result<&str, ApiError> {
    let value = header
        .filter(|v| v.starts_with(BEARER))
        .ok_or_else(|| ApiError::unauthenticated("Authorization header required"))?;
    let token = value[BEARER.len()..].trim();
    if token.is_empty() {
        return Err(ApiError::unauthenticated("Invalid token"));
    }
    Ok(token)
}

async fn establish(inner: &Inner, mode: GateMode, header: Option<&str>) -> Result<Admission, ApiError> {
    let log = &inner.log;
    let token = bearer_token(header)?;

    let project_id = match &inner.project_id {
        Some(project_id) => project_id,
        None => {
            error!(log, "auth.project is not configured, refusing authenticated request");
            return Err(ApiError::Configuration);
        }
    };

    let claims = decode(token).map_err(|err| match err {
        TokenError::Format => {
            info!(log, "token rejected"; "reason" => "wrong segment count");
            let message = if mode == GateMode::IdentityOnly { "Invalid token format" } else { "Invalid token" };
            ApiError::unauthenticated(message)
        }
        TokenError::Payload(detail) => {
            warn!(log, "token payload could not be decoded"; "error" => detail);
            ApiError::unauthenticated("Token verification failed")
        }
    })?;

    if let Some(keys) = &inner.keys {
        keys.verify(token).map_err(|err| {
            warn!(log, "token signature rejected"; "error" => %err);
            ApiError::unauthenticated("Token verification failed")
        })?;
    }

    let identity = validate(&claims, Utc::now().timestamp(), project_id).map_err(|reason| {
        warn!(log, "token rejected"; "reason" => %reason, "sub" => claims.sub.as_deref().unwrap_or(""));
        ApiError::Unauthenticated(reason.to_string())
    })?;

    if mode == GateMode::IdentityOnly {
        return Ok(Admission::Identity(identity));
    }

    let user = resolve_user(inner, &identity.external_id).await?;
    Ok(Admission::User(AuthContext {
        external_id: identity.external_id,
        email: identity.email,
        user_id: user.id,
        plan: user.plan,
    }))
}

async fn admit(inner: &Inner, mode: GateMode, header: Option<&str>) -> Result<Admission, ApiError> {
    match establish(inner, mode, header).await {
        Err(_) if mode == GateMode::Optional => Ok(Admission::Anonymous),
        outcome => outcome,
    }
}

pub struct IdentityMiddleware<S> {
    service: Rc<RefCell<S>>,
    mode: GateMode,
    inner: Arc<Inner>,
}

impl<S, B> Service for IdentityMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&mut self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.borrow_mut().poll_ready(ctx)
    }

    fn call(&mut self, req: Self::Request) -> Self::Future {
        let service = self.service.clone();
        let inner = self.inner.clone();
        let mode = self.mode;

        Box::pin(async move {
            let header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match admit(&inner, mode, header.as_deref()).await {
                Ok(admission) => {
                    admission.attach(&req);
                    let fut = service.borrow_mut().call(req);
                    fut.await
                }
                Err(err) => Ok(req.into_response(err.error_response().into_body())),
            }
        })
    }
}

impl<S, B> Transform<S> for IdentityGate
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = IdentityMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityMiddleware {
            service: Rc::new(RefCell::new(service)),
            mode: self.mode,
            inner: self.inner.clone(),
        }))
    }
}
