mod auth_api;
mod stats_api;
mod transactions_api;
mod upload_api;
mod users_api;

use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use slog::{error, Logger};

use crate::error::ApiError;
use crate::model::PlanLimits;
use crate::security::IdentityGate;
use crate::store::{SharedDirectory, SharedImages, SharedTransactions, StoreError};

/// Everything handlers share. Cheap to clone; registered once per worker.
#[derive(Clone)]
pub struct ApplicationState {
    pub users: SharedDirectory,
    pub transactions: SharedTransactions,
    pub images: Option<SharedImages>,
    pub plans: PlanLimits,
    pub upload_limit: usize,
    pub log: Logger,
}

impl ApplicationState {
    /// Log a storage failure and turn it into a caller-safe error.
    pub(crate) fn store_failure(&self, message: &str, err: StoreError) -> ApiError {
        error!(self.log, "{}", message; "error" => %err);
        ApiError::dependency(message)
    }
}

/// Register every route. Public routes stay outside the gate; each `/api`
/// scope is wrapped with the gate mode it needs.
pub fn configure(gate: IdentityGate) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(json_config())
            .app_data(query_config())
            .route("/", web::get().to(index))
            .route("/api/health", web::get().to(health))
            .service(web::scope("/api/auth").wrap(gate.identity_only()).configure(auth_api::routes))
            .service(web::scope("/api/users").wrap(gate.required()).configure(users_api::routes))
            .service(
                web::scope("/api/transactions")
                    .wrap(gate.required())
                    .configure(transactions_api::routes),
            )
            .service(web::scope("/api/upload").wrap(gate.required()).configure(upload_api::routes))
            .service(web::scope("/api/stats").wrap(gate.required()).configure(stats_api::routes));
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req: &HttpRequest| {
            ApiError::bad_request(match err {
                JsonPayloadError::ContentType => "Content type must be application/json",
                _ => "Invalid JSON body",
            })
            .into()
        })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|_err, _req: &HttpRequest| ApiError::bad_request("Invalid query parameters").into())
}

/// Request bodies that may be omitted entirely read as an empty object.
pub(crate) fn optional_object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::bad_request("Request body must be a JSON object")),
    }
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "service": "kobutsu-log" }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::dev::{MessageBody, ServiceResponse};
    use actix_web::test;
    use chrono::Utc;
    use serde_json::Value;
    use slog::{o, Logger};

    use super::ApplicationState;
    use crate::model::{PlanLimits, Profile, UserRecord};
    use crate::security::testing::{bearer, claims_for};
    use crate::security::IdentityGate;
    use crate::store::{MemoryImageStore, MemoryTransactionStore, MemoryUserDirectory, UserDirectory};

    pub const PROJECT: &str = "proj1";

    /// Builds the full application over a [`Fixture`]'s state.
    macro_rules! test_app {
        ($fixture:expr) => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .data($fixture.state.clone())
                    .configure($crate::application::configure($fixture.gate.clone())),
            )
            .await
        };
    }
    pub(crate) use test_app;

    /// In-memory backends plus handles the tests can inspect.
    pub struct Fixture {
        pub users: Arc<MemoryUserDirectory>,
        pub transactions: Arc<MemoryTransactionStore>,
        pub images: Arc<MemoryImageStore>,
        pub state: ApplicationState,
        pub gate: IdentityGate,
    }

    impl Fixture {
        pub fn new() -> Self {
            let log = Logger::root(slog::Discard, o!());
            let users = Arc::new(MemoryUserDirectory::new());
            let transactions = Arc::new(MemoryTransactionStore::new());
            let images = Arc::new(MemoryImageStore::new());
            let state = ApplicationState {
                users: users.clone(),
                transactions: transactions.clone(),
                images: Some(images.clone()),
                plans: PlanLimits::default(),
                upload_limit: 1024,
                log: log.clone(),
            };
            let gate = IdentityGate::new(
                Some(PROJECT.to_string()),
                None,
                Duration::from_millis(500),
                users.clone(),
                &log,
            );
            Fixture { users, transactions, images, state, gate }
        }

        /// Put a user straight into the directory.
        pub fn register(&self, external_id: &str, plan: &str) -> UserRecord {
            let mut user = UserRecord::register(external_id, "dealer@example.com", Profile::default(), Utc::now());
            user.plan = plan.to_string();
            self.users.insert(&user).unwrap();
            user
        }
    }

    /// `Authorization` header value for a currently valid token.
    pub fn token_for(external_id: &str) -> String {
        bearer(&claims_for(external_id, PROJECT, Utc::now().timestamp()))
    }

    pub async fn json_of<B: MessageBody + Unpin>(resp: ServiceResponse<B>) -> (u16, Value) {
        let status = resp.status().as_u16();
        let body = test::read_body(resp).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{json_of, test_app, Fixture};
    use actix_web::test;

    #[actix_rt::test]
    async fn public_routes_skip_the_gate() {
        let fixture = Fixture::new();
        let mut app = test_app!(fixture);

        let (status, body) = json_of(test::call_service(&mut app, test::TestRequest::get().uri("/").to_request()).await).await;
        assert_eq!(status, 200);
        assert_eq!(body["service"], "kobutsu-log");

        let (status, body) =
            json_of(test::call_service(&mut app, test::TestRequest::get().uri("/api/health").to_request()).await).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(fixture.users.lookups(), 0);
    }

    #[actix_rt::test]
    async fn api_routes_require_a_token() {
        let fixture = Fixture::new();
        let mut app = test_app!(fixture);
        for uri in &["/api/users/me", "/api/transactions", "/api/stats/monthly", "/api/auth/verify"] {
            let method = if uri.starts_with("/api/auth") { test::TestRequest::post() } else { test::TestRequest::get() };
            let (status, body) = json_of(test::call_service(&mut app, method.uri(uri).to_request()).await).await;
            assert_eq!(status, 401, "{}", uri);
            assert_eq!(body["error"]["message"], "Authorization header required");
        }
    }

    #[test]
    fn optional_object_accepts_empty_bodies_only_as_empty() {
        assert!(super::optional_object(b"").unwrap().is_empty());
        assert!(super::optional_object(b"  \n").unwrap().is_empty());
        assert_eq!(super::optional_object(br#"{"a":1}"#).unwrap().len(), 1);
        assert!(super::optional_object(b"[1]").is_err());
        assert!(super::optional_object(b"{").is_err());
    }
}
