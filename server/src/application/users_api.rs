use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::ApplicationState;
use crate::error::{success, ApiError};
use crate::model::{month_start, parse_profile_update, UserRecord};
use crate::security::AuthContext;
use crate::store::blocking;

pub(super) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/me").route(web::get().to(me)).route(web::put().to(update_me)))
        .route("/stats", web::get().to(stats));
}

async fn fetch_user(state: &ApplicationState, external_id: &str) -> Result<UserRecord, ApiError> {
    let users = state.users.clone();
    let key = external_id.to_string();
    match blocking(move || users.find_by_external_id(&key)).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ApiError::not_found("User not found")),
        Err(err) => Err(state.store_failure("Failed to fetch user", err)),
    }
}

async fn me(state: web::Data<ApplicationState>, ctx: AuthContext) -> Result<HttpResponse, ApiError> {
    let user = fetch_user(&state, &ctx.external_id).await?;
    Ok(success(StatusCode::OK, json!({ "user": user })))
}

async fn update_me(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let update = parse_profile_update(&body).map_err(ApiError::Validation)?;
    if update.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let users = state.users.clone();
    let key = ctx.external_id.clone();
    match blocking(move || users.update_profile(&key, &update, Utc::now())).await {
        Ok(Some(user)) => Ok(success(StatusCode::OK, json!({ "user": user }))),
        Ok(None) => Err(ApiError::not_found("User not found")),
        Err(err) => Err(state.store_failure("Failed to update user", err)),
    }
}

async fn stats(state: web::Data<ApplicationState>, ctx: AuthContext) -> Result<HttpResponse, ApiError> {
    let transactions = state.transactions.clone();
    let user_id = ctx.user_id.clone();
    let since = month_start(Utc::now());
    let (monthly_count, total_count) = blocking(move || {
        let monthly = transactions.count_created_since(&user_id, since)?;
        let total = transactions.count_all(&user_id)?;
        Ok((monthly, total))
    })
    .await
    .map_err(|err| state.store_failure("Failed to fetch statistics", err))?;

    Ok(success(
        StatusCode::OK,
        json!({
            "stats": {
                "monthly_count": monthly_count,
                "total_count": total_count,
                "monthly_limit": state.plans.limit(&ctx.plan),
                "plan": ctx.plan,
            }
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::application::testing::{json_of, test_app, token_for, Fixture};
    use crate::model::{sample_input, Transaction, TransactionType};
    use crate::store::TransactionStore;
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::test;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[actix_rt::test]
    async fn me_returns_the_full_record() {
        let fixture = Fixture::new();
        let user = fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::get()
            .uri("/api/users/me")
            .header(AUTHORIZATION, token_for("abc123"))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["user"]["id"], json!(user.id));
        assert_eq!(body["data"]["user"]["firebase_uid"], "abc123");
    }

    #[actix_rt::test]
    async fn update_changes_only_present_fields() {
        let fixture = Fixture::new();
        fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::put()
            .uri("/api/users/me")
            .header(AUTHORIZATION, token_for("abc123"))
            .set_json(&json!({ "business_name": "Kobutsu Ya", "plan": "premium" }))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 200);
        let user = &body["data"]["user"];
        assert_eq!(user["business_name"], "Kobutsu Ya");
        assert_eq!(user["display_name"], serde_json::Value::Null);
        assert_eq!(user["plan"], "free");
    }

    #[actix_rt::test]
    async fn update_without_known_fields_is_rejected() {
        let fixture = Fixture::new();
        fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::put()
            .uri("/api/users/me")
            .header(AUTHORIZATION, token_for("abc123"))
            .set_json(&json!({ "nickname": "x" }))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["message"], "No fields to update");

        let req = test::TestRequest::put()
            .uri("/api/users/me")
            .header(AUTHORIZATION, token_for("abc123"))
            .set_json(&json!({ "display_name": ["x"] }))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["fields"]["display_name"], "Display name must be a string");
    }

    #[actix_rt::test]
    async fn stats_count_this_month_against_the_plan() {
        let fixture = Fixture::new();
        let user = fixture.register("abc123", "free");

        let mut old = Transaction::create(&user.id, sample_input(TransactionType::Buy, 100, "2020-01-01"), Utc::now());
        old.created_at = Utc::now() - Duration::days(400);
        fixture.transactions.insert(&old).unwrap();
        let fresh = Transaction::create(&user.id, sample_input(TransactionType::Sell, 100, "2020-01-02"), Utc::now());
        fixture.transactions.insert(&fresh).unwrap();
        let mut app = test_app!(fixture);

        let req = test::TestRequest::get()
            .uri("/api/users/stats")
            .header(AUTHORIZATION, token_for("abc123"))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 200);
        assert_eq!(
            body["data"]["stats"],
            json!({ "monthly_count": 1, "total_count": 2, "monthly_limit": 50, "plan": "free" })
        );
    }

    #[actix_rt::test]
    async fn premium_stats_report_unlimited() {
        let fixture = Fixture::new();
        fixture.register("vip", "premium");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::get()
            .uri("/api/users/stats")
            .header(AUTHORIZATION, token_for("vip"))
            .to_request();
        let (_, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(body["data"]["stats"]["monthly_limit"], -1);
        assert_eq!(body["data"]["stats"]["plan"], "premium");
    }
}
