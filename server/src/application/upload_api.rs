use actix_web::http::header::CONTENT_TYPE;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use slog::{info, warn};
use uuid::Uuid;

use super::ApplicationState;
use crate::error::{success, ApiError};
use crate::model::ImageKind;
use crate::security::AuthContext;
use crate::store::{blocking, SharedImages};

pub(super) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/image", web::post().to(upload))
        .route("/image/{owner}/{file}", web::get().to(download));
}

fn image_store(state: &ApplicationState) -> Result<SharedImages, ApiError> {
    state
        .images
        .clone()
        .ok_or_else(|| ApiError::NotImplemented("Image storage is not configured".to_string()))
}

/// `{user_id}/{unix_millis}_{uuid}.{ext}`
fn new_key(user_id: &str, kind: ImageKind) -> String {
    format!(
        "{}/{}_{}.{}",
        user_id,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        kind.extension()
    )
}

async fn upload(
    req: HttpRequest,
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    mut payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let images = image_store(&state)?;
    let kind = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(ImageKind::from_content_type)
        .ok_or_else(|| ApiError::bad_request("Only JPEG, PNG and WebP images are allowed"))?;

    let mut bytes = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|err| {
            warn!(state.log, "upload body could not be read"; "error" => %err);
            ApiError::bad_request("Could not read upload body")
        })?;
        if bytes.len() + chunk.len() > state.upload_limit {
            return Err(ApiError::bad_request("File too large"));
        }
        bytes.extend_from_slice(&chunk);
    }
    if bytes.is_empty() {
        return Err(ApiError::bad_request("No image data"));
    }

    let key = new_key(&ctx.user_id, kind);
    let size = bytes.len();
    let data = bytes.freeze();
    let stored_key = key.clone();
    blocking(move || images.put(&stored_key, &data, kind.content_type()))
        .await
        .map_err(|err| state.store_failure("Failed to store image", err))?;

    info!(state.log, "image stored"; "key" => &key, "size" => size);
    Ok(success(
        StatusCode::CREATED,
        json!({
            "url": format!("/api/upload/image/{}", key),
            "key": key,
            "content_type": kind.content_type(),
            "size": size,
        }),
    ))
}

async fn download(
    state: web::Data<ApplicationState>,
    ctx: AuthContext,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (owner, file) = path.into_inner();
    // images are private to their uploader
    if owner != ctx.user_id || file.starts_with('.') {
        return Err(ApiError::not_found("Image not found"));
    }

    let images = image_store(&state)?;
    let key = format!("{}/{}", owner, file);
    match blocking(move || images.get(&key)).await {
        Ok(Some(image)) => Ok(HttpResponse::Ok().content_type(image.content_type).body(image.bytes)),
        Ok(None) => Err(ApiError::not_found("Image not found")),
        Err(err) => Err(state.store_failure("Failed to fetch image", err)),
    }
}

#[cfg(test)]
mod tests {
    use crate::application::testing::{json_of, test_app, token_for, Fixture};
    use crate::store::ImageStore;
    use actix_web::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use actix_web::test;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n fake image";

    #[actix_rt::test]
    async fn upload_then_download_own_image() {
        let fixture = Fixture::new();
        let user = fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::post()
            .uri("/api/upload/image")
            .header(AUTHORIZATION, token_for("abc123"))
            .header(CONTENT_TYPE, "image/png")
            .set_payload(PNG)
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 201);
        let key = body["data"]["key"].as_str().unwrap().to_string();
        assert!(key.starts_with(&format!("{}/", user.id)));
        assert!(key.ends_with(".png"));
        assert_eq!(body["data"]["url"], format!("/api/upload/image/{}", key));
        assert_eq!(body["data"]["content_type"], "image/png");
        assert_eq!(body["data"]["size"], PNG.len());
        assert!(fixture.images.get(&key).unwrap().is_some());

        let req = test::TestRequest::get()
            .uri(&format!("/api/upload/image/{}", key))
            .header(AUTHORIZATION, token_for("abc123"))
            .to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(test::read_body(resp).await.as_ref(), PNG);
    }

    #[actix_rt::test]
    async fn other_users_cannot_read_an_image() {
        let fixture = Fixture::new();
        let owner = fixture.register("owner", "free");
        fixture.register("intruder", "free");
        let key = format!("{}/1700000000000_abc.png", owner.id);
        fixture.images.put(&key, PNG, "image/png").unwrap();
        let mut app = test_app!(fixture);

        let req = test::TestRequest::get()
            .uri(&format!("/api/upload/image/{}", key))
            .header(AUTHORIZATION, token_for("intruder"))
            .to_request();
        let (status, body) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["message"], "Image not found");
    }

    #[actix_rt::test]
    async fn rejects_bad_uploads() {
        let fixture = Fixture::new();
        fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let too_big = vec![0u8; 1025];
        let cases: Vec<(&str, &[u8], &str)> = vec![
            ("image/gif", PNG, "Only JPEG, PNG and WebP images are allowed"),
            ("image/jpeg", &b""[..], "No image data"),
            ("image/webp", &too_big[..], "File too large"),
        ];
        for (content_type, payload, message) in cases {
            let req = test::TestRequest::post()
                .uri("/api/upload/image")
                .header(AUTHORIZATION, token_for("abc123"))
                .header(CONTENT_TYPE, content_type)
                .set_payload(payload.to_vec())
                .to_request();
            let (status, body) = json_of(test::call_service(&mut app, req).await).await;
            assert_eq!(status, 400, "{}", content_type);
            assert_eq!(body["error"]["message"], message);
        }
    }

    #[actix_rt::test]
    async fn missing_image_store_is_not_implemented() {
        let mut fixture = Fixture::new();
        fixture.state.images = None;
        fixture.register("abc123", "free");
        let mut app = test_app!(fixture);

        let req = test::TestRequest::post()
            .uri("/api/upload/image")
            .header(AUTHORIZATION, token_for("abc123"))
            .header(CONTENT_TYPE, "image/png")
            .set_payload(PNG)
            .to_request();
        let (status, _) = json_of(test::call_service(&mut app, req).await).await;
        assert_eq!(status, 501);
    }
}
