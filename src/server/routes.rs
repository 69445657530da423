//! HTTP routes.
//!
//! - `GET /?url=<url>` fetches, resizes and stores the image at `url`
//! - `POST /` with `multipart/form-data` takes the image from the `image` field
//! - `POST /` with `application/json` takes a base64 `image` field
//!
//! A successful job answers `200 OK` with an empty body.

use crate::pipeline::JobSubmitter;
use crate::server::error::{ApiError, ApiResult};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;

/// Room for multipart headers and base64 expansion on top of the image itself.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    submitter: Arc<dyn JobSubmitter>,
    max_image_size: u64,
}

#[derive(Debug, Deserialize)]
struct UrlParams {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonImage {
    #[serde(default)]
    image: String,
}

/// Build the router over any submitter.
pub fn router(submitter: Arc<dyn JobSubmitter>, max_image_size: u64) -> Router {
    let max = usize::try_from(max_image_size).unwrap_or(usize::MAX);
    let body_limit = max.saturating_add(max / 3).saturating_add(BODY_OVERHEAD_BYTES);

    let state = AppState {
        submitter,
        max_image_size,
    };

    Router::new()
        .route(
            "/",
            get(image_from_url)
                .post(image_from_body)
                .fallback(unsupported_method),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn image_from_url(
    State(state): State<AppState>,
    Query(params): Query<UrlParams>,
) -> ApiResult<StatusCode> {
    let url = params
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required parameter 'url'"))?;

    state.submitter.submit_from_url(url).await?;
    Ok(StatusCode::OK)
}

async fn unsupported_method() -> ApiError {
    ApiError::bad_request("The path with this method is missing.")
}

async fn image_from_body(State(state): State<AppState>, request: Request) -> ApiResult<StatusCode> {
    if let Some(length) = content_length(request.headers()) {
        if length > state.max_image_size {
            return Err(ApiError::payload_too_large(format!(
                "Image size is too large: {} bytes exceeds the limit of {} bytes",
                length, state.max_image_size
            )));
        }
    }

    let image = match media_type(request.headers()).as_deref() {
        Some("multipart/form-data") => image_from_multipart(request, &state).await?,
        Some("application/json") => image_from_json(request, &state).await?,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Undefined content-type for POST method: {}",
                other
            )))
        }
        None => return Err(ApiError::bad_request("Missing Content-Type header")),
    };

    state.submitter.submit_bytes(image).await?;
    Ok(StatusCode::OK)
}

async fn image_from_multipart(request: Request, state: &AppState) -> ApiResult<Bytes> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
    {
        if field.name() == Some("image") {
            return field
                .bytes()
                .await
                .map_err(|e| ApiError::rejected(e.status(), e.body_text()));
        }
    }

    Err(ApiError::bad_request("Can't take image: missing form field 'image'"))
}

async fn image_from_json(request: Request, state: &AppState) -> ApiResult<Bytes> {
    let Json(body) = Json::<JsonImage>::from_request(request, state)
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;

    if body.image.is_empty() {
        return Err(ApiError::bad_request("Field 'image' cannot be empty"));
    }

    let image = base64::engine::general_purpose::STANDARD
        .decode(body.image.as_bytes())
        .map_err(|e| ApiError::bad_request(format!("Field 'image' is not valid base64: {}", e)))?;

    Ok(Bytes::from(image))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Media type without parameters, lowercased.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next().unwrap_or("").trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, JobOutcome};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    const MAX: u64 = 1024;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Url(String),
        Bytes(Vec<u8>),
    }

    struct MockSubmitter {
        calls: Mutex<Vec<Call>>,
        outcome: Box<dyn Fn() -> JobOutcome + Send + Sync>,
    }

    impl MockSubmitter {
        fn ok() -> Arc<Self> {
            Self::returning(|| Ok(()))
        }

        fn returning(outcome: impl Fn() -> JobOutcome + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outcome: Box::new(outcome),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobSubmitter for MockSubmitter {
        async fn submit_from_url(&self, url: String) -> JobOutcome {
            self.calls.lock().unwrap().push(Call::Url(url));
            (self.outcome)()
        }

        async fn submit_bytes(&self, image: Bytes) -> JobOutcome {
            self.calls.lock().unwrap().push(Call::Bytes(image.to_vec()));
            (self.outcome)()
        }
    }

    async fn send(submitter: Arc<MockSubmitter>, request: HttpRequest<Body>) -> (StatusCode, Option<serde_json::Value>) {
        let app = router(submitter, MAX);
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).ok();
        (status, json)
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(field: &str, data: &[u8]) -> HttpRequest<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XBOUNDARY\r\n");
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"cat.png\"\r\n",
                field
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");

        HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn get_submits_url() {
        let submitter = MockSubmitter::ok();
        let (status, _) = send(
            submitter.clone(),
            get_request("/?url=http%3A%2F%2Fimg.test%2Fcat.jpg"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitter.calls(), vec![Call::Url("http://img.test/cat.jpg".into())]);
    }

    #[tokio::test]
    async fn get_without_url_is_bad_request() {
        let submitter = MockSubmitter::ok();

        let (status, body) = send(submitter.clone(), get_request("/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["code"], "BAD_REQUEST");

        let (status, _) = send(submitter.clone(), get_request("/?url=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn post_json_submits_decoded_bytes() {
        let submitter = MockSubmitter::ok();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");

        let (status, _) = send(submitter.clone(), json_request(&format!(r#"{{"image":"{}"}}"#, encoded))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitter.calls(), vec![Call::Bytes(b"\x89PNG fake".to_vec())]);
    }

    #[tokio::test]
    async fn post_json_rejects_bad_payloads() {
        let submitter = MockSubmitter::ok();

        for body in [r#"{"image":""}"#, r#"{}"#, r#"{"image":"%%%"}"#, "not json"] {
            let (status, _) = send(submitter.clone(), json_request(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        }
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn post_multipart_submits_image_field() {
        let submitter = MockSubmitter::ok();

        let (status, _) = send(submitter.clone(), multipart_request("image", b"raw image")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitter.calls(), vec![Call::Bytes(b"raw image".to_vec())]);
    }

    #[tokio::test]
    async fn post_multipart_without_image_field() {
        let submitter = MockSubmitter::ok();

        let (status, _) = send(submitter.clone(), multipart_request("photo", b"raw image")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn post_oversized_content_length() {
        let submitter = MockSubmitter::ok();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, (MAX + 1).to_string())
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = send(submitter.clone(), request).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body.unwrap()["code"], "PAYLOAD_TOO_LARGE");
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn other_methods_are_bad_request() {
        let submitter = MockSubmitter::ok();
        let request = HttpRequest::builder()
            .method("PUT")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(submitter.clone(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["code"], "BAD_REQUEST");
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn post_unknown_content_type() {
        let submitter = MockSubmitter::ok();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();

        let (status, _) = send(submitter.clone(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(submitter.calls().is_empty());
    }

    #[tokio::test]
    async fn job_errors_map_to_status() {
        let cases = vec![
            (JobError::MissingImage, StatusCode::BAD_REQUEST, "MISSING_IMAGE"),
            (
                JobError::ImageTooLarge { size: 2048, limit: 1024 },
                StatusCode::PAYLOAD_TOO_LARGE,
                "IMAGE_TOO_LARGE",
            ),
            (
                JobError::FetchStatus {
                    url: "http://img.test/x".into(),
                    status: 404,
                },
                StatusCode::BAD_GATEWAY,
                "FETCH_STATUS",
            ),
            (
                JobError::Transform {
                    source: "unsupported format".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
                "TRANSFORM",
            ),
            (JobError::Timeout(Duration::from_secs(10)), StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            (JobError::ShutDown, StatusCode::SERVICE_UNAVAILABLE, "SHUT_DOWN"),
        ];

        for (err, expected_status, expected_code) in cases {
            let err = Mutex::new(Some(err));
            let submitter = MockSubmitter::returning(move || {
                Err(err.lock().unwrap().take().unwrap_or(JobError::JobLost))
            });
            let (status, body) = send(submitter, get_request("/?url=http://img.test/x")).await;
            assert_eq!(status, expected_status);
            assert_eq!(body.unwrap()["code"], expected_code);
        }
    }

    #[test]
    fn media_type_strips_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "Multipart/Form-Data; boundary=abc".parse().unwrap(),
        );
        assert_eq!(media_type(&headers).as_deref(), Some("multipart/form-data"));

        headers.remove(header::CONTENT_TYPE);
        assert_eq!(media_type(&headers), None);
    }
}
