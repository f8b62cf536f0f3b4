use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use formkit::prelude::*;
use formkit::RequestId;
use serde_json::json;
use tower::util::ServiceExt; // for `oneshot`

fn test_app() -> axum::Router {
    let mut app: App = App::new(AppOptions::production());
    app.get("/test", |res: Responder, rid: RequestId| async move {
        res.success("ok", json!({ "request_id": rid.as_str() }))
    });
    app.get("/error", || async {
        Err::<Envelope, _>(ApiError::internal_error("Test error"))
    });
    app.into_router()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn generates_request_id_when_missing() {
    let response = test_app()
        .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    assert!(
        header.as_deref().is_some_and(|id| !id.is_empty()),
        "x-request-id should be generated"
    );

    let json = body_json(response).await;
    assert_eq!(json["request_id"].as_str(), header.as_deref());
}

#[tokio::test]
async fn preserves_incoming_request_id() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/test")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok());
    assert_eq!(request_id, Some("abc-123"));
}

#[tokio::test]
async fn error_envelopes_keep_the_request_id_header() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/error")
                .header("x-request-id", "error-test-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok());
    assert_eq!(request_id, Some("error-test-123"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "failure");
    assert_eq!(json["message"], "Test error");
}
