//! End-to-end behaviour of the assembled router: pipelines, middleware
//! ordering, envelopes and the dev-mode extras.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use formkit::prelude::*;
use formkit::messages;
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[derive(Deserialize)]
struct Login {
    username: String,
}

#[derive(Deserialize)]
struct Quantity {
    n: i64,
}

fn login_shape() -> Shape {
    Shape::new().required("username", Validator::String)
}

fn test_app(options: AppOptions) -> Router {
    let mut app: App = App::new(options);

    app.post(
        "/testPost",
        login_shape(),
        |res: Responder, Validated(login): Validated<Login>| async move {
            res.success(
                format!("nice work buddy, you sent me {}", login.username),
                json!({"hey": "hello"}),
            )
        },
    );

    app.put(
        "/testPut",
        Shape::new().optional("note", Validator::String),
        |res: Responder, Files(files): Files| async move {
            let names: Vec<String> = files
                .iter()
                .flat_map(|(_, fs)| fs.iter().filter_map(|f| f.file_name.clone()))
                .collect();
            res.success(messages::SUCC_GENERIC, json!({ "files": names }))
        },
    );

    app.patch(
        "/tags",
        Shape::new().required("tags", Validator::array(Validator::String)),
        |res: Responder, Validated(body): Validated| async move {
            res.success("tags updated", json!({ "count": body["tags"].as_array().map_or(0, Vec::len) }))
        },
    );

    app.post(
        "/quantity",
        Shape::new().required("n", Validator::Integer),
        |res: Responder, Validated(q): Validated<Quantity>| async move {
            res.success(messages::SUCC_GENERIC, json!({ "doubled": q.n * 2 }))
        },
    );

    app.get("/silent", || async {});

    app.into_router()
}

#[tokio::test]
async fn valid_json_body_reaches_handler() {
    let resp = test_app(AppOptions::development())
        .oneshot(json_post("/testPost", json!({"username": "bob"})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({
            "status": "success",
            "message": "nice work buddy, you sent me bob",
            "hey": "hello",
        })
    );
}

#[tokio::test]
async fn urlencoded_body_is_accepted() {
    let req = Request::builder()
        .method("POST")
        .uri("/testPost")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=alice"))
        .unwrap();

    let resp = test_app(AppOptions::production()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "nice work buddy, you sent me alice");
}

#[tokio::test]
async fn integral_float_reaches_typed_integer_field() {
    let resp = test_app(AppOptions::production())
        .oneshot(json_post("/quantity", json!({"n": 2.0})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["doubled"], 4);

    let req = Request::builder()
        .method("POST")
        .uri("/quantity")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("n=2.0"))
        .unwrap();
    let resp = test_app(AppOptions::production()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["doubled"], 4);

    let resp = test_app(AppOptions::production())
        .oneshot(json_post("/quantity", json!({"n": 2.5})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_field_in_development_carries_hints() {
    let resp = test_app(AppOptions::development())
        .oneshot(json_post("/testPost", json!({})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "failure");
    assert_eq!(body["message"], messages::ERR_INCM_BODY);
    assert_eq!(body["expectedBody"], "username: string");
    assert!(body["devNote"].as_str().unwrap().contains("username"));
}

#[tokio::test]
async fn missing_field_in_production_is_generic() {
    let resp = test_app(AppOptions::production())
        .oneshot(json_post("/testPost", json!({})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(resp).await,
        json!({"status": "failure", "message": messages::ERR_GENERIC})
    );
}

#[tokio::test]
async fn undeclared_field_is_rejected() {
    let resp = test_app(AppOptions::development())
        .oneshot(json_post("/testPost", json!({"username": "bob", "admin": true})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["devNote"], "`admin`: unexpected field");
}

#[tokio::test]
async fn composite_field_message_is_verbatim_in_both_modes() {
    for options in [AppOptions::development(), AppOptions::production()] {
        let req = Request::builder()
            .method("PATCH")
            .uri("/tags")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"tags": ["a", 1]}).to_string()))
            .unwrap();

        let resp = test_app(options).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "`tags[1]`: expected string, received number");
        assert!(body.get("devNote").is_none());
    }
}

#[tokio::test]
async fn body_failures_map_to_fixed_messages() {
    let cases = [
        (None, "", messages::ERR_BODY_NOT_PROVIDED),
        (Some("application/json"), "{nope", messages::ERR_INC_BODY),
        (Some("application/json"), "   ", messages::ERR_BODY_EMPTY),
        (Some("text/plain"), "username=bob", messages::ERR_UNSUPPORTED_BODY),
    ];

    for (content_type, raw, expected) in cases {
        let mut builder = Request::builder().method("POST").uri("/testPost");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder.body(Body::from(raw)).unwrap();

        let resp = test_app(AppOptions::development()).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{raw:?}");
        assert_eq!(body_json(resp).await["message"], expected, "{raw:?}");
    }
}

#[tokio::test]
async fn multipart_files_are_exposed() {
    let body = concat!(
        "--XBOUND\r\n",
        "Content-Disposition: form-data; name=\"note\"\r\n",
        "\r\n",
        "holiday\r\n",
        "--XBOUND\r\n",
        "Content-Disposition: form-data; name=\"photo\"; filename=\"beach.jpg\"\r\n",
        "Content-Type: image/jpeg\r\n",
        "\r\n",
        "JPEGDATA\r\n",
        "--XBOUND--\r\n",
    );
    let req = Request::builder()
        .method("PUT")
        .uri("/testPut")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUND")
        .body(Body::from(body))
        .unwrap();

    let resp = test_app(AppOptions::development()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["files"], json!(["beach.jpg"]));
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let app = test_app(AppOptions::development().with_body_limit(16));
    let resp = app
        .oneshot(json_post(
            "/testPost",
            json!({"username": "a-rather-long-username-that-does-not-fit"}),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(resp).await["status"], "failure");
}

#[tokio::test]
async fn empty_handler_gets_dev_placeholder() {
    let resp = test_app(AppOptions::development())
        .oneshot(get("/silent"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, messages::DEV_NO_BODY);

    let resp = test_app(AppOptions::production())
        .oneshot(get("/silent"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "");
}

type Trail = Arc<Mutex<Vec<&'static str>>>;

fn recording(trail: &Trail, label: &'static str) -> Middleware {
    let trail = trail.clone();
    middleware(move |req: Request<Body>, next: Next| {
        let trail = trail.clone();
        async move {
            trail.lock().unwrap().push(label);
            next.run(req).await
        }
    })
}

fn ordered_app(trail: &Trail) -> Router {
    let mut app: App = App::new(AppOptions::development());
    {
        let mut user = app.scope("/user", vec![recording(trail, "shared")]);

        let handler_trail = trail.clone();
        user.get_with("/", vec![recording(trail, "route")], move |res: Responder| {
            let trail = handler_trail.clone();
            async move {
                trail.lock().unwrap().push("handler");
                res.success(
                    "This is the user routes section!",
                    json!({"whatAreYouDoingHere": "noIdea"}),
                )
            }
        });

        let handler_trail = trail.clone();
        user.post_with(
            "/login",
            login_shape(),
            vec![recording(trail, "route")],
            move |res: Responder| {
                let trail = handler_trail.clone();
                async move {
                    trail.lock().unwrap().push("handler");
                    res.generic_success()
                }
            },
        );
    }
    app.into_router()
}

#[tokio::test]
async fn shared_then_route_middleware_then_handler() {
    let trail: Trail = Arc::default();
    let resp = ordered_app(&trail).oneshot(get("/user")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(*trail.lock().unwrap(), vec!["shared", "route", "handler"]);
    assert_eq!(body_json(resp).await["whatAreYouDoingHere"], "noIdea");
}

#[tokio::test]
async fn invalid_body_never_reaches_user_middleware() {
    let trail: Trail = Arc::default();
    let resp = ordered_app(&trail)
        .oneshot(json_post("/user/login", json!({"nope": 1})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(trail.lock().unwrap().is_empty());

    let resp = ordered_app(&trail)
        .oneshot(json_post("/user/login", json!({"username": "bob"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(*trail.lock().unwrap(), vec!["shared", "route", "handler"]);
}

#[tokio::test]
async fn middleware_can_short_circuit_with_an_error() {
    let guard = middleware(|req: Request<Body>, next: Next| async move {
        if req.headers().contains_key(header::AUTHORIZATION) {
            Ok(next.run(req).await)
        } else {
            Err(ApiError::unauthorized(messages::ERR_INV_CREDS))
        }
    });

    let mut app: App = App::new(AppOptions::production());
    app.get_with("/private", vec![guard], |res: Responder| async move {
        res.generic_success()
    });
    let router = app.into_router();

    let resp = router.clone().oneshot(get("/private")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(resp).await,
        json!({"status": "failure", "message": messages::ERR_INV_CREDS})
    );

    let req = Request::builder()
        .uri("/private")
        .header(header::AUTHORIZATION, "Bearer t")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], messages::SUCC_GENERIC);
}
