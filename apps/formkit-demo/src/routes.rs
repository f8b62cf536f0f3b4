//! Demo routes: one per pipeline plus the `/user` group.

use axum::response::Response;
use formkit::prelude::*;
use serde::Deserialize;
use serde_json::json;

const TAG: &str = "formkit-demo::routes";

#[derive(Debug, Deserialize)]
struct TestPost {
    username: String,
}

pub fn register(app: &mut App) {
    app.get_with("/testGet", vec![middleware(say_hi)], test_get);
    app.post("/testPost", username_shape(), test_post);
    app.put("/testPut", username_shape(), test_put);

    user_routes(app, "/user");
}

fn username_shape() -> Shape {
    Shape::new().required("username", Validator::String)
}

async fn say_hi(req: Request, next: Next) -> Response {
    tracing::info!(tag = TAG, "heu!");
    next.run(req).await
}

async fn test_get(res: Responder) -> Envelope {
    res.generic_success()
}

async fn test_post(res: Responder, Validated(body): Validated<TestPost>) -> Envelope {
    res.success(
        format!("nice work buddy, you sent me {}", body.username),
        json!({ "hey": "hello" }),
    )
}

async fn test_put(res: Responder, Files(files): Files) -> Envelope {
    for (field, uploads) in files.iter() {
        for file in uploads {
            tracing::info!(
                tag = TAG,
                field,
                file_name = file.file_name.as_deref().unwrap_or("-"),
                size = file.size,
                "received file"
            );
        }
    }
    res.generic_success()
}

fn user_routes(app: &mut App, root: &str) {
    let mut user = app.scope(root, vec![middleware(pass_through)]);
    user.get("/", user_root);
}

async fn pass_through(req: Request, next: Next) -> Response {
    tracing::info!(tag = TAG, "Everything here passes through me!");
    next.run(req).await
}

async fn user_root(res: Responder) -> Envelope {
    res.success(
        "This is the user routes section!",
        json!({ "whatAreYouDoingHere": "noIdea" }),
    )
}
