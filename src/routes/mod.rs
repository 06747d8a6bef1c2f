//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (one exercise session per socket)
/// - REST-ish API under `/api/v1/...`, admin routes under `/api/v1/admin/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    let admin = Router::new()
        .route("/chapter", post(http::http_post_chapter))
        .route("/chapters_list", get(http::http_get_chapters))
        .route("/lock", post(http::http_post_lock))
        .route("/access_map", get(http::http_get_access_map))
        .route("/exercise", post(http::http_post_exercise))
        .route("/question/validate", post(http::http_post_validate_question))
        .route("/queue", get(http::http_get_queue).post(http::http_post_queue))
        .route("/queue/publish", post(http::http_post_queue_publish))
        .route("/queue/:index", delete(http::http_delete_queue));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/batches", get(http::http_get_batches))
        .route("/api/v1/exercises", get(http::http_get_exercises))
        .route("/api/v1/exercise/:id", get(http::http_get_exercise))
        .route("/api/v1/progress/complete", post(http::http_post_progress))
        .route("/api/v1/progress/me", get(http::http_get_my_progress))
        .nest("/api/v1/admin", admin)
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::store::Store;

    fn app() -> Router {
        build_router(Arc::new(AppState::with_parts(Store::new(10), None, AppConfig::default())))
    }

    #[tokio::test]
    async fn health_is_open() {
        let res = app()
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn identity_and_role_gate_the_api() {
        let res = app()
            .oneshot(Request::get("/api/v1/progress/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = Request::post("/api/v1/admin/chapter")
            .header("x-user-id", "4")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Les nombres"}"#))
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn empty_publish_is_a_bad_request() {
        let req = Request::post("/api/v1/admin/exercise")
            .header("x-user-id", "1")
            .header("x-user-role", "admin")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"Vide","chapter_id":1,"questions":[]}"#))
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_get_the_error_shape() {
        let req = Request::post("/api/v1/progress/complete")
            .header("x-user-id", "2")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"lesson_id":"5","xp_gained":"lots"}"#))
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));

        let req = Request::post("/api/v1/admin/exercise")
            .header("x-user-id", "1")
            .header("x-user-role", "admin")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title":"T","chapter_id":1,"questions":[{"content":{}}]}"#))
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn draft_queue_routes_are_admin_only() {
        let app = app();
        let req = Request::post("/api/v1/admin/queue")
            .header("x-user-id", "1")
            .header("x-user-role", "admin")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"question_type":"speaking","content":{"text":"Bonjour"}}"#))
            .unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = Request::delete("/api/v1/admin/queue/0").header("x-user-id", "1").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::FORBIDDEN);

        let req = Request::delete("/api/v1/admin/queue/0")
            .header("x-user-id", "1")
            .header("x-user-role", "admin")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn progress_without_xp_is_rejected() {
        let req = Request::post("/api/v1/progress/complete")
            .header("x-user-id", "2")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"lesson_id":"5"}"#))
            .unwrap();
        assert_eq!(app().oneshot(req).await.unwrap().status(), StatusCode::BAD_REQUEST);
    }
}
