//! HTTP surface of the relay.
//!
//! ## Structure
//! - **Public**
//!   - `GET  /login`, `POST /login`, `GET /logout`
//!   - `GET  /api/health`
//!   - `GET  /style.css`, `GET /app.js`
//!
//! - **Behind the session gate**
//!   - `GET  /` (uploader page)
//!   - `POST /api/upload`

use crate::{
    handlers::{
        auth_handlers::{login, login_page, logout, require_session},
        health_handlers::health,
        upload_handlers::upload_file,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::Method,
    middleware,
    routing::{get, get_service, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeFile,
    trace::TraceLayer,
};

/// Build the full router with its state attached.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);
    let static_dir = state.static_dir.clone();

    let protected = Router::new()
        .route(
            "/",
            get_service(ServeFile::new(static_dir.join("index.html"))),
        )
        .route("/api/upload", post(upload_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .merge(protected)
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route("/api/health", get(health))
        .route_service("/style.css", ServeFile::new(static_dir.join("style.css")))
        .route_service("/app.js", ServeFile::new(static_dir.join("app.js")))
        // Uploads are unbounded; the transfer path never buffers a whole body.
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request| {
                let method = req.method();
                let uri = req.uri();
                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched_path| matched_path.as_str());

                tracing::debug_span!("request", %method, %uri, matched_path)
            }),
        )
        .with_state(state)
}
