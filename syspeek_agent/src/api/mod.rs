//! HTTP surface: routes, handlers and the access extractors that guard them.

pub mod extract;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post, MethodRouter},
    Router,
};

use crate::state::AppState;
use crate::stream::Category;
use extract::Viewer;

pub use handlers::STREAM_ID_HEADER;

fn metric_route(category: Category) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>, _v: Viewer| handlers::metric(state, category))
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new();
    for category in Category::ALL {
        app = app.route(&format!("/api/{category}"), metric_route(category));
    }
    app.route("/api/config", get(handlers::client_config))
        .route("/api/pid", get(handlers::own_pid))
        .route("/api/stream", get(handlers::stream))
        .route("/api/stream/:id/:op", post(handlers::stream_control))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/status", get(handlers::auth_status))
        .route("/api/process/:pid", get(handlers::process_detail))
        .route("/api/process/:pid/kill", post(handlers::process_kill))
        .route("/api/process/:pid/renice", post(handlers::process_renice))
        .route("/api/ip/:addr", get(handlers::ip_lookup))
        .route("/api/user/:name", get(handlers::user_lookup))
        .route("/api/user/:name/modify", post(handlers::user_modify))
        .route("/api/group/:name", get(handlers::group_lookup))
        .route("/api/group/:name/remove", post(handlers::group_remove_user))
        .route("/api/docker", get(handlers::docker_list))
        .route("/api/docker/:id", get(handlers::docker_detail))
        .route("/api/docker/:id/:action", post(handlers::docker_action))
        .route("/api/services", get(handlers::services_list))
        .route("/api/services/:name/:action", post(handlers::service_action))
        .with_state(state)
}
