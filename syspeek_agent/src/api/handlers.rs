use std::net::IpAddr;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::extract::{cleared_cookie, session_cookie, Operator, SessionToken, Viewer};
use crate::auth::AuthStatus;
use crate::config::{RefreshConfig, UiConfig};
use crate::control::{self, Action, UserChanges};
use crate::error::{ApiError, SourceError};
use crate::lookup;
use crate::state::AppState;
use crate::stream::{Category, OpenStream};
use crate::types::{
    ActionResponse, Container, DockerInfo, GroupInfo, IpInfo, LoginResponse, ProcessDetail,
    ServicesInfo, Unavailable, UserInfo,
};

pub const STREAM_ID_HEADER: &str = "x-stream-id";

fn required_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Invalid request body".into()))
}

// an empty body means "all defaults"
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        required_json(body)
    }
}

fn parse_pid(raw: &str) -> Result<u32, ApiError> {
    match raw.parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(ApiError::BadRequest("Invalid PID".into())),
    }
}

fn safe_name<'a>(what: &str, name: &'a str) -> Result<&'a str, ApiError> {
    if control::is_safe_name(name) {
        Ok(name)
    } else {
        Err(ApiError::BadRequest(format!("Invalid {what}")))
    }
}

/// Runs blocking source work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {e}")))?
        .map_err(ApiError::from)
}

/// Plain GET for one category: the same JSON a stream frame carries.
pub async fn metric(state: AppState, category: Category) -> Response {
    let collector = state.collector.clone();
    match tokio::task::spawn_blocking(move || collector.payload(category)).await {
        Ok(Ok(v)) => Json(v).into_response(),
        Ok(Err(e)) => {
            debug!("{category} unavailable: {e}");
            Json(Unavailable::new(e.to_string())).into_response()
        }
        Err(e) => ApiError::Internal(format!("{category} sampler failed: {e}")).into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig<'a> {
    ui: &'a UiConfig,
    refresh: &'a RefreshConfig,
    auth_enabled: bool,
}

pub async fn client_config(State(state): State<AppState>, _v: Viewer) -> Json<Value> {
    let body = ClientConfig {
        ui: &state.config.ui,
        refresh: &state.config.refresh,
        auth_enabled: state.auth.is_enabled(),
    };
    Json(serde_json::to_value(body).unwrap_or(Value::Null))
}

pub async fn own_pid(State(state): State<AppState>, _v: Viewer) -> Json<Value> {
    Json(json!({ "pid": state.self_pid }))
}

// ---------- stream ----------

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub paused: Option<String>,
}

fn parse_categories(list: &str) -> Result<Vec<Category>, ApiError> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<Category>().map_err(|e| ApiError::BadRequest(e.to_string())))
        .collect()
}

pub async fn stream(
    State(state): State<AppState>,
    _v: Viewer,
    Query(q): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let paused = parse_categories(q.paused.as_deref().unwrap_or_default())?;
    let open = state.dispatcher.open(&paused);
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream".to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (HeaderName::from_static("x-accel-buffering"), "no".to_string()),
        (HeaderName::from_static(STREAM_ID_HEADER), open.id.to_string()),
    ];
    Ok((headers, OpenStream::into_body(open.frames)).into_response())
}

#[derive(Debug, Deserialize)]
struct CategoryRequest {
    category: String,
}

pub async fn stream_control(
    State(state): State<AppState>,
    _v: Viewer,
    Path((id, op)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let paused = match op.as_str() {
        "pause" => true,
        "resume" => false,
        _ => return Err(ApiError::NotFound(format!("Unknown stream operation {op}"))),
    };
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest("Invalid stream id".into()))?;
    let req: CategoryRequest = required_json(&body)?;
    let category: Category = req
        .category
        .parse()
        .map_err(|e: crate::stream::UnknownCategory| ApiError::BadRequest(e.to_string()))?;
    if !state.dispatcher.set_paused(id, category, paused) {
        return Err(ApiError::NotFound("Stream session not found".into()));
    }
    Ok(Json(ActionResponse::ok(if paused {
        format!("{category} paused")
    } else {
        format!("{category} resumed")
    })))
}

// ---------- auth ----------

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn login_failure(status: StatusCode, message: &str) -> Response {
    let body = LoginResponse {
        success: false,
        message: Some(message.to_string()),
        ..Default::default()
    };
    (status, Json(body)).into_response()
}

pub async fn login(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<LoginRequest>(&body) else {
        return login_failure(StatusCode::BAD_REQUEST, "Invalid request body");
    };
    let Some(session) = state.auth.login(&req.username, &req.password) else {
        return login_failure(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };
    let cookie = session_cookie(&session.token);
    let body = LoginResponse {
        success: true,
        message: None,
        token: Some(session.token),
        role: Some(session.role.as_str().to_string()),
    };
    ([(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

pub async fn logout(State(state): State<AppState>, SessionToken(token): SessionToken) -> Response {
    if let Some(t) = token {
        state.auth.logout(&t);
    }
    let body = ActionResponse {
        success: true,
        message: None,
    };
    ([(header::SET_COOKIE, cleared_cookie())], Json(body)).into_response()
}

pub async fn auth_status(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Json<AuthStatus> {
    Json(state.auth.status(token.as_deref()))
}

// ---------- processes ----------

pub async fn process_detail(
    State(state): State<AppState>,
    _v: Viewer,
    Path(pid): Path<String>,
) -> Result<Json<ProcessDetail>, ApiError> {
    let pid = parse_pid(&pid)?;
    let collector = state.collector.clone();
    Ok(Json(blocking(move || collector.process_detail(pid)).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KillRequest {
    signal: Option<i32>,
}

pub async fn process_kill(
    State(state): State<AppState>,
    Operator(grant): Operator,
    Path(pid): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let pid = parse_pid(&pid)?;
    let req: KillRequest = optional_json(&body)?;
    let signal = control::kill(pid, req.signal, state.self_pid)?;
    info!(user = grant.username.as_deref().unwrap_or("-"), pid, signal, "kill");
    Ok(Json(ActionResponse::ok(format!("Signal {signal} sent to process {pid}"))))
}

#[derive(Debug, Deserialize)]
struct ReniceRequest {
    priority: i32,
}

pub async fn process_renice(
    _op: Operator,
    Path(pid): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let pid = parse_pid(&pid)?;
    let req: ReniceRequest = required_json(&body)?;
    control::renice(pid, req.priority)?;
    Ok(Json(ActionResponse::ok(format!(
        "Priority of process {pid} set to {}",
        req.priority
    ))))
}

// ---------- lookups ----------

pub async fn ip_lookup(
    State(state): State<AppState>,
    _v: Viewer,
    Path(addr): Path<String>,
) -> Result<Json<IpInfo>, ApiError> {
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid IP address".into()))?;
    let info = state
        .ip_lookup
        .lookup(ip, state.collector.shared_source())
        .await;
    Ok(Json(info))
}

pub async fn user_lookup(
    State(state): State<AppState>,
    _v: Viewer,
    Path(name): Path<String>,
) -> Result<Json<UserInfo>, ApiError> {
    let source = state.collector.shared_source();
    Ok(Json(blocking(move || lookup::user(&*source, &name)).await?))
}

pub async fn group_lookup(
    State(state): State<AppState>,
    _v: Viewer,
    Path(name): Path<String>,
) -> Result<Json<GroupInfo>, ApiError> {
    let source = state.collector.shared_source();
    Ok(Json(blocking(move || lookup::group(&*source, &name)).await?))
}

#[derive(Debug, Deserialize)]
struct GroupRemoveRequest {
    username: String,
}

pub async fn group_remove_user(
    _op: Operator,
    Path(group): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let req: GroupRemoveRequest = required_json(&body)?;
    control::remove_from_group(&group, &req.username).await?;
    Ok(Json(ActionResponse::ok(format!(
        "User {} removed from group {group}",
        req.username
    ))))
}

pub async fn user_modify(
    _op: Operator,
    Path(user): Path<String>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let changes: UserChanges = required_json(&body)?;
    control::modify_user(&user, &changes).await?;
    Ok(Json(ActionResponse::ok("User modified")))
}

// ---------- containers and services ----------

pub async fn docker_list(_v: Viewer) -> Json<DockerInfo> {
    Json(lookup::containers().await)
}

pub async fn docker_detail(
    _v: Viewer,
    Path(id): Path<String>,
) -> Result<Json<Container>, ApiError> {
    let id = safe_name("container id", &id)?;
    Ok(Json(lookup::container(id).await?))
}

pub async fn docker_action(
    _op: Operator,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action: Action = action.parse()?;
    let message = control::container_action(&id, action).await?;
    Ok(Json(ActionResponse::ok(message)))
}

pub async fn services_list(_v: Viewer) -> Json<ServicesInfo> {
    Json(lookup::services().await)
}

pub async fn service_action(
    _op: Operator,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action: Action = action.parse()?;
    let message = control::service_action(&name, action).await?;
    Ok(Json(ActionResponse::ok(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_parsing() {
        assert_eq!(parse_pid("42").unwrap(), 42);
        assert!(parse_pid("0").is_err());
        assert!(parse_pid("-1").is_err());
        assert!(parse_pid("abc").is_err());
    }

    #[test]
    fn category_lists() {
        assert_eq!(
            parse_categories("gpu, firewall").unwrap(),
            vec![Category::Gpu, Category::Firewall]
        );
        assert!(parse_categories("").unwrap().is_empty());
        assert!(matches!(parse_categories("gpu,bogus"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn optional_bodies() {
        let k: KillRequest = optional_json(&Bytes::new()).unwrap();
        assert_eq!(k.signal, None);
        let k: KillRequest = optional_json(&Bytes::from_static(b"{\"signal\":9}")).unwrap();
        assert_eq!(k.signal, Some(9));
        assert!(optional_json::<KillRequest>(&Bytes::from_static(b"{oops")).is_err());
    }
}
