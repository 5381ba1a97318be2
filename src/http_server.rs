//! HTTP and WebSocket bridge between a page and the session manager / watchdog.

use crate::activity::InteractionKind;
use crate::control::{ControlSpec, ControlView, Fault};
use crate::error::{ControlError, Stopped};
use crate::lifecycle::{take_timeout_notice, LogoutMode, SessionState, SessionStatus};
use crate::probe::SweepReport;
use crate::session::{role_for, Role};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

type ApiError = (StatusCode, String);

fn unavailable(e: Stopped) -> ApiError {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

fn control_error(e: ControlError) -> ApiError {
    match e {
        ControlError::NotFound(_) | ControlError::Detached(_) => (StatusCode::NOT_FOUND, e.to_string()),
        ControlError::Host(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// Request/Response types
#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Serialize)]
struct StateResponse {
    state: SessionState,
}

#[derive(Deserialize)]
struct ActivityRequest {
    kind: InteractionKind,
    /// Control the interaction landed on, if any.
    #[serde(default)]
    target: Option<String>,
}

#[derive(Serialize)]
struct ActivityResponse {
    counted: bool,
}

#[derive(Deserialize)]
struct AcknowledgeRequest {
    #[serde(default = "default_confirmed")]
    confirmed: bool,
}

fn default_confirmed() -> bool {
    true
}

#[derive(Serialize)]
struct PromptResponse {
    pending: Option<String>,
}

#[derive(Deserialize, Default)]
struct LogoutRequest {
    #[serde(default)]
    confirm: bool,
}

#[derive(Serialize)]
struct LogoutResponse {
    logged_out: bool,
}

#[derive(Serialize)]
struct TimeoutNoticeResponse {
    timed_out: bool,
}

#[derive(Serialize)]
struct InsertResponse {
    id: String,
    instance: u64,
}

#[derive(Deserialize)]
struct FaultRequest {
    fault: Fault,
}

/// Build the router. Split out from [`run_server`] so tests can drive it directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/session", get(session_status))
        .route("/session/check", post(check_session))
        .route("/session/login", post(login))
        .route("/session/activity", post(activity))
        .route("/session/prompt", get(pending_prompt))
        .route("/session/acknowledge", post(acknowledge))
        .route("/session/logout", post(logout))
        .route("/session/timeout-notice", post(timeout_notice))
        // Watchdog signals
        .route("/operations/start", post(operation_start))
        .route("/operations/end", post(operation_end))
        .route("/watchdog/emergency", post(emergency))
        .route("/watchdog/sweep", post(sweep))
        .route("/watchdog/report", get(last_report))
        // Controls
        .route("/controls", get(list_controls))
        .route("/controls", post(insert_control))
        .route("/controls/:id", delete(remove_control))
        .route("/controls/:id/click", post(click_control))
        .route("/controls/:id/fault", post(inject_fault))
        // Event stream
        .route("/events", get(events))
        // Health check
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> &'static str {
    "OK"
}

async fn session_status(State(state): State<AppState>) -> Result<Json<SessionStatus>, ApiError> {
    let status = state.session.status().await.map_err(unavailable)?;
    Ok(Json(status))
}

async fn check_session(State(state): State<AppState>) -> Result<Json<StateResponse>, ApiError> {
    let session_state = state
        .session
        .check_authentication()
        .await
        .map_err(unavailable)?;
    Ok(Json(StateResponse { state: session_state }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "username is required".to_string()));
    }
    let role = req.role.unwrap_or_else(|| role_for(username));
    let display_name = req.display_name.unwrap_or_else(|| username.to_string());
    info!("POST /session/login - user: {}", username);

    let session_state = state
        .session
        .login(username, role, &display_name)
        .await
        .map_err(unavailable)?;
    Ok(Json(StateResponse { state: session_state }))
}

async fn activity(
    State(state): State<AppState>,
    Json(req): Json<ActivityRequest>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let counted = deliver_activity(&state, req).await?;
    Ok(Json(ActivityResponse { counted }))
}

/// Route an interaction to the session manager, and a click on a control to the watchdog too.
async fn deliver_activity(state: &AppState, req: ActivityRequest) -> Result<bool, ApiError> {
    if req.kind == InteractionKind::Click {
        if let Some(target) = &req.target {
            state.watchdog.click(target).map_err(unavailable)?;
        }
    }
    state.session.activity(req.kind).await.map_err(unavailable)
}

/// Like [`deliver_activity`] but without waiting on the session manager,
/// which is parked while a warning question is open.
fn queue_activity(state: &AppState, req: ActivityRequest) -> Result<(), Stopped> {
    if req.kind == InteractionKind::Click {
        if let Some(target) = &req.target {
            state.watchdog.click(target)?;
        }
    }
    state.session.notify(req.kind)
}

async fn pending_prompt(State(state): State<AppState>) -> Json<PromptResponse> {
    Json(PromptResponse {
        pending: state.prompt.pending(),
    })
}

async fn acknowledge(
    State(state): State<AppState>,
    Json(req): Json<AcknowledgeRequest>,
) -> Result<StatusCode, ApiError> {
    if state.prompt.answer(req.confirmed) {
        Ok(StatusCode::OK)
    } else {
        Err((StatusCode::CONFLICT, "no question is waiting".to_string()))
    }
}

async fn logout(
    State(state): State<AppState>,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let mode = if req.confirm {
        LogoutMode::Confirm
    } else {
        LogoutMode::Immediate
    };
    let logged_out = state.session.logout(mode).await.map_err(unavailable)?;
    Ok(Json(LogoutResponse { logged_out }))
}

async fn timeout_notice(State(state): State<AppState>) -> Json<TimeoutNoticeResponse> {
    Json(TimeoutNoticeResponse {
        timed_out: take_timeout_notice(state.store.as_ref()),
    })
}

async fn operation_start(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<StatusCode, ApiError> {
    let detail = body.map(|Json(detail)| detail);
    state.watchdog.operation_start(detail).map_err(unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

async fn operation_end(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<StatusCode, ApiError> {
    let detail = body.map(|Json(detail)| detail);
    state.watchdog.operation_end(detail).map_err(unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

async fn emergency(State(state): State<AppState>) -> Result<Json<Option<SweepReport>>, ApiError> {
    info!("POST /watchdog/emergency");
    let report = state.watchdog.emergency().await.map_err(unavailable)?;
    Ok(Json(report))
}

async fn sweep(State(state): State<AppState>) -> Result<Json<Option<SweepReport>>, ApiError> {
    let report = state.watchdog.sweep_now().await.map_err(unavailable)?;
    Ok(Json(report))
}

async fn last_report(State(state): State<AppState>) -> Result<Json<Option<SweepReport>>, ApiError> {
    let report = state.watchdog.last_report().await.map_err(unavailable)?;
    Ok(Json(report))
}

async fn list_controls(State(state): State<AppState>) -> Json<Vec<ControlView>> {
    Json(state.document.views())
}

async fn insert_control(
    State(state): State<AppState>,
    Json(mut spec): Json<ControlSpec>,
) -> Result<(StatusCode, Json<InsertResponse>), ApiError> {
    if spec.id.is_empty() {
        spec.id = format!("control-{}", uuid::Uuid::new_v4().simple());
    }
    let id = spec.id.clone();
    let instance = state.document.insert(spec);
    state
        .watchdog
        .nodes_inserted(vec![id.clone()])
        .map_err(unavailable)?;
    Ok((StatusCode::CREATED, Json(InsertResponse { id, instance })))
}

async fn remove_control(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.document.remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn click_control(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let counted = deliver_activity(
        &state,
        ActivityRequest {
            kind: InteractionKind::Click,
            target: Some(id),
        },
    )
    .await?;
    Ok(Json(ActivityResponse { counted }))
}

async fn inject_fault(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FaultRequest>,
) -> Result<StatusCode, ApiError> {
    state.document.inject(&id, req.fault).map_err(control_error)?;
    debug!("Injected {:?} into {}", req.fault, id);
    Ok(StatusCode::OK)
}

async fn events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

/// Push session and watchdog notices to the client; accept activity frames back.
async fn stream_events(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut session_rx = state.session.subscribe();
    let mut watchdog_rx = state.watchdog.subscribe();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ActivityRequest>(&text) {
                    Ok(req) => {
                        if queue_activity(&state, req).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Ignoring malformed activity frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            notice = session_rx.recv() => match notice {
                Ok(notice) => {
                    if send_json(&mut sender, &notice).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            notice = watchdog_rx.recv() => match notice {
                Ok(notice) => {
                    if send_json(&mut sender, &notice).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Event stream closed");
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            Ok(())
        }
    }
}
