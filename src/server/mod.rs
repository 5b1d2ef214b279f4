use crate::audit::ActionLog;
use crate::auth::{self, AdminSessions, Greetings};
use crate::events::{EventHub, EventLevel, LogEvent};
use crate::hall::{Hall, HallRegistry};
use crate::model::CommandOutcome;
use crate::tms::{Proxied, TmsClient, TmsError};
use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

const VOLUME_MIN: f64 = 0.0;
const VOLUME_MAX: f64 = 5.5;
const SYSTEM_TARGET: &str = "SYSTEM";

pub struct AppState {
    pub halls: Arc<HallRegistry>,
    pub tms: Option<TmsClient>,
    pub sessions: AdminSessions,
    pub events: EventHub,
    pub audit: ActionLog,
    pub greetings: Greetings,
}

type SharedState = Arc<AppState>;
type HandlerResult = Result<Response, Response>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/ws", get(ws_handler))
        .route("/api/admin", get(current_admin))
        .route("/api/halls", get(list_halls))
        .route("/api/status/live", get(status_live))
        .route("/api/status/stream", get(status_stream))
        .route("/api/cp750/status/all", get(cp750_status_all))
        .route("/api/cp750/:cp_id/status", get(cp750_status))
        .route("/api/cp750/:cp_id/fader", post(cp750_fader))
        .route("/api/cp750/:cp_id/mute", post(cp750_mute))
        .route("/api/cp750/:cp_id/input-mode", post(cp750_input_mode))
        .route("/api/devices/:device_id/projector/lamp/:action", post(device_lamp))
        .route("/api/devices/:device_id/projector/dowser/:action", post(device_dowser))
        .route("/api/halls/:hall_id/connect", post(hall_connect))
        .route("/api/halls/:hall_id/disconnect", post(hall_disconnect))
        .route("/api/halls/:hall_id/play", post(hall_play))
        .route("/api/halls/:hall_id/stop", post(hall_stop))
        .route("/api/halls/:hall_id/shutdown-session", post(hall_shutdown))
        .route("/api/halls/:hall_id/light/:action", post(hall_light))
        .route("/api/halls/:hall_id/volume", post(hall_volume))
        .with_state(state)
}

pub async fn start(
    addr: SocketAddr,
    state: SharedState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control panel listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(CommandOutcome::failed("not authorized")),
    )
        .into_response()
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    state
        .sessions
        .admin_from_headers(headers)
        .ok_or_else(unauthorized)
}

fn require_hall(state: &AppState, hall_id: &str) -> Result<Arc<Hall>, Response> {
    state.halls.get(hall_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(CommandOutcome::failed("hall not found")),
        )
            .into_response()
    })
}

fn require_connected(hall: &Hall) -> Result<(), Response> {
    if hall.is_connected() {
        Ok(())
    } else {
        Err(Json(CommandOutcome::failed("not connected")).into_response())
    }
}

fn require_tms(state: &AppState) -> Result<&TmsClient, Response> {
    state.tms.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ok": false, "error": "tms gateway disabled" })),
        )
            .into_response()
    })
}

fn upstream_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn bad_gateway(key: &str, err: &TmsError) -> Response {
    let mut body = json!({ "error": err.to_string() });
    body[key] = json!(false);
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

fn proxied_json(result: Result<Proxied, TmsError>) -> Response {
    match result {
        Ok(p) => (upstream_status(p.status), Json(p.body)).into_response(),
        Err(err) => bad_gateway("ok", &err),
    }
}

/// An empty body means "use the defaults"; anything else must deserialize.
fn parse_payload<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "rejected request body");
        (
            StatusCode::BAD_REQUEST,
            Json(CommandOutcome::failed("invalid payload")),
        )
            .into_response()
    })
}

fn reported_ok(body: &serde_json::Value) -> bool {
    body.get("ok").and_then(|v| v.as_bool()).unwrap_or(true)
}

/// `HALL1_cp750` belongs to hall `hall1`.
fn hall_for_cp750(cp_id: &str) -> String {
    cp_id.replace("_cp750", "").to_lowercase()
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}

#[derive(Deserialize)]
struct LoginPayload {
    #[serde(default)]
    admin_name: String,
}

async fn login(State(state): State<SharedState>, Json(payload): Json<LoginPayload>) -> Response {
    match state.sessions.login(&payload.admin_name) {
        Ok((token, name)) => {
            state
                .audit
                .record(&name, SYSTEM_TARGET, "LOGIN", "signed in")
                .await;
            (
                [(header::SET_COOKIE, auth::session_cookie(&token))],
                Json(CommandOutcome::ok(format!("Welcome, {name}!"))),
            )
                .into_response()
        }
        Err(err) => Json(CommandOutcome::failed(err.to_string())).into_response(),
    }
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Some(token) = auth::session_token(&headers) {
        if let Some(name) = state.sessions.logout(&token) {
            state
                .audit
                .record(&name, SYSTEM_TARGET, "LOGOUT", "signed out")
                .await;
        }
    }
    (
        [(header::SET_COOKIE, auth::expired_session_cookie())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

async fn current_admin(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let admin = state.sessions.admin_from_headers(&headers);
    Json(json!({
        "authenticated": admin.is_some(),
        "admin_name": admin,
    }))
}

async fn list_halls(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.halls.summaries())
}

async fn status_live(State(state): State<SharedState>) -> HandlerResult {
    let tms = require_tms(&state)?;
    Ok(proxied_json(tms.status_live().await))
}

async fn status_stream(State(state): State<SharedState>) -> HandlerResult {
    let tms = require_tms(&state)?;
    let upstream = tms
        .status_stream()
        .await
        .map_err(|err| bad_gateway("ok", &err))?;
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/event-stream")
        .to_string();
    let status = upstream_status(upstream.status());
    Ok((
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

async fn cp750_status_all(State(state): State<SharedState>) -> HandlerResult {
    let tms = require_tms(&state)?;
    Ok(proxied_json(tms.cp750_status_all().await))
}

async fn cp750_status(State(state): State<SharedState>, Path(cp_id): Path<String>) -> HandlerResult {
    let tms = require_tms(&state)?;
    Ok(proxied_json(tms.cp750_status(&cp_id).await))
}

fn default_fader_value() -> u16 {
    50
}

#[derive(Deserialize)]
struct FaderPayload {
    #[serde(default = "default_fader_value")]
    value: u16,
    #[serde(default)]
    force: bool,
}

impl Default for FaderPayload {
    fn default() -> Self {
        Self {
            value: default_fader_value(),
            force: false,
        }
    }
}

#[derive(Deserialize, Default)]
struct MutePayload {
    #[serde(default)]
    mute: bool,
}

fn default_input_mode() -> String {
    "dig_1".to_string()
}

#[derive(Deserialize)]
struct InputModePayload {
    #[serde(default = "default_input_mode")]
    mode: String,
}

impl Default for InputModePayload {
    fn default() -> Self {
        Self {
            mode: default_input_mode(),
        }
    }
}

/// Shared tail of the CP750 actions: audit, broadcast, wrap the upstream body.
async fn finish_cp750(
    state: &AppState,
    admin: &str,
    cp_id: &str,
    action: &str,
    detail: &str,
    event: String,
    result: Result<Proxied, TmsError>,
) -> Response {
    match result {
        Ok(p) => {
            state.audit.record(admin, cp_id, action, detail).await;
            let level = EventLevel::from_success(reported_ok(&p.body));
            state.events.emit(&hall_for_cp750(cp_id), event, level);
            (
                upstream_status(p.status),
                Json(json!({ "success": true, "result": p.body })),
            )
                .into_response()
        }
        Err(err) => bad_gateway("success", &err),
    }
}

async fn cp750_fader(
    State(state): State<SharedState>,
    Path(cp_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let tms = require_tms(&state)?;
    let payload: FaderPayload = parse_payload(&body)?;
    let result = tms.cp750_fader(&cp_id, payload.value, payload.force).await;
    Ok(finish_cp750(
        &state,
        &admin,
        &cp_id,
        "CP750_FADER",
        &format!("level: {}", payload.value),
        format!("CP750 volume: {}", payload.value),
        result,
    )
    .await)
}

async fn cp750_mute(
    State(state): State<SharedState>,
    Path(cp_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let tms = require_tms(&state)?;
    let mute = parse_payload::<MutePayload>(&body)?.mute;
    let result = tms.cp750_mute(&cp_id, mute).await;
    let (action, label) = if mute {
        ("CP750_MUTE_ON", "ON")
    } else {
        ("CP750_MUTE_OFF", "OFF")
    };
    Ok(finish_cp750(
        &state,
        &admin,
        &cp_id,
        action,
        "",
        format!("CP750 mute: {label}"),
        result,
    )
    .await)
}

async fn cp750_input_mode(
    State(state): State<SharedState>,
    Path(cp_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let tms = require_tms(&state)?;
    let mode = parse_payload::<InputModePayload>(&body)?.mode;
    let result = tms.cp750_input_mode(&cp_id, &mode).await;
    Ok(finish_cp750(
        &state,
        &admin,
        &cp_id,
        "CP750_INPUT_MODE",
        &format!("mode: {mode}"),
        format!("CP750 input: {mode}"),
        result,
    )
    .await)
}

fn invalid_action() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": "invalid action" })),
    )
        .into_response()
}

async fn device_lamp(
    State(state): State<SharedState>,
    Path((device_id, action)): Path<(String, String)>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let on = match action.as_str() {
        "on" => true,
        "off" => false,
        _ => return Err(invalid_action()),
    };
    let tms = require_tms(&state)?;
    let result = tms.lamp(&device_id, on).await;
    if result.is_ok() {
        let action = format!("LAMP_{}", action.to_uppercase());
        state.audit.record(&admin, &device_id, &action, "").await;
    }
    Ok(proxied_json(result))
}

async fn device_dowser(
    State(state): State<SharedState>,
    Path((device_id, action)): Path<(String, String)>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let closed = match action.as_str() {
        "close" => true,
        "open" => false,
        _ => return Err(invalid_action()),
    };
    let tms = require_tms(&state)?;
    let result = tms.dowser(&device_id, closed).await;
    if result.is_ok() {
        let action = format!("DOWSER_{}", action.to_uppercase());
        state.audit.record(&admin, &device_id, &action, "").await;
    }
    Ok(proxied_json(result))
}

/// Audit + broadcast for a plain hall action, then the `{success, message}` reply.
async fn report(
    state: &AppState,
    admin: &str,
    hall: &Hall,
    action: &str,
    label: &str,
    outcome: CommandOutcome,
) -> Response {
    state.audit.record(admin, hall.id(), action, "").await;
    state.events.emit(
        hall.id(),
        format!("{label}: {}", outcome.message),
        EventLevel::from_success(outcome.success),
    );
    Json(outcome).into_response()
}

async fn hall_connect(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    let outcome = hall.connect().await;
    Ok(report(&state, &admin, &hall, "CONNECT", "Connect", outcome).await)
}

async fn hall_disconnect(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    let outcome = hall.disconnect().await;
    Ok(report(&state, &admin, &hall, "DISCONNECT", "Disconnect", outcome).await)
}

async fn hall_play(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    let outcome = hall.play().await;
    Ok(report(&state, &admin, &hall, "PLAY", "Playback started", outcome).await)
}

async fn hall_stop(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    let outcome = hall.stop().await;
    Ok(report(&state, &admin, &hall, "STOP", "Playback stopped", outcome).await)
}

async fn hall_shutdown(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    require_connected(&hall)?;

    state
        .events
        .emit(hall.id(), "=== SHUTTING DOWN SESSION ===", EventLevel::Info);
    let report = hall.shutdown_session().await;

    let detail = if report.success {
        "result: ok"
    } else {
        "result: with errors"
    };
    state
        .audit
        .record(&admin, hall.id(), "SHUTDOWN_SESSION", detail)
        .await;
    for step in &report.steps {
        state.events.emit(
            hall.id(),
            format!("{}: {}", step.step.as_str(), step.response),
            EventLevel::from_success(step.success),
        );
    }

    let (banner, level, message) = if report.success {
        ("=== SESSION FINISHED ===", EventLevel::Success, "session finished")
    } else {
        (
            "=== FINISHED WITH ERRORS ===",
            EventLevel::Warning,
            "finished with errors",
        )
    };
    state.events.emit(hall.id(), banner, level);

    Ok(Json(json!({
        "success": report.success,
        "message": message,
        "steps": report.steps,
    }))
    .into_response())
}

async fn hall_light(
    State(state): State<SharedState>,
    Path((hall_id, action)): Path<(String, String)>,
    headers: HeaderMap,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    require_connected(&hall)?;

    let response = match action.as_str() {
        "on" => {
            let outcome = hall.light_on().await;
            report(&state, &admin, &hall, "LIGHT_ON", "Lights on", outcome).await
        }
        "off" => {
            let outcome = hall.light_off().await;
            report(&state, &admin, &hall, "LIGHT_OFF", "Lights off", outcome).await
        }
        _ => Json(CommandOutcome::failed("unknown action")).into_response(),
    };
    Ok(response)
}

fn default_volume_level() -> f64 {
    4.0
}

#[derive(Deserialize)]
struct VolumePayload {
    #[serde(default = "default_volume_level")]
    level: f64,
}

impl Default for VolumePayload {
    fn default() -> Self {
        Self {
            level: default_volume_level(),
        }
    }
}

async fn hall_volume(
    State(state): State<SharedState>,
    Path(hall_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let admin = require_admin(&state, &headers)?;
    let hall = require_hall(&state, &hall_id)?;
    require_connected(&hall)?;

    let level = parse_payload::<VolumePayload>(&body)?.level;
    if !(VOLUME_MIN..=VOLUME_MAX).contains(&level) {
        return Ok(Json(CommandOutcome::failed(format!(
            "level must be between {VOLUME_MIN} and {VOLUME_MAX}"
        )))
        .into_response());
    }

    let outcome = hall.set_volume(level).await;
    state
        .audit
        .record(&admin, hall.id(), "VOLUME", &format!("level: {level}"))
        .await;
    state.events.emit(
        hall.id(),
        format!("Volume {level}: {}", outcome.message),
        EventLevel::from_success(outcome.success),
    );
    Ok(Json(json!({
        "success": outcome.success,
        "message": outcome.message,
        "level": level,
    }))
    .into_response())
}

async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> HandlerResult {
    require_admin(&state, &headers)?;
    let rx = state.events.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx)))
}

async fn handle_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<Arc<LogEvent>>) {
    let hello = json!({ "type": "connected", "message": "websocket connected" });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let payload = json!({
                            "type": "log",
                            "hall_id": event.hall_id,
                            "message": event.message,
                            "level": event.level,
                            "timestamp": event.timestamp,
                        });
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "websocket observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

async fn index_page(State(state): State<SharedState>, headers: HeaderMap) -> Html<String> {
    match state.sessions.admin_from_headers(&headers) {
        Some(admin) => Html(
            PANEL_HTML
                .replace("{{STYLE}}", PAGE_STYLE)
                .replace("{{ADMIN}}", &html_escape(&admin)),
        ),
        None => Html(
            LOGIN_HTML
                .replace("{{STYLE}}", PAGE_STYLE)
                .replace("{{GREETING}}", &html_escape(state.greetings.pick())),
        ),
    }
}

const PAGE_STYLE: &str = r##"<style>
    body { margin: 0; font-family: Arial, sans-serif; background: #0b0e12; color: #e6f0ff; }
    .wrap { padding: 16px; max-width: 760px; margin: 0 auto; }
    .row { display: flex; gap: 8px; align-items: center; flex-wrap: wrap; margin: 10px 0; }
    button { background: #111723; color: #e6f0ff; border: 1px solid #1f2a3a; padding: 8px 12px; border-radius: 4px; cursor: pointer; }
    button:hover { border-color: #33d17a; }
    input, select { background: #111723; color: #e6f0ff; border: 1px solid #1f2a3a; padding: 6px; border-radius: 4px; }
    #log { background: #0f141c; border: 1px solid #1f2a3a; border-radius: 6px; height: 260px; overflow-y: auto; font-size: 12px; padding: 6px; }
    .success { color: #33d17a; } .error { color: #e01b24; } .warning { color: #f6d32d; } .info { color: #8da3c1; }
  </style>"##;

const LOGIN_HTML: &str = r##"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>Hall Control - Login</title>
  {{STYLE}}
</head>
<body>
  <div class="wrap">
    <h2>{{GREETING}}</h2>
    <div class="row">
      <input id="name" placeholder="Your name" autofocus />
      <button id="go">Sign in</button>
    </div>
    <div id="msg"></div>
  </div>
  <script>
    async function signIn() {
      const res = await fetch('/login', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ admin_name: document.getElementById('name').value })
      });
      const data = await res.json();
      document.getElementById('msg').textContent = data.message;
      if (data.success) location.reload();
    }
    document.getElementById('go').onclick = signIn;
    document.getElementById('name').onkeydown = (e) => { if (e.key === 'Enter') signIn(); };
  </script>
</body>
</html>"##;

const PANEL_HTML: &str = r##"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>Hall Control</title>
  {{STYLE}}
</head>
<body>
  <div class="wrap">
    <div class="row">
      <strong>{{ADMIN}}</strong>
      <select id="hall"></select>
      <span id="state">--</span>
      <button id="logout">Sign out</button>
    </div>
    <div class="row">
      <button data-action="connect">Connect</button>
      <button data-action="disconnect">Disconnect</button>
      <button data-action="play">Play</button>
      <button data-action="stop">Stop</button>
      <button data-action="shutdown-session">End session</button>
      <button data-action="light/on">Lights on</button>
      <button data-action="light/off">Lights off</button>
    </div>
    <div class="row">
      <input type="range" id="volume" min="0" max="55" value="40" />
      <span id="volumeValue">4.0</span>
      <button id="setVolume">Set volume</button>
    </div>
    <div id="log"></div>
  </div>
  <script>
    const hallEl = document.getElementById('hall');
    const stateEl = document.getElementById('state');
    const logEl = document.getElementById('log');

    function addLog(message, level, timestamp) {
      const line = document.createElement('div');
      line.className = level || 'info';
      line.textContent = `[${timestamp || new Date().toLocaleTimeString()}] ${message}`;
      logEl.prepend(line);
    }

    async function loadHalls() {
      const res = await fetch('/api/halls');
      const halls = await res.json();
      const current = hallEl.value;
      hallEl.innerHTML = '';
      halls.forEach(h => {
        const opt = document.createElement('option');
        opt.value = h.id;
        opt.textContent = `${h.name} (${h.ip}:${h.port})`;
        opt.dataset.connected = h.connected;
        hallEl.appendChild(opt);
      });
      if (current) hallEl.value = current;
      const sel = hallEl.selectedOptions[0];
      stateEl.textContent = sel && sel.dataset.connected === 'true' ? 'CONNECTED' : 'DISCONNECTED';
    }

    async function post(path, body) {
      const res = await fetch(path, {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(body || {})
      });
      const data = await res.json();
      if (data.message) addLog(data.message, data.success ? 'success' : 'error');
      loadHalls();
      return data;
    }

    document.querySelectorAll('button[data-action]').forEach(btn => {
      btn.onclick = () => post(`/api/halls/${hallEl.value}/${btn.dataset.action}`);
    });
    document.getElementById('volume').oninput = (e) => {
      document.getElementById('volumeValue').textContent = (e.target.value / 10).toFixed(1);
    };
    document.getElementById('setVolume').onclick = () => {
      post(`/api/halls/${hallEl.value}/volume`, { level: document.getElementById('volume').value / 10 });
    };
    document.getElementById('logout').onclick = async () => {
      await fetch('/logout', { method: 'POST' });
      location.reload();
    };
    hallEl.onchange = loadHalls;

    const ws = new WebSocket(`ws://${window.location.host}/ws`);
    ws.onmessage = (event) => {
      const data = JSON.parse(event.data);
      if (data.type === 'log') addLog(`[${data.hall_id}] ${data.message}`, data.level, data.timestamp);
    };
    ws.onclose = () => addLog('log stream closed', 'warning');

    loadHalls();
  </script>
</body>
</html>"##;
