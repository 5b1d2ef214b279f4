use reqwest::{header::CONTENT_TYPE, Client, Method, Request, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5000;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 10_000;

/// Device actions that have a local ICMP fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Play,
    Stop,
    LampOff,
}

impl DeviceAction {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Stop => "stop",
            Self::LampOff => "projector/lamp/off",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Stop => "stop",
            Self::LampOff => "lamp_off",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TmsError {
    #[error("config error: {0}")]
    Config(&'static str),
    #[error("url error: {0}")]
    Url(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timed out: {0}")]
    Timeout(&'static str),
    #[error("api error {}: {body}", .status.as_u16())]
    Api { status: StatusCode, body: String },
}

/// Parsed reply of a successful (HTTP 200) device action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReply {
    pub ok: bool,
    pub body: String,
}

/// Upstream status and JSON body of a proxied call.
#[derive(Debug, Clone)]
pub struct Proxied {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct LampRequest {
    pub on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DowserRequest {
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaderRequest {
    pub value: u16,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MuteRequest {
    pub mute: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputModeRequest {
    pub mode: String,
}

#[derive(Clone, Debug)]
pub struct TmsClient {
    http: Client,
    base_url: Url,
    action_timeout: Duration,
    proxy_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TmsClientBuilder {
    base_url: String,
    action_timeout: Duration,
    proxy_timeout: Duration,
}

impl TmsClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            action_timeout: Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            proxy_timeout: Duration::from_millis(DEFAULT_PROXY_TIMEOUT_MS),
        }
    }

    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TmsClient, TmsError> {
        TmsClient::from_parts(self.base_url, self.action_timeout, self.proxy_timeout)
    }
}

impl TmsClient {
    pub fn builder(base_url: impl Into<String>) -> TmsClientBuilder {
        TmsClientBuilder::new(base_url)
    }

    fn from_parts(
        base_url: String,
        action_timeout: Duration,
        proxy_timeout: Duration,
    ) -> Result<Self, TmsError> {
        if base_url.trim().is_empty() {
            return Err(TmsError::Config("tms base url must not be empty"));
        }
        if action_timeout.is_zero() || proxy_timeout.is_zero() {
            return Err(TmsError::Config("tms timeouts must be non-zero"));
        }

        let mut parsed =
            Url::parse(base_url.trim()).map_err(|err| TmsError::Url(err.to_string()))?;
        if !parsed.path().ends_with('/') {
            let new_path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&new_path);
        }

        // No client-wide timeout: the status stream stays open indefinitely.
        let http = Client::builder().build()?;

        Ok(Self {
            http,
            base_url: parsed,
            action_timeout,
            proxy_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn device_action(
        &self,
        device_id: &str,
        action: DeviceAction,
    ) -> Result<ActionReply, TmsError> {
        let req = self.build_device_action_request(device_id, action)?;
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_action_response(status, &body)
    }

    pub fn build_device_action_request(
        &self,
        device_id: &str,
        action: DeviceAction,
    ) -> Result<Request, TmsError> {
        let path = format!("api/{}/{}", device_segment(device_id)?, action.path());
        Ok(self
            .request_builder(Method::POST, &path)?
            .timeout(self.action_timeout)
            .build()?)
    }

    pub async fn lamp(&self, device_id: &str, on: bool) -> Result<Proxied, TmsError> {
        let path = format!("api/{}/lamp", device_segment(device_id)?);
        self.post_json(&path, &LampRequest { on }).await
    }

    pub async fn dowser(&self, device_id: &str, closed: bool) -> Result<Proxied, TmsError> {
        let path = format!("api/{}/dowser", device_segment(device_id)?);
        self.post_json(&path, &DowserRequest { closed }).await
    }

    pub async fn cp750_fader(&self, cp_id: &str, value: u16, force: bool) -> Result<Proxied, TmsError> {
        let path = format!("api/cp750/{}/fader", device_segment(cp_id)?);
        self.post_json(&path, &FaderRequest { value, force }).await
    }

    pub async fn cp750_mute(&self, cp_id: &str, mute: bool) -> Result<Proxied, TmsError> {
        let path = format!("api/cp750/{}/mute", device_segment(cp_id)?);
        self.post_json(&path, &MuteRequest { mute }).await
    }

    pub async fn cp750_input_mode(&self, cp_id: &str, mode: &str) -> Result<Proxied, TmsError> {
        let path = format!("api/cp750/{}/input-mode", device_segment(cp_id)?);
        let body = InputModeRequest {
            mode: mode.to_string(),
        };
        self.post_json(&path, &body).await
    }

    pub async fn cp750_status(&self, cp_id: &str) -> Result<Proxied, TmsError> {
        let path = format!("api/cp750/{}/status", device_segment(cp_id)?);
        self.get_json(&path).await
    }

    pub async fn cp750_status_all(&self) -> Result<Proxied, TmsError> {
        self.get_json("api/cp750/status/all").await
    }

    pub async fn status_live(&self) -> Result<Proxied, TmsError> {
        self.get_json("api/status/live").await
    }

    /// Opens the upstream SSE stream. Only connection setup is bounded by
    /// the proxy timeout; the body is read for as long as the caller wants.
    pub async fn status_stream(&self) -> Result<reqwest::Response, TmsError> {
        let url = self.url("api/status/stream")?;
        let pending = self.http.get(url).send();
        let resp = tokio::time::timeout(self.proxy_timeout, pending)
            .await
            .map_err(|_| TmsError::Timeout("status stream connect"))??;
        Ok(resp)
    }

    async fn get_json(&self, path: &str) -> Result<Proxied, TmsError> {
        let req = self
            .request_builder(Method::GET, path)?
            .timeout(self.proxy_timeout)
            .build()?;
        self.execute_proxied(req).await
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Proxied, TmsError> {
        let req = self.build_post_json_request(path, body)?;
        self.execute_proxied(req).await
    }

    pub fn build_post_json_request<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Request, TmsError> {
        let body = serde_json::to_vec(body)?;
        Ok(self
            .request_builder(Method::POST, path)?
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.proxy_timeout)
            .body(body)
            .build()?)
    }

    async fn execute_proxied(&self, req: Request) -> Result<Proxied, TmsError> {
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_proxied_response(status, &body)
    }

    fn url(&self, path: &str) -> Result<Url, TmsError> {
        self.base_url
            .join(path)
            .map_err(|err| TmsError::Url(err.to_string()))
    }

    fn request_builder(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, TmsError> {
        Ok(self.http.request(method, self.url(path)?))
    }
}

fn device_segment(id: &str) -> Result<&str, TmsError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(TmsError::Config("device id must not be empty"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || id == "."
        || id == ".."
    {
        return Err(TmsError::Config("device id contains unsupported characters"));
    }
    Ok(id)
}

/// A 200 reply is parsed as JSON. An `ok` (or `success`) boolean in an object
/// decides the outcome; without one the action counts as done. Anything else
/// is an error so the caller can fall back to the device link.
pub fn parse_action_response(status: StatusCode, body: &str) -> Result<ActionReply, TmsError> {
    if status != StatusCode::OK {
        return Err(TmsError::Api {
            status,
            body: body.to_string(),
        });
    }
    let value: serde_json::Value = serde_json::from_str(body)?;
    let ok = value
        .as_object()
        .and_then(|obj| obj.get("ok").or_else(|| obj.get("success")))
        .and_then(|flag| flag.as_bool())
        .unwrap_or(true);
    Ok(ActionReply {
        ok,
        body: body.to_string(),
    })
}

/// Proxied calls pass the upstream status through; only the body must be JSON.
pub fn parse_proxied_response(status: StatusCode, body: &str) -> Result<Proxied, TmsError> {
    let body = serde_json::from_str(body).map_err(|err| {
        if status.is_success() {
            TmsError::Json(err)
        } else {
            TmsError::Api {
                status,
                body: body.to_string(),
            }
        }
    })?;
    Ok(Proxied { status, body })
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{http::StatusCode, http::Uri, Router};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;

    pub type PathLog = Arc<Mutex<Vec<String>>>;

    /// Loopback TMS answering every request with `status` and `body` after
    /// `delay`. Returns its base URL and the request paths it saw.
    pub async fn fake_tms(status: StatusCode, body: &'static str, delay: Duration) -> (String, PathLog) {
        let paths: PathLog = Arc::new(Mutex::new(Vec::new()));
        let seen = paths.clone();
        let app = Router::new().fallback(move |uri: Uri| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(uri.path().to_string());
                tokio::time::sleep(delay).await;
                (status, body)
            }
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn client() -> TmsClient {
        TmsClient::builder("http://tms.example.test:8089")
            .action_timeout(Duration::from_millis(250))
            .build()
            .unwrap()
    }

    #[test]
    fn action_requests_target_device_paths() {
        let c = client();
        let req = c.build_device_action_request("barco-01", DeviceAction::Stop).unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.url().as_str(), "http://tms.example.test:8089/api/barco-01/stop");
        assert_eq!(req.timeout(), Some(&Duration::from_millis(250)));

        let req = c.build_device_action_request("barco-01", DeviceAction::LampOff).unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://tms.example.test:8089/api/barco-01/projector/lamp/off"
        );
    }

    #[test]
    fn base_url_path_prefix_is_kept() {
        let c = TmsClient::builder("http://tms.example.test/gateway").build().unwrap();
        let req = c.build_device_action_request("h1", DeviceAction::Play).unwrap();
        assert_eq!(req.url().as_str(), "http://tms.example.test/gateway/api/h1/play");
    }

    #[test]
    fn device_ids_cannot_escape_the_api_path() {
        let c = client();
        assert!(c.build_device_action_request("../admin", DeviceAction::Play).is_err());
        assert!(c.build_device_action_request("a/b", DeviceAction::Play).is_err());
        assert!(c.build_device_action_request(" ", DeviceAction::Play).is_err());
    }

    #[test]
    fn fader_request_carries_json_body() {
        let req = client()
            .build_post_json_request("api/cp750/HALL1_cp750/fader", &FaderRequest { value: 70, force: true })
            .unwrap();
        assert_eq!(
            req.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = req.body().unwrap().as_bytes().unwrap();
        let json: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["value"], 70);
        assert_eq!(json["force"], true);
    }

    #[test]
    fn action_flag_is_honored_when_present() {
        let reply = parse_action_response(StatusCode::OK, r#"{"ok": false, "error": "busy"}"#).unwrap();
        assert!(!reply.ok);
        assert!(reply.body.contains("busy"));

        let reply = parse_action_response(StatusCode::OK, r#"{"success": true}"#).unwrap();
        assert!(reply.ok);
    }

    #[test]
    fn action_without_flag_counts_as_success() {
        let reply = parse_action_response(StatusCode::OK, r#"{"state": "stopped"}"#).unwrap();
        assert!(reply.ok);
        let reply = parse_action_response(StatusCode::OK, "[]").unwrap();
        assert!(reply.ok);
    }

    #[test]
    fn action_errors_on_non_200_or_malformed_body() {
        let err = parse_action_response(StatusCode::INTERNAL_SERVER_ERROR, "boom").unwrap_err();
        assert_eq!(err.to_string(), "api error 500: boom");
        assert!(parse_action_response(StatusCode::CREATED, "{}").is_err());
        assert!(matches!(
            parse_action_response(StatusCode::OK, "<html>"),
            Err(TmsError::Json(_))
        ));
    }

    #[test]
    fn proxied_response_keeps_upstream_status() {
        let out = parse_proxied_response(StatusCode::NOT_FOUND, r#"{"ok": false}"#).unwrap();
        assert_eq!(out.status, StatusCode::NOT_FOUND);
        assert_eq!(out.body["ok"], false);
        assert!(parse_proxied_response(StatusCode::BAD_GATEWAY, "down").is_err());
    }

    #[test]
    fn builder_rejects_empty_url_and_zero_timeouts() {
        assert!(TmsClient::builder(" ").build().is_err());
        assert!(TmsClient::builder("http://x")
            .proxy_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
