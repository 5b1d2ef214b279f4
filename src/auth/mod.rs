use axum::http::{header, HeaderMap};
use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub const SESSION_COOKIE: &str = "hall_session";
const TOKEN_LEN: usize = 32;
const MIN_NAME_CHARS: usize = 2;

const DEFAULT_GREETINGS: &[&str] = &[
    "Welcome, keeper of the pixels!",
    "The projection booth awaits.",
    "Welcome to the realm of 24 frames per second!",
];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("enter a name")]
    EmptyName,
    #[error("name too short")]
    NameTooShort,
}

/// In-memory admin sessions keyed by cookie token. Lost on restart.
#[derive(Debug, Default)]
pub struct AdminSessions {
    sessions: Mutex<HashMap<String, String>>,
}

impl AdminSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new session token and the normalized admin name.
    pub fn login(&self, raw_name: &str) -> Result<(String, String), LoginError> {
        let name = raw_name.trim();
        if name.is_empty() {
            return Err(LoginError::EmptyName);
        }
        if name.chars().count() < MIN_NAME_CHARS {
            return Err(LoginError::NameTooShort);
        }
        let token = generate_token(TOKEN_LEN);
        self.lock().insert(token.clone(), name.to_string());
        Ok((token, name.to_string()))
    }

    pub fn admin_for(&self, token: &str) -> Option<String> {
        self.lock().get(token).cloned()
    }

    pub fn logout(&self, token: &str) -> Option<String> {
        self.lock().remove(token)
    }

    pub fn admin_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        session_token(headers).and_then(|token| self.admin_for(&token))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds valid sessions.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Login-page greetings, one per non-blank line. Falls back to built-ins.
#[derive(Debug, Clone)]
pub struct Greetings(Vec<String>);

impl Greetings {
    pub fn load(path: impl AsRef<Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Self::parse(&raw),
            Err(err) => {
                tracing::warn!(path = %path.as_ref().display(), error = %err, "greetings file missing, using defaults");
                Self::defaults()
            }
        }
    }

    pub fn parse(raw: &str) -> Self {
        let lines: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if lines.is_empty() {
            Self::defaults()
        } else {
            Self(lines)
        }
    }

    pub fn defaults() -> Self {
        Self(DEFAULT_GREETINGS.iter().map(|s| s.to_string()).collect())
    }

    pub fn pick(&self) -> &str {
        self.0
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_GREETINGS[0])
    }
}
