//! ASCII command link to a hall's projector/player.
//!
//! Each hall owns one [`DeviceSession`]: a single TCP stream guarded by a
//! mutex, so at most one command is in flight per device. Commands are
//! `;`-terminated text; once `ACK,1` has been accepted the device answers
//! every command with a reply carrying `ACK` or `NACK`.

use crate::config::DeviceConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

pub const TERMINATOR: char = ';';
const MAX_REPLY_BYTES: usize = 1024;
const ACK_ENABLE: &str = "ACK,1";
const ACK_MARKER: &str = "ACK";
const NACK_MARKER: &str = "NACK";

const REPLY_SENT: &str = "sent";
const REPLY_EMPTY: &str = "OK";
const REPLY_TIMEOUT: &str = "OK (timeout)";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("lock unavailable (waited {0:?})")]
    LockUnavailable(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("NACK")]
    Nack(String),
}

/// A terminated, ASCII-only device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    fn fixed(text: &'static str) -> Self {
        Self(terminate(text.to_string()))
    }

    pub fn ack_enable() -> Self {
        Self::fixed(ACK_ENABLE)
    }

    pub fn play() -> Self {
        Self::fixed("PLAYER.Play")
    }

    pub fn stop() -> Self {
        Self::fixed("PLAYER.Stop")
    }

    pub fn clear() -> Self {
        Self::fixed("PLAYER.Clear")
    }

    pub fn lamp_off() -> Self {
        Self::fixed("PROJECTOR.Turn Lamp Off")
    }

    pub fn lights_on() -> Self {
        Self::fixed(r#"EKOS.Send Text,"$KE,WR,4,1\0D\0A""#)
    }

    pub fn lights_off() -> Self {
        Self::fixed(r#"EKOS.Send Text,"$KE,WR,1,1\0D\0A""#)
    }

    pub fn volume(level: f64) -> Self {
        Self(terminate(format!(
            r#"tm8710.Send Text,"tm8710.sys.fader {}""#,
            fader_value(level)
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn expects_reply(&self) -> bool {
        self.0.starts_with(ACK_MARKER)
    }
}

fn terminate(mut text: String) -> String {
    if !text.ends_with(TERMINATOR) {
        text.push(TERMINATOR);
    }
    text
}

/// Fader units for the tm8710 processor: level x 10, truncated.
pub fn fader_value(level: f64) -> i32 {
    (level * 10.0) as i32
}

fn interpret_reply(raw: &str) -> Result<String, DeviceError> {
    let reply = raw.trim();
    if reply.is_empty() {
        return Ok(REPLY_EMPTY.to_string());
    }
    // NACK contains ACK, so it must be checked first.
    if reply.contains(NACK_MARKER) {
        return Err(DeviceError::Nack(reply.to_string()));
    }
    if reply.contains(ACK_MARKER) {
        return Ok(ACK_MARKER.to_string());
    }
    Ok(reply.to_string())
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub connect_timeout: Duration,
    pub lock_wait: Duration,
    pub ack_settle: Duration,
    pub ack_read_timeout: Duration,
}

impl From<&DeviceConfig> for SessionTimings {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            lock_wait: Duration::from_millis(cfg.lock_wait_ms),
            ack_settle: Duration::from_millis(cfg.ack_settle_ms),
            ack_read_timeout: Duration::from_millis(cfg.ack_read_timeout_ms),
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self::from(&DeviceConfig::default())
    }
}

#[derive(Default)]
struct Link {
    stream: Option<TcpStream>,
    ack_enabled: bool,
}

pub struct DeviceSession {
    hall_id: String,
    host: String,
    port: u16,
    timings: SessionTimings,
    link: Mutex<Link>,
    // Mirrors of the link flags, written only while the lock is held.
    connected: AtomicBool,
    ack_enabled: AtomicBool,
}

impl DeviceSession {
    pub fn new(
        hall_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        timings: SessionTimings,
    ) -> Self {
        Self {
            hall_id: hall_id.into(),
            host: host.into(),
            port,
            timings,
            link: Mutex::new(Link::default()),
            connected: AtomicBool::new(false),
            ack_enabled: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn ack_enabled(&self) -> bool {
        self.ack_enabled.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Link>, DeviceError> {
        timeout(self.timings.lock_wait, self.link.lock())
            .await
            .map_err(|_| DeviceError::LockUnavailable(self.timings.lock_wait))
    }

    pub async fn open(&self) -> Result<String, DeviceError> {
        let mut link = self.acquire().await?;
        self.reset(&mut link);

        let addr = self.addr();
        tracing::info!(hall = %self.hall_id, %addr, "connecting to device");

        let stream = match timeout(self.timings.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                tracing::warn!(hall = %self.hall_id, %addr, error = %err, "device connect failed");
                return Err(DeviceError::Connect {
                    addr,
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(hall = %self.hall_id, %addr, "device connect timed out");
                return Err(DeviceError::Connect {
                    addr,
                    reason: format!("timed out after {:?}", self.timings.connect_timeout),
                });
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(hall = %self.hall_id, error = %err, "set_nodelay failed");
        }
        link.stream = Some(stream);
        self.connected.store(true, Ordering::SeqCst);

        match self.exchange(&mut link, &Command::ack_enable()).await {
            Ok(reply) => {
                link.ack_enabled = true;
                self.ack_enabled.store(true, Ordering::SeqCst);
                tracing::info!(hall = %self.hall_id, %reply, "ack mode enabled");
            }
            Err(err) => {
                tracing::warn!(hall = %self.hall_id, error = %err, "ack mode not enabled");
            }
        }

        Ok(format!("connected to {addr}"))
    }

    /// Drops the stream and clears every flag. Safe to call repeatedly.
    pub async fn close(&self) -> Result<String, DeviceError> {
        let mut link = self.acquire().await?;
        self.reset(&mut link);
        tracing::info!(hall = %self.hall_id, "device disconnected");
        Ok("disconnected".to_string())
    }

    pub async fn send(&self, command: &Command) -> Result<String, DeviceError> {
        let mut link = self.acquire().await?;
        let result = self.exchange(&mut link, command).await;
        if let Err(err) = &result {
            tracing::warn!(hall = %self.hall_id, command = command.as_str(), error = %err, "device command failed");
        }
        result
    }

    fn reset(&self, link: &mut Link) {
        link.stream = None;
        link.ack_enabled = false;
        self.connected.store(false, Ordering::SeqCst);
        self.ack_enabled.store(false, Ordering::SeqCst);
    }

    async fn exchange(&self, link: &mut Link, command: &Command) -> Result<String, DeviceError> {
        let expect_reply = link.ack_enabled || command.expects_reply();
        let stream = link.stream.as_mut().ok_or(DeviceError::NotConnected)?;

        stream.write_all(command.as_str().as_bytes()).await?;
        tracing::debug!(hall = %self.hall_id, command = command.as_str(), "sent");

        if !expect_reply {
            return Ok(REPLY_SENT.to_string());
        }

        tokio::time::sleep(self.timings.ack_settle).await;
        let mut buf = [0u8; MAX_REPLY_BYTES];
        match timeout(self.timings.ack_read_timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(REPLY_TIMEOUT.to_string()),
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(n)) => {
                let reply = String::from_utf8_lossy(&buf[..n]);
                tracing::debug!(hall = %self.hall_id, reply = %reply.trim(), "reply");
                interpret_reply(&reply)
            }
        }
    }
}
