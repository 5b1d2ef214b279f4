//! Per-hall control: TMS first for playback and lamp actions, the ICMP
//! device link otherwise, plus the compound end-of-session sequence.

use crate::config::{Config, HallConfig};
use crate::icmp::{Command, DeviceSession, SessionTimings};
use crate::model::{CommandOutcome, HallSummary, ShutdownReport, ShutdownStep, StepOutcome};
use crate::tms::{DeviceAction, TmsClient};
use std::sync::Arc;
use std::time::Duration;

pub struct Hall {
    config: HallConfig,
    session: DeviceSession,
    tms: Option<TmsClient>,
    step_delay: Duration,
}

impl Hall {
    pub fn new(
        config: HallConfig,
        timings: SessionTimings,
        tms: Option<TmsClient>,
        step_delay: Duration,
    ) -> Self {
        let session = DeviceSession::new(config.id.clone(), config.ip.clone(), config.port, timings);
        Self {
            config,
            session,
            tms,
            step_delay,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn tms_id(&self) -> &str {
        self.config.tms_id()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn summary(&self) -> HallSummary {
        HallSummary {
            id: self.config.id.clone(),
            name: self.config.display_name().to_string(),
            ip: self.config.ip.clone(),
            port: self.config.port,
            tms_id: self.tms_id().to_string(),
            protocol: self.config.protocol.clone(),
            cp750_id: self.config.cp750_id.clone(),
            connected: self.session.is_connected(),
            ack_enabled: self.session.ack_enabled(),
        }
    }

    pub async fn connect(&self) -> CommandOutcome {
        self.session.open().await.into()
    }

    pub async fn disconnect(&self) -> CommandOutcome {
        self.session.close().await.into()
    }

    pub async fn play(&self) -> CommandOutcome {
        self.dispatch(DeviceAction::Play, Command::play()).await
    }

    pub async fn stop(&self) -> CommandOutcome {
        self.dispatch(DeviceAction::Stop, Command::stop()).await
    }

    pub async fn lamp_off(&self) -> CommandOutcome {
        self.dispatch(DeviceAction::LampOff, Command::lamp_off()).await
    }

    pub async fn clear(&self) -> CommandOutcome {
        self.local(&Command::clear()).await
    }

    pub async fn light_on(&self) -> CommandOutcome {
        self.local(&Command::lights_on()).await
    }

    pub async fn light_off(&self) -> CommandOutcome {
        self.local(&Command::lights_off()).await
    }

    /// Range checks belong to the caller; `level` is encoded as-is.
    pub async fn set_volume(&self, level: f64) -> CommandOutcome {
        self.local(&Command::volume(level)).await
    }

    /// Stop, lamp off, clear, lights on. Every step runs regardless of the
    /// previous ones; the device lock is only held per command.
    pub async fn shutdown_session(&self) -> ShutdownReport {
        let mut steps = Vec::with_capacity(ShutdownStep::ORDER.len());
        for (i, step) in ShutdownStep::ORDER.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.step_delay).await;
            }
            let outcome = match step {
                ShutdownStep::Stop => self.stop().await,
                ShutdownStep::LampOff => self.lamp_off().await,
                ShutdownStep::Clear => self.clear().await,
                ShutdownStep::LightsOn => self.light_on().await,
            };
            steps.push(StepOutcome {
                step: *step,
                success: outcome.success,
                response: outcome.message,
            });
        }
        let report = ShutdownReport::from_steps(steps);
        tracing::info!(hall = %self.id(), success = report.success, "shutdown sequence finished");
        report
    }

    async fn dispatch(&self, action: DeviceAction, fallback: Command) -> CommandOutcome {
        if let Some(tms) = &self.tms {
            match tms.device_action(self.tms_id(), action).await {
                Ok(reply) => {
                    tracing::info!(hall = %self.id(), action = action.as_str(), ok = reply.ok, "tms action answered");
                    return CommandOutcome {
                        success: reply.ok,
                        message: reply.body,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        hall = %self.id(),
                        action = action.as_str(),
                        error = %err,
                        "tms unavailable, falling back to device link"
                    );
                }
            }
        }
        self.local(&fallback).await
    }

    async fn local(&self, command: &Command) -> CommandOutcome {
        self.session.send(command).await.into()
    }
}

/// Halls built once from configuration, in configuration order.
pub struct HallRegistry {
    halls: Vec<Arc<Hall>>,
}

impl HallRegistry {
    pub fn from_config(config: &Config, tms: Option<TmsClient>) -> Self {
        let timings = SessionTimings::from(&config.device);
        let step_delay = config.device.step_delay();
        let halls = config
            .halls
            .iter()
            .map(|hall| Arc::new(Hall::new(hall.clone(), timings, tms.clone(), step_delay)))
            .collect();
        Self { halls }
    }

    pub fn from_halls(halls: Vec<Hall>) -> Self {
        Self {
            halls: halls.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Hall>> {
        self.halls.iter().find(|hall| hall.id() == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Hall>> {
        self.halls.iter()
    }

    pub fn len(&self) -> usize {
        self.halls.len()
    }

    pub fn summaries(&self) -> Vec<HallSummary> {
        self.halls.iter().map(|hall| hall.summary()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::test_support::{ack_everything, fake_device, fast_timings};
    use crate::tms::test_support::fake_tms;
    use axum::http::StatusCode;

    fn hall_config(id: &str, addr: std::net::SocketAddr) -> HallConfig {
        HallConfig {
            id: id.to_string(),
            name: format!("Hall {id}"),
            ip: addr.ip().to_string(),
            port: addr.port(),
            tms_id: Some(format!("tms-{id}")),
            cp750_id: None,
            protocol: "barco".to_string(),
        }
    }

    fn tms_client(base: &str) -> TmsClient {
        TmsClient::builder(base)
            .action_timeout(Duration::from_millis(150))
            .build()
            .unwrap()
    }

    async fn connected_hall(tms: Option<TmsClient>) -> (Hall, crate::icmp::test_support::CommandLog) {
        connected_hall_with(tms, Duration::from_millis(5)).await
    }

    async fn connected_hall_with(
        tms: Option<TmsClient>,
        step_delay: Duration,
    ) -> (Hall, crate::icmp::test_support::CommandLog) {
        let (addr, log) = fake_device(ack_everything).await;
        let hall = Hall::new(hall_config("hall1", addr), fast_timings(), tms, step_delay);
        assert!(hall.connect().await.success);
        (hall, log)
    }

    fn device_commands(log: &crate::icmp::test_support::CommandLog) -> Vec<String> {
        log.lock().unwrap().iter().skip(1).cloned().collect()
    }

    #[tokio::test]
    async fn stop_falls_back_once_on_http_500() {
        let (base, paths) = fake_tms(StatusCode::INTERNAL_SERVER_ERROR, "down", Duration::ZERO).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        let outcome = hall.stop().await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "ACK");
        assert_eq!(device_commands(&log), vec!["PLAYER.Stop".to_string()]);
        assert_eq!(paths.lock().unwrap().as_slice(), ["/api/tms-hall1/stop".to_string()]);
    }

    #[tokio::test]
    async fn stop_falls_back_once_on_timeout() {
        let (base, _paths) = fake_tms(StatusCode::OK, "{}", Duration::from_secs(2)).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        let outcome = hall.stop().await;
        assert_eq!(outcome, CommandOutcome::ok("ACK"));
        assert_eq!(device_commands(&log), vec!["PLAYER.Stop".to_string()]);
    }

    #[tokio::test]
    async fn malformed_remote_body_falls_back() {
        let (base, _paths) = fake_tms(StatusCode::OK, "<html>oops</html>", Duration::ZERO).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        assert_eq!(hall.lamp_off().await.message, "ACK");
        assert_eq!(device_commands(&log), vec!["PROJECTOR.Turn Lamp Off".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_tms_falls_back() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let (hall, log) = connected_hall(Some(tms_client(&dead))).await;

        assert!(hall.play().await.success);
        assert_eq!(device_commands(&log), vec!["PLAYER.Play".to_string()]);
    }

    #[tokio::test]
    async fn remote_answer_is_returned_without_touching_the_device() {
        let (base, _paths) = fake_tms(StatusCode::OK, r#"{"ok":true,"state":"playing"}"#, Duration::ZERO).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        let outcome = hall.play().await;
        assert!(outcome.success);
        assert!(outcome.message.contains("playing"));
        assert!(device_commands(&log).is_empty());
    }

    #[tokio::test]
    async fn remote_rejection_is_final() {
        let (base, _paths) = fake_tms(StatusCode::OK, r#"{"ok":false}"#, Duration::ZERO).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        let outcome = hall.stop().await;
        assert!(!outcome.success);
        assert!(device_commands(&log).is_empty());
    }

    #[tokio::test]
    async fn shutdown_runs_four_steps_in_order() {
        let (hall, log) = connected_hall(None).await;

        let report = hall.shutdown_session().await;
        assert!(report.success);
        let order: Vec<ShutdownStep> = report.steps.iter().map(|s| s.step).collect();
        assert_eq!(order, ShutdownStep::ORDER.to_vec());
        assert_eq!(
            device_commands(&log),
            vec![
                "PLAYER.Stop".to_string(),
                "PROJECTOR.Turn Lamp Off".to_string(),
                "PLAYER.Clear".to_string(),
                r#"EKOS.Send Text,"$KE,WR,4,1\0D\0A""#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_keeps_going_after_failures() {
        let addr: std::net::SocketAddr = "127.0.0.1:9".parse().unwrap();
        let hall = Hall::new(hall_config("hall9", addr), fast_timings(), None, Duration::ZERO);

        let report = hall.shutdown_session().await;
        assert!(!report.success);
        assert_eq!(report.steps.len(), 4);
        assert!(report.steps.iter().all(|s| !s.success && s.response == "not connected"));
    }

    #[tokio::test]
    async fn shutdown_uses_device_link_for_clear_and_lights_even_with_tms() {
        let (base, paths) = fake_tms(StatusCode::OK, r#"{"ok":true}"#, Duration::ZERO).await;
        let (hall, log) = connected_hall(Some(tms_client(&base))).await;

        let report = hall.shutdown_session().await;
        assert!(report.success);
        assert_eq!(
            paths.lock().unwrap().as_slice(),
            [
                "/api/tms-hall1/stop".to_string(),
                "/api/tms-hall1/projector/lamp/off".to_string()
            ]
        );
        assert_eq!(device_commands(&log).len(), 2);
    }

    #[tokio::test]
    async fn shutdown_releases_the_device_between_steps() {
        // Pause far longer than the lock wait: a command issued mid-sequence
        // only succeeds if the lock is free during the pause.
        let step_delay = fast_timings().lock_wait * 3;
        let (hall, log) = connected_hall_with(None, step_delay).await;

        let (report, interleaved) = tokio::join!(hall.shutdown_session(), async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            hall.light_off().await
        });

        assert!(report.success);
        assert_eq!(interleaved, CommandOutcome::ok("ACK"));
        assert_eq!(
            device_commands(&log),
            vec![
                "PLAYER.Stop".to_string(),
                r#"EKOS.Send Text,"$KE,WR,1,1\0D\0A""#.to_string(),
                "PROJECTOR.Turn Lamp Off".to_string(),
                "PLAYER.Clear".to_string(),
                r#"EKOS.Send Text,"$KE,WR,4,1\0D\0A""#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn halls_shut_down_in_parallel() {
        let step_delay = Duration::from_millis(300);
        let (a, _) = connected_hall_with(None, step_delay).await;
        let (b, _) = connected_hall_with(None, step_delay).await;

        let started = std::time::Instant::now();
        let (ra, rb) = tokio::join!(a.shutdown_session(), b.shutdown_session());
        let elapsed = started.elapsed();

        assert!(ra.success && rb.success);
        // One sequence alone spends 3 x 300 ms in pauses.
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn slow_gateway_does_not_hold_the_device_lock() {
        let (base, paths) = fake_tms(StatusCode::OK, r#"{"ok":true}"#, Duration::from_millis(800)).await;
        let tms = TmsClient::builder(base)
            .action_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let (hall, log) = connected_hall(Some(tms)).await;

        let (stop, (light, waited)) = tokio::join!(hall.stop(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = std::time::Instant::now();
            let outcome = hall.light_on().await;
            (outcome, started.elapsed())
        });

        assert!(stop.success);
        assert_eq!(light, CommandOutcome::ok("ACK"));
        assert!(waited < Duration::from_millis(400), "waited {waited:?}");
        assert_eq!(paths.lock().unwrap().as_slice(), ["/api/tms-hall1/stop".to_string()]);
        assert_eq!(
            device_commands(&log),
            vec![r#"EKOS.Send Text,"$KE,WR,4,1\0D\0A""#.to_string()]
        );
    }

    #[tokio::test]
    async fn volume_sends_fader_units() {
        let (hall, log) = connected_hall(None).await;
        assert!(hall.set_volume(5.5).await.success);
        assert_eq!(
            device_commands(&log),
            vec![r#"tm8710.Send Text,"tm8710.sys.fader 55""#.to_string()]
        );
    }

    #[test]
    fn registry_keeps_config_order_and_defaults() {
        let mut config = Config::default();
        let addr: std::net::SocketAddr = "10.1.1.1:43748".parse().unwrap();
        config.halls.push(hall_config("b", addr));
        let mut plain = hall_config("a", addr);
        plain.tms_id = None;
        config.halls.push(plain);

        let registry = HallRegistry::from_config(&config, None);
        assert_eq!(registry.len(), 2);
        let ids: Vec<&str> = registry.iter().map(|h| h.id()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(registry.get("a").unwrap().tms_id(), "a");
        assert!(registry.get("zz").is_none());

        let summaries = registry.summaries();
        assert_eq!(summaries[0].tms_id, "tms-b");
        assert!(!summaries[0].connected);
    }
}
