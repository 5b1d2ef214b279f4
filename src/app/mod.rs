use crate::audit::ActionLog;
use crate::auth::{AdminSessions, Greetings};
use crate::config::Config;
use crate::events::EventHub;
use crate::hall::HallRegistry;
use crate::server::AppState;
use crate::tms::TmsClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
    }

    let config = Config::load()?;

    let tms = build_tms_client(&config)?;
    match &tms {
        Some(client) => tracing::info!(base_url = %client.base_url(), "tms gateway enabled"),
        None => tracing::info!("tms gateway disabled; all hall commands go to the device link"),
    }

    let halls = Arc::new(HallRegistry::from_config(&config, tms.clone()));
    if halls.len() == 0 {
        tracing::warn!("no halls configured");
    }
    for hall in halls.iter() {
        let summary = hall.summary();
        tracing::info!(
            hall = %summary.id,
            name = %summary.name,
            addr = %format!("{}:{}", summary.ip, summary.port),
            tms_id = %summary.tms_id,
            "hall registered"
        );
    }

    let audit = ActionLog::new(&config.audit.log_dir);
    tracing::info!(dir = %audit.dir().display(), "action log");

    let state = Arc::new(AppState {
        halls: halls.clone(),
        tms,
        sessions: AdminSessions::new(),
        events: EventHub::new(),
        audit,
        greetings: Greetings::load(&config.server.greetings_path),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    println!("Hall control panel: http://{}", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = tokio::select! {
        res = crate::server::start(addr, state, shutdown_rx) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown: ctrl-c");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    };

    close_device_links(&halls).await;
    result
}

fn build_tms_client(config: &Config) -> Result<Option<TmsClient>, Box<dyn std::error::Error>> {
    if !config.tms.enabled {
        return Ok(None);
    }
    let client = TmsClient::builder(config.tms.base_url.clone())
        .action_timeout(Duration::from_millis(config.tms.action_timeout_ms))
        .proxy_timeout(Duration::from_millis(config.tms.proxy_timeout_ms))
        .build()?;
    Ok(Some(client))
}

async fn close_device_links(halls: &HallRegistry) {
    for hall in halls.iter() {
        if hall.is_connected() {
            let outcome = hall.disconnect().await;
            tracing::info!(hall = %hall.id(), message = %outcome.message, "device link closed");
        }
    }
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tms_builds_no_client() {
        let mut config = Config::default();
        config.tms.enabled = false;
        assert!(build_tms_client(&config).unwrap().is_none());
    }

    #[test]
    fn enabled_tms_uses_configured_base() {
        let mut config = Config::default();
        config.tms.base_url = "http://10.0.0.5:8089/tms".to_string();
        let client = build_tms_client(&config).unwrap().unwrap();
        assert_eq!(client.base_url().as_str(), "http://10.0.0.5:8089/tms/");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.tms.action_timeout_ms = 0;
        assert!(build_tms_client(&config).is_err());
    }
}
