//! pico-ftp-server - Entry Point
//!
//! Loads the configuration, runs the server on its reactor thread and logs
//! transfer progress until Ctrl-C.

use log::{debug, error, info};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use pico_ftp_server::utils::setup_logging;
use pico_ftp_server::{Direction, Server, ServerConfig, TransferStatus};

const MONITOR_INTERVAL: Duration = Duration::from_millis(150);

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let config_path = std::env::args().nth(1);
    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Launching FTP server...");
    let server = Arc::new(Server::new(config));
    let starter = Arc::clone(&server);
    match tokio::task::spawn_blocking(move || starter.start()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Server startup failed: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Startup task failed: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let progress = server.progress();
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for status in progress.snapshot() {
                    report(&status);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let stopper = Arc::clone(&server);
    match tokio::task::spawn_blocking(move || stopper.stop()).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("Server stopped with error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Shutdown task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn report(status: &TransferStatus) {
    let line = match (status.direction, status.percent()) {
        (Direction::Sending, Some(percent)) => format!("Sending [{}] {}%", status.name, percent),
        (Direction::Sending, None) => format!("Sending [{}] {} bytes", status.name, status.position),
        (Direction::Receiving, _) => format!(
            "Receiving [{}] {:.2} MB",
            status.name,
            status.position as f64 / (1024.0 * 1024.0)
        ),
    };

    if status.ended {
        info!("Session {} finished: {}", status.session_id, line);
    } else {
        debug!("Session {}: {}", status.session_id, line);
    }
}
