use anyhow::{Context, Result};
use callback_server::{CallbackRequest, CallbackServer};
use clap::Parser;
use neeo_brain::{logging, BrainConfig, BrainConnection, ConnectivityEvent};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// NEEO brain connection runner
///
/// Registers a callback with a brain, keeps the registration alive across
/// brain restarts and logs everything the brain sends back.
#[derive(Parser, Debug)]
#[command(name = "neeo-cli")]
#[command(about = "Keep an integration session with a NEEO brain alive")]
#[command(version)]
pub struct Args {
    /// Identifier of the brain, used in logs and in the callback path
    #[arg(long)]
    pub brain_id: String,

    /// Brain IP address or host name
    #[arg(long)]
    pub host: String,

    /// Brain API port
    #[arg(long, default_value = "3000")]
    pub brain_port: u16,

    /// Seconds between health checks, 0 disables them
    #[arg(long, default_value = "10")]
    pub check_status_interval: i64,

    /// Address the brain should call back on (detected when omitted)
    #[arg(long)]
    pub callback_address: Option<IpAddr>,

    /// Port range for the callback server, e.g. 8400-8500
    #[arg(long, default_value = "8400-8500", value_parser = parse_port_range)]
    pub callback_ports: (u16, u16),

    /// Print the brain's system information before connecting
    #[arg(long)]
    pub system_info: bool,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.brain_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Brain id must not be empty"));
        }

        if self.host.trim().is_empty() {
            return Err(anyhow::anyhow!("Brain host must not be empty"));
        }

        if self.brain_port == 0 {
            return Err(anyhow::anyhow!("Brain port must not be 0"));
        }

        Ok(())
    }

    /// Connection configuration for a callback server bound to `callback_port`
    pub fn brain_config(&self, callback_port: u16) -> BrainConfig {
        let config = BrainConfig::new(self.brain_id.clone(), self.host.clone(), callback_port)
            .with_brain_port(self.brain_port)
            .with_check_status_secs(self.check_status_interval);

        match self.callback_address {
            Some(address) => config.with_callback_address(address),
            None => config,
        }
    }
}

/// Parse `start-end` into an inclusive port range
fn parse_port_range(value: &str) -> Result<(u16, u16), String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("expected <start>-<end>, got '{value}'"))?;

    let start: u16 = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid start port '{start}': {e}"))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid end port '{end}': {e}"))?;

    if start == 0 {
        return Err("Port range must not include port 0".to_string());
    }
    if start > end {
        return Err(format!("Invalid port range: start ({start}) > end ({end})"));
    }

    Ok((start, end))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    logging::init_logging_from_env().context("Failed to initialize logging")?;

    if let Err(e) = run(args).await {
        error!("neeo-cli failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let (request_tx, mut requests) = mpsc::unbounded_channel::<CallbackRequest>();
    let server = CallbackServer::new(args.callback_ports, request_tx)
        .await
        .context("Failed to start callback server")?;
    server.router().register(args.brain_id.clone()).await;
    info!(
        "Callback server listening on {} (port range {}-{})",
        server.base_url(),
        args.callback_ports.0,
        args.callback_ports.1
    );

    let connection = BrainConnection::with_defaults(args.brain_config(server.port()))
        .context("Invalid brain configuration")?;

    if args.system_info {
        print_system_info(&connection).await;
    }

    let mut events = connection.connectivity_events();
    connection.start();
    info!(brain_id = %connection.brain_id(), url = %connection.brain_url(), "connecting to brain, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            Some(event) = events.recv() => log_connectivity(&connection, event),
            Some(request) = requests.recv() => {
                info!(
                    brain_id = %request.brain_id,
                    method = %request.method,
                    path = %request.path,
                    "brain callback: {}",
                    request.body
                );
            }
        }
    }

    connection.close().await;
    server.router().unregister(&args.brain_id).await;
    server.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn log_connectivity(connection: &BrainConnection, event: ConnectivityEvent) {
    if event.is_connected() {
        let callback = connection.callback_url().unwrap_or_default();
        info!(
            brain_id = %connection.brain_id(),
            %callback,
            devices = connection.device_keys().len(),
            "brain connected"
        );
    } else {
        warn!(brain_id = %connection.brain_id(), "brain disconnected");
    }
}

async fn print_system_info(connection: &BrainConnection) {
    match connection.system_info().await {
        Ok(info) => {
            println!("Brain {}:", connection.brain_id());
            println!("  Hostname: {}", info.hostname.as_deref().unwrap_or("-"));
            println!("  Label:    {}", info.label.as_deref().unwrap_or("-"));
            println!("  Version:  {}", info.version.as_deref().unwrap_or("-"));
            println!("  Firmware: {}", info.firmware_version.as_deref().unwrap_or("-"));
            println!("  User:     {}", info.user.as_deref().unwrap_or("-"));
            println!();
        }
        Err(e) => warn!(brain_id = %connection.brain_id(), error = %e, "failed to fetch system info"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["neeo-cli", "--brain-id", "brain-1", "--host", "192.168.1.20"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[rstest]
    #[case("8400-8500", Ok((8400, 8500)))]
    #[case("9000-9000", Ok((9000, 9000)))]
    #[case(" 8400 - 8401 ", Ok((8400, 8401)))]
    #[case("8500-8400", Err(()))]
    #[case("0-10", Err(()))]
    #[case("8400", Err(()))]
    #[case("a-b", Err(()))]
    fn test_parse_port_range(#[case] input: &str, #[case] expected: Result<(u16, u16), ()>) {
        assert_eq!(parse_port_range(input).map_err(|_| ()), expected);
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.brain_port, 3000);
        assert_eq!(args.check_status_interval, 10);
        assert_eq!(args.callback_ports, (8400, 8500));
        assert!(args.callback_address.is_none());
        assert!(!args.system_info);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_brain_config_mapping() {
        let args = args(&[
            "--brain-port",
            "3001",
            "--check-status-interval",
            "0",
            "--callback-address",
            "192.168.1.5",
        ]);
        let config = args.brain_config(8401);

        assert_eq!(config.brain_id, "brain-1");
        assert_eq!(config.brain_url(), "http://192.168.1.20:3001");
        assert_eq!(config.callback_port, 8401);
        assert_eq!(config.check_status_interval, Duration::ZERO);
        assert!(!config.health_checks_enabled());
        assert_eq!(config.callback_address, Some("192.168.1.5".parse().unwrap()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_brain_id_is_rejected() {
        assert!(Args::try_parse_from(["neeo-cli", "--host", "192.168.1.20"]).is_err());
        let blank = Args::try_parse_from(["neeo-cli", "--brain-id", " ", "--host", "h"]).unwrap();
        assert!(blank.validate().is_err());
    }
}
