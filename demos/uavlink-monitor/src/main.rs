//! Link monitor.
//!
//! Connects to a uavlink peer, waits for the link to come up and logs every
//! update of the watched objects until interrupted.
//!
//!   uavlink-monitor --url ws://127.0.0.1:4224/uav --dialect telemetry --watch AttitudeState
//!   uavlink-monitor --config monitor.toml --watch SERIAL_STATUS

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uavlink_client::{Client, ClientConfig, TelemetryConfig};
use uavlink_core::Dialect;

#[derive(Parser, Debug)]
#[command(name = "uavlink-monitor", about = "Watch objects on a uavlink peer")]
struct Args {
    /// TOML client configuration; flags override its values.
    #[arg(long, env = "UAVLINK_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "UAVLINK_URL")]
    url: Option<String>,
    #[arg(long, value_enum)]
    dialect: Option<DialectArg>,
    /// Expect the peer to open with the full definition list.
    #[arg(long)]
    bulk: bool,
    /// Skip the telemetry link handshake.
    #[arg(long)]
    no_handshake: bool,
    /// Object, event or action to log. Repeatable.
    #[arg(long = "watch", short = 'w')]
    watch: Vec<String>,
    /// Deadline for readiness and definitions.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DialectArg {
    Telemetry,
    PubSub,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Telemetry => Dialect::Telemetry,
            DialectArg::PubSub => Dialect::PubSub,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("uavlink_monitor=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .or_else(|| config.request_timeout());
    let dialect = config.dialect;

    tracing::info!("Connecting to {} ({})", config.url, dialect);
    let client = Client::new(config);
    client.on_error(|err| tracing::error!("Link handshake failed: {}", err));
    for name in &args.watch {
        client.attach(name, |update| {
            tracing::info!(object = %update.name, instance = ?update.instance_id, "{}", update.data);
        });
        client.requests().attach(
            name,
            std::sync::Arc::new(|request: &uavlink_client::ObjectData| {
                tracing::info!(object = %request.name, "request: {}", request.data);
            }),
        );
    }

    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", client.config().url))?;
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, client.ready())
            .await
            .context("timed out waiting for the link")??,
        None => client.ready().await?,
    }
    tracing::info!("Link ready");

    if !args.watch.is_empty() {
        let definitions = client.require_definitions(&args.watch, timeout).await?;
        for definition in &definitions {
            tracing::info!(
                fields = definition.fields.len(),
                kind = ?definition.kind,
                "{} defined",
                definition.identifier
            );
            match client.default_instance(&definition.identifier) {
                Ok(defaults) => tracing::debug!("{} defaults: {:?}", definition.identifier, defaults),
                Err(e) => tracing::warn!("{}: {}", definition.identifier, e),
            }
            if dialect == Dialect::Telemetry {
                client.send_request(&definition.identifier, 0)?;
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    client.disconnect();
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(dialect) = args.dialect {
        config.dialect = dialect.into();
    }
    if args.bulk {
        config.bulk_definitions = true;
    }
    if config.dialect == Dialect::Telemetry && config.telemetry.is_none() {
        config.telemetry = Some(TelemetryConfig::default());
    }
    if args.no_handshake {
        config.telemetry = None;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "uavlink-monitor",
            "--url",
            "ws://drone:4224",
            "--dialect",
            "telemetry",
            "--bulk",
            "-w",
            "AttitudeState",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.url, "ws://drone:4224");
        assert_eq!(config.dialect, Dialect::Telemetry);
        assert!(config.bulk_definitions);
        assert!(config.telemetry.is_some());
        assert_eq!(args.watch, ["AttitudeState"]);
    }

    #[test]
    fn handshake_can_be_disabled() {
        let args = Args::parse_from(["uavlink-monitor", "--dialect", "telemetry", "--no-handshake"]);
        assert!(build_config(&args).unwrap().telemetry.is_none());
    }
}
