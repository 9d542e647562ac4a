//! Z-Wave Gateway - bridges a Z-Wave mesh onto an MQTT broker
//!
//! This binary runs the gateway loop with:
//! - A TCP connection to the mesh driver daemon
//! - An MQTT session for value state, writes, broadcasts and api calls
//! - JSON file storage for scenes

mod settings;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zwave_bridge::{Gateway, MqttConnector, TcpDriver};
use zwave_state::{DocumentStore, JsonFileStore};

#[derive(Parser)]
#[command(name = "zwave-gateway")]
#[command(about = "Z-Wave mesh to MQTT gateway", version)]
struct Args {
    /// Settings file (JSON)
    #[arg(long, short, env = "ZWAVE_GATEWAY_CONFIG", default_value = "settings.json")]
    config: PathBuf,

    /// Gateway name, used in the MQTT client id
    #[arg(long, short, env = "ZWAVE_GATEWAY_NAME")]
    name: Option<String>,

    /// MQTT broker host
    #[arg(long, env = "ZWAVE_GATEWAY_MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "ZWAVE_GATEWAY_MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// Topic prefix
    #[arg(long, env = "ZWAVE_GATEWAY_PREFIX")]
    prefix: Option<String>,

    /// Mesh driver daemon address (host:port)
    #[arg(long, short, env = "ZWAVE_GATEWAY_DRIVER")]
    driver: Option<String>,

    /// Directory for stored documents
    #[arg(long, env = "ZWAVE_GATEWAY_STORE")]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, env = "ZWAVE_GATEWAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> settings::Overrides {
        settings::Overrides {
            name: self.name.clone(),
            mqtt_host: self.mqtt_host.clone(),
            mqtt_port: self.mqtt_port,
            prefix: self.prefix.clone(),
            driver: self.driver.clone(),
            store: self.store.clone(),
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "zwave_gateway=debug,zwave_bridge=debug,zwave_state=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json);

    let config = settings::load(&args.config).await?;
    let config = settings::apply(config, args.overrides());

    info!("Starting Z-Wave gateway {}", zwave_bridge::VERSION);
    info!(
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        driver = %config.zwave.driver_address,
        prefix = %config.mqtt.prefix,
        "Gateway configured"
    );

    // Initialize document store
    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(&config.storage.dir).await?);
    info!("Store initialized: {}", config.storage.dir.display());

    let driver = TcpDriver::new(config.zwave.clone());
    let (gateway, handle) =
        Gateway::new(&config, driver, Arc::new(MqttConnector::new()), store).await?;

    // Spawn gateway service
    let mut task = tokio::spawn(gateway.run());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupt received, shutting down");
            handle.shutdown().await?;
            task.await??;
        }
        result = &mut task => {
            match result {
                Ok(Ok(())) => info!("Gateway stopped"),
                Ok(Err(e)) => error!("Gateway error: {}", e),
                Err(e) => error!("Gateway task failed: {}", e),
            }
        }
    }

    Ok(())
}
