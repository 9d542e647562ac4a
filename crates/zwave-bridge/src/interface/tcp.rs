//! TCP driver for an external mesh driver daemon
//!
//! The daemon owns the radio and speaks newline-delimited JSON:
//!
//! - inbound lines carrying an `event` field are [`MeshEvent`]s
//! - inbound lines carrying an `id` field answer a named operation
//!   (`{"id", "success", "result", "message"}`)
//! - outbound lines are [`MeshCommand`]s, a `hello` carrying the driver
//!   options, or `{"command": "call", "id", "api", "args"}`

use crate::config::ZwaveConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use zwave_core::{MeshCommand, MeshEvent};

use super::{ConnectionState, MeshDriver};

/// Delay between connection attempts
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reply to a named operation
#[derive(Debug, Deserialize)]
struct CallReply {
    id: u64,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Json,
    #[serde(default)]
    message: String,
}

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<CallReply>>>>;

/// TCP connection to a mesh driver daemon
pub struct TcpDriver {
    config: ZwaveConfig,
    state: ConnectionState,
    writer: Option<OwnedWriteHalf>,
    events: Option<mpsc::Receiver<MeshEvent>>,
    pending: PendingCalls,
    reader: Option<JoinHandle<()>>,
    next_id: u64,
    name: String,
}

impl TcpDriver {
    /// Create a driver for the configured daemon address
    pub fn new(config: ZwaveConfig) -> Self {
        let name = format!("tcp:{}", config.driver_address);
        Self {
            config,
            state: ConnectionState::Disconnected,
            writer: None,
            events: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: None,
            next_id: 1,
            name,
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    async fn open(&self) -> Result<TcpStream> {
        let address = &self.config.driver_address;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match TcpStream::connect(address).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(address = %address, attempt, "Driver connection failed: {}", e);
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(GatewayError::ConnectFailed {
            address: address.clone(),
            attempts,
        })
    }

    async fn write_line(&mut self, line: &Json) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(GatewayError::DriverNotConnected)?;

        let mut data = serde_json::to_vec(line)?;
        data.push(b'\n');
        trace!(size = data.len(), "Writing driver line");

        if let Err(e) = writer.write_all(&data).await {
            error!(error = %e, "Driver write error");
            self.state = ConnectionState::Disconnected;
            return Err(GatewayError::Driver(e.to_string()));
        }
        Ok(())
    }

    fn hello(&self) -> Json {
        json!({
            "command": "hello",
            "options": {
                "network_key": self.config.network_key,
                "save_config": self.config.save_config,
                "logging": self.config.logging,
                "poll_interval_ms": self.config.poll_interval.as_millis() as u64,
            }
        })
    }
}

async fn read_lines(read: OwnedReadHalf, events: mpsc::Sender<MeshEvent>, pending: PendingCalls) {
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Driver closed the connection");
                break;
            }
            Err(e) => {
                warn!("Driver read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let doc: Json = match serde_json::from_str(&line) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Dropping malformed driver line: {}", e);
                continue;
            }
        };

        if doc.get("event").is_some() {
            match serde_json::from_value::<MeshEvent>(doc) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Dropping unknown driver event: {}", e),
            }
        } else if doc.get("id").is_some() {
            match serde_json::from_value::<CallReply>(doc) {
                Ok(reply) => match pending.lock().remove(&reply.id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!(id = reply.id, "Reply for unknown call"),
                },
                Err(e) => warn!("Dropping malformed driver reply: {}", e),
            }
        } else {
            trace!("Ignoring driver line without event or id");
        }
    }

    // fail every call still waiting
    pending.lock().clear();
}

#[async_trait]
impl MeshDriver for TcpDriver {
    async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(address = %self.config.driver_address, "Connecting to mesh driver");

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        let (read, write) = stream.into_split();

        let (tx, rx) = mpsc::channel(256);
        self.reader = Some(tokio::spawn(read_lines(read, tx, Arc::clone(&self.pending))));
        self.events = Some(rx);
        self.writer = Some(write);
        self.state = ConnectionState::Connected;

        let hello = self.hello();
        self.write_line(&hello).await?;

        info!(address = %self.config.driver_address, "Connected to mesh driver");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;
        self.pending.lock().clear();
        self.state = ConnectionState::Disconnected;

        info!(address = %self.config.driver_address, "Disconnected from mesh driver");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.writer.is_some()
    }

    async fn next_event(&mut self) -> Option<MeshEvent> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        match events.recv().await {
            Some(event) => Some(event),
            None => {
                self.events = None;
                self.writer = None;
                self.state = ConnectionState::Disconnected;
                None
            }
        }
    }

    async fn send(&mut self, command: MeshCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(GatewayError::DriverNotConnected);
        }
        debug!(?command, "Sending driver command");
        let line = serde_json::to_value(&command)?;
        self.write_line(&line).await
    }

    async fn call(&mut self, api: &str, args: Vec<Json>) -> Result<Json> {
        if !self.is_connected() {
            return Err(GatewayError::DriverNotConnected);
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = json!({"command": "call", "id": id, "api": api, "args": args});
        if let Err(e) = self.write_line(&request).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let timeout = self.config.api_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) if reply.success => Ok(reply.result),
            Ok(Ok(reply)) => Err(GatewayError::Driver(reply.message)),
            Ok(Err(_)) => Err(GatewayError::Driver("connection closed".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(GatewayError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TcpDriver {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for TcpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpDriver")
            .field("address", &self.config.driver_address)
            .field("state", &self.state)
            .field("pending_calls", &self.pending.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use zwave_core::{ValueId, ValuePayload};

    async fn daemon() -> (TcpListener, ZwaveConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ZwaveConfig {
            driver_address: listener.local_addr().unwrap().to_string(),
            max_attempts: 1,
            api_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        (listener, config)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, config) = daemon().await;
        drop(listener);

        let mut driver = TcpDriver::new(config);
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectFailed { attempts: 1, .. }));
        assert_eq!(driver.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut driver = TcpDriver::new(ZwaveConfig::default());
        assert!(!driver.is_connected());
        let err = driver.call("healNetwork", vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::DriverNotConnected));
        let err = driver
            .send(MeshCommand::SetPollInterval { interval_ms: 1000 })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DriverNotConnected));
    }

    #[tokio::test]
    async fn test_events_commands_and_calls() {
        let (listener, config) = daemon().await;

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            let hello: Json = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(hello["command"], "hello");

            write
                .write_all(b"{\"event\":\"driver_ready\",\"home_id\":3735928559}\n")
                .await
                .unwrap();

            let command: Json = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(command["command"], "set_value");

            let call: Json = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(call["api"], "getNodes");
            let reply = json!({"id": call["id"], "success": true, "result": [1, 2]});
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();

            let call: Json = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let reply = json!({"id": call["id"], "success": false, "message": "Unknown api"});
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        let mut driver = TcpDriver::new(config);
        driver.connect().await.unwrap();
        assert!(driver.is_connected());

        let event = driver.next_event().await.unwrap();
        assert_eq!(event, MeshEvent::DriverReady { home_id: 0xDEADBEEF });

        driver
            .send(MeshCommand::SetValue {
                value_id: ValueId::new(2, 37, 1, 0),
                value: ValuePayload::Bool(true),
            })
            .await
            .unwrap();

        let nodes = driver.call("getNodes", vec![]).await.unwrap();
        assert_eq!(nodes, json!([1, 2]));

        let err = driver.call("bogus", vec![json!(1)]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Driver(msg) if msg == "Unknown api"));

        server.await.unwrap();

        // server hung up
        assert!(driver.next_event().await.is_none());
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let (listener, config) = daemon().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(socket);
        });

        let mut driver = TcpDriver::new(config);
        driver.connect().await.unwrap();
        let err = driver.call("softReset", vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { duration_ms: 200 }));

        driver.disconnect().await.unwrap();
        server.await.unwrap();
    }
}
