// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `mqttClient` node: publishes each message to a broker topic over a
//! process-wide shared connection, keyed by broker address.
//!
//! Every node instance configured against the same broker address shares
//! one underlying connection via [`rcr_pool::SharedNodePool`], created
//! lazily on first use and released when the last holder drops its handle.
//!
//! Specific broker wire protocols are an opaque dependency outside this
//! runtime's scope; [`MqttTransport`] is the seam a real broker client would
//! plug into. [`LoggingMqttTransport`] is the stand-in shipped here: it
//! verifies the broker address is reachable over TCP and logs publishes
//! rather than speaking the MQTT wire protocol.

use async_trait::async_trait;
use rcr_core::{render_template, Msg, RuleError};
use rcr_pool::{PoolHandle, SharedNodePool};
use rcr_registry::{Node, RuleContext};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::OnceCell;

fn default_qos() -> u8 {
    0
}

fn default_clean_session() -> bool {
    true
}

fn default_max_reconnect_interval() -> i64 {
    60
}

#[derive(Debug, Deserialize)]
struct MqttClientConfig {
    server: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    topic: String,
    #[serde(default = "default_qos")]
    qos: u8,
    #[serde(rename = "clientId", default)]
    client_id: Option<String>,
    #[serde(rename = "cleanSession", default = "default_clean_session")]
    clean_session: bool,
    #[serde(rename = "maxReconnectInterval", default = "default_max_reconnect_interval")]
    max_reconnect_interval: i64,
    #[serde(rename = "caFile", default)]
    ca_file: Option<String>,
    #[serde(rename = "certFile", default)]
    cert_file: Option<String>,
    #[serde(rename = "certKeyFile", default)]
    cert_key_file: Option<String>,
}

impl MqttClientConfig {
    /// Negative values are normalized to the default, matching the
    /// original component's `maxReconnectInterval` contract.
    fn normalized_max_reconnect_interval(&self) -> i64 {
        if self.max_reconnect_interval < 0 {
            default_max_reconnect_interval()
        } else {
            self.max_reconnect_interval
        }
    }
}

/// Publishes a message to a broker. Implemented by whatever broker client a
/// production deployment links in; [`LoggingMqttTransport`] is the
/// reachability-checking stand-in used here.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Publish `payload` to `topic` at the given QoS.
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), RuleError>;
}

/// Verifies the broker address is reachable over TCP, then logs each
/// publish instead of speaking the MQTT wire protocol.
pub struct LoggingMqttTransport {
    server: String,
}

impl LoggingMqttTransport {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Check that `server` (a `tcp://host:port` or `ssl://host:port` url, or
    /// a bare `host:port`) accepts a TCP connection, and hold the address
    /// for subsequent publish logging.
    pub async fn connect(server: &str) -> Result<Self, RuleError> {
        let addr = server
            .trim_start_matches("tcp://")
            .trim_start_matches("ssl://")
            .trim_start_matches("mqtt://");
        match tokio::time::timeout(Self::CONNECT_TIMEOUT, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(Self { server: server.to_string() }),
            Ok(Err(io_err)) => {
                Err(RuleError::transport_with_cause(format!("mqtt broker {server} unreachable"), io_err))
            }
            Err(_elapsed) => Err(RuleError::Timeout(format!("mqtt connect to {server} timed out"))),
        }
    }
}

#[async_trait]
impl MqttTransport for LoggingMqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), RuleError> {
        tracing::info!(
            server = %self.server,
            topic,
            qos,
            bytes = payload.len(),
            "mqtt publish (logging transport, no broker client wired in)"
        );
        Ok(())
    }
}

fn process_pool() -> &'static SharedNodePool<Arc<dyn MqttTransport>> {
    static POOL: OnceLock<SharedNodePool<Arc<dyn MqttTransport>>> = OnceLock::new();
    POOL.get_or_init(SharedNodePool::new)
}

/// Publishes every message it sees to a configured broker topic, sharing one
/// transport per broker address across every chain instance in the process.
#[derive(Default)]
pub struct MqttClientNode {
    config: Option<MqttClientConfig>,
    handle: OnceCell<PoolHandle<Arc<dyn MqttTransport>>>,
}

impl MqttClientNode {
    fn config(&self) -> &MqttClientConfig {
        self.config.as_ref().expect("mqttClient node used before init")
    }

    async fn transport(&self) -> Result<&PoolHandle<Arc<dyn MqttTransport>>, RuleError> {
        let config = self.config();
        let key = config.server.clone();
        self.handle
            .get_or_try_init(|| async {
                let key = key.clone();
                let evict_key = key.clone();
                let connect_key = key.clone();
                process_pool()
                    .get_or_init(
                        &key,
                        move || {
                            let key = connect_key.clone();
                            async move {
                                LoggingMqttTransport::connect(&key)
                                    .await
                                    .map(|t| Arc::new(t) as Arc<dyn MqttTransport>)
                            }
                        },
                        move |_transport| {
                            tracing::debug!(server = %evict_key, "mqtt transport released");
                        },
                    )
                    .await
            })
            .await
    }
}

#[async_trait]
impl Node for MqttClientNode {
    fn type_name(&self) -> &'static str {
        "mqttClient"
    }

    fn init(&mut self, config: Value) -> Result<(), RuleError> {
        let parsed: MqttClientConfig =
            serde_json::from_value(config).map_err(|e| RuleError::Config(e.to_string()))?;
        self.config = Some(parsed);
        Ok(())
    }

    async fn on_msg(&self, ctx: Arc<dyn RuleContext>, msg: Msg) {
        let config = self.config();
        let topic = render_template(&config.topic, |ns, key| match ns {
            "metadata" => msg.metadata().get_value(key),
            "msg" => msg.get_json().ok().and_then(|v| v.get(key).map(ToString::to_string)),
            _ => None,
        });

        let transport = match self.transport().await {
            Ok(handle) => handle,
            Err(err) => {
                ctx.tell_failure(msg, err).await;
                return;
            }
        };

        // `username`/`password`/`clientId`/`cleanSession`/`maxReconnectInterval`
        // and the TLS identity fields (`caFile`/`certFile`/`certKeyFile`) are
        // part of the connection identity and reconnect policy a real broker
        // client would act on; the logging stand-in accepts and normalizes
        // them but doesn't reconnect or present a certificate.
        let _ = (
            &config.username,
            &config.password,
            &config.client_id,
            config.clean_session,
            config.normalized_max_reconnect_interval(),
            &config.ca_file,
            &config.cert_file,
            &config.cert_key_file,
        );

        let payload = msg.get_bytes();
        match transport.publish(&topic, &payload, config.qos).await {
            Ok(()) => ctx.tell_success(msg).await,
            Err(err) => ctx.tell_failure(msg, err).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcr_cancel::CancellationToken;
    use rcr_core::{DataType, Metadata};
    use rcr_registry::ChildOutcome;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct RecordingContext {
        cancel: CancellationToken,
        outcome: Mutex<Option<(String, Option<String>)>>,
    }

    #[async_trait]
    impl RuleContext for RecordingContext {
        fn self_id(&self) -> &str {
            "n1"
        }
        fn chain_id(&self) -> &str {
            "c1"
        }
        fn cancellation_token(&self) -> &CancellationToken {
            &self.cancel
        }
        async fn tell_success(&self, msg: Msg) {
            *self.outcome.lock().unwrap() = Some(("Success".into(), msg.get_data()));
        }
        async fn tell_failure(&self, msg: Msg, err: RuleError) {
            *self.outcome.lock().unwrap() = Some((format!("Failure:{}", err.category()), msg.get_data()));
        }
        async fn tell_next(&self, _msg: Msg, _relations: Vec<String>) {}
        async fn tell_next_or_else(&self, _msg: Msg, _default_relation: String, _relations: Vec<String>) {}
        async fn tell_self(&self, _msg: Msg, _delay_ms: u64) {}
        async fn tell_flow(&self, _chain_id: String, _msg: Msg) {}
        async fn tell_node(&self, _node_id: &str, msg: Msg) -> ChildOutcome {
            ChildOutcome { relation: "Success".into(), msg, err: None }
        }
    }

    #[test]
    fn tls_identity_fields_are_accepted() {
        let mut node = MqttClientNode::default();
        node.init(serde_json::json!({
            "server": "ssl://broker:8883",
            "topic": "t",
            "caFile": "/etc/mqtt/ca.pem",
            "certFile": "/etc/mqtt/cert.pem",
            "certKeyFile": "/etc/mqtt/key.pem",
        }))
        .unwrap();
        let config = node.config();
        assert_eq!(config.ca_file.as_deref(), Some("/etc/mqtt/ca.pem"));
        assert_eq!(config.cert_file.as_deref(), Some("/etc/mqtt/cert.pem"));
        assert_eq!(config.cert_key_file.as_deref(), Some("/etc/mqtt/key.pem"));
    }

    #[test]
    fn tls_identity_fields_default_to_none() {
        let mut node = MqttClientNode::default();
        node.init(serde_json::json!({
            "server": "tcp://broker:1883",
            "topic": "t",
        }))
        .unwrap();
        let config = node.config();
        assert!(config.ca_file.is_none());
        assert!(config.cert_file.is_none());
        assert!(config.cert_key_file.is_none());
    }

    #[test]
    fn negative_reconnect_interval_normalizes_to_default() {
        let mut node = MqttClientNode::default();
        node.init(serde_json::json!({
            "server": "tcp://broker:1883",
            "topic": "t",
            "maxReconnectInterval": -5,
        }))
        .unwrap();
        assert_eq!(node.config().normalized_max_reconnect_interval(), 60);
    }

    #[tokio::test]
    async fn publishes_successfully_against_a_reachable_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((_stream, _)) = listener.accept().await else { break };
            }
        });

        let mut node = MqttClientNode::default();
        node.init(serde_json::json!({
            "server": format!("tcp://{addr}"),
            "topic": "devices/${metadata.id}/state",
        }))
        .unwrap();

        let ctx = Arc::new(RecordingContext { cancel: CancellationToken::new(), outcome: Mutex::new(None) });
        let mut msg = Msg::new(0, "T", DataType::Json, Metadata::new(), b"{}".to_vec());
        msg.metadata_mut().put_value("id", "sensor-1");
        node.on_msg(ctx.clone(), msg).await;

        let (relation, _) = ctx.outcome.lock().unwrap().clone().unwrap();
        assert_eq!(relation, "Success");
    }

    #[tokio::test]
    async fn unreachable_broker_fails_with_transport_category() {
        let mut node = MqttClientNode::default();
        node.init(serde_json::json!({
            "server": "tcp://127.0.0.1:1",
            "topic": "devices/state",
        }))
        .unwrap();

        let ctx = Arc::new(RecordingContext { cancel: CancellationToken::new(), outcome: Mutex::new(None) });
        let msg = Msg::new(0, "T", DataType::Json, Metadata::new(), b"{}".to_vec());
        node.on_msg(ctx.clone(), msg).await;

        let (relation, _) = ctx.outcome.lock().unwrap().clone().unwrap();
        assert!(relation.starts_with("Failure:"));
    }
}
