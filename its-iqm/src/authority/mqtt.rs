//! MQTT-backed authority source: a single topic carrying the full
//! neighbour list as a JSON object, pushed by the central authority
//! whenever it changes.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use its_core::mqtt::{MqttClient, MqttClientConfig};
use its_core::telemetry::NoExportSpanFactory;

use super::NeighbourMap;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    host: String,
    port: u16,
    topic: String,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tx: mpsc::UnboundedSender<NeighbourMap>,
) {
    info!("authority mqtt client to {host}:{port}, topic {topic}");
    let config = MqttClientConfig::tcp(client_id.unwrap_or_else(|| "its-iqm-authority".to_string()), host, port).credentials(username, password);

    let tx = tx.clone();
    let cb = Arc::new(move |_topic: &str, payload: &[u8]| {
        match serde_json::from_slice::<NeighbourMap>(payload) {
            Ok(neighbours) => {
                if tx.send(neighbours).is_err() {
                    warn!("authority mqtt client: router channel closed");
                }
            }
            Err(e) => warn!("authority mqtt client: malformed neighbour list ignored: {e}"),
        }
    });

    let (client, event_loop) = MqttClient::new(config, cb, Arc::new(NoExportSpanFactory));
    let subscribe_topic = topic.clone();
    tokio::spawn(async move {
        client.wait_for_ready().await;
        let _ = client.subscribe(&[subscribe_topic]).await;
        std::future::pending::<()>().await;
    });
    event_loop.await;
}
