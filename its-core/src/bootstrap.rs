//! Bootstrap protocol: the configuration handshake a station performs
//! against a central server before it can connect to its local broker,
//! grounded on `iot3/mobility/bootstrap.py`.
//!
//! The station POSTs its identity and receives back the set of transport
//! endpoints it's authorised to use plus a fresh set of run-time
//! credentials; we only specify the response parsing and the protocol
//! selection policy, not the HTTP client wiring (that's `its-iqm`'s job).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Request body for `POST <endpoint>`, sent with HTTP Basic auth using
/// `psk_login`/`psk_password`.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapRequest {
    pub ue_id: String,
    pub psk_login: String,
    pub psk_password: String,
    pub role: String,
}

/// The protocols a server may offer, in the order spec.md names them.
/// `internal-` prefixed keys address the broker from inside the server's
/// own network and are preferred over their un-prefixed counterparts when
/// both are present, since they imply a shorter, trusted path.
const MQTT_TLS_KEYS: &[&str] = &["internal-mqtts", "mqtts"];
const MQTT_WS_TLS_KEYS: &[&str] = &["internal-mqtt-wss", "mqtt-wss"];
const MQTT_CLEAR_KEYS: &[&str] = &["internal-mqtt", "mqtt"];
const MQTT_WS_CLEAR_KEYS: &[&str] = &["internal-mqtt-ws", "mqtt-ws"];

/// The raw JSON response from the bootstrap endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapResponse {
    pub iot3_id: String,
    pub psk_run_login: String,
    pub psk_run_password: String,
    pub protocols: HashMap<String, String>,
}

/// A resolved, ready-to-connect broker endpoint and the transport it was
/// reached through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedTransport {
    MqttTls(String),
    MqttWssTls(String),
    Mqtt(String),
    MqttWs(String),
}

/// The parsed and selected configuration a station uses to connect.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub iot3_id: String,
    pub psk_run_login: String,
    pub psk_run_password: String,
    pub transport: SelectedTransport,
}

impl BootstrapResponse {
    /// Resolve the preferred transport: TLS over clear, native MQTT over
    /// websockets, in that order, among whichever `protocols` keys are
    /// actually present.
    pub fn select_transport(&self) -> Result<SelectedTransport> {
        let first_present = |keys: &[&str]| keys.iter().find_map(|k| self.protocols.get(*k).cloned());

        if let Some(uri) = first_present(MQTT_TLS_KEYS) {
            return Ok(SelectedTransport::MqttTls(uri));
        }
        if let Some(uri) = first_present(MQTT_WS_TLS_KEYS) {
            return Ok(SelectedTransport::MqttWssTls(uri));
        }
        if let Some(uri) = first_present(MQTT_CLEAR_KEYS) {
            return Ok(SelectedTransport::Mqtt(uri));
        }
        if let Some(uri) = first_present(MQTT_WS_CLEAR_KEYS) {
            return Ok(SelectedTransport::MqttWs(uri));
        }
        Err(CoreError::Bootstrap("no usable mqtt transport offered".to_string()))
    }

    pub fn into_config(self) -> Result<BootstrapConfig> {
        let transport = self.select_transport()?;
        Ok(BootstrapConfig { iot3_id: self.iot3_id, psk_run_login: self.psk_run_login, psk_run_password: self.psk_run_password, transport })
    }
}

/// Perform the handshake against `endpoint`, authenticating with HTTP
/// Basic auth using the request's own PSK credentials.
pub async fn bootstrap(endpoint: &str, request: &BootstrapRequest) -> Result<BootstrapConfig> {
    let client = reqwest::Client::new();
    let response = client
        .post(endpoint)
        .basic_auth(&request.psk_login, Some(&request.psk_password))
        .json(request)
        .send()
        .await?
        .error_for_status()?;
    let parsed: BootstrapResponse = response.json().await?;
    parsed.into_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocols(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn prefers_tls_over_clear() {
        let resp = BootstrapResponse {
            iot3_id: "id".into(),
            psk_run_login: "l".into(),
            psk_run_password: "p".into(),
            protocols: protocols(&[("mqtts", "ssl://a:8883"), ("mqtt", "tcp://a:1883")]),
        };
        assert_eq!(resp.select_transport().unwrap(), SelectedTransport::MqttTls("ssl://a:8883".into()));
    }

    #[test]
    fn prefers_native_mqtt_over_websocket_at_the_same_security_level() {
        let resp = BootstrapResponse {
            iot3_id: "id".into(),
            psk_run_login: "l".into(),
            psk_run_password: "p".into(),
            protocols: protocols(&[("mqtt-ws", "ws://a:80"), ("mqtt", "tcp://a:1883")]),
        };
        assert_eq!(resp.select_transport().unwrap(), SelectedTransport::Mqtt("tcp://a:1883".into()));
    }

    #[test]
    fn internal_variant_is_preferred_over_its_public_counterpart() {
        let resp = BootstrapResponse {
            iot3_id: "id".into(),
            psk_run_login: "l".into(),
            psk_run_password: "p".into(),
            protocols: protocols(&[("mqtts", "ssl://public:8883"), ("internal-mqtts", "ssl://internal:8883")]),
        };
        assert_eq!(resp.select_transport().unwrap(), SelectedTransport::MqttTls("ssl://internal:8883".into()));
    }

    #[test]
    fn no_usable_protocol_is_an_error() {
        let resp = BootstrapResponse {
            iot3_id: "id".into(),
            psk_run_login: "l".into(),
            psk_run_password: "p".into(),
            protocols: protocols(&[("otlp-https", "https://a:4318")]),
        };
        assert!(resp.select_transport().is_err());
    }
}
