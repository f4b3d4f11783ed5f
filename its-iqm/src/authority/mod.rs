//! Central authority sources: periodically produce the current neighbour
//! list, in whatever shape their backing store holds it (an INI file on
//! disk, an INI document served over HTTP, or a JSON document pushed over
//! MQTT), demuxed by `[authority] type`.

pub mod file;
pub mod http;
pub mod mqtt;

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::config::AuthorityConfig;

/// One neighbour's descriptor fields, as loaded from whichever source is
/// configured. Only `type`, `host`, `port`, and `queue` are required for an
/// `mqtt`-type neighbour (the only kind currently supported); `prefix`,
/// `suffix`, `username`, and `password` are optional overrides.
pub type NeighbourDescriptor = HashMap<String, String>;

/// The full current neighbour list, keyed by neighbour id (the INI section
/// name, or JSON object key).
pub type NeighbourMap = HashMap<String, NeighbourDescriptor>;

/// Run the configured authority source until the supervisor cancels it,
/// sending every loaded snapshot to `tx`. A source that fails to load
/// (missing file, unreachable HTTP server) sends nothing for that tick
/// rather than an empty map, so the router keeps using what it has.
pub async fn run(config: AuthorityConfig, tx: mpsc::UnboundedSender<NeighbourMap>) {
    match config {
        AuthorityConfig::File { path, reload } => file::run(path, reload, tx).await,
        AuthorityConfig::Http { uri, reload } => http::run(uri, reload, tx).await,
        AuthorityConfig::Mqtt { host, port, topic, client_id, username, password } => {
            mqtt::run(host, port, topic, client_id, username, password, tx).await
        }
    }
}
