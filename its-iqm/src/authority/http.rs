//! HTTP-backed authority source: an INI document fetched from `uri` on a
//! fixed interval. Any failure (network error, malformed body) leaves the
//! neighbour list untouched rather than clearing it or erroring out.

use std::time::Duration;

use configparser::ini::Ini;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::NeighbourMap;

pub async fn run(uri: String, reload: u64, tx: mpsc::UnboundedSender<NeighbourMap>) {
    info!("authority http client to {uri}@{reload}s");
    let client = reqwest::Client::new();
    loop {
        match load(&client, &uri).await {
            Some(neighbours) => {
                debug!("authority http client: loaded {} neighbour(s)", neighbours.len());
                if tx.send(neighbours).is_err() {
                    return;
                }
            }
            None => warn!("authority http client: failed to download neighbour list; changing nothing"),
        }
        tokio::time::sleep(Duration::from_secs(reload)).await;
    }
}

async fn load(client: &reqwest::Client, uri: &str) -> Option<NeighbourMap> {
    let body = client.get(uri).send().await.ok()?.text().await.ok()?;
    let mut ini = Ini::new();
    ini.read(body).ok()?;
    Some(
        ini.sections()
            .into_iter()
            .map(|section| {
                let fields = ini
                    .get_map_ref()
                    .get(&section)
                    .map(|m| m.iter().filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v))).collect())
                    .unwrap_or_default();
                (section, fields)
            })
            .collect(),
    )
}
