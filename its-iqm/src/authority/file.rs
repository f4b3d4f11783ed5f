//! File-backed authority source: an INI file of `[neighbour-id]` sections,
//! re-read on a fixed interval. A missing file means an empty neighbour
//! list, not an error — matching `FileNotFoundError` being swallowed in
//! the source this is grounded on.

use std::time::Duration;

use configparser::ini::Ini;
use log::{debug, info};
use tokio::sync::mpsc;

use super::NeighbourMap;

pub async fn run(path: String, reload: Option<u64>, tx: mpsc::UnboundedSender<NeighbourMap>) {
    info!("authority file client to {path}");
    loop {
        let neighbours = load(&path);
        debug!("authority file client: loaded {} neighbour(s)", neighbours.len());
        if tx.send(neighbours).is_err() {
            return;
        }
        let Some(reload) = reload else { return };
        tokio::time::sleep(Duration::from_secs(reload)).await;
    }
}

fn load(path: &str) -> NeighbourMap {
    let mut ini = Ini::new();
    match ini.load(path) {
        Ok(_) => {}
        Err(_) => return NeighbourMap::new(),
    }
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
        .collect()
}
