//! gpsd-protocol GNSS daemon client.
//!
//! Ambient supplement grounded on the mobility stack's gpsd reader: a plain
//! TCP connection to a local gpsd (or gpsd-compatible) daemon, speaking its
//! newline-delimited JSON protocol. Only the `TPV` (time-position-velocity)
//! and `ATT` (attitude) report classes are consumed; everything else is
//! ignored. A short read, an empty line, or a socket timeout all trigger a
//! reconnect rather than propagating an error, since the GNSS fix feed is
//! best-effort background input, not something callers block on.

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::gnss::{GnssCache, GnssReport};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);
const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

/// Connects to `host:port`, issues the gpsd `WATCH` handshake, and feeds
/// every `TPV` report it receives into `cache`. Runs until cancelled;
/// reconnects with a fixed backoff on any I/O error. `cache` is cheap to
/// clone (an `Arc` internally), so callers keep their own handle to read
/// from while this task owns the connection.
pub async fn run(host: String, port: u16, cache: GnssCache) {
    loop {
        match connect_and_watch(&host, port, &cache).await {
            Ok(()) => {}
            Err(e) => debug!("gnss daemon {host}:{port}: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn connect_and_watch(host: &str, port: u16, cache: &GnssCache) -> std::io::Result<()> {
    let stream = tokio::time::timeout(SOCKET_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(WATCH_COMMAND.as_bytes()).await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(SOCKET_TIMEOUT, reader.read_line(&mut line)).await;
        let n = match read {
            Ok(result) => result?,
            Err(_) => return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out")),
        };
        if n == 0 || line.trim().is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        handle_line(line.trim(), cache);
    }
}

fn handle_line(line: &str, cache: &GnssCache) {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("gnss daemon: malformed report ignored: {e}");
            return;
        }
    };
    let class = value.get("class").and_then(|c| c.as_str()).unwrap_or("");
    match class {
        "TPV" => {
            if let Some(report) = tpv_to_report(&value) {
                cache.update(report);
            }
        }
        "ATT" => {
            // Attitude reports carry heading/pitch/roll that some gpsd
            // builds split out from TPV; not needed by the message codec,
            // which reads `track` from TPV directly.
        }
        _ => {}
    }
}

fn tpv_to_report(value: &Value) -> Option<GnssReport> {
    let time = value.get("time")?.as_str()?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(time).ok()?.timestamp_millis() as f64 / 1000.0;

    let mut builder = GnssReport::new(timestamp);
    if let Some(lat) = value.get("lat").and_then(|v| v.as_f64()) {
        builder = builder.latitude(lat);
    }
    if let Some(lon) = value.get("lon").and_then(|v| v.as_f64()) {
        builder = builder.longitude(lon);
    }
    if let Some(alt) = value.get("altHAE").and_then(|v| v.as_f64()) {
        builder = builder.altitude(alt);
    }
    if let Some(speed) = value.get("speed").and_then(|v| v.as_f64()) {
        builder = builder.speed(speed);
    }
    if let Some(track) = value.get("track").and_then(|v| v.as_f64()) {
        builder = builder.track(track);
    }
    if let Some(eph) = value.get("eph").and_then(|v| v.as_f64()) {
        builder = builder.horizontal_error(eph);
    }
    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_tpv_non_att_reports_are_ignored_without_panicking() {
        let cache = GnssCache::new();
        handle_line(r#"{"class":"VERSION","release":"3.25"}"#, &cache);
        assert!(cache.current().is_none());
    }

    #[test]
    fn malformed_json_is_ignored_without_panicking() {
        let cache = GnssCache::new();
        handle_line("not json", &cache);
        assert!(cache.current().is_none());
    }

    #[test]
    fn tpv_report_populates_cache() {
        let cache = GnssCache::new();
        let line = r#"{"class":"TPV","time":"2024-01-01T00:00:00.000Z","lat":43.635,"lon":-1.375,"speed":5.0,"track":90.0}"#;
        handle_line(line, &cache);
        let report = cache.current().unwrap();
        assert_eq!(report.latitude, Some(43.635));
        assert_eq!(report.speed, Some(5.0));
    }
}
