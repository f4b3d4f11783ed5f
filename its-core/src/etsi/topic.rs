//! Geo-addressed topic formatting.
//!
//! Builds the `<prefix>/<queue>/<suffix>/<msg_type>/<source_uuid>/<q0>/.../<qN>`
//! topic grammar (spec.md §6) from a message's type, source UUID, and
//! position, tiled to a message-type-specific depth (22 for CAM/CPM, 15 for
//! DENM by default).

use crate::quadkey::from_lat_lon;

/// Default tile depth for CAM/CPM topics.
pub const DEFAULT_DEPTH_CAM_CPM: usize = 22;
/// Default tile depth for DENM topics.
pub const DEFAULT_DEPTH_DENM: usize = 15;

/// Substitute `{source_uuid}`, `{msg_type}`, and `{quadkey}` in `template`,
/// where `quadkey` is `(latitude, longitude)` tiled at `depth` and rendered
/// slash-separated.
pub fn format_topic(
    template: &str,
    msg_type: &str,
    source_uuid: &str,
    latitude: f64,
    longitude: f64,
    depth: usize,
) -> String {
    let quadkey = from_lat_lon(latitude, longitude, depth);
    template
        .replace("{source_uuid}", source_uuid)
        .replace("{msg_type}", msg_type)
        .replace("{quadkey}", &quadkey.to_slashed())
}

/// Default base depth for a message type, per spec.md §6.
pub fn default_depth_for(msg_type: &str) -> usize {
    match msg_type {
        "denm" => DEFAULT_DEPTH_DENM,
        _ => DEFAULT_DEPTH_CAM_CPM,
    }
}

/// Build the RoI subscription wildcard for one tile: `{sub_prefix}/{msg_type}/+/{slashed_tile}/#`
/// (spec.md §4.4 step 5). `+` matches the sender's `source_uuid` segment — a subscriber wants to
/// see every station's messages in the tile, not just its own — and the trailing `#` matches any
/// deeper tile digits a publisher at this same coarse tile may emit.
pub fn format_subscription_wildcard(sub_prefix: &str, msg_type: &str, slashed_tile: &str) -> String {
    format!("{sub_prefix}/{msg_type}/+/{slashed_tile}/#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_three_placeholders() {
        let topic = format_topic(
            "{msg_type}/{source_uuid}/{quadkey}",
            "cam",
            "abc",
            43.635,
            -1.375,
            3,
        );
        assert!(topic.starts_with("cam/abc/"));
        let tile = topic.rsplit('/').take(3).collect::<Vec<_>>();
        assert_eq!(tile.len(), 3);
    }

    #[test]
    fn default_depths_match_spec() {
        assert_eq!(default_depth_for("cam"), 22);
        assert_eq!(default_depth_for("cpm"), 22);
        assert_eq!(default_depth_for("denm"), 15);
    }

    #[test]
    fn subscription_wildcard_uses_plus_for_sender_and_hash_tail() {
        let wildcard = format_subscription_wildcard("v2x/outQueue/suffix", "cam", "0/1/2");
        assert_eq!(wildcard, "v2x/outQueue/suffix/cam/+/0/1/2/#");
    }
}
