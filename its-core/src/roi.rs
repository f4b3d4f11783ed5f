//! Geo-subscription (region-of-interest) engine.
//!
//! Tracks, independently per message type, the 3x3 block of quadkey tiles
//! around a moving point and the topic set that block maps to. Subscription
//! updates are debounced: a new GNSS fix only triggers re-subscription when
//! the centre tile actually changes, and the tiling depth itself shrinks as
//! speed increases so a fast-moving station doesn't cross tile boundaries
//! every few fixes.

use std::collections::HashMap;

use crate::etsi::topic::{default_depth_for, format_subscription_wildcard};
use crate::quadkey::{from_lat_lon, QuadKey, QuadZone};

/// A speed threshold past which the tiling depth is reduced by one level,
/// in metres per second. Grounded on the depth/speed table the vehicle
/// client's region-of-interest module applies: stationary and walking
/// speeds keep full depth, and depth drops one level per threshold crossed
/// so the subscribed area widens before the station can cross it between
/// fixes.
const SPEED_DEPTH_THRESHOLDS_MPS: &[f64] = &[3.0, 14.0, 28.0];

/// Reduce `base_depth` by one level for every threshold in
/// `SPEED_DEPTH_THRESHOLDS_MPS` that `speed_mps` meets or exceeds, floored
/// at 1.
fn depth_for_speed(base_depth: usize, speed_mps: f64) -> usize {
    let drop = SPEED_DEPTH_THRESHOLDS_MPS.iter().filter(|&&t| speed_mps >= t).count();
    base_depth.saturating_sub(drop).max(1)
}

/// The result of feeding a new position into the engine: the topic set to
/// subscribe and unsubscribe to reach the new region of interest, and the
/// full resulting set for callers that prefer an atomic `subscribe_replace`
/// over incremental subscribe/unsubscribe calls.
#[derive(Debug, Clone, Default)]
pub struct RoiUpdate {
    pub subscribe: Vec<String>,
    pub unsubscribe: Vec<String>,
    pub replace: Vec<String>,
}

impl RoiUpdate {
    fn unchanged() -> Option<Self> {
        None
    }
}

struct PerTypeState {
    centre: Option<QuadKey>,
    depth: usize,
    topics: Vec<String>,
}

/// Tracks the region of interest independently for each message type
/// (`cam`, `denm`, `cpm`, ...), since each has its own default tiling depth
/// and may be subscribed to at a different cadence.
pub struct RoiEngine {
    sub_prefix: String,
    states: HashMap<String, PerTypeState>,
}

impl RoiEngine {
    /// `sub_prefix` is the queue-level topic prefix (e.g. `{prefix}/outQueue/{suffix}`); the
    /// message type, sender wildcard, tile, and tail wildcard are appended per tile by `update`.
    pub fn new(sub_prefix: impl Into<String>) -> Self {
        RoiEngine { sub_prefix: sub_prefix.into(), states: HashMap::new() }
    }

    /// Feed a new position and speed for `msg_type`. Returns `None` when
    /// the centre tile hasn't changed since the last call (debounced), or
    /// `Some(RoiUpdate)` describing the topic set delta otherwise.
    pub fn update(&mut self, msg_type: &str, latitude: f64, longitude: f64, speed_mps: f64) -> Option<RoiUpdate> {
        let base_depth = default_depth_for(msg_type);
        let depth = depth_for_speed(base_depth, speed_mps.abs());
        let centre = from_lat_lon(latitude, longitude, depth);

        let state = self.states.entry(msg_type.to_string()).or_insert(PerTypeState { centre: None, depth, topics: Vec::new() });

        if state.centre.as_ref() == Some(&centre) && state.depth == depth {
            return RoiUpdate::unchanged();
        }

        let mut zone = QuadZone::new();
        zone.add(centre.clone());
        for n in zone.neighbours(depth).iter() {
            zone.add(n.clone());
        }
        zone.optimise();

        let new_topics: Vec<String> = zone
            .iter()
            .map(|q| format_subscription_wildcard(&self.sub_prefix, msg_type, &q.to_slashed()))
            .collect();

        let old: std::collections::HashSet<&String> = state.topics.iter().collect();
        let new: std::collections::HashSet<&String> = new_topics.iter().collect();

        let subscribe: Vec<String> = new.difference(&old).map(|s| s.to_string()).collect();
        let unsubscribe: Vec<String> = old.difference(&new).map(|s| s.to_string()).collect();

        state.centre = Some(centre);
        state.depth = depth;
        state.topics = new_topics.clone();

        Some(RoiUpdate { subscribe, unsubscribe, replace: new_topics })
    }

    /// The currently subscribed topics for `msg_type`, if any.
    pub fn current_topics(&self, msg_type: &str) -> &[String] {
        self.states.get(msg_type).map(|s| s.topics.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_decreases_with_speed() {
        assert_eq!(depth_for_speed(22, 0.0), 22);
        assert_eq!(depth_for_speed(22, 3.0), 21);
        assert_eq!(depth_for_speed(22, 14.0), 20);
        assert_eq!(depth_for_speed(22, 30.0), 19);
    }

    #[test]
    fn depth_never_drops_below_one() {
        assert_eq!(depth_for_speed(2, 100.0), 1);
    }

    #[test]
    fn first_update_yields_pure_subscribe() {
        let mut roi = RoiEngine::new("v2x/outQueue/suffix");
        let update = roi.update("cam", 43.635, -1.375, 0.0).unwrap();
        assert!(update.unsubscribe.is_empty());
        assert!(!update.subscribe.is_empty());
        assert_eq!(update.subscribe.len(), update.replace.len());
    }

    #[test]
    fn stationary_fixes_are_debounced() {
        let mut roi = RoiEngine::new("v2x/outQueue/suffix");
        assert!(roi.update("cam", 43.635, -1.375, 0.0).is_some());
        assert!(roi.update("cam", 43.635, -1.375, 0.0).is_none());
    }

    #[test]
    fn message_types_track_independently() {
        let mut roi = RoiEngine::new("v2x/outQueue/suffix");
        roi.update("cam", 43.635, -1.375, 0.0);
        assert!(roi.current_topics("denm").is_empty());
        roi.update("denm", 43.635, -1.375, 0.0);
        assert!(!roi.current_topics("denm").is_empty());
    }

    /// spec.md §8 scenario 7: the reconciled subscription set for the
    /// centre tile plus its 8 neighbours is exactly 9 wildcards, each
    /// using `+` for the sender segment and a `#` tail.
    #[test]
    fn roi_reconciliation_yields_nine_wildcards_with_sender_wildcard() {
        let mut roi = RoiEngine::new("v2x/outQueue/suffix");
        let update = roi.update("denm", 43.635, -1.375, 10.0).unwrap();
        assert_eq!(update.replace.len(), 9);
        for topic in &update.replace {
            assert!(topic.starts_with("v2x/outQueue/suffix/denm/+/"));
            assert!(topic.ends_with("/#"));
        }
    }
}
