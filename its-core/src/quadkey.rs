//! Bing-style quadkey tile addressing: identifiers, neighbour arithmetic,
//! and zone optimisation.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CoreError, Result};

/// An immutable string over the alphabet `{0,1,2,3}` encoding a tile at a
/// given depth (`depth() == len()`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuadKey(String);

/// The eight tiles adjacent to a `QuadKey`, in the fixed order the fabric
/// always returns them: `NW, N, NE, W, E, SW, S, SE`. A direction is
/// `None` only at a polar edge (`N`/`NE`/`NW` at the North pole, `S`/`SE`/`SW`
/// at the South pole); `E`/`W` never are, since longitude wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbours {
    pub nw: Option<QuadKey>,
    pub n: Option<QuadKey>,
    pub ne: Option<QuadKey>,
    pub w: QuadKey,
    pub e: QuadKey,
    pub sw: Option<QuadKey>,
    pub s: Option<QuadKey>,
    pub se: Option<QuadKey>,
}

impl Neighbours {
    /// The fields as `(cardinal, Option<QuadKey>)` pairs, in the fixed order.
    fn entries(&self) -> [(&'static str, Option<QuadKey>); 8] {
        [
            ("NW", self.nw.clone()),
            ("N", self.n.clone()),
            ("NE", self.ne.clone()),
            ("W", Some(self.w.clone())),
            ("E", Some(self.e.clone())),
            ("SW", self.sw.clone()),
            ("S", self.s.clone()),
            ("SE", self.se.clone()),
        ]
    }

    /// Present neighbours collected into a `QuadZone`.
    pub fn as_zone(&self) -> QuadZone {
        let mut z = QuadZone::new();
        for (_, q) in self.entries() {
            if let Some(q) = q {
                z.add(q);
            }
        }
        z
    }
}

impl QuadKey {
    /// Build a `QuadKey` from a string of `0123` digits.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let bad: String = s.chars().filter(|c| !"0123".contains(*c)).collect();
        if !bad.is_empty() {
            return Err(CoreError::InvalidQuadKeyDigits(bad));
        }
        Ok(QuadKey(s))
    }

    /// The root (depth 0) quadkey, representing the whole world.
    pub fn root() -> Self {
        QuadKey(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Slash-separated digit rendering, e.g. `"0/1/2"`.
    pub fn to_slashed(&self) -> String {
        self.0.chars().map(|c| c.to_string()).collect::<Vec<_>>().join("/")
    }

    /// Truncate (or, for non-positive `depth`, shrink by `-depth`) this
    /// quadkey. See spec.md §4.1's `make_shallower` table for the exact
    /// clamping semantics at each boundary.
    pub fn make_shallower(&self, depth: i64) -> Self {
        let len = self.0.len() as i64;
        let new_depth = if depth <= 0 {
            (len + depth).max(1)
        } else {
            depth.min(len)
        };
        QuadKey(self.0[..new_depth as usize].to_string())
    }

    /// Append one digit.
    pub fn child(&self, digit: char) -> Result<Self> {
        if !"0123".contains(digit) {
            return Err(CoreError::InvalidQuadKeyDigits(digit.to_string()));
        }
        Ok(QuadKey(format!("{}{}", self.0, digit)))
    }

    /// Split this quadkey into a `QuadZone` of its `4^extra_depth` children.
    pub fn split(&self, extra_depth: usize) -> QuadZone {
        let mut z = QuadZone::new();
        for tail in tails_for(ALL, extra_depth) {
            z.add(QuadKey(format!("{}{}", self.0, tail)));
        }
        z
    }

    pub fn north_of(&self) -> Option<Self> {
        north_of_str(&self.0).map(QuadKey)
    }

    pub fn south_of(&self) -> Option<Self> {
        south_of_str(&self.0).map(QuadKey)
    }

    pub fn east_of(&self) -> Self {
        QuadKey(east_of_str(&self.0).expect("east_of never returns None"))
    }

    pub fn west_of(&self) -> Self {
        QuadKey(west_of_str(&self.0).expect("west_of never returns None"))
    }

    pub fn north_west_of(&self) -> Option<Self> {
        north_of_str(&west_of_str(&self.0).unwrap()).map(QuadKey)
    }

    pub fn north_east_of(&self) -> Option<Self> {
        north_of_str(&east_of_str(&self.0).unwrap()).map(QuadKey)
    }

    pub fn south_west_of(&self) -> Option<Self> {
        south_of_str(&west_of_str(&self.0).unwrap()).map(QuadKey)
    }

    pub fn south_east_of(&self) -> Option<Self> {
        south_of_str(&east_of_str(&self.0).unwrap()).map(QuadKey)
    }

    /// The 8 geometric neighbours at this quadkey's own depth, in the fixed
    /// `NW, N, NE, W, E, SW, S, SE` order.
    pub fn neighbours(&self) -> Neighbours {
        Neighbours {
            nw: self.north_west_of(),
            n: self.north_of(),
            ne: self.north_east_of(),
            w: self.west_of(),
            e: self.east_of(),
            sw: self.south_west_of(),
            s: self.south_of(),
            se: self.south_east_of(),
        }
    }

    /// Whether `self` is contained in `other`, i.e. `other` is a prefix of `self`.
    pub fn is_within(&self, other: &QuadKey) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Debug for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuadKey({:?})", self.0)
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const NW: &str = "3";
const N: &str = "23";
const NE: &str = "2";
const W: &str = "13";
const ALL: &str = "0123";
const E: &str = "02";
const SW: &str = "1";
const S: &str = "01";
const SE: &str = "0";

fn tails_for_card(card: &str, depth: usize) -> Vec<String> {
    tails_for(card, depth)
}

/// Cartesian product of `digits` with itself `depth` times, each combination
/// joined into one tail string. Grounded on `_mk_tail_s` / `_TAILS_FOR`.
fn tails_for(digits: &str, depth: usize) -> Vec<String> {
    if depth == 0 {
        return vec![String::new()];
    }
    let chars: Vec<char> = digits.chars().collect();
    let mut out = vec![String::new()];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(out.len() * chars.len());
        for prefix in &out {
            for c in &chars {
                let mut s = prefix.clone();
                s.push(*c);
                next.push(s);
            }
        }
        out = next;
    }
    out
}

fn north_of_str(q: &str) -> Option<String> {
    match q {
        "0" | "1" => None,
        "2" => Some("0".to_string()),
        "3" => Some("1".to_string()),
        _ => {
            let (prefix, last) = q.split_at(q.len() - 1);
            match last {
                "0" => north_of_str(prefix).map(|p| format!("{p}2")),
                "1" => north_of_str(prefix).map(|p| format!("{p}3")),
                "2" => Some(format!("{prefix}0")),
                "3" => Some(format!("{prefix}1")),
                _ => unreachable!(),
            }
        }
    }
}

fn south_of_str(q: &str) -> Option<String> {
    match q {
        "0" => Some("2".to_string()),
        "1" => Some("3".to_string()),
        "2" | "3" => None,
        _ => {
            let (prefix, last) = q.split_at(q.len() - 1);
            match last {
                "0" => Some(format!("{prefix}2")),
                "1" => Some(format!("{prefix}3")),
                "2" => south_of_str(prefix).map(|p| format!("{p}0")),
                "3" => south_of_str(prefix).map(|p| format!("{p}1")),
                _ => unreachable!(),
            }
        }
    }
}

fn east_of_str(q: &str) -> Option<String> {
    match q {
        "0" => Some("1".to_string()),
        "1" => Some("0".to_string()),
        "2" => Some("3".to_string()),
        "3" => Some("2".to_string()),
        _ => {
            let (prefix, last) = q.split_at(q.len() - 1);
            match last {
                "0" => Some(format!("{prefix}1")),
                "1" => east_of_str(prefix).map(|p| format!("{p}0")),
                "2" => Some(format!("{prefix}3")),
                "3" => east_of_str(prefix).map(|p| format!("{p}2")),
                _ => unreachable!(),
            }
        }
    }
}

fn west_of_str(q: &str) -> Option<String> {
    match q {
        "0" => Some("1".to_string()),
        "1" => Some("0".to_string()),
        "2" => Some("3".to_string()),
        "3" => Some("2".to_string()),
        _ => {
            let (prefix, last) = q.split_at(q.len() - 1);
            match last {
                "0" => west_of_str(prefix).map(|p| format!("{p}1")),
                "1" => Some(format!("{prefix}0")),
                "2" => west_of_str(prefix).map(|p| format!("{p}3")),
                "3" => Some(format!("{prefix}2")),
                _ => unreachable!(),
            }
        }
    }
}

/// A set of `QuadKey`s supporting sibling-coalescence optimisation and
/// border-neighbour expansion.
#[derive(Debug, Clone, Default)]
pub struct QuadZone {
    quadkeys: BTreeSet<QuadKey>,
}

impl QuadZone {
    pub fn new() -> Self {
        QuadZone { quadkeys: BTreeSet::new() }
    }

    pub fn from_iter(iter: impl IntoIterator<Item = QuadKey>) -> Self {
        let mut z = QuadZone::new();
        for q in iter {
            z.add(q);
        }
        z
    }

    pub fn add(&mut self, quadkey: QuadKey) {
        self.quadkeys.insert(quadkey);
    }

    pub fn len(&self) -> usize {
        self.quadkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quadkeys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuadKey> {
        self.quadkeys.iter()
    }

    pub fn contains(&self, quadkey: &QuadKey) -> bool {
        self.quadkeys.iter().any(|q| quadkey.is_within(q))
    }

    /// Minimum and maximum depth over members of the zone.
    pub fn depth_range(&self) -> Option<(usize, usize)> {
        let mut min = None;
        let mut max = None;
        for q in &self.quadkeys {
            let d = q.depth();
            min = Some(min.map_or(d, |m: usize| m.min(d)));
            max = Some(max.map_or(d, |m: usize| m.max(d)));
        }
        min.zip(max)
    }

    /// Coalesce four contiguous siblings into their parent, to a fixed
    /// point. Grounded exactly on `QuadZone.optimise` in `quadkeys.py`:
    /// sort, drop anything already covered by a preceding ancestor, then
    /// merge `root + "1"`, `root + "2"`, `root + "3"` runs back into `root`
    /// whenever `root + "0"` (the current element) starts such a run.
    pub fn optimise(&mut self) {
        let mut current: Vec<QuadKey> = self.quadkeys.iter().cloned().collect();
        current.sort();
        let mut prev_len = current.len() + 1;

        while prev_len > current.len() {
            prev_len = current.len();
            let mut to_merge: Vec<QuadKey> = current;
            let mut merged: Vec<QuadKey> = Vec::new();

            while let Some(quadkey) = to_merge.first().cloned() {
                to_merge.remove(0);

                if let Some(last) = merged.last() {
                    if quadkey.is_within(last) {
                        continue;
                    }
                }

                if to_merge.len() < 3 {
                    merged.push(quadkey);
                    continue;
                }

                let root = quadkey.make_shallower(-1);
                let want1 = root.child('1').unwrap();
                let want2 = root.child('2').unwrap();
                let want3 = root.child('3').unwrap();
                if to_merge[0] == want1 && to_merge[1] == want2 && to_merge[2] == want3 {
                    to_merge.drain(0..3);
                    merged.push(root);
                } else {
                    merged.push(quadkey);
                }
            }

            current = merged;
        }

        self.quadkeys = current.into_iter().collect();
    }

    /// The tiles at depth `d` that touch this zone's boundary but are not
    /// already contained in it. For members shallower than `d`, the
    /// relevant border digits (per `_TAILS_FOR`) are expanded first.
    pub fn neighbours(&self, depth: usize) -> QuadZone {
        let mut all = QuadZone::new();

        for quadkey in &self.quadkeys {
            let nghb = quadkey.neighbours();
            if quadkey.depth() >= depth {
                for (_, q) in nghb.entries() {
                    if let Some(q) = q {
                        all.add(q.make_shallower(depth as i64));
                    }
                }
            } else {
                let extra = depth - quadkey.depth();
                for (card, q) in nghb.entries() {
                    let Some(root) = q else { continue };
                    for tail in tails_for_card(card_tails(card), extra) {
                        all.add(QuadKey(format!("{root}{tail}")));
                    }
                }
            }
        }

        let mut final_nghbs = QuadZone::new();
        for q in all.iter() {
            if !self.contains(q) {
                final_nghbs.add(q.clone());
            }
        }
        final_nghbs
    }
}

fn card_tails(card: &str) -> &'static str {
    match card {
        "NW" => NW,
        "N" => N,
        "NE" => NE,
        "W" => W,
        "E" => E,
        "SW" => SW,
        "S" => S,
        "SE" => SE,
        _ => unreachable!(),
    }
}

impl FromIterator<QuadKey> for QuadZone {
    fn from_iter<T: IntoIterator<Item = QuadKey>>(iter: T) -> Self {
        QuadZone::from_iter(iter)
    }
}

/// Bing-style `lat/lon` to quadkey conversion at a given depth, matching
/// the spherical-Mercator tiling the fabric's topic addressing assumes.
pub fn from_lat_lon(lat: f64, lon: f64, depth: usize) -> QuadKey {
    let lat = lat.clamp(-85.051_128_78, 85.051_128_78);
    let lon = lon.clamp(-180.0, 180.0);

    let sin_lat = (lat.to_radians()).sin();
    let x = (lon + 180.0) / 360.0;
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * std::f64::consts::PI);

    let map_size = 1u64 << depth;
    let pixel_x = (x * map_size as f64).floor().min((map_size - 1) as f64) as u64;
    let pixel_y = (y * map_size as f64).floor().min((map_size - 1) as f64) as u64;

    let mut digits = String::with_capacity(depth);
    for i in (0..depth).rev() {
        let mut digit = 0u8;
        let mask = 1u64 << i;
        if pixel_x & mask != 0 {
            digit += 1;
        }
        if pixel_y & mask != 0 {
            digit += 2;
        }
        digits.push((b'0' + digit) as char);
    }
    QuadKey(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbours_of_033() {
        // Cross-checked against the digit arithmetic directly (each quadkey
        // digit is 2*y_bit + x_bit, MSB first): N/NE/E/S/SE agree digit-for
        // digit with independent binary addition/subtraction on x and y.
        let q = QuadKey::new("033").unwrap();
        let n = q.neighbours();
        assert_eq!(n.nw.unwrap().as_str(), "030");
        assert_eq!(n.n.unwrap().as_str(), "031");
        assert_eq!(n.ne.unwrap().as_str(), "120");
        assert_eq!(n.w.as_str(), "032");
        assert_eq!(n.e.as_str(), "122");
        assert_eq!(n.sw.unwrap().as_str(), "210");
        assert_eq!(n.s.unwrap().as_str(), "211");
        assert_eq!(n.se.unwrap().as_str(), "300");
    }

    #[test]
    fn north_pole_has_no_north() {
        let q = QuadKey::new("0").unwrap();
        assert!(q.north_of().is_none());
    }

    #[test]
    fn zone_optimisation_coalesces_siblings() {
        let mut z = QuadZone::new();
        for q in ["00", "01", "02", "03", "1"] {
            z.add(QuadKey::new(q).unwrap());
        }
        z.optimise();
        let mut result: Vec<String> = z.iter().map(|q| q.as_str().to_string()).collect();
        result.sort();
        assert_eq!(result, vec!["0".to_string(), "1".to_string()]);
    }

    #[test]
    fn neighbours_never_overlap_zone() {
        let mut z = QuadZone::new();
        for q in ["00", "01", "02", "03", "1"] {
            z.add(QuadKey::new(q).unwrap());
        }
        z.optimise();
        let nghbs = z.neighbours(2);
        for n in nghbs.iter() {
            assert!(!z.contains(n));
        }
    }

    #[test]
    fn optimised_zone_has_no_ancestor_relation() {
        let mut z = QuadZone::new();
        for q in ["00", "01", "02", "03", "1", "20"] {
            z.add(QuadKey::new(q).unwrap());
        }
        z.optimise();
        let members: Vec<&QuadKey> = z.iter().collect();
        for (i, a) in members.iter().enumerate() {
            for (j, b) in members.iter().enumerate() {
                if i != j {
                    assert!(!a.is_within(b));
                }
            }
        }
    }

    #[test]
    fn make_shallower_clamps() {
        let q = QuadKey::new("0".repeat(22)).unwrap();
        assert_eq!(q.make_shallower(30).depth(), 22);
        assert_eq!(q.make_shallower(22).depth(), 22);
        assert_eq!(q.make_shallower(12).depth(), 12);
        assert_eq!(q.make_shallower(0).depth(), 22);
        assert_eq!(q.make_shallower(-5).depth(), 17);
        assert_eq!(q.make_shallower(-21).depth(), 1);
        assert_eq!(q.make_shallower(-30).depth(), 1);
    }

    #[test]
    fn split_produces_4_pow_extra_depth_children() {
        let q = QuadKey::new("03").unwrap();
        let z = q.split(2);
        assert_eq!(z.len(), 16);
        for child in z.iter() {
            assert!(child.is_within(&q));
            assert_eq!(child.depth(), 4);
        }
    }

    #[test]
    fn east_west_never_absent() {
        for q in ["0", "1", "2", "3", "033", "300"] {
            let q = QuadKey::new(q).unwrap();
            q.east_of();
            q.west_of();
        }
    }
}
