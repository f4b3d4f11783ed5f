//! ETSI epoch time and TAI leap-second handling.
//!
//! The ETSI epoch is `2004-01-01T00:00:00 TAI`. Converting a UNIX
//! timestamp (UTC, leap-second-naive) to ETSI milliseconds requires
//! accounting for the current UTC-TAI offset, since TAI does not observe
//! leap seconds but UNIX time effectively does (it repeats/skips around
//! them). The offset table is grounded on `iot3.mobility.leapseconds`.

use chrono::{TimeZone, Utc};
use log::warn;

use super::scale::{self, MILLI_SECOND};

/// `(unix timestamp of the leap second insertion, new TAI-UTC offset in
/// seconds)`. Hardcoded fallback for air-gapped deployments; per spec.md
/// §9 expiry of this table must not crash the process.
const LEAP_SECONDS_TABLE: &[(i64, i64)] = &[
    (63_072_000, 10),  // 1972-01-01
    (78_796_800, 11),  // 1972-07-01
    (94_694_400, 12),  // 1973-01-01
    (126_230_400, 13), // 1974-01-01
    (157_766_400, 14), // 1975-01-01
    (189_302_400, 15), // 1976-01-01
    (220_924_800, 16), // 1977-01-01
    (252_460_800, 17), // 1978-01-01
    (283_996_800, 18), // 1979-01-01
    (315_532_800, 19), // 1980-01-01
    (362_793_600, 20), // 1981-07-01
    (394_329_600, 21), // 1982-07-01
    (425_865_600, 22), // 1983-07-01
    (489_024_000, 23), // 1985-07-01
    (567_993_600, 24), // 1988-01-01
    (631_152_000, 25), // 1990-01-01
    (662_688_000, 26), // 1991-01-01
    (709_948_800, 27), // 1992-07-01
    (741_484_800, 28), // 1993-07-01
    (773_020_800, 29), // 1994-07-01
    (820_454_400, 30), // 1996-01-01
    (867_715_200, 31), // 1997-07-01
    (915_148_800, 32), // 1999-01-01
    (1_136_073_600, 33), // 2006-01-01
    (1_230_768_000, 34), // 2009-01-01
    (1_341_100_800, 35), // 2012-07-01
    (1_435_708_800, 36), // 2015-07-01
    (1_483_228_800, 37), // 2017-01-01
];

/// GPS-TAI is a fixed constant (GPS time does not observe leap seconds
/// either, but was defined with a fixed 19s offset from TAI).
pub const GPS_TAI_OFFSET_SECONDS: i64 = 19;

/// ETSI epoch (`2004-01-01T00:00:00 TAI`), as a UNIX timestamp.
pub fn etsi_epoch_unix() -> i64 {
    Utc.with_ymd_and_hms(2004, 1, 1, 0, 0, 0).unwrap().timestamp()
}

/// Current UTC-TAI offset (seconds) applicable at `unix_time`, from the
/// hardcoded fallback leap-second table. If `unix_time` is beyond the
/// table's last entry, the last known offset is used and a warning is
/// logged rather than failing.
pub fn utc_tai_offset(unix_time: i64) -> i64 {
    match LEAP_SECONDS_TABLE.iter().rfind(|(ts, _)| *ts <= unix_time) {
        Some((_, offset)) => *offset,
        None => {
            warn!("unix time {unix_time} predates the leap-second table; assuming offset 0");
            0
        }
    }
}

fn offset_is_stale(unix_time: i64) -> bool {
    let (last_ts, _) = *LEAP_SECONDS_TABLE.last().unwrap();
    unix_time > last_ts + 180 * 24 * 3600
}

/// Convert a UNIX timestamp (seconds, UTC) to ETSI milliseconds since the
/// ETSI epoch, TAI-adjusted.
///
/// The ETSI epoch constant (2004-01-01T00:00:00.000Z) already has a
/// UTC-TAI offset of its own (32s); only leap seconds inserted *after* the
/// epoch count towards the ETSI timestamp, so the adjustment applied here
/// is the offset *relative to* the epoch's offset, not the full absolute
/// offset at `unix_time`.
pub fn unix_to_etsi_ms(unix_time: f64) -> i64 {
    if offset_is_stale(unix_time as i64) {
        warn!("leap-second table may be stale for timestamp {unix_time}; using last known offset");
    }
    let epoch_offset = utc_tai_offset(etsi_epoch_unix()) as f64;
    let offset = utc_tai_offset(unix_time as i64) as f64;
    let delta_seconds = (unix_time - etsi_epoch_unix() as f64) + (offset - epoch_offset);
    scale::si_to_etsi(Some(delta_seconds), MILLI_SECOND, 0, None, None)
}

/// Inverse of `unix_to_etsi_ms`. The leap-second table changes rarely
/// enough that using the offset at the approximate (pre-adjustment) time
/// to undo the epoch-relative adjustment is exact except within the
/// vanishingly small window of the leap second itself.
pub fn etsi_ms_to_unix(etsi_ms: i64) -> f64 {
    let epoch_offset = utc_tai_offset(etsi_epoch_unix()) as f64;
    let delta_seconds = scale::etsi_to_si(etsi_ms, MILLI_SECOND, 0, None).unwrap_or(0.0);
    let approx_unix = etsi_epoch_unix() as f64 + delta_seconds;
    let offset = utc_tai_offset(approx_unix as i64) as f64;
    approx_unix - (offset - epoch_offset)
}

/// `generation_delta_time = unix_to_etsi_ms(t) mod 65536`.
pub fn generation_delta_time(unix_time: f64) -> u16 {
    (unix_to_etsi_ms(unix_time).rem_euclid(65536)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_delta_time_matches_literal_scenario() {
        // 2007-01-01T00:00:00Z is exactly 94_694_400s after the ETSI epoch
        // (2004-01-01, a leap year, gives 1096 days over 3 years). Only the
        // one leap second inserted since the epoch (2006-01-01, taking the
        // offset from 32s to 33s) counts towards the ETSI timestamp, so the
        // adjusted ETSI time is (94_694_400 + 1) * 1000 ms.
        let t = Utc.with_ymd_and_hms(2007, 1, 1, 0, 0, 0).unwrap().timestamp() as f64;
        assert_eq!(unix_to_etsi_ms(t), 94_694_401_000);
        assert_eq!(generation_delta_time(t), 94_694_401_000_i64.rem_euclid(65536) as u16);
    }

    #[test]
    fn leap_second_table_never_panics_beyond_its_range() {
        let far_future = 4_000_000_000_i64;
        let offset = utc_tai_offset(far_future);
        assert_eq!(offset, 37);
    }

    #[test]
    fn etsi_epoch_is_2004() {
        assert_eq!(etsi_epoch_unix(), 1_072_915_200);
    }
}
