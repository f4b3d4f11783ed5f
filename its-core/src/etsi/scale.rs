//! SI-unit to ETSI-scaled-integer conversions.
//!
//! Every key in an ETSI message tree has its own scale; there is no single
//! "ETSI unit", just a family of fixed rationals applied per field. Ported
//! from `iot3.mobility.etsi.ETSI`.

/// A validity range, in ETSI-scaled integer units, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

// Length scales, in meters.
pub const METER: f64 = 1.0;
pub const DECI_METER: f64 = METER / 10.0;
pub const CENTI_METER: f64 = METER / 100.0;
pub const MILLI_METER: f64 = METER / 1_000.0;
pub const KILO_METER: f64 = METER * 1_000.0;

// Time scales, in seconds.
pub const SECOND: f64 = 1.0;
pub const MILLI_SECOND: f64 = SECOND / 1_000.0;
pub const MICRO_SECOND: f64 = SECOND / 1_000_000.0;
pub const NANO_SECOND: f64 = SECOND / 1_000_000_000.0;
pub const HOUR: f64 = 3600.0 * SECOND;

// Speed scales.
pub const METER_PER_SECOND: f64 = METER / SECOND;
pub const CENTI_METER_PER_SECOND: f64 = CENTI_METER / SECOND;
pub const KILO_METER_PER_HOUR: f64 = KILO_METER / HOUR;

// Acceleration scales.
pub const METER_PER_SECOND_SECOND: f64 = METER / (SECOND * SECOND);
pub const DECI_METER_PER_SECOND_SECOND: f64 = DECI_METER / (SECOND * SECOND);

// Angle scales, in degrees.
pub const DEGREE: f64 = 1.0;
pub const DECI_DEGREE: f64 = DEGREE / 10.0;
pub const CENTI_DEGREE: f64 = DEGREE / 100.0;
pub const DECI_MICRO_DEGREE: f64 = DEGREE / 10_000_000.0;

// Rotation speed scales.
pub const DEGREE_PER_SECOND: f64 = DEGREE / SECOND;
pub const CENTI_DEGREE_PER_SECOND: f64 = CENTI_DEGREE / SECOND;

/// Convert an optional SI value into its ETSI-scaled integer form.
///
/// Returns `undef` when `value` is absent, the rounded `value / scale`
/// when within `range` (or when no range is given), and `out_of_range`
/// (falling back to clamping at the nearest bound when `out_of_range` is
/// not given) otherwise.
pub fn si_to_etsi(
    value: Option<f64>,
    scale: f64,
    undef: i64,
    range: Option<Range>,
    out_of_range: Option<i64>,
) -> i64 {
    let Some(value) = value else {
        return undef;
    };
    let etsi_value = (value / scale).round() as i64;
    if let Some(range) = range {
        if etsi_value < range.min || etsi_value > range.max {
            return match out_of_range {
                Some(oor) => oor,
                None => etsi_value.clamp(range.min, range.max),
            };
        }
    }
    etsi_value
}

/// Convert an ETSI-scaled integer back into an SI value, or `None` for
/// either of the sentinel values.
pub fn etsi_to_si(value: i64, scale: f64, undef: i64, out_of_range: Option<i64>) -> Option<f64> {
    if value == undef {
        return None;
    }
    if let Some(oor) = out_of_range {
        if value == oor {
            return None;
        }
    }
    Some(value as f64 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latitude_scale_round_trip() {
        let etsi = si_to_etsi(Some(43.635), DECI_MICRO_DEGREE, 900_000_001, None, None);
        assert_eq!(etsi, 436_350_000);

        let undef = si_to_etsi(None, DECI_MICRO_DEGREE, 900_000_001, None, None);
        assert_eq!(undef, 900_000_001);
    }

    #[test]
    fn round_trip_recovers_original_value() {
        let scale = CENTI_METER;
        let original = 123.45_f64;
        let etsi = si_to_etsi(Some(original), scale, 800_001, None, None);
        let back = etsi_to_si(etsi, scale, 800_001, None).unwrap();
        assert!((back - original).abs() < scale / 2.0);
    }

    #[test]
    fn out_of_range_uses_sentinel() {
        let etsi = si_to_etsi(
            Some(10_000.0),
            CENTI_METER,
            800_001,
            Some(Range { min: 0, max: 800_000 }),
            Some(800_002),
        );
        assert_eq!(etsi, 800_002);
    }
}
