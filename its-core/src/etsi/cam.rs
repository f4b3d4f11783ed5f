//! Cooperative Awareness Message (CAM) builder.

use serde_json::json;

use super::scale::{self, Range, CENTI_METER, CENTI_METER_PER_SECOND, DECI_DEGREE, DECI_METER_PER_SECOND_SECOND, DECI_MICRO_DEGREE, MILLI_SECOND};
use super::station::station_id;
use super::time::{generation_delta_time, unix_to_etsi_ms};
use super::StationType;
use crate::gnss::GnssReport;

pub const SCHEMA_VERSION: &str = "1.1.3";

#[derive(Debug, Clone)]
pub struct Cam {
    pub source_uuid: String,
    pub timestamp_etsi_ms: i64,
    pub station_id: u32,
    pub station_type: StationType,
    pub generation_delta_time: u16,
    pub latitude_etsi: i64,
    pub longitude_etsi: i64,
    pub altitude_etsi: i64,
    pub horizontal_confidence_etsi: i64,
    pub heading_etsi: i64,
    pub speed_etsi: i64,
    pub longitudinal_acceleration_etsi: i64,
}

impl Cam {
    pub fn new(uuid: impl Into<String>, station_type: StationType, gnss_report: &GnssReport, now: f64) -> Self {
        let uuid = uuid.into();
        Cam {
            timestamp_etsi_ms: scale::si_to_etsi(Some(now), MILLI_SECOND, 0, None, None),
            station_id: station_id(&uuid),
            station_type,
            generation_delta_time: generation_delta_time(gnss_report.capture_timestamp),
            latitude_etsi: scale::si_to_etsi(gnss_report.latitude, DECI_MICRO_DEGREE, 900_000_001, None, None),
            longitude_etsi: scale::si_to_etsi(gnss_report.longitude, DECI_MICRO_DEGREE, 1_800_000_001, None, None),
            altitude_etsi: scale::si_to_etsi(gnss_report.altitude, CENTI_METER, 800_001, None, None),
            horizontal_confidence_etsi: scale::si_to_etsi(
                gnss_report.horizontal_error,
                CENTI_METER,
                4095,
                Some(Range { min: 0, max: 4093 }),
                Some(4094),
            ),
            heading_etsi: scale::si_to_etsi(gnss_report.track, DECI_DEGREE, 3601, None, None),
            speed_etsi: scale::si_to_etsi(gnss_report.speed, CENTI_METER_PER_SECOND, 16383, None, None),
            longitudinal_acceleration_etsi: scale::si_to_etsi(
                gnss_report.acceleration,
                DECI_METER_PER_SECOND_SECOND,
                161,
                None,
                None,
            ),
            source_uuid: uuid,
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        scale::etsi_to_si(self.latitude_etsi, DECI_MICRO_DEGREE, 900_000_001, None)
    }

    pub fn longitude(&self) -> Option<f64> {
        scale::etsi_to_si(self.longitude_etsi, DECI_MICRO_DEGREE, 1_800_000_001, None)
    }

    pub fn altitude(&self) -> Option<f64> {
        scale::etsi_to_si(self.altitude_etsi, CENTI_METER, 800_001, None)
    }

    pub fn speed(&self) -> Option<f64> {
        scale::etsi_to_si(self.speed_etsi, CENTI_METER_PER_SECOND, 16383, None)
    }

    pub fn timestamp(&self) -> f64 {
        super::time::etsi_ms_to_unix(self.timestamp_etsi_ms)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "type": "cam",
            "origin": "self",
            "version": SCHEMA_VERSION,
            "source_uuid": self.source_uuid,
            "timestamp": self.timestamp_etsi_ms,
            "message": {
                "protocol_version": 1,
                "station_id": self.station_id,
                "generation_delta_time": self.generation_delta_time,
                "basic_container": {
                    "station_type": self.station_type as u8,
                    "reference_position": {
                        "latitude": self.latitude_etsi,
                        "longitude": self.longitude_etsi,
                        "altitude": self.altitude_etsi,
                    },
                    "confidence": {
                        "position_confidence_ellipse": {
                            "semi_major_confidence": self.horizontal_confidence_etsi,
                            "semi_minor_confidence": self.horizontal_confidence_etsi,
                            "semi_major_orientation": 0,
                        },
                    },
                },
                "high_frequency_container": {
                    "heading": self.heading_etsi,
                    "speed": self.speed_etsi,
                    "longitudinal_acceleration": self.longitudinal_acceleration_etsi,
                },
            },
        })
    }

    /// Rebuild a `Cam` purely from its wire JSON, for messages received off
    /// the network rather than built locally.
    pub fn from_json(value: &serde_json::Value) -> Option<Cam> {
        let source_uuid = value.get("source_uuid")?.as_str()?.to_string();
        let timestamp_etsi_ms = value.get("timestamp")?.as_i64()?;
        let message = value.get("message")?;
        let station_id = message.get("station_id")?.as_u64()? as u32;
        let generation_delta_time = message.get("generation_delta_time")?.as_u64()? as u16;
        let basic = message.get("basic_container")?;
        let station_type_raw = basic.get("station_type")?.as_u64()? as u8;
        let station_type = match station_type_raw {
            0 => StationType::Unknown,
            1 => StationType::Pedestrian,
            2 => StationType::Cyclist,
            3 => StationType::Moped,
            4 => StationType::Motorcycle,
            5 => StationType::PassengerCar,
            6 => StationType::Bus,
            7 => StationType::LightTruck,
            8 => StationType::HeavyTruck,
            9 => StationType::Trailer,
            10 => StationType::SpecialVehicles,
            11 => StationType::Tram,
            12 => StationType::LightVruVehicle,
            13 => StationType::Animal,
            14 => StationType::Agricultural,
            _ => StationType::RoadSideUnit,
        };
        let position = basic.get("reference_position")?;
        let confidence = basic
            .get("confidence")?
            .get("position_confidence_ellipse")?;
        let hf = message.get("high_frequency_container")?;

        Some(Cam {
            source_uuid,
            timestamp_etsi_ms,
            station_id,
            station_type,
            generation_delta_time,
            latitude_etsi: position.get("latitude")?.as_i64()?,
            longitude_etsi: position.get("longitude")?.as_i64()?,
            altitude_etsi: position.get("altitude")?.as_i64()?,
            horizontal_confidence_etsi: confidence.get("semi_major_confidence")?.as_i64()?,
            heading_etsi: hf.get("heading")?.as_i64()?,
            speed_etsi: hf.get("speed")?.as_i64()?,
            longitudinal_acceleration_etsi: hf.get("longitudinal_acceleration")?.as_i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> GnssReport {
        GnssReport::new(1_700_000_000.0)
            .latitude(43.635)
            .longitude(-1.375)
            .altitude(12.0)
            .speed(10.0)
            .track(90.0)
            .build()
            .unwrap()
    }

    #[test]
    fn round_trips_through_json() {
        let cam = Cam::new("veh-1", StationType::PassengerCar, &report(), 1_700_000_001.0);
        let json = cam.to_json();
        let back = Cam::from_json(&json).unwrap();
        assert_eq!(back.source_uuid, "veh-1");
        assert_eq!(back.latitude(), cam.latitude());
        assert_eq!(back.speed(), cam.speed());
    }

    #[test]
    fn missing_gnss_fields_become_undef_sentinels() {
        let report = GnssReport::new(1.0).latitude(1.0).longitude(1.0).build().unwrap();
        let cam = Cam::new("veh-2", StationType::Unknown, &report, 1.0);
        assert_eq!(cam.speed_etsi, 16383);
        assert!(cam.speed().is_none());
    }
}
