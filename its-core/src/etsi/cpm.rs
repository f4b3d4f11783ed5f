//! Collective Perception Message (CPM) builder.
//!
//! Grounded on `iot3.mobility.cpm.CollectivePerceptionMessage`: a reference
//! position plus a list of perceived objects, each carrying a 2D position
//! and optional velocity/age/quality/classification.

use serde_json::json;

use super::scale::{self, Range, CENTI_METER, CENTI_METER_PER_SECOND, DECI_DEGREE, DECI_MICRO_DEGREE, MILLI_SECOND};
use super::station::station_id;
use super::time::unix_to_etsi_ms;
use super::StationType;
use crate::gnss::GnssReport;

pub const SCHEMA_VERSION: &str = "2.1.1";

/// Best-confidence classification of a perceived object, per the CPM
/// schema's `object_class` taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Vehicle(StationType),
    VruPedestrian(u8),
    VruBicyclistAndLightVruVehicle(u8),
    VruMotorcyclist(u8),
    Other(u8),
}

impl ObjectClass {
    fn to_json(self) -> serde_json::Value {
        match self {
            ObjectClass::Vehicle(t) => json!({ "vehicle": t as u8 }),
            ObjectClass::VruPedestrian(v) => json!({ "vru": { "pedestrian": v } }),
            ObjectClass::VruBicyclistAndLightVruVehicle(v) => {
                json!({ "vru": { "bicyclist_and_light_vru_vehicle": v } })
            }
            ObjectClass::VruMotorcyclist(v) => json!({ "vru": { "motorcyclist": v } }),
            ObjectClass::Other(v) => json!({ "other": v }),
        }
    }
}

/// One perceived object, in SI units relative to the reporting station.
#[derive(Debug, Clone)]
pub struct PerceivedObject {
    pub object_id: u32,
    pub measurement_delta_time: f64,
    pub x_distance: f64,
    pub y_distance: f64,
    pub object_age: Option<f64>,
    pub x_speed: Option<f64>,
    pub y_speed: Option<f64>,
    pub quality: u8,
    pub classification: Option<ObjectClass>,
    pub classification_confidence: u8,
}

impl PerceivedObject {
    pub fn new(object_id: u32, measurement_delta_time: f64, x_distance: f64, y_distance: f64) -> Self {
        PerceivedObject {
            object_id,
            measurement_delta_time,
            x_distance,
            y_distance,
            object_age: None,
            x_speed: None,
            y_speed: None,
            quality: 0,
            classification: None,
            classification_confidence: 0,
        }
    }

    pub fn with_velocity(mut self, x_speed: f64, y_speed: f64) -> Self {
        self.x_speed = Some(x_speed);
        self.y_speed = Some(y_speed);
        self
    }

    pub fn with_age(mut self, age: f64) -> Self {
        self.object_age = Some(age);
        self
    }

    pub fn with_classification(mut self, class: ObjectClass, confidence: u8) -> Self {
        self.classification = Some(class);
        self.classification_confidence = confidence;
        self
    }

    fn to_json(&self) -> serde_json::Value {
        let mut po = json!({
            "object_id": self.object_id,
            "measurement_delta_time": scale::si_to_etsi(
                Some(self.measurement_delta_time),
                MILLI_SECOND,
                0,
                Some(Range { min: -2048, max: 2047 }),
                None,
            ),
            "position": {
                "x_coordinate": {
                    "value": scale::si_to_etsi(Some(self.x_distance), CENTI_METER, 0, None, None),
                    "confidence": 4096,
                },
                "y_coordinate": {
                    "value": scale::si_to_etsi(Some(self.y_distance), CENTI_METER, 0, None, None),
                    "confidence": 4096,
                },
            },
            "velocity": {
                "cartesian_velocity": {
                    "x_velocity": {
                        "value": scale::si_to_etsi(
                            self.x_speed,
                            CENTI_METER_PER_SECOND,
                            16_383,
                            Some(Range { min: -16_383, max: 16_382 }),
                            None,
                        ),
                        "confidence": 127,
                    },
                    "y_velocity": {
                        "value": scale::si_to_etsi(
                            self.y_speed,
                            CENTI_METER_PER_SECOND,
                            16_383,
                            Some(Range { min: -16_383, max: 16_382 }),
                            None,
                        ),
                        "confidence": 127,
                    },
                },
            },
            "object_perception_quality": self.quality,
        });

        if let Some(age) = self.object_age {
            po["object_age"] = json!(scale::si_to_etsi(
                Some(age),
                MILLI_SECOND,
                0,
                Some(Range { min: 0, max: 2047 }),
                None,
            ));
        }

        if let Some(class) = self.classification {
            po["classification"] = json!([{
                "object_class": class.to_json(),
                "confidence": self.classification_confidence,
            }]);
        }

        po
    }
}

#[derive(Debug, Clone)]
pub struct Cpm {
    pub source_uuid: String,
    pub timestamp_etsi_ms: i64,
    pub station_id: u32,
    pub station_type: StationType,
    pub reference_time_etsi_ms: i64,
    pub latitude_etsi: i64,
    pub longitude_etsi: i64,
    pub altitude_etsi: i64,
    pub horizontal_confidence_etsi: i64,
    pub heading_etsi: i64,
    pub perceived_objects: Vec<PerceivedObject>,
}

impl Cpm {
    pub fn new(uuid: impl Into<String>, station_type: StationType, gnss_report: &GnssReport, now: f64) -> Self {
        let uuid = uuid.into();
        Cpm {
            timestamp_etsi_ms: scale::si_to_etsi(Some(now), MILLI_SECOND, 0, None, None),
            station_id: station_id(&uuid),
            station_type,
            reference_time_etsi_ms: unix_to_etsi_ms(now),
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
            perceived_objects: Vec::new(),
            source_uuid: uuid,
        }
    }

    pub fn add_perceived_object(&mut self, object: PerceivedObject) {
        self.perceived_objects.push(object);
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

    pub fn to_json(&self) -> serde_json::Value {
        let mut message = json!({
            "protocol_version": 1,
            "station_id": self.station_id,
            "management_container": {
                "station_type": self.station_type as u8,
                "reference_time": self.reference_time_etsi_ms,
                "reference_position": {
                    "latitude": self.latitude_etsi,
                    "longitude": self.longitude_etsi,
                    "altitude": {
                        "value": self.altitude_etsi,
                        "confidence": 15,
                    },
                    "position_confidence_ellipse": {
                        "semi_major": self.horizontal_confidence_etsi,
                        "semi_minor": self.horizontal_confidence_etsi,
                        "semi_major_orientation": scale::si_to_etsi(Some(0.0), DECI_DEGREE, 3601, None, None),
                    },
                },
            },
            "perceived_object_container": self.perceived_objects.iter().map(PerceivedObject::to_json).collect::<Vec<_>>(),
        });

        match self.station_type {
            StationType::Unknown => {}
            StationType::RoadSideUnit => {
                message["originating_rsu_container"] = json!([]);
            }
            _ => {
                message["originating_vehicle_container"] = json!({
                    "orientation_angle": {
                        "value": self.heading_etsi,
                        "confidence": 127,
                    },
                });
            }
        }

        json!({
            "type": "cpm",
            "origin": "self",
            "version": SCHEMA_VERSION,
            "source_uuid": self.source_uuid,
            "timestamp": self.timestamp_etsi_ms,
            "message": message,
        })
    }

    /// Rebuild a `Cpm` from its wire JSON, for messages received off the
    /// network.
    pub fn from_json(value: &serde_json::Value) -> Option<Cpm> {
        let source_uuid = value.get("source_uuid")?.as_str()?.to_string();
        let timestamp_etsi_ms = value.get("timestamp")?.as_i64()?;
        let message = value.get("message")?;
        let station_id = message.get("station_id")?.as_u64()? as u32;
        let mc = message.get("management_container")?;
        let station_type_raw = mc.get("station_type")?.as_u64()? as u8;
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
        let position = mc.get("reference_position")?;
        let confidence = position.get("position_confidence_ellipse")?;

        Some(Cpm {
            source_uuid,
            timestamp_etsi_ms,
            station_id,
            station_type,
            reference_time_etsi_ms: mc.get("reference_time")?.as_i64()?,
            latitude_etsi: position.get("latitude")?.as_i64()?,
            longitude_etsi: position.get("longitude")?.as_i64()?,
            altitude_etsi: position.get("altitude")?.get("value")?.as_i64()?,
            horizontal_confidence_etsi: confidence.get("semi_major")?.as_i64()?,
            heading_etsi: message
                .get("originating_vehicle_container")
                .and_then(|c| c.get("orientation_angle"))
                .and_then(|o| o.get("value"))
                .and_then(|v| v.as_i64())
                .unwrap_or(3601),
            perceived_objects: Vec::new(),
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
            .track(90.0)
            .build()
            .unwrap()
    }

    #[test]
    fn perceived_objects_round_trip_through_to_json() {
        let mut cpm = Cpm::new("veh-1", StationType::PassengerCar, &report(), 1_700_000_001.0);
        let object = PerceivedObject::new(1, 0.0, 10.0, -5.0)
            .with_velocity(2.0, 0.0)
            .with_classification(ObjectClass::Vehicle(StationType::Motorcycle), 100);
        cpm.add_perceived_object(object);
        let json = cpm.to_json();
        let objects = json["message"]["perceived_object_container"].as_array().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["object_id"], 1);
        assert_eq!(objects[0]["classification"][0]["confidence"], 100);
    }

    #[test]
    fn road_side_unit_gets_rsu_container() {
        let cpm = Cpm::new("rsu-1", StationType::RoadSideUnit, &report(), 1.0);
        let json = cpm.to_json();
        assert!(json["message"]["originating_rsu_container"].is_array());
        assert!(json["message"].get("originating_vehicle_container").is_none());
    }

    #[test]
    fn basic_round_trip() {
        let cpm = Cpm::new("veh-2", StationType::PassengerCar, &report(), 1.0);
        let json = cpm.to_json();
        let back = Cpm::from_json(&json).unwrap();
        assert_eq!(back.source_uuid, "veh-2");
        assert_eq!(back.latitude(), cpm.latitude());
    }
}
