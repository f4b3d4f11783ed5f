//! Decentralized Environmental Notification Message (DENM) builder.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use super::scale::{self, DECI_MICRO_DEGREE, MILLI_SECOND};
use super::station::station_id;
use super::time::{unix_to_etsi_ms, etsi_ms_to_unix};
use crate::error::{CoreError, Result};
use crate::gnss::GnssReport;

pub const SCHEMA_VERSION: &str = "1.1.3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationType {
    IsCancellation = 0,
    IsNegation = 1,
}

/// Event cause, values fixed to match the ETSI DENM spec exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cause {
    Reserved = 0,
    TrafficCondition = 1,
    Accident = 2,
    Roadworks = 3,
    AdverseWeatherConditionAdhesion = 6,
    HazardousLocationSurfaceCondition = 9,
    HazardousLocationObstacleOnTheRoad = 10,
    HazardousLocationAnimalOnTheRoad = 11,
    HumanPresenceOnTheRoad = 12,
    WrongWayDriving = 14,
    RescueAndRecoveryWorkInProgress = 15,
    AdverseWeatherConditionExtremeWeatherCondition = 17,
    AdverseWeatherConditionVisibility = 18,
    AdverseWeatherConditionPrecipitation = 19,
    SlowVehicle = 26,
    DangerousEndOfQueue = 27,
    VehicleBreakdown = 91,
    PostCrash = 92,
    HumanProblem = 93,
    StationaryVehicle = 94,
    EmergencyVehicleApproaching = 95,
    HazardousLocationDangerousCurve = 96,
    CollisionRisk = 97,
    SignalViolation = 98,
    DangerousSituation = 99,
}

macro_rules! subcause_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }
    };
}

subcause_enum!(TrafficConditionSubCause {
    Unavailable = 0, IncreasedVolumeOfTraffic = 1, TrafficJamSlowlyIncreasing = 2,
    TrafficJamIncreasing = 3, TrafficJamStronglyIncreasing = 4, TrafficStationary = 5,
    TrafficJamSlightlyDecreasing = 6, TrafficJamDecreasing = 7, TrafficJamStronglyDecreasing = 8,
});
subcause_enum!(AccidentSubCause {
    Unavailable = 0, MultiVehicleAccident = 1, HeavyAccident = 2, AccidentInvolvingLorry = 3,
    AccidentInvolvingBus = 4, AccidentInvolvingHazardousMaterials = 5, AccidentOnOppositeLane = 6,
    UnsecuredAccident = 7, AssistanceRequested = 8,
});
subcause_enum!(RoadworksSubCause {
    Unavailable = 0, MajorRoadworks = 1, RoadMarkingWork = 2, SlowMovingRoadMaintenance = 3,
    ShortTermStationaryRoadworks = 4, StreetCleaning = 5, WinterService = 6,
});
subcause_enum!(HumanPresenceOnTheRoadSubCause {
    Unavailable = 0, ChildrenOnRoadway = 1, CyclistOnRoadway = 2, MotorcyclistOnRoadway = 3,
});
subcause_enum!(WrongWayDrivingSubCause {
    Unavailable = 0, WrongLane = 1, WrongDirection = 2,
});
subcause_enum!(AdverseWeatherConditionExtremeWeatherConditionSubCause {
    Unavailable = 0, StrongWinds = 1, DamagingHail = 2, Hurricane = 3, Thunderstorm = 4,
    Tornado = 5, Blizzard = 6,
});
subcause_enum!(AdverseWeatherConditionAdhesionSubCause {
    Unavailable = 0, HeavyFrostOnRoad = 1, FuelOnRoad = 2, MudOnRoad = 3, SnowOnRoad = 4,
    IceOnRoad = 5, BlackIceOnRoad = 6, OilOnRoad = 7, LooseChippings = 8, InstantBlackIce = 9,
    RoadsSalted = 10,
});
subcause_enum!(AdverseWeatherConditionVisibilitySubCause {
    Unavailable = 0, Fog = 1, Smoke = 2, HeavySnowfall = 3, HeavyRain = 4, HeavyHail = 5,
    LowSunGlare = 6, Sandstorms = 7, SwarmsOfInsects = 8,
});
subcause_enum!(AdverseWeatherConditionPrecipitationSubCause {
    Unavailable = 0, HeavyRain = 1, HeavySnowfall = 2, SoftHail = 3,
});
subcause_enum!(SlowVehicleSubCause {
    Unavailable = 0, MaintenanceVehicle = 1, VehiclesSlowingToLookAtAccident = 2,
    AbnormalLoad = 3, AbnormalWideLoad = 4, Convoy = 5, Snowplough = 6, Deicing = 7,
    SaltingVehicles = 8,
});
subcause_enum!(StationaryVehicleSubCause {
    Unavailable = 0, HumanProblem = 1, VehicleBreakdown = 2, PostCrash = 3,
    PublicTransportStop = 4, CarryingDangerousGoods = 5,
});
subcause_enum!(HumanProblemSubCause {
    Unavailable = 0, GlycemiaProblem = 1, HeartProblem = 2,
});
subcause_enum!(EmergencyVehicleApproachingSubCause {
    Unavailable = 0, EmergencyVehicleApproaching = 1, PrioritizedVehicleApproaching = 2,
});
subcause_enum!(HazardousLocationDangerousCurveSubCause {
    Unavailable = 0, DangerousLeftTurnCurve = 1, DangerousRightTurnCurve = 2,
    MultipleCurvesStartingWithUnknownTurningDirection = 3, MultipleCurvesStartingWithLeftTurn = 4,
    MultipleCurvesStartingWithRightTurn = 5,
});
subcause_enum!(HazardousLocationSurfaceConditionSubCause {
    Unavailable = 0, Rockfalls = 1, EarthquakeDamage = 2, SewerCollapse = 3, Subsidence = 4,
    SnowDrifts = 5, StormDamage = 6, BurstPipe = 7, VolcanoEruption = 8, FallingIce = 9,
});
subcause_enum!(HazardousLocationObstacleOnTheRoadSubCause {
    Unavailable = 0, ShedLoad = 1, PartsOfVehicles = 2, PartsOfTyres = 3, BigObjects = 4,
    FallenTrees = 5, HubCaps = 6, WaitingVehicles = 7,
});
subcause_enum!(HazardousLocationAnimalOnTheRoadSubCause {
    Unavailable = 0, WildAnimals = 1, HerdOfAnimals = 2, SmallAnimals = 3, LargeAnimals = 4,
});
subcause_enum!(CollisionRiskSubCause {
    Unavailable = 0, LongitudinalCollisionRisk = 1, CrossingCollisionRisk = 2,
    LateralCollisionRisk = 3, VulnerableRoadUser = 4,
});
subcause_enum!(SignalViolationSubCause {
    Unavailable = 0, StopSignViolation = 1, TrafficLightViolation = 2,
    TurningRegulationViolation = 3,
});
subcause_enum!(RescueAndRecoveryWorkInProgressSubCause {
    Unavailable = 0, EmergencyVehicles = 1, RescueHelicopterLanding = 2,
    PoliceActivityOngoing = 3, MedicalEmergencyOngoing = 4, ChildAbductionInProgress = 5,
});
subcause_enum!(DangerousEndOfQueueSubCause {
    Unavailable = 0, SuddenEndOfQueue = 1, QueueOverHill = 2, QueueAroundBend = 3,
    QueueInTunnel = 4,
});
subcause_enum!(DangerousSituationSubCause {
    Unavailable = 0, EmergencyElectronicBrakeEngaged = 1, PreCrashSystemEngaged = 2,
    EspEngaged = 3, AbsEngaged = 4, AebEngaged = 5, BrakeWarningEngaged = 6,
    CollisionRiskWarningEngaged = 7,
});
subcause_enum!(VehicleBreakdownSubCause {
    Unavailable = 0, LackOfFuel = 1, LackOfBatteryPower = 2, EngineProblem = 3,
    TransmissionProblem = 4, EngineCoolingProblem = 5, BrakingSystemProblem = 6,
    SteeringProblem = 7, TyrePuncture = 8,
});
subcause_enum!(PostCrashSubCause {
    Unavailable = 0, AccidentWithoutECallTriggered = 1, AccidentWithECallManuallyTriggered = 2,
    AccidentWithECallAutomaticallyTriggered = 3,
    AccidentWithECallTriggeredWithoutAccessToCellularNetwork = 4,
});

/// A subcause, tagged by the cause family it belongs to. Setting a
/// subcause whose family doesn't match the current cause fails at
/// construction (see `Denm::with_subcause`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCause {
    TrafficCondition(TrafficConditionSubCause),
    Accident(AccidentSubCause),
    Roadworks(RoadworksSubCause),
    HumanPresenceOnTheRoad(HumanPresenceOnTheRoadSubCause),
    WrongWayDriving(WrongWayDrivingSubCause),
    AdverseWeatherConditionExtremeWeatherCondition(AdverseWeatherConditionExtremeWeatherConditionSubCause),
    AdverseWeatherConditionAdhesion(AdverseWeatherConditionAdhesionSubCause),
    AdverseWeatherConditionVisibility(AdverseWeatherConditionVisibilitySubCause),
    AdverseWeatherConditionPrecipitation(AdverseWeatherConditionPrecipitationSubCause),
    SlowVehicle(SlowVehicleSubCause),
    StationaryVehicle(StationaryVehicleSubCause),
    HumanProblem(HumanProblemSubCause),
    EmergencyVehicleApproaching(EmergencyVehicleApproachingSubCause),
    HazardousLocationDangerousCurve(HazardousLocationDangerousCurveSubCause),
    HazardousLocationSurfaceCondition(HazardousLocationSurfaceConditionSubCause),
    HazardousLocationObstacleOnTheRoad(HazardousLocationObstacleOnTheRoadSubCause),
    HazardousLocationAnimalOnTheRoad(HazardousLocationAnimalOnTheRoadSubCause),
    CollisionRisk(CollisionRiskSubCause),
    SignalViolation(SignalViolationSubCause),
    RescueAndRecoveryWorkInProgress(RescueAndRecoveryWorkInProgressSubCause),
    DangerousEndOfQueue(DangerousEndOfQueueSubCause),
    DangerousSituation(DangerousSituationSubCause),
    VehicleBreakdown(VehicleBreakdownSubCause),
    PostCrash(PostCrashSubCause),
}

impl SubCause {
    fn cause(&self) -> Cause {
        match self {
            SubCause::TrafficCondition(_) => Cause::TrafficCondition,
            SubCause::Accident(_) => Cause::Accident,
            SubCause::Roadworks(_) => Cause::Roadworks,
            SubCause::HumanPresenceOnTheRoad(_) => Cause::HumanPresenceOnTheRoad,
            SubCause::WrongWayDriving(_) => Cause::WrongWayDriving,
            SubCause::AdverseWeatherConditionExtremeWeatherCondition(_) => {
                Cause::AdverseWeatherConditionExtremeWeatherCondition
            }
            SubCause::AdverseWeatherConditionAdhesion(_) => Cause::AdverseWeatherConditionAdhesion,
            SubCause::AdverseWeatherConditionVisibility(_) => Cause::AdverseWeatherConditionVisibility,
            SubCause::AdverseWeatherConditionPrecipitation(_) => {
                Cause::AdverseWeatherConditionPrecipitation
            }
            SubCause::SlowVehicle(_) => Cause::SlowVehicle,
            SubCause::StationaryVehicle(_) => Cause::StationaryVehicle,
            SubCause::HumanProblem(_) => Cause::HumanProblem,
            SubCause::EmergencyVehicleApproaching(_) => Cause::EmergencyVehicleApproaching,
            SubCause::HazardousLocationDangerousCurve(_) => Cause::HazardousLocationDangerousCurve,
            SubCause::HazardousLocationSurfaceCondition(_) => Cause::HazardousLocationSurfaceCondition,
            SubCause::HazardousLocationObstacleOnTheRoad(_) => {
                Cause::HazardousLocationObstacleOnTheRoad
            }
            SubCause::HazardousLocationAnimalOnTheRoad(_) => Cause::HazardousLocationAnimalOnTheRoad,
            SubCause::CollisionRisk(_) => Cause::CollisionRisk,
            SubCause::SignalViolation(_) => Cause::SignalViolation,
            SubCause::RescueAndRecoveryWorkInProgress(_) => Cause::RescueAndRecoveryWorkInProgress,
            SubCause::DangerousEndOfQueue(_) => Cause::DangerousEndOfQueue,
            SubCause::DangerousSituation(_) => Cause::DangerousSituation,
            SubCause::VehicleBreakdown(_) => Cause::VehicleBreakdown,
            SubCause::PostCrash(_) => Cause::PostCrash,
        }
    }

    fn value(&self) -> u8 {
        match self {
            SubCause::TrafficCondition(v) => *v as u8,
            SubCause::Accident(v) => *v as u8,
            SubCause::Roadworks(v) => *v as u8,
            SubCause::HumanPresenceOnTheRoad(v) => *v as u8,
            SubCause::WrongWayDriving(v) => *v as u8,
            SubCause::AdverseWeatherConditionExtremeWeatherCondition(v) => *v as u8,
            SubCause::AdverseWeatherConditionAdhesion(v) => *v as u8,
            SubCause::AdverseWeatherConditionVisibility(v) => *v as u8,
            SubCause::AdverseWeatherConditionPrecipitation(v) => *v as u8,
            SubCause::SlowVehicle(v) => *v as u8,
            SubCause::StationaryVehicle(v) => *v as u8,
            SubCause::HumanProblem(v) => *v as u8,
            SubCause::EmergencyVehicleApproaching(v) => *v as u8,
            SubCause::HazardousLocationDangerousCurve(v) => *v as u8,
            SubCause::HazardousLocationSurfaceCondition(v) => *v as u8,
            SubCause::HazardousLocationObstacleOnTheRoad(v) => *v as u8,
            SubCause::HazardousLocationAnimalOnTheRoad(v) => *v as u8,
            SubCause::CollisionRisk(v) => *v as u8,
            SubCause::SignalViolation(v) => *v as u8,
            SubCause::RescueAndRecoveryWorkInProgress(v) => *v as u8,
            SubCause::DangerousEndOfQueue(v) => *v as u8,
            SubCause::DangerousSituation(v) => *v as u8,
            SubCause::VehicleBreakdown(v) => *v as u8,
            SubCause::PostCrash(v) => *v as u8,
        }
    }
}

static SEQ_NUMS: Lazy<Mutex<HashMap<String, u16>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn next_seq_num(uuid: &str) -> u16 {
    let mut map = SEQ_NUMS.lock();
    let entry = map.entry(uuid.to_string()).or_insert(u16::MAX);
    *entry = entry.wrapping_add(1);
    *entry
}

#[derive(Debug, Clone, Serialize)]
pub struct Denm {
    pub source_uuid: String,
    pub timestamp_etsi_ms: i64,
    pub station_id: u32,
    pub sequence_number: u16,
    pub detection_time_etsi_ms: i64,
    pub reference_time_etsi_ms: i64,
    pub latitude_etsi: i64,
    pub longitude_etsi: i64,
    pub altitude_etsi: i64,
    #[serde(skip)]
    pub cause: Cause,
    #[serde(skip)]
    pub subcause: Option<SubCause>,
    #[serde(skip)]
    pub termination: Option<TerminationType>,
    pub validity_duration: Option<f64>,
}

pub struct DenmBuilder {
    uuid: String,
    gnss_report: GnssReport,
    detection_time: Option<f64>,
    cause: Cause,
    subcause: Option<SubCause>,
    validity_duration: Option<f64>,
    termination: Option<TerminationType>,
    sequence_number: Option<u16>,
    now: f64,
}

impl Denm {
    pub fn builder(uuid: impl Into<String>, gnss_report: GnssReport, now: f64) -> DenmBuilder {
        DenmBuilder {
            uuid: uuid.into(),
            gnss_report,
            detection_time: None,
            cause: Cause::DangerousSituation,
            subcause: None,
            validity_duration: None,
            termination: None,
            sequence_number: None,
            now,
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        scale::etsi_to_si(self.latitude_etsi, DECI_MICRO_DEGREE, 900_000_001, None)
    }

    pub fn longitude(&self) -> Option<f64> {
        scale::etsi_to_si(self.longitude_etsi, DECI_MICRO_DEGREE, 1_800_000_001, None)
    }

    pub fn detection_time(&self) -> f64 {
        etsi_ms_to_unix(self.detection_time_etsi_ms)
    }

    pub fn reference_time(&self) -> f64 {
        etsi_ms_to_unix(self.reference_time_etsi_ms)
    }

    /// Set a subcause, failing if it does not belong to the current cause's
    /// family (spec.md §4.2 "Sub-cause dispatch").
    pub fn with_subcause(mut self, subcause: SubCause) -> Result<Self> {
        if subcause.cause() != self.cause {
            return Err(CoreError::SubCauseMismatch {
                cause: format!("{:?}", self.cause),
                subcause: format!("{:?}", subcause),
            });
        }
        self.subcause = Some(subcause);
        Ok(self)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut message = json!({
            "protocol_version": 1,
            "station_id": self.station_id,
            "management_container": {
                "action_id": {
                    "originating_station_id": self.station_id,
                    "sequence_number": self.sequence_number,
                },
                "detection_time": self.detection_time_etsi_ms,
                "reference_time": self.reference_time_etsi_ms,
                "event_position": {
                    "latitude": self.latitude_etsi,
                    "longitude": self.longitude_etsi,
                    "altitude": self.altitude_etsi,
                },
            },
            "situation_container": {
                "event_type": {
                    "cause": self.cause as u8,
                },
            },
        });
        if let Some(termination) = self.termination {
            message["management_container"]["termination"] = json!(termination as u8);
        }
        if let Some(validity_duration) = self.validity_duration {
            message["management_container"]["validity_duration"] = json!(validity_duration);
        }
        if let Some(subcause) = self.subcause {
            message["situation_container"]["event_type"]["subcause"] = json!(subcause.value());
        }

        json!({
            "type": "denm",
            "origin": "self",
            "version": SCHEMA_VERSION,
            "source_uuid": self.source_uuid,
            "timestamp": self.timestamp_etsi_ms,
            "message": message,
        })
    }
}

impl DenmBuilder {
    pub fn detection_time(mut self, t: f64) -> Self {
        self.detection_time = Some(t);
        self
    }
    pub fn cause(mut self, cause: Cause) -> Self {
        self.cause = cause;
        self
    }
    pub fn subcause(mut self, subcause: SubCause) -> Self {
        self.subcause = Some(subcause);
        self
    }
    pub fn validity_duration(mut self, d: f64) -> Self {
        self.validity_duration = Some(d);
        self
    }
    pub fn termination(mut self, t: TerminationType) -> Self {
        self.termination = Some(t);
        self
    }
    pub fn sequence_number(mut self, n: u16) -> Self {
        self.sequence_number = Some(n);
        self
    }

    pub fn build(self) -> Result<Denm> {
        if let Some(subcause) = self.subcause {
            if subcause.cause() != self.cause {
                return Err(CoreError::SubCauseMismatch {
                    cause: format!("{:?}", self.cause),
                    subcause: format!("{:?}", subcause),
                });
            }
        }
        let detection_time = self.detection_time.unwrap_or(self.now);
        let sequence_number = self.sequence_number.unwrap_or_else(|| next_seq_num(&self.uuid));
        let sid = station_id(&self.uuid);

        Ok(Denm {
            timestamp_etsi_ms: scale::si_to_etsi(Some(self.now), MILLI_SECOND, 0, None, None),
            station_id: sid,
            sequence_number,
            detection_time_etsi_ms: unix_to_etsi_ms(detection_time),
            reference_time_etsi_ms: unix_to_etsi_ms(self.now),
            latitude_etsi: scale::si_to_etsi(self.gnss_report.latitude, DECI_MICRO_DEGREE, 900_000_001, None, None),
            longitude_etsi: scale::si_to_etsi(self.gnss_report.longitude, DECI_MICRO_DEGREE, 1_800_000_001, None, None),
            altitude_etsi: scale::si_to_etsi(self.gnss_report.altitude, scale::CENTI_METER, 800_001, None, None),
            cause: self.cause,
            subcause: self.subcause,
            termination: self.termination,
            validity_duration: self.validity_duration,
            source_uuid: self.uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> GnssReport {
        GnssReport::new(0.0).latitude(43.635).longitude(-1.375).build().unwrap()
    }

    #[test]
    fn sequence_numbers_for_one_uuid_are_contiguous_mod_65536() {
        let uuid = "denm-seq-test";
        let a = Denm::builder(uuid, report(), 1.0).build().unwrap();
        let b = Denm::builder(uuid, report(), 2.0).build().unwrap();
        let c = Denm::builder(uuid, report(), 3.0).build().unwrap();
        assert_eq!(b.sequence_number, a.sequence_number.wrapping_add(1));
        assert_eq!(c.sequence_number, b.sequence_number.wrapping_add(1));
    }

    #[test]
    fn mismatched_subcause_is_rejected() {
        let denm = Denm::builder("u", report(), 1.0)
            .cause(Cause::Accident)
            .subcause(SubCause::TrafficCondition(TrafficConditionSubCause::TrafficStationary))
            .build();
        assert!(denm.is_err());
    }

    #[test]
    fn matching_subcause_is_accepted() {
        let denm = Denm::builder("u", report(), 1.0)
            .cause(Cause::Accident)
            .subcause(SubCause::Accident(AccidentSubCause::HeavyAccident))
            .build()
            .unwrap();
        assert_eq!(denm.subcause, Some(SubCause::Accident(AccidentSubCause::HeavyAccident)));
    }

    #[test]
    fn continuation_preserves_sequence_number() {
        let denm = Denm::builder("u2", report(), 1.0)
            .termination(TerminationType::IsCancellation)
            .sequence_number(42)
            .build()
            .unwrap();
        assert_eq!(denm.sequence_number, 42);
    }
}
