//! Shared building blocks for the ITS V2X messaging fabric: quadkey tile
//! addressing, the ETSI CAM/DENM/CPM codec, GNSS fix handling, the
//! geo-subscription engine, the MQTT client adapter, the filter engine, and
//! the telemetry span model.

pub mod bootstrap;
pub mod error;
pub mod etsi;
pub mod filter;
pub mod gnss;
pub mod gnss_client;
pub mod mqtt;
pub mod quadkey;
pub mod roi;
pub mod telemetry;

pub use error::{CoreError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
