//! `dht20-node` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, adapter wiring
//! and process exit codes. The core "business logic" lives in [`crate::app`]
//! (node and gateway roles) and [`crate::bridge`] (serial-to-HTTP bridge)
//! where it can be tested deterministically with an injected sensor bus,
//! radio and output streams.

pub mod adv;
pub mod app;
pub mod bridge;
pub mod cadence;
pub mod command;
pub mod hw;
pub mod reading;
pub mod scan;
pub mod sensor;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use adv::{AdvertisementRecord, COMPANY_ID, DEFAULT_FLAGS, LAYOUT_A, LAYOUT_B, Layout};
pub use app::{Broadcaster, Event, Node, NodeConfig, RadioError, RunError, run};
pub use bridge::{
    HttpUploader, RateLimiter, UploadError, UploadRecord, Uploader, parse_period,
    parse_sensor_line, run_bridge,
};
pub use cadence::CadenceController;
pub use command::{ConfigCommand, LineBuffer, parse_line};
pub use reading::SensorReading;
pub use scan::{PeerScanDecoder, PeerSighting, RelayFilter};
pub use sensor::{Calibration, Dht20, SensorBus, SensorError};
