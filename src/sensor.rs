//! DHT20 sensor protocol driver.
//!
//! Drives the two-wire measurement transaction (trigger, settle wait, read,
//! busy check) over an injected [`SensorBus`] and decodes the raw 20-bit
//! codes into a [`SensorReading`]. The bus itself is a thin transaction
//! primitive so the driver can be tested without hardware.

use crate::reading::SensorReading;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Seven-bit bus address of the DHT20.
pub const SENSOR_ADDR: u8 = 0x38;

/// Measurement trigger command.
const TRIGGER_CMD: [u8; 3] = [0xAC, 0x33, 0x00];

/// Calibration init command, sent once when the CAL bit is unset after reset.
const CALIBRATE_CMD: [u8; 3] = [0xBE, 0x08, 0x00];

/// Soft reset command.
const SOFT_RESET_CMD: u8 = 0xBA;

/// Status byte bit 7: measurement still in progress.
const STATUS_BUSY: u8 = 0x80;

/// Status byte bit 3: calibration enabled.
const STATUS_CALIBRATED: u8 = 0x08;

/// Measurement settle time. The datasheet guarantees completion within 80 ms;
/// this is the only point where the driver suspends the dispatcher.
const SETTLE_DELAY: Duration = Duration::from_millis(80);

const RESET_DELAY: Duration = Duration::from_millis(20);
const POWER_ON_DELAY: Duration = Duration::from_millis(100);
const CALIBRATE_DELAY: Duration = Duration::from_millis(10);

/// Two-wire transaction primitive the driver runs on.
///
/// One addressed write or read per call; the driver never holds a
/// transaction open across calls.
pub trait SensorBus: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Errors returned by the sensor driver.
#[derive(Error, Debug)]
pub enum SensorError {
    /// Nothing answered the presence probe at init.
    #[error("sensor not present on bus")]
    NotFound,
    /// A bus transfer failed. Retryable by re-issuing the whole operation.
    #[error("bus transfer failed: {0}")]
    Transport(#[from] io::Error),
    /// Busy bit still set after the settle delay. Re-poll after a delay.
    #[error("measurement not ready")]
    NotReady,
}

/// Outcome of the calibration check performed at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    /// CAL bit set (either already, or after the init command).
    Verified,
    /// CAL bit still unset after the init command. Non-fatal; readings may
    /// be off until the sensor is power cycled.
    Unverified,
}

/// DHT20 driver over an injected bus.
#[derive(Debug)]
pub struct Dht20<B> {
    bus: B,
}

impl<B: SensorBus> Dht20<B> {
    pub fn new(bus: B) -> Self {
        Dht20 { bus }
    }

    /// Probe, soft-reset, and verify calibration.
    ///
    /// An unanswered probe fails with [`SensorError::NotFound`]; transfer
    /// failures on the later phases fail with [`SensorError::Transport`].
    /// An unset calibration bit is reported as [`Calibration::Unverified`],
    /// never as an init failure.
    pub async fn init(&mut self) -> Result<Calibration, SensorError> {
        let mut status = [0u8; 1];

        // Presence probe: any answered read will do.
        if self.bus.read(&mut status).is_err() {
            return Err(SensorError::NotFound);
        }

        self.bus.write(&[SOFT_RESET_CMD])?;
        sleep(RESET_DELAY).await;
        sleep(POWER_ON_DELAY).await;

        self.bus.read(&mut status)?;
        if status[0] & STATUS_CALIBRATED == 0 {
            self.bus.write(&CALIBRATE_CMD)?;
            sleep(CALIBRATE_DELAY).await;
            self.bus.read(&mut status)?;
            if status[0] & STATUS_CALIBRATED == 0 {
                return Ok(Calibration::Unverified);
            }
        }

        Ok(Calibration::Verified)
    }

    /// Trigger one measurement and read it back.
    ///
    /// Each call re-sends the trigger command; the sensor's measurement
    /// state only resets on a new trigger, so retrying after an error means
    /// calling `read` again rather than re-polling the data registers.
    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        self.bus.write(&TRIGGER_CMD)?;
        sleep(SETTLE_DELAY).await;

        let mut buf = [0u8; 7];
        self.bus.read(&mut buf)?;

        if buf[0] & STATUS_BUSY != 0 {
            return Err(SensorError::NotReady);
        }

        Ok(SensorReading::from_raw(
            temperature_code(&buf),
            humidity_code(&buf),
        ))
    }
}

/// Humidity code: top 20 bits of bytes 1-3.
fn humidity_code(buf: &[u8; 7]) -> u32 {
    (u32::from(buf[1]) << 12) | (u32::from(buf[2]) << 4) | (u32::from(buf[3]) >> 4)
}

/// Temperature code: low nibble of byte 3 followed by bytes 4-5.
fn temperature_code(buf: &[u8; 7]) -> u32 {
    ((u32::from(buf[3]) & 0x0F) << 16) | (u32::from(buf[4]) << 8) | u32::from(buf[5])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeBus, measurement_frame};

    #[tokio::test]
    async fn test_read_decodes_codes() {
        // Half-scale codes land on 50 % RH and 50 C.
        let mut bus = FakeBus::new();
        bus.queue_read(measurement_frame(0x8_0000, 0x8_0000));
        let mut sensor = Dht20::new(bus);

        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.raw_hum_code, 0x8_0000);
        assert_eq!(reading.raw_temp_code, 0x8_0000);
        assert!((reading.humidity_pct - 50.0).abs() < 0.01);
        assert!((reading.temperature_c - 50.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_read_sends_trigger_each_call() {
        let mut bus = FakeBus::new();
        bus.queue_read(measurement_frame(0, 0));
        bus.queue_read(measurement_frame(0, 0));
        let mut sensor = Dht20::new(bus);

        sensor.read().await.unwrap();
        sensor.read().await.unwrap();

        assert_eq!(sensor.bus.writes, vec![TRIGGER_CMD.to_vec(), TRIGGER_CMD.to_vec()]);
    }

    #[tokio::test]
    async fn test_read_busy_bit_is_not_ready() {
        let mut frame = measurement_frame(0, 0);
        frame[0] |= STATUS_BUSY;
        let mut bus = FakeBus::new();
        bus.queue_read(frame);
        let mut sensor = Dht20::new(bus);

        assert!(matches!(sensor.read().await, Err(SensorError::NotReady)));
    }

    #[tokio::test]
    async fn test_read_transfer_failure_is_transport() {
        let mut bus = FakeBus::new();
        bus.queue_read_error(io::ErrorKind::TimedOut);
        let mut sensor = Dht20::new(bus);

        assert!(matches!(sensor.read().await, Err(SensorError::Transport(_))));
    }

    #[tokio::test]
    async fn test_init_absent_sensor_is_not_found() {
        let mut bus = FakeBus::new();
        bus.queue_read_error(io::ErrorKind::TimedOut);
        let mut sensor = Dht20::new(bus);

        assert!(matches!(sensor.init().await, Err(SensorError::NotFound)));
    }

    #[tokio::test]
    async fn test_init_calibrated_sensor_skips_command() {
        let mut bus = FakeBus::new();
        bus.queue_read(vec![0x18]); // probe
        bus.queue_read(vec![0x18]); // status after reset, CAL set
        let mut sensor = Dht20::new(bus);

        assert_eq!(sensor.init().await.unwrap(), Calibration::Verified);
        // Only the soft reset was written.
        assert_eq!(sensor.bus.writes, vec![vec![SOFT_RESET_CMD]]);
    }

    #[tokio::test]
    async fn test_init_issues_calibration_command_when_unset() {
        let mut bus = FakeBus::new();
        bus.queue_read(vec![0x10]); // probe
        bus.queue_read(vec![0x10]); // CAL unset
        bus.queue_read(vec![0x18]); // CAL set after command
        let mut sensor = Dht20::new(bus);

        assert_eq!(sensor.init().await.unwrap(), Calibration::Verified);
        assert_eq!(
            sensor.bus.writes,
            vec![vec![SOFT_RESET_CMD], CALIBRATE_CMD.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_init_unverified_calibration_is_not_fatal() {
        let mut bus = FakeBus::new();
        bus.queue_read(vec![0x10]);
        bus.queue_read(vec![0x10]);
        bus.queue_read(vec![0x10]); // still unset after command
        let mut sensor = Dht20::new(bus);

        assert_eq!(sensor.init().await.unwrap(), Calibration::Unverified);
    }

    #[test]
    fn test_code_extraction_bit_layout() {
        // Humidity spans bytes 1-3 high-to-low, temperature takes the low
        // nibble of byte 3 and bytes 4-5.
        let buf = [0x1C, 0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x00];
        assert_eq!(humidity_code(&buf), 0xAB_CDE);
        assert_eq!(temperature_code(&buf), 0xF_1234);
    }
}
