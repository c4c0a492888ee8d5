//! Core node dispatcher (business logic).
//!
//! This module is intentionally decoupled from CLI parsing, process exit
//! codes and any platform event loop: adapters translate their callbacks
//! into [`Event`]s on a channel, and the node consumes them one at a time.
//! Everything here can be tested deterministically with an injected bus,
//! radio and output streams.

use crate::adv::{AdvertisementRecord, COMPANY_ID, DEFAULT_FLAGS, Layout};
use crate::cadence::CadenceController;
use crate::command::{ConfigCommand, LineBuffer, parse_line};
use crate::reading::SensorReading;
use crate::scan::RelayFilter;
use crate::sensor::{Calibration, Dht20, SensorBus, SensorError};
use std::io::{self, Write};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel capacity for dispatcher events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 64;

/// Events delivered by the platform dispatcher, in dispatcher-defined order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Periodic poll; drives the sample/broadcast cadence.
    Tick,
    /// Rising edge of the mode button.
    ButtonEdge,
    /// One inbound byte from the configuration serial stream.
    SerialByte(u8),
    /// One received advertisement and its signal strength.
    AdvertisementReceived { data: Vec<u8>, rssi_dbm: i8 },
}

/// Radio seam: whatever owns the advertisement set.
pub trait Broadcaster {
    /// Replace the over-the-air payload.
    fn set_data(&mut self, data: &[u8]) -> Result<(), RadioError>;
    /// Reconfigure the advertising interval.
    fn set_interval(&mut self, interval_ms: u32) -> Result<(), RadioError>;
}

/// Radio adapter failure. Operational, not fatal: the node keeps sampling
/// and retries the payload refresh on the next tick.
#[derive(Error, Debug)]
#[error("radio error: {0}")]
pub struct RadioError(pub String);

/// Errors that terminate the run loop.
#[derive(Error, Debug)]
pub enum RunError {
    /// Sensor init failed; the node cannot start.
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Node identity and role configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier carried in the manufacturer block.
    pub peer_id: u32,
    /// Local name carried in the name block.
    pub name: String,
    /// Wire layout of the broadcast record.
    pub layout: Layout,
    /// Peers whose sightings are relayed; `None` for the plain node role.
    pub relay_peers: Option<Vec<u8>>,
    /// Print sensor and mode chatter to the error stream.
    pub verbose: bool,
}

/// Process-wide node state: the explicit context every handler mutates.
///
/// Exactly one logical thread drives this; the single-writer contract is
/// what makes the in-place record updates safe.
pub struct Node<B> {
    sensor: Dht20<B>,
    cadence: CadenceController,
    record: AdvertisementRecord,
    line: LineBuffer,
    relay: Option<RelayFilter>,
    verbose: bool,
}

impl<B: SensorBus> Node<B> {
    pub fn new(config: &NodeConfig, sensor: Dht20<B>) -> Self {
        let record = AdvertisementRecord::encode(
            config.layout,
            DEFAULT_FLAGS,
            COMPANY_ID,
            config.peer_id,
            &SensorReading::zeroed(),
            &config.name,
        );
        Node {
            sensor,
            cadence: CadenceController::new(),
            record,
            line: LineBuffer::new(),
            relay: config
                .relay_peers
                .as_ref()
                .map(|peers| RelayFilter::new(COMPANY_ID, peers.clone())),
            verbose: config.verbose,
        }
    }

    /// Current over-the-air payload.
    pub fn payload(&self) -> &[u8] {
        self.record.as_bytes()
    }

    pub fn cadence(&self) -> &CadenceController {
        &self.cadence
    }

    /// Probe and calibrate the sensor. An unverified calibration bit is a
    /// warning, not a startup failure.
    pub async fn init(&mut self, err: &mut dyn Write) -> Result<(), RunError> {
        if self.sensor.init().await? == Calibration::Unverified {
            writeln!(err, "warning: calibration bit unset after init command")?;
        }
        Ok(())
    }

    /// Route one dispatcher event.
    pub async fn handle_event(
        &mut self,
        event: Event,
        now: Instant,
        radio: &mut dyn Broadcaster,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), RunError> {
        match event {
            Event::Tick => self.on_tick(now, radio, out, err).await,
            Event::ButtonEdge => {
                self.cadence.on_button_edge();
                if self.verbose {
                    writeln!(
                        err,
                        "mode {} ({} ms)",
                        self.cadence.mode_index(),
                        self.cadence.period_ms()
                    )?;
                }
                Ok(())
            }
            Event::SerialByte(byte) => {
                if let Some(line) = self.line.push(byte)
                    && let Some(command) = parse_line(&line)
                {
                    self.apply_command(command, radio, err)?;
                }
                Ok(())
            }
            Event::AdvertisementReceived { data, rssi_dbm } => {
                if let Some(filter) = &self.relay
                    && let Some(sighting) = filter.sighting(&data, rssi_dbm)
                {
                    write!(out, "{}", sighting.line())?;
                }
                Ok(())
            }
        }
    }

    async fn on_tick(
        &mut self,
        now: Instant,
        radio: &mut dyn Broadcaster,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), RunError> {
        if !self.cadence.elapsed(now) {
            return Ok(());
        }
        // Marked before the read: a failed sample waits out a full period
        // instead of hammering the bus.
        self.cadence.mark_sampled(now);

        match self.sensor.read().await {
            Ok(reading) => {
                self.record.update(&reading);
                if let Err(e) = radio.set_data(self.record.as_bytes()) {
                    writeln!(err, "{e}")?;
                }
                writeln!(
                    out,
                    "Humidity: {:.2}%, Temperature: {:.2} C",
                    reading.humidity_pct, reading.temperature_c
                )?;
            }
            Err(e) => {
                if self.verbose {
                    writeln!(err, "sensor read failed: {e}")?;
                }
            }
        }
        Ok(())
    }

    fn apply_command(
        &mut self,
        command: ConfigCommand,
        radio: &mut dyn Broadcaster,
        err: &mut dyn Write,
    ) -> Result<(), RunError> {
        match command {
            ConfigCommand::SetPeriod(ms) => {
                if self.cadence.on_command(ms) && self.verbose {
                    writeln!(err, "period set to {ms} ms")?;
                }
            }
            ConfigCommand::SetAdvertisingInterval(ms) => {
                if let Err(e) = radio.set_interval(ms) {
                    writeln!(err, "{e}")?;
                }
            }
        }
        Ok(())
    }
}

/// Run the node loop until the event channel closes.
///
/// Initializes the sensor, publishes the zero-valued record (broadcasting
/// starts before the first sample), then drains events. Sensor init failure
/// is the one fatal path; everything later is reported and survived.
pub async fn run<B: SensorBus>(
    config: NodeConfig,
    sensor: Dht20<B>,
    radio: &mut dyn Broadcaster,
    events: &mut mpsc::Receiver<Event>,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let mut node = Node::new(&config, sensor);
    node.init(err).await?;

    if let Err(e) = radio.set_data(node.payload()) {
        writeln!(err, "{e}")?;
    }

    while let Some(event) = events.recv().await {
        node.handle_event(event, Instant::now(), radio, out, err)
            .await?;
    }

    Ok(())
}
