//! Serial port adapters.
//!
//! Reader threads translate the blocking serial stream into channel
//! traffic: raw bytes as dispatcher events for the node roles, accumulated
//! lines for the bridge role.

use crate::app::Event;
use crate::command::LineBuffer;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tokio::sync::mpsc;

/// Read timeout; expiry is just an idle poll, not an error.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

fn open(path: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    serialport::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .open()
}

fn pump<T, F>(mut port: Box<dyn serialport::SerialPort>, tx: mpsc::Sender<T>, mut convert: F)
where
    F: FnMut(u8) -> Option<T> + Send + 'static,
    T: Send + 'static,
{
    let mut buf = [0u8; 64];
    loop {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(item) = convert(byte)
                        && tx.blocking_send(item).is_err()
                    {
                        return; // Receiver dropped; the run loop is gone.
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(_) => break,
        }
    }
}

/// Feed raw serial bytes into the node event channel from a reader thread.
pub fn spawn_byte_reader(
    path: &str,
    baud_rate: u32,
    tx: mpsc::Sender<Event>,
) -> Result<(), serialport::Error> {
    let port = open(path, baud_rate)?;
    std::thread::spawn(move || pump(port, tx, |byte| Some(Event::SerialByte(byte))));
    Ok(())
}

/// Accumulate serial bytes into lines for the bridge loop.
pub fn spawn_line_reader(
    path: &str,
    baud_rate: u32,
    tx: mpsc::Sender<String>,
) -> Result<(), serialport::Error> {
    let port = open(path, baud_rate)?;
    let mut line = LineBuffer::new();
    std::thread::spawn(move || pump(port, tx, move |byte| line.push(byte)));
    Ok(())
}
