use crate::sensor::SensorBus;
use std::collections::VecDeque;
use std::io;

/// Scripted sensor bus: queued read responses, recorded writes.
#[derive(Debug, Default)]
pub struct FakeBus {
    reads: VecDeque<io::Result<Vec<u8>>>,
    pub writes: Vec<Vec<u8>>,
}

impl FakeBus {
    pub fn new() -> Self {
        FakeBus::default()
    }

    /// Queue bytes for the next read; short responses fill the buffer prefix.
    pub fn queue_read(&mut self, bytes: Vec<u8>) {
        self.reads.push_back(Ok(bytes));
    }

    pub fn queue_read_error(&mut self, kind: io::ErrorKind) {
        self.reads.push_back(Err(io::Error::from(kind)));
    }
}

impl SensorBus for FakeBus {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writes.push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        }
    }
}

/// Build the 7-byte measurement frame for the given 20-bit codes.
///
/// Byte 0 is a status byte with the busy bit clear and CAL set; byte 6
/// stands in for the checksum, which the driver does not verify.
pub fn measurement_frame(temp_code: u32, hum_code: u32) -> Vec<u8> {
    vec![
        0x1C,
        (hum_code >> 12) as u8,
        (hum_code >> 4) as u8,
        (((hum_code & 0xF) << 4) | ((temp_code >> 16) & 0xF)) as u8,
        (temp_code >> 8) as u8,
        temp_code as u8,
        0x00,
    ]
}
