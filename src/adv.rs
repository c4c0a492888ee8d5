//! Custom advertisement record codec.
//!
//! Builds the proprietary broadcast payload: a flags block, a manufacturer
//! block carrying company id, peer id and fixed-point sensor values, and a
//! local-name block. Two field orderings shipped on different device
//! revisions; the difference is captured by a [`Layout`] descriptor chosen at
//! construction instead of two near-identical packed structs.

use crate::reading::SensorReading;

/// AD type: flags.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: complete local name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: manufacturer-specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable Mode, BR/EDR not supported.
pub const DEFAULT_FLAGS: u8 = 0x06;

/// Company identifier carried in every packet of this protocol.
pub const COMPANY_ID: u16 = 0x02FF;

/// Manufacturer payload length: type + company(2) + peer id(4) + temp(2) + hum(2).
const MANUF_LEN: u8 = 11;

// Byte offsets of the fixed-size prefix; the name block floats after it.
const OFF_MANUF_LEN: usize = 3;
const OFF_COMPANY: usize = 5;
const OFF_PEER_ID: usize = 7;
const OFF_TEMP: usize = 11;
const OFF_HUM: usize = 13;
const OFF_NAME_LEN: usize = 15;
const OFF_NAME_TYPE: usize = 16;
const OFF_NAME: usize = 17;

/// Largest over-the-air image: the fixed prefix plus a layout A name.
pub const MAX_RECORD_SIZE: usize = OFF_NAME + 14;

/// Peer identifier byte order inside the manufacturer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdByteOrder {
    MsbFirst,
    LsbFirst,
}

/// Wire layout descriptor for one device revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub id_order: IdByteOrder,
    /// Name bytes kept before silent truncation.
    pub name_max: usize,
}

/// Layout A: peer id most-significant byte first, 14-byte name capacity.
pub const LAYOUT_A: Layout = Layout {
    id_order: IdByteOrder::MsbFirst,
    name_max: 14,
};

/// Layout B: peer id least-significant byte first, 10-byte name capacity.
pub const LAYOUT_B: Layout = Layout {
    id_order: IdByteOrder::LsbFirst,
    name_max: 10,
};

/// The broadcast payload, encoded once and refreshed in place on every
/// sample via [`AdvertisementRecord::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementRecord {
    buf: [u8; MAX_RECORD_SIZE],
    size: u8,
}

impl AdvertisementRecord {
    /// Encode a full record.
    ///
    /// Names longer than the layout maximum are truncated without error.
    pub fn encode(
        layout: Layout,
        flags: u8,
        company_id: u16,
        peer_id: u32,
        reading: &SensorReading,
        name: &str,
    ) -> Self {
        let mut buf = [0u8; MAX_RECORD_SIZE];

        buf[0] = 0x02;
        buf[1] = AD_TYPE_FLAGS;
        buf[2] = flags;

        buf[OFF_MANUF_LEN] = MANUF_LEN;
        buf[OFF_MANUF_LEN + 1] = AD_TYPE_MANUFACTURER_DATA;
        buf[OFF_COMPANY..OFF_COMPANY + 2].copy_from_slice(&company_id.to_le_bytes());

        let id = match layout.id_order {
            IdByteOrder::MsbFirst => peer_id.to_be_bytes(),
            IdByteOrder::LsbFirst => peer_id.to_le_bytes(),
        };
        buf[OFF_PEER_ID..OFF_PEER_ID + 4].copy_from_slice(&id);

        let name = &name.as_bytes()[..name.len().min(layout.name_max)];
        buf[OFF_NAME_LEN] = 1 + name.len() as u8;
        buf[OFF_NAME_TYPE] = AD_TYPE_COMPLETE_LOCAL_NAME;
        buf[OFF_NAME..OFF_NAME + name.len()].copy_from_slice(name);

        // Over-the-air length: flags block plus each block's length prefix
        // and payload. Computed, not a constant; the radio call uses it.
        let size = 3 + (1 + MANUF_LEN) + (1 + buf[OFF_NAME_LEN]);

        let mut record = AdvertisementRecord { buf, size };
        record.update(reading);
        record
    }

    /// Refresh the fixed-point sensor fields in place. The cheap per-tick
    /// path; everything outside the two value fields is untouched.
    pub fn update(&mut self, reading: &SensorReading) {
        self.buf[OFF_TEMP..OFF_TEMP + 2]
            .copy_from_slice(&to_fixed(reading.temperature_c).to_le_bytes());
        self.buf[OFF_HUM..OFF_HUM + 2]
            .copy_from_slice(&to_fixed(reading.humidity_pct).to_le_bytes());
    }

    /// The over-the-air image, exactly [`total_size`](Self::total_size) bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.size)]
    }

    pub fn total_size(&self) -> u8 {
        self.size
    }
}

/// Fixed-point conversion: hundredths, truncated toward zero. Lossy below
/// 0.01 units.
fn to_fixed(value: f32) -> i16 {
    (value * 100.0) as i16
}
