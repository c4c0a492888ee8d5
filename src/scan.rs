//! Passive peer-advertisement scanning.
//!
//! The gateway role listens to raw over-the-air payloads, finds this
//! protocol's manufacturer-data signature, and reduces each hit to a
//! [`PeerSighting`] (identifier + signal strength). An accept-set filter
//! gates which sightings are relayed.

use crate::adv::AD_TYPE_MANUFACTURER_DATA;

/// One decoded relay observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSighting {
    /// Single-byte peer identifier, 1-255.
    pub peer_id: u8,
    /// Received signal strength in dBm.
    pub rssi_dbm: i8,
}

impl PeerSighting {
    /// Relay line record: `"<peer_id> <rssi>\r\n"`.
    pub fn line(&self) -> String {
        format!("{} {}\r\n", self.peer_id, self.rssi_dbm)
    }
}

/// Finds this protocol's manufacturer-data signature in raw payloads.
#[derive(Debug, Clone)]
pub struct PeerScanDecoder {
    signature: [u8; 3],
}

impl PeerScanDecoder {
    pub fn new(company_id: u16) -> Self {
        let [lo, hi] = company_id.to_le_bytes();
        PeerScanDecoder {
            signature: [AD_TYPE_MANUFACTURER_DATA, lo, hi],
        }
    }

    /// Scan a raw advertisement payload for the signature.
    ///
    /// The byte after the first match is the peer identifier; only the first
    /// match is considered, and a zero byte there is treated as no match
    /// (peer ids are 1-255). The signature may in principle also occur
    /// inside a name block; callers rely on the accept-set filter to bound
    /// such false positives.
    pub fn scan(&self, data: &[u8], rssi_dbm: i8) -> Option<PeerSighting> {
        let window = data.windows(4).find(|w| w[..3] == self.signature)?;
        match window[3] {
            0 => None,
            peer_id => Some(PeerSighting { peer_id, rssi_dbm }),
        }
    }
}

/// Accept-set filter applied before relay emission.
#[derive(Debug, Clone)]
pub struct RelayFilter {
    decoder: PeerScanDecoder,
    accept: Vec<u8>,
}

impl RelayFilter {
    pub fn new(company_id: u16, accept: Vec<u8>) -> Self {
        RelayFilter {
            decoder: PeerScanDecoder::new(company_id),
            accept,
        }
    }

    /// Decode one received advertisement, keeping only accepted peers.
    pub fn sighting(&self, data: &[u8], rssi_dbm: i8) -> Option<PeerSighting> {
        self.decoder
            .scan(data, rssi_dbm)
            .filter(|s| self.accept.contains(&s.peer_id))
    }
}
