//! Raw HCI socket radio backend.
//!
//! Covers both radio seams on a raw Linux HCI socket: the advertiser
//! carrying the node's record ([`HciRadio`]) and the passive listener that
//! feeds received advertisements into the event channel for the gateway
//! role ([`start_listener`]). Requires CAP_NET_RAW and CAP_NET_ADMIN
//! capabilities or root privileges.

use crate::app::{Broadcaster, Event, RadioError};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_ADV_PARAMETERS: u16 = 0x0006;
const OCF_LE_SET_ADV_DATA: u16 = 0x0008;
const OCF_LE_SET_ADV_ENABLE: u16 = 0x000A;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Advertising type: connectable undirected
const ADV_IND: u8 = 0x00;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// All three advertising channels
const ADV_CHANNELS_ALL: u8 = 0x07;

// Controller limits for the advertising interval, in 0.625 ms units
const ADV_INTERVAL_MIN_UNITS: u64 = 0x0020;
const ADV_INTERVAL_MAX_UNITS: u64 = 0x4000;

/// Advertisement data register size on the controller.
const ADV_DATA_MAX: usize = 31;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Convert a millisecond advertising interval into 0.625 ms radio units,
/// clamped to the controller's legal range.
fn ms_to_adv_units(interval_ms: u32) -> u16 {
    (u64::from(interval_ms) * 8 / 5).clamp(ADV_INTERVAL_MIN_UNITS, ADV_INTERVAL_MAX_UNITS) as u16
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, RadioError> {
    // SOCK_NONBLOCK is required for AsyncFd on the listener path
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(RadioError(format!(
            "failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), RadioError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(RadioError(format!(
            "failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Restrict the listener socket to LE meta events
fn set_hci_filter(fd: &OwnedFd) -> Result<(), RadioError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(RadioError(format!(
            "failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), RadioError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(RadioError(format!(
            "failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Advertiser half of the radio: owns a command socket bound to one device.
#[derive(Debug)]
pub struct HciRadio {
    cmd_fd: OwnedFd,
}

impl HciRadio {
    /// Open a command socket on the numbered HCI device.
    pub fn open(dev_id: u16) -> Result<Self, RadioError> {
        let cmd_fd = open_hci_socket()?;
        bind_hci_socket(&cmd_fd, dev_id)?;
        Ok(HciRadio { cmd_fd })
    }

    /// Program the advertising parameters and enable broadcasting.
    pub fn start_advertising(&mut self, interval_ms: u32) -> Result<(), RadioError> {
        self.set_interval(interval_ms)?;
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_ADV_ENABLE, &[0x01]);
        send_hci_command(&self.cmd_fd, &packet)
    }
}

impl Broadcaster for HciRadio {
    fn set_data(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if data.len() > ADV_DATA_MAX {
            return Err(RadioError(format!(
                "advertisement payload is {} bytes, limit {ADV_DATA_MAX}",
                data.len()
            )));
        }

        // LE Set Advertising Data: significant length + fixed 31-byte block
        let mut params = [0u8; 1 + ADV_DATA_MAX];
        params[0] = data.len() as u8;
        params[1..1 + data.len()].copy_from_slice(data);

        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_ADV_DATA, &params);
        send_hci_command(&self.cmd_fd, &packet)
    }

    fn set_interval(&mut self, interval_ms: u32) -> Result<(), RadioError> {
        let units = ms_to_adv_units(interval_ms).to_le_bytes();

        // LE Set Advertising Parameters: interval min/max, type, own address
        // type, peer address type + address (unused), channel map, policy
        let mut params = [0u8; 15];
        params[0..2].copy_from_slice(&units);
        params[2..4].copy_from_slice(&units);
        params[4] = ADV_IND;
        params[5] = LE_PUBLIC_ADDRESS;
        params[13] = ADV_CHANNELS_ALL;
        params[14] = FILTER_POLICY_ACCEPT_ALL;

        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_ADV_PARAMETERS, &params);
        send_hci_command(&self.cmd_fd, &packet)
    }
}

/// Configure passive LE scanning on the command socket
fn configure_le_scan(fd: &OwnedFd) -> Result<(), RadioError> {
    // Passive scan, 10 ms interval and window (0.625 ms units)
    let params: [u8; 7] = [
        LE_SCAN_PASSIVE,
        0x10,
        0x00,
        0x10,
        0x00,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ];
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params);
    send_hci_command(fd, &packet)?;

    // Enable scanning without duplicate filtering; peers re-advertise the
    // same payload and every sighting carries a fresh RSSI.
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
    send_hci_command(fd, &packet)
}

/// Extract the raw AD payload and RSSI from an LE advertising report.
fn parse_advertising_report(packet: &[u8]) -> Option<(Vec<u8>, i8)> {
    // Skip packet type, event code, parameter length, subevent code.
    let report = packet.get(4..)?;

    if *report.first()? == 0 {
        return None;
    }

    // First report only: num_reports(1) + event_type(1) + addr_type(1) +
    // addr(6), then the data length, data, and trailing RSSI byte.
    let data_len = usize::from(*report.get(9)?);
    let data = report.get(10..10 + data_len)?;
    let rssi = *report.get(10 + data_len)? as i8;

    Some((data.to_vec(), rssi))
}

/// Start a passive scan and feed received advertisements into `events`.
///
/// The returned future resolves once scanning is configured; reports are
/// then delivered from a background task until the channel closes.
pub async fn start_listener(dev_id: u16, events: mpsc::Sender<Event>) -> Result<(), RadioError> {
    // One socket receives events, a second one carries the scan commands.
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, dev_id)?;
    set_hci_filter(&fd)?;

    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, dev_id)?;
    configure_le_scan(&cmd_fd)?;

    let async_fd =
        AsyncFd::new(fd).map_err(|e| RadioError(format!("failed to create async fd: {e}")))?;

    tokio::spawn(async move {
        let _cmd_fd = cmd_fd; // Keep the command socket alive
        let mut buf = [0u8; 258]; // Max HCI event size

        loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(_) => break,
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,  // EOF or empty read
                    Ok(Err(_)) => break, // Read error
                    Err(_) => break,     // WouldBlock - no more data
                };

                if n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT
                    && let Some((data, rssi_dbm)) = parse_advertising_report(&buf[..n])
                    && events
                        .send(Event::AdvertisementReceived { data, rssi_dbm })
                        .await
                        .is_err()
                {
                    return;
                }
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_ADV_ENABLE, &[0x01]);

        assert_eq!(packet[0], 0x01); // Command packet type
        // Opcode 0x200A little endian
        assert_eq!(packet[1], 0x0A);
        assert_eq!(packet[2], 0x20);
        assert_eq!(packet[3], 1); // Parameter length
        assert_eq!(packet[4], 0x01);
    }

    #[test]
    fn test_ms_to_adv_units() {
        assert_eq!(ms_to_adv_units(100), 160);
        assert_eq!(ms_to_adv_units(32), 51);
        // Below the controller minimum: clamped up
        assert_eq!(ms_to_adv_units(10), 0x0020);
        // Above the controller maximum: clamped down
        assert_eq!(ms_to_adv_units(60_000), 0x4000);
    }

    #[test]
    fn test_parse_advertising_report() {
        // Type, event, param len, subevent, then one report:
        // num=1, event_type, addr_type, 6-byte address, data_len=4,
        // payload FF FF 02 03, RSSI -61.
        let packet = [
            0x04, 0x3E, 0x11, 0x02, 0x01, 0x00, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x04,
            0xFF, 0xFF, 0x02, 0x03, 0xC3,
        ];

        let (data, rssi) = parse_advertising_report(&packet).unwrap();
        assert_eq!(data, vec![0xFF, 0xFF, 0x02, 0x03]);
        assert_eq!(rssi, -61);
    }

    #[test]
    fn test_parse_advertising_report_truncated() {
        // Data length claims more bytes than the packet carries.
        let packet = [
            0x04, 0x3E, 0x0A, 0x02, 0x01, 0x00, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x1F,
            0xFF,
        ];
        assert_eq!(parse_advertising_report(&packet), None);
    }

    #[test]
    fn test_parse_advertising_report_empty() {
        assert_eq!(parse_advertising_report(&[0x04, 0x3E, 0x01, 0x02, 0x00]), None);
        assert_eq!(parse_advertising_report(&[0x04, 0x3E]), None);
    }
}
