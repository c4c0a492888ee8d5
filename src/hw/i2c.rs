//! `/dev/i2c-*` backend for the sensor bus.
//!
//! Uses the Linux i2c-dev character device directly: one `ioctl` selects
//! the peer address, then plain `read`/`write` calls perform the addressed
//! transfers the driver needs.

use crate::sensor::{SENSOR_ADDR, SensorBus};
use libc::{c_int, c_void};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// i2c-dev ioctl selecting the peer address for subsequent transfers.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Sensor bus over a Linux i2c-dev adapter.
#[derive(Debug)]
pub struct LinuxI2cBus {
    fd: OwnedFd,
}

impl LinuxI2cBus {
    /// Open `/dev/i2c-<adapter>` and select the sensor address.
    pub fn open(adapter: u32) -> io::Result<Self> {
        let path = CString::new(format!("/dev/i2c-{adapter}"))
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), I2C_SLAVE, c_int::from(SENSOR_ADDR)) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(LinuxI2cBus { fd })
    }
}

impl SensorBus for LinuxI2cBus {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                data.as_ptr() as *const c_void,
                data.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n as usize != data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short bus write"));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n as usize != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short bus read",
            ));
        }
        Ok(())
    }
}
