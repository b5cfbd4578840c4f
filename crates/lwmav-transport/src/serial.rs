use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::params::{Baudrate, TransportKind, TransportParams};
use crate::traits::{Transport, POLL_INTERVAL};

/// Raw 8N1 serial transport over a POSIX tty.
///
/// The line is configured with `VMIN = 0` and `VTIME` derived from
/// [`POLL_INTERVAL`], so `receive` returns `Ok(0)` when the link is idle.
#[derive(Debug, Default)]
pub struct SerialTransport {
    file: Option<File>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(TransportError::NotOpen)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn speed(baudrate: Baudrate) -> libc::speed_t {
    match baudrate {
        Baudrate::B9600 => libc::B9600,
        Baudrate::B19200 => libc::B19200,
        Baudrate::B38400 => libc::B38400,
        Baudrate::B57600 => libc::B57600,
        Baudrate::B115200 => libc::B115200,
        Baudrate::B230400 => libc::B230400,
        Baudrate::B460800 => libc::B460800,
        Baudrate::B921600 => libc::B921600,
    }
}

// BSD-derived systems take the numeric rate directly.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn speed(baudrate: Baudrate) -> libc::speed_t {
    baudrate.bits_per_second() as libc::speed_t
}

fn configure(file: &File, baudrate: Baudrate) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: termios is a plain C struct; zeroed is a valid starting value
    // that tcgetattr overwrites before use.
    let mut tty: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor owned by `file`; `tty` is a valid
    // writable termios for the duration of each call.
    unsafe {
        if libc::tcgetattr(fd, &mut tty) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        libc::cfmakeraw(&mut tty);
        tty.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        tty.c_cflag &= !(libc::PARENB | libc::CSTOPB);
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
        {
            tty.c_cflag &= !libc::CRTSCTS;
        }

        let deciseconds = (POLL_INTERVAL.as_millis() / 100).clamp(1, 255) as libc::cc_t;
        tty.c_cc[libc::VMIN] = 0;
        tty.c_cc[libc::VTIME] = deciseconds;

        let rate = speed(baudrate);
        if libc::cfsetispeed(&mut tty, rate) != 0 || libc::cfsetospeed(&mut tty, rate) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tty) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn open_device(device: &Path, baudrate: Baudrate) -> Result<File> {
    let device_err = |source| TransportError::Device {
        device: device.display().to_string(),
        source,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(device)
        .map_err(device_err)?;
    configure(&file, baudrate).map_err(device_err)?;
    Ok(file)
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn open(&mut self, params: &TransportParams) -> Result<()> {
        let TransportParams::Serial { device, baudrate } = params else {
            return Err(TransportError::WrongKind {
                expected: TransportKind::Serial,
                got: params.kind(),
            });
        };

        let file = open_device(device, *baudrate)?;
        info!(device = %device.display(), baud = baudrate.bits_per_second(), "serial link open");
        self.file = Some(file);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file()?;
        loop {
            match file.write_all(data) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "serial write failed");
                    return Err(TransportError::Io(err));
                }
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        match file.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(err) => {
                warn!(error = %err, "serial read failed");
                Err(TransportError::Io(err))
            }
        }
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("serial transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_a_device_error() {
        let mut transport = SerialTransport::new();
        let err = transport
            .open(&TransportParams::Serial {
                device: "/dev/lwmav-does-not-exist".into(),
                baudrate: Baudrate::B57600,
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::Device { .. }));
    }

    #[test]
    fn non_tty_is_rejected() {
        let path = std::env::temp_dir().join(format!("lwmav-serial-{}", std::process::id()));
        std::fs::write(&path, b"not a tty").unwrap();

        let mut transport = SerialTransport::new();
        let err = transport
            .open(&TransportParams::Serial {
                device: path.clone(),
                baudrate: Baudrate::B115200,
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::Device { .. }));

        let _ = std::fs::remove_file(&path);
    }
}
