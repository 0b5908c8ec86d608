use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, SerialStream};

/// Default line speed, matching the classic 9600 8N1 setup.
pub const DEFAULT_BAUD: u32 = 9600;

/// Line settings applied when a serial device is opened.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line speed in bits per second.
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud: DEFAULT_BAUD }
    }
}

/// An opened serial device.
///
/// The device is opened non-blocking and in raw mode (8N1, no echo, no
/// canonical line processing, `VMIN = VTIME = 0`). The descriptor is closed
/// exactly once, when the port is dropped.
pub struct SerialPort {
    stream: SerialStream,
    path: PathBuf,
}

impl SerialPort {
    /// Open `path` with the given line settings.
    ///
    /// A path that is not a terminal (a FIFO, for instance) is accepted as-is
    /// and only the termios step is skipped.
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(config.baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        match configure_raw(file.as_raw_fd(), speed) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::ENOTTY) => {
                warn!(?path, "device is not a terminal; line settings left untouched");
            }
            Err(source) => {
                return Err(TransportError::Configure {
                    path: path.clone(),
                    source,
                })
            }
        }

        info!(?path, baud = config.baud, "opened serial device");

        Ok(Self {
            stream: SerialStream::from_device(file),
            path,
        })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the underlying stream.
    pub fn stream(&self) -> &SerialStream {
        &self.stream
    }

    /// Mutably borrow the underlying stream.
    pub fn stream_mut(&mut self) -> &mut SerialStream {
        &mut self.stream
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl ByteStream for SerialPort {
    fn poll_fd(&self) -> Option<RawFd> {
        self.stream.poll_fd()
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        debug!(path = ?self.path, "closing serial device");
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("stream", &self.stream)
            .finish()
    }
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> std::io::Result<()> {
    // SAFETY: an all-zero termios is a valid value to hand to tcgetattr,
    // which overwrites it.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor and `tio` is a valid writable termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    apply_line_settings(&mut tio);

    // SAFETY: `fd` is open and `tio` is a fully initialised termios.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// 8N1 on top of `cfmakeraw`: modem lines ignored, no RTS/CTS flow control.
fn apply_line_settings(tio: &mut libc::termios) {
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_device_fails() {
        let result = SerialPort::open("/dev/serlink-does-not-exist", &SerialConfig::default());
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }

    #[test]
    fn unsupported_baud_is_rejected_before_open() {
        let config = SerialConfig { baud: 12345 };
        let result = SerialPort::open("/dev/serlink-does-not-exist", &config);
        assert!(matches!(result, Err(TransportError::UnsupportedBaud(12345))));
    }

    #[test]
    fn common_baud_rates_are_known() {
        for baud in [1200, 9600, 19200, 57600, 115200] {
            assert!(baud_constant(baud).is_ok(), "baud {baud} should map");
        }
    }

    #[test]
    fn line_settings_clear_flow_control_and_parity() {
        // SAFETY: termios is plain data; all-zero is a valid value.
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        tio.c_cflag = libc::CRTSCTS | libc::CSTOPB | libc::PARENB;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 5;

        apply_line_settings(&mut tio);

        assert_eq!(tio.c_cflag & libc::CRTSCTS, 0);
        assert_eq!(tio.c_cflag & (libc::CSTOPB | libc::PARENB), 0);
        assert_eq!(
            tio.c_cflag & (libc::CLOCAL | libc::CREAD),
            libc::CLOCAL | libc::CREAD
        );
        assert_eq!(tio.c_cc[libc::VMIN], 0);
        assert_eq!(tio.c_cc[libc::VTIME], 0);
    }

    #[test]
    fn non_terminal_path_opens_with_warning() {
        let path = std::env::temp_dir().join(format!("serlink-notty-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let port = SerialPort::open(&path, &SerialConfig::default()).unwrap();
        assert_eq!(port.path(), path.as_path());
        assert_eq!(port.stream().transport_name(), "serial-device");

        drop(port);
        let _ = std::fs::remove_file(&path);
    }
}
