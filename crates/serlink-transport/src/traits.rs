use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// A byte stream the stack can sit on.
///
/// `poll_fd` names the descriptor the [`Poller`](crate::Poller) should watch
/// for readability. Streams without one (in-memory test wires) are driven by
/// hand.
pub trait ByteStream: Read + Write {
    fn poll_fd(&self) -> Option<RawFd>;
}

/// A connected serial stream. Implements Read + Write.
///
/// Wraps either an opened serial device or one end of a Unix socket pair,
/// which stands in for a null-modem cable in loopback runs and tests.
pub struct SerialStream {
    inner: SerialStreamInner,
}

enum SerialStreamInner {
    Device(File),
    Socket(UnixStream),
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.read(buf),
            SerialStreamInner::Socket(stream) => stream.read(buf),
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.write(buf),
            SerialStreamInner::Socket(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.flush(),
            SerialStreamInner::Socket(stream) => stream.flush(),
        }
    }
}

impl AsRawFd for SerialStream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            SerialStreamInner::Device(file) => file.as_raw_fd(),
            SerialStreamInner::Socket(stream) => stream.as_raw_fd(),
        }
    }
}

impl ByteStream for SerialStream {
    fn poll_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl ByteStream for UnixStream {
    fn poll_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

impl SerialStream {
    /// Create a SerialStream from an opened (and already configured) device.
    pub(crate) fn from_device(file: File) -> Self {
        Self {
            inner: SerialStreamInner::Device(file),
        }
    }

    /// Create a connected, non-blocking pair of streams.
    ///
    /// Whatever is written to one end is readable on the other, like two
    /// serial ports joined by a null-modem cable.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        left.set_nonblocking(true)?;
        right.set_nonblocking(true)?;
        Ok((
            Self {
                inner: SerialStreamInner::Socket(left),
            },
            Self {
                inner: SerialStreamInner::Socket(right),
            },
        ))
    }

    /// Switch the stream between blocking and non-blocking reads.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            SerialStreamInner::Device(file) => set_fd_nonblocking(file.as_raw_fd(), nonblocking),
            SerialStreamInner::Socket(stream) => {
                stream.set_nonblocking(nonblocking).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            SerialStreamInner::Device(file) => SerialStreamInner::Device(file.try_clone()?),
            SerialStreamInner::Socket(stream) => SerialStreamInner::Socket(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            SerialStreamInner::Device(_) => "serial-device",
            SerialStreamInner::Socket(_) => "socket-pair",
        }
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("type", &self.transport_name())
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

fn set_fd_nonblocking(fd: RawFd, nonblocking: bool) -> Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller for the duration
    // of both fcntl calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: see above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut left, mut right) = SerialStream::pair().unwrap();

        left.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn pair_is_nonblocking() {
        let (mut left, _right) = SerialStream::pair().unwrap();
        let mut buf = [0u8; 8];
        let err = left.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn poll_fd_matches_raw_fd() {
        let (left, _right) = SerialStream::pair().unwrap();
        assert_eq!(left.poll_fd(), Some(left.as_raw_fd()));
        assert_eq!(left.transport_name(), "socket-pair");
    }

    #[test]
    fn try_clone_shares_the_line() {
        let (left, mut right) = SerialStream::pair().unwrap();
        let mut clone = left.try_clone().unwrap();
        clone.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }
}
