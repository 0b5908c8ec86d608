use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::encode_frame;
use crate::error::{FrameError, Result};
use crate::fcs::append_fcs;

const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Stuff, delimit and write one payload. Returns the number of wire bytes.
///
/// `scratch` is cleared and reused as the encode buffer. `inner` is expected
/// to block; a non-blocking stream that is not ready fails with
/// `WouldBlock` and the frame may be left half written. Use
/// [`OutboundBuffer`] for non-blocking streams.
pub fn write_frame<W: Write + ?Sized>(
    inner: &mut W,
    payload: &[u8],
    scratch: &mut BytesMut,
) -> Result<usize> {
    scratch.clear();
    encode_frame(payload, scratch);

    let mut offset = 0usize;
    while offset < scratch.len() {
        match inner.write(&scratch[offset..]) {
            Ok(0) => {
                return Err(FrameError::Io(std::io::Error::from(
                    ErrorKind::WriteZero,
                )))
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    loop {
        match inner.flush() {
            Ok(()) => return Ok(scratch.len()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

/// Wire bytes queued for a non-blocking stream.
///
/// Frames are encoded into the buffer whole and drained with
/// [`OutboundBuffer::flush_to`] as the stream accepts them, so a stream that
/// is not ready never stalls the caller.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    buf: BytesMut,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still waiting for the stream.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode one frame onto the end of the queue. Returns its wire length.
    pub fn push_frame(&mut self, payload: &[u8]) -> usize {
        let before = self.buf.len();
        encode_frame(payload, &mut self.buf);
        self.buf.len() - before
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Write as much as `inner` takes without blocking.
    ///
    /// Returns `Ok(true)` once the queue is empty and `Ok(false)` when the
    /// stream reported `WouldBlock` with bytes still queued. On error the
    /// queue is left as it was after the last successful write.
    pub fn flush_to<W: Write + ?Sized>(&mut self, inner: &mut W) -> Result<bool> {
        while !self.buf.is_empty() {
            match inner.write(&self.buf) {
                Ok(0) => {
                    return Err(FrameError::Io(std::io::Error::from(
                        ErrorKind::WriteZero,
                    )))
                }
                Ok(n) => {
                    let _ = self.buf.split_to(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match inner.flush() {
                Ok(()) => return Ok(true),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // Whatever the stream buffered itself goes out on its next flush.
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }
}

/// Writes complete frames to any blocking `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    scratch: BytesMut,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scratch: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Send a payload as one frame (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        write_frame(&mut self.inner, payload, &mut self.buf)
    }

    /// Send a payload with its CRC-16 trailer as one frame (blocking).
    pub fn send_checked(&mut self, payload: &[u8]) -> Result<usize> {
        self.scratch.clear();
        append_fcs(payload, &mut self.scratch);
        write_frame(&mut self.inner, &self.scratch, &mut self.buf)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
