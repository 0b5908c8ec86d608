use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::trace;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::fsm::{FrameFsm, TimerAction};

const READ_CHUNK_SIZE: usize = 256;

/// Outcome of one read attempt.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Frames completed by the bytes just read, in arrival order.
    pub frames: Vec<Bytes>,
    /// Net timer action after feeding every byte read.
    pub timer: Option<TimerAction>,
    /// Number of raw bytes read.
    pub bytes_read: usize,
    /// The stream reported end of file.
    pub closed: bool,
}

/// Reads frames from a non-blocking `Read` stream.
///
/// Each call to [`read_available`](Self::read_available) makes a single read
/// attempt and runs the bytes through the receive state machine; partial
/// frames stay buffered in the state machine between calls.
pub struct FrameReader<T> {
    inner: T,
    fsm: FrameFsm,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self {
            inner,
            fsm: FrameFsm::new(config.max_frame_len),
        }
    }

    /// Make one read attempt. `WouldBlock` and `Interrupted` yield an empty
    /// outcome.
    pub fn read_available(&mut self) -> Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = match self.inner.read(&mut chunk) {
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                return Ok(ReadOutcome::default())
            }
            Err(err) => return Err(FrameError::Io(err)),
        };

        if read == 0 {
            return Ok(ReadOutcome {
                closed: true,
                ..ReadOutcome::default()
            });
        }

        trace!(read, "bytes from line");
        let mut outcome = ReadOutcome {
            bytes_read: read,
            ..ReadOutcome::default()
        };
        for &byte in &chunk[..read] {
            let step = self.fsm.input(byte);
            if step.timer != TimerAction::Keep {
                outcome.timer = Some(step.timer);
            }
            outcome.frames.extend(step.frame);
        }
        Ok(outcome)
    }

    /// The frame timer expired; drop the partial frame.
    pub fn timeout(&mut self) -> TimerAction {
        self.fsm.timeout()
    }

    /// The receive state machine.
    pub fn fsm(&self) -> &FrameFsm {
        &self.fsm
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
