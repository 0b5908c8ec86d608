//! CRC-16 frame check sequence.
//!
//! The generator is CRC-16/IBM-SDLC, the X.25 polynomial used as the PPP FCS
//! in RFC 1662. The two check bytes are appended least-significant first,
//! the transmission order X.25 and PPP use.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_SDLC};

use crate::error::{FrameError, Result};

/// Size of the trailer in bytes.
pub const FCS_LEN: usize = 2;

const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Compute the checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    X25.checksum(data)
}

/// Append `payload` followed by its checksum to `dst`.
pub fn append_fcs(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + FCS_LEN);
    dst.put_slice(payload);
    dst.put_u16_le(checksum(payload));
}

/// Check the trailing checksum of `frame` and return the leading bytes.
pub fn verify_fcs(frame: &Bytes) -> Result<Bytes> {
    if frame.len() < FCS_LEN {
        return Err(FrameError::TooShort {
            len: frame.len(),
            min: FCS_LEN,
        });
    }

    let split = frame.len() - FCS_LEN;
    let actual = u16::from_le_bytes([frame[split], frame[split + 1]]);
    let expected = checksum(&frame[..split]);
    if actual != expected {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }
    Ok(frame.slice(..split))
}
