//! Transport frame: 9-byte header followed by the payload.
//!
//! ```text
//! offset  size  field
//!      0     1  magic (0xA5)
//!      1     1  flags (bit0 NEED_ACK, bit1 RETRANSMITTED)
//!      2     1  src
//!      3     1  dst
//!      4     1  via (0 = direct)
//!      5     1  msg_type
//!      6     2  seq_num, little-endian
//!      8     1  payload_len (0..=230)
//!      9     n  payload
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::core::{Error, LogicalAddress, Result, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC};

/// Header flag bits. Unknown bits are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    /// Receiver must acknowledge
    pub const NEED_ACK: FrameFlags = FrameFlags(0x01);
    /// Frame is a resend of an earlier one with the same sequence number
    pub const RETRANSMITTED: FrameFlags = FrameFlags(0x02);

    /// No flags set
    pub const fn empty() -> Self {
        FrameFlags(0)
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` added
    pub const fn with(self, other: FrameFlags) -> Self {
        FrameFlags(self.0 | other.0)
    }

    pub fn need_ack(self) -> bool {
        self.contains(Self::NEED_ACK)
    }

    pub fn retransmitted(self) -> bool {
        self.contains(Self::RETRANSMITTED)
    }
}

/// Decoded transport header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: FrameFlags,
    pub src: LogicalAddress,
    pub dst: LogicalAddress,
    /// Relay address, `LogicalAddress(0)` when sent directly
    pub via: LogicalAddress,
    /// Raw message type code; the payload registry interprets it
    pub msg_type: u8,
    pub seq: u16,
}

impl FrameHeader {
    /// Header for a direct frame with no flags
    pub fn direct(src: LogicalAddress, dst: LogicalAddress, msg_type: u8, seq: u16) -> Self {
        FrameHeader {
            flags: FrameFlags::empty(),
            src,
            dst,
            via: LogicalAddress(0),
            msg_type,
            seq,
        }
    }
}

/// A header plus its payload
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Frame {
    /// Serializes the frame; see [`encode`]
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode(&self.header, &self.payload)
    }

    /// Parses and copies a frame out of `data`; see [`decode`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header, payload) = decode(data)?;
        Ok(Frame {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Writes header and payload into `dst`
pub fn encode_into(header: &FrameHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(PROTOCOL_MAGIC);
    dst.put_u8(header.flags.0);
    dst.put_u8(header.src.0);
    dst.put_u8(header.dst.0);
    dst.put_u8(header.via.0);
    dst.put_u8(header.msg_type);
    dst.put_u16_le(header.seq);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    Ok(())
}

/// Serializes a frame for transmission
pub fn encode(header: &FrameHeader, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_into(header, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Parses a complete datagram. The payload borrows from `data`.
pub fn decode(data: &[u8]) -> Result<(FrameHeader, &[u8])> {
    let header = decode_header(data)?;
    let declared = data[8] as usize;
    let actual = data.len() - HEADER_SIZE;
    if declared != actual {
        return Err(Error::LengthMismatch { declared, actual });
    }
    Ok((header, &data[HEADER_SIZE..]))
}

/// Parses only the header; `data` may be longer or shorter than the payload
pub(crate) fn decode_header(data: &[u8]) -> Result<FrameHeader> {
    if data.len() < HEADER_SIZE {
        return Err(Error::TruncatedFrame(data.len()));
    }
    if data[0] != PROTOCOL_MAGIC {
        return Err(Error::BadMagic(data[0]));
    }

    Ok(FrameHeader {
        flags: FrameFlags(data[1]),
        src: LogicalAddress(data[2]),
        dst: LogicalAddress(data[3]),
        via: LogicalAddress(data[4]),
        msg_type: data[5],
        seq: u16::from_le_bytes([data[6], data[7]]),
    })
}

/// Returns a copy of an encoded frame with the RETRANSMITTED bit set
pub fn mark_retransmitted(frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::from(frame);
    if buf.len() > 1 {
        buf[1] |= FrameFlags::RETRANSMITTED.0;
    }
    buf.freeze()
}
