use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::core::{Error, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC};
use super::frame::{self, Frame};

/// Frame codec for byte-stream links (e.g. a UART bridge to the radio).
///
/// Datagram transports hand whole frames to [`frame::decode`]; a stream has
/// no boundaries, so this codec waits for complete frames and resyncs on
/// the next magic byte when it sees garbage.
#[derive(Clone, Default)]
pub struct FrameCodec {
    /// Bytes skipped while hunting for a magic byte
    skipped: usize,
}

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec::default()
    }

    /// Total bytes discarded during resync since creation
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Drop everything before the next magic byte
            match src.iter().position(|&b| b == PROTOCOL_MAGIC) {
                Some(0) => {}
                Some(n) => {
                    debug!(skipped = n, "resync on magic byte");
                    self.skipped += n;
                    src.advance(n);
                }
                None => {
                    self.skipped += src.len();
                    src.clear();
                    return Ok(None);
                }
            }

            if src.len() < HEADER_SIZE {
                // Need more data to read the header
                return Ok(None);
            }

            let header = frame::decode_header(&src[..])?;
            let total = HEADER_SIZE + src[8] as usize;
            if src[8] as usize > MAX_PAYLOAD_SIZE {
                // A stray 0xA5 inside a payload; skip it and keep hunting
                self.skipped += 1;
                src.advance(1);
                continue;
            }
            if src.len() < total {
                // Need more data to read the payload
                return Ok(None);
            }

            let mut data = src.split_to(total);
            data.advance(HEADER_SIZE);
            return Ok(Some(Frame {
                header,
                payload: data.freeze(),
            }));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame::encode_into(&item.header, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogicalAddress;
    use crate::protocol::frame::FrameHeader;
    use bytes::{BufMut, Bytes};

    fn sample(seq: u16) -> Frame {
        Frame {
            header: FrameHeader::direct(LogicalAddress(0x41), LogicalAddress::COORDINATOR, 0x30, seq),
            payload: Bytes::from_static(&[4, 0, 0, 0x80, 0x3F]),
        }
    }

    #[test]
    fn test_codec_frame() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();

        // Encode
        codec.encode(sample(1), &mut bytes).unwrap();

        // Decode
        if let Some(decoded) = codec.decode(&mut bytes).unwrap() {
            assert_eq!(decoded, sample(1));
        } else {
            panic!("Failed to decode frame");
        }
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec::new();
        let mut full = BytesMut::new();
        codec.encode(sample(2), &mut full).unwrap();

        let mut bytes = BytesMut::from(&full[..6]);
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
        bytes.extend_from_slice(&full[6..11]);
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
        bytes.extend_from_slice(&full[11..]);
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(sample(2)));
    }

    #[test]
    fn test_resync_after_noise() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        bytes.put_slice(&[0x00, 0x13, 0x37]);
        codec.encode(sample(3), &mut bytes).unwrap();
        codec.encode(sample(4), &mut bytes).unwrap();

        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(sample(3)));
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(sample(4)));
        assert_eq!(codec.skipped(), 3);
    }

    #[test]
    fn test_stray_magic_with_bogus_length() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        bytes.put_slice(&[0xA5, 0, 0, 0, 0, 0, 0, 0, 0xFF]);
        codec.encode(sample(5), &mut bytes).unwrap();

        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(sample(5)));
    }
}
