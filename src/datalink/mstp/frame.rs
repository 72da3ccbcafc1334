//! MS/TP frame types and frame assembly
//!
//! Frame layout on the wire:
//!
//! | Field             | Size    | Notes                                   |
//! |-------------------|---------|-----------------------------------------|
//! | Preamble          | 2       | 0x55, 0xFF                              |
//! | Frame type        | 1       | [`FrameType`]                           |
//! | Destination       | 1       | 255 = broadcast                         |
//! | Source            | 1       |                                         |
//! | Length            | 2       | big-endian, 0-501                       |
//! | Header CRC        | 1       | complemented CRC-8                      |
//! | Data              | 0-501   | only if length > 0                      |
//! | Data CRC          | 2       | only if length > 0, complemented, LSB first |
//!
//! Decoding is done byte by byte by the receive state machine; see
//! [`decode_frame`](super::receive::decode_frame) for the buffer form.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::{data_checksum, header_checksum};
use crate::datalink::{DataLinkError, Result};
use crate::generate_custom_enum;

/// MS/TP frame preamble bytes
pub const MSTP_PREAMBLE_55: u8 = 0x55;
pub const MSTP_PREAMBLE_FF: u8 = 0xFF;

/// Maximum MS/TP data length
pub const MSTP_MAX_DATA_LENGTH: usize = 501;

/// MS/TP header size including the preamble and header CRC
pub const MSTP_HEADER_SIZE: usize = 8;

/// MS/TP maximum frame size
pub const MSTP_MAX_FRAME_SIZE: usize = MSTP_HEADER_SIZE + MSTP_MAX_DATA_LENGTH + 2;

generate_custom_enum! {
    /// MS/TP frame types.
    ///
    /// Values 128-255 are proprietary and carried as `Custom`; the unassigned
    /// values 8-127 decode as `Reserved`.
    FrameType {
        Token = 0,
        PollForMaster = 1,
        ReplyToPollForMaster = 2,
        TestRequest = 3,
        TestResponse = 4,
        BacnetDataExpectingReply = 5,
        BacnetDataNotExpectingReply = 6,
        ReplyPostponed = 7,
    },
    u8,
    128..=255
}

impl FrameType {
    /// Frames the sender expects the destination to answer.
    pub fn expects_reply(&self) -> bool {
        matches!(self, FrameType::BacnetDataExpectingReply | FrameType::TestRequest)
    }

    /// BACnet data frames, in either direction.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            FrameType::BacnetDataExpectingReply | FrameType::BacnetDataNotExpectingReply
        )
    }

    /// Proprietary frame types (128-255).
    pub fn is_proprietary(&self) -> bool {
        matches!(self, FrameType::Custom(_))
    }
}

/// A decoded MS/TP frame.
///
/// The length field and both CRCs are not stored; they are derived from `data`
/// when the frame is encoded and verified when it is received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MstpFrame {
    /// Frame type
    pub frame_type: FrameType,
    /// Destination address
    pub destination: u8,
    /// Source address
    pub source: u8,
    /// Frame data
    pub data: Bytes,
}

impl MstpFrame {
    /// Create a new MS/TP frame
    pub fn new(
        frame_type: FrameType,
        destination: u8,
        source: u8,
        data: impl Into<Bytes>,
    ) -> Result<Self> {
        let data = data.into();
        if data.len() > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge {
                len: data.len(),
                max: MSTP_MAX_DATA_LENGTH,
            });
        }

        Ok(Self {
            frame_type,
            destination,
            source,
            data,
        })
    }

    /// Create a token frame
    pub fn token(destination: u8, source: u8) -> Self {
        Self::control(FrameType::Token, destination, source)
    }

    /// Create a poll for master frame
    pub fn poll_for_master(destination: u8, source: u8) -> Self {
        Self::control(FrameType::PollForMaster, destination, source)
    }

    /// Create a reply to poll for master frame
    pub fn reply_to_poll_for_master(destination: u8, source: u8) -> Self {
        Self::control(FrameType::ReplyToPollForMaster, destination, source)
    }

    /// Create a BACnet data frame
    pub fn bacnet_data(
        destination: u8,
        source: u8,
        data: impl Into<Bytes>,
        expecting_reply: bool,
    ) -> Result<Self> {
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        Self::new(frame_type, destination, source, data)
    }

    fn control(frame_type: FrameType, destination: u8, source: u8) -> Self {
        Self {
            frame_type,
            destination,
            source,
            data: Bytes::new(),
        }
    }

    /// Encoded size of this frame in octets.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.data.len())
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        write_frame(
            buf,
            self.frame_type,
            self.destination,
            self.source,
            &self.data,
        );
    }

    /// Check if this is a token frame
    pub fn is_token(&self) -> bool {
        self.frame_type == FrameType::Token
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.frame_type.is_data()
    }
}

/// Assemble a complete frame: preamble, header, header CRC and, for a
/// non-empty payload, the data and data CRC.
///
/// # Errors
///
/// Returns [`DataLinkError::FrameTooLarge`] if `payload` is longer than
/// [`MSTP_MAX_DATA_LENGTH`]; nothing is produced in that case.
pub fn encode_frame(
    frame_type: FrameType,
    destination: u8,
    source: u8,
    payload: &[u8],
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(encoded_len(payload.len()));
    encode_frame_into(&mut buf, frame_type, destination, source, payload)?;
    Ok(buf.freeze())
}

/// Like [`encode_frame`], appending to an existing output buffer.
pub fn encode_frame_into(
    buf: &mut BytesMut,
    frame_type: FrameType,
    destination: u8,
    source: u8,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MSTP_MAX_DATA_LENGTH {
        return Err(DataLinkError::FrameTooLarge {
            len: payload.len(),
            max: MSTP_MAX_DATA_LENGTH,
        });
    }
    buf.reserve(encoded_len(payload.len()));
    write_frame(buf, frame_type, destination, source, payload);
    Ok(())
}

fn encoded_len(data_len: usize) -> usize {
    if data_len > 0 {
        MSTP_HEADER_SIZE + data_len + 2
    } else {
        MSTP_HEADER_SIZE
    }
}

fn write_frame(buf: &mut BytesMut, frame_type: FrameType, destination: u8, source: u8, data: &[u8]) {
    let length = data.len() as u16;
    let header = [
        u8::from(frame_type),
        destination,
        source,
        (length >> 8) as u8,
        (length & 0xFF) as u8,
    ];

    buf.put_u8(MSTP_PREAMBLE_55);
    buf.put_u8(MSTP_PREAMBLE_FF);
    buf.put_slice(&header);
    buf.put_u8(header_checksum(&header));

    if !data.is_empty() {
        buf.put_slice(data);
        buf.put_u16_le(data_checksum(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_frame_bytes() {
        let encoded = MstpFrame::token(0x10, 0x05).encode();
        assert_eq!(
            encoded.as_ref(),
            &[0x55, 0xFF, 0x00, 0x10, 0x05, 0x00, 0x00, 0x8C]
        );
    }

    #[test]
    fn test_data_frame_bytes() {
        let encoded = encode_frame(
            FrameType::BacnetDataNotExpectingReply,
            0x02,
            0x01,
            &[0x01, 0x22, 0x30],
        )
        .unwrap();

        assert_eq!(encoded.len(), MSTP_HEADER_SIZE + 3 + 2);
        assert_eq!(&encoded[5..7], &[0x00, 0x03]);
        assert_eq!(&encoded[8..11], &[0x01, 0x22, 0x30]);
        // Annex G: CRC 0xBD10 goes out low octet first
        assert_eq!(&encoded[11..], &[0x10, 0xBD]);
    }

    #[test]
    fn test_max_data_length() {
        let data = vec![0u8; MSTP_MAX_DATA_LENGTH + 1];
        let result = MstpFrame::bacnet_data(10, 20, data.clone(), false);
        assert!(matches!(
            result,
            Err(DataLinkError::FrameTooLarge { len: 502, max: 501 })
        ));
        assert!(encode_frame(FrameType::TestRequest, 1, 2, &data).is_err());

        let data = vec![0u8; MSTP_MAX_DATA_LENGTH];
        let frame = MstpFrame::bacnet_data(10, 20, data, false).unwrap();
        assert_eq!(frame.encode().len(), MSTP_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        MstpFrame::token(1, 0).encode_into(&mut buf);
        MstpFrame::poll_for_master(2, 0).encode_into(&mut buf);
        assert_eq!(buf.len(), 2 * MSTP_HEADER_SIZE);
        assert_eq!(buf[MSTP_HEADER_SIZE + 2], u8::from(FrameType::PollForMaster));
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::from(0u8), FrameType::Token);
        assert_eq!(FrameType::from(7u8), FrameType::ReplyPostponed);
        assert!(FrameType::from(128u8).is_proprietary());
        assert!(matches!(FrameType::from(8u8), FrameType::Reserved(_)));
        assert_eq!(u8::from(FrameType::from(200u8)), 200);
        assert_eq!(FrameType::TestRequest.to_string(), "TestRequest");

        assert!(FrameType::BacnetDataExpectingReply.expects_reply());
        assert!(FrameType::TestRequest.expects_reply());
        assert!(!FrameType::BacnetDataNotExpectingReply.expects_reply());
        assert!(FrameType::BacnetDataNotExpectingReply.is_data());
        assert!(!FrameType::Token.is_data());
    }
}
