#![doc = include_str!("../README.md")]

pub mod datalink;
#[cfg(feature = "async")]
pub mod driver;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use datalink::mstp::{
    FrameType, MstpConfig, MstpDataLink, MstpFrame, MstpPort, MstpStats, NodeRole, SerialPort,
};
pub use datalink::{DataLink, DataLinkAddress, DataLinkError};

/// Largest NPDU carried in one MS/TP frame.
pub const BACNET_MAX_MSTP_NPDU: usize = datalink::mstp::MSTP_MAX_DATA_LENGTH;

#[cfg(test)]
mod tests {
    use crate::datalink::mstp::decode_frame;
    use crate::{DataLinkAddress, FrameType, MstpFrame, BACNET_MAX_MSTP_NPDU};

    #[test]
    fn test_token_wire_format() {
        let token = MstpFrame::token(0x10, 0x05);
        let encoded = token.encode();
        assert_eq!(
            &encoded[..],
            &[0x55, 0xFF, 0x00, 0x10, 0x05, 0x00, 0x00, 0x8C]
        );
        assert_eq!(decode_frame(&encoded).unwrap(), token);
    }

    #[test]
    fn test_max_npdu() {
        assert_eq!(BACNET_MAX_MSTP_NPDU, 501);
        assert!(MstpFrame::new(
            FrameType::BacnetDataNotExpectingReply,
            255,
            1,
            vec![0u8; BACNET_MAX_MSTP_NPDU + 1]
        )
        .is_err());
        assert_eq!(DataLinkAddress::Broadcast.mstp_station(), 255);
    }
}
