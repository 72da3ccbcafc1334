//! MS/TP header and data CRCs (ASHRAE 135 Annex G)
//!
//! Two CRCs protect every frame:
//! - **Header CRC-8**, polynomial X^8 + X^7 + 1, over frame type, destination,
//!   source and the two length octets.
//! - **Data CRC-16**, CRC-CCITT X^16 + X^12 + X^5 + 1, over the payload.
//!
//! Both start from all ones and are transmitted complemented (the data CRC low
//! octet first). A receiver runs the accumulator over the received CRC octets as
//! well; an undamaged frame leaves the fixed residues [`HEADER_CRC_RESIDUE`] and
//! [`DATA_CRC_RESIDUE`] in the register.
//!
//! The per-octet accumulators are what the receive state machine uses. The
//! whole-buffer helpers go through the `crc` crate and are used when assembling
//! frames.

use crc::{Algorithm, Crc, CRC_16_IBM_SDLC};

/// Initial value of the header CRC register.
pub const HEADER_CRC_INIT: u8 = 0xFF;

/// Header CRC register value after a valid header and its CRC octet.
pub const HEADER_CRC_RESIDUE: u8 = 0x55;

/// Initial value of the data CRC register.
pub const DATA_CRC_INIT: u16 = 0xFFFF;

/// Data CRC register value after a valid payload and both CRC octets.
pub const DATA_CRC_RESIDUE: u16 = 0xF0B8;

/// CRC-8 with polynomial X^8 + X^7 + 1, reflected, as used by the MS/TP header.
const CRC_8_MSTP_HEADER: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x81,
    init: 0xFF,
    refin: true,
    refout: true,
    xorout: 0xFF,
    check: 0x89,
    residue: 0x55,
};

const HEADER: Crc<u8> = Crc::<u8>::new(&CRC_8_MSTP_HEADER);
const DATA: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Fold one octet into the running header CRC.
pub fn header_crc(byte: u8, crc: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        if crc & 0x01 != 0 {
            crc = (crc >> 1) ^ 0x81;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Fold one octet into the running data CRC.
pub fn data_crc(byte: u8, crc: u16) -> u16 {
    let mut crc = crc ^ byte as u16;
    for _ in 0..8 {
        if crc & 0x0001 != 0 {
            crc = (crc >> 1) ^ 0x8408;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Header CRC octet to transmit for the five header octets.
pub fn header_checksum(header: &[u8; 5]) -> u8 {
    HEADER.checksum(header)
}

/// Data CRC to transmit for a payload (send the low octet first).
pub fn data_checksum(data: &[u8]) -> u16 {
    DATA.checksum(data)
}
