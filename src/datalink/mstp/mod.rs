//! BACnet MS/TP (Master-Slave/Token-Passing) Data Link Implementation
//!
//! This module implements the BACnet MS/TP data link layer as defined in ASHRAE 135 Clause 9.
//! MS/TP provides multi-drop, half-duplex communication over EIA-485 (RS-485) physical layer.
//!
//! # Overview
//!
//! MS/TP provides:
//! - Token-passing protocol for medium access control
//! - Master and slave node support
//! - Automatic token management: loss detection, regeneration, new successors
//! - Frame error detection using CRC
//! - Support for up to 128 master nodes (addresses 0-127)
//! - Support for up to 127 slave nodes (addresses 128-254)
//! - Optional zero-configuration address selection for masters
//!
//! # Structure
//!
//! - [`frame`] and [`crc`]: the wire format
//! - [`receive`]: octet-by-octet frame reassembly
//! - [`master`], [`slave`] and [`zero_config`]: the node state machines
//! - [`port`]: one link, driven by [`MstpPort::poll`]
//! - [`link`]: a [`DataLink`](crate::datalink::DataLink) on top of a port
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use bacnet_mstp::datalink::mstp::{MstpConfig, MstpPort};
//!
//! let config = MstpConfig {
//!     max_master: 10,
//!     ..MstpConfig::master(3)
//! };
//! let port = MstpPort::new(config, Instant::now()).unwrap();
//! assert_eq!(port.this_station(), 3);
//! ```

pub mod config;
pub mod crc;
pub mod frame;
pub mod link;
pub mod master;
pub mod port;
pub mod receive;
pub mod slave;
pub mod timing;
pub mod zero_config;

pub use config::{MstpConfig, NodeRole, ZeroConfigSettings};
pub use frame::{
    encode_frame, encode_frame_into, FrameType, MstpFrame, MSTP_HEADER_SIZE, MSTP_MAX_DATA_LENGTH,
    MSTP_MAX_FRAME_SIZE, MSTP_PREAMBLE_55, MSTP_PREAMBLE_FF,
};
pub use link::{MstpDataLink, MSTP_QUEUE_CAPACITY};
pub use master::{MasterFsm, MasterState};
pub use port::{MstpApplication, MstpPort, MstpStats, NodeState, OutgoingFrame, SerialPort};
pub use receive::{
    decode_frame, InvalidFrameReason, ReceiveEvent, ReceiveFsm, ReceiveState, ReceiveStats,
    RxInput,
};
pub use slave::{SlaveFsm, SlaveState};
pub use timing::{MstpTiming, SilenceTimer, DEFAULT_FRAME_ABORT, MAX_FRAME_ABORT};
pub use zero_config::{ZeroConfig, ZeroConfigState};

use crate::datalink::{DataLinkError, Result};

/// MS/TP broadcast station address
pub const MSTP_BROADCAST_ADDRESS: u8 = 255;

/// Validate an MS/TP station address for a given role.
///
/// Masters use 0-127 and slaves 128-254; 255 is the broadcast address and is
/// never a station.
pub fn validate_mstp_address(address: u8, role: NodeRole) -> Result<()> {
    let valid = match role {
        NodeRole::Master => is_master_node(address),
        NodeRole::Slave => address != MSTP_BROADCAST_ADDRESS,
    };
    if valid {
        Ok(())
    } else {
        Err(DataLinkError::AddressError(format!(
            "station {} cannot be used by a {:?} node",
            address, role
        )))
    }
}

/// Check if address is a master node
pub fn is_master_node(address: u8) -> bool {
    address <= 127
}

/// Check if address is a slave node
pub fn is_slave_node(address: u8) -> bool {
    (128..=254).contains(&address)
}
