//! BACnet Data Link Layer Module
//!
//! This module provides the data link layer pieces of the crate: the error type shared by
//! every data link operation, the [`DataLink`] trait used by upper layers to exchange NPDUs,
//! and the [`mstp`] module implementing the MS/TP token-passing protocol.
//!
//! # Overview
//!
//! The data link layer is responsible for:
//! - **Frame Assembly/Disassembly**: Constructing and parsing MS/TP frames
//! - **Address Management**: Mapping station addresses and the broadcast address
//! - **Error Detection**: Header CRC-8 and data CRC-16 calculation and verification
//! - **Media Access Control**: Circulating the token on the shared RS-485 segment
//!
//! # Architecture
//!
//! The MS/TP port is a set of cooperating state machines driven by a host loop. Upper
//! layers either plug into the port directly through the
//! [`MstpApplication`](mstp::MstpApplication) trait or use the queue-backed
//! [`MstpDataLink`](mstp::MstpDataLink), which implements [`DataLink`].
//!
//! # Examples
//!
//! ```
//! use bacnet_mstp::datalink::{DataLink, DataLinkAddress};
//!
//! fn send_broadcast(data_link: &mut dyn DataLink, npdu: &[u8]) -> bacnet_mstp::datalink::Result<()> {
//!     data_link.send_frame(npdu, &DataLinkAddress::Broadcast)
//! }
//! ```

use thiserror::Error;

/// Result type for data link operations.
///
/// # Examples
///
/// ```
/// use bacnet_mstp::datalink::Result;
///
/// fn parse_frame(data: &[u8]) -> Result<Vec<u8>> {
///     if data.is_empty() {
///         return Err(bacnet_mstp::datalink::DataLinkError::InvalidFrame);
///     }
///     Ok(data.to_vec())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DataLinkError>;

/// Errors that can occur during data link layer operations.
///
/// The MS/TP state machines never return these for conditions on the wire; corrupted
/// frames and timeouts are recovered locally and only counted. These errors are reserved
/// for API misuse (oversized payloads, bad configuration, full queues) and transport I/O.
#[derive(Debug, Error)]
pub enum DataLinkError {
    /// I/O error reported by the serial transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid frame format detected.
    #[error("Invalid frame format")]
    InvalidFrame,

    /// CRC check failed during frame validation.
    #[error("CRC check failed")]
    CrcError,

    /// Payload does not fit in a single frame.
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Address resolution or validation failed.
    #[error("Address error: {0}")]
    AddressError(String),

    /// The port configuration is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The outgoing queue is full; try again after the next token.
    #[error("Transmit queue full")]
    QueueFull,

    /// No frame is available right now.
    #[error("No frame available")]
    WouldBlock,
}

/// Common trait for data link layer implementations.
///
/// Upper protocol layers hand NPDUs to the data link and collect the NPDUs it
/// received. Data link headers are added and stripped by the implementation.
///
/// # Examples
///
/// ```
/// use bacnet_mstp::datalink::{DataLink, DataLinkAddress, Result};
///
/// struct NullDataLink;
///
/// impl DataLink for NullDataLink {
///     fn send_frame(&mut self, _frame: &[u8], _dest: &DataLinkAddress) -> Result<()> {
///         Ok(())
///     }
///
///     fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)> {
///         Err(bacnet_mstp::datalink::DataLinkError::WouldBlock)
///     }
///
///     fn local_address(&self) -> DataLinkAddress {
///         DataLinkAddress::MsTP(1)
///     }
/// }
/// ```
pub trait DataLink: Send + Sync {
    /// Send a frame to the specified destination address.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination address cannot be used on this data
    /// link, the frame is too large, or the frame cannot be queued.
    fn send_frame(&mut self, frame: &[u8], dest: &DataLinkAddress) -> Result<()>;

    /// Receive a frame from the data link.
    ///
    /// Returns the frame data (NPDU and above) along with the source address.
    /// Returns [`DataLinkError::WouldBlock`] when nothing has been received.
    fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)>;

    /// Get the local address of this data link.
    fn local_address(&self) -> DataLinkAddress;
}

/// Data link layer address representation.
///
/// # Examples
///
/// ```
/// use bacnet_mstp::datalink::DataLinkAddress;
///
/// let station = DataLinkAddress::MsTP(42);
/// assert_eq!(station.mstp_station(), 42);
/// assert_eq!(DataLinkAddress::Broadcast.mstp_station(), 255);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLinkAddress {
    /// MS/TP station address.
    ///
    /// Valid ranges:
    /// - 0-127: Master nodes (can initiate communication)
    /// - 128-254: Slave nodes (only respond to requests)
    /// - 255: Broadcast address
    MsTP(u8),

    /// Broadcast address for sending to all devices on the segment.
    Broadcast,
}

impl DataLinkAddress {
    /// MS/TP station number for this address (255 for broadcast).
    pub fn mstp_station(&self) -> u8 {
        match self {
            DataLinkAddress::MsTP(station) => *station,
            DataLinkAddress::Broadcast => mstp::MSTP_BROADCAST_ADDRESS,
        }
    }
}

/// MS/TP (Master-Slave/Token-Passing) implementation.
///
/// This module provides BACnet communication over RS-485 serial links using a
/// token-passing protocol. It's commonly used for field-level devices due to
/// its low cost and ability to support long cable runs.
pub mod mstp;

pub use mstp::MstpDataLink;
