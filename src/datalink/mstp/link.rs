//! Queue-backed MS/TP data link
//!
//! [`MstpDataLink`] adapts an [`MstpPort`] to the [`DataLink`] trait. NPDUs
//! handed to [`send_frame`](DataLink::send_frame) wait in a bounded queue until
//! the station holds the token; received NPDUs wait in a second queue for
//! [`receive_frame`](DataLink::receive_frame). The host keeps the link running
//! by calling [`MstpDataLink::poll`].

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use log::warn;

use super::config::MstpConfig;
use super::frame::{FrameType, MstpFrame, MSTP_MAX_DATA_LENGTH};
use super::port::{MstpApplication, MstpPort, MstpStats, OutgoingFrame, SerialPort};
use super::MSTP_BROADCAST_ADDRESS;
use crate::datalink::{DataLink, DataLinkAddress, DataLinkError, Result};

/// Capacity of each of the transmit and receive queues.
pub const MSTP_QUEUE_CAPACITY: usize = 16;

/// NPDU control octet bit: the sender expects a reply.
const NPDU_EXPECTING_REPLY: u8 = 0x04;

#[derive(Debug, Default)]
struct LinkQueues {
    outgoing: VecDeque<OutgoingFrame>,
    incoming: VecDeque<(Vec<u8>, DataLinkAddress)>,
    dropped: u64,
}

impl MstpApplication for LinkQueues {
    fn deliver(&mut self, frame: &MstpFrame) {
        if !frame.is_data() {
            return;
        }
        if self.incoming.len() >= MSTP_QUEUE_CAPACITY {
            warn!("MS/TP: receive queue full, dropping NPDU from {}", frame.source);
            self.dropped += 1;
            return;
        }
        self.incoming
            .push_back((frame.data.to_vec(), DataLinkAddress::MsTP(frame.source)));
    }

    fn next_frame(&mut self) -> Option<OutgoingFrame> {
        self.outgoing.pop_front()
    }

    fn reply(&mut self, request: &MstpFrame) -> Option<OutgoingFrame> {
        let position = self.outgoing.iter().position(|frame| {
            frame.destination == request.source
                && frame.frame_type == FrameType::BacnetDataNotExpectingReply
        })?;
        self.outgoing.remove(position)
    }
}

/// MS/TP data link implementation
pub struct MstpDataLink<S> {
    port: MstpPort,
    serial: S,
    queues: LinkQueues,
}

impl<S: SerialPort> MstpDataLink<S> {
    /// Create a data link on `serial`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: MstpConfig, serial: S) -> Result<Self> {
        Ok(Self {
            port: MstpPort::new(config, Instant::now())?,
            serial,
            queues: LinkQueues::default(),
        })
    }

    /// Drive the port for one cycle.
    pub fn poll(&mut self, now: Instant) {
        self.port.poll(&mut self.serial, &mut self.queues, now);
    }

    pub fn port(&self) -> &MstpPort {
        &self.port
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Port counters.
    pub fn stats(&self) -> MstpStats {
        self.port.stats()
    }

    /// NPDUs waiting for the token.
    pub fn pending_frames(&self) -> usize {
        self.queues.outgoing.len()
    }

    /// Received NPDUs dropped because the receive queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.queues.dropped
    }
}

impl<S: SerialPort + Send + Sync> DataLink for MstpDataLink<S> {
    fn send_frame(&mut self, frame: &[u8], dest: &DataLinkAddress) -> Result<()> {
        if frame.len() > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge {
                len: frame.len(),
                max: MSTP_MAX_DATA_LENGTH,
            });
        }
        if self.queues.outgoing.len() >= MSTP_QUEUE_CAPACITY {
            return Err(DataLinkError::QueueFull);
        }

        let destination = dest.mstp_station();
        let expecting_reply = destination != MSTP_BROADCAST_ADDRESS
            && frame
                .get(1)
                .is_some_and(|control| control & NPDU_EXPECTING_REPLY != 0);
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };

        self.queues.outgoing.push_back(OutgoingFrame::new(
            frame_type,
            destination,
            Bytes::copy_from_slice(frame),
        ));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<(Vec<u8>, DataLinkAddress)> {
        self.queues
            .incoming
            .pop_front()
            .ok_or(DataLinkError::WouldBlock)
    }

    fn local_address(&self) -> DataLinkAddress {
        DataLinkAddress::MsTP(self.port.this_station())
    }
}
